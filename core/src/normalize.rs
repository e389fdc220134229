//! Tool response normalization.
//!
//! Purchase-history tools disagree on where they put their records and how
//! they encode them. Some return a JSON array, some a JSON *string* holding
//! the array, and some nest it under brand-specific keys such as `books`,
//! `purchases` or `extract_result[0].content`. [`decode_content`] walks a
//! fixed precedence of known locations and yields a [`DecodedContent`];
//! [`normalize`] then maps every record onto [`PurchaseHistoryRecord`].
//!
//! Missing fields inside a record fall back to empty defaults. A payload
//! that does not match any known shape is an error, never an empty list.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::brands::Brand;
use crate::purchases::PurchaseHistoryRecord;

const MAX_NESTED_DECODE_DEPTH: usize = 4;
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%b %d %Y",
    "%B %d %Y",
];
const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
const DATE_PREFIXES: [&str; 3] = ["ordered on", "order placed", "placed on"];

const ITEM_NAME_KEYS: [&str; 4] = ["name", "title", "product_name", "productName"];
const ITEM_IMAGE_KEYS: [&str; 5] = ["image_url", "imageUrl", "image", "img", "thumbnail"];
const IMAGE_URL_KEYS: [&str; 3] = ["url", "src", "href"];

static NULL_VALUE: Value = Value::Null;

/// Where in the payload the records were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    Root,
    Books,
    Purchases,
    PurchaseHistory,
    Orders,
    ExtractResult,
    Content,
    Result,
}

/// Candidate locations, highest precedence first.
const CANDIDATES: [ContentSource; 7] = [
    ContentSource::Books,
    ContentSource::Purchases,
    ContentSource::PurchaseHistory,
    ContentSource::Orders,
    ContentSource::ExtractResult,
    ContentSource::Content,
    ContentSource::Result,
];

impl ContentSource {
    pub fn field(self) -> &'static str {
        match self {
            ContentSource::Root => "<root>",
            ContentSource::Books => "books",
            ContentSource::Purchases => "purchases",
            ContentSource::PurchaseHistory => "purchase_history",
            ContentSource::Orders => "orders",
            ContentSource::ExtractResult => "extract_result[0].content",
            ContentSource::Content => "content",
            ContentSource::Result => "result",
        }
    }

    fn lookup(self, map: &Map<String, Value>) -> Option<&Value> {
        match self {
            ContentSource::Root => None,
            ContentSource::Books => map.get("books"),
            ContentSource::Purchases => map.get("purchases"),
            ContentSource::PurchaseHistory => map.get("purchase_history"),
            ContentSource::Orders => map.get("orders"),
            ContentSource::ExtractResult => map.get("extract_result").map(|extract| {
                extract
                    .as_array()
                    .and_then(|entries| entries.first())
                    .and_then(|first| first.get("content"))
                    .unwrap_or(&NULL_VALUE)
            }),
            ContentSource::Content => map
                .get("content")
                .map(|content| mcp_text_block(content).unwrap_or(content)),
            ContentSource::Result => map.get("result"),
        }
    }
}

/// Result of locating records inside a tool payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedContent {
    Empty,
    Records {
        source: ContentSource,
        records: Vec<Map<String, Value>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("content at `{field}` is not valid JSON: {message}")]
    InvalidJson { field: String, message: String },
    #[error("content at `{field}` is {found}, expected a list of records")]
    NotARecordList { field: String, found: &'static str },
    #[error("record {index} at `{field}` is {found}, expected an object")]
    NotARecord {
        field: String,
        index: usize,
        found: &'static str,
    },
    #[error("payload matched no known purchase-history shape (keys: {keys})")]
    UnknownShape { keys: String },
    #[error("content at `{field}` is nested too deeply")]
    TooDeep { field: String },
}

/// Locate the record list inside a raw tool payload.
pub fn decode_content(payload: &Value) -> Result<DecodedContent, ShapeError> {
    decode_at(payload, ContentSource::Root, 0)
}

/// Decode and map a purchase-history payload for `brand`.
pub fn normalize(brand: Brand, payload: &Value) -> Result<Vec<PurchaseHistoryRecord>, ShapeError> {
    Ok(match decode_content(payload)? {
        DecodedContent::Empty => Vec::new(),
        DecodedContent::Records { records, .. } => records
            .iter()
            .map(|record| map_record(brand, record))
            .collect(),
    })
}

/// Normalize a per-order detail payload into a single record.
///
/// Detail tools return either one order object or a list of line items;
/// line items are folded into one record with all their products and images.
pub fn normalize_detail(
    brand: Brand,
    payload: &Value,
) -> Result<Option<PurchaseHistoryRecord>, ShapeError> {
    let parsed;
    let payload = match payload {
        Value::String(text) if !text.trim().is_empty() => {
            parsed = parse_json(text, ContentSource::Root)?;
            &parsed
        }
        other => other,
    };

    if let Value::Object(map) = payload {
        let has_candidate = CANDIDATES.iter().any(|c| c.lookup(map).is_some());
        if !map.is_empty() && !has_candidate {
            return Ok(Some(map_record(brand, map)));
        }
    }

    let records = normalize(brand, payload)?;
    let mut records = records.into_iter();
    let Some(mut combined) = records.next() else {
        return Ok(None);
    };
    for record in records {
        combined.product_names.extend(record.product_names);
        combined.image_urls.extend(record.image_urls);
        if combined.order_total.is_empty() {
            combined.order_total = record.order_total;
        }
        if combined.order_date.is_none() {
            combined.order_date = record.order_date;
        }
    }
    Ok(Some(combined))
}

/// Map one upstream record, defaulting anything missing.
pub fn map_record(brand: Brand, record: &Map<String, Value>) -> PurchaseHistoryRecord {
    let aliases = brand.field_aliases();
    let (product_names, item_images) = product_fields(record, aliases.product_names);
    let mut image_urls = string_list(record, aliases.image_urls);
    if image_urls.is_empty() {
        image_urls = item_images;
    }

    PurchaseHistoryRecord {
        brand_id: brand.id().to_string(),
        brand: brand.display_name().to_string(),
        order_date: aliases
            .order_date
            .iter()
            .find_map(|key| record.get(*key).and_then(coerce_date)),
        order_total: first_text(record, aliases.order_total).unwrap_or_default(),
        order_id: first_text(record, aliases.order_id).unwrap_or_default(),
        product_names,
        image_urls,
    }
}

/// Best-effort date coercion. Unparseable input yields `None`.
pub fn coerce_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(raw) => parse_date_text(raw),
        Value::Number(number) => {
            let raw = number.as_i64()?;
            let secs = if raw.abs() >= EPOCH_MILLIS_THRESHOLD {
                raw / 1000
            } else {
                raw
            };
            DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
        }
        _ => None,
    }
}

fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let mut text = raw.trim();
    let lowered = text.to_ascii_lowercase();
    for prefix in DATE_PREFIXES {
        if lowered.starts_with(prefix) {
            text = text[prefix.len()..].trim_start_matches([':', ' ']);
            break;
        }
    }
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn decode_at(
    value: &Value,
    source: ContentSource,
    depth: usize,
) -> Result<DecodedContent, ShapeError> {
    if depth > MAX_NESTED_DECODE_DEPTH {
        return Err(ShapeError::TooDeep {
            field: source.field().to_string(),
        });
    }
    match value {
        Value::Null => Ok(DecodedContent::Empty),
        Value::String(text) => {
            if text.trim().is_empty() {
                return Ok(DecodedContent::Empty);
            }
            let parsed = parse_json(text, source)?;
            decode_at(&parsed, source, depth + 1)
        }
        Value::Array(items) => collect_records(items, source),
        Value::Object(map) => decode_object(map, depth),
        other => Err(ShapeError::NotARecordList {
            field: source.field().to_string(),
            found: kind_of(other),
        }),
    }
}

fn decode_object(map: &Map<String, Value>, depth: usize) -> Result<DecodedContent, ShapeError> {
    if map.is_empty() {
        return Ok(DecodedContent::Empty);
    }
    let mut saw_candidate = false;
    for candidate in CANDIDATES {
        let Some(content) = candidate.lookup(map) else {
            continue;
        };
        saw_candidate = true;
        match decode_at(content, candidate, depth + 1)? {
            DecodedContent::Empty => continue,
            found => return Ok(found),
        }
    }
    if saw_candidate {
        Ok(DecodedContent::Empty)
    } else {
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        Err(ShapeError::UnknownShape {
            keys: keys.join(", "),
        })
    }
}

fn collect_records(items: &[Value], source: ContentSource) -> Result<DecodedContent, ShapeError> {
    if items.is_empty() {
        return Ok(DecodedContent::Empty);
    }
    let records = items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) if is_content_block(map) => Err(ShapeError::NotARecord {
                field: source.field().to_string(),
                index,
                found: "a content block",
            }),
            Value::Object(map) => Ok(map.clone()),
            other => Err(ShapeError::NotARecord {
                field: source.field().to_string(),
                index,
                found: kind_of(other),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DecodedContent::Records { source, records })
}

fn parse_json(text: &str, source: ContentSource) -> Result<Value, ShapeError> {
    serde_json::from_str(text.trim()).map_err(|e| ShapeError::InvalidJson {
        field: source.field().to_string(),
        message: e.to_string(),
    })
}

/// `[{ "type": "text", "text": "..." }]` as emitted in MCP tool content.
/// Some tools omit the `type` tag; a string `text` is enough.
fn mcp_text_block(content: &Value) -> Option<&Value> {
    let first = content.as_array()?.first()?;
    match first.get("type").and_then(Value::as_str) {
        None | Some("text") => first.get("text").filter(|text| text.is_string()),
        Some(_) => None,
    }
}

/// An MCP content block (`text`, `image`, `resource`...) rather than a record.
fn is_content_block(map: &Map<String, Value>) -> bool {
    const BLOCK_KEYS: &[&str] = &["type", "text", "data", "mimeType", "resource", "annotations"];
    (map.contains_key("type") || map.contains_key("text"))
        && map.keys().all(|key| BLOCK_KEYS.contains(&key.as_str()))
}

fn first_text(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn product_fields(record: &Map<String, Value>, keys: &[&str]) -> (Vec<String>, Vec<String>) {
    for key in keys {
        match record.get(*key) {
            Some(Value::Array(items)) => {
                let names: Vec<String> = items.iter().filter_map(item_name).collect();
                if !names.is_empty() {
                    let images = items.iter().filter_map(item_image).collect();
                    return (names, images);
                }
            }
            Some(Value::String(name)) if !name.trim().is_empty() => {
                return (vec![name.trim().to_string()], Vec::new());
            }
            Some(item @ Value::Object(_)) => {
                if let Some(name) = item_name(item) {
                    return (vec![name], item_image(item).into_iter().collect());
                }
            }
            _ => {}
        }
    }
    (Vec::new(), Vec::new())
}

fn string_list(record: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        match record.get(*key) {
            Some(Value::Array(items)) => {
                let urls: Vec<String> = items.iter().filter_map(image_url).collect();
                if !urls.is_empty() {
                    return urls;
                }
            }
            Some(Value::String(url)) if !url.trim().is_empty() => {
                return vec![url.trim().to_string()];
            }
            _ => {}
        }
    }
    Vec::new()
}

fn item_name(item: &Value) -> Option<String> {
    match item {
        Value::String(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
        Value::Object(map) => first_text(map, &ITEM_NAME_KEYS),
        _ => None,
    }
}

fn item_image(item: &Value) -> Option<String> {
    match item {
        Value::Object(map) => first_text(map, &ITEM_IMAGE_KEYS),
        _ => None,
    }
}

fn image_url(item: &Value) -> Option<String> {
    match item {
        Value::String(url) if !url.trim().is_empty() => Some(url.trim().to_string()),
        Value::Object(map) => first_text(map, &IMAGE_URL_KEYS),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn amazon_orders() -> Value {
        json!([
            {
                "order_id": "A1",
                "order_date": "2024-01-01",
                "order_total": "$10",
                "product_names": ["X"],
                "image_urls": ["img1"]
            },
            {
                "order_id": "A2",
                "order_date": "March 3, 2024",
                "order_total": "$25.10",
                "product_names": ["Y", "Z"],
                "image_urls": []
            }
        ])
    }

    #[test]
    fn amazon_purchases_scenario_maps_one_record() {
        let payload = json!({
            "purchases": [{
                "order_id": "A1",
                "order_date": "2024-01-01",
                "order_total": "$10",
                "product_names": ["X"],
                "image_urls": ["img1"]
            }]
        });

        let records = normalize(Brand::Amazon, &payload).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.brand, "Amazon");
        assert_eq!(record.order_id, "A1");
        assert_eq!(record.order_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(record.order_total, "$10");
        assert_eq!(record.product_names, vec!["X"]);
        assert_eq!(record.image_urls, vec!["img1"]);
    }

    #[test]
    fn string_encoded_array_matches_parsed_array() {
        let parsed = amazon_orders();
        let encoded = Value::String(parsed.to_string());

        let from_parsed = normalize(Brand::Amazon, &parsed).unwrap();
        let from_string = normalize(Brand::Amazon, &encoded).unwrap();
        assert_eq!(from_parsed, from_string);
        assert_eq!(from_parsed.len(), 2);

        let wrapped_string = json!({ "purchase_history": parsed.to_string() });
        assert_eq!(normalize(Brand::Amazon, &wrapped_string).unwrap(), from_parsed);
    }

    #[test]
    fn first_non_empty_candidate_wins_in_precedence_order() {
        let payload = json!({
            "purchases": [{ "order_id": "P1" }],
            "books": [{ "title": "Dune", "book_id": "B1" }]
        });
        let decoded = decode_content(&payload).unwrap();
        match decoded {
            DecodedContent::Records { source, records } => {
                assert_eq!(source, ContentSource::Books);
                assert_eq!(records.len(), 1);
            }
            DecodedContent::Empty => panic!("expected records"),
        }

        let books_empty = json!({ "books": [], "purchases": [{ "order_id": "P1" }] });
        match decode_content(&books_empty).unwrap() {
            DecodedContent::Records { source, .. } => assert_eq!(source, ContentSource::Purchases),
            DecodedContent::Empty => panic!("expected purchases to be used"),
        }
    }

    #[test]
    fn extract_result_inside_mcp_text_block_is_decoded() {
        let inner = json!({
            "extract_result": [{
                "content": [{ "title": "Dune", "date_read": "2023-06-02", "book_id": "42" }]
            }]
        });
        let payload = json!({
            "content": [{ "type": "text", "text": inner.to_string() }]
        });

        let records = normalize(Brand::Goodreads, &payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].brand, "Goodreads");
        assert_eq!(records[0].order_id, "42");
        assert_eq!(records[0].product_names, vec!["Dune"]);
        assert_eq!(records[0].order_date, NaiveDate::from_ymd_opt(2023, 6, 2));
    }

    #[test]
    fn untyped_text_block_is_decoded_too() {
        let inner = json!({
            "extract_result": [{ "content": [{ "title": "Dune", "book_id": "42" }] }]
        });
        let payload = json!({ "content": [{ "text": inner.to_string() }] });

        let records = normalize(Brand::Goodreads, &payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].order_id, "42");
        assert_eq!(records[0].product_names, vec!["Dune"]);
    }

    #[test]
    fn content_blocks_are_not_records() {
        let payload = json!({
            "content": [{ "type": "image", "data": "aGVsbG8=", "mimeType": "image/png" }]
        });
        let err = normalize(Brand::Amazon, &payload).unwrap_err();
        assert_eq!(
            err,
            ShapeError::NotARecord {
                field: "content".to_string(),
                index: 0,
                found: "a content block"
            }
        );
    }

    #[test]
    fn empty_and_missing_content_yield_no_records() {
        for payload in [
            Value::Null,
            json!(""),
            json!([]),
            json!({}),
            json!({ "purchases": [] }),
            json!({ "purchases": null, "books": "" }),
            json!({ "extract_result": [] }),
        ] {
            assert_eq!(
                normalize(Brand::Amazon, &payload).unwrap(),
                Vec::new(),
                "payload {payload} should be empty"
            );
        }
    }

    #[test]
    fn unknown_shape_is_an_error() {
        let err = normalize(Brand::Amazon, &json!({ "status": "ok", "count": 3 }))
            .expect_err("no candidate field present");
        match err {
            ShapeError::UnknownShape { keys } => {
                assert!(keys.contains("status"));
                assert!(keys.contains("count"));
            }
            other => panic!("expected UnknownShape, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_string_is_an_error() {
        let err = normalize(Brand::Amazon, &json!({ "purchases": "[{not json" }))
            .expect_err("content string is not JSON");
        assert!(matches!(err, ShapeError::InvalidJson { ref field, .. } if field == "purchases"));
    }

    #[test]
    fn non_list_content_and_non_object_records_are_errors() {
        let err = normalize(Brand::Amazon, &json!({ "purchases": 12 })).unwrap_err();
        assert_eq!(
            err,
            ShapeError::NotARecordList {
                field: "purchases".to_string(),
                found: "a number"
            }
        );

        let err = normalize(Brand::Amazon, &json!({ "purchases": [{ "order_id": "A" }, 7] }))
            .unwrap_err();
        assert_eq!(
            err,
            ShapeError::NotARecord {
                field: "purchases".to_string(),
                index: 1,
                found: "a number"
            }
        );
    }

    #[test]
    fn missing_fields_default_instead_of_failing_the_batch() {
        let payload = json!({ "purchases": [{ "order_id": "A1" }, {}] });
        let records = normalize(Brand::Amazon, &payload).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].order_id, "");
        assert_eq!(records[1].order_total, "");
        assert!(records[1].order_date.is_none());
        assert!(records[1].product_names.is_empty());
        assert!(records[1].image_urls.is_empty());
    }

    #[test]
    fn wayfair_falls_back_to_order_number_and_nested_items() {
        let payload = json!({
            "orders": [{
                "order_number": "W-77",
                "total": 149.5,
                "items": [
                    { "name": "Lamp", "image_url": "https://img/lamp.jpg" },
                    { "name": "Rug" }
                ]
            }]
        });
        let records = normalize(Brand::Wayfair, &payload).unwrap();
        assert_eq!(records[0].order_id, "W-77");
        assert_eq!(records[0].order_total, "149.5");
        assert_eq!(records[0].product_names, vec!["Lamp", "Rug"]);
        assert_eq!(records[0].image_urls, vec!["https://img/lamp.jpg"]);
    }

    #[test]
    fn dates_are_coerced_defensively() {
        assert_eq!(coerce_date(&json!("2024-02-29")), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(coerce_date(&json!("02/29/2024")), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(coerce_date(&json!("January 5, 2024")), NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(
            coerce_date(&json!("Ordered on March 3, 2024")),
            NaiveDate::from_ymd_opt(2024, 3, 3)
        );
        assert_eq!(
            coerce_date(&json!("2024-01-01T10:00:00Z")),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(coerce_date(&json!(1_704_067_200)), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(coerce_date(&json!(1_704_067_200_000_i64)), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(coerce_date(&json!("last tuesday")), None);
        assert_eq!(coerce_date(&json!(true)), None);
    }

    #[test]
    fn detail_payload_as_single_order_object() {
        let payload = json!({
            "order_number": "W-1",
            "products": [{ "title": "Desk", "image": "desk.png" }]
        });
        let detail = normalize_detail(Brand::Wayfair, &payload).unwrap().unwrap();
        assert_eq!(detail.order_id, "W-1");
        assert_eq!(detail.product_names, vec!["Desk"]);
        assert_eq!(detail.image_urls, vec!["desk.png"]);
    }

    #[test]
    fn detail_payload_as_line_items_is_folded() {
        let payload = Value::String(
            json!([
                { "name": "Chair", "image_url": "chair.png" },
                { "name": "Table" }
            ])
            .to_string(),
        );
        let detail = normalize_detail(Brand::Wayfair, &payload).unwrap().unwrap();
        assert_eq!(detail.product_names, vec!["Chair", "Table"]);
        assert_eq!(detail.image_urls, vec!["chair.png"]);

        assert_eq!(normalize_detail(Brand::Wayfair, &json!([])).unwrap(), None);
    }
}

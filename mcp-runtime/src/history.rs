//! Purchase-history retrieval: one tool call that either yields records or
//! asks the user to finish linking their account first.

use futures::stream::{self, StreamExt};
use portrait_core::normalize::{self, DecodedContent, ShapeError};
use portrait_core::purchases::filter_unique_orders;
use portrait_core::{Brand, DetailTool, PurchaseHistoryRecord};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::client::{DEFAULT_MAX_RETRIES, ToolClient};
use crate::error::ClientError;
use crate::link::{HostedLink, LinkStatus, POLL_TOOL};
use crate::transport::ToolCallResult;

pub const DEFAULT_DETAIL_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOptions {
    pub max_retries: u32,
    /// Upper bound on in-flight per-order detail calls.
    pub detail_concurrency: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            detail_concurrency: DEFAULT_DETAIL_CONCURRENCY,
        }
    }
}

/// Both variants are successful answers to the same request.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    Ready(Vec<PurchaseHistoryRecord>),
    LinkRequired(HostedLink),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("tool response did not match any known shape")]
    Shape(#[from] ShapeError),
    #[error("tool `{tool}` reported an error")]
    ToolReported { tool: String, message: String },
    #[error("brand {0} has no per-order detail tool")]
    Unsupported(Brand),
}

/// Fetch a brand's history, enriching orders with per-order details where
/// the brand's listing leaves products out.
pub async fn fetch_purchase_history(
    client: &ToolClient,
    brand: Brand,
    options: &RetrievalOptions,
) -> Result<RetrievalOutcome, RetrievalError> {
    let tool = brand.history_tool();
    let result = client.invoke(tool, Map::new(), options.max_retries).await?;
    let payload = checked_payload(tool, &result)?;

    if let Some(link) = link_required(&payload) {
        tracing::info!(
            event = "purchase_history_link_required",
            brand = %brand,
            link_id = %link.link_id,
        );
        return Ok(RetrievalOutcome::LinkRequired(link));
    }

    let records = normalize::normalize(brand, &payload)?;
    let fetched = records.len();
    let records = match brand.detail_tool() {
        Some(detail) => enrich_with_details(client, brand, detail, records, options).await,
        None => records,
    };
    let records = filter_unique_orders(records);

    tracing::info!(
        event = "purchase_history_ready",
        brand = %brand,
        fetched,
        unique = records.len(),
    );
    Ok(RetrievalOutcome::Ready(records))
}

/// Fetch details for one order. `None` when the tool had nothing to say.
pub async fn fetch_order_detail(
    client: &ToolClient,
    brand: Brand,
    order_id: &str,
    max_retries: u32,
) -> Result<Option<PurchaseHistoryRecord>, RetrievalError> {
    let detail = brand
        .detail_tool()
        .ok_or(RetrievalError::Unsupported(brand))?;
    let mut arguments = Map::new();
    arguments.insert(
        detail.id_argument.to_string(),
        Value::String(order_id.to_string()),
    );

    let result = client.invoke(detail.name, arguments, max_retries).await?;
    let payload = checked_payload(detail.name, &result)?;
    let mut record = normalize::normalize_detail(brand, &payload)?;
    if let Some(record) = record.as_mut() {
        if record.order_id.is_empty() {
            record.order_id = order_id.to_string();
        }
    }
    Ok(record)
}

/// One poll round-trip for a hosted link.
pub async fn poll_signin(
    client: &ToolClient,
    link_id: &str,
    max_retries: u32,
) -> Result<LinkStatus, RetrievalError> {
    let mut arguments = Map::new();
    arguments.insert("link_id".to_string(), Value::String(link_id.to_string()));
    let result = client.invoke(POLL_TOOL, arguments, max_retries).await?;
    let payload = checked_payload(POLL_TOOL, &result)?;
    Ok(LinkStatus::from_payload(&payload))
}

/// A payload asks for linking when it names a link and carries no records.
fn link_required(payload: &Value) -> Option<HostedLink> {
    let link = HostedLink::from_payload(payload)?;
    let has_records = matches!(
        normalize::decode_content(payload),
        Ok(DecodedContent::Records { .. })
    );
    (!has_records).then_some(link)
}

fn checked_payload(tool: &str, result: &ToolCallResult) -> Result<Value, RetrievalError> {
    if result.is_error {
        let message = result.first_text().unwrap_or_default().to_string();
        tracing::warn!(event = "tool_reported_error", tool = %tool, message = %message);
        return Err(RetrievalError::ToolReported {
            tool: tool.to_string(),
            message,
        });
    }
    Ok(result.payload())
}

/// Scatter detail calls with bounded concurrency. Output order matches
/// input order; an order whose detail call fails keeps its listing data.
async fn enrich_with_details(
    client: &ToolClient,
    brand: Brand,
    detail: DetailTool,
    records: Vec<PurchaseHistoryRecord>,
    options: &RetrievalOptions,
) -> Vec<PurchaseHistoryRecord> {
    let max_retries = options.max_retries;
    stream::iter(records.into_iter().map(|record| async move {
        if record.order_id.is_empty() {
            return record;
        }
        match fetch_order_detail(client, brand, &record.order_id, max_retries).await {
            Ok(Some(details)) => merge_details(record, details),
            Ok(None) => record,
            Err(err) => {
                tracing::warn!(
                    event = "order_detail_failed",
                    brand = %brand,
                    tool = %detail.name,
                    order_id = %record.order_id,
                    error = %err,
                );
                record
            }
        }
    }))
    .buffered(options.detail_concurrency.max(1))
    .collect()
    .await
}

fn merge_details(
    mut record: PurchaseHistoryRecord,
    details: PurchaseHistoryRecord,
) -> PurchaseHistoryRecord {
    if !details.product_names.is_empty() {
        record.product_names = details.product_names;
    }
    if !details.image_urls.is_empty() {
        record.image_urls = details.image_urls;
    }
    if record.order_total.is_empty() {
        record.order_total = details.order_total;
    }
    if record.order_date.is_none() {
        record.order_date = details.order_date;
    }
    record
}

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::brands::Brand;

/// Canonical purchase-history entry, independent of the upstream tool shape.
///
/// `product_names` and `image_urls` are not index-aligned: upstream tools
/// routinely return fewer images than products (or none at all).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PurchaseHistoryRecord {
    /// Brand identifier (e.g. "amazon")
    pub brand_id: String,
    /// Brand display name (e.g. "Amazon")
    pub brand: String,
    #[serde(default)]
    pub order_date: Option<NaiveDate>,
    /// Currency-formatted total exactly as upstream reported it
    #[serde(default)]
    pub order_total: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub product_names: Vec<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

impl PurchaseHistoryRecord {
    pub fn empty(brand: Brand) -> Self {
        Self {
            brand_id: brand.id().to_string(),
            brand: brand.display_name().to_string(),
            order_date: None,
            order_total: String::new(),
            order_id: String::new(),
            product_names: Vec::new(),
            image_urls: Vec::new(),
        }
    }

    /// Identity used for deduplication: `(brand, order_id, first product name)`.
    ///
    /// Two distinct purchases in the same order whose listings start with the
    /// same product collapse into one.
    pub fn dedup_key(&self) -> (&str, &str, Option<&str>) {
        (
            self.brand.as_str(),
            self.order_id.as_str(),
            self.product_names.first().map(String::as_str),
        )
    }
}

/// Keep the first record for each dedup key, preserving input order.
pub fn filter_unique_orders<I>(records: I) -> Vec<PurchaseHistoryRecord>
where
    I: IntoIterator<Item = PurchaseHistoryRecord>,
{
    let mut seen: HashSet<(String, String, Option<String>)> = HashSet::new();
    records
        .into_iter()
        .filter(|record| {
            let (brand, order_id, first) = record.dedup_key();
            seen.insert((brand.to_string(), order_id.to_string(), first.map(str::to_string)))
        })
        .collect()
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Retail and library accounts that can be linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Amazon,
    Wayfair,
    OfficeDepot,
    Goodreads,
}

/// Per-order follow-up tool for brands whose history listing omits products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailTool {
    pub name: &'static str,
    /// Argument name the tool expects for the order identifier.
    pub id_argument: &'static str,
}

/// Field names tried, in order, when mapping an upstream record.
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub order_id: &'static [&'static str],
    pub order_date: &'static [&'static str],
    pub order_total: &'static [&'static str],
    pub product_names: &'static [&'static str],
    pub image_urls: &'static [&'static str],
}

const DEFAULT_ALIASES: FieldAliases = FieldAliases {
    order_id: &["order_id", "order_number", "orderId", "id"],
    order_date: &["order_date", "orderDate", "date", "order_placed_date"],
    order_total: &["order_total", "orderTotal", "total", "grand_total", "price"],
    product_names: &["product_names", "products", "items", "product_name", "name", "title"],
    image_urls: &["image_urls", "images", "image_url", "image", "thumbnail"],
};

const WAYFAIR_ALIASES: FieldAliases = FieldAliases {
    order_id: &["order_number", "order_id", "orderNumber", "id"],
    ..DEFAULT_ALIASES
};

const OFFICE_DEPOT_ALIASES: FieldAliases = FieldAliases {
    order_id: &["order_number", "order_id", "orderNumber", "id"],
    order_date: &["order_date", "date_ordered", "orderDate", "date"],
    ..DEFAULT_ALIASES
};

const GOODREADS_ALIASES: FieldAliases = FieldAliases {
    order_id: &["book_id", "id", "isbn", "order_id"],
    order_date: &["date_read", "date_added", "read_at", "order_date"],
    order_total: &["order_total", "price"],
    product_names: &["title", "book_title", "product_names", "name"],
    image_urls: &["cover", "cover_image_url", "image_url", "image_urls", "images"],
};

impl Brand {
    pub const ALL: [Brand; 4] = [
        Brand::Amazon,
        Brand::Wayfair,
        Brand::OfficeDepot,
        Brand::Goodreads,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Brand::Amazon => "amazon",
            Brand::Wayfair => "wayfair",
            Brand::OfficeDepot => "officedepot",
            Brand::Goodreads => "goodreads",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Brand::Amazon => "Amazon",
            Brand::Wayfair => "Wayfair",
            Brand::OfficeDepot => "Office Depot",
            Brand::Goodreads => "Goodreads",
        }
    }

    /// Remote tool that returns this brand's purchase (or reading) history.
    pub fn history_tool(self) -> &'static str {
        match self {
            Brand::Amazon => "amazon_get_purchase_history",
            Brand::Wayfair => "wayfair_get_order_history",
            Brand::OfficeDepot => "officedepot_get_order_history",
            Brand::Goodreads => "goodreads_get_book_list",
        }
    }

    pub fn detail_tool(self) -> Option<DetailTool> {
        match self {
            Brand::Wayfair => Some(DetailTool {
                name: "wayfair_get_order_history_details",
                id_argument: "order_number",
            }),
            _ => None,
        }
    }

    pub fn field_aliases(self) -> &'static FieldAliases {
        match self {
            Brand::Amazon => &DEFAULT_ALIASES,
            Brand::Wayfair => &WAYFAIR_ALIASES,
            Brand::OfficeDepot => &OFFICE_DEPOT_ALIASES,
            Brand::Goodreads => &GOODREADS_ALIASES,
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown brand `{0}`; expected one of amazon, wayfair, officedepot, goodreads")]
pub struct UnknownBrand(pub String);

impl FromStr for Brand {
    type Err = UnknownBrand;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "amazon" => Ok(Brand::Amazon),
            "wayfair" => Ok(Brand::Wayfair),
            "officedepot" => Ok(Brand::OfficeDepot),
            "goodreads" => Ok(Brand::Goodreads),
            _ => Err(UnknownBrand(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_brand_ids_case_and_separator_insensitively() {
        assert_eq!("amazon".parse::<Brand>().unwrap(), Brand::Amazon);
        assert_eq!("WAYFAIR".parse::<Brand>().unwrap(), Brand::Wayfair);
        assert_eq!("office_depot".parse::<Brand>().unwrap(), Brand::OfficeDepot);
        assert_eq!("Office-Depot".parse::<Brand>().unwrap(), Brand::OfficeDepot);
        assert_eq!(" goodreads ".parse::<Brand>().unwrap(), Brand::Goodreads);
    }

    #[test]
    fn rejects_unknown_brand() {
        let err = "target".parse::<Brand>().expect_err("target is not linked");
        assert_eq!(err, UnknownBrand("target".to_string()));
    }

    #[test]
    fn id_round_trips_through_from_str() {
        for brand in Brand::ALL {
            assert_eq!(brand.id().parse::<Brand>().unwrap(), brand);
        }
    }

    #[test]
    fn only_wayfair_needs_per_order_details() {
        let detail = Brand::Wayfair.detail_tool().expect("wayfair has a detail tool");
        assert_eq!(detail.name, "wayfair_get_order_history_details");
        assert_eq!(detail.id_argument, "order_number");
        assert!(Brand::Amazon.detail_tool().is_none());
        assert!(Brand::Goodreads.detail_tool().is_none());
    }

    #[test]
    fn wayfair_prefers_order_number_over_order_id() {
        assert_eq!(Brand::Wayfair.field_aliases().order_id[0], "order_number");
        assert_eq!(Brand::Amazon.field_aliases().order_id[0], "order_id");
    }
}

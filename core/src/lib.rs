pub mod brands;
pub mod error;
pub mod normalize;
pub mod purchases;

pub use brands::{Brand, DetailTool, FieldAliases};
pub use normalize::ShapeError;
pub use purchases::PurchaseHistoryRecord;

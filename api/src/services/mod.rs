pub mod analytics;
pub mod geolocation;
pub mod portrait;

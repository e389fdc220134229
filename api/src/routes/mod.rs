pub mod analytics;
pub mod auth_proxy;
pub mod health;
pub mod link;
pub mod portrait;
pub mod proxy;
pub mod purchase_history;

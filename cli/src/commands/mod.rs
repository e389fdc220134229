pub mod connect;
pub mod health;
pub mod history;
pub mod link;

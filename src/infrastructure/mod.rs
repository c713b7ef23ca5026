//! Infrastructure layer
//!
//! Configuration, logging, SQLite persistence, and the Mercado Livre HTTP
//! client. Everything here is driven by the application layer; nothing in
//! this module decides sync policy.

pub mod config;
pub mod logging;
pub mod database_connection;
pub mod account_repository;
pub mod item_repository;
pub mod meli_client;

pub use account_repository::AccountRepository;
pub use config::AppConfig;
pub use database_connection::DatabaseConnection;
pub use item_repository::ItemRepository;
pub use meli_client::{MarketApiError, MarketplaceApi, MeliClient};

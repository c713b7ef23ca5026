//! Meli Mirror - Mercado Livre listing mirror for seller dashboards
//!
//! Mirrors seller listing metadata (price, stock, visits, shipping cost,
//! health score) into a local SQLite store and keeps that mirror fresh by
//! polling the Mercado Livre REST API in bounded, resumable ticks.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the orchestrator entry points for easier access
pub use application::orchestrator::SyncOrchestrator;
pub use application::token_manager::TokenLifecycleManager;

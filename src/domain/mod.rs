//! Domain types for the listing mirror
//!
//! Entities and value types shared across the sync engine: seller accounts,
//! mirrored items, and the progress reports surfaced to the dashboard.

pub mod account;
pub mod item;
pub mod report;

pub use account::{Account, SyncState};
pub use item::{Item, ItemSearchCriteria, ItemSearchResult, SyncFlag};
pub use report::{MirrorStatistics, ProgressReport, TriggerSyncResponse};

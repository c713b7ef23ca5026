//! Mirrored listing row and its enrichment flag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};

/// Tri-state enrichment marker on a mirror row.
///
/// Stored as an INTEGER: 0 = discovered but not yet enriched, 1 = detail
/// fields current, 2 = a bulk action changed marketplace state and the row
/// must be re-pulled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncFlag {
    Pending,
    Synced,
    UpdateRequested,
}

impl SyncFlag {
    pub fn as_i64(self) -> i64 {
        match self {
            SyncFlag::Pending => 0,
            SyncFlag::Synced => 1,
            SyncFlag::UpdateRequested => 2,
        }
    }
}

impl TryFrom<i64> for SyncFlag {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SyncFlag::Pending),
            1 => Ok(SyncFlag::Synced),
            2 => Ok(SyncFlag::UpdateRequested),
            other => Err(format!("Invalid SyncFlag: {other}")),
        }
    }
}

impl Type<sqlx::Sqlite> for SyncFlag {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for SyncFlag {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <i64 as Encode<sqlx::Sqlite>>::encode(self.as_i64(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for SyncFlag {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <i64 as Decode<sqlx::Sqlite>>::decode(value)?;
        SyncFlag::try_from(raw).map_err(Into::into)
    }
}

/// Local cached representation of one marketplace listing.
///
/// `item_id` is the marketplace's immutable listing id and is unique across
/// the whole mirror (the marketplace id space is global, not per-seller).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub account_id: i64,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub currency: String,
    pub original_price: Option<f64>,
    pub status: Option<String>,
    pub permalink: Option<String>,
    pub thumbnail: Option<String>,
    pub secure_thumbnail: Option<String>,
    pub sold_quantity: i64,
    pub available_quantity: i64,
    pub shipping_mode: Option<String>,
    pub logistic_type: Option<String>,
    pub free_shipping: bool,
    /// Marketplace-assigned creation timestamp; first-write-wins once set.
    pub date_created: Option<DateTime<Utc>>,
    pub last_sale_at: Option<DateTime<Utc>>,
    pub visits: i64,
    /// Marketplace-computed listing quality score in [0, 1].
    pub health: Option<f64>,
    pub catalog_listing: bool,
    pub category_name: Option<String>,
    pub freight_sp: Option<f64>,
    pub freight_ne: Option<f64>,
    pub freight_rs: Option<f64>,
    pub billable_weight: Option<f64>,
    pub weight_status: Option<String>,
    pub sync_flag: SyncFlag,
    pub updated_at: DateTime<Utc>,
}

/// Filter criteria for dashboard listing queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemSearchCriteria {
    pub account_id: Option<i64>,
    pub status: Option<String>,
    pub logistic_type: Option<String>,
    /// Keep only items with no sale recorded since this instant.
    pub no_sale_since: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Paginated listing result for the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSearchResult {
    pub items: Vec<Item>,
    pub total_count: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_flag_round_trip() {
        for flag in [SyncFlag::Pending, SyncFlag::Synced, SyncFlag::UpdateRequested] {
            assert_eq!(SyncFlag::try_from(flag.as_i64()).unwrap(), flag);
        }
        assert!(SyncFlag::try_from(3).is_err());
        assert!(SyncFlag::try_from(-1).is_err());
    }
}

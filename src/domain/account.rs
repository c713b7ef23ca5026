//! Seller account entity and the per-account sync state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Decode, Encode, Type};

/// Coarse synchronization state of one connected seller account.
///
/// Transitions are restricted; see [`SyncState::can_transition_to`]. A state
/// never silently reverts to `Idle` - re-entry into the cycle always goes
/// through an explicit `Requested` mark.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Requested,
    Syncing,
    Completed,
    Error,
}

impl SyncState {
    /// Whether moving from `self` to `to` is a legal state machine step.
    pub fn can_transition_to(self, to: SyncState) -> bool {
        use SyncState::{Completed, Error, Idle, Requested, Syncing};
        match (self, to) {
            (_, Error) => true,
            (Idle | Completed | Error, Requested) => true,
            (Requested, Syncing) => true,
            (Syncing, Syncing | Completed) => true,
            _ => false,
        }
    }

    /// True for the "at rest" states a scheduled refresh may pick up from.
    pub fn is_at_rest(self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Completed | SyncState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Idle => "Idle",
            SyncState::Requested => "Requested",
            SyncState::Syncing => "Syncing",
            SyncState::Completed => "Completed",
            SyncState::Error => "Error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Type<sqlx::Sqlite> for SyncState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, sqlx::Sqlite> for SyncState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as Encode<sqlx::Sqlite>>::encode(self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for SyncState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as Decode<sqlx::Sqlite>>::decode(value)?;
        match s.as_str() {
            "Idle" => Ok(SyncState::Idle),
            "Requested" => Ok(SyncState::Requested),
            "Syncing" => Ok(SyncState::Syncing),
            "Completed" => Ok(SyncState::Completed),
            "Error" => Ok(SyncState::Error),
            _ => Err(format!("Invalid SyncState: {s}").into()),
        }
    }
}

/// One connected seller credential (tenant) and its sync checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    /// Marketplace-assigned seller id, globally unique.
    pub seller_id: String,
    pub nickname: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub sync_state: SyncState,
    /// Opaque scroll cursor; only meaningful while discovery is active.
    pub sync_cursor: Option<String>,
    pub sync_last_message: Option<String>,
    pub sync_last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Whether the access token expires within `buffer` from now.
    pub fn token_expires_within(&self, buffer: Duration) -> bool {
        Utc::now() >= self.token_expires_at - buffer
    }
}

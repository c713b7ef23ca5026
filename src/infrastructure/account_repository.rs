//! Repository for seller accounts, sync checkpoints, and the tick lock
//!
//! Owns everything the orchestrator persists between ticks: token pairs,
//! the resumable discovery cursor, the coarse sync state (with transition
//! legality enforced here, at the single write point), and the advisory
//! lock that serializes ticks across worker processes.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::account::{Account, SyncState};
use crate::infrastructure::meli_client::{AuthorizedSeller, TokenPair};

#[derive(Clone)]
pub struct AccountRepository {
    pool: Arc<SqlitePool>,
}

impl AccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    // ===============================
    // ACCOUNT LIFECYCLE
    // ===============================

    /// Insert or refresh an account from a completed OAuth handshake.
    ///
    /// Keyed by the marketplace seller id; re-linking an existing seller
    /// replaces its token pair but keeps sync state and cursor untouched.
    pub async fn upsert_from_oauth(&self, seller: &AuthorizedSeller) -> Result<Account> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(seller.tokens.expires_in_seconds);

        sqlx::query(
            r#"
            INSERT INTO accounts
            (seller_id, nickname, access_token, refresh_token, token_expires_at,
             sync_state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'Idle', ?, ?)
            ON CONFLICT(seller_id) DO UPDATE SET
                nickname = COALESCE(excluded.nickname, accounts.nickname),
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&seller.seller_id)
        .bind(&seller.nickname)
        .bind(&seller.tokens.access_token)
        .bind(&seller.tokens.refresh_token)
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        let account = self
            .get_by_seller_id(&seller.seller_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("account vanished after upsert: {}", seller.seller_id))?;

        info!("🔗 Linked seller {} (account #{})", seller.seller_id, account.id);
        Ok(account)
    }

    pub async fn get(&self, account_id: i64) -> Result<Option<Account>> {
        let row = sqlx::query(ACCOUNT_COLUMNS_WHERE_ID)
            .bind(account_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(map_account))
    }

    pub async fn get_by_seller_id(&self, seller_id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, seller_id, nickname, access_token, refresh_token, token_expires_at, \
             sync_state, sync_cursor, sync_last_message, sync_last_run_at, created_at, updated_at \
             FROM accounts WHERE seller_id = ?",
        )
        .bind(seller_id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.map(map_account))
    }

    pub async fn list(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, seller_id, nickname, access_token, refresh_token, token_expires_at, \
             sync_state, sync_cursor, sync_last_message, sync_last_run_at, created_at, updated_at \
             FROM accounts ORDER BY id",
        )
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows.into_iter().map(map_account).collect())
    }

    /// Remove an account. Cascades to every mirrored item; irreversible.
    pub async fn delete(&self, account_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(&*self.pool)
            .await?;
        info!("🗑️ Removed account #{} and its mirror rows", account_id);
        Ok(())
    }

    // ===============================
    // TOKEN PERSISTENCE
    // ===============================

    /// Persist a rotated token pair in one statement.
    ///
    /// Called directly after the refresh HTTP call returns; the old refresh
    /// token is already invalid on the marketplace side at that point.
    pub async fn store_tokens(
        &self,
        account_id: i64,
        tokens: &TokenPair,
    ) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(tokens.expires_in_seconds);

        sqlx::query(
            "UPDATE accounts SET access_token = ?, refresh_token = ?, token_expires_at = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(expires_at)
        .bind(now)
        .bind(account_id)
        .execute(&*self.pool)
        .await?;

        Ok(expires_at)
    }

    // ===============================
    // CURSOR & STATE CHECKPOINTS
    // ===============================

    pub async fn get_cursor(&self, account_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT sync_cursor FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("sync_cursor"))
    }

    pub async fn set_cursor(&self, account_id: i64, cursor: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE accounts SET sync_cursor = ?, updated_at = ? WHERE id = ?")
            .bind(cursor)
            .bind(Utc::now())
            .bind(account_id)
            .execute(&*self.pool)
            .await?;
        debug!("💾 Cursor checkpoint for account #{}: {}", account_id, cursor.unwrap_or("-"));
        Ok(())
    }

    pub async fn get_state(&self, account_id: i64) -> Result<SyncState> {
        let row = sqlx::query("SELECT sync_state FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("sync_state"))
    }

    /// Move an account to a new sync state, enforcing transition legality.
    pub async fn set_state(
        &self,
        account_id: i64,
        to: SyncState,
        message: Option<&str>,
    ) -> Result<()> {
        let from = self.get_state(account_id).await?;
        if from != to && !from.can_transition_to(to) {
            bail!("illegal sync state transition {from} -> {to} for account #{account_id}");
        }

        sqlx::query(
            "UPDATE accounts SET sync_state = ?, sync_last_message = COALESCE(?, sync_last_message), \
             updated_at = ? WHERE id = ?",
        )
        .bind(to)
        .bind(message)
        .bind(Utc::now())
        .bind(account_id)
        .execute(&*self.pool)
        .await?;

        debug!("🔀 Account #{} sync state {} -> {}", account_id, from, to);
        Ok(())
    }

    /// Mark a sync as requested if the account is at rest; no-op otherwise.
    pub async fn request_sync(&self, account_id: i64) -> Result<bool> {
        let state = self.get_state(account_id).await?;
        if !state.is_at_rest() {
            return Ok(false);
        }
        self.set_state(account_id, SyncState::Requested, Some("sync requested")).await?;
        Ok(true)
    }

    pub async fn touch_last_run(&self, account_id: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET sync_last_run_at = ?, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(Utc::now())
            .bind(account_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    /// Pick the account this tick should work on.
    ///
    /// Priority: `Requested` before `Syncing` before at-rest accounts whose
    /// last run is older than `resync_cutoff` (never-run accounts first).
    /// This yields round-robin-ish fairness across tenants with one worker.
    pub async fn select_tick_candidate(
        &self,
        resync_cutoff: DateTime<Utc>,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, seller_id, nickname, access_token, refresh_token, token_expires_at, \
             sync_state, sync_cursor, sync_last_message, sync_last_run_at, created_at, updated_at \
             FROM accounts WHERE sync_state IN ('Requested', 'Syncing') \
             ORDER BY CASE sync_state WHEN 'Requested' THEN 0 ELSE 1 END, id LIMIT 1",
        )
        .fetch_optional(&*self.pool)
        .await?;
        if let Some(row) = row {
            return Ok(Some(map_account(row)));
        }

        // At-rest accounts, oldest run first; cutoff compared in-process so
        // the stored text format never matters
        let row = sqlx::query(
            "SELECT id, seller_id, nickname, access_token, refresh_token, token_expires_at, \
             sync_state, sync_cursor, sync_last_message, sync_last_run_at, created_at, updated_at \
             FROM accounts \
             ORDER BY sync_last_run_at IS NOT NULL, sync_last_run_at ASC, id LIMIT 1",
        )
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(map_account).filter(|account| {
            account.sync_last_run_at.is_none_or(|last_run| last_run <= resync_cutoff)
        }))
    }

    // ===============================
    // ADVISORY TICK LOCK
    // ===============================

    /// Try to claim the single tick lock for `ttl`.
    ///
    /// Succeeds when the lock row is absent or its lease has expired.
    /// Returns false on contention; the caller must treat that as a silent
    /// no-op, not an error.
    pub async fn try_acquire_tick_lock(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::from_std(ttl)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_lock (id, holder, expires_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE sync_lock.expires_at <= ?
            "#,
        )
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the tick lock if still held by `holder`.
    pub async fn release_tick_lock(&self, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_lock WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }
}

const ACCOUNT_COLUMNS_WHERE_ID: &str =
    "SELECT id, seller_id, nickname, access_token, refresh_token, token_expires_at, \
     sync_state, sync_cursor, sync_last_message, sync_last_run_at, created_at, updated_at \
     FROM accounts WHERE id = ?";

fn map_account(row: sqlx::sqlite::SqliteRow) -> Account {
    Account {
        id: row.get("id"),
        seller_id: row.get("seller_id"),
        nickname: row.get("nickname"),
        access_token: row.get("access_token"),
        refresh_token: row.get("refresh_token"),
        token_expires_at: row.get("token_expires_at"),
        sync_state: row.get("sync_state"),
        sync_cursor: row.get("sync_cursor"),
        sync_last_message: row.get("sync_last_message"),
        sync_last_run_at: row.get("sync_last_run_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

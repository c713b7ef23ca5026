//! Sync orchestrator
//!
//! Drives one bounded tick of mirror reconciliation for the single account
//! with the highest claim on work: refresh the token if needed, advance the
//! discovery cursor or drain a slice of the pending-detail queue, persist a
//! checkpoint after every externally visible step, and hand back a progress
//! report. The caller (scheduler or dashboard button) re-invokes until the
//! report says `completed`.
//!
//! The wall-clock budget is checked at the top of each loop iteration, never
//! mid-call; an in-flight request is always allowed to finish.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::token_manager::TokenLifecycleManager;
use crate::domain::account::{Account, SyncState};
use crate::domain::report::{ProgressReport, TriggerSyncResponse};
use crate::infrastructure::account_repository::AccountRepository;
use crate::infrastructure::config::SyncConfig;
use crate::infrastructure::item_repository::ItemRepository;
use crate::infrastructure::meli_client::{MarketApiError, MarketplaceApi};

/// Failures that abort a tick. Everything else degrades to a skipped item,
/// a restarted discovery, or a resumable early return.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<anyhow::Error> for TickError {
    fn from(e: anyhow::Error) -> Self {
        TickError::Persistence(e.to_string())
    }
}

/// Wall-clock budget for one tick.
struct TickBudget {
    started: Instant,
    limit: Duration,
}

impl TickBudget {
    fn new(limit: Duration) -> Self {
        Self { started: Instant::now(), limit }
    }

    fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.limit
    }
}

pub struct SyncOrchestrator {
    accounts: AccountRepository,
    items: ItemRepository,
    client: Arc<dyn MarketplaceApi>,
    tokens: TokenLifecycleManager,
    config: SyncConfig,
}

impl SyncOrchestrator {
    pub fn new(pool: sqlx::SqlitePool, client: Arc<dyn MarketplaceApi>, config: SyncConfig) -> Self {
        let accounts = AccountRepository::new(pool.clone());
        let items = ItemRepository::new(pool);
        let tokens = TokenLifecycleManager::new(
            client.clone(),
            accounts.clone(),
            config.token_refresh_buffer_seconds,
        );
        Self { accounts, items, client, tokens, config }
    }

    pub fn accounts(&self) -> &AccountRepository {
        &self.accounts
    }

    pub fn items(&self) -> &ItemRepository {
        &self.items
    }

    /// Dashboard entry point. Safe to call repeatedly: a tick already in
    /// flight turns this into a no-op, and a failed tick still yields a
    /// well-formed response instead of an error.
    pub async fn trigger_sync(&self) -> TriggerSyncResponse {
        let budget = Duration::from_secs(self.config.tick_budget_seconds);
        match self.run_tick(budget).await {
            Ok(report) => TriggerSyncResponse::from_report(report),
            Err(e) => {
                warn!("❌ Tick failed: {e}");
                TriggerSyncResponse::failure(e.to_string())
            }
        }
    }

    /// Mark an account for sync on its owner's request. The account id comes
    /// from the caller's own session handling; nothing here is ambient.
    pub async fn request_sync(&self, account_id: i64) -> Result<bool, TickError> {
        Ok(self.accounts.request_sync(account_id).await?)
    }

    /// Run one bounded tick of sync work.
    pub async fn run_tick(&self, budget: Duration) -> Result<ProgressReport, TickError> {
        let tick_id = Uuid::new_v4().to_string();
        let ttl = budget + Duration::from_secs(self.config.lock_ttl_margin_seconds);

        if !self.accounts.try_acquire_tick_lock(&tick_id, ttl).await? {
            debug!("⏭️ Tick lock held elsewhere; exiting as no-op");
            return Ok(ProgressReport::noop("another sync tick is already running"));
        }

        // Guaranteed release on success and on every error path below
        let result = self.tick_inner(&tick_id, TickBudget::new(budget)).await;
        if let Err(e) = self.accounts.release_tick_lock(&tick_id).await {
            warn!("Failed to release tick lock {tick_id}: {e}");
        }
        result
    }

    async fn tick_inner(
        &self,
        tick_id: &str,
        budget: TickBudget,
    ) -> Result<ProgressReport, TickError> {
        if budget.exhausted() {
            return Ok(ProgressReport::noop("time budget exhausted before any work"));
        }

        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.auto_resync_after_seconds);
        let Some(mut account) = self.accounts.select_tick_candidate(cutoff).await? else {
            return Ok(ProgressReport::done("no accounts due for sync"));
        };

        info!(
            "🚀 Tick {} -> account #{} (seller {}), state {}",
            tick_id, account.id, account.seller_id, account.sync_state
        );

        // A scheduled refresh enters the cycle through an explicit request,
        // the same doorway the dashboard uses
        if account.sync_state.is_at_rest() {
            self.accounts
                .set_state(account.id, SyncState::Requested, Some("scheduled refresh"))
                .await?;
            account.sync_state = SyncState::Requested;
        }

        let token = match self.tokens.ensure_fresh_token(&mut account).await {
            Ok(token) => token,
            Err(e) => {
                let message = e.to_string();
                self.accounts.set_state(account.id, SyncState::Error, Some(&message)).await?;
                self.accounts.touch_last_run(account.id).await?;
                return Err(TickError::Auth(message));
            }
        };

        let mut in_discovery = account.sync_cursor.is_some();
        if account.sync_state == SyncState::Requested {
            self.accounts.set_cursor(account.id, None).await?;
            account.sync_cursor = None;
            self.accounts
                .set_state(account.id, SyncState::Syncing, Some("discovery started"))
                .await?;
            account.sync_state = SyncState::Syncing;
            in_discovery = true;
        }

        if in_discovery {
            if let Some(report) = self.run_discovery(&mut account, &token, &budget).await? {
                return Ok(report);
            }
        }

        self.run_detail_phase(&account, &token, &budget).await
    }

    /// Discovery sub-phase: walk scan pages and insert bare mirror rows,
    /// checkpointing the cursor after every page. Returns a report when the
    /// tick must stop early; `None` means discovery finished with budget to
    /// spare.
    async fn run_discovery(
        &self,
        account: &mut Account,
        token: &str,
        budget: &TickBudget,
    ) -> Result<Option<ProgressReport>, TickError> {
        let mut pages = 0u32;
        let mut discovered_new = 0u64;

        loop {
            if budget.exhausted() {
                let message =
                    format!("discovery paused after {pages} pages ({discovered_new} new items)");
                self.checkpoint_pause(account, &message).await?;
                return Ok(Some(self.progress(account, false, message).await?));
            }
            if pages >= self.config.max_pages_per_tick {
                let message = format!(
                    "discovery yielded after {pages} pages this tick ({discovered_new} new items)"
                );
                self.checkpoint_pause(account, &message).await?;
                return Ok(Some(self.progress(account, false, message).await?));
            }

            match self
                .client
                .scan_catalog(&account.seller_id, token, account.sync_cursor.as_deref())
                .await
            {
                Ok(page) => {
                    pages += 1;
                    if page.item_ids.is_empty() {
                        self.accounts.set_cursor(account.id, None).await?;
                        account.sync_cursor = None;
                        info!(
                            "📋 Discovery complete for account #{}: {} new items in {} pages",
                            account.id, discovered_new, pages
                        );
                        return Ok(None);
                    }

                    discovered_new +=
                        self.items.discover_items(account.id, &page.item_ids).await?;
                    self.accounts.set_cursor(account.id, page.next_cursor.as_deref()).await?;
                    account.sync_cursor = page.next_cursor;

                    if account.sync_cursor.is_none() {
                        // End-of-catalog signalled by a missing cursor
                        info!(
                            "📋 Discovery complete for account #{}: {} new items in {} pages",
                            account.id, discovered_new, pages
                        );
                        return Ok(None);
                    }
                }
                Err(MarketApiError::Auth(message)) => {
                    return Err(self.fail_account(account, &message).await?);
                }
                Err(MarketApiError::CursorExpired) => {
                    pages += 1;
                    warn!(
                        "🔁 Scan cursor expired for account #{}; restarting discovery",
                        account.id
                    );
                    self.accounts.set_cursor(account.id, None).await?;
                    account.sync_cursor = None;
                }
                Err(e) => {
                    // Discovery-level application failures behave like an
                    // expired cursor: restart the scan rather than abort
                    pages += 1;
                    warn!(
                        "🔁 Discovery error for account #{}; restarting scan: {e}",
                        account.id
                    );
                    self.accounts.set_cursor(account.id, None).await?;
                    account.sync_cursor = None;
                }
            }
        }
    }

    /// Detail sub-phase: drain slices of the pending queue within budget.
    async fn run_detail_phase(
        &self,
        account: &Account,
        token: &str,
        budget: &TickBudget,
    ) -> Result<ProgressReport, TickError> {
        let mut batches = 0u32;
        let mut enriched = 0u64;

        loop {
            if budget.exhausted() {
                let message = format!("detail sync paused after {enriched} items");
                self.checkpoint_pause(account, &message).await?;
                return self.progress(account, false, message).await;
            }
            if batches >= self.config.max_detail_batches_per_tick {
                let message =
                    format!("detail sync yielded after {batches} batches ({enriched} items)");
                self.checkpoint_pause(account, &message).await?;
                return self.progress(account, false, message).await;
            }

            let pending =
                self.items.pending_batch(account.id, i64::from(self.config.detail_batch_size)).await?;
            if pending.is_empty() {
                self.accounts
                    .set_state(account.id, SyncState::Completed, Some("mirror up to date"))
                    .await?;
                self.accounts.touch_last_run(account.id).await?;
                info!("✅ Account #{} sync completed ({} items this tick)", account.id, enriched);
                return self.progress(account, true, "sync completed".to_string()).await;
            }

            batches += 1;
            let entries = match self.client.fetch_details(&pending, token).await {
                Ok(entries) => entries,
                Err(MarketApiError::Auth(message)) => {
                    return Err(self.fail_account(account, &message).await?);
                }
                Err(e) => {
                    // Whole-batch failure: items stay pending for the next tick
                    let message = format!("detail batch failed: {e}");
                    warn!("⚠️ {message}");
                    self.checkpoint_pause(account, &message).await?;
                    return self.progress(account, false, message).await;
                }
            };

            for entry in entries {
                if !entry.is_usable() {
                    debug!("⏳ Detail entry returned code {}; left pending", entry.code);
                    continue;
                }
                let payload = entry.body;
                let Some(item_id) = payload["id"].as_str().map(str::to_string) else {
                    warn!("🚫 Detail payload missing item id; skipped");
                    continue;
                };

                let (date_from, date_to) = self.visits_window();
                let visits = self.client.fetch_visits(&item_id, token, date_from, date_to).await;

                // Orders are only consulted once something actually sold
                let sold_quantity = payload["sold_quantity"].as_i64().unwrap_or(0);
                let last_sale_at = if sold_quantity > 0 {
                    match self
                        .client
                        .fetch_last_sale_date(&account.seller_id, &item_id, token)
                        .await
                    {
                        Ok(last_sale) => last_sale,
                        Err(MarketApiError::Auth(message)) => {
                            return Err(self.fail_account(account, &message).await?);
                        }
                        Err(e) => {
                            warn!("⏳ Order lookup failed for {item_id}; left pending: {e}");
                            continue;
                        }
                    }
                } else {
                    None
                };

                match self.items.upsert_detail(account.id, &payload, visits, last_sale_at).await {
                    Ok(()) => enriched += 1,
                    Err(e) => {
                        // Fatal for this item only; the batch moves on
                        warn!("🚫 Mirror write failed for {item_id}: {e}");
                    }
                }
            }
        }
    }

    /// Persist a Syncing checkpoint message and the last-run stamp before a
    /// resumable early return.
    async fn checkpoint_pause(&self, account: &Account, message: &str) -> Result<(), TickError> {
        self.accounts.set_state(account.id, SyncState::Syncing, Some(message)).await?;
        self.accounts.touch_last_run(account.id).await?;
        Ok(())
    }

    /// Move the account to Error with a message; returns the matching
    /// `TickError` for the caller to escalate.
    async fn fail_account(&self, account: &Account, message: &str) -> Result<TickError, TickError> {
        self.accounts.set_state(account.id, SyncState::Error, Some(message)).await?;
        self.accounts.touch_last_run(account.id).await?;
        Ok(TickError::Auth(message.to_string()))
    }

    async fn progress(
        &self,
        account: &Account,
        completed: bool,
        message: String,
    ) -> Result<ProgressReport, TickError> {
        let total = self.items.count_total(account.id).await?.max(0) as u64;
        let processed = self.items.count_synced(account.id).await?.max(0) as u64;
        Ok(ProgressReport { processed, total, completed, message })
    }

    fn visits_window(&self) -> (NaiveDate, NaiveDate) {
        let today = Utc::now().date_naive();
        (today - ChronoDuration::days(self.config.visits_window_days), today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let budget = TickBudget::new(Duration::ZERO);
        assert!(budget.exhausted());
    }

    #[test]
    fn generous_budget_is_not_exhausted() {
        let budget = TickBudget::new(Duration::from_secs(30));
        assert!(!budget.exhausted());
    }
}

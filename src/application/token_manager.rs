//! Access token lifecycle
//!
//! Guarantees the orchestrator always holds a token valid for at least the
//! configured safety buffer. Refresh tokens rotate: the marketplace
//! invalidates the old one the moment a refresh succeeds, so the rotated
//! pair is persisted immediately after the HTTP call returns, before any
//! further processing touches it.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::account::Account;
use crate::infrastructure::account_repository::AccountRepository;
use crate::infrastructure::meli_client::MarketplaceApi;

#[derive(Debug, Error)]
pub enum TokenError {
    /// The marketplace rejected the refresh; the tick must not proceed.
    #[error("token refresh failed: {0}")]
    Auth(String),

    /// The rotated pair could not be written; manual re-auth may be needed.
    #[error("token persistence failed: {0}")]
    Persistence(String),
}

pub struct TokenLifecycleManager {
    client: Arc<dyn MarketplaceApi>,
    accounts: AccountRepository,
    refresh_buffer: ChronoDuration,
}

impl TokenLifecycleManager {
    pub fn new(
        client: Arc<dyn MarketplaceApi>,
        accounts: AccountRepository,
        refresh_buffer_seconds: i64,
    ) -> Self {
        Self { client, accounts, refresh_buffer: ChronoDuration::seconds(refresh_buffer_seconds) }
    }

    /// Return an access token valid for at least the refresh buffer,
    /// rotating and persisting the pair when the current one is close to
    /// expiry. Updates `account` in place to match what was persisted.
    pub async fn ensure_fresh_token(&self, account: &mut Account) -> Result<String, TokenError> {
        if !account.token_expires_within(self.refresh_buffer) {
            debug!("🔑 Token for seller {} still fresh", account.seller_id);
            return Ok(account.access_token.clone());
        }

        info!(
            "🔑 Refreshing token for seller {} (expires {})",
            account.seller_id, account.token_expires_at
        );
        let pair = self
            .client
            .refresh_token(&account.refresh_token)
            .await
            .map_err(|e| TokenError::Auth(e.to_string()))?;

        // Persist first: the old refresh token is already dead marketplace-side
        let expires_at = self
            .accounts
            .store_tokens(account.id, &pair)
            .await
            .map_err(|e| TokenError::Persistence(e.to_string()))?;

        account.access_token = pair.access_token.clone();
        account.refresh_token = pair.refresh_token;
        account.token_expires_at = expires_at;

        Ok(pair.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::meli_client::{
        AuthorizedSeller, DetailEntry, MarketApiError, ScanPage, StatusChange, TokenPair,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::{tempdir, TempDir};

    /// Stub marketplace that only answers token refreshes.
    #[derive(Default)]
    struct RefreshOnlyStub {
        refresh_calls: AtomicU32,
        fail_refresh: bool,
    }

    #[async_trait]
    impl MarketplaceApi for RefreshOnlyStub {
        async fn scan_catalog(
            &self,
            _seller_id: &str,
            _token: &str,
            _cursor: Option<&str>,
        ) -> Result<ScanPage, MarketApiError> {
            unreachable!("scan_catalog not expected in token tests")
        }

        async fn fetch_details(
            &self,
            _item_ids: &[String],
            _token: &str,
        ) -> Result<Vec<DetailEntry>, MarketApiError> {
            unreachable!("fetch_details not expected in token tests")
        }

        async fn fetch_visits(
            &self,
            _item_id: &str,
            _token: &str,
            _date_from: NaiveDate,
            _date_to: NaiveDate,
        ) -> i64 {
            0
        }

        async fn fetch_last_sale_date(
            &self,
            _seller_id: &str,
            _item_id: &str,
            _token: &str,
        ) -> Result<Option<DateTime<Utc>>, MarketApiError> {
            Ok(None)
        }

        async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, MarketApiError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(MarketApiError::Auth("invalid_grant".to_string()));
            }
            assert_eq!(refresh_token, "TG-old");
            Ok(TokenPair {
                access_token: "APP_USR-new".to_string(),
                refresh_token: "TG-new".to_string(),
                expires_in_seconds: 21_600,
            })
        }

        async fn exchange_code(&self, _code: &str) -> Result<AuthorizedSeller, MarketApiError> {
            unreachable!("exchange_code not expected in token tests")
        }

        async fn set_item_status(
            &self,
            _item_id: &str,
            _status: &str,
            _token: &str,
        ) -> Result<StatusChange, MarketApiError> {
            unreachable!("set_item_status not expected in token tests")
        }
    }

    async fn setup(
        stub: RefreshOnlyStub,
        expires_in_seconds: i64,
    ) -> (TokenLifecycleManager, AccountRepository, Account, TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("tokens.db").display());
        let db = DatabaseConnection::new(&url).await.unwrap();
        db.migrate().await.unwrap();
        let accounts = AccountRepository::new(db.pool().clone());

        let account = accounts
            .upsert_from_oauth(&AuthorizedSeller {
                seller_id: "123456".to_string(),
                nickname: None,
                tokens: TokenPair {
                    access_token: "APP_USR-old".to_string(),
                    refresh_token: "TG-old".to_string(),
                    expires_in_seconds,
                },
            })
            .await
            .unwrap();

        let manager = TokenLifecycleManager::new(Arc::new(stub), accounts.clone(), 600);
        (manager, accounts, account, dir)
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let (manager, _accounts, mut account, _dir) = setup(RefreshOnlyStub::default(), 7200).await;

        let token = manager.ensure_fresh_token(&mut account).await.unwrap();
        assert_eq!(token, "APP_USR-old");
        assert_eq!(account.refresh_token, "TG-old");
    }

    #[tokio::test]
    async fn expiring_token_is_rotated_and_persisted() {
        let (manager, accounts, mut account, _dir) = setup(RefreshOnlyStub::default(), 30).await;

        let token = manager.ensure_fresh_token(&mut account).await.unwrap();
        assert_eq!(token, "APP_USR-new");
        assert_eq!(account.refresh_token, "TG-new");

        // The rotated pair is on disk, not just in the struct
        let stored = accounts.get(account.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "APP_USR-new");
        assert_eq!(stored.refresh_token, "TG-new");
        assert!(stored.token_expires_at > Utc::now());
    }

    #[tokio::test]
    async fn refresh_failure_is_auth_error_and_keeps_old_pair() {
        let stub = RefreshOnlyStub { fail_refresh: true, ..Default::default() };
        let (manager, accounts, mut account, _dir) = setup(stub, 30).await;

        let err = manager.ensure_fresh_token(&mut account).await.unwrap_err();
        assert!(matches!(err, TokenError::Auth(_)));

        // Nothing was overwritten; the next attempt can still use the old pair
        let stored = accounts.get(account.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "APP_USR-old");
        assert_eq!(stored.refresh_token, "TG-old");
    }
}

//! Mercado Livre HTTP API client
//!
//! Typed wrapper around the marketplace REST API: scan-based catalog
//! discovery, batched item detail, visit counts, order lookup, OAuth token
//! exchange/refresh, and item status changes. Pure request/response - the
//! client holds no sync state.
//!
//! Transport-level failures are retried in-call with exponential backoff
//! (respecting Retry-After on 429/503); application-level failures are
//! surfaced to the caller untouched. A fixed configurable delay is applied
//! before every request as crude rate limiting.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::infrastructure::config::MarketplaceConfig;

/// Failure taxonomy for marketplace calls.
#[derive(Debug, Error)]
pub enum MarketApiError {
    /// No HTTP response after all in-call retries.
    #[error("transport failure after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    /// Token refresh/exchange rejected, or a 401/403 from a business endpoint.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The scan cursor is no longer valid; discovery must restart from scratch.
    #[error("scroll cursor expired")]
    CursorExpired,

    /// Rate limited and still throttled after backoff retries.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Non-success response from a business endpoint.
    #[error("api error {status}: {body}")]
    Application { status: u16, body: String },

    /// Response body did not match the wire contract.
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// One page of scan-based catalog discovery.
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub item_ids: Vec<String>,
    /// None signals end-of-catalog.
    pub next_cursor: Option<String>,
}

/// One element of a batch-detail response; `code` is the per-item HTTP status.
#[derive(Debug, Clone)]
pub struct DetailEntry {
    pub code: u16,
    pub body: Value,
}

impl DetailEntry {
    pub fn is_usable(&self) -> bool {
        self.code == 200
    }
}

/// Rotated token pair returned by the OAuth endpoint.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_seconds: i64,
}

/// Result of an OAuth code exchange: the seller identity plus first tokens.
#[derive(Debug, Clone)]
pub struct AuthorizedSeller {
    pub seller_id: String,
    pub nickname: Option<String>,
    pub tokens: TokenPair,
}

/// Raw outcome of an item status change, inspected by the bulk-action caller.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub http_code: u16,
    pub body: Value,
}

/// Seam between the sync engine and the marketplace HTTP API.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// One page of catalog discovery. A `None` cursor starts a fresh scan.
    async fn scan_catalog(
        &self,
        seller_id: &str,
        token: &str,
        cursor: Option<&str>,
    ) -> Result<ScanPage, MarketApiError>;

    /// Batched multi-get; partial failure is carried per-entry, never whole-batch.
    async fn fetch_details(
        &self,
        item_ids: &[String],
        token: &str,
    ) -> Result<Vec<DetailEntry>, MarketApiError>;

    /// Visit count over a date window. Best-effort: any failure yields 0.
    async fn fetch_visits(
        &self,
        item_id: &str,
        token: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> i64;

    /// Close date of the most recent order for an item, if any.
    async fn fetch_last_sale_date(
        &self,
        seller_id: &str,
        item_id: &str,
        token: &str,
    ) -> Result<Option<DateTime<Utc>>, MarketApiError>;

    /// Rotate a refresh token. The old refresh token is invalid afterwards.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, MarketApiError>;

    /// Exchange an OAuth authorization code for the first token pair.
    async fn exchange_code(&self, code: &str) -> Result<AuthorizedSeller, MarketApiError>;

    /// Change a listing status (pause/activate/close) on the marketplace.
    async fn set_item_status(
        &self,
        item_id: &str,
        status: &str,
        token: &str,
    ) -> Result<StatusChange, MarketApiError>;
}

/// Production client over reqwest.
#[derive(Clone)]
pub struct MeliClient {
    client: Client,
    config: MarketplaceConfig,
    scan_page_limit: u32,
}

impl MeliClient {
    pub fn new(config: MarketplaceConfig, scan_page_limit: u32) -> Result<Self, MarketApiError> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("meli-mirror/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|e| MarketApiError::Transport { attempts: 0, message: e.to_string() })?;

        Ok(Self { client, config, scan_page_limit })
    }

    fn endpoint(&self, path: &str) -> Result<Url, MarketApiError> {
        let base = format!("{}/{}", self.config.api_base.trim_end_matches('/'), path);
        Url::parse(&base).map_err(|e| MarketApiError::Payload(format!("bad url {base}: {e}")))
    }

    /// Send a request with the in-call retry policy.
    ///
    /// Transport failures and retryable statuses (408/429/5xx) are retried
    /// with exponential backoff; any other HTTP response is returned to the
    /// caller for endpoint-specific interpretation.
    async fn send_with_policy<F>(&self, build: F) -> Result<(StatusCode, Value), MarketApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_attempts = self.config.max_transport_retries.max(1);
        let mut last_err = String::new();

        for attempt in 1..=max_attempts {
            // Inter-call delay, the configured crude rate limit
            if self.config.request_delay_ms > 0 {
                sleep(Duration::from_millis(self.config.request_delay_ms)).await;
            }

            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = matches!(
                        status,
                        StatusCode::REQUEST_TIMEOUT
                            | StatusCode::TOO_MANY_REQUESTS
                            | StatusCode::INTERNAL_SERVER_ERROR
                            | StatusCode::BAD_GATEWAY
                            | StatusCode::SERVICE_UNAVAILABLE
                            | StatusCode::GATEWAY_TIMEOUT
                    );

                    if retryable && attempt < max_attempts {
                        // Respect Retry-After when the server sends one
                        let mut delay_ms =
                            self.config.retry_base_delay_ms * 2_u64.pow(attempt - 1);
                        if let Some(retry_after) = resp.headers().get(reqwest::header::RETRY_AFTER)
                        {
                            if let Ok(s) = retry_after.to_str() {
                                if let Ok(secs) = s.parse::<u64>() {
                                    delay_ms = delay_ms.max(secs * 1000);
                                }
                            }
                        }
                        warn!("⚠️ HTTP {} on attempt {}/{}, backing off {}ms", status, attempt, max_attempts, delay_ms);
                        sleep(Duration::from_millis(delay_ms)).await;
                        continue;
                    }

                    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
                    return Ok((status, body));
                }
                Err(e) => {
                    last_err = e.to_string();
                    if attempt < max_attempts {
                        let delay_ms = self.config.retry_base_delay_ms * 2_u64.pow(attempt - 1);
                        warn!("⚠️ Network error on attempt {}/{}: {}", attempt, max_attempts, e);
                        sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }

        Err(MarketApiError::Transport { attempts: max_attempts, message: last_err })
    }

    fn auth_or_application(status: StatusCode, body: &Value) -> MarketApiError {
        let text = truncate_body(body);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MarketApiError::Auth(text),
            StatusCode::TOO_MANY_REQUESTS => {
                MarketApiError::RateLimited { retry_after_secs: 60 }
            }
            _ => MarketApiError::Application { status: status.as_u16(), body: text },
        }
    }
}

#[async_trait]
impl MarketplaceApi for MeliClient {
    async fn scan_catalog(
        &self,
        seller_id: &str,
        token: &str,
        cursor: Option<&str>,
    ) -> Result<ScanPage, MarketApiError> {
        let mut url = self.endpoint(&format!("users/{seller_id}/items/search"))?;
        url.query_pairs_mut()
            .append_pair("search_type", "scan")
            .append_pair("limit", &self.scan_page_limit.to_string());
        if let Some(scroll_id) = cursor {
            url.query_pairs_mut().append_pair("scroll_id", scroll_id);
        }

        debug!("🔍 scan_catalog seller={} cursor={}", seller_id, cursor.unwrap_or("-"));
        let token = token.to_string();
        let (status, body) =
            self.send_with_policy(|| self.client.get(url.clone()).bearer_auth(&token)).await?;

        match status {
            StatusCode::OK => parse_scan_page(&body),
            // A stale scroll id comes back as 400/404; distinct from end-of-catalog
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND if cursor.is_some() => {
                Err(MarketApiError::CursorExpired)
            }
            _ => Err(Self::auth_or_application(status, &body)),
        }
    }

    async fn fetch_details(
        &self,
        item_ids: &[String],
        token: &str,
    ) -> Result<Vec<DetailEntry>, MarketApiError> {
        let mut url = self.endpoint("items")?;
        url.query_pairs_mut().append_pair("ids", &item_ids.join(","));

        debug!("📦 fetch_details batch of {}", item_ids.len());
        let token = token.to_string();
        let (status, body) =
            self.send_with_policy(|| self.client.get(url.clone()).bearer_auth(&token)).await?;

        if status != StatusCode::OK {
            return Err(Self::auth_or_application(status, &body));
        }

        let entries = body
            .as_array()
            .ok_or_else(|| MarketApiError::Payload("batch detail response is not an array".into()))?
            .iter()
            .map(|entry| DetailEntry {
                code: entry["code"].as_u64().unwrap_or(0) as u16,
                body: entry["body"].clone(),
            })
            .collect();

        Ok(entries)
    }

    async fn fetch_visits(
        &self,
        item_id: &str,
        token: &str,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> i64 {
        let Ok(mut url) = self.endpoint(&format!("items/{item_id}/visits")) else {
            return 0;
        };
        url.query_pairs_mut()
            .append_pair("date_from", &date_from.format("%Y-%m-%d").to_string())
            .append_pair("date_to", &date_to.format("%Y-%m-%d").to_string());

        let token = token.to_string();
        match self.send_with_policy(|| self.client.get(url.clone()).bearer_auth(&token)).await {
            Ok((StatusCode::OK, body)) => visits_from_body(&body, item_id),
            Ok((status, _)) => {
                debug!("visits unavailable for {} ({})", item_id, status);
                0
            }
            Err(e) => {
                debug!("visits unavailable for {}: {}", item_id, e);
                0
            }
        }
    }

    async fn fetch_last_sale_date(
        &self,
        seller_id: &str,
        item_id: &str,
        token: &str,
    ) -> Result<Option<DateTime<Utc>>, MarketApiError> {
        let mut url = self.endpoint("orders/search")?;
        url.query_pairs_mut()
            .append_pair("seller", seller_id)
            .append_pair("item", item_id)
            .append_pair("sort", "date_desc")
            .append_pair("limit", "1");

        let token = token.to_string();
        let (status, body) =
            self.send_with_policy(|| self.client.get(url.clone()).bearer_auth(&token)).await?;

        match status {
            StatusCode::OK => Ok(last_sale_from_body(&body)),
            _ => Err(Self::auth_or_application(status, &body)),
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, MarketApiError> {
        let url = self.endpoint("oauth/token")?;
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let (status, body) =
            self.send_with_policy(|| self.client.post(url.clone()).form(&form)).await?;

        if status != StatusCode::OK {
            return Err(MarketApiError::Auth(format!(
                "token refresh rejected ({status}): {}",
                truncate_body(&body)
            )));
        }

        parse_token_pair(&body)
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthorizedSeller, MarketApiError> {
        let url = self.endpoint("oauth/token")?;
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let (status, body) =
            self.send_with_policy(|| self.client.post(url.clone()).form(&form)).await?;

        if status != StatusCode::OK {
            return Err(MarketApiError::Auth(format!(
                "code exchange rejected ({status}): {}",
                truncate_body(&body)
            )));
        }

        let seller_id = body["user_id"]
            .as_i64()
            .map(|id| id.to_string())
            .or_else(|| body["user_id"].as_str().map(str::to_string))
            .ok_or_else(|| MarketApiError::Payload("token response missing user_id".into()))?;
        let tokens = parse_token_pair(&body)?;

        // Grab the display nickname while we hold a fresh token
        let me_url = self.endpoint("users/me")?;
        let nickname = match self
            .send_with_policy(|| self.client.get(me_url.clone()).bearer_auth(&tokens.access_token))
            .await
        {
            Ok((StatusCode::OK, me)) => me["nickname"].as_str().map(str::to_string),
            _ => None,
        };

        Ok(AuthorizedSeller { seller_id, nickname, tokens })
    }

    async fn set_item_status(
        &self,
        item_id: &str,
        status: &str,
        token: &str,
    ) -> Result<StatusChange, MarketApiError> {
        let url = self.endpoint(&format!("items/{item_id}"))?;
        let payload = serde_json::json!({ "status": status });

        let token = token.to_string();
        let (http_status, body) = self
            .send_with_policy(|| {
                self.client.put(url.clone()).bearer_auth(&token).json(&payload)
            })
            .await?;

        Ok(StatusChange { http_code: http_status.as_u16(), body })
    }
}

fn parse_scan_page(body: &Value) -> Result<ScanPage, MarketApiError> {
    let item_ids = body["results"]
        .as_array()
        .ok_or_else(|| MarketApiError::Payload("scan response missing results".into()))?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let next_cursor = body["scroll_id"].as_str().map(str::to_string);
    Ok(ScanPage { item_ids, next_cursor })
}

/// Extract a visit total from either wire form of the visits endpoint:
/// `{"total_visits": n}` or a map keyed by item id (plain number or nested
/// object with `total_visits`).
fn visits_from_body(body: &Value, item_id: &str) -> i64 {
    if let Some(total) = body["total_visits"].as_i64() {
        return total;
    }
    match &body[item_id] {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::Object(_) => body[item_id]["total_visits"].as_i64().unwrap_or(0),
        _ => 0,
    }
}

fn last_sale_from_body(body: &Value) -> Option<DateTime<Utc>> {
    let date_closed = body["results"].as_array()?.first()?["date_closed"].as_str()?;
    DateTime::parse_from_rfc3339(date_closed).ok().map(|dt| dt.with_timezone(&Utc))
}

fn parse_token_pair(body: &Value) -> Result<TokenPair, MarketApiError> {
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| MarketApiError::Payload("token response missing access_token".into()))?
        .to_string();
    let refresh_token = body["refresh_token"]
        .as_str()
        .ok_or_else(|| MarketApiError::Payload("token response missing refresh_token".into()))?
        .to_string();
    let expires_in_seconds = body["expires_in"].as_i64().unwrap_or(0);
    Ok(TokenPair { access_token, refresh_token, expires_in_seconds })
}

fn truncate_body(body: &Value) -> String {
    let mut text = body.to_string();
    if text.len() > 300 {
        text.truncate(300);
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_page_with_cursor() {
        let body = json!({
            "results": ["MLB111", "MLB222", "MLB333"],
            "scroll_id": "scroll-abc"
        });
        let page = parse_scan_page(&body).unwrap();
        assert_eq!(page.item_ids, vec!["MLB111", "MLB222", "MLB333"]);
        assert_eq!(page.next_cursor.as_deref(), Some("scroll-abc"));
    }

    #[test]
    fn scan_page_end_of_catalog() {
        let body = json!({ "results": [], "scroll_id": null });
        let page = parse_scan_page(&body).unwrap();
        assert!(page.item_ids.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn scan_page_missing_results_is_payload_error() {
        let body = json!({ "scroll_id": "x" });
        assert!(matches!(parse_scan_page(&body), Err(MarketApiError::Payload(_))));
    }

    #[test]
    fn visits_total_form() {
        let body = json!({ "total_visits": 412 });
        assert_eq!(visits_from_body(&body, "MLB111"), 412);
    }

    #[test]
    fn visits_map_form_plain_number() {
        let body = json!({ "MLB111": 88 });
        assert_eq!(visits_from_body(&body, "MLB111"), 88);
    }

    #[test]
    fn visits_map_form_nested_object() {
        let body = json!({ "MLB111": { "total_visits": 7 } });
        assert_eq!(visits_from_body(&body, "MLB111"), 7);
    }

    #[test]
    fn visits_unknown_shape_is_zero() {
        let body = json!({ "something_else": true });
        assert_eq!(visits_from_body(&body, "MLB111"), 0);
    }

    #[test]
    fn last_sale_from_first_result() {
        let body = json!({
            "results": [{ "date_closed": "2026-03-14T18:22:05.000-03:00" }]
        });
        let parsed = last_sale_from_body(&body).unwrap();
        assert_eq!(parsed.timezone(), Utc);
    }

    #[test]
    fn last_sale_empty_results_is_none() {
        let body = json!({ "results": [] });
        assert!(last_sale_from_body(&body).is_none());
    }

    #[test]
    fn token_pair_requires_both_tokens() {
        let body = json!({ "access_token": "APP_USR-1", "expires_in": 21600 });
        assert!(matches!(parse_token_pair(&body), Err(MarketApiError::Payload(_))));

        let body = json!({
            "access_token": "APP_USR-1",
            "refresh_token": "TG-2",
            "expires_in": 21600
        });
        let pair = parse_token_pair(&body).unwrap();
        assert_eq!(pair.access_token, "APP_USR-1");
        assert_eq!(pair.refresh_token, "TG-2");
        assert_eq!(pair.expires_in_seconds, 21600);
    }
}

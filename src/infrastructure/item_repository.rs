//! Mirror upsert engine and item queries
//!
//! Translates marketplace item payloads into mirror rows with deterministic
//! merge semantics, keyed by the marketplace's immutable item id:
//!
//! - `date_created` is COALESCE(existing, incoming) - a known value is never
//!   replaced, only filled when previously null.
//! - Every other scalar is last-write-wins on each successful detail fetch.
//! - Absent optional payload fields become explicit defaults (quantities 0,
//!   currency BRL, visits 0), never stale leftovers.
//! - Marketplace boolean-ish fields (`true`/`false`, 0/1, "true"/"false")
//!   are normalized to native booleans here, at the single point of entry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::domain::item::{Item, ItemSearchCriteria, ItemSearchResult, SyncFlag};
use crate::domain::report::MirrorStatistics;

/// Failure writing one mirror row. Never aborts a batch.
#[derive(Debug, Error)]
pub enum MirrorWriteError {
    #[error("payload is missing the item id")]
    MissingItemId,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct ItemRepository {
    pool: Arc<SqlitePool>,
}

impl ItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    // ===============================
    // DISCOVERY
    // ===============================

    /// Insert bare rows for freshly discovered item ids, skipping ids the
    /// mirror already knows. One page is written atomically. Returns the
    /// number of new rows.
    pub async fn discover_items(&self, account_id: i64, item_ids: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        let now = Utc::now();

        for item_id in item_ids {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO items (item_id, account_id, sync_flag, updated_at) \
                 VALUES (?, ?, 0, ?)",
            )
            .bind(item_id)
            .bind(account_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!("🆕 Discovered {} new of {} scanned ids", inserted, item_ids.len());
        Ok(inserted)
    }

    // ===============================
    // DETAIL UPSERT
    // ===============================

    /// Map one marketplace item payload onto its mirror row.
    ///
    /// Insert-or-merge keyed by item id; marks the row synced. The payload
    /// is rejected before any write when the item id is absent.
    pub async fn upsert_detail(
        &self,
        account_id: i64,
        payload: &Value,
        visits: i64,
        last_sale_at: Option<DateTime<Utc>>,
    ) -> Result<(), MirrorWriteError> {
        let item_id = payload["id"].as_str().ok_or(MirrorWriteError::MissingItemId)?;

        let shipping = &payload["shipping"];

        sqlx::query(
            r#"
            INSERT INTO items
            (item_id, account_id, title, price, currency, original_price, status,
             permalink, thumbnail, secure_thumbnail, sold_quantity, available_quantity,
             shipping_mode, logistic_type, free_shipping, date_created, last_sale_at,
             visits, health, catalog_listing, category_name, freight_sp, freight_ne,
             freight_rs, billable_weight, weight_status, sync_flag, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                account_id = excluded.account_id,
                title = excluded.title,
                price = excluded.price,
                currency = excluded.currency,
                original_price = excluded.original_price,
                status = excluded.status,
                permalink = excluded.permalink,
                thumbnail = excluded.thumbnail,
                secure_thumbnail = excluded.secure_thumbnail,
                sold_quantity = excluded.sold_quantity,
                available_quantity = excluded.available_quantity,
                shipping_mode = excluded.shipping_mode,
                logistic_type = excluded.logistic_type,
                free_shipping = excluded.free_shipping,
                date_created = COALESCE(items.date_created, excluded.date_created),
                last_sale_at = excluded.last_sale_at,
                visits = excluded.visits,
                health = excluded.health,
                catalog_listing = excluded.catalog_listing,
                category_name = excluded.category_name,
                freight_sp = excluded.freight_sp,
                freight_ne = excluded.freight_ne,
                freight_rs = excluded.freight_rs,
                billable_weight = excluded.billable_weight,
                weight_status = excluded.weight_status,
                sync_flag = excluded.sync_flag,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item_id)
        .bind(account_id)
        .bind(json_str(payload, "title"))
        .bind(json_f64(payload, "price"))
        .bind(json_str(payload, "currency_id").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()))
        .bind(json_f64(payload, "original_price"))
        .bind(json_str(payload, "status"))
        .bind(json_str(payload, "permalink"))
        .bind(json_str(payload, "thumbnail"))
        .bind(secure_thumbnail(payload))
        .bind(json_i64(payload, "sold_quantity").unwrap_or(0))
        .bind(json_i64(payload, "available_quantity").unwrap_or(0).max(0))
        .bind(json_str(shipping, "mode"))
        .bind(json_str(shipping, "logistic_type"))
        .bind(json_bool(shipping, "free_shipping"))
        .bind(json_datetime(payload, "date_created"))
        .bind(last_sale_at)
        .bind(visits)
        .bind(json_f64(payload, "health"))
        .bind(json_bool(payload, "catalog_listing"))
        .bind(json_str(payload, "category_name").or_else(|| json_str(payload, "category_id")))
        .bind(json_f64(payload, "freight_sp"))
        .bind(json_f64(payload, "freight_ne"))
        .bind(json_f64(payload, "freight_rs"))
        .bind(json_f64(payload, "billable_weight"))
        .bind(json_str(payload, "weight_status"))
        .bind(SyncFlag::Synced)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Flag a row for re-pull after an external action changed marketplace
    /// state (e.g. a bulk pause).
    pub async fn mark_update_requested(&self, item_id: &str) -> Result<()> {
        sqlx::query("UPDATE items SET sync_flag = ?, updated_at = ? WHERE item_id = ?")
            .bind(SyncFlag::UpdateRequested)
            .bind(Utc::now())
            .bind(item_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    // ===============================
    // PENDING QUEUE
    // ===============================

    /// Item ids still awaiting detail enrichment (pending or update-requested).
    pub async fn pending_batch(&self, account_id: i64, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT item_id FROM items WHERE account_id = ? AND sync_flag IN (0, 2) \
             ORDER BY item_id LIMIT ?",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("item_id")).collect())
    }

    pub async fn count_pending(&self, account_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE account_id = ? AND sync_flag IN (0, 2)",
        )
        .bind(account_id)
        .fetch_one(&*self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count_total(&self, account_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&*self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_synced(&self, account_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE account_id = ? AND sync_flag = 1",
        )
        .bind(account_id)
        .fetch_one(&*self.pool)
        .await?;
        Ok(count)
    }

    // ===============================
    // READS & REPORTING
    // ===============================

    pub async fn get(&self, item_id: &str) -> Result<Option<Item>> {
        let row = sqlx::query(&format!("{ITEM_COLUMNS} WHERE item_id = ?"))
            .bind(item_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(map_item))
    }

    /// Filtered listing for the dashboard (status, logistics, stale-sale window).
    pub async fn search_items(&self, criteria: &ItemSearchCriteria) -> Result<ItemSearchResult> {
        let page = criteria.page.unwrap_or(1).max(1);
        let limit = criteria.limit.unwrap_or(50).max(1);
        let offset = (page - 1) * limit;

        let filter = "WHERE (?1 IS NULL OR account_id = ?1) \
             AND (?2 IS NULL OR status = ?2) \
             AND (?3 IS NULL OR logistic_type = ?3) \
             AND (?4 IS NULL OR last_sale_at IS NULL OR last_sale_at <= ?4)";

        let total_count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM items {filter}"))
                .bind(criteria.account_id)
                .bind(&criteria.status)
                .bind(&criteria.logistic_type)
                .bind(criteria.no_sale_since)
                .fetch_one(&*self.pool)
                .await?;

        let rows = sqlx::query(&format!("{ITEM_COLUMNS} {filter} ORDER BY item_id LIMIT ?5 OFFSET ?6"))
            .bind(criteria.account_id)
            .bind(&criteria.status)
            .bind(&criteria.logistic_type)
            .bind(criteria.no_sale_since)
            .bind(limit)
            .bind(offset)
            .fetch_all(&*self.pool)
            .await?;

        Ok(ItemSearchResult {
            items: rows.into_iter().map(map_item).collect(),
            total_count,
            page,
            limit,
            total_pages: (total_count + limit - 1) / limit,
        })
    }

    /// Aggregate mirror numbers, optionally scoped to one account.
    pub async fn statistics(&self, account_id: Option<i64>) -> Result<MirrorStatistics> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    SUM(CASE WHEN sync_flag = 1 THEN 1 ELSE 0 END) AS synced, \
                    SUM(CASE WHEN sync_flag = 0 THEN 1 ELSE 0 END) AS pending, \
                    SUM(CASE WHEN sync_flag = 2 THEN 1 ELSE 0 END) AS update_requested, \
                    SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END) AS active, \
                    COALESCE(SUM(visits), 0) AS total_visits \
             FROM items WHERE (?1 IS NULL OR account_id = ?1)",
        )
        .bind(account_id)
        .fetch_one(&*self.pool)
        .await?;

        let total_items: i64 = row.get("total");
        let synced_items: i64 = row.get::<Option<i64>, _>("synced").unwrap_or(0);
        let completion_rate = if total_items > 0 {
            (synced_items as f64 / total_items as f64) * 100.0
        } else {
            0.0
        };

        Ok(MirrorStatistics {
            total_items,
            synced_items,
            pending_items: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            update_requested_items: row.get::<Option<i64>, _>("update_requested").unwrap_or(0),
            active_items: row.get::<Option<i64>, _>("active").unwrap_or(0),
            total_visits: row.get::<Option<i64>, _>("total_visits").unwrap_or(0),
            completion_rate,
        })
    }
}

const DEFAULT_CURRENCY: &str = "BRL";

const ITEM_COLUMNS: &str =
    "SELECT item_id, account_id, title, price, currency, original_price, status, permalink, \
     thumbnail, secure_thumbnail, sold_quantity, available_quantity, shipping_mode, \
     logistic_type, free_shipping, date_created, last_sale_at, visits, health, \
     catalog_listing, category_name, freight_sp, freight_ne, freight_rs, billable_weight, \
     weight_status, sync_flag, updated_at FROM items";

fn map_item(row: sqlx::sqlite::SqliteRow) -> Item {
    Item {
        item_id: row.get("item_id"),
        account_id: row.get("account_id"),
        title: row.get("title"),
        price: row.get("price"),
        currency: row.get("currency"),
        original_price: row.get("original_price"),
        status: row.get("status"),
        permalink: row.get("permalink"),
        thumbnail: row.get("thumbnail"),
        secure_thumbnail: row.get("secure_thumbnail"),
        sold_quantity: row.get("sold_quantity"),
        available_quantity: row.get("available_quantity"),
        shipping_mode: row.get("shipping_mode"),
        logistic_type: row.get("logistic_type"),
        free_shipping: row.get("free_shipping"),
        date_created: row.get("date_created"),
        last_sale_at: row.get("last_sale_at"),
        visits: row.get("visits"),
        health: row.get("health"),
        catalog_listing: row.get("catalog_listing"),
        category_name: row.get("category_name"),
        freight_sp: row.get("freight_sp"),
        freight_ne: row.get("freight_ne"),
        freight_rs: row.get("freight_rs"),
        billable_weight: row.get("billable_weight"),
        weight_status: row.get("weight_status"),
        sync_flag: row.get("sync_flag"),
        updated_at: row.get("updated_at"),
    }
}

fn json_str(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(str::to_string)
}

fn json_f64(value: &Value, key: &str) -> Option<f64> {
    value[key].as_f64()
}

fn json_i64(value: &Value, key: &str) -> Option<i64> {
    value[key].as_i64()
}

/// Normalize the marketplace's mixed boolean encodings (`true`, 1, "true",
/// "1") into a native bool. Anything unrecognized is false.
fn json_bool(value: &Value, key: &str) -> bool {
    match &value[key] {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

fn json_datetime(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value[key]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// First high-resolution picture URL, falling back to the plain thumbnail.
fn secure_thumbnail(payload: &Value) -> Option<String> {
    payload["pictures"]
        .as_array()
        .and_then(|pictures| pictures.first())
        .and_then(|picture| picture["secure_url"].as_str())
        .map(str::to_string)
        .or_else(|| json_str(payload, "thumbnail"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::account_repository::AccountRepository;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::meli_client::{AuthorizedSeller, TokenPair};
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    async fn test_repos() -> (ItemRepository, i64, TempDir) {
        let dir = tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("items.db").display());
        let db = DatabaseConnection::new(&url).await.unwrap();
        db.migrate().await.unwrap();

        let accounts = AccountRepository::new(db.pool().clone());
        let account = accounts
            .upsert_from_oauth(&AuthorizedSeller {
                seller_id: "123456".to_string(),
                nickname: None,
                tokens: TokenPair {
                    access_token: "APP_USR-1".to_string(),
                    refresh_token: "TG-1".to_string(),
                    expires_in_seconds: 21_600,
                },
            })
            .await
            .unwrap();

        (ItemRepository::new(db.pool().clone()), account.id, dir)
    }

    fn full_payload(item_id: &str) -> Value {
        json!({
            "id": item_id,
            "title": "Fone Bluetooth XYZ",
            "price": 149.9,
            "currency_id": "BRL",
            "original_price": 199.9,
            "status": "active",
            "permalink": "https://produto.mercadolivre.com.br/MLB-111",
            "thumbnail": "http://mlb-s1.mlstatic.com/111-I.jpg",
            "pictures": [
                { "secure_url": "https://mlb-s1.mlstatic.com/111-O.jpg" },
                { "secure_url": "https://mlb-s1.mlstatic.com/111-P.jpg" }
            ],
            "sold_quantity": 37,
            "available_quantity": 12,
            "shipping": {
                "mode": "me2",
                "logistic_type": "fulfillment",
                "free_shipping": true
            },
            "date_created": "2024-11-02T09:30:00.000-03:00",
            "health": 0.85,
            "catalog_listing": false,
            "category_id": "MLB1051"
        })
    }

    #[tokio::test]
    async fn discovery_ignores_known_ids() {
        let (items, account_id, _dir) = test_repos().await;

        let ids = vec!["MLB111".to_string(), "MLB222".to_string()];
        assert_eq!(items.discover_items(account_id, &ids).await.unwrap(), 2);
        // Re-scanning the same page adds nothing
        assert_eq!(items.discover_items(account_id, &ids).await.unwrap(), 0);
        assert_eq!(items.count_total(account_id).await.unwrap(), 2);
        assert_eq!(items.count_pending(account_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (items, account_id, _dir) = test_repos().await;
        let payload = full_payload("MLB111");

        items.upsert_detail(account_id, &payload, 412, None).await.unwrap();
        let first = items.get("MLB111").await.unwrap().unwrap();

        items.upsert_detail(account_id, &payload, 412, None).await.unwrap();
        let second = items.get("MLB111").await.unwrap().unwrap();

        assert_eq!(items.count_total(account_id).await.unwrap(), 1);
        assert_eq!(first.title, second.title);
        assert_eq!(first.price, second.price);
        assert_eq!(first.date_created, second.date_created);
        assert_eq!(first.visits, second.visits);
        assert_eq!(second.sync_flag, SyncFlag::Synced);
    }

    #[tokio::test]
    async fn date_created_is_first_write_wins() {
        let (items, account_id, _dir) = test_repos().await;

        let mut payload = full_payload("MLB111");
        items.upsert_detail(account_id, &payload, 0, None).await.unwrap();
        let original = items.get("MLB111").await.unwrap().unwrap().date_created;
        assert!(original.is_some());

        // A later fetch with a null creation date must not erase it
        payload["date_created"] = Value::Null;
        items.upsert_detail(account_id, &payload, 0, None).await.unwrap();
        assert_eq!(items.get("MLB111").await.unwrap().unwrap().date_created, original);

        // Nor may a different value replace it
        payload["date_created"] = json!("2025-01-01T00:00:00.000-03:00");
        items.upsert_detail(account_id, &payload, 0, None).await.unwrap();
        assert_eq!(items.get("MLB111").await.unwrap().unwrap().date_created, original);
    }

    #[tokio::test]
    async fn discovery_row_is_enriched_in_place() {
        let (items, account_id, _dir) = test_repos().await;

        items.discover_items(account_id, &["MLB111".to_string()]).await.unwrap();
        let bare = items.get("MLB111").await.unwrap().unwrap();
        assert_eq!(bare.sync_flag, SyncFlag::Pending);
        assert!(bare.title.is_none());
        assert!(bare.date_created.is_none());

        items.upsert_detail(account_id, &full_payload("MLB111"), 10, None).await.unwrap();
        let enriched = items.get("MLB111").await.unwrap().unwrap();
        assert_eq!(enriched.sync_flag, SyncFlag::Synced);
        assert_eq!(enriched.title.as_deref(), Some("Fone Bluetooth XYZ"));
        // COALESCE fills the null creation date left by discovery
        assert!(enriched.date_created.is_some());
        assert_eq!(enriched.visits, 10);
    }

    #[tokio::test]
    async fn missing_item_id_is_rejected_before_write() {
        let (items, account_id, _dir) = test_repos().await;
        let payload = json!({ "title": "sem id" });

        let err = items.upsert_detail(account_id, &payload, 0, None).await.unwrap_err();
        assert!(matches!(err, MirrorWriteError::MissingItemId));
        assert_eq!(items.count_total(account_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn absent_fields_get_explicit_defaults() {
        let (items, account_id, _dir) = test_repos().await;
        let payload = json!({ "id": "MLB333" });

        items.upsert_detail(account_id, &payload, 0, None).await.unwrap();
        let item = items.get("MLB333").await.unwrap().unwrap();
        assert_eq!(item.currency, "BRL");
        assert_eq!(item.sold_quantity, 0);
        assert_eq!(item.available_quantity, 0);
        assert_eq!(item.visits, 0);
        assert!(!item.free_shipping);
        assert!(!item.catalog_listing);
        assert!(item.health.is_none());
    }

    #[tokio::test]
    async fn stale_fields_are_overwritten_by_fresh_fetch() {
        let (items, account_id, _dir) = test_repos().await;

        items.upsert_detail(account_id, &full_payload("MLB111"), 10, None).await.unwrap();

        // Next fetch no longer carries original_price or health
        let mut thinner = full_payload("MLB111");
        thinner["original_price"] = Value::Null;
        thinner["health"] = Value::Null;
        thinner["price"] = json!(99.9);
        items.upsert_detail(account_id, &thinner, 25, None).await.unwrap();

        let item = items.get("MLB111").await.unwrap().unwrap();
        assert_eq!(item.price, Some(99.9));
        assert!(item.original_price.is_none());
        assert!(item.health.is_none());
        assert_eq!(item.visits, 25);
    }

    #[tokio::test]
    async fn boolean_encodings_are_normalized() {
        let (items, account_id, _dir) = test_repos().await;

        for (suffix, encoded) in
            [("A", json!(true)), ("B", json!(1)), ("C", json!("true")), ("D", json!("1"))]
        {
            let payload = json!({
                "id": format!("MLB{suffix}"),
                "shipping": { "free_shipping": encoded.clone() },
                "catalog_listing": encoded
            });
            items.upsert_detail(account_id, &payload, 0, None).await.unwrap();
            let item = items.get(&format!("MLB{suffix}")).await.unwrap().unwrap();
            assert!(item.free_shipping, "free_shipping for {suffix}");
            assert!(item.catalog_listing, "catalog_listing for {suffix}");
        }

        let payload = json!({
            "id": "MLBF",
            "shipping": { "free_shipping": "false" },
            "catalog_listing": 0
        });
        items.upsert_detail(account_id, &payload, 0, None).await.unwrap();
        let item = items.get("MLBF").await.unwrap().unwrap();
        assert!(!item.free_shipping);
        assert!(!item.catalog_listing);
    }

    #[tokio::test]
    async fn secure_thumbnail_prefers_first_picture() {
        let (items, account_id, _dir) = test_repos().await;

        items.upsert_detail(account_id, &full_payload("MLB111"), 0, None).await.unwrap();
        let item = items.get("MLB111").await.unwrap().unwrap();
        assert_eq!(item.secure_thumbnail.as_deref(), Some("https://mlb-s1.mlstatic.com/111-O.jpg"));

        // Without pictures the plain thumbnail is the fallback
        let mut payload = full_payload("MLB222");
        payload["pictures"] = json!([]);
        items.upsert_detail(account_id, &payload, 0, None).await.unwrap();
        let item = items.get("MLB222").await.unwrap().unwrap();
        assert_eq!(item.secure_thumbnail.as_deref(), Some("http://mlb-s1.mlstatic.com/111-I.jpg"));
    }

    #[tokio::test]
    async fn update_requested_rows_rejoin_pending_queue() {
        let (items, account_id, _dir) = test_repos().await;

        items.upsert_detail(account_id, &full_payload("MLB111"), 0, None).await.unwrap();
        assert_eq!(items.count_pending(account_id).await.unwrap(), 0);

        items.mark_update_requested("MLB111").await.unwrap();
        assert_eq!(items.count_pending(account_id).await.unwrap(), 1);
        assert_eq!(items.pending_batch(account_id, 10).await.unwrap(), vec!["MLB111"]);
    }

    #[tokio::test]
    async fn search_filters_by_status_and_stale_sales() {
        let (items, account_id, _dir) = test_repos().await;

        let mut active = full_payload("MLB111");
        active["status"] = json!("active");
        let mut paused = full_payload("MLB222");
        paused["status"] = json!("paused");

        let recent_sale = Utc::now();
        items.upsert_detail(account_id, &active, 0, Some(recent_sale)).await.unwrap();
        items.upsert_detail(account_id, &paused, 0, None).await.unwrap();

        let criteria = ItemSearchCriteria {
            status: Some("paused".to_string()),
            ..Default::default()
        };
        let result = items.search_items(&criteria).await.unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.items[0].item_id, "MLB222");

        // Stale-sale window: nothing sold in the last hour
        let criteria = ItemSearchCriteria {
            no_sale_since: Some(Utc::now() - chrono::Duration::hours(1)),
            ..Default::default()
        };
        let result = items.search_items(&criteria).await.unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.items[0].item_id, "MLB222");
    }

    #[tokio::test]
    async fn statistics_reflect_flags() {
        let (items, account_id, _dir) = test_repos().await;

        items
            .discover_items(
                account_id,
                &["MLB111".to_string(), "MLB222".to_string(), "MLB333".to_string()],
            )
            .await
            .unwrap();
        items.upsert_detail(account_id, &full_payload("MLB111"), 40, None).await.unwrap();

        let stats = items.statistics(Some(account_id)).await.unwrap();
        assert_eq!(stats.total_items, 3);
        assert_eq!(stats.synced_items, 1);
        assert_eq!(stats.pending_items, 2);
        assert_eq!(stats.active_items, 1);
        assert_eq!(stats.total_visits, 40);
        assert!((stats.completion_rate - 33.33).abs() < 0.5);
    }
}

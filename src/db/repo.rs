use super::model::{BatchRow, PinRow, StoredBatch};
use crate::model::{BannerStyle, BatchConfig, PinItem};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL: {}", normalized))?
        .create_if_missing(true)
        .foreign_keys(true)
        // Enable WAL and stricter durability.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Stores a new batch and its initial items in one transaction.
#[instrument(skip_all, fields(items = items.len()))]
pub async fn create_batch(
    pool: &Pool,
    config: &BatchConfig,
    style: &BannerStyle,
    items: &[PinItem],
) -> Result<Uuid> {
    let batch_id = Uuid::new_v4();
    let style_json = serde_json::to_string(style).context("failed to encode banner style")?;
    let now = Utc::now();

    let mut tx: Transaction<'_, Sqlite> = pool.begin().await?;
    sqlx::query(
        "INSERT INTO batches (id, top_prompt, bottom_prompt, aspect_ratio, start_time, banner_style, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(batch_id.to_string())
    .bind(&config.top_prompt)
    .bind(&config.bottom_prompt)
    .bind(config.aspect_ratio.as_str())
    .bind(config.start_time)
    .bind(style_json)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO pins (id, batch_id, position, source_link, status, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id().to_string())
        .bind(batch_id.to_string())
        .bind(position as i64)
        .bind(item.source_link())
        .bind(item.status().as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        write_pin(&mut tx, item).await?;
    }
    tx.commit().await?;
    Ok(batch_id)
}

async fn write_pin(tx: &mut Transaction<'_, Sqlite>, item: &PinItem) -> Result<()> {
    let analysis = item.analysis();
    let images = item.images();
    let publication = item.publication();
    let res = sqlx::query(
        "UPDATE pins SET status = ?, keyword = ?, title = ?, description = ?, seo_keywords = ?, \
         top_image = ?, bottom_image = ?, final_image = ?, published_url = ?, \
         scheduled_publish_time = ?, error_message = ?, updated_at = ? WHERE id = ?",
    )
    .bind(item.status().as_str())
    .bind(analysis.map(|a| a.keyword.as_str()))
    .bind(analysis.map(|a| a.title.as_str()))
    .bind(analysis.map(|a| a.description.as_str()))
    .bind(analysis.map(|a| a.seo_keywords.as_str()))
    .bind(images.map(|i| i.top.to_vec()))
    .bind(images.map(|i| i.bottom.to_vec()))
    .bind(item.final_image().map(|b| b.to_vec()))
    .bind(publication.map(|p| p.published_url.as_str()))
    .bind(publication.map(|p| p.scheduled_publish_time))
    .bind(item.error_message())
    .bind(Utc::now())
    .bind(item.id().to_string())
    .execute(&mut **tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("pin {} is not stored", item.id()));
    }
    Ok(())
}

/// Rewrites every mutable column of a stored pin.
#[instrument(skip_all, fields(id = %item.id(), status = %item.status()))]
pub async fn save_pin(pool: &Pool, item: &PinItem) -> Result<()> {
    let mut tx = pool.begin().await?;
    write_pin(&mut tx, item).await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all, fields(batch_id = %batch_id))]
pub async fn load_batch(pool: &Pool, batch_id: Uuid) -> Result<StoredBatch> {
    let batch: BatchRow = sqlx::query_as("SELECT * FROM batches WHERE id = ?")
        .bind(batch_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("batch {} not found", batch_id))?;

    let rows: Vec<PinRow> = sqlx::query_as(
        "SELECT id, source_link, status, keyword, title, description, seo_keywords, \
         top_image, bottom_image, final_image, published_url, scheduled_publish_time, error_message \
         FROM pins WHERE batch_id = ? ORDER BY position",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    let items = rows
        .into_iter()
        .map(PinItem::try_from)
        .collect::<Result<Vec<_>>>()?;
    batch.into_stored(items)
}

#[instrument(skip_all)]
pub async fn latest_batch_id(pool: &Pool) -> Result<Option<Uuid>> {
    let id: Option<String> =
        sqlx::query_scalar("SELECT id FROM batches ORDER BY created_at DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    id.map(|id| Uuid::parse_str(&id).with_context(|| format!("bad batch id '{}'", id)))
        .transpose()
}

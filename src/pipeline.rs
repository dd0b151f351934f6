//! Batch orchestration: the generation run and the publish run.
//!
//! Items are processed strictly one after another to stay inside the AI
//! provider's rate limits. A failing item is marked `error` and the batch
//! moves on; nothing here aborts a batch.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::future::join;
use tracing::{debug, error, info, instrument, warn};

use crate::ai::{AiService, FALLBACK_KEYWORD};
use crate::compose::Compositor;
use crate::export::{export_rows, ExportRow};
use crate::model::{BannerStyle, BatchConfig, ImagePair, PinItem, PinStatus, Publication};
use crate::publisher::{pin_file_name, Publisher};

/// Gap between two consecutive scheduled pins.
pub const SCHEDULE_SPACING_MINUTES: i64 = 30;

/// Sees every full-record replace and the per-item progress of a run.
#[async_trait]
pub trait PipelineObserver: Send + Sync {
    async fn item_changed(&self, item: &PinItem);

    async fn progress(&self, completed: usize, total: usize) {
        let _ = (completed, total);
    }
}

/// Observer that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

#[async_trait]
impl PipelineObserver for LogObserver {
    async fn item_changed(&self, item: &PinItem) {
        debug!(id = %item.id(), status = %item.status(), "pin updated");
    }

    async fn progress(&self, completed: usize, total: usize) {
        info!(completed, total, "batch progress");
    }
}

/// Publish time of the `slot`-th successfully published pin.
pub fn schedule_slot(start: DateTime<Utc>, slot: u32) -> DateTime<Utc> {
    start + Duration::minutes(SCHEDULE_SPACING_MINUTES * i64::from(slot))
}

async fn replace(slot: &mut PinItem, next: PinItem, observer: &dyn PipelineObserver) {
    *slot = next;
    observer.item_changed(slot).await;
}

async fn record_failure(slot: &mut PinItem, err: &anyhow::Error, observer: &dyn PipelineObserver) {
    let message = format!("{:#}", err);
    warn!(id = %slot.id(), link = slot.source_link(), error = %message, "pin failed");
    match slot.fail(message) {
        Ok(failed) => replace(slot, failed, observer).await,
        Err(err) => error!(?err, "cannot mark pin as failed"),
    }
}

/// Drives every `idle` item to `ready` or `error`. Items in any other state
/// are left alone but still count towards progress.
#[instrument(skip_all, fields(items = items.len(), aspect = %batch.aspect_ratio))]
pub async fn run_generation(
    items: &mut [PinItem],
    ai: &dyn AiService,
    compositor: &Compositor,
    batch: &BatchConfig,
    style: &BannerStyle,
    observer: &dyn PipelineObserver,
) {
    let total = items.len();
    for (index, slot) in items.iter_mut().enumerate() {
        if slot.status() == PinStatus::Idle {
            if let Err(err) = generate_one(slot, ai, compositor, batch, style, observer).await {
                record_failure(slot, &err, observer).await;
            }
        } else {
            debug!(id = %slot.id(), status = %slot.status(), "skipping pin that is not idle");
        }
        observer.progress(index + 1, total).await;
    }
    let ready = items
        .iter()
        .filter(|i| i.status() == PinStatus::Ready)
        .count();
    info!(ready, failed = total - ready, "generation finished");
}

async fn generate_one(
    slot: &mut PinItem,
    ai: &dyn AiService,
    compositor: &Compositor,
    batch: &BatchConfig,
    style: &BannerStyle,
    observer: &dyn PipelineObserver,
) -> Result<()> {
    let next = slot.start_analysis()?;
    replace(slot, next, observer).await;
    let analysis = ai.analyze(slot.source_link()).await;
    let next = slot.analyzed(analysis)?;
    replace(slot, next, observer).await;

    let keyword = slot.keyword().unwrap_or(FALLBACK_KEYWORD).to_string();
    let aspect = batch.aspect_ratio;
    let (top, bottom) = join(
        ai.generate_image(&batch.top_prompt, &keyword, aspect),
        ai.generate_image(&batch.bottom_prompt, &keyword, aspect),
    )
    .await;
    let next = slot.illustrated(ImagePair { top, bottom })?;
    replace(slot, next, observer).await;

    let images = slot
        .images()
        .cloned()
        .ok_or_else(|| anyhow!("images missing after generation"))?;
    let compositor = compositor.clone();
    let style = style.clone();
    let jpeg = tokio::task::spawn_blocking(move || {
        compositor.compose(&images.top, &images.bottom, &keyword, aspect, &style)
    })
    .await
    .context("composition task aborted")??;
    let next = slot.composed(Bytes::from(jpeg))?;
    replace(slot, next, observer).await;
    Ok(())
}

/// Uploads every `ready` item that has a composed image and returns the
/// export rows for all `done` items. Schedule slots are handed out from
/// `start` on each call, and only to successful uploads.
#[instrument(skip_all, fields(items = items.len(), start = %start))]
pub async fn run_publish(
    items: &mut [PinItem],
    publisher: &dyn Publisher,
    start: DateTime<Utc>,
    observer: &dyn PipelineObserver,
) -> Vec<ExportRow> {
    let mut published: u32 = 0;
    for slot in items.iter_mut() {
        if slot.status() != PinStatus::Ready || slot.final_image().is_none() {
            continue;
        }
        match publish_one(slot, publisher, schedule_slot(start, published), observer).await {
            Ok(()) => published += 1,
            Err(err) => record_failure(slot, &err, observer).await,
        }
    }
    info!(published, "publishing finished");
    export_rows(items)
}

async fn publish_one(
    slot: &mut PinItem,
    publisher: &dyn Publisher,
    scheduled_publish_time: DateTime<Utc>,
    observer: &dyn PipelineObserver,
) -> Result<()> {
    let next = slot.start_upload()?;
    replace(slot, next, observer).await;

    let image = slot
        .final_image()
        .cloned()
        .ok_or_else(|| anyhow!("composed image missing"))?;
    let name = pin_file_name(slot.keyword().unwrap_or(FALLBACK_KEYWORD), Utc::now());
    let published_url = publisher.publish(&name, &image).await?;

    let next = slot.published(Publication {
        published_url,
        scheduled_publish_time,
    })?;
    replace(slot, next, observer).await;
    Ok(())
}

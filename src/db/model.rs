//! Row types returned by repositories and their mapping into domain records.
//!
//! Keep these structs focused on the data returned by queries. Stage logic
//! lives in `crate::model` and `crate::pipeline`.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    Analysis, AspectRatio, BannerStyle, BatchConfig, ImagePair, PinItem, PinStatus, Publication,
};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BatchRow {
    pub id: String,
    pub top_prompt: String,
    pub bottom_prompt: String,
    pub aspect_ratio: String,
    pub start_time: DateTime<Utc>,
    pub banner_style: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PinRow {
    pub id: String,
    pub source_link: String,
    pub status: String,
    pub keyword: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub seo_keywords: Option<String>,
    pub top_image: Option<Vec<u8>>,
    pub bottom_image: Option<Vec<u8>>,
    pub final_image: Option<Vec<u8>>,
    pub published_url: Option<String>,
    pub scheduled_publish_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A batch as stored between the generation and publish runs.
#[derive(Debug, Clone)]
pub struct StoredBatch {
    pub id: Uuid,
    pub config: BatchConfig,
    pub style: BannerStyle,
    pub items: Vec<PinItem>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PinRow> for PinItem {
    type Error = anyhow::Error;

    /// A group whose columns are only partly filled is dropped as a whole.
    fn try_from(row: PinRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id).with_context(|| format!("bad pin id '{}'", row.id))?;
        let status = row.status.parse::<PinStatus>().map_err(|e| anyhow!(e))?;
        let analysis = match (row.keyword, row.title, row.description, row.seo_keywords) {
            (Some(keyword), Some(title), Some(description), Some(seo_keywords)) => Some(Analysis {
                keyword,
                title,
                description,
                seo_keywords,
            }),
            _ => None,
        };
        let images = match (row.top_image, row.bottom_image) {
            (Some(top), Some(bottom)) => Some(ImagePair {
                top: Bytes::from(top),
                bottom: Bytes::from(bottom),
            }),
            _ => None,
        };
        let publication = match (row.published_url, row.scheduled_publish_time) {
            (Some(published_url), Some(scheduled_publish_time)) => Some(Publication {
                published_url,
                scheduled_publish_time,
            }),
            _ => None,
        };
        Ok(PinItem::restore(
            id,
            row.source_link,
            status,
            analysis,
            images,
            row.final_image.map(Bytes::from),
            publication,
            row.error_message,
        ))
    }
}

impl BatchRow {
    pub fn into_stored(self, items: Vec<PinItem>) -> Result<StoredBatch> {
        let id = Uuid::parse_str(&self.id).with_context(|| format!("bad batch id '{}'", self.id))?;
        let aspect_ratio = self
            .aspect_ratio
            .parse::<AspectRatio>()
            .map_err(|e| anyhow!(e))?;
        let style: BannerStyle =
            serde_json::from_str(&self.banner_style).context("stored banner style is invalid")?;
        let links = items.iter().map(|i| i.source_link().to_string()).collect();
        Ok(StoredBatch {
            id,
            config: BatchConfig {
                links,
                top_prompt: self.top_prompt,
                bottom_prompt: self.bottom_prompt,
                aspect_ratio,
                start_time: self.start_time,
            },
            style,
            items,
            created_at: self.created_at,
        })
    }
}

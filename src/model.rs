//! Domain records for a batch of pins.
//!
//! A [`PinItem`] is never patched field by field: every stage transition
//! builds a complete new record from the previous one. The output of each
//! stage lives in its own `Option` group, so a half-populated group cannot
//! exist.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PinStatus {
    Idle,
    Analyzing,
    GeneratingImages,
    Composing,
    Ready,
    Uploading,
    Done,
    Error,
}

impl PinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinStatus::Idle => "idle",
            PinStatus::Analyzing => "analyzing",
            PinStatus::GeneratingImages => "generating_images",
            PinStatus::Composing => "composing",
            PinStatus::Ready => "ready",
            PinStatus::Uploading => "uploading",
            PinStatus::Done => "done",
            PinStatus::Error => "error",
        }
    }

    /// `done` and `error` end a run; nothing moves an item out of them
    /// except an explicit [`PinItem::reset`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, PinStatus::Done | PinStatus::Error)
    }
}

impl fmt::Display for PinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "idle" => PinStatus::Idle,
            "analyzing" => PinStatus::Analyzing,
            "generating_images" => PinStatus::GeneratingImages,
            "composing" => PinStatus::Composing,
            "ready" => PinStatus::Ready,
            "uploading" => PinStatus::Uploading,
            "done" => PinStatus::Done,
            "error" => PinStatus::Error,
            other => return Err(format!("unknown pin status '{}'", other)),
        })
    }
}

/// Metadata inferred for a recipe link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub keyword: String,
    pub title: String,
    pub description: String,
    #[serde(deserialize_with = "keywords_from_text_or_list")]
    pub seo_keywords: String,
}

fn keywords_from_text_or_list<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keywords {
        Text(String),
        List(Vec<String>),
    }

    Ok(match Keywords::deserialize(deserializer)? {
        Keywords::Text(text) => text,
        Keywords::List(list) => list.join(", "),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    pub top: Bytes,
    pub bottom: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub published_url: String,
    pub scheduled_publish_time: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("pin {id}: cannot {action} while {from}")]
pub struct TransitionError {
    pub id: Uuid,
    pub from: PinStatus,
    pub action: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinItem {
    id: Uuid,
    source_link: String,
    status: PinStatus,
    analysis: Option<Analysis>,
    images: Option<ImagePair>,
    final_image: Option<Bytes>,
    publication: Option<Publication>,
    error_message: Option<String>,
}

impl PinItem {
    pub fn new(source_link: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), source_link)
    }

    pub fn with_id(id: Uuid, source_link: impl Into<String>) -> Self {
        Self {
            id,
            source_link: source_link.into(),
            status: PinStatus::Idle,
            analysis: None,
            images: None,
            final_image: None,
            publication: None,
            error_message: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_link(&self) -> &str {
        &self.source_link
    }

    pub fn status(&self) -> PinStatus {
        self.status
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn images(&self) -> Option<&ImagePair> {
        self.images.as_ref()
    }

    pub fn final_image(&self) -> Option<&Bytes> {
        self.final_image.as_ref()
    }

    pub fn publication(&self) -> Option<&Publication> {
        self.publication.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn keyword(&self) -> Option<&str> {
        self.analysis.as_ref().map(|a| a.keyword.as_str())
    }

    /// Rebuilds a stored record as-is, without replaying transitions.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: Uuid,
        source_link: String,
        status: PinStatus,
        analysis: Option<Analysis>,
        images: Option<ImagePair>,
        final_image: Option<Bytes>,
        publication: Option<Publication>,
        error_message: Option<String>,
    ) -> Self {
        Self {
            id,
            source_link,
            status,
            analysis,
            images,
            final_image,
            publication,
            error_message,
        }
    }

    fn step(
        &self,
        from: PinStatus,
        to: PinStatus,
        action: &'static str,
    ) -> Result<PinItem, TransitionError> {
        if self.status != from {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                action,
            });
        }
        let mut next = self.clone();
        next.status = to;
        Ok(next)
    }

    pub fn start_analysis(&self) -> Result<PinItem, TransitionError> {
        self.step(PinStatus::Idle, PinStatus::Analyzing, "start analysis")
    }

    pub fn analyzed(&self, analysis: Analysis) -> Result<PinItem, TransitionError> {
        let mut next = self.step(
            PinStatus::Analyzing,
            PinStatus::GeneratingImages,
            "record analysis",
        )?;
        next.analysis = Some(analysis);
        Ok(next)
    }

    pub fn illustrated(&self, images: ImagePair) -> Result<PinItem, TransitionError> {
        let mut next = self.step(
            PinStatus::GeneratingImages,
            PinStatus::Composing,
            "record images",
        )?;
        next.images = Some(images);
        Ok(next)
    }

    pub fn composed(&self, final_image: Bytes) -> Result<PinItem, TransitionError> {
        let mut next = self.step(PinStatus::Composing, PinStatus::Ready, "record composition")?;
        next.final_image = Some(final_image);
        Ok(next)
    }

    pub fn start_upload(&self) -> Result<PinItem, TransitionError> {
        if self.final_image.is_none() {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                action: "upload without a composed image",
            });
        }
        self.step(PinStatus::Ready, PinStatus::Uploading, "start upload")
    }

    pub fn published(&self, publication: Publication) -> Result<PinItem, TransitionError> {
        let mut next = self.step(PinStatus::Uploading, PinStatus::Done, "record publication")?;
        next.publication = Some(publication);
        Ok(next)
    }

    /// Moves any non-terminal item to `error`, keeping whatever groups were
    /// already complete.
    pub fn fail(&self, message: impl Into<String>) -> Result<PinItem, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                action: "fail",
            });
        }
        let mut next = self.clone();
        next.status = PinStatus::Error;
        next.error_message = Some(message.into());
        Ok(next)
    }

    /// Re-enters `idle` from `error` with every stage output cleared.
    pub fn reset(&self) -> Result<PinItem, TransitionError> {
        if self.status != PinStatus::Error {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                action: "reset",
            });
        }
        Ok(PinItem::with_id(self.id, self.source_link.clone()))
    }
}

/// Output canvas presets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "2:3")]
    TwoByThree,
    #[serde(rename = "1:2")]
    OneByTwo,
}

impl AspectRatio {
    pub const CANVAS_WIDTH: u32 = 1000;

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::TwoByThree => "2:3",
            AspectRatio::OneByTwo => "1:2",
        }
    }

    /// Width and height of the composed image.
    pub fn canvas_size(&self) -> (u32, u32) {
        match self {
            AspectRatio::TwoByThree => (Self::CANVAS_WIDTH, 1500),
            AspectRatio::OneByTwo => (Self::CANVAS_WIDTH, 2100),
        }
    }

    /// Closest generator aspect for one half of the canvas.
    pub fn half_aspect_hint(&self) -> &'static str {
        match self {
            AspectRatio::TwoByThree => "4:3",
            AspectRatio::OneByTwo => "1:1",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2:3" => Ok(AspectRatio::TwoByThree),
            "1:2" => Ok(AspectRatio::OneByTwo),
            other => Err(format!("unsupported aspect ratio '{}', expected 2:3 or 1:2", other)),
        }
    }
}

/// RGBA color written as `#RGB`, `#RRGGBB` or `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const WHITE: Color = Color([255, 255, 255, 255]);
    pub const BLACK: Color = Color([0, 0, 0, 255]);

    pub fn rgba(&self) -> image::Rgba<u8> {
        image::Rgba(self.0)
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| format!("color '{}' must start with '#'", s))?;
        let nibble = |c: u8| -> Result<u8, String> {
            (c as char)
                .to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| format!("color '{}' has a non-hex digit", s))
        };
        let bytes = hex.as_bytes();
        match bytes.len() {
            3 => {
                let mut out = [0, 0, 0, 255];
                for (i, c) in bytes.iter().enumerate() {
                    let v = nibble(*c)?;
                    out[i] = v << 4 | v;
                }
                Ok(Color(out))
            }
            6 | 8 => {
                let mut out = [0, 0, 0, 255];
                for (i, pair) in bytes.chunks(2).enumerate() {
                    out[i] = nibble(pair[0])? << 4 | nibble(pair[1])?;
                }
                Ok(Color(out))
            }
            _ => Err(format!("color '{}' must have 3, 6 or 8 hex digits", s)),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
        } else {
            write!(f, "#{:02X}{:02X}{:02X}{:02X}", r, g, b, a)
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Look of the caption banner; one per batch, shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BannerStyle {
    pub background_color: Color,
    pub border_color: Color,
    pub text_color: Color,
    #[serde(default)]
    pub text_border_color: Option<Color>,
    #[serde(default)]
    pub text_border_width: u32,
    pub font_family: String,
}

impl Default for BannerStyle {
    fn default() -> Self {
        Self {
            background_color: Color::WHITE,
            border_color: Color::BLACK,
            text_color: Color::BLACK,
            text_border_color: None,
            text_border_width: 0,
            font_family: "serif".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub links: Vec<String>,
    pub top_prompt: String,
    pub bottom_prompt: String,
    pub aspect_ratio: AspectRatio,
    pub start_time: DateTime<Utc>,
}

impl BatchConfig {
    /// One fresh `idle` item per non-blank link, in input order.
    pub fn items(&self) -> Vec<PinItem> {
        self.links
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(PinItem::new)
            .collect()
    }
}

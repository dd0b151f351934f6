use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::RenderError;

/// Generic family appended to every font stack.
pub const FALLBACK_FAMILY: &str = "serif";

/// A font request: pixel size plus families in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSpec {
    pub size: u32,
    pub families: Vec<String>,
}

impl FontSpec {
    pub fn new(size: u32, family: &str) -> Self {
        let family = family.trim();
        let mut families = Vec::with_capacity(2);
        if !family.is_empty() && !family.eq_ignore_ascii_case(FALLBACK_FAMILY) {
            families.push(family.to_string());
        }
        families.push(FALLBACK_FAMILY.to_string());
        Self { size, families }
    }
}

fn quote_family(name: &str) -> Cow<'_, str> {
    let needs_quotes = name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | ',' | '\\'));
    if !needs_quotes {
        return Cow::Borrowed(name);
    }
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    Cow::Owned(format!("\"{}\"", escaped))
}

/// Renders as a CSS font shorthand, e.g. `48px "Playfair Display", serif`.
impl fmt::Display for FontSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}px ", self.size)?;
        for (i, family) in self.families.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&quote_family(family))?;
        }
        Ok(())
    }
}

pub trait TextRenderer: Send + Sync {
    /// Width and height of `text` set at `size` pixels.
    fn measure(&self, text: &str, size: f32) -> (u32, u32);

    /// Draws `text` with its top-left corner at (`x`, `y`).
    fn draw(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, size: f32, color: Rgba<u8>);
}

pub trait FontSource: Send + Sync {
    fn resolve(&self, spec: &FontSpec) -> Result<Arc<dyn TextRenderer>, RenderError>;
}

/// Text rendering backed by a TrueType/OpenType face.
pub struct GlyphRenderer {
    font: FontVec,
}

impl GlyphRenderer {
    pub fn new(font: FontVec) -> Self {
        Self { font }
    }
}

impl TextRenderer for GlyphRenderer {
    fn measure(&self, text: &str, size: f32) -> (u32, u32) {
        text_size(PxScale::from(size), &self.font, text)
    }

    fn draw(&self, canvas: &mut RgbaImage, text: &str, x: i32, y: i32, size: f32, color: Rgba<u8>) {
        draw_text_mut(canvas, color, x, y, PxScale::from(size), &self.font, text);
    }
}

/// Font files registered by family name (case-insensitive).
#[derive(Default)]
pub struct FontBook {
    fonts: HashMap<String, Arc<GlyphRenderer>>,
}

impl fmt::Debug for FontBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontBook")
            .field("families", &self.families())
            .finish()
    }
}

impl FontBook {
    /// Reads and parses every configured font file up front.
    pub fn load(entries: &BTreeMap<String, PathBuf>) -> Result<Self> {
        let mut book = FontBook::default();
        for (family, path) in entries {
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read font file: {}", path.display()))?;
            let font = FontVec::try_from_vec(data).with_context(|| {
                format!("invalid font file for '{}': {}", family, path.display())
            })?;
            book.insert(family, font);
            debug!(family = %family, path = %path.display(), "registered font");
        }
        Ok(book)
    }

    pub fn insert(&mut self, family: &str, font: FontVec) {
        self.fonts
            .insert(family.trim().to_lowercase(), Arc::new(GlyphRenderer::new(font)));
    }

    pub fn families(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fonts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl FontSource for FontBook {
    fn resolve(&self, spec: &FontSpec) -> Result<Arc<dyn TextRenderer>, RenderError> {
        spec.families
            .iter()
            .find_map(|family| self.fonts.get(&family.to_lowercase()))
            .map(|renderer| renderer.clone() as Arc<dyn TextRenderer>)
            .ok_or_else(|| RenderError::Font(spec.to_string()))
    }
}

//! Pin image compositor.
//!
//! Stacks two source images into the halves of a fixed-size portrait
//! canvas, overlays a dashed caption banner across the seam and encodes the
//! result as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, GenericImageView, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::{AspectRatio, BannerStyle};

pub mod font;

pub use font::{FontBook, FontSource, FontSpec, GlyphRenderer, TextRenderer};

pub const BANNER_WIDTH: u32 = 380;
pub const BANNER_HEIGHT: u32 = 120;
/// Horizontal space the caption must leave free inside the banner.
pub const BANNER_PADDING: u32 = 40;
pub const BORDER_WIDTH: u32 = 4;
pub const BORDER_DASH: u32 = 15;
pub const BORDER_GAP: u32 = 10;

pub const MAX_FONT_SIZE: u32 = 48;
pub const MIN_FONT_SIZE: u32 = 20;
pub const FONT_STEP: u32 = 2;

pub const JPEG_QUALITY: u8 = 90;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to decode {slot} image")]
    Decode {
        slot: &'static str,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot allocate a {width}x{height} canvas")]
    Surface { width: u32, height: u32 },
    #[error("no font available for {0}")]
    Font(String),
    #[error("failed to encode composed image")]
    Encode(#[source] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BannerRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The banner is centered on the whole canvas, straddling the seam.
pub fn banner_rect(aspect: AspectRatio) -> BannerRect {
    let (width, height) = aspect.canvas_size();
    BannerRect {
        x: (width - BANNER_WIDTH) / 2,
        y: (height - BANNER_HEIGHT) / 2,
        width: BANNER_WIDTH,
        height: BANNER_HEIGHT,
    }
}

#[derive(Clone)]
pub struct Compositor {
    fonts: Arc<dyn FontSource>,
}

impl Compositor {
    pub fn new(fonts: Arc<dyn FontSource>) -> Self {
        Self { fonts }
    }

    /// Composes and encodes a pin.
    pub fn compose(
        &self,
        top: &[u8],
        bottom: &[u8],
        caption: &str,
        aspect: AspectRatio,
        style: &BannerStyle,
    ) -> Result<Vec<u8>, RenderError> {
        let canvas = self.render(top, bottom, caption, aspect, style)?;
        encode_jpeg(canvas, JPEG_QUALITY)
    }

    /// Composes a pin without encoding it.
    #[instrument(skip_all, fields(aspect = %aspect))]
    pub fn render(
        &self,
        top: &[u8],
        bottom: &[u8],
        caption: &str,
        aspect: AspectRatio,
        style: &BannerStyle,
    ) -> Result<RgbaImage, RenderError> {
        let top = decode("top", top)?;
        let bottom = decode("bottom", bottom)?;

        let (width, height) = aspect.canvas_size();
        let mut canvas = blank_canvas(width, height)?;

        let half = height / 2;
        imageops::overlay(&mut canvas, &cover_fit(&top, width, half), 0, 0);
        imageops::overlay(
            &mut canvas,
            &cover_fit(&bottom, width, height - half),
            0,
            half as i64,
        );

        let rect = banner_rect(aspect);
        draw_banner(&mut canvas, rect, style);

        let spec = FontSpec::new(MAX_FONT_SIZE, &style.font_family);
        let renderer = self.fonts.resolve(&spec)?;
        let size = draw_caption(&mut canvas, renderer.as_ref(), rect, caption, style);
        let used = FontSpec { size, ..spec };
        debug!(font = %used, caption, "rendered banner");

        Ok(canvas)
    }
}

fn decode(slot: &'static str, bytes: &[u8]) -> Result<DynamicImage, RenderError> {
    image::load_from_memory(bytes).map_err(|source| RenderError::Decode { slot, source })
}

fn blank_canvas(width: u32, height: u32) -> Result<RgbaImage, RenderError> {
    let fits = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(4))
        .is_some_and(|len| len <= isize::MAX as usize);
    if width == 0 || height == 0 || !fits {
        return Err(RenderError::Surface { width, height });
    }
    Ok(RgbaImage::from_pixel(width, height, WHITE))
}

/// Scales `img` uniformly until it covers `width`×`height`, then crops the
/// centered box.
pub fn cover_fit(img: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    let (iw, ih) = img.dimensions();
    if iw == 0 || ih == 0 {
        return RgbaImage::from_pixel(width, height, WHITE);
    }
    let scale = f64::max(width as f64 / iw as f64, height as f64 / ih as f64);
    let sw = ((iw as f64 * scale).round() as u32).max(width);
    let sh = ((ih as f64 * scale).round() as u32).max(height);
    let scaled = if (sw, sh) == (iw, ih) {
        img.to_rgba8()
    } else {
        imageops::resize(img, sw, sh, FilterType::Triangle)
    };
    imageops::crop_imm(&scaled, (sw - width) / 2, (sh - height) / 2, width, height).to_image()
}

fn fill(canvas: &mut RgbaImage, x: i32, y: i32, width: u32, height: u32, color: Rgba<u8>) {
    if width == 0 || height == 0 {
        return;
    }
    draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(width, height), color);
}

fn draw_banner(canvas: &mut RgbaImage, rect: BannerRect, style: &BannerStyle) {
    fill(
        canvas,
        rect.x as i32,
        rect.y as i32,
        rect.width,
        rect.height,
        style.background_color.rgba(),
    );
    draw_dashed_border(canvas, rect, style.border_color.rgba());
}

/// Dash segments `(offset, length)` along an edge; the pattern restarts at
/// every corner.
fn dashes(length: u32) -> impl Iterator<Item = (i32, u32)> {
    (0..length)
        .step_by((BORDER_DASH + BORDER_GAP) as usize)
        .map(move |start| (start as i32, BORDER_DASH.min(length - start)))
}

/// Strokes are centered on the rectangle edge.
fn draw_dashed_border(canvas: &mut RgbaImage, rect: BannerRect, color: Rgba<u8>) {
    let half = (BORDER_WIDTH / 2) as i32;
    let (x0, y0) = (rect.x as i32, rect.y as i32);
    let (x1, y1) = (x0 + rect.width as i32, y0 + rect.height as i32);
    for (start, len) in dashes(rect.width) {
        fill(canvas, x0 + start, y0 - half, len, BORDER_WIDTH, color);
        fill(canvas, x0 + start, y1 - half, len, BORDER_WIDTH, color);
    }
    for (start, len) in dashes(rect.height) {
        fill(canvas, x0 - half, y0 + start, BORDER_WIDTH, len, color);
        fill(canvas, x1 - half, y0 + start, BORDER_WIDTH, len, color);
    }
}

/// Largest size from 48 down to 20 (step 2) at which the caption fits the
/// banner; 20 even if it still overflows.
pub fn fit_font_size(renderer: &dyn TextRenderer, caption: &str) -> u32 {
    let max_width = BANNER_WIDTH - BANNER_PADDING;
    let mut size = MAX_FONT_SIZE;
    while size > MIN_FONT_SIZE && renderer.measure(caption, size as f32).0 > max_width {
        size -= FONT_STEP;
    }
    size
}

fn draw_caption(
    canvas: &mut RgbaImage,
    renderer: &dyn TextRenderer,
    rect: BannerRect,
    caption: &str,
    style: &BannerStyle,
) -> u32 {
    let size = fit_font_size(renderer, caption);
    let px = size as f32;
    let (tw, th) = renderer.measure(caption, px);
    let x = rect.x as i32 + (rect.width as i32 - tw as i32) / 2;
    let y = rect.y as i32 + (rect.height as i32 - th as i32) / 2;

    if let Some(outline) = style.text_border_color.filter(|_| style.text_border_width > 0) {
        // stroke straddles the glyph edge; only the outer half survives the fill
        let radius = style.text_border_width.div_ceil(2) as i32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if (dx, dy) != (0, 0) && dx * dx + dy * dy <= radius * radius {
                    renderer.draw(canvas, caption, x + dx, y + dy, px, outline.rgba());
                }
            }
        }
    }
    renderer.draw(canvas, caption, x, y, px, style.text_color.rgba());
    size
}

/// Flattens onto RGB and encodes as baseline JPEG.
pub fn encode_jpeg(canvas: RgbaImage, quality: u8) -> Result<Vec<u8>, RenderError> {
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(RenderError::Encode)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Color;
    use std::io::Cursor;

    /// Every glyph is a solid box `size/2` wide and `size` tall.
    struct BlockRenderer;

    impl TextRenderer for BlockRenderer {
        fn measure(&self, text: &str, size: f32) -> (u32, u32) {
            let size = size as u32;
            (text.chars().count() as u32 * size / 2, size)
        }

        fn draw(
            &self,
            canvas: &mut RgbaImage,
            text: &str,
            x: i32,
            y: i32,
            size: f32,
            color: Rgba<u8>,
        ) {
            let (w, h) = self.measure(text, size);
            fill(canvas, x, y, w, h, color);
        }
    }

    struct Blocks;

    impl FontSource for Blocks {
        fn resolve(&self, _spec: &FontSpec) -> Result<Arc<dyn TextRenderer>, RenderError> {
            Ok(Arc::new(BlockRenderer))
        }
    }

    fn compositor() -> Compositor {
        Compositor::new(Arc::new(Blocks))
    }

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn style() -> BannerStyle {
        BannerStyle {
            background_color: Color([250, 240, 200, 255]),
            border_color: Color([120, 60, 20, 255]),
            text_color: Color([10, 10, 10, 255]),
            text_border_color: None,
            text_border_width: 0,
            font_family: "Playfair Display".into(),
        }
    }

    #[test]
    fn output_dimensions_follow_preset() {
        let red = png(300, 200, [200, 0, 0, 255]);
        for (aspect, height) in [(AspectRatio::TwoByThree, 1500), (AspectRatio::OneByTwo, 2100)] {
            let jpeg = compositor()
                .compose(&red, &red, "Lemon Bars", aspect, &style())
                .unwrap();
            let decoded = image::load_from_memory(&jpeg).unwrap();
            assert_eq!(decoded.dimensions(), (1000, height));
        }
    }

    #[test]
    fn banner_is_centered() {
        assert_eq!(
            banner_rect(AspectRatio::TwoByThree),
            BannerRect { x: 310, y: 690, width: 380, height: 120 }
        );
        assert_eq!(banner_rect(AspectRatio::OneByTwo).y, 990);
        assert_eq!(banner_rect(AspectRatio::OneByTwo).x, 310);
    }

    #[test]
    fn font_size_shrinks_in_steps_of_two() {
        // 10 glyphs at 48px = 240px wide
        assert_eq!(fit_font_size(&BlockRenderer, "0123456789"), 48);
        // 16 glyphs: 384 @48, 368 @46, 352 @44, 336 @42
        assert_eq!(fit_font_size(&BlockRenderer, "0123456789abcdef"), 42);
        // 40 glyphs never fit; floor wins
        assert_eq!(fit_font_size(&BlockRenderer, &"x".repeat(40)), MIN_FONT_SIZE);
    }

    #[test]
    fn cover_fit_crops_overflow_around_center() {
        let img = RgbaImage::from_fn(200, 100, |x, _| {
            if x < 100 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let fitted = cover_fit(&DynamicImage::ImageRgba8(img), 100, 100);
        assert_eq!(fitted.dimensions(), (100, 100));
        assert_eq!(*fitted.get_pixel(10, 50), Rgba([255, 0, 0, 255]));
        assert_eq!(*fitted.get_pixel(90, 50), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn cover_fit_upscales_small_sources() {
        let img = RgbaImage::from_pixel(10, 20, Rgba([0, 255, 0, 255]));
        let fitted = cover_fit(&DynamicImage::ImageRgba8(img), 1000, 750);
        assert_eq!(fitted.dimensions(), (1000, 750));
        assert_eq!(*fitted.get_pixel(999, 749), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn halves_and_banner_layout() {
        let top = png(1000, 750, [200, 0, 0, 255]);
        let bottom = png(1000, 750, [0, 0, 200, 255]);
        let canvas = compositor()
            .render(&top, &bottom, "", AspectRatio::TwoByThree, &style())
            .unwrap();
        assert_eq!(*canvas.get_pixel(10, 10), Rgba([200, 0, 0, 255]));
        assert_eq!(*canvas.get_pixel(10, 1490), Rgba([0, 0, 200, 255]));

        let rect = banner_rect(AspectRatio::TwoByThree);
        // inside the banner, clear of the border
        assert_eq!(*canvas.get_pixel(rect.x + 20, rect.y + 20), Rgba([250, 240, 200, 255]));
        // first dash on the top edge, then the gap after it
        assert_eq!(*canvas.get_pixel(rect.x + 5, rect.y), Rgba([120, 60, 20, 255]));
        assert_eq!(*canvas.get_pixel(rect.x + 20, rect.y), Rgba([250, 240, 200, 255]));
        // outer half of the stroke sits over the image
        assert_eq!(*canvas.get_pixel(rect.x + 5, rect.y - 2), Rgba([120, 60, 20, 255]));
        assert_eq!(*canvas.get_pixel(rect.x + 5, rect.y - 3), Rgba([200, 0, 0, 255]));
    }

    #[test]
    fn caption_is_centered_and_outlined_only_when_requested() {
        let img = png(100, 100, [255, 255, 255, 255]);
        let rect = banner_rect(AspectRatio::TwoByThree);
        // "AB" at 48px is 48x48, so it spans x 476..524, y 726..774
        let probe = (rect.x + 190 - 25, rect.y + 60);

        let plain = compositor()
            .render(&img, &img, "AB", AspectRatio::TwoByThree, &style())
            .unwrap();
        assert_eq!(*plain.get_pixel(500, 750), Rgba([10, 10, 10, 255]));
        assert_eq!(*plain.get_pixel(probe.0, probe.1), Rgba([250, 240, 200, 255]));

        let mut outlined = style();
        outlined.text_border_color = Some(Color([0, 200, 0, 255]));
        outlined.text_border_width = 4;
        let canvas = compositor()
            .render(&img, &img, "AB", AspectRatio::TwoByThree, &outlined)
            .unwrap();
        assert_eq!(*canvas.get_pixel(500, 750), Rgba([10, 10, 10, 255]));
        assert_eq!(*canvas.get_pixel(probe.0, probe.1), Rgba([0, 200, 0, 255]));

        let mut zero_width = outlined.clone();
        zero_width.text_border_width = 0;
        let canvas = compositor()
            .render(&img, &img, "AB", AspectRatio::TwoByThree, &zero_width)
            .unwrap();
        assert_eq!(*canvas.get_pixel(probe.0, probe.1), Rgba([250, 240, 200, 255]));
    }

    #[test]
    fn undecodable_source_is_a_render_error() {
        let good = png(10, 10, [0, 0, 0, 255]);
        let err = compositor()
            .compose(&good, b"not an image", "x", AspectRatio::OneByTwo, &style())
            .unwrap_err();
        assert!(matches!(err, RenderError::Decode { slot: "bottom", .. }));
        let cause = std::error::Error::source(&err).unwrap().to_string();
        assert_eq!(err.to_string(), "failed to decode bottom image");
        assert_eq!(
            format!("{:#}", anyhow::Error::from(err)).matches(&cause).count(),
            1
        );
    }

    #[test]
    fn missing_font_is_a_render_error() {
        let good = png(10, 10, [0, 0, 0, 255]);
        let compositor = Compositor::new(Arc::new(FontBook::default()));
        let err = compositor
            .compose(&good, &good, "x", AspectRatio::TwoByThree, &style())
            .unwrap_err();
        assert!(matches!(err, RenderError::Font(_)));
    }

    #[test]
    fn zero_sized_canvas_is_rejected() {
        assert!(matches!(
            blank_canvas(0, 10),
            Err(RenderError::Surface { width: 0, height: 10 })
        ));
    }
}

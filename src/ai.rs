use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use image::{Rgba, RgbaImage};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::compose::{encode_jpeg, JPEG_QUALITY};
use crate::config;
use crate::model::{Analysis, AspectRatio};

pub const FALLBACK_KEYWORD: &str = "New Recipe";

/// Content generation for a pin. Implementations never fail: a broken call
/// degrades to fallback content so the batch keeps moving.
#[async_trait]
pub trait AiService: Send + Sync {
    async fn analyze(&self, link: &str) -> Analysis;

    async fn generate_image(&self, prompt: &str, keyword: &str, aspect: AspectRatio) -> Bytes;
}

pub fn fallback_analysis() -> Analysis {
    Analysis {
        keyword: FALLBACK_KEYWORD.into(),
        title: "Delicious Homemade Recipe".into(),
        description: "A tasty recipe you will want to make again and again. Save it for later!"
            .into(),
        seo_keywords: "recipe, homemade, easy dinner, dessert".into(),
    }
}

static PLACEHOLDER: Lazy<Bytes> = Lazy::new(|| {
    let canvas = RgbaImage::from_pixel(1000, 750, Rgba([224, 224, 224, 255]));
    match encode_jpeg(canvas, JPEG_QUALITY) {
        Ok(jpeg) => Bytes::from(jpeg),
        Err(err) => {
            warn!(?err, "failed to encode placeholder image");
            Bytes::new()
        }
    }
});

/// Solid light grey JPEG used in place of a failed generation.
pub fn placeholder_image() -> Bytes {
    PLACEHOLDER.clone()
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    text_model: String,
    image_model: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("text_model", &self.text_model)
            .field("image_model", &self.image_model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn from_config(cfg: &config::Ai) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url).context("invalid ai.base_url")?;
        let http = Client::builder()
            .user_agent("pinsmith/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: cfg.api_key.clone(),
            text_model: cfg.text_model.clone(),
            image_model: cfg.image_model.clone(),
        })
    }

    pub fn build_request(&self, model: &str, body: &Value) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", model))
            .context("invalid AI base URL")?;
        self.http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build AI request")
    }

    async fn generate(&self, model: &str, body: Value) -> Result<GenerateResponse> {
        let request = self.build_request(model, &body)?;
        debug!(url = %request.url(), "sending generateContent request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach AI service")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from AI service: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("AI service error {}: {}", status, body));
        }

        res.json().await.context("invalid AI response")
    }

    pub async fn request_analysis(&self, link: &str) -> Result<Analysis> {
        let resp = self
            .generate(&self.text_model, build_analysis_body(link))
            .await?;
        let text = resp
            .first_text()
            .ok_or_else(|| anyhow!("AI response carried no text"))?;
        parse_analysis(text)
    }

    pub async fn request_image(
        &self,
        prompt: &str,
        keyword: &str,
        aspect: AspectRatio,
    ) -> Result<Bytes> {
        let resp = self
            .generate(&self.image_model, build_image_body(prompt, keyword, aspect))
            .await?;
        let data = resp
            .first_inline_data()
            .ok_or_else(|| anyhow!("AI response carried no image"))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.data.trim())
            .context("image payload is not valid base64")?;
        image::load_from_memory(&bytes).context("image payload cannot be decoded")?;
        Ok(Bytes::from(bytes))
    }
}

#[async_trait]
impl AiService for GeminiClient {
    async fn analyze(&self, link: &str) -> Analysis {
        match self.request_analysis(link).await {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(?err, link, "analysis failed; using fallback metadata");
                fallback_analysis()
            }
        }
    }

    async fn generate_image(&self, prompt: &str, keyword: &str, aspect: AspectRatio) -> Bytes {
        match self.request_image(prompt, keyword, aspect).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(?err, keyword, "image generation failed; using placeholder");
                placeholder_image()
            }
        }
    }
}

pub fn analysis_prompt(link: &str) -> String {
    format!(
        "You write Pinterest pins for a food blog. Look at the recipe at {link} and reply \
         with a JSON object with exactly these keys: \
         \"keyword\" (the dish name, 2 to 4 words), \
         \"title\" (a catchy pin title under 100 characters), \
         \"description\" (2 or 3 enticing sentences under 500 characters), \
         \"seoKeywords\" (5 to 8 comma-separated search keywords)."
    )
}

pub fn build_analysis_body(link: &str) -> Value {
    json!({
        "contents": [ { "parts": [ { "text": analysis_prompt(link) } ] } ],
        "generationConfig": { "responseMimeType": "application/json" }
    })
}

pub fn build_image_body(prompt: &str, keyword: &str, aspect: AspectRatio) -> Value {
    let text = format!(
        "{}. Dish: {}. Photorealistic food photography, natural light, appetizing, \
         no text, no watermark.",
        prompt.trim().trim_end_matches('.'),
        keyword
    );
    json!({
        "contents": [ { "parts": [ { "text": text } ] } ],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": { "aspectRatio": aspect.half_aspect_hint() }
        }
    })
}

/// Parses the model's JSON answer, tolerating a Markdown code fence.
pub fn parse_analysis(text: &str) -> Result<Analysis> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    let analysis: Analysis =
        serde_json::from_str(body).context("AI analysis is not the expected JSON object")?;
    if analysis.keyword.trim().is_empty() || analysis.title.trim().is_empty() {
        return Err(anyhow!("AI analysis is missing keyword or title"));
    }
    Ok(analysis)
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    fn first_text(&self) -> Option<&str> {
        self.parts().find_map(|p| p.text.as_deref())
    }

    fn first_inline_data(&self) -> Option<&InlineData> {
        self.parts().find_map(|p| p.inline_data.as_ref())
    }
}

//! Configuration loader and validator for the pin generator.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::BannerStyle;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub ai: Ai,
    pub publisher: Publisher,
    #[serde(default)]
    pub banner: BannerStyle,
    /// Font family name -> font file.
    #[serde(default)]
    pub fonts: BTreeMap<String, PathBuf>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Generative AI endpoint and models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ai {
    pub api_key: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    pub text_model: String,
    pub image_model: String,
}

/// Repository that hosts the finished images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Publisher {
    pub token: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default = "default_publisher_api")]
    pub api_base: String,
}

fn default_ai_base_url() -> String {
    "https://generativelanguage.googleapis.com/".into()
}

fn default_branch() -> String {
    "main".into()
}

fn default_publisher_api() -> String {
    "https://api.github.com/".into()
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// `DATABASE_URL` wins over the file under `data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/pinsmith.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.ai.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.api_key must be non-empty"));
    }
    if cfg.ai.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.base_url must be non-empty"));
    }
    if cfg.ai.text_model.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.text_model must be non-empty"));
    }
    if cfg.ai.image_model.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.image_model must be non-empty"));
    }

    let p = &cfg.publisher;
    if p.token.trim().is_empty() {
        return Err(ConfigError::Invalid("publisher.token must be non-empty"));
    }
    if p.owner.trim().is_empty() {
        return Err(ConfigError::Invalid("publisher.owner must be non-empty"));
    }
    if p.repo.trim().is_empty() {
        return Err(ConfigError::Invalid("publisher.repo must be non-empty"));
    }
    if p.branch.trim().is_empty() {
        return Err(ConfigError::Invalid("publisher.branch must be non-empty"));
    }

    if cfg.banner.font_family.trim().is_empty() {
        return Err(ConfigError::Invalid("banner.font_family must be non-empty"));
    }
    // text_border_width is u32; it's inherently >= 0
    if cfg.fonts.is_empty() {
        return Err(ConfigError::Invalid("fonts must register at least one font file"));
    }
    if cfg.fonts.keys().any(|family| family.trim().is_empty()) {
        return Err(ConfigError::Invalid("fonts keys must be non-empty family names"));
    }

    Ok(())
}

/// Returns the sample YAML configuration.
pub fn example() -> &'static str {
    r##"app:
  data_dir: "./data"

ai:
  api_key: "YOUR_GEMINI_API_KEY"
  base_url: "https://generativelanguage.googleapis.com/"
  text_model: "gemini-2.5-flash"
  image_model: "gemini-2.5-flash-image"

publisher:
  token: "YOUR_GITHUB_TOKEN"
  owner: "your-account"
  repo: "pin-images"
  branch: "main"
  directory: "pins"

banner:
  background_color: "#FFF8E7"
  border_color: "#8B5E3C"
  text_color: "#3B2314"
  text_border_color: "#FFFFFF"
  text_border_width: 2
  font_family: "Playfair Display"

fonts:
  "Playfair Display": "/usr/share/fonts/truetype/playfair/PlayfairDisplay-Bold.ttf"
  serif: "/usr/share/fonts/truetype/dejavu/DejaVuSerif-Bold.ttf"
"##
}

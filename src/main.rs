use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use pinsmith::ai::GeminiClient;
use pinsmith::compose::{Compositor, FontBook};
use pinsmith::config;
use pinsmith::db::{self, SqliteRecorder};
use pinsmith::model::{AspectRatio, BatchConfig, PinStatus};
use pinsmith::pipeline::run_generation;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Generate pin images for a list of recipe links and store them as a batch"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Text file with one recipe link per line (`#` starts a comment)
    #[arg(long)]
    links: PathBuf,

    /// Subject of the upper photo
    #[arg(long)]
    top_prompt: String,

    /// Subject of the lower photo
    #[arg(long)]
    bottom_prompt: String,

    /// Canvas preset: 2:3 (1000x1500) or 1:2 (1000x2100)
    #[arg(long, default_value = "2:3")]
    aspect: AspectRatio,

    /// First publish slot (RFC 3339); defaults to now
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Override the banner font family from the config
    #[arg(long)]
    font_family: Option<String>,
}

fn parse_links(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let raw = tokio::fs::read_to_string(&args.links)
        .await
        .with_context(|| format!("failed to read links file: {}", args.links.display()))?;
    let batch = BatchConfig {
        links: parse_links(&raw),
        top_prompt: args.top_prompt,
        bottom_prompt: args.bottom_prompt,
        aspect_ratio: args.aspect,
        start_time: args.start.unwrap_or_else(Utc::now),
    };
    let mut items = batch.items();
    if items.is_empty() {
        bail!("no links found in {}", args.links.display());
    }

    let mut style = cfg.banner.clone();
    if let Some(family) = args.font_family {
        style.font_family = family;
    }

    let fonts = FontBook::load(&cfg.fonts)?;
    info!(families = ?fonts.families(), "fonts loaded");
    let compositor = Compositor::new(Arc::new(fonts));
    let ai = GeminiClient::from_config(&cfg.ai)?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let batch_id = db::create_batch(&pool, &batch, &style, &items).await?;
    info!(%batch_id, links = items.len(), "starting generation");

    let recorder = SqliteRecorder::new(pool.clone());
    run_generation(&mut items, &ai, &compositor, &batch, &style, &recorder).await;

    let ready = items
        .iter()
        .filter(|i| i.status() == PinStatus::Ready)
        .count();
    for item in items.iter().filter(|i| i.status() == PinStatus::Error) {
        eprintln!(
            "failed: {} ({})",
            item.source_link(),
            item.error_message().unwrap_or("unknown error")
        );
    }
    println!("batch {}: {}/{} pins ready", batch_id, ready, items.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_skip_blanks_and_comments() {
        let raw = "https://a\n\n  # later\n  https://b  \n";
        assert_eq!(parse_links(raw), vec!["https://a", "https://b"]);
    }
}

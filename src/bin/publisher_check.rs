use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use pinsmith::config;
use pinsmith::publisher::{GithubPublisher, Publisher};

#[derive(Parser, Debug)]
#[command(about = "Check that the configured image repository is reachable")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    let publisher = GithubPublisher::from_config(&cfg.publisher)?;

    if !publisher.verify_connection().await {
        bail!("repository {}/{} is not reachable", cfg.publisher.owner, cfg.publisher.repo);
    }
    println!("repository {}/{} is reachable", cfg.publisher.owner, cfg.publisher.repo);
    Ok(())
}

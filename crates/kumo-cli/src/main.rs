use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kumo_client::HttpFetcher;
use kumo_core::models::{EpisodeSort, MediaFetchRequest};
use kumo_core::traits::Fetcher;
use kumo_core::{ConnectionStatus, SearchConfig, SelectorSource};

#[derive(Parser)]
#[command(name = "kumo", version, about = "Selector-driven media source engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a source's base URL and report its status
    Check {
        /// Path to the source configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Search, list and resolve playable media for a subject
    Fetch {
        /// Path to the source configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Subject name to search for; repeat for alternative titles
        #[arg(short, long = "name", required = true)]
        names: Vec<String>,

        /// Episode ordinal to filter for (number, or a label like "OVA")
        #[arg(short, long)]
        episode: Option<String>,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Render pages in a headless browser instead of plain HTTP
        /// (requires the `browser` build feature)
        #[arg(long, default_value_t = false)]
        browser: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kumo=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let (source_id, config) = load_config(&config)?;
            let fetcher = HttpFetcher::new()?.allow_private_urls();
            let source = SelectorSource::new(&source_id, &config, fetcher)?;
            let status = source.check_connection().await;
            println!("{status}");
            if status == ConnectionStatus::Failed {
                std::process::exit(1);
            }
        }
        Commands::Fetch {
            config,
            names,
            episode,
            timeout,
            browser,
        } => {
            let (source_id, config) = load_config(&config)?;
            let request = MediaFetchRequest {
                subject_names: names,
                episode_sort: episode.as_deref().map(EpisodeSort::from_value),
            };

            if browser {
                #[cfg(feature = "browser")]
                {
                    let fetcher =
                        kumo_client::BrowserFetcher::with_timeout(Duration::from_secs(timeout))
                            .await?;
                    return cmd_fetch(&source_id, &config, fetcher, &request).await;
                }
                #[cfg(not(feature = "browser"))]
                anyhow::bail!("this binary was built without the 'browser' feature");
            }

            let fetcher =
                HttpFetcher::with_timeout(Duration::from_secs(timeout))?.allow_private_urls();
            cmd_fetch(&source_id, &config, fetcher, &request).await?;
        }
    }

    Ok(())
}

async fn cmd_fetch<F: Fetcher>(
    source_id: &str,
    config: &SearchConfig,
    fetcher: F,
    request: &MediaFetchRequest,
) -> Result<()> {
    let source = SelectorSource::new(source_id, config, fetcher)?;

    // Ctrl-C cancels the run; whatever resolved so far is still printed.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, returning partial results");
                cancel.cancel();
            }
        });
    }

    let media = source.fetch(request, &cancel).await;
    tracing::info!(count = media.len(), "fetch finished");
    println!("{}", serde_json::to_string_pretty(&media)?);
    Ok(())
}

/// Read a source config; the file stem doubles as the source id.
fn load_config(path: &Path) -> Result<(String, SearchConfig)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: SearchConfig = serde_json::from_str(&raw)
        .with_context(|| format!("invalid config in {}", path.display()))?;
    let source_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("source")
        .to_string();
    Ok((source_id, config))
}

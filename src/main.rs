//! Hondana CLI - resolve manga from upstream sources as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hondana::config::Config;
use hondana::gateway::{HttpTransport, RequestGateway};
use hondana::{CacheLayer, Orchestrator, SourceRegistry, encoding};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Manga source aggregator.
#[derive(Parser, Debug)]
#[command(name = "hondana")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use this config file instead of the default location.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print series metadata with every group and chapter.
    Series {
        /// Source key (mangadex, weebcentral, imgchest).
        source: String,
        id: String,
    },
    /// Print the page image URLs of a chapter.
    Chapter { source: String, id: String },
    /// Print the display projection of a series.
    Page { source: String, id: String },
    /// Map a deep link or legacy id to a series or chapter.
    Shortcut { source: String, raw: String },
    /// Encode a URL for use as an opaque path segment.
    Encode {
        value: String,
        /// Use slash/question-mark substitution instead of base64.
        #[arg(long)]
        naive: bool,
    },
    /// Reverse `encode`.
    Decode {
        value: String,
        #[arg(long)]
        naive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Encode { value, naive } => {
            let encoded = if naive {
                encoding::naive_encode(&value)
            } else {
                encoding::encode(&value)
            };
            println!("{}", encoded);
            Ok(())
        }
        Command::Decode { value, naive } => {
            let decoded = if naive {
                encoding::naive_decode(&value)
            } else {
                encoding::decode(&value).context("Failed to decode value")?
            };
            println!("{}", decoded);
            Ok(())
        }
        Command::Series { source, id } => {
            let series = build_orchestrator(&config)?
                .series(&source, &id)
                .await
                .context("Failed to resolve series")?;
            print_found(series.as_deref(), "series", &source, &id)
        }
        Command::Chapter { source, id } => {
            let chapter = build_orchestrator(&config)?
                .chapter(&source, &id)
                .await
                .context("Failed to resolve chapter")?;
            print_found(chapter.as_deref(), "chapter", &source, &id)
        }
        Command::Page { source, id } => {
            let page = build_orchestrator(&config)?
                .series_page(&source, &id)
                .await
                .context("Failed to resolve series page")?;
            print_found(page.as_deref(), "series", &source, &id)
        }
        Command::Shortcut { source, raw } => {
            let shortcut = build_orchestrator(&config)?
                .shortcut(&source, &raw)
                .await
                .context("Failed to resolve shortcut")?;
            print_found(shortcut, "shortcut target", &source, &raw)
        }
    }
}

/// Wires the shared cache, gateway and adapters together.
fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let cache = Arc::new(CacheLayer::new(config.cache.max_capacity));
    let transport =
        HttpTransport::new(&config.gateway).context("Failed to create HTTP client")?;
    let gateway = Arc::new(RequestGateway::new(
        &config.gateway,
        Arc::new(transport),
        cache.clone(),
    ));
    let registry = SourceRegistry::new(config, gateway, cache.clone());

    Ok(Orchestrator::new(registry, cache))
}

/// Prints a resolved value as pretty JSON, or fails when there is none.
fn print_found<T: Serialize>(value: Option<T>, what: &str, source: &str, id: &str) -> Result<()> {
    let value = value.ok_or_else(|| anyhow::anyhow!("No {} found for {}/{}", what, source, id))?;
    let json = serde_json::to_string_pretty(&value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

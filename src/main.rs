mod browser;
mod catalog;
mod cleanup;
mod config;
mod crawl;
mod error;
mod loader;
mod model;
mod noise;
mod parser;
mod probe;
mod reconcile;
mod sync;

use std::time::Instant;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};

use crate::browser::Device;
use crate::catalog::CatalogStore;
use crate::config::Settings;
use crate::crawl::ChannelCrawler;
use crate::model::{sort_newest_first, Catalog};
use crate::sync::{SyncMode, SyncRequest};

#[derive(Parser)]
#[command(name = "gallery_sync", about = "Channel image crawler and catalog sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl new posts and merge them into the catalog
    Sync {
        /// Reload the whole feed even if a catalog exists
        #[arg(long)]
        full: bool,
        /// Max messages to load (default: from settings, per mode)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Crawl the full feed and print records as JSON (catalog untouched)
    Crawl {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long, value_enum)]
        device: Option<Device>,
    },
    /// Re-run canonical cleanup over the stored catalog
    Cleanup,
    /// Drop catalog records whose image URL no longer resolves
    Check,
    /// Print one page of the catalog as served to gallery clients
    Page {
        #[arg(short, long, default_value = "1")]
        page: usize,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show catalog statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;
    let store = CatalogStore::new(&settings.catalog_path);

    let result = match cli.command {
        Commands::Sync { full, limit } => {
            let source = ChannelCrawler {
                channel: settings.channel.clone(),
                device: settings.device,
                options: settings.browser_options(),
            };
            let client = if settings.probe_dimensions {
                Some(probe::http_client(settings.device.profile().user_agent)?)
            } else {
                None
            };
            let req = SyncRequest {
                force_full: full,
                full_limit: limit.unwrap_or(settings.full_limit),
                incremental_limit: limit.unwrap_or(settings.incremental_limit),
            };

            println!("Syncing {} into {}...", settings.channel, store.path().display());
            let report = sync::run_sync(&store, &source, client.as_ref(), &req)
                .await
                .context("sync failed, catalog left unchanged")?;
            let mode = match report.mode {
                SyncMode::Full => "full",
                SyncMode::Incremental => "incremental",
            };
            println!(
                "Done ({}): {} fetched, {} new, {} updated, {} removed, {} total.",
                mode, report.fetched, report.new, report.updated, report.removed, report.total
            );
            Ok(())
        }
        Commands::Crawl { limit, device } => {
            let device = device.unwrap_or(settings.device);
            let records = crawl::crawl(
                &settings.channel,
                limit.unwrap_or(settings.full_limit),
                device,
                None,
                &settings.browser_options(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Commands::Cleanup => {
            let catalog = load_existing(&store)?;
            let before = catalog.images.len();
            let out = cleanup::canonicalize(catalog.images);
            println!(
                "Removed {} decorative and {} duplicate images ({} -> {}).",
                out.decorative,
                out.duplicates,
                before,
                out.images.len()
            );
            store.save(&Catalog {
                images: out.images,
                last_sync: catalog.last_sync,
            })?;
            Ok(())
        }
        Commands::Check => {
            let catalog = load_existing(&store)?;
            let client = probe::http_client(settings.device.profile().user_agent)?;
            let report = probe::check_links(&client, catalog.images).await?;
            for img in &report.broken {
                println!("  broken: {} ({})", img.id, img.url);
            }
            if report.broken.is_empty() {
                println!("All {} images resolve.", report.valid.len());
                return Ok(());
            }
            let mut images = report.valid;
            sort_newest_first(&mut images);
            println!("Removed {} broken images, {} remain.", report.broken.len(), images.len());
            store.save(&Catalog {
                images,
                last_sync: catalog.last_sync,
            })?;
            Ok(())
        }
        Commands::Page { page, limit } => {
            let catalog = store.load()?.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&catalog.page(page, limit))?);
            Ok(())
        }
        Commands::Stats => {
            let catalog = load_existing(&store)?;
            print_stats(&catalog);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn load_existing(store: &CatalogStore) -> anyhow::Result<Catalog> {
    store.load()?.with_context(|| {
        format!(
            "no catalog at {}. Run 'sync' first.",
            store.path().display()
        )
    })
}

fn print_stats(catalog: &Catalog) {
    let messages = catalog.known_message_ids().len();
    let unknown = catalog.images.iter().filter(|i| !i.has_dimensions()).count();
    let captioned = catalog.images.iter().filter(|i| i.caption.is_some()).count();

    println!("Images:     {}", catalog.images.len());
    println!("Messages:   {}", messages);
    println!("Captioned:  {}", captioned);
    println!("No size:    {}", unknown);
    if let (Some(newest), Some(oldest)) = (
        catalog.images.iter().map(|i| i.date).max(),
        catalog.images.iter().map(|i| i.date).min(),
    ) {
        println!("Newest:     {}", format_ms(newest));
        println!("Oldest:     {}", format_ms(oldest));
    }
    if catalog.last_sync > 0 {
        println!("Last sync:  {}", format_ms(catalog.last_sync));
    }
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

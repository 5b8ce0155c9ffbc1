use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use url::Url;

use crate::browser::{BrowserOptions, Device, FeedSession};
use crate::error::{Result, SyncError};
use crate::loader::{load_feed, ScrollPolicy};
use crate::model::{ImageRecord, StopBoundary};
use crate::parser::{self, ExtractOptions};
use crate::sync::FeedSource;

pub fn feed_url(channel: &str) -> String {
    format!("https://t.me/s/{}", channel)
}

/// Load a channel feed in an emulated mobile browser and extract its image
/// records. Without a boundary the whole feed is loaded; with one, loading
/// and extraction stop at previously synced content.
pub async fn crawl(
    channel: &str,
    limit: usize,
    device: Device,
    boundary: Option<&StopBoundary>,
    options: &BrowserOptions,
) -> Result<Vec<ImageRecord>> {
    let url = feed_url(channel);
    let base = Url::parse(&url).map_err(|e| SyncError::Session(format!("bad feed url {}: {}", url, e)))?;
    let policy = match boundary {
        Some(_) => ScrollPolicy::incremental(),
        None => ScrollPolicy::full(),
    };
    info!(
        "Crawling {} ({} mode, limit {})",
        url,
        if boundary.is_some() { "incremental" } else { "full" },
        limit
    );

    let profile = device.profile();
    let mut session = FeedSession::launch(options, &profile).await?;
    let loaded = async {
        session.open(&url, &profile).await?;
        load_feed(&session, policy, limit).await?;
        session.content().await
    }
    .await;
    session.close().await;
    let html = loaded?;

    let extraction = parser::extract(
        &html,
        &ExtractOptions {
            base_url: &base,
            limit,
            boundary,
            now_ms: Utc::now().timestamp_millis(),
        },
    );
    info!(
        "Examined {} messages, kept {} ({:?})",
        extraction.examined,
        extraction.messages.len(),
        extraction.stop
    );
    if extraction.found_existing() {
        info!("Reached previously synced content");
    }

    let records = extraction.into_records();
    info!("Extracted {} images", records.len());
    Ok(records)
}

/// The live channel as a record source for the sync pipeline.
pub struct ChannelCrawler {
    pub channel: String,
    pub device: Device,
    pub options: BrowserOptions,
}

#[async_trait]
impl FeedSource for ChannelCrawler {
    async fn fetch(&self, limit: usize, boundary: Option<&StopBoundary>) -> Result<Vec<ImageRecord>> {
        crawl(&self.channel, limit, self.device, boundary, &self.options).await
    }
}

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::info;

use crate::catalog::CatalogStore;
use crate::cleanup;
use crate::error::Result;
use crate::model::{Catalog, ImageRecord, StopBoundary};
use crate::probe;
use crate::reconcile;

/// Where fresh records come from. The production source drives a browser.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, limit: usize, boundary: Option<&StopBoundary>) -> Result<Vec<ImageRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub force_full: bool,
    pub full_limit: usize,
    pub incremental_limit: usize,
}

#[derive(Debug)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
    pub removed: usize,
    pub total: usize,
}

/// crawl → probe → reconcile → cleanup → write. Any error before the write
/// leaves the stored catalog untouched.
pub async fn run_sync<S: FeedSource + ?Sized>(
    store: &CatalogStore,
    source: &S,
    probe_client: Option<&Client>,
    req: &SyncRequest,
) -> anyhow::Result<SyncReport> {
    let existing = store.load()?;
    let started = Utc::now().timestamp_millis();

    let boundary = match &existing {
        Some(catalog) if !req.force_full => Some(StopBoundary::from_catalog(catalog)),
        _ => None,
    };
    let (mode, limit) = match boundary {
        Some(_) => (SyncMode::Incremental, req.incremental_limit),
        None => (SyncMode::Full, req.full_limit),
    };
    info!(
        "Starting {:?} sync ({} stored images)",
        mode,
        existing.as_ref().map_or(0, |c| c.images.len())
    );

    let mut incoming = source.fetch(limit, boundary.as_ref()).await?;
    let fetched = incoming.len();
    if let Some(client) = probe_client {
        probe::probe_dimensions(client, &mut incoming).await?;
    }

    let stored = existing.map(|c| c.images).unwrap_or_default();
    let merged = reconcile::merge(&stored, incoming);
    let cleaned = cleanup::canonicalize(merged.images);

    let catalog = Catalog {
        images: cleaned.images,
        last_sync: started,
    };
    store.save(&catalog)?;

    Ok(SyncReport {
        mode,
        fetched,
        new: merged.new_count,
        updated: merged.updated_count,
        removed: merged.filtered_count + cleaned.decorative + cleaned.duplicates,
        total: catalog.images.len(),
    })
}

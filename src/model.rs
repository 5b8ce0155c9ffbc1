use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// ── Records ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub message_id: i64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl ImageRecord {
    pub fn record_id(message_id: i64, index: usize) -> String {
        format!("mobile_{}_{}", message_id, index)
    }

    pub fn normalized_url(&self) -> &str {
        normalize_url(&self.url)
    }

    pub fn has_dimensions(&self) -> bool {
        self.width > 0 || self.height > 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Strip the query string. Rotating CDN tokens live there, so the remainder
/// is the identity key for a piece of content.
pub fn normalize_url(url: &str) -> &str {
    match url.find('?') {
        Some(i) => &url[..i],
        None => url,
    }
}

/// Newest first; equal dates fall back to id so the order is reproducible.
pub fn sort_newest_first(images: &mut [ImageRecord]) {
    images.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
}

// ── Catalog ──

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub last_sync: i64,
}

impl Catalog {
    pub fn known_message_ids(&self) -> HashSet<i64> {
        self.images
            .iter()
            .map(|img| img.message_id)
            .filter(|id| *id > 0)
            .collect()
    }

    pub fn known_urls(&self) -> HashSet<String> {
        self.images
            .iter()
            .map(|img| img.normalized_url().to_string())
            .collect()
    }

    pub fn page(&self, page: usize, limit: usize) -> ImagePage {
        let page = page.max(1);
        let start = (page - 1).saturating_mul(limit).min(self.images.len());
        let end = start.saturating_add(limit).min(self.images.len());
        ImagePage {
            images: self.images[start..end].to_vec(),
            total: self.images.len(),
            page,
            limit,
            has_more: end < self.images.len(),
        }
    }
}

// ── Crawl boundary ──

/// Everything an incremental crawl knows about prior state. Its presence is
/// what switches the loader and the extractor into incremental mode.
#[derive(Debug, Clone, Default)]
pub struct StopBoundary {
    pub stop_after: Option<i64>,
    pub known_message_ids: HashSet<i64>,
    pub known_urls: HashSet<String>,
}

impl StopBoundary {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self {
            stop_after: (catalog.last_sync > 0).then_some(catalog.last_sync),
            known_message_ids: catalog.known_message_ids(),
            known_urls: catalog.known_urls(),
        }
    }
}

/// Offset slice handed to gallery clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePage {
    pub images: Vec<ImageRecord>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub has_more: bool,
}

#[cfg(test)]
pub(crate) fn record(id: &str, message_id: i64, url: &str, w: u32, h: u32, date: i64) -> ImageRecord {
    ImageRecord {
        id: id.to_string(),
        message_id,
        url: url.to_string(),
        thumbnail_url: None,
        width: w,
        height: h,
        date,
        caption: None,
    }
}

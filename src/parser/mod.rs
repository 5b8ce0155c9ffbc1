pub mod media;
pub mod messages;

use scraper::Html;
use url::Url;

use crate::model::{ImageRecord, StopBoundary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// A content image and its position among the message's content images.
/// The position survives the split into known and new images so record ids
/// stay stable across syncs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlottedImage {
    pub slot: usize,
    pub image: ImageCandidate,
}

#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub message_id: i64,
    pub date: i64,
    pub caption: Option<String>,
    pub images: Vec<SlottedImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every message element was examined.
    Exhausted,
    /// The accepted-message limit was reached.
    Limit,
    /// A message older than the stop timestamp was reached.
    BoundaryDate { message_id: i64 },
    /// The crawl caught up with content already in the catalog.
    KnownContent { message_id: i64 },
}

#[derive(Debug)]
pub struct Extraction {
    pub messages: Vec<FeedMessage>,
    pub stop: StopReason,
    pub examined: usize,
}

impl Extraction {
    pub fn found_existing(&self) -> bool {
        matches!(self.stop, StopReason::KnownContent { .. })
    }

    pub fn into_records(self) -> Vec<ImageRecord> {
        self.messages
            .into_iter()
            .flat_map(|msg| {
                let FeedMessage {
                    message_id,
                    date,
                    caption,
                    images,
                } = msg;
                images
                    .into_iter()
                    .map(move |SlottedImage { slot, image }| ImageRecord {
                        id: ImageRecord::record_id(message_id, slot),
                        message_id,
                        url: image.url,
                        thumbnail_url: None,
                        width: image.width,
                        height: image.height,
                        date,
                        caption: caption.clone(),
                    })
            })
            .collect()
    }
}

pub struct ExtractOptions<'a> {
    /// Feed URL; relative media paths resolve against it.
    pub base_url: &'a Url,
    pub limit: usize,
    pub boundary: Option<&'a StopBoundary>,
    /// Timestamp used for messages that carry no datetime.
    pub now_ms: i64,
}

/// Loaded feed markup → messages with content images.
pub fn extract(html: &str, opts: &ExtractOptions) -> Extraction {
    let document = Html::parse_document(html);
    messages::walk(&document, opts)
}

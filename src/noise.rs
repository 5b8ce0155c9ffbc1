//! Decorative-image classification.
//!
//! The same rule runs at two strictness levels. Crawl time is lenient so that
//! partial markup never costs real content; cleanup runs against the whole
//! catalog and can afford to be harsh.

use crate::model::{normalize_url, ImageRecord};

const MIN_SIDE: u32 = 200;
const SQUARE_TOLERANCE: u32 = 50;
const SQUARE_MIN_SIDE: u32 = 300;

const URL_MARKERS: &[&str] = &["avatar", "icon", "logo", "profile", "channel_", "_64", "_128"];
const CLEANUP_URL_MARKERS: &[&str] = &["thumb"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Applied to candidates while the feed is parsed.
    Crawl,
    /// Applied to merged and cleaned catalogs.
    Cleanup,
}

pub fn is_decorative(url: &str, width: u32, height: u32, strictness: Strictness) -> bool {
    match strictness {
        Strictness::Crawl => has_marker(url, URL_MARKERS) || is_small(width, height),
        Strictness::Cleanup => {
            let url = normalize_url(url).to_lowercase();
            has_marker(&url, URL_MARKERS)
                || has_marker(&url, CLEANUP_URL_MARKERS)
                || (width == 0 && height == 0)
                || is_small(width, height)
                || is_small_square(width, height)
        }
    }
}

pub fn is_decorative_record(img: &ImageRecord, strictness: Strictness) -> bool {
    is_decorative(&img.url, img.width, img.height, strictness)
}

fn has_marker(url: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| url.contains(m))
}

fn is_small(width: u32, height: u32) -> bool {
    (width > 0 && width < MIN_SIDE) || (height > 0 && height < MIN_SIDE)
}

fn is_small_square(width: u32, height: u32) -> bool {
    width > 0
        && height > 0
        && width.abs_diff(height) < SQUARE_TOLERANCE
        && (width < SQUARE_MIN_SIDE || height < SQUARE_MIN_SIDE)
}

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::DateTime;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use super::{media, ExtractOptions, Extraction, FeedMessage, SlottedImage, StopReason};
use crate::model::normalize_url;
use crate::noise::{is_decorative, Strictness};

pub const MESSAGE_SELECTOR: &str = ".tgme_widget_message, .message, .msg";

static MESSAGE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(MESSAGE_SELECTOR).unwrap());
static POST_REF_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[data-post]").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(r#"a[href*="/"]"#).unwrap());
static TIME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("time[datetime]").unwrap());
static DATETIME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[datetime]").unwrap());
static CAPTION_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".tgme_widget_message_text, .message-text, .text").unwrap()
});
static TRAILING_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/(\d+)/?$").unwrap());

/// Walk message elements in crawl order and collect the ones carrying content
/// images. Incremental runs walk newest-first and stop at the first sign of
/// prior state.
pub fn walk(document: &Html, opts: &ExtractOptions) -> Extraction {
    let mut elements: Vec<ElementRef<'_>> = document.select(&MESSAGE_SEL).collect();
    let incremental = opts.boundary.is_some();
    if incremental {
        elements.reverse();
    }
    info!(
        "Parsing {} messages ({})",
        elements.len(),
        if incremental { "newest first" } else { "oldest first" }
    );

    let mut messages = Vec::new();
    let mut examined = 0;
    let mut stop = StopReason::Exhausted;

    for el in elements {
        if messages.len() >= opts.limit {
            stop = StopReason::Limit;
            break;
        }
        examined += 1;

        let Some(message_id) = resolve_message_id(el) else {
            debug!("[{}] Skipping message without id", examined);
            continue;
        };
        let date = resolve_date(el).unwrap_or(opts.now_ms);

        let (known_id, known_urls) = match opts.boundary {
            Some(b) => {
                if b.stop_after.is_some_and(|t| date < t) {
                    info!("Message {} predates the last sync, stopping", message_id);
                    stop = StopReason::BoundaryDate { message_id };
                    break;
                }
                (b.known_message_ids.contains(&message_id), Some(&b.known_urls))
            }
            None => (false, None),
        };

        // Content candidates: deduped within the message, decorative dropped.
        let mut seen = HashSet::new();
        let mut surviving = Vec::new();
        for img in media::candidates(el, opts.base_url) {
            let key = normalize_url(&img.url).to_string();
            if is_decorative(&img.url, img.width, img.height, Strictness::Crawl) {
                continue;
            }
            if seen.insert(key) {
                surviving.push(SlottedImage {
                    slot: surviving.len(),
                    image: img,
                });
            }
        }

        let (fresh, already_stored): (Vec<_>, Vec<_>) = surviving.into_iter().partition(|s| {
            !known_urls.is_some_and(|k| k.contains(normalize_url(&s.image.url)))
        });

        if known_id || (fresh.is_empty() && !already_stored.is_empty()) {
            // Caught up. A known message whose URL rotated still contributes
            // the new URLs so the merge can update it in place.
            if !fresh.is_empty() {
                info!(
                    "Message {} is known but carries {} new URL(s)",
                    message_id,
                    fresh.len()
                );
                messages.push(build_message(el, message_id, date, fresh));
            }
            info!("Message {} already in catalog, stopping", message_id);
            stop = StopReason::KnownContent { message_id };
            break;
        }

        if fresh.is_empty() {
            continue;
        }
        debug!("Message {}: {} image(s)", message_id, fresh.len());
        messages.push(build_message(el, message_id, date, fresh));
    }

    info!(
        "Extracted {} messages from {} examined ({:?})",
        messages.len(),
        examined,
        stop
    );
    Extraction {
        messages,
        stop,
        examined,
    }
}

fn build_message(
    el: ElementRef<'_>,
    message_id: i64,
    date: i64,
    images: Vec<SlottedImage>,
) -> FeedMessage {
    FeedMessage {
        message_id,
        date,
        caption: resolve_caption(el),
        images,
    }
}

/// Post reference (`channel/123`) first, then a permalink ending in digits.
fn resolve_message_id(el: ElementRef<'_>) -> Option<i64> {
    let attrs = el.value();
    let post_ref = attrs
        .attr("data-post")
        .or_else(|| attrs.attr("data-id"))
        .or_else(|| el.select(&POST_REF_SEL).next().and_then(|e| e.value().attr("data-post")));

    post_ref
        .and_then(parse_post_ref)
        .or_else(|| permalink_id(el))
        .filter(|id| *id > 0)
}

fn parse_post_ref(raw: &str) -> Option<i64> {
    raw.trim().rsplit('/').next()?.parse().ok()
}

fn permalink_id(el: ElementRef<'_>) -> Option<i64> {
    el.select(&LINK_SEL).find_map(|a| {
        let href = normalize_url(a.value().attr("href")?);
        TRAILING_ID_RE.captures(href)?[1].parse().ok()
    })
}

fn resolve_date(el: ElementRef<'_>) -> Option<i64> {
    let raw = el
        .select(&TIME_SEL)
        .next()
        .or_else(|| el.select(&DATETIME_SEL).next())?
        .value()
        .attr("datetime")?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn resolve_caption(el: ElementRef<'_>) -> Option<String> {
    let text: String = el.select(&CAPTION_SEL).next()?.text().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

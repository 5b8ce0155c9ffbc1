use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::info;

use crate::model::{normalize_url, sort_newest_first, ImageRecord};
use crate::noise::{is_decorative_record, Strictness};

pub struct CleanupOutcome {
    pub images: Vec<ImageRecord>,
    pub decorative: usize,
    pub duplicates: usize,
}

/// Re-derive one canonical record per message from scratch.
///
/// Within a message, variants of the same normalized URL collapse to the most
/// recent one. If several distinct URLs survive, the largest image wins, with
/// the most recent date breaking ties. Records without a message id are only
/// deduplicated by URL.
pub fn canonicalize(images: Vec<ImageRecord>) -> CleanupOutcome {
    let total = images.len();
    let kept: Vec<ImageRecord> = images
        .into_par_iter()
        .filter(|img| !is_decorative_record(img, Strictness::Cleanup))
        .collect();
    let decorative = total - kept.len();

    // Groups in first-seen order so the output does not depend on hashing.
    let mut group_of: HashMap<i64, usize> = HashMap::new();
    let mut groups: Vec<Vec<ImageRecord>> = Vec::new();
    let mut orphans: Vec<ImageRecord> = Vec::new();
    for img in kept {
        if img.message_id <= 0 {
            orphans.push(img);
            continue;
        }
        let slot = *group_of.entry(img.message_id).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(img);
    }

    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(groups.len() + orphans.len());

    for group in groups {
        if let Some(best) = pick_canonical(group) {
            if seen_urls.insert(best.normalized_url().to_string()) {
                out.push(best);
            }
        }
    }

    for img in orphans {
        let key = img.normalized_url();
        if key.is_empty() {
            continue;
        }
        if seen_urls.insert(key.to_string()) {
            out.push(img);
        }
    }

    sort_newest_first(&mut out);
    let duplicates = total - decorative - out.len();
    info!(
        "Cleanup: {} -> {} images ({} decorative, {} duplicates)",
        total,
        out.len(),
        decorative,
        duplicates
    );

    CleanupOutcome {
        images: out,
        decorative,
        duplicates,
    }
}

fn pick_canonical(group: Vec<ImageRecord>) -> Option<ImageRecord> {
    let mut by_url: Vec<ImageRecord> = Vec::new();
    for img in group {
        let key = normalize_url(&img.url);
        if key.is_empty() {
            continue;
        }
        match by_url.iter_mut().find(|v| v.normalized_url() == key) {
            Some(existing) => {
                if img.date > existing.date {
                    *existing = img;
                }
            }
            None => by_url.push(img),
        }
    }

    // max_by keeps the last maximum; iterate reversed so the first-seen
    // variant wins a complete tie.
    by_url
        .into_iter()
        .rev()
        .max_by(|a, b| a.area().cmp(&b.area()).then(a.date.cmp(&b.date)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record;

    #[test]
    fn largest_variant_per_message() {
        let images = vec![
            record("mobile_42_0", 42, "https://cdn/f/42a.jpg", 300, 200, 1_000),
            record("mobile_42_1", 42, "https://cdn/f/42b.jpg", 800, 600, 1_000),
        ];
        let out = canonicalize(images);
        assert_eq!(out.images.len(), 1);
        assert_eq!((out.images[0].width, out.images[0].height), (800, 600));
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn same_url_keeps_most_recent() {
        let images = vec![
            record("mobile_42_0", 42, "https://cdn/f/42.jpg?v=1", 800, 600, 1_000),
            record("mobile_42_1", 42, "https://cdn/f/42.jpg?v=2", 800, 600, 2_000),
        ];
        let out = canonicalize(images);
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].date, 2_000);
    }

    #[test]
    fn equal_area_prefers_recent() {
        let images = vec![
            record("a", 7, "https://cdn/f/a.jpg", 800, 600, 1_000),
            record("b", 7, "https://cdn/f/b.jpg", 600, 800, 3_000),
        ];
        let out = canonicalize(images);
        assert_eq!(out.images[0].id, "b");
    }

    #[test]
    fn stored_records_without_message_id_are_orphans() {
        let raw = r#"{"images": [
            {"id": "legacy_a", "url": "https://cdn/f/x.jpg?v=1", "width": 800, "height": 600, "date": 5},
            {"id": "legacy_b", "url": "https://cdn/f/x.jpg?v=2", "width": 800, "height": 600, "date": 6},
            {"id": "mobile_3_0", "messageId": 3, "url": "https://cdn/f/y.jpg", "width": 800, "height": 600, "date": 7}
        ]}"#;
        let catalog: crate::model::Catalog = serde_json::from_str(raw).unwrap();
        let out = canonicalize(catalog.images);
        let ids: Vec<_> = out.images.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["mobile_3_0", "legacy_a"]);
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn orphans_dedup_by_url_only() {
        let images = vec![
            record("x", 0, "https://cdn/f/x.jpg", 800, 600, 5),
            record("y", 0, "https://cdn/f/x.jpg?z", 800, 600, 6),
            record("z", 0, "https://cdn/f/z.jpg", 800, 600, 7),
        ];
        let out = canonicalize(images);
        assert_eq!(out.images.len(), 2);
    }

    #[test]
    fn url_shared_across_messages_emitted_once() {
        let images = vec![
            record("a", 1, "https://cdn/f/s.jpg", 800, 600, 5),
            record("b", 2, "https://cdn/f/s.jpg", 800, 600, 6),
        ];
        let out = canonicalize(images);
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].id, "a");
    }

    #[test]
    fn drops_decorative_and_sorts() {
        let images = vec![
            record("a", 1, "https://cdn/f/a.jpg", 800, 600, 5),
            record("b", 2, "https://cdn/f/avatar.jpg", 800, 600, 6),
            record("c", 3, "https://cdn/f/c.jpg", 0, 0, 7),
            record("d", 4, "https://cdn/f/d.jpg", 1024, 768, 9),
        ];
        let out = canonicalize(images);
        assert_eq!(out.decorative, 2);
        assert_eq!(out.images.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), ["d", "a"]);
    }
}

//! Merge freshly crawled records into the stored catalog.
//!
//! Neither key is stable on its own: the image host rotates URLs under a
//! fixed message id, and the synthetic id of a given URL can shift between
//! runs when the feed markup changes. Identity is therefore resolved through
//! two indexes (record id, normalized URL) that are kept in lockstep.

use std::collections::HashMap;

use tracing::debug;

use crate::model::{normalize_url, sort_newest_first, ImageRecord};
use crate::noise::{is_decorative_record, Strictness};

#[derive(Debug)]
pub struct MergeOutcome {
    pub images: Vec<ImageRecord>,
    pub new_count: usize,
    pub updated_count: usize,
    pub filtered_count: usize,
}

#[derive(Debug, Default)]
struct IdentityIndex {
    by_id: HashMap<String, ImageRecord>,
    by_url: HashMap<String, String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Applied {
    Inserted,
    Replaced { changed: bool },
}

impl IdentityIndex {
    /// Seed from the stored catalog. The first record per normalized URL wins;
    /// later ones with the same URL are collapsed into it.
    fn seed(existing: &[ImageRecord]) -> Self {
        let mut index = Self::default();
        for img in existing {
            let key = normalize_url(&img.url).to_string();
            if index.by_url.contains_key(&key) {
                debug!("Collapsing stored duplicate {} for {}", img.id, key);
                continue;
            }
            if let Some(prev) = index.by_id.get(&img.id) {
                // Same id stored twice under different URLs; keep the first.
                debug!("Collapsing stored duplicate id {} ({})", img.id, prev.url);
                continue;
            }
            index.by_url.insert(key.clone(), img.id.clone());
            index.by_id.insert(img.id.clone(), img.clone());
            index.check(&key, &img.id);
        }
        index
    }

    fn apply(&mut self, img: ImageRecord) -> Applied {
        let key = normalize_url(&img.url).to_string();
        let id = img.id.clone();

        let applied = if let Some(old_id) = self.by_url.get(&key).cloned() {
            // Known content. The new id takes over; a different old id is stale.
            let mut changed = old_id != id;
            if changed {
                self.by_id.remove(&old_id);
            }
            if let Some(prev) = self.by_id.get(&id) {
                let prev_key = normalize_url(&prev.url);
                if prev_key != key {
                    self.by_url.remove(prev_key);
                }
                changed |= *prev != img;
            }
            self.by_url.insert(key.clone(), id.clone());
            self.by_id.insert(id.clone(), img);
            Applied::Replaced { changed }
        } else if let Some(prev) = self.by_id.get(&id) {
            // Same message slot, rotated URL.
            let prev_key = normalize_url(&prev.url).to_string();
            self.by_url.remove(&prev_key);
            self.by_url.insert(key.clone(), id.clone());
            self.by_id.insert(id.clone(), img);
            Applied::Replaced { changed: true }
        } else {
            self.by_url.insert(key.clone(), id.clone());
            self.by_id.insert(id.clone(), img);
            Applied::Inserted
        };

        self.check(&key, &id);
        applied
    }

    /// Both directions must agree for the entry just written.
    fn check(&self, key: &str, id: &str) {
        let record = self.by_id.get(id);
        debug_assert!(record.is_some(), "id index lost {}", id);
        debug_assert_eq!(
            record.map(|r| normalize_url(&r.url)),
            Some(key),
            "id {} does not point back at {}",
            id,
            key
        );
        debug_assert_eq!(self.by_url.get(key).map(String::as_str), Some(id));
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.by_url.len() == self.by_id.len()
            && self
                .by_id
                .iter()
                .all(|(id, r)| self.by_url.get(normalize_url(&r.url)) == Some(id))
    }

    fn into_records(self) -> Vec<ImageRecord> {
        self.by_id.into_values().collect()
    }
}

pub fn merge(existing: &[ImageRecord], incoming: Vec<ImageRecord>) -> MergeOutcome {
    let mut index = IdentityIndex::seed(existing);
    let mut new_count = 0;
    let mut updated_count = 0;

    for img in incoming {
        match index.apply(img) {
            Applied::Inserted => new_count += 1,
            Applied::Replaced { changed: true } => updated_count += 1,
            Applied::Replaced { changed: false } => {}
        }
    }

    let merged = index.into_records();
    let before = merged.len();
    let mut images: Vec<ImageRecord> = merged
        .into_iter()
        .filter(|img| !is_decorative_record(img, Strictness::Cleanup))
        .collect();
    let filtered_count = before - images.len();
    sort_newest_first(&mut images);

    MergeOutcome {
        images,
        new_count,
        updated_count,
        filtered_count,
    }
}

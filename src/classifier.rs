//! Task classification
//!
//! Partitions discovered items into strategy buckets. Classification of an item
//! depends only on its own metadata and the active filters, so a resumed run
//! reclassifies exactly like the run it resumes.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::checkpoint::CheckpointRecord;
use crate::types::{Bucket, Item, StrategyKind, Task, TaskKey};

/// MIME type of shortcut items, which point at other items and are never downloaded
pub const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";

/// Prefix of native cloud documents that must be exported rather than fetched
pub const NATIVE_DOCUMENT_PREFIX: &str = "application/vnd.google-apps.";

/// MIME types a browser can render page by page
const PAGE_RENDERABLE_MIMES: &[&str] = &["application/pdf"];

/// User-selected inclusion filters
///
/// Filters only narrow the classifier's output. When both `only_videos` and
/// `only_docs` are set, `only_docs` wins and no video is kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    /// Keep only video items
    #[serde(default)]
    pub only_videos: bool,
    /// Drop video items
    #[serde(default)]
    pub only_docs: bool,
    /// Drop items eligible for direct download
    #[serde(default)]
    pub only_view_only: bool,
}

impl Filters {
    /// Log the active filter combination, warning about conflicting flags
    pub fn log_active(&self) {
        if self.only_videos && self.only_docs {
            tracing::warn!("Both only-videos and only-docs are set; only-docs takes precedence");
        }
        if self.only_videos || self.only_docs || self.only_view_only {
            tracing::info!(
                only_videos = self.only_videos,
                only_docs = self.only_docs,
                only_view_only = self.only_view_only,
                "Inclusion filters active"
            );
        }
    }

    fn admits(&self, item: &Item) -> bool {
        let video = is_video(&item.mime_type);
        if self.only_videos && !video {
            return false;
        }
        if self.only_docs && video {
            return false;
        }
        if self.only_view_only && item.can_download && !is_shortcut(&item.mime_type) {
            return false;
        }
        true
    }
}

/// Where a single item goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Dispatch with this strategy
    Strategy(StrategyKind),
    /// No strategy can handle it
    Unsupported,
    /// Excluded by the inclusion filters
    Filtered,
}

/// Decide the placement of one item from its own metadata and the filters
pub fn place(item: &Item, filters: &Filters) -> Placement {
    if !filters.admits(item) {
        return Placement::Filtered;
    }
    if is_shortcut(&item.mime_type) {
        return Placement::Unsupported;
    }

    if item.can_download {
        if item.mime_type.starts_with(NATIVE_DOCUMENT_PREFIX) {
            Placement::Strategy(StrategyKind::ExportConvert)
        } else {
            Placement::Strategy(StrategyKind::DirectFetch)
        }
    } else if is_video(&item.mime_type) {
        Placement::Strategy(StrategyKind::BrowserMediaExtract)
    } else if PAGE_RENDERABLE_MIMES.contains(&item.mime_type.as_str()) {
        Placement::Strategy(StrategyKind::BrowserPageCapture)
    } else {
        Placement::Unsupported
    }
}

/// Output of [`classify`]: disjoint buckets plus bookkeeping counts
#[derive(Clone, Debug, Default)]
pub struct Classification {
    /// Direct downloads and exports, in discovery order
    pub direct_fetch: Vec<Task>,
    /// Browser media extractions, in discovery order
    pub browser_media: Vec<Task>,
    /// Browser page captures, in discovery order
    pub browser_capture: Vec<Task>,
    /// Items no strategy can handle
    pub unsupported: Vec<Item>,
    /// Keys skipped because the checkpoint lists them as completed
    pub skipped: Vec<TaskKey>,
    /// Skipped keys counted by the bucket they would have gone to
    pub skipped_per_bucket: HashMap<Bucket, usize>,
    /// Items excluded by the inclusion filters
    pub filtered_out: usize,
    /// Items dropped because an earlier item had the same key
    pub duplicates: usize,
}

impl Classification {
    /// Tasks of a dispatchable bucket
    pub fn tasks(&self, bucket: Bucket) -> &[Task] {
        match bucket {
            Bucket::DirectFetch => &self.direct_fetch,
            Bucket::BrowserMedia => &self.browser_media,
            Bucket::BrowserCapture => &self.browser_capture,
            Bucket::Unsupported => &[],
        }
    }

    /// Take the tasks of a dispatchable bucket, leaving it empty
    pub fn take_tasks(&mut self, bucket: Bucket) -> Vec<Task> {
        match bucket {
            Bucket::DirectFetch => std::mem::take(&mut self.direct_fetch),
            Bucket::BrowserMedia => std::mem::take(&mut self.browser_media),
            Bucket::BrowserCapture => std::mem::take(&mut self.browser_capture),
            Bucket::Unsupported => Vec::new(),
        }
    }

    /// Skipped keys that belong to `bucket`
    pub fn skipped_in(&self, bucket: Bucket) -> usize {
        self.skipped_per_bucket.get(&bucket).copied().unwrap_or(0)
    }

    /// Number of tasks that will be dispatched
    pub fn pending(&self) -> usize {
        self.direct_fetch.len() + self.browser_media.len() + self.browser_capture.len()
    }

    /// Strategies with at least one pending task
    pub fn strategies_in_use(&self) -> Vec<StrategyKind> {
        let mut kinds: Vec<StrategyKind> = Bucket::DISPATCHABLE
            .iter()
            .flat_map(|bucket| self.tasks(*bucket).iter().map(|task| task.strategy))
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// Partition discovered items into strategy buckets
///
/// Items whose key is in the checkpoint's completed set are skipped; keys in the
/// failed set are dispatched again. Stale checkpoint keys that match no item are
/// ignored. Pure: no I/O, no shared state.
pub fn classify(
    items: &[Item],
    checkpoint: Option<&CheckpointRecord>,
    filters: &Filters,
) -> Classification {
    let mut out = Classification::default();
    let mut seen: HashSet<TaskKey> = HashSet::with_capacity(items.len());

    for item in items {
        let key = item.key();
        if !seen.insert(key.clone()) {
            tracing::warn!(task_key = %key, "Duplicate item in discovery, ignoring");
            out.duplicates += 1;
            continue;
        }

        if checkpoint.is_some_and(|record| record.is_completed(&key)) {
            let bucket = match place(item, &Filters::default()) {
                Placement::Strategy(kind) => kind.bucket(),
                Placement::Unsupported | Placement::Filtered => Bucket::Unsupported,
            };
            *out.skipped_per_bucket.entry(bucket).or_default() += 1;
            out.skipped.push(key);
            continue;
        }

        match place(item, filters) {
            Placement::Filtered => out.filtered_out += 1,
            Placement::Unsupported => out.unsupported.push(item.clone()),
            Placement::Strategy(kind) => {
                let task = Task::new(item.clone(), kind);
                match kind.bucket() {
                    Bucket::DirectFetch => out.direct_fetch.push(task),
                    Bucket::BrowserMedia => out.browser_media.push(task),
                    Bucket::BrowserCapture => out.browser_capture.push(task),
                    Bucket::Unsupported => out.unsupported.push(item.clone()),
                }
            }
        }
    }

    tracing::debug!(
        direct_fetch = out.direct_fetch.len(),
        browser_media = out.browser_media.len(),
        browser_capture = out.browser_capture.len(),
        unsupported = out.unsupported.len(),
        skipped = out.skipped.len(),
        filtered_out = out.filtered_out,
        "Classification complete"
    );
    out
}

fn is_video(mime_type: &str) -> bool {
    mime_type.contains("video")
}

fn is_shortcut(mime_type: &str) -> bool {
    mime_type == SHORTCUT_MIME
}

//! Item and configuration fixtures

use bulk_dl::{Bucket, Config, Item, TaskKey};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Configuration with a checkpoint dir under `root` and millisecond backoff
pub fn fast_config(root: &Path) -> Config {
    let mut config = Config {
        checkpoint_dir: root.join("checkpoints"),
        ..Config::default()
    };
    for bucket in Bucket::DISPATCHABLE {
        if let Some(cfg) = config.bucket_mut(bucket) {
            cfg.retry.initial_delay = Duration::from_millis(1);
            cfg.retry.max_delay = Duration::from_millis(5);
        }
    }
    config
}

/// A directly downloadable PDF
pub fn file(dest: &Path, id: &str) -> Item {
    let name = format!("{id}.pdf");
    Item {
        id: id.to_string(),
        destination: dest.join(&name),
        name,
        mime_type: "application/pdf".to_string(),
        can_download: true,
    }
}

/// A view-only video
pub fn view_only_video(dest: &Path, id: &str) -> Item {
    let name = format!("{id}.mp4");
    Item {
        id: id.to_string(),
        destination: dest.join(&name),
        name,
        mime_type: "video/mp4".to_string(),
        can_download: false,
    }
}

/// A view-only PDF
pub fn view_only_pdf(dest: &Path, id: &str) -> Item {
    let name = format!("{id}.pdf");
    Item {
        id: id.to_string(),
        destination: dest.join(&name),
        name,
        mime_type: "application/pdf".to_string(),
        can_download: false,
    }
}

/// Downloadable files `item1..=itemN`
pub fn files(dest: &Path, range: std::ops::RangeInclusive<usize>) -> Vec<Item> {
    range.map(|i| file(dest, &format!("item{i}"))).collect()
}

/// Keys of `items`
pub fn keys(items: &[Item]) -> BTreeSet<TaskKey> {
    items.iter().map(Item::key).collect()
}

//! Operator-facing command line arguments
//!
//! The embedding binary parses [`RunArgs`], discovers the scope's items and
//! hands the result to the scheduler:
//!
//! ```no_run
//! use bulk_dl::cli::RunArgs;
//! use bulk_dl::scheduler::Scheduler;
//! use bulk_dl::strategy::StrategySet;
//! use clap::Parser;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(strategies: StrategySet) -> bulk_dl::Result<()> {
//! let args = RunArgs::parse();
//! let cancel = CancellationToken::new();
//! bulk_dl::spawn_signal_listener(cancel.clone());
//!
//! let scheduler = Scheduler::new(args.config(), strategies, cancel)?;
//! let items = Vec::new(); // from discovery
//! let summary = scheduler.run(args.request(items)).await?;
//! # Ok(())
//! # }
//! ```

use clap::Parser;
use std::path::PathBuf;

use crate::classifier::Filters;
use crate::config::{Config, clamp_workers};
use crate::scheduler::{RunOptions, RunRequest};
use crate::types::{Bucket, Item};

/// Download every item of a scope, resuming where a previous run stopped
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "bulk-dl", version, long_about = None)]
pub struct RunArgs {
    /// Scope to download (folder or collection id)
    pub scope: String,

    /// Directory the artifacts are written to
    pub destination: PathBuf,

    /// Skip items a previous run completed
    #[arg(long)]
    pub resume: bool,

    /// Delete the scope's checkpoint before starting
    #[arg(long)]
    pub clear_checkpoint: bool,

    /// Parallel direct downloads (1-20)
    #[arg(short, long, env = "BULK_DL_WORKERS")]
    pub workers: Option<usize>,

    /// Parallel browser media extractions (1-20)
    #[arg(long)]
    pub media_workers: Option<usize>,

    /// Parallel browser page captures (1-20)
    #[arg(long)]
    pub capture_workers: Option<usize>,

    /// Download only video items
    #[arg(long)]
    pub only_videos: bool,

    /// Skip video items (wins over --only-videos)
    #[arg(long)]
    pub only_docs: bool,

    /// Only items that cannot be downloaded directly
    #[arg(long)]
    pub only_view_only: bool,

    /// Where checkpoint files are kept
    #[arg(long, env = "BULK_DL_CHECKPOINT_DIR")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Keep the checkpoint even when everything succeeded
    #[arg(long)]
    pub keep_checkpoint: bool,
}

impl RunArgs {
    /// Default configuration with the command line overrides applied
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        self.apply_to(&mut config);
        config
    }

    /// Apply the command line overrides to `config`
    ///
    /// Worker counts outside the allowed range are clamped with a warning.
    pub fn apply_to(&self, config: &mut Config) {
        let overrides = [
            (Bucket::DirectFetch, self.workers),
            (Bucket::BrowserMedia, self.media_workers),
            (Bucket::BrowserCapture, self.capture_workers),
        ];
        for (bucket, requested) in overrides {
            if let (Some(requested), Some(cfg)) = (requested, config.bucket_mut(bucket)) {
                cfg.concurrency = clamp_workers(requested);
            }
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
    }

    /// Inclusion filters
    pub fn filters(&self) -> Filters {
        Filters {
            only_videos: self.only_videos,
            only_docs: self.only_docs,
            only_view_only: self.only_view_only,
        }
    }

    /// Checkpoint handling
    pub fn options(&self) -> RunOptions {
        RunOptions {
            resume: self.resume,
            clear_checkpoint: self.clear_checkpoint,
            clear_on_success: !self.keep_checkpoint,
        }
    }

    /// Run request for the discovered `items`
    pub fn request(&self, items: Vec<Item>) -> RunRequest {
        RunRequest::new(self.scope.clone(), self.destination.clone(), items)
            .with_filters(self.filters())
            .with_options(self.options())
    }
}

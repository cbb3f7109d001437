//! Pass orchestration
//!
//! Passes run strictly in order, each fully committed before the next starts:
//!
//! 1. hash index build (source)
//! 2. namespace stripping (source -> destination)
//! 3. legacy canonical cleanup (destination)
//! 4. tip selection and canonical walk, with optional repair and head
//!    pointer update
//! 5. final canonical scan and parent-link verification
//!
//! The caller owns the `RunReport`, so counters survive a failed or
//! cancelled run.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch_writer::BatchCommitter;
use crate::canonical_chain::CanonicalWalker;
use crate::config::EngineSettings;
use crate::error::{EngineError, Result};
use crate::hash_index::build_hash_index;
use crate::legacy::LegacyCanonicalCleanup;
use crate::metrics;
use crate::report::{RunReport, TipSource, TipSummary, WalkSummary};
use crate::store::{DestStore, SourceStore};
use crate::stripper::NamespaceStripper;
use crate::tip_finder::{CanonicalScan, TipFinder};

/// Which passes a run includes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub strip: bool,
    pub cleanup_legacy: bool,
    pub walk: bool,
    pub verify: bool,
}

impl Stages {
    pub const ALL: Stages = Stages {
        strip: true,
        cleanup_legacy: true,
        walk: true,
        verify: true,
    };
    pub const STRIP: Stages = Stages {
        strip: true,
        cleanup_legacy: false,
        walk: false,
        verify: false,
    };
    pub const CLEANUP_LEGACY: Stages = Stages {
        strip: false,
        cleanup_legacy: true,
        walk: false,
        verify: false,
    };
    pub const WALK: Stages = Stages {
        strip: false,
        cleanup_legacy: false,
        walk: true,
        verify: false,
    };
    pub const VERIFY: Stages = Stages {
        strip: false,
        cleanup_legacy: false,
        walk: false,
        verify: true,
    };

    fn writes(&self) -> bool {
        self.strip || self.cleanup_legacy || self.walk
    }
}

pub struct Pipeline {
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(settings: EngineSettings, cancel: CancellationToken) -> Self {
        metrics::register_metrics();
        Self { settings, cancel }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run the selected passes, filling `report` as they go
    pub async fn run(&self, stages: Stages, report: &mut RunReport) -> Result<()> {
        let timer = metrics::Timer::new();
        report.dry_run = self.settings.dry_run;

        let result = self.run_passes(stages, report).await;

        report.duration_secs = timer.elapsed_secs();
        if let Err(EngineError::Cancelled { .. }) = &result {
            report.cancelled = true;
        }
        report.finalize_counts();
        report.log_summary();

        if let Some(path) = &self.settings.metrics_file {
            if let Err(e) = std::fs::write(path, metrics::gather_text()) {
                warn!(path = %path.display(), error = %e, "Failed to write metrics file");
            }
        }

        if let Err(e) = &result {
            error!(error = %e, "Run aborted");
        }
        result
    }

    fn open_dest(&self, stages: Stages) -> Result<Option<DestStore>> {
        let path = &self.settings.dest_path;
        if stages.writes() && !self.settings.dry_run {
            return DestStore::open(path, false).map(Some);
        }
        if path.exists() {
            DestStore::open(path, true).map(Some)
        } else {
            warn!(path = %path.display(), "Destination does not exist; destination passes will be skipped");
            Ok(None)
        }
    }

    fn committer(&self, dest: Option<&DestStore>) -> Result<BatchCommitter> {
        match dest {
            Some(dest) if !dest.is_read_only() => {
                BatchCommitter::new(dest, self.settings.batch_size, self.cancel.clone())
            }
            _ => Ok(BatchCommitter::dry_run(self.settings.batch_size, self.cancel.clone())),
        }
    }

    fn check_cancelled(&self, committer: &BatchCommitter) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                committed_ops: committer.committed_ops(),
            });
        }
        Ok(())
    }

    async fn run_passes(&self, stages: Stages, report: &mut RunReport) -> Result<()> {
        let dest = self.open_dest(stages)?;
        let mut committer = self.committer(dest.as_ref())?;

        let result = self.run_with(stages, dest.as_ref(), &mut committer, report).await;
        report.committed_ops = committer.committed_ops();
        if let Err(e) = result {
            let dropped = committer.discard();
            if dropped > 0 {
                warn!(dropped, "Discarded uncommitted operations after failure");
            }
            return Err(e);
        }

        committer.finish().await?;
        Ok(())
    }

    async fn run_with(
        &self,
        stages: Stages,
        dest: Option<&DestStore>,
        committer: &mut BatchCommitter,
        report: &mut RunReport,
    ) -> Result<()> {
        if stages.strip {
            self.check_cancelled(committer)?;
            self.strip(committer, report).await?;
        }

        let Some(dest) = dest else {
            if stages.cleanup_legacy || stages.walk || stages.verify {
                warn!("No destination to inspect; skipping cleanup, walk and verification");
            }
            return Ok(());
        };

        if stages.cleanup_legacy && self.settings.cleanup_legacy {
            self.check_cancelled(committer)?;
            LegacyCanonicalCleanup::new(dest, self.settings.schema())
                .run(committer, &mut report.legacy)
                .await?;
        }

        if stages.walk {
            self.check_cancelled(committer)?;
            self.walk(dest, committer, report).await?;
        }

        if stages.verify {
            self.check_cancelled(committer)?;
            let finder = TipFinder::new(dest, self.settings.schema());
            let scan = finder.scan_canonical()?;
            report.apply_scan(&scan);
            let index = finder.canonical_index()?;
            report.links = Some(finder.verify_links(&index)?);
        }

        Ok(())
    }

    async fn strip(&self, committer: &mut BatchCommitter, report: &mut RunReport) -> Result<()> {
        let source = SourceStore::open(&self.settings.source_path, self.settings.source_format)?;
        let options = &self.settings.stripper;

        let (index, stats) = build_hash_index(&source, options.envelope, options.namespace_id.as_deref())?;
        report.hash_index = stats;

        self.check_cancelled(committer)?;
        NamespaceStripper::new(options, &index)
            .run(&source, committer, &mut report.strip)
            .await
    }

    fn pick_tip(&self, finder: &TipFinder<'_>, scan: &CanonicalScan) -> Result<Option<TipSummary>> {
        if let Some((height, hash)) = self.settings.tip {
            return Ok(Some(TipSummary {
                height,
                hash,
                source: TipSource::Configured,
            }));
        }
        if let (Some(height), Some(hash)) = (scan.max_height, scan.tip_hash) {
            return Ok(Some(TipSummary {
                height,
                hash,
                source: TipSource::CanonicalRecords,
            }));
        }
        Ok(finder.find_header_tip()?.map(|tip| TipSummary {
            height: tip.height,
            hash: tip.hash,
            source: TipSource::HeaderRecords,
        }))
    }

    async fn walk(&self, dest: &DestStore, committer: &mut BatchCommitter, report: &mut RunReport) -> Result<()> {
        let schema = self.settings.schema();
        let finder = TipFinder::new(dest, schema);
        let scan = finder.scan_canonical()?;
        report.apply_scan(&scan);

        let Some(tip) = self.pick_tip(&finder, &scan)? else {
            warn!("No canonical or header records found; nothing to walk");
            return Ok(());
        };
        report.tip = Some(tip);
        info!(height = tip.height, source = ?tip.source, "Tip selected");

        let walker = CanonicalWalker::new(dest, schema, self.settings.verify_header_hash);
        let outcome = walker.walk(tip.height, tip.hash)?;
        report.walk = Some(WalkSummary::new(&outcome, walker.lookups()));

        if dest.is_read_only() {
            info!(entries = outcome.index().len(), "Dry run: canonical repair and head pointers skipped");
            return Ok(());
        }
        if self.settings.repair_canonical {
            walker.repair(outcome.index(), committer, &mut report.repair).await?;
        }

        if self.settings.head_keys.is_empty() {
            return Ok(());
        }
        if !outcome.is_complete() {
            warn!(tip = tip.height, "Walk did not reach genesis; head pointers left unchanged");
            return Ok(());
        }
        report.head_pointers_written = walker
            .write_head_pointers(tip.hash, &self.settings.head_keys, committer)
            .await?;
        report.head_height = Some(tip.height);
        Ok(())
    }
}

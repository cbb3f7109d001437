//! Run report
//!
//! Every pass writes its counters here. The report is produced even for
//! partial walks and cancelled runs so an operator can judge the output.

use alloy_primitives::B256;
use serde::Serialize;
use tracing::{info, warn};

use crate::canonical_chain::{RepairStats, StopReason, WalkOutcome};
use crate::hash_index::HashIndexStats;
use crate::legacy::LegacyStats;
use crate::stripper::StripStats;
use crate::tip_finder::{CanonicalScan, GapRange, LinkReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TipSource {
    Configured,
    CanonicalRecords,
    HeaderRecords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TipSummary {
    pub height: u64,
    pub hash: B256,
    pub source: TipSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    pub complete: bool,
    pub entries: usize,
    pub reached_height: Option<u64>,
    pub missing_at: Option<u64>,
    pub reason: Option<StopReason>,
    pub lookups: u64,
}

impl WalkSummary {
    pub fn new(outcome: &WalkOutcome, lookups: u64) -> Self {
        match outcome {
            WalkOutcome::Complete(index) => Self {
                complete: true,
                entries: index.len(),
                reached_height: index.keys().next().copied(),
                missing_at: None,
                reason: None,
                lookups,
            },
            WalkOutcome::Partial(partial) => Self {
                complete: false,
                entries: partial.index.len(),
                reached_height: partial.reached_height,
                missing_at: Some(partial.missing_at),
                reason: Some(partial.reason),
                lookups,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub cancelled: bool,

    pub hash_index: HashIndexStats,

    #[serde(flatten)]
    pub strip: StripStats,

    #[serde(flatten)]
    pub legacy: LegacyStats,

    /// Canonical records written by any pass (copied, resolved, converted or repaired)
    pub canonical_keys_written: u64,
    pub repair: RepairStats,

    pub tip: Option<TipSummary>,
    pub walk: Option<WalkSummary>,
    /// Tip height the head keys now point at
    pub head_height: Option<u64>,
    pub head_pointers_written: u64,

    pub max_height_found: Option<u64>,
    /// Heights in `[0, max_height_found]` with no canonical record
    pub gaps_found: u64,
    pub gaps: Vec<GapRange>,
    pub canonical_records: u64,
    pub canonical_records_malformed: u64,
    pub links: Option<LinkReport>,

    pub committed_ops: u64,
    pub duration_secs: f64,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Record the latest canonical scan (the final one wins)
    pub fn apply_scan(&mut self, scan: &CanonicalScan) {
        self.max_height_found = scan.max_height;
        self.gaps_found = scan.missing_heights;
        self.gaps = scan.gaps.clone();
        self.canonical_records = scan.count;
        self.canonical_records_malformed = scan.malformed;
    }

    pub fn finalize_counts(&mut self) {
        self.canonical_keys_written = self.strip.per_tag.get("canonical").copied().unwrap_or(0)
            + self.legacy.canonical_keys_converted_legacy
            + self.repair.canonical_keys_written
            + self.repair.canonical_keys_corrected;
    }

    /// Whether the destination can be trusted as a complete canonical chain
    pub fn is_clean(&self) -> bool {
        self.walk.as_ref().is_some_and(|w| w.complete)
            && self.gaps_found == 0
            && self.links.as_ref().map_or(true, |l| l.is_continuous())
    }

    pub fn log_summary(&self) {
        info!(
            scanned = self.strip.records_scanned,
            migrated = self.strip.records_migrated,
            malformed = self.strip.records_skipped_malformed,
            ambiguous = self.strip.records_skipped_ambiguous,
            unresolved = self.strip.records_skipped_unresolved,
            out_of_scope = self.strip.records_skipped_out_of_scope,
            "Record summary"
        );
        info!(
            canonical_written = self.canonical_keys_written,
            legacy_removed = self.legacy.canonical_keys_removed_legacy,
            max_height = ?self.max_height_found,
            gaps = self.gaps_found,
            committed_ops = self.committed_ops,
            dry_run = self.dry_run,
            duration_secs = format!("{:.2}", self.duration_secs),
            "Run summary"
        );

        if self.cancelled {
            warn!("Run was cancelled; destination holds the committed prefix only");
        }
        if let Some(walk) = &self.walk {
            if !walk.complete {
                warn!(
                    reached_height = ?walk.reached_height,
                    missing_at = ?walk.missing_at,
                    reason = ?walk.reason,
                    "Canonical walk is partial"
                );
            }
        }
    }
}

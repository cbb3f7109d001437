/// Canonical Chain Walker
///
/// Rebuilds the height -> hash index by following parent pointers from a
/// known tip back to genesis, using only point lookups against the
/// destination's header records.
///
/// Algorithm:
/// 1. Fetch the header stored at `(height, hash)`
/// 2. Check its number (and optionally its keccak hash)
/// 3. Record `height -> hash` only once the header is confirmed
/// 4. Continue with `(height - 1, parent_hash)` until genesis
///
/// A missing or inconsistent header ends the walk with a `PartialResult`
/// describing how far it got; it never aborts the run.
use std::cell::Cell;
use std::collections::BTreeMap;

use alloy_primitives::B256;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch_writer::BatchCommitter;
use crate::constants::is_genesis_height;
use crate::error::Result;
use crate::header::HeaderRecord;
use crate::key_codec::{encode_height, DestinationSchema};
use crate::metrics;
use crate::store::DestStore;
use crate::telemetry::short_hex;

/// Height -> hash, ordered by height
pub type CanonicalIndex = BTreeMap<u64, B256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MissingHeader,
    /// Header value is not a decodable RLP header
    UndecodableHeader,
    NumberMismatch,
    HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResult {
    /// Heights verified before the walk stopped
    pub index: CanonicalIndex,
    /// Lowest verified height, `None` if nothing was verified
    pub reached_height: Option<u64>,
    pub missing_at: u64,
    pub reason: StopReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Unbroken from the tip down to genesis
    Complete(CanonicalIndex),
    Partial(PartialResult),
}

impl WalkOutcome {
    pub fn index(&self) -> &CanonicalIndex {
        match self {
            WalkOutcome::Complete(index) => index,
            WalkOutcome::Partial(partial) => &partial.index,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, WalkOutcome::Complete(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub canonical_keys_written: u64,
    pub canonical_keys_corrected: u64,
    pub hash_keys_written: u64,
}

pub struct CanonicalWalker<'a> {
    dest: &'a DestStore,
    schema: &'a DestinationSchema,
    verify_header_hash: bool,
    lookups: Cell<u64>,
}

impl<'a> CanonicalWalker<'a> {
    pub fn new(dest: &'a DestStore, schema: &'a DestinationSchema, verify_header_hash: bool) -> Self {
        Self {
            dest,
            schema,
            verify_header_hash,
            lookups: Cell::new(0),
        }
    }

    /// Header lookups performed by all walks so far
    pub fn lookups(&self) -> u64 {
        self.lookups.get()
    }

    /// Walk parent pointers from `(tip_height, tip_hash)` towards genesis.
    ///
    /// Only store read errors are returned as `Err`.
    pub fn walk(&self, tip_height: u64, tip_hash: B256) -> Result<WalkOutcome> {
        let mut index = CanonicalIndex::new();
        let mut height = tip_height;
        let mut hash = tip_hash;

        info!(tip_height, tip_hash = %short_hex(tip_hash.as_slice()), "Walking canonical chain");

        loop {
            self.lookups.set(self.lookups.get() + 1);
            metrics::WALK_STEPS.inc();

            let key = self.schema.header_key(height, &hash);
            let stop = match self.dest.get(&key)? {
                None => Some(StopReason::MissingHeader),
                Some(value) => match HeaderRecord::decode(&value) {
                    Err(e) => {
                        debug!(height, error = %e, "Header decode failed");
                        Some(StopReason::UndecodableHeader)
                    }
                    Ok(header) if header.number != height => {
                        warn!(height, found = header.number, "Header number does not match its key");
                        Some(StopReason::NumberMismatch)
                    }
                    Ok(header) if self.verify_header_hash && header.hash != hash => {
                        warn!(height, computed = %short_hex(header.hash.as_slice()), "Header hash does not match its key");
                        Some(StopReason::HashMismatch)
                    }
                    Ok(header) => {
                        index.insert(height, hash);
                        if is_genesis_height(height) {
                            info!(entries = index.len(), "Canonical walk reached genesis");
                            return Ok(WalkOutcome::Complete(index));
                        }
                        height -= 1;
                        hash = header.parent_hash;
                        if index.len() % 100_000 == 0 {
                            debug!(walked = index.len(), height, "Canonical walk progress");
                        }
                        None
                    }
                },
            };

            if let Some(reason) = stop {
                let reached_height = if index.is_empty() { None } else { Some(height + 1) };
                warn!(
                    missing_at = height,
                    hash = %short_hex(hash.as_slice()),
                    reached_height = ?reached_height,
                    reason = ?reason,
                    "Canonical walk stopped before genesis"
                );
                return Ok(WalkOutcome::Partial(PartialResult {
                    index,
                    reached_height,
                    missing_at: height,
                    reason,
                }));
            }
        }
    }

    /// Make the destination's canonical and hash->height records agree with
    /// a walked index.
    pub async fn repair(
        &self,
        index: &CanonicalIndex,
        committer: &mut BatchCommitter,
        stats: &mut RepairStats,
    ) -> Result<()> {
        for (&height, hash) in index {
            let canonical_key = self.schema.canonical_key(height);
            match self.dest.get(&canonical_key)? {
                None => {
                    committer.put(canonical_key, hash.to_vec());
                    stats.canonical_keys_written += 1;
                    metrics::CANONICAL_KEYS_WRITTEN.inc();
                }
                Some(existing) if existing.as_slice() != hash.as_slice() => {
                    debug!(
                        height,
                        old = %short_hex(&existing),
                        new = %short_hex(hash.as_slice()),
                        "Correcting canonical record"
                    );
                    committer.put(canonical_key, hash.to_vec());
                    stats.canonical_keys_corrected += 1;
                    metrics::CANONICAL_KEYS_WRITTEN.inc();
                }
                Some(_) => {}
            }

            let number_key = self.schema.hash_to_number_key(hash);
            if self.dest.get(&number_key)?.is_none() {
                committer.put(number_key, encode_height(height).to_vec());
                stats.hash_keys_written += 1;
            }

            committer.maybe_commit().await?;
        }
        committer.commit().await?;

        info!(
            written = stats.canonical_keys_written,
            corrected = stats.canonical_keys_corrected,
            hash_keys = stats.hash_keys_written,
            "Canonical repair complete"
        );
        Ok(())
    }

    /// Point each raw head key (`LastBlock`, `LastHeader`, ...) at `hash`.
    ///
    /// Returns the number of keys that changed.
    pub async fn write_head_pointers(
        &self,
        hash: B256,
        keys: &[Vec<u8>],
        committer: &mut BatchCommitter,
    ) -> Result<u64> {
        let mut written = 0u64;
        for key in keys {
            if self.dest.get(key)?.as_deref() == Some(hash.as_slice()) {
                continue;
            }
            committer.put(key.clone(), hash.to_vec());
            written += 1;
        }
        committer.commit().await?;

        info!(head = %short_hex(hash.as_slice()), written, "Head pointers updated");
        Ok(written)
    }
}

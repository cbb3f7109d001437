//! Hash -> height index
//!
//! Built in a single forward pass over the source's `'H'` records and then
//! frozen. Entries are kept ordered by hash so prefix lookups are range scans
//! with a deterministic result order.

use std::collections::BTreeMap;
use std::ops::Bound;

use alloy_primitives::B256;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::constants::{HASH_LEN, HEIGHT_LEN, TAG_HASH_TO_NUMBER};
use crate::error::Result;
use crate::key_codec::{decode_height, Envelope};
use crate::metrics;
use crate::store::{ScanRange, SourceStore};
use crate::telemetry::{short_hex, ProgressCounter};

/// Immutable hash -> height index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashIndex {
    entries: BTreeMap<B256, u64>,
}

impl HashIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, hash: &B256) -> Option<u64> {
        self.entries.get(hash).copied()
    }

    /// All entries whose hash starts with `prefix`, in hash order
    pub fn prefix_matches<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (B256, u64)> + 'a {
        let mut lower = B256::ZERO;
        let take = prefix.len().min(HASH_LEN);
        lower.0[..take].copy_from_slice(&prefix[..take]);

        self.entries
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(move |(hash, _)| hash.as_slice().starts_with(prefix))
            .map(|(hash, height)| (*hash, *height))
    }

}

impl FromIterator<(B256, u64)> for HashIndex {
    fn from_iter<I: IntoIterator<Item = (B256, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HashIndexStats {
    /// `'H'` records seen
    pub scanned: u64,
    pub inserted: u64,
    /// Wrong hash or value width
    pub malformed: u64,
    /// Same hash seen again with a different height (last writer wins)
    pub conflicting: u64,
    /// `'H'` records outside the configured namespace
    pub out_of_scope: u64,
}

/// Incremental builder; feed it every source record, then `finish`.
pub struct HashIndexBuilder {
    envelope: Envelope,
    namespace_id: Option<Vec<u8>>,
    entries: BTreeMap<B256, u64>,
    stats: HashIndexStats,
}

impl HashIndexBuilder {
    /// With a `namespace_id`, only keys starting with it are indexed
    pub fn new(envelope: Envelope, namespace_id: Option<&[u8]>) -> Self {
        Self {
            envelope,
            namespace_id: namespace_id.map(<[u8]>::to_vec),
            entries: BTreeMap::new(),
            stats: HashIndexStats::default(),
        }
    }

    /// Inspect one namespaced record; anything but a hash->height record is ignored
    pub fn observe(&mut self, key: &[u8], value: &[u8]) {
        let Ok(stripped) = self.envelope.strip(key) else {
            return;
        };
        let logical = stripped.logical;
        if logical.tag != TAG_HASH_TO_NUMBER {
            return;
        }
        if let Some(ns) = &self.namespace_id {
            if !key.starts_with(ns) {
                self.stats.out_of_scope += 1;
                return;
            }
        }
        self.stats.scanned += 1;

        if logical.payload.len() != HASH_LEN || value.len() != HEIGHT_LEN {
            self.stats.malformed += 1;
            if self.stats.malformed <= 10 {
                warn!(
                    key = %short_hex(key),
                    payload_len = logical.payload.len(),
                    value_len = value.len(),
                    "Malformed hash->height record"
                );
            }
            return;
        }

        let hash = B256::from_slice(logical.payload);
        let height = decode_height(value);
        match self.entries.insert(hash, height) {
            Some(previous) if previous != height => {
                self.stats.conflicting += 1;
                warn!(hash = %short_hex(hash.as_slice()), previous, height, "Conflicting hash->height records");
            }
            Some(_) => {}
            None => self.stats.inserted += 1,
        }
    }

    pub fn finish(self) -> (HashIndex, HashIndexStats) {
        (HashIndex { entries: self.entries }, self.stats)
    }
}

/// Narrowest source range that can contain `tag` records.
///
/// Only a configured namespace id covering the whole prefix lets the scan be
/// bounded; otherwise the envelope is opaque and every record must be visited.
pub fn source_range_for_tag(envelope: &Envelope, namespace_id: Option<&[u8]>, tag: u8) -> ScanRange {
    match namespace_id {
        Some(ns) if ns.len() == envelope.prefix_len() => {
            let mut prefix = ns.to_vec();
            prefix.push(tag);
            ScanRange::prefix(&prefix)
        }
        _ => ScanRange::all(),
    }
}

/// Pass 1: build the hash index from the source store.
///
/// An iterator error is fatal; malformed records are only counted.
pub fn build_hash_index(
    source: &SourceStore,
    envelope: Envelope,
    namespace_id: Option<&[u8]>,
) -> Result<(HashIndex, HashIndexStats)> {
    let timer = metrics::Timer::new();
    let progress = ProgressCounter::new(1_000_000);
    let mut builder = HashIndexBuilder::new(envelope, namespace_id);

    let range = source_range_for_tag(&envelope, namespace_id, TAG_HASH_TO_NUMBER);
    debug!(bounded = range.lower.is_some(), "Hash index scan start");

    for item in source.scan(range)? {
        let record = item?;
        builder.observe(&record.key, &record.value);
        if progress.should_log() {
            debug!(records = progress.get(), "Hash index scan progress");
        }
    }

    let (index, stats) = builder.finish();
    metrics::HASH_INDEX_ENTRIES.set(index.len() as i64);
    info!(
        entries = index.len(),
        scanned = stats.scanned,
        malformed = stats.malformed,
        conflicting = stats.conflicting,
        out_of_scope = stats.out_of_scope,
        duration_secs = format!("{:.2}", timer.elapsed_secs()),
        "Hash index built"
    );

    Ok((index, stats))
}

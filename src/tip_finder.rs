//! Tip discovery and chain verification over the destination store.
//!
//! - `scan_canonical`: highest canonical height, record count and gaps
//! - `find_header_tip`: highest stored header, for stores with no canonical records
//! - `verify_links`: parent-pointer continuity across consecutive canonical heights

use alloy_primitives::B256;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::canonical_chain::CanonicalIndex;
use crate::constants::{HASH_LEN, HEIGHT_LEN, TAG_CANONICAL, TAG_HEADER};
use crate::error::Result;
use crate::header::HeaderRecord;
use crate::key_codec::{classify, decode_height, DestinationSchema, KeyKind};
use crate::metrics;
use crate::store::{DestStore, ScanRange};
use crate::telemetry::short_hex;

/// Discontinuities kept in full; the rest are only counted
const MAX_REPORTED_DISCONTINUITIES: usize = 100;

/// Inclusive run of heights with no canonical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GapRange {
    pub start: u64,
    pub end: u64,
}

impl GapRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalScan {
    pub max_height: Option<u64>,
    /// Hash stored at `max_height`
    pub tip_hash: Option<B256>,
    pub count: u64,
    pub gaps: Vec<GapRange>,
    /// Heights in `[0, max_height]` without a record
    pub missing_heights: u64,
    /// Canonical keys of the wrong width or with a non-hash value
    pub malformed: u64,
}

/// Highest header found by key scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderTip {
    pub height: u64,
    pub hash: B256,
    /// Headers stored at that height (forks)
    pub candidates: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Discontinuity {
    pub height: u64,
    /// Canonical hash at `height - 1`
    pub expected_parent: B256,
    /// Parent recorded in the header at `height`
    pub found_parent: B256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub links_checked: u64,
    pub headers_missing: u64,
    pub headers_undecodable: u64,
    pub discontinuity_count: u64,
    pub discontinuities: Vec<Discontinuity>,
}

impl LinkReport {
    pub fn is_continuous(&self) -> bool {
        self.discontinuity_count == 0 && self.headers_missing == 0 && self.headers_undecodable == 0
    }
}

pub struct TipFinder<'a> {
    dest: &'a DestStore,
    schema: &'a DestinationSchema,
}

impl<'a> TipFinder<'a> {
    pub fn new(dest: &'a DestStore, schema: &'a DestinationSchema) -> Self {
        Self { dest, schema }
    }

    /// Scan every canonical record in height order
    pub fn scan_canonical(&self) -> Result<CanonicalScan> {
        let mut scan = CanonicalScan::default();
        let mut next_expected = 0u64;
        let range = ScanRange::prefix(&self.schema.tag_prefix(TAG_CANONICAL));

        for item in self.dest.scan(range) {
            let record = item?;
            let Some(logical) = self.schema.decode(&record.key) else {
                continue;
            };
            if logical.payload.len() != HEIGHT_LEN || record.value.len() != HASH_LEN {
                scan.malformed += 1;
                continue;
            }

            let height = decode_height(logical.payload);
            if height > next_expected {
                let gap = GapRange {
                    start: next_expected,
                    end: height - 1,
                };
                scan.missing_heights += gap.len();
                scan.gaps.push(gap);
            }
            next_expected = height.saturating_add(1);

            scan.count += 1;
            scan.max_height = Some(height);
            scan.tip_hash = Some(B256::from_slice(&record.value));
        }

        if let Some(max) = scan.max_height {
            metrics::MAX_HEIGHT.set(max as i64);
        }
        info!(
            max_height = ?scan.max_height,
            count = scan.count,
            gap_ranges = scan.gaps.len(),
            missing_heights = scan.missing_heights,
            malformed = scan.malformed,
            "Canonical scan complete"
        );
        Ok(scan)
    }

    /// Load the destination's canonical records into memory
    pub fn canonical_index(&self) -> Result<CanonicalIndex> {
        let mut index = CanonicalIndex::new();
        let range = ScanRange::prefix(&self.schema.tag_prefix(TAG_CANONICAL));
        for item in self.dest.scan(range) {
            let record = item?;
            let Some(logical) = self.schema.decode(&record.key) else {
                continue;
            };
            if logical.payload.len() == HEIGHT_LEN && record.value.len() == HASH_LEN {
                index.insert(decode_height(logical.payload), B256::from_slice(&record.value));
            }
        }
        Ok(index)
    }

    /// Highest `(height, hash)` among stored header keys.
    ///
    /// With several headers at the top height the lowest hash is returned and
    /// the fork is reported through `candidates`.
    pub fn find_header_tip(&self) -> Result<Option<HeaderTip>> {
        let mut tip: Option<HeaderTip> = None;
        let range = ScanRange::prefix(&self.schema.tag_prefix(TAG_HEADER));

        for item in self.dest.scan(range) {
            let record = item?;
            let Some(logical) = self.schema.decode(&record.key) else {
                continue;
            };
            let KeyKind::Header { number, hash } = classify(&logical) else {
                continue;
            };

            // keys sort by (height, hash), so the first header seen at a height has the lowest hash
            match tip.as_mut() {
                Some(current) if current.height == number => current.candidates += 1,
                Some(current) if current.height > number => {}
                _ => {
                    tip = Some(HeaderTip {
                        height: number,
                        hash: B256::from_slice(hash),
                        candidates: 1,
                    });
                }
            }
        }

        match &tip {
            Some(t) if t.candidates > 1 => warn!(
                height = t.height,
                candidates = t.candidates,
                "Several headers at the highest height; using the lowest hash"
            ),
            Some(t) => debug!(height = t.height, hash = %short_hex(t.hash.as_slice()), "Header tip found"),
            None => debug!("No header records in destination"),
        }
        Ok(tip)
    }

    /// Check `header(hash(h)).parent_hash == hash(h - 1)` for every pair of
    /// consecutive heights present in `index`.
    pub fn verify_links(&self, index: &CanonicalIndex) -> Result<LinkReport> {
        let mut report = LinkReport::default();

        let mut prev: Option<(u64, B256)> = None;
        for (&height, &hash) in index {
            let previous = prev.replace((height, hash));
            let Some((prev_height, prev_hash)) = previous else {
                continue;
            };
            if prev_height + 1 != height {
                continue;
            }
            report.links_checked += 1;

            let Some(value) = self.dest.get(&self.schema.header_key(height, &hash))? else {
                report.headers_missing += 1;
                continue;
            };
            let header = match HeaderRecord::decode(&value) {
                Ok(header) => header,
                Err(e) => {
                    debug!(height, error = %e, "Undecodable header during link check");
                    report.headers_undecodable += 1;
                    continue;
                }
            };

            if header.parent_hash != prev_hash {
                report.discontinuity_count += 1;
                if report.discontinuities.len() < MAX_REPORTED_DISCONTINUITIES {
                    report.discontinuities.push(Discontinuity {
                        height,
                        expected_parent: prev_hash,
                        found_parent: header.parent_hash,
                    });
                }
            }
        }

        if report.is_continuous() {
            info!(links = report.links_checked, "Canonical chain links verified");
        } else {
            warn!(
                links = report.links_checked,
                discontinuities = report.discontinuity_count,
                headers_missing = report.headers_missing,
                headers_undecodable = report.headers_undecodable,
                "Canonical chain has broken links"
            );
        }
        Ok(report)
    }
}

//! Legacy canonical cleanup
//!
//! Older tooling wrote canonical records as `'h' ++ be64(height) ++ 'n'`,
//! inside the header key-space. Those keys are converted into proper
//! `'n' ++ be64(height)` records when no such record exists, then deleted.

use alloy_primitives::B256;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch_writer::BatchCommitter;
use crate::constants::{HASH_LEN, TAG_HEADER};
use crate::error::Result;
use crate::key_codec::{classify, DestinationSchema, KeyKind};
use crate::store::{DestStore, ScanRange};
use crate::telemetry::short_hex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LegacyStats {
    pub legacy_keys_found: u64,
    pub canonical_keys_removed_legacy: u64,
    pub canonical_keys_converted_legacy: u64,
    /// Removed without conversion because the value was not a 32-byte hash
    pub legacy_values_malformed: u64,
}

pub struct LegacyCanonicalCleanup<'a> {
    dest: &'a DestStore,
    schema: &'a DestinationSchema,
}

impl<'a> LegacyCanonicalCleanup<'a> {
    pub fn new(dest: &'a DestStore, schema: &'a DestinationSchema) -> Self {
        Self { dest, schema }
    }

    pub async fn run(&self, committer: &mut BatchCommitter, stats: &mut LegacyStats) -> Result<()> {
        let range = ScanRange::prefix(&self.schema.tag_prefix(TAG_HEADER));

        for item in self.dest.scan(range) {
            let record = item?;
            let Some(logical) = self.schema.decode(&record.key) else {
                continue;
            };
            let KeyKind::LegacyCanonical { height } = classify(&logical) else {
                continue;
            };
            stats.legacy_keys_found += 1;

            if record.value.len() == HASH_LEN {
                let canonical_key = self.schema.canonical_key(height);
                if self.dest.get(&canonical_key)?.is_none() {
                    let hash = B256::from_slice(&record.value);
                    debug!(height, hash = %short_hex(hash.as_slice()), "Converting legacy canonical key");
                    committer.put(canonical_key, hash.to_vec());
                    stats.canonical_keys_converted_legacy += 1;
                }
            } else {
                stats.legacy_values_malformed += 1;
                warn!(height, value_len = record.value.len(), "Legacy canonical value is not a hash");
            }

            committer.delete(record.key.to_vec());
            stats.canonical_keys_removed_legacy += 1;
            committer.maybe_commit().await?;
        }

        committer.commit().await?;

        if stats.legacy_keys_found > 0 {
            info!(
                found = stats.legacy_keys_found,
                removed = stats.canonical_keys_removed_legacy,
                converted = stats.canonical_keys_converted_legacy,
                "Legacy canonical cleanup complete"
            );
        } else {
            debug!("No legacy canonical keys found");
        }
        Ok(())
    }
}

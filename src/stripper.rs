//! Namespace stripping pass
//!
//! Streams every source record once in key order, removes the namespace
//! envelope and re-emits the logical record in the destination layout.
//! Truncated canonical keys are resolved against the hash index on the way.
//! Each record lands in exactly one outcome bucket; nothing short of an I/O
//! failure stops the pass.

use std::collections::BTreeMap;

use memchr::memmem;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch_writer::BatchCommitter;
use crate::constants::{is_chain_tag, is_state_tag, tag_name, HASH_LEN, TAG_CANONICAL};
use crate::error::{EngineError, Result};
use crate::hash_index::HashIndex;
use crate::key_codec::{classify, CanonicalPayload, DestinationSchema, Envelope, KeyKind, LogicalKey};
use crate::metrics;
use crate::resolver::{select, AmbiguityPolicy, MatchKind, TruncatedHashResolver};
use crate::store::{ScanRange, SourceStore};
use crate::telemetry::{short_hex, ProgressCounter};

/// Same-length byte replacement applied to record payloads and values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainIdRewrite {
    from: Vec<u8>,
    to: Vec<u8>,
}

impl ChainIdRewrite {
    pub fn new(from: Vec<u8>, to: Vec<u8>) -> Result<Self> {
        if from.is_empty() {
            return Err(EngineError::Config("chain id rewrite source is empty".to_string()));
        }
        if from.len() != to.len() {
            return Err(EngineError::Config(format!(
                "chain id rewrite must preserve length ({} != {} bytes)",
                from.len(),
                to.len()
            )));
        }
        Ok(Self { from, to })
    }

    /// Rewritten copy of `bytes`, or `None` when the old id does not occur
    pub fn apply(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        let mut hits = memmem::find_iter(bytes, &self.from).peekable();
        hits.peek()?;

        let mut out = bytes.to_vec();
        for start in hits {
            out[start..start + self.to.len()].copy_from_slice(&self.to);
        }
        Some(out)
    }
}

/// Everything the stripper needs besides the stores
#[derive(Debug, Clone)]
pub struct StripperOptions {
    pub envelope: Envelope,
    pub namespace_id: Option<Vec<u8>>,
    pub schema: DestinationSchema,
    pub include_state: bool,
    /// Raw source keys (or key prefixes) copied verbatim, e.g. `LastAccepted`
    pub passthrough_keys: Vec<Vec<u8>>,
    /// Stop after this many source records (trial runs)
    pub limit: Option<u64>,
    pub chain_id_rewrite: Option<ChainIdRewrite>,
    pub ambiguity_policy: AmbiguityPolicy,
}

impl StripperOptions {
    pub fn new(envelope: Envelope, schema: DestinationSchema) -> Self {
        Self {
            envelope,
            namespace_id: None,
            schema,
            include_state: false,
            passthrough_keys: Vec::new(),
            limit: None,
            chain_id_rewrite: None,
            ambiguity_policy: AmbiguityPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Malformed,
    Ambiguous,
    Unresolved,
    OutOfScope,
}

impl SkipReason {
    fn label(self) -> &'static str {
        match self {
            SkipReason::Malformed => "malformed",
            SkipReason::Ambiguous => "ambiguous",
            SkipReason::Unresolved => "unresolved",
            SkipReason::OutOfScope => "out_of_scope",
        }
    }
}

/// Destination record produced for one source record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migrated {
    /// `None` for passthrough keys
    pub tag: Option<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Set when a truncated canonical key was resolved
    pub resolution: Option<MatchKind>,
    pub chosen_by_policy: bool,
    pub rewritten: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Migrated(Migrated),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StripStats {
    pub records_scanned: u64,
    pub records_migrated: u64,
    pub records_skipped_malformed: u64,
    pub records_skipped_ambiguous: u64,
    pub records_skipped_unresolved: u64,
    pub records_skipped_out_of_scope: u64,
    pub passthrough_copied: u64,
    /// Truncated or hash-keyed canonical records rewritten to height keys
    pub canonical_keys_resolved: u64,
    pub canonical_keys_resolved_by_policy: u64,
    pub chain_id_rewrites: u64,
    pub per_tag: BTreeMap<&'static str, u64>,
}

impl StripStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Migrated(m) => {
                self.records_migrated += 1;
                let name = match m.tag {
                    Some(tag) => tag_name(tag),
                    None => {
                        self.passthrough_copied += 1;
                        "passthrough"
                    }
                };
                *self.per_tag.entry(name).or_insert(0) += 1;
                if m.resolution.is_some() {
                    self.canonical_keys_resolved += 1;
                    metrics::CANONICAL_KEYS_WRITTEN.inc();
                }
                if m.chosen_by_policy {
                    self.canonical_keys_resolved_by_policy += 1;
                }
                if m.rewritten {
                    self.chain_id_rewrites += 1;
                }
                metrics::record_outcome("migrated");
            }
            Outcome::Skipped(reason) => {
                match reason {
                    SkipReason::Malformed => self.records_skipped_malformed += 1,
                    SkipReason::Ambiguous => self.records_skipped_ambiguous += 1,
                    SkipReason::Unresolved => self.records_skipped_unresolved += 1,
                    SkipReason::OutOfScope => self.records_skipped_out_of_scope += 1,
                }
                metrics::record_outcome(reason.label());
            }
        }
    }

    /// Every scanned record is in exactly one bucket
    pub fn is_balanced(&self) -> bool {
        self.records_scanned
            == self.records_migrated
                + self.records_skipped_malformed
                + self.records_skipped_ambiguous
                + self.records_skipped_unresolved
                + self.records_skipped_out_of_scope
    }
}

pub struct NamespaceStripper<'a> {
    options: &'a StripperOptions,
    resolver: TruncatedHashResolver<'a>,
}

impl<'a> NamespaceStripper<'a> {
    pub fn new(options: &'a StripperOptions, index: &'a HashIndex) -> Self {
        Self {
            options,
            resolver: TruncatedHashResolver::new(index),
        }
    }

    fn in_scope(&self, tag: u8) -> bool {
        is_chain_tag(tag) || (self.options.include_state && is_state_tag(tag))
    }

    /// Classify one source record and build its destination form
    pub fn transform(&self, key: &[u8], value: &[u8]) -> Outcome {
        let opts = self.options;

        if opts.passthrough_keys.iter().any(|k| key.starts_with(k)) {
            return Outcome::Migrated(Migrated {
                tag: None,
                key: key.to_vec(),
                value: value.to_vec(),
                resolution: None,
                chosen_by_policy: false,
                rewritten: false,
            });
        }

        let Ok(stripped) = opts.envelope.strip(key) else {
            return Outcome::Skipped(SkipReason::Malformed);
        };

        if let Some(ns) = &opts.namespace_id {
            if !key.starts_with(ns) {
                return Outcome::Skipped(SkipReason::OutOfScope);
            }
        }

        let logical = stripped.logical;
        if !self.in_scope(logical.tag) {
            return Outcome::Skipped(SkipReason::OutOfScope);
        }

        match classify(&logical) {
            KeyKind::Canonical(CanonicalPayload::Height(_)) => {
                if value.len() != HASH_LEN {
                    return Outcome::Skipped(SkipReason::Malformed);
                }
                Outcome::Migrated(Migrated {
                    tag: Some(logical.tag),
                    key: opts.schema.encode(&logical),
                    value: value.to_vec(),
                    resolution: None,
                    chosen_by_policy: false,
                    rewritten: false,
                })
            }
            KeyKind::Canonical(CanonicalPayload::PartialHash(partial)) => self.resolve_canonical(partial),
            KeyKind::Canonical(CanonicalPayload::Malformed) => Outcome::Skipped(SkipReason::Malformed),
            _ => self.rekey(logical, value),
        }
    }

    fn resolve_canonical(&self, partial: &[u8]) -> Outcome {
        let resolution = self.resolver.resolve(partial);
        let Some((hash, height)) = select(&resolution, self.options.ambiguity_policy) else {
            return match resolution.kind {
                MatchKind::AmbiguousPrefix => {
                    debug!(
                        prefix = %short_hex(partial),
                        candidates = resolution.matches.len(),
                        "Ambiguous truncated canonical key"
                    );
                    Outcome::Skipped(SkipReason::Ambiguous)
                }
                _ => Outcome::Skipped(SkipReason::Unresolved),
            };
        };

        Outcome::Migrated(Migrated {
            tag: Some(TAG_CANONICAL),
            key: self.options.schema.canonical_key(height),
            value: hash.to_vec(),
            resolution: Some(resolution.kind),
            chosen_by_policy: resolution.kind == MatchKind::AmbiguousPrefix,
            rewritten: false,
        })
    }

    fn rekey(&self, logical: LogicalKey<'_>, value: &[u8]) -> Outcome {
        let Some(rewrite) = &self.options.chain_id_rewrite else {
            return Outcome::Migrated(Migrated {
                tag: Some(logical.tag),
                key: self.options.schema.encode(&logical),
                value: value.to_vec(),
                resolution: None,
                chosen_by_policy: false,
                rewritten: false,
            });
        };

        let payload = rewrite.apply(logical.payload);
        let new_value = rewrite.apply(value);
        let rewritten = payload.is_some() || new_value.is_some();
        let payload = payload.unwrap_or_else(|| logical.payload.to_vec());

        Outcome::Migrated(Migrated {
            tag: Some(logical.tag),
            key: self.options.schema.encode(&LogicalKey::new(logical.tag, &payload)),
            value: new_value.unwrap_or_else(|| value.to_vec()),
            resolution: None,
            chosen_by_policy: false,
            rewritten,
        })
    }

    /// Pass 2: stream the whole source into the committer.
    ///
    /// `stats` is updated in place so a cancelled run still reports how far it got.
    pub async fn run(
        &self,
        source: &SourceStore,
        committer: &mut BatchCommitter,
        stats: &mut StripStats,
    ) -> Result<()> {
        let timer = metrics::Timer::new();
        let progress = ProgressCounter::new(500_000);

        for item in source.scan(ScanRange::all())? {
            if self.options.limit.is_some_and(|limit| stats.records_scanned >= limit) {
                info!(limit = stats.records_scanned, "Record limit reached, stopping scan");
                break;
            }
            let record = item?;
            stats.records_scanned += 1;

            let outcome = self.transform(&record.key, &record.value);
            if let Outcome::Skipped(SkipReason::Malformed) = outcome {
                if stats.records_skipped_malformed < 10 {
                    warn!(key = %short_hex(&record.key), "Skipping malformed source record");
                }
            }
            stats.record(&outcome);

            if let Outcome::Migrated(migrated) = outcome {
                committer.put(migrated.key, migrated.value);
                committer.maybe_commit().await?;
            }

            if progress.should_log() {
                info!(
                    scanned = stats.records_scanned,
                    migrated = stats.records_migrated,
                    committed = committer.committed_ops(),
                    "Stripping progress"
                );
            }
        }

        committer.commit().await?;

        info!(
            scanned = stats.records_scanned,
            migrated = stats.records_migrated,
            malformed = stats.records_skipped_malformed,
            ambiguous = stats.records_skipped_ambiguous,
            unresolved = stats.records_skipped_unresolved,
            out_of_scope = stats.records_skipped_out_of_scope,
            duration_secs = format!("{:.2}", timer.elapsed_secs()),
            "Namespace stripping complete"
        );
        for (tag, count) in &stats.per_tag {
            debug!(tag, count, "Migrated records by tag");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TAG_ACCOUNTS;
    use crate::hash_index::build_hash_index;
    use crate::key_codec::encode_height;
    use crate::test_support::{
        chain_records, dump, evm_key, source_dir, temp_dest, ChainLayout, SyntheticChain,
    };
    use alloy_primitives::B256;
    use tokio_util::sync::CancellationToken;

    fn evm_options() -> StripperOptions {
        StripperOptions::new(Envelope::new(3, 0), DestinationSchema::plain())
    }

    fn migrated(outcome: Outcome) -> Migrated {
        match outcome {
            Outcome::Migrated(m) => m,
            other => panic!("expected migration, got {:?}", other),
        }
    }

    #[test]
    fn test_chain_id_rewrite() {
        let rewrite = ChainIdRewrite::new(vec![0xaa, 0xbb], vec![0x11, 0x22]).unwrap();
        assert_eq!(
            rewrite.apply(&[0x00, 0xaa, 0xbb, 0x01, 0xaa, 0xbb]),
            Some(vec![0x00, 0x11, 0x22, 0x01, 0x11, 0x22])
        );
        assert_eq!(rewrite.apply(&[0xaa, 0x00]), None);

        assert!(ChainIdRewrite::new(vec![1, 2], vec![1]).is_err());
        assert!(ChainIdRewrite::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_transform_rekeys_chain_records() {
        let options = evm_options();
        let index = HashIndex::default();
        let stripper = NamespaceStripper::new(&options, &index);

        let m = migrated(stripper.transform(b"evmb\x00\x01", b"body"));
        assert_eq!(m.key, b"b\x00\x01".to_vec());
        assert_eq!(m.value, b"body".to_vec());
        assert_eq!(m.tag, Some(b'b'));
    }

    #[test]
    fn test_transform_skip_buckets() {
        let mut options = evm_options();
        options.namespace_id = Some(b"evm".to_vec());
        let index = HashIndex::default();
        let stripper = NamespaceStripper::new(&options, &index);

        assert_eq!(stripper.transform(b"ev", b""), Outcome::Skipped(SkipReason::Malformed));
        assert_eq!(stripper.transform(b"xyzb\x01", b""), Outcome::Skipped(SkipReason::OutOfScope));
        // unknown tag
        assert_eq!(stripper.transform(b"evm\x01\x02", b""), Outcome::Skipped(SkipReason::OutOfScope));
        // state tag without include_state
        assert_eq!(
            stripper.transform(&evm_key(&[TAG_ACCOUNTS, 1]), b"acct"),
            Outcome::Skipped(SkipReason::OutOfScope)
        );
        // canonical height key with a short value
        let mut key = b"evmn".to_vec();
        key.extend_from_slice(&encode_height(3));
        assert_eq!(stripper.transform(&key, &[0u8; 4]), Outcome::Skipped(SkipReason::Malformed));
        // canonical key with an over-long payload
        let mut long = b"evmn".to_vec();
        long.extend_from_slice(&[0u8; 40]);
        assert_eq!(stripper.transform(&long, &[0u8; 32]), Outcome::Skipped(SkipReason::Malformed));
    }

    #[test]
    fn test_state_tags_with_include_state() {
        let mut options = evm_options();
        options.include_state = true;
        options.schema = DestinationSchema::new(b"evm".to_vec(), vec![TAG_ACCOUNTS]);
        let index = HashIndex::default();
        let stripper = NamespaceStripper::new(&options, &index);

        let m = migrated(stripper.transform(&evm_key(&[TAG_ACCOUNTS, 1]), b"acct"));
        assert_eq!(m.key, vec![TAG_ACCOUNTS, 1]);

        let m = migrated(stripper.transform(b"evmh\x01", b"x"));
        assert_eq!(m.key, b"evmh\x01".to_vec());
    }

    #[test]
    fn test_passthrough_keys_copied_verbatim() {
        let mut options = evm_options();
        options.passthrough_keys = vec![b"LastAccepted".to_vec()];
        let index = HashIndex::default();
        let stripper = NamespaceStripper::new(&options, &index);

        let m = migrated(stripper.transform(b"LastAccepted", &[7u8; 32]));
        assert_eq!(m.key, b"LastAccepted".to_vec());
        assert_eq!(m.tag, None);

        let m = migrated(stripper.transform(b"LastAcceptedHeight", b"\x01"));
        assert_eq!(m.key, b"LastAcceptedHeight".to_vec());
    }

    #[test]
    fn test_truncated_canonical_resolution() {
        let chain = SyntheticChain::new(4);
        let index: HashIndex = chain.heights().map(|h| (chain.hash(h), h)).collect();
        let options = evm_options();
        let stripper = NamespaceStripper::new(&options, &index);

        let hash = chain.hash(2);
        let mut key = b"evmn".to_vec();
        key.extend_from_slice(&hash[..20]);
        let m = migrated(stripper.transform(&key, b"ignored"));
        assert_eq!(m.key, crate::key_codec::build_canonical_key(2));
        assert_eq!(m.value, hash.to_vec());
        assert_eq!(m.resolution, Some(MatchKind::UniquePrefix));

        let mut key = b"evmn".to_vec();
        key.extend_from_slice(&[0xee; 20]);
        assert_eq!(stripper.transform(&key, b""), Outcome::Skipped(SkipReason::Unresolved));
    }

    #[test]
    fn test_ambiguous_canonical_uses_policy() {
        let mut a = [0x11u8; 32];
        let mut b = [0x22u8; 32];
        a[..2].copy_from_slice(&[0xab, 0xcd]);
        b[..2].copy_from_slice(&[0xab, 0xcd]);
        let index: HashIndex = [(B256::from(a), 7), (B256::from(b), 8)].into_iter().collect();

        let mut key = b"evmn".to_vec();
        key.extend_from_slice(&[0xab, 0xcd]);

        let options = evm_options();
        let stripper = NamespaceStripper::new(&options, &index);
        assert_eq!(stripper.transform(&key, b""), Outcome::Skipped(SkipReason::Ambiguous));

        let mut options = evm_options();
        options.ambiguity_policy = AmbiguityPolicy::PreferHighestHeight;
        let stripper = NamespaceStripper::new(&options, &index);
        let m = migrated(stripper.transform(&key, b""));
        assert_eq!(m.key, crate::key_codec::build_canonical_key(8));
        assert!(m.chosen_by_policy);
    }

    #[test]
    fn test_rewrite_applies_to_payload_and_value() {
        let mut options = evm_options();
        options.chain_id_rewrite = Some(ChainIdRewrite::new(b"AB".to_vec(), b"CD".to_vec()).unwrap());
        let index = HashIndex::default();
        let stripper = NamespaceStripper::new(&options, &index);

        let m = migrated(stripper.transform(b"evmlAB", b"xxABxx"));
        assert_eq!(m.key, b"lCD".to_vec());
        assert_eq!(m.value, b"xxCDxx".to_vec());
        assert!(m.rewritten);
    }

    #[tokio::test]
    async fn test_run_migrates_synthetic_chain() {
        let chain = SyntheticChain::new(10);
        let mut records = chain_records(&chain, &ChainLayout { canonical: true, ..Default::default() });
        records.push((b"evm\x01junk".to_vec(), b"".to_vec()));
        records.push((b"e".to_vec(), b"".to_vec()));
        let source_temp = source_dir(&records);
        let source = SourceStore::open(source_temp.path(), Default::default()).unwrap();

        let options = evm_options();
        let (index, _) = build_hash_index(&source, options.envelope, None).unwrap();
        let (dest, _dest_temp) = temp_dest();
        let mut committer = BatchCommitter::new(&dest, 7, CancellationToken::new()).unwrap();

        let mut stats = StripStats::default();
        NamespaceStripper::new(&options, &index)
            .run(&source, &mut committer, &mut stats)
            .await
            .unwrap();

        assert_eq!(stats.records_scanned, 32);
        assert_eq!(stats.records_migrated, 30);
        assert_eq!(stats.records_skipped_out_of_scope, 1);
        assert_eq!(stats.records_skipped_malformed, 1);
        assert!(stats.is_balanced());
        assert_eq!(stats.per_tag.get("canonical"), Some(&10));
        assert_eq!(committer.committed_ops(), 30);

        let canonical = crate::key_codec::build_canonical_key(9);
        assert_eq!(dest.get(&canonical).unwrap(), Some(chain.hash(9).to_vec()));
        let stored = dump(&dest);
        assert_eq!(stored.len(), 30);
        assert!(stored.iter().all(|(k, _)| !k.starts_with(b"evm")));
    }

    #[tokio::test]
    async fn test_foreign_hash_records_do_not_resolve_local_canonical_keys() {
        let foreign = B256::repeat_byte(0x5c);
        let mut foreign_h = b"oth\x01H".to_vec();
        foreign_h.extend_from_slice(foreign.as_slice());
        let mut local_n = b"evm\x01n".to_vec();
        local_n.extend_from_slice(&foreign[..12]);

        let records = vec![
            (foreign_h, encode_height(50).to_vec()),
            (local_n, foreign.to_vec()),
        ];
        let source_temp = source_dir(&records);
        let source = SourceStore::open(source_temp.path(), Default::default()).unwrap();

        let mut options = StripperOptions::new(Envelope::new(4, 0), DestinationSchema::plain());
        options.namespace_id = Some(b"evm".to_vec());
        let (index, index_stats) =
            build_hash_index(&source, options.envelope, options.namespace_id.as_deref()).unwrap();
        assert!(index.is_empty());
        assert_eq!(index_stats.out_of_scope, 1);

        let (dest, _dest_temp) = temp_dest();
        let mut committer = BatchCommitter::new(&dest, 10, CancellationToken::new()).unwrap();
        let mut stats = StripStats::default();
        NamespaceStripper::new(&options, &index)
            .run(&source, &mut committer, &mut stats)
            .await
            .unwrap();

        assert_eq!(stats.records_skipped_out_of_scope, 1);
        assert_eq!(stats.records_skipped_unresolved, 1);
        assert_eq!(stats.canonical_keys_resolved, 0);
        assert!(dest.get(&crate::key_codec::build_canonical_key(50)).unwrap().is_none());
        assert!(dump(&dest).is_empty());
    }
}

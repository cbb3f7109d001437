//! End-to-end pipeline scenarios over synthetic `"evm"`-namespaced sources.

use std::path::Path;

use alloy_primitives::B256;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::canonical_chain::StopReason;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::key_codec::{build_canonical_key, encode_height};
use crate::pipeline::{Pipeline, Stages};
use crate::report::{RunReport, TipSource};
use crate::store::DestStore;
use crate::test_support::{
    chain_records, dump, evm_key, header_logical, source_dir, ChainLayout, SyntheticChain,
};

const HEAD_KEYS: [&[u8]; 4] = [b"LastBlock", b"LastHeader", b"LastFast", b"LastPivot"];

fn evm_config(source: &Path, dest: &Path) -> EngineConfig {
    EngineConfig {
        source_path: source.display().to_string(),
        dest_path: dest.display().to_string(),
        prefix_len: 3,
        suffix_len: 0,
        namespace_id: Some(hex::encode(b"evm")),
        batch_size: 4,
        ..EngineConfig::default()
    }
}

async fn run(config: &EngineConfig, stages: Stages) -> (RunReport, crate::error::Result<()>) {
    let pipeline = Pipeline::new(config.settings().unwrap(), CancellationToken::new());
    let mut report = RunReport::default();
    let result = pipeline.run(stages, &mut report).await;
    (report, result)
}

fn open_dest(path: &Path) -> DestStore {
    DestStore::open(path, true).unwrap()
}

#[tokio::test]
async fn test_headers_only_source_yields_full_canonical_index() {
    let chain = SyntheticChain::new(10);
    let source = source_dir(&chain_records(&chain, &ChainLayout::default()));
    let dest_dir = TempDir::new().unwrap();
    let config = evm_config(source.path(), dest_dir.path());

    let (report, result) = run(&config, Stages::ALL).await;
    result.unwrap();

    assert_eq!(report.strip.records_scanned, 20);
    assert_eq!(report.strip.records_migrated, 20);
    assert_eq!(report.hash_index.inserted, 10);
    assert_eq!(report.tip.unwrap().source, TipSource::HeaderRecords);
    assert!(report.walk.as_ref().unwrap().complete);
    assert_eq!(report.walk.as_ref().unwrap().lookups, 10);
    assert_eq!(report.repair.canonical_keys_written, 10);
    assert_eq!(report.canonical_keys_written, 10);
    assert_eq!(report.canonical_records, 10);
    assert_eq!(report.max_height_found, Some(9));
    assert_eq!(report.gaps_found, 0);
    assert!(report.gaps.is_empty());
    assert!(report.links.as_ref().unwrap().is_continuous());
    assert!(report.is_clean());

    assert_eq!(report.head_height, Some(9));
    assert_eq!(report.head_pointers_written, 4);

    let dest = open_dest(dest_dir.path());
    for height in chain.heights() {
        assert_eq!(
            dest.get(&build_canonical_key(height)).unwrap(),
            Some(chain.hash(height).to_vec())
        );
    }
    for key in HEAD_KEYS {
        assert_eq!(dest.get(key).unwrap(), Some(chain.hash(9).to_vec()));
    }
}

#[tokio::test]
async fn test_missing_header_stops_walk_above_gap() {
    let chain = SyntheticChain::new(10);
    let layout = ChainLayout {
        canonical: true,
        missing_header: Some(5),
    };
    let source = source_dir(&chain_records(&chain, &layout));
    let dest_dir = TempDir::new().unwrap();
    let config = evm_config(source.path(), dest_dir.path());

    let (report, result) = run(&config, Stages::ALL).await;
    result.unwrap();

    assert_eq!(report.max_height_found, Some(9));
    assert_eq!(report.tip.unwrap().source, TipSource::CanonicalRecords);

    let walk = report.walk.as_ref().unwrap();
    assert!(!walk.complete);
    assert_eq!(walk.reached_height, Some(6));
    assert_eq!(walk.missing_at, Some(5));
    assert_eq!(walk.reason, Some(StopReason::MissingHeader));
    assert_eq!(walk.entries, 4);

    // canonical records were copied, so nothing needed repairing
    assert_eq!(report.repair.canonical_keys_written, 0);
    assert_eq!(report.links.as_ref().unwrap().headers_missing, 1);
    assert!(!report.is_clean());

    // an incomplete walk leaves the head keys alone
    assert_eq!(report.head_height, None);
    assert_eq!(report.head_pointers_written, 0);
    let dest = open_dest(dest_dir.path());
    for key in HEAD_KEYS {
        assert!(dest.get(key).unwrap().is_none());
    }
}

#[tokio::test]
async fn test_truncated_and_ambiguous_canonical_keys() {
    let chain = SyntheticChain::new(6);
    let mut records = chain_records(&chain, &ChainLayout::default());

    // heights 1 and 2 stored under 12-byte hash prefixes
    for height in [1u64, 2] {
        let mut logical = vec![b'n'];
        logical.extend_from_slice(&chain.hash(height)[..12]);
        records.push((evm_key(&logical), chain.hash(height).to_vec()));
    }
    // two foreign hashes sharing a prefix make a third truncated key ambiguous
    let mut a = [0x11u8; 32];
    let mut b = [0x22u8; 32];
    a[..3].copy_from_slice(&[0xfa, 0xce, 0x01]);
    b[..3].copy_from_slice(&[0xfa, 0xce, 0x01]);
    for (hash, height) in [(B256::from(a), 100u64), (B256::from(b), 101)] {
        let mut logical = vec![b'H'];
        logical.extend_from_slice(hash.as_slice());
        records.push((evm_key(&logical), encode_height(height).to_vec()));
    }
    records.push((evm_key(&[b'n', 0xfa, 0xce, 0x01]), vec![0u8; 32]));
    // and one that matches nothing
    records.push((evm_key(&[b'n', 0x00, 0x00, 0x00, 0x01]), vec![0u8; 32]));

    let source = source_dir(&records);
    let dest_dir = TempDir::new().unwrap();
    let config = evm_config(source.path(), dest_dir.path());

    let (report, result) = run(&config, Stages::STRIP).await;
    result.unwrap();

    assert_eq!(report.strip.canonical_keys_resolved, 2);
    assert_eq!(report.strip.records_skipped_ambiguous, 1);
    assert_eq!(report.strip.records_skipped_unresolved, 1);
    assert!(report.strip.is_balanced());

    let dest = open_dest(dest_dir.path());
    assert_eq!(dest.get(&build_canonical_key(1)).unwrap(), Some(chain.hash(1).to_vec()));
    assert_eq!(dest.get(&build_canonical_key(2)).unwrap(), Some(chain.hash(2).to_vec()));
    assert!(dest.get(&build_canonical_key(100)).unwrap().is_none());
    assert!(dest.get(&build_canonical_key(101)).unwrap().is_none());
}

#[tokio::test]
async fn test_strip_is_idempotent_across_fresh_destinations() {
    let chain = SyntheticChain::new(8);
    let mut records = chain_records(&chain, &ChainLayout { canonical: true, ..Default::default() });
    records.push((evm_key(b"bbody-bytes"), b"body".to_vec()));
    records.push((b"LastAccepted".to_vec(), chain.hash(7).to_vec()));
    let source = source_dir(&records);

    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    run(&evm_config(source.path(), first.path()), Stages::STRIP).await.1.unwrap();
    run(&evm_config(source.path(), second.path()), Stages::STRIP).await.1.unwrap();

    let a = dump(&open_dest(first.path()));
    let b = dump(&open_dest(second.path()));
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_rerun_into_same_destination_is_a_no_op() {
    let chain = SyntheticChain::new(5);
    let source = source_dir(&chain_records(&chain, &ChainLayout::default()));
    let dest_dir = TempDir::new().unwrap();
    let config = evm_config(source.path(), dest_dir.path());

    run(&config, Stages::ALL).await.1.unwrap();
    let before = dump(&open_dest(dest_dir.path()));

    let (report, result) = run(&config, Stages::ALL).await;
    result.unwrap();
    assert_eq!(report.repair.canonical_keys_written, 0);
    assert_eq!(report.head_height, Some(4));
    assert_eq!(report.head_pointers_written, 0);
    assert_eq!(report.tip.unwrap().source, TipSource::CanonicalRecords);
    assert_eq!(dump(&open_dest(dest_dir.path())), before);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let chain = SyntheticChain::new(5);
    let source = source_dir(&chain_records(&chain, &ChainLayout::default()));
    let dest_dir = TempDir::new().unwrap();
    let missing = dest_dir.path().join("never-created");
    let mut config = evm_config(source.path(), &missing);
    config.dry_run = true;

    let (report, result) = run(&config, Stages::ALL).await;
    result.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.strip.records_migrated, 10);
    assert_eq!(report.committed_ops, 10);
    assert!(report.walk.is_none());
    assert_eq!(report.head_pointers_written, 0);
    assert!(!missing.exists());
}

#[tokio::test]
async fn test_head_pointers_can_be_disabled() {
    let chain = SyntheticChain::new(5);
    let source = source_dir(&chain_records(&chain, &ChainLayout::default()));
    let dest_dir = TempDir::new().unwrap();
    let mut config = evm_config(source.path(), dest_dir.path());
    config.write_head_pointers = false;

    let (report, result) = run(&config, Stages::ALL).await;
    result.unwrap();
    assert!(report.walk.as_ref().unwrap().complete);
    assert_eq!(report.head_height, None);

    let dest = open_dest(dest_dir.path());
    for key in HEAD_KEYS {
        assert!(dest.get(key).unwrap().is_none());
    }
}

#[tokio::test]
async fn test_failed_run_leaves_destination_empty() {
    let temp = TempDir::new().unwrap();
    let dest_dir = temp.path().join("dst");
    let config = evm_config(&temp.path().join("no-such-source"), &dest_dir);

    let (report, result) = run(&config, Stages::ALL).await;
    assert!(matches!(result, Err(EngineError::Open { .. })));
    assert_eq!(report.committed_ops, 0);
    assert!(report.walk.is_none());
    assert!(dump(&open_dest(&dest_dir)).is_empty());
}

#[tokio::test]
async fn test_legacy_keys_cleaned_before_walk() {
    let chain = SyntheticChain::new(4);
    let mut records = chain_records(&chain, &ChainLayout::default());
    for height in chain.heights() {
        let mut logical = vec![b'h'];
        logical.extend_from_slice(&encode_height(height));
        logical.push(b'n');
        records.push((evm_key(&logical), chain.hash(height).to_vec()));
    }
    let source = source_dir(&records);
    let dest_dir = TempDir::new().unwrap();
    let config = evm_config(source.path(), dest_dir.path());

    let (report, result) = run(&config, Stages::ALL).await;
    result.unwrap();

    assert_eq!(report.legacy.canonical_keys_removed_legacy, 4);
    assert_eq!(report.legacy.canonical_keys_converted_legacy, 4);
    assert_eq!(report.tip.unwrap().source, TipSource::CanonicalRecords);
    assert!(report.walk.as_ref().unwrap().complete);
    assert_eq!(report.repair.canonical_keys_written, 0);

    let dest = open_dest(dest_dir.path());
    let mut legacy = header_logical(0, &chain.hash(0));
    legacy.truncate(9);
    legacy.push(b'n');
    assert!(dest.get(&legacy).unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_run_keeps_report() {
    let chain = SyntheticChain::new(10);
    let source = source_dir(&chain_records(&chain, &ChainLayout::default()));
    let dest_dir = TempDir::new().unwrap();
    let config = evm_config(source.path(), dest_dir.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let pipeline = Pipeline::new(config.settings().unwrap(), cancel);
    let mut report = RunReport::default();
    let err = pipeline.run(Stages::ALL, &mut report).await.unwrap_err();

    assert!(matches!(err, EngineError::Cancelled { committed_ops: 0 }));
    assert!(report.cancelled);
}

#[tokio::test]
async fn test_record_limit_stops_strip_early() {
    let chain = SyntheticChain::new(10);
    let source = source_dir(&chain_records(&chain, &ChainLayout::default()));
    let dest_dir = TempDir::new().unwrap();
    let mut config = evm_config(source.path(), dest_dir.path());
    config.record_limit = Some(5);

    let (report, result) = run(&config, Stages::STRIP).await;
    result.unwrap();
    assert_eq!(report.strip.records_scanned, 5);
    assert_eq!(dump(&open_dest(dest_dir.path())).len(), 5);
}

#[tokio::test]
async fn test_verify_only_on_missing_destination() {
    let temp = TempDir::new().unwrap();
    let config = evm_config(&temp.path().join("src"), &temp.path().join("dst"));

    let (report, result) = run(&config, Stages::VERIFY).await;
    result.unwrap();
    assert!(report.links.is_none());
    assert_eq!(report.max_height_found, None);
}

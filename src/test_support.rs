//! Shared fixtures for unit and scenario tests: synthetic header chains,
//! namespaced source stores and scratch destinations.

use std::path::Path;

use alloy_primitives::{keccak256, Address, Bloom, B256, U256};
use alloy_rlp::{Encodable, Header};
use rocksdb::{Options, DB};
use tempfile::TempDir;

use crate::constants::{TAG_CANONICAL, TAG_HASH_TO_NUMBER, TAG_HEADER};
use crate::key_codec::encode_height;
use crate::store::DestStore;

/// Source namespace used by the scenario tests
pub const EVM_PREFIX: &[u8] = b"evm";

/// RLP-encode a header with the given parent, number and extra data.
///
/// Fields past `number` are filled with fixed values so distinct `extra`
/// bytes are the only way to fork two headers at the same height.
pub fn encode_header(parent: B256, number: u64, extra: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    parent.encode(&mut payload);
    B256::ZERO.encode(&mut payload);
    Address::ZERO.encode(&mut payload);
    B256::ZERO.encode(&mut payload);
    B256::ZERO.encode(&mut payload);
    B256::ZERO.encode(&mut payload);
    Bloom::ZERO.encode(&mut payload);
    U256::from(1u64).encode(&mut payload);
    number.encode(&mut payload);
    30_000_000u64.encode(&mut payload);
    0u64.encode(&mut payload);
    (1_600_000_000u64 + number).encode(&mut payload);
    extra.encode(&mut payload);

    let mut out = Vec::with_capacity(payload.len() + 4);
    Header {
        list: true,
        payload_length: payload.len(),
    }
    .encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

/// A linked header chain `0..len` with real keccak parent pointers
pub struct SyntheticChain {
    /// `(hash, encoded header)` indexed by height
    pub blocks: Vec<(B256, Vec<u8>)>,
}

impl SyntheticChain {
    pub fn new(len: u64) -> Self {
        Self::with_extra(len, b"")
    }

    /// Same shape as `new`, but `extra` forks the hashes away from other chains
    pub fn with_extra(len: u64, extra: &[u8]) -> Self {
        let mut blocks = Vec::with_capacity(len as usize);
        let mut parent = B256::ZERO;
        for number in 0..len {
            let encoded = encode_header(parent, number, extra);
            let hash = keccak256(&encoded);
            blocks.push((hash, encoded));
            parent = hash;
        }
        Self { blocks }
    }

    pub fn hash(&self, height: u64) -> B256 {
        self.blocks[height as usize].0
    }

    pub fn header(&self, height: u64) -> &[u8] {
        &self.blocks[height as usize].1
    }

    pub fn tip(&self) -> (u64, B256) {
        let height = self.blocks.len() as u64 - 1;
        (height, self.hash(height))
    }

    pub fn heights(&self) -> impl Iterator<Item = u64> {
        0..self.blocks.len() as u64
    }
}

/// Wrap a bare logical key in the `"evm"` envelope
pub fn evm_key(logical: &[u8]) -> Vec<u8> {
    let mut key = EVM_PREFIX.to_vec();
    key.extend_from_slice(logical);
    key
}

pub fn header_logical(height: u64, hash: &B256) -> Vec<u8> {
    let mut key = vec![TAG_HEADER];
    key.extend_from_slice(&encode_height(height));
    key.extend_from_slice(hash.as_slice());
    key
}

pub fn hash_to_number_logical(hash: &B256) -> Vec<u8> {
    let mut key = vec![TAG_HASH_TO_NUMBER];
    key.extend_from_slice(hash.as_slice());
    key
}

pub fn canonical_logical(height: u64) -> Vec<u8> {
    let mut key = vec![TAG_CANONICAL];
    key.extend_from_slice(&encode_height(height));
    key
}

/// Which parts of a synthetic chain end up in a namespaced source
#[derive(Debug, Clone, Default)]
pub struct ChainLayout {
    pub canonical: bool,
    pub missing_header: Option<u64>,
}

/// Namespaced `(key, value)` records for a synthetic chain
pub fn chain_records(chain: &SyntheticChain, layout: &ChainLayout) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut records = Vec::new();
    for height in chain.heights() {
        let hash = chain.hash(height);
        if layout.missing_header != Some(height) {
            records.push((
                evm_key(&header_logical(height, &hash)),
                chain.header(height).to_vec(),
            ));
        }
        records.push((
            evm_key(&hash_to_number_logical(&hash)),
            encode_height(height).to_vec(),
        ));
        if layout.canonical {
            records.push((evm_key(&canonical_logical(height)), hash.to_vec()));
        }
    }
    records
}

/// Create a RocksDB directory holding exactly `records`
pub fn write_rocks(path: &Path, records: &[(Vec<u8>, Vec<u8>)]) {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    let db = DB::open(&opts, path).unwrap();
    for (key, value) in records {
        db.put(key, value).unwrap();
    }
    db.flush().unwrap();
}

/// Fresh source directory populated with `records`
pub fn source_dir(records: &[(Vec<u8>, Vec<u8>)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    write_rocks(temp_dir.path(), records);
    temp_dir
}

/// Fresh writable destination
pub fn temp_dest() -> (DestStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = DestStore::open(temp_dir.path(), false).unwrap();
    (store, temp_dir)
}

/// Every record in a destination, in key order
pub fn dump(store: &DestStore) -> Vec<(Vec<u8>, Vec<u8>)> {
    store
        .scan(crate::store::ScanRange::all())
        .map(|r| {
            let r = r.unwrap();
            (r.key.to_vec(), r.value.to_vec())
        })
        .collect()
}

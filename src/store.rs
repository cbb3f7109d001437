//! Key-value stores the engine reads from and writes to.
//!
//! The source is opened read-only and may be a RocksDB directory or a LevelDB
//! dump (older chain clients). The destination is always RocksDB; every write
//! to it goes through the batch committer.

use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;

use rocksdb::{IteratorMode, Options, ReadOptions, DB};
use rusty_leveldb::LdbIterator;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::key_codec::prefix_upper_bound;

/// One stored record; never mutated once read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: Box<[u8]>,
    pub value: Box<[u8]>,
}

pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<RawRecord>> + 'a>;

/// Key range for a forward scan: `[lower, upper)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRange {
    pub lower: Option<Vec<u8>>,
    pub upper: Option<Vec<u8>>,
}

impl ScanRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        if prefix.is_empty() {
            return Self::all();
        }
        Self {
            lower: Some(prefix.to_vec()),
            upper: prefix_upper_bound(prefix),
        }
    }

    fn contains(&self, key: &[u8]) -> bool {
        if let Some(lower) = &self.lower {
            if key < lower.as_slice() {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if key >= upper.as_slice() {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    #[default]
    Rocksdb,
    Leveldb,
}

/// Read-only source of namespaced records
pub enum SourceStore {
    Rocks(DB),
    // rusty-leveldb needs `&mut` to build iterators
    Level(RefCell<rusty_leveldb::DB>),
}

impl SourceStore {
    pub fn open(path: &Path, format: SourceFormat) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::Open {
                role: "source",
                path: path.display().to_string(),
                message: "path does not exist".to_string(),
            });
        }

        let store = match format {
            SourceFormat::Rocksdb => {
                let opts = Options::default();
                let db = DB::open_for_read_only(&opts, path, false).map_err(|e| EngineError::Open {
                    role: "source",
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                SourceStore::Rocks(db)
            }
            SourceFormat::Leveldb => {
                let mut opts = rusty_leveldb::Options::default();
                opts.create_if_missing = false;
                let db = rusty_leveldb::DB::open(path, opts).map_err(|status| EngineError::Open {
                    role: "source",
                    path: path.display().to_string(),
                    message: format!("{:?}", status),
                })?;
                SourceStore::Level(RefCell::new(db))
            }
        };

        info!(path = %path.display(), format = ?format, "Opened source store");
        Ok(store)
    }

    /// Forward scan in key order
    pub fn scan(&self, range: ScanRange) -> Result<RecordIter<'_>> {
        match self {
            SourceStore::Rocks(db) => Ok(rocks_scan(db, range)),
            SourceStore::Level(cell) => {
                let mut iter = cell.borrow_mut().new_iter()?;
                let seeked = match &range.lower {
                    Some(lower) => {
                        LdbIterator::seek(&mut iter, lower);
                        true
                    }
                    None => false,
                };
                Ok(Box::new(LevelRecordIter { iter, range, seeked }))
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            SourceStore::Rocks(db) => Ok(db.get(key)?),
            SourceStore::Level(cell) => Ok(cell.borrow_mut().get(key).map(|v| v.to_vec())),
        }
    }
}

/// LevelDB iterators have no range bounds: the lower bound is a seek, the
/// upper bound ends iteration.
struct LevelRecordIter {
    iter: rusty_leveldb::DBIterator,
    range: ScanRange,
    /// Positioned by `seek`; the first record is `current`, not `next`
    seeked: bool,
}

impl Iterator for LevelRecordIter {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (key, value) = if std::mem::take(&mut self.seeked) {
                let (mut key, mut value) = (Vec::new(), Vec::new());
                if !LdbIterator::current(&self.iter, &mut key, &mut value) {
                    return None;
                }
                (key, value)
            } else {
                LdbIterator::next(&mut self.iter)?
            };
            if let Some(upper) = &self.range.upper {
                if &key[..] >= upper.as_slice() {
                    return None;
                }
            }
            if !self.range.contains(&key[..]) {
                continue;
            }
            return Some(Ok(RawRecord {
                key: key.to_vec().into_boxed_slice(),
                value: value.to_vec().into_boxed_slice(),
            }));
        }
    }
}

fn rocks_scan(db: &DB, range: ScanRange) -> RecordIter<'_> {
    let mut opts = ReadOptions::default();
    // Streaming scans should not evict hot blocks
    opts.fill_cache(false);
    if let Some(lower) = range.lower {
        opts.set_iterate_lower_bound(lower);
    }
    if let Some(upper) = range.upper {
        opts.set_iterate_upper_bound(upper);
    }

    Box::new(db.iterator_opt(IteratorMode::Start, opts).map(|item| {
        item.map(|(key, value)| RawRecord { key, value })
            .map_err(EngineError::from)
    }))
}

/// Destination RocksDB store.
///
/// Opened read-only for dry runs; writers must go through `BatchCommitter`.
#[derive(Clone)]
pub struct DestStore {
    db: Arc<DB>,
    read_only: bool,
}

impl DestStore {
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let open_err = |e: rocksdb::Error| EngineError::Open {
            role: "destination",
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let db = if read_only {
            DB::open_for_read_only(&Options::default(), path, false).map_err(open_err)?
        } else {
            std::fs::create_dir_all(path)?;
            let mut opts = Options::default();
            opts.create_if_missing(true);
            DB::open(&opts, path).map_err(open_err)?
        };

        debug!(path = %path.display(), read_only, "Opened destination store");
        Ok(Self {
            db: Arc::new(db),
            read_only,
        })
    }

    pub fn db(&self) -> &Arc<DB> {
        &self.db
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    pub fn scan(&self, range: ScanRange) -> RecordIter<'_> {
        rocks_scan(&self.db, range)
    }
}

//! Error types shared by every pass.
//!
//! Only I/O-class failures surface as `EngineError`. Short keys, bad value
//! widths and unresolvable canonical keys are counted in the run report and
//! never abort a pass.

use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to open {role} store at {path}: {message}")]
    Open {
        role: &'static str,
        path: String,
        message: String,
    },

    #[error(transparent)]
    Rocks(#[from] rocksdb::Error),

    #[error("leveldb error: {0}")]
    LevelDb(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("run cancelled after {committed_ops} committed operations")]
    Cancelled { committed_ops: u64 },

    #[error("destination store is read-only (dry run)")]
    ReadOnly,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<rusty_leveldb::Status> for EngineError {
    fn from(status: rusty_leveldb::Status) -> Self {
        EngineError::LevelDb(format!("{:?}", status))
    }
}

/// Key-shape failures produced by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key of {len} bytes is shorter than the {min}-byte envelope minimum")]
    TooShort { len: usize, min: usize },
}

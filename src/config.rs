//! Engine configuration
//!
//! Loaded from an optional `chainrepair.toml` layered with `CHAINREPAIR_*`
//! environment variables, then validated and decoded into `EngineSettings`.
//!
//! ```toml
//! source_path = "~/dumps/chain-db"
//! dest_path = "/data/chain-repaired"
//! prefix_len = 3
//! suffix_len = 0
//! namespace_id = "65766d"        # hex, "evm"
//! batch_size = 10000
//! ambiguity_policy = "reject"
//! ```

use std::path::{Path, PathBuf};

use alloy_primitives::B256;
use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;
use tracing::debug;

use crate::constants::{DEFAULT_BATCH_SIZE, HASH_LEN};
use crate::error::{EngineError, Result};
use crate::key_codec::{DestinationSchema, Envelope};
use crate::resolver::AmbiguityPolicy;
use crate::store::SourceFormat;
use crate::stripper::{ChainIdRewrite, StripperOptions};

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_NAME: &str = "chainrepair";

/// Environment variable prefix (`CHAINREPAIR_BATCH_SIZE=5000`)
pub const ENV_PREFIX: &str = "CHAINREPAIR";

/// Raw configuration as read from file and environment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub source_path: String,
    pub source_format: SourceFormat,
    pub dest_path: String,

    /// Source envelope widths
    pub prefix_len: usize,
    pub suffix_len: usize,
    /// Hex; source keys not starting with it are out of scope
    pub namespace_id: Option<String>,

    /// ASCII prefix for destination keys
    pub dest_prefix: String,
    /// Tags written without `dest_prefix`
    pub unprefixed_tags: Vec<u8>,

    /// Hex chain identifier replaced in payloads and values
    pub chain_id_from: Option<String>,
    pub chain_id_to: Option<String>,

    pub batch_size: usize,
    pub dry_run: bool,
    pub include_state: bool,
    pub passthrough_keys: Vec<String>,
    pub record_limit: Option<u64>,
    pub ambiguity_policy: AmbiguityPolicy,

    pub verify_header_hash: bool,
    pub cleanup_legacy: bool,
    pub repair_canonical: bool,

    /// Point the head keys at the tip after a walk that reaches genesis
    pub write_head_pointers: bool,
    /// Raw destination keys holding the head block hash
    pub head_keys: Vec<String>,

    /// Explicit walk start; both or neither
    pub tip_height: Option<u64>,
    pub tip_hash: Option<String>,

    /// Write the Prometheus text dump here at the end of the run
    pub metrics_file: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_path: String::new(),
            source_format: SourceFormat::Rocksdb,
            dest_path: String::new(),
            prefix_len: 33,
            suffix_len: 8,
            namespace_id: None,
            dest_prefix: String::new(),
            unprefixed_tags: Vec::new(),
            chain_id_from: None,
            chain_id_to: None,
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            include_state: false,
            passthrough_keys: [
                "LastAccepted",
                "last_accepted_key",
                "lastAccepted",
                "lastFinalized",
                "LastFinalizedKey",
                "vm_state",
                "chain_state",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            record_limit: None,
            ambiguity_policy: AmbiguityPolicy::Reject,
            verify_header_hash: true,
            cleanup_legacy: true,
            repair_canonical: true,
            write_head_pointers: true,
            head_keys: ["LastBlock", "LastHeader", "LastFast", "LastPivot"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tip_height: None,
            tip_hash: None,
            metrics_file: None,
        }
    }
}

/// Validated, decoded configuration handed to the pipeline
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub source_path: PathBuf,
    pub source_format: SourceFormat,
    pub dest_path: PathBuf,
    pub stripper: StripperOptions,
    pub batch_size: usize,
    pub dry_run: bool,
    pub verify_header_hash: bool,
    pub cleanup_legacy: bool,
    pub repair_canonical: bool,
    /// Empty when head pointers are not written
    pub head_keys: Vec<Vec<u8>>,
    pub tip: Option<(u64, B256)>,
    pub metrics_file: Option<PathBuf>,
}

impl EngineSettings {
    pub fn schema(&self) -> &DestinationSchema {
        &self.stripper.schema
    }

    pub fn envelope(&self) -> Envelope {
        self.stripper.envelope
    }
}

impl EngineConfig {
    /// Load from `path` (required) or the default file (optional), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => ConfigFile::from(p).required(true),
            None => ConfigFile::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let engine: EngineConfig = config.try_deserialize()?;
        debug!(?engine, "Configuration loaded");
        Ok(engine)
    }

    /// Validate and decode into settings
    pub fn settings(&self) -> Result<EngineSettings> {
        if self.source_path.is_empty() {
            return Err(EngineError::Config("source_path is not set".to_string()));
        }
        if self.dest_path.is_empty() {
            return Err(EngineError::Config("dest_path is not set".to_string()));
        }
        if expand_path(&self.source_path) == expand_path(&self.dest_path) {
            return Err(EngineError::Config("source_path and dest_path must differ".to_string()));
        }
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be at least 1".to_string()));
        }

        let chain_id_rewrite = match (&self.chain_id_from, &self.chain_id_to) {
            (Some(from), Some(to)) => Some(ChainIdRewrite::new(
                decode_hex("chain_id_from", from)?,
                decode_hex("chain_id_to", to)?,
            )?),
            (None, None) => None,
            _ => {
                return Err(EngineError::Config(
                    "chain_id_from and chain_id_to must be set together".to_string(),
                ))
            }
        };

        let tip = match (self.tip_height, &self.tip_hash) {
            (Some(height), Some(hash)) => {
                let bytes = decode_hex("tip_hash", hash)?;
                if bytes.len() != HASH_LEN {
                    return Err(EngineError::Config(format!(
                        "tip_hash must be {} bytes, got {}",
                        HASH_LEN,
                        bytes.len()
                    )));
                }
                Some((height, B256::from_slice(&bytes)))
            }
            (None, None) => None,
            _ => {
                return Err(EngineError::Config(
                    "tip_height and tip_hash must be set together".to_string(),
                ))
            }
        };

        let namespace_id = self
            .namespace_id
            .as_deref()
            .map(|ns| decode_hex("namespace_id", ns))
            .transpose()?;

        let stripper = StripperOptions {
            envelope: Envelope::new(self.prefix_len, self.suffix_len),
            namespace_id,
            schema: DestinationSchema::new(
                self.dest_prefix.as_bytes().to_vec(),
                self.unprefixed_tags.clone(),
            ),
            include_state: self.include_state,
            passthrough_keys: self
                .passthrough_keys
                .iter()
                .filter(|k| !k.is_empty())
                .map(|k| k.as_bytes().to_vec())
                .collect(),
            limit: self.record_limit,
            chain_id_rewrite,
            ambiguity_policy: self.ambiguity_policy,
        };

        Ok(EngineSettings {
            source_path: expand_path(&self.source_path),
            source_format: self.source_format,
            dest_path: expand_path(&self.dest_path),
            stripper,
            batch_size: self.batch_size,
            dry_run: self.dry_run,
            verify_header_hash: self.verify_header_hash,
            cleanup_legacy: self.cleanup_legacy,
            repair_canonical: self.repair_canonical,
            head_keys: if self.write_head_pointers {
                self.head_keys
                    .iter()
                    .filter(|k| !k.is_empty())
                    .map(|k| k.as_bytes().to_vec())
                    .collect()
            } else {
                Vec::new()
            },
            tip,
            metrics_file: self.metrics_file.as_deref().map(expand_path),
        })
    }
}

/// `~` expansion for configured paths
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Hex with an optional `0x` prefix
pub fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(trimmed).map_err(|e| EngineError::Config(format!("{} is not valid hex: {}", field, e)))
}

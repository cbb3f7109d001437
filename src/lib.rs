//! chainrepair
//!
//! Offline de-namespacing and canonical index reconstruction for
//! EVM-style chain key-value dumps.
//!
//! A run is a fixed sequence of passes (see [`pipeline`]): build the
//! hash -> height index from the source, strip namespace envelopes into a
//! clean destination, convert legacy canonical keys, walk parent pointers
//! from the tip to genesis, and verify the result.

pub mod batch_writer;
pub mod canonical_chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod hash_index;
pub mod header;
pub mod key_codec;
pub mod legacy;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod store;
pub mod stripper;
pub mod telemetry;
pub mod tip_finder;

#[cfg(test)]
mod pipeline_tests;
#[cfg(test)]
mod test_support;

pub use error::{EngineError, Result};
pub use pipeline::{Pipeline, Stages};
pub use report::RunReport;

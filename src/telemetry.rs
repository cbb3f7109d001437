//! Telemetry Module - Structured Logging with Tracing
//!
//! - Structured logging with tracing
//! - JSON vs pretty format support
//! - Optional file logging with rotation
//! - RUST_LOG env var support
//! - Sampling and truncation helpers for per-record progress logs

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{EngineError, Result};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub log_level: String,
    /// Log format: "json" or "pretty"
    pub log_format: String,
    /// Optional log file path (None = console only)
    pub log_file: Option<String>,
    /// Rotation interval: "daily", "hourly", "never"
    pub rotation: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: std::env::var("CHAINREPAIR_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            log_file: std::env::var("CHAINREPAIR_LOG_FILE").ok(),
            rotation: "daily".to_string(),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// The returned guard must be held until exit when logging to a file,
/// otherwise buffered lines are lost.
pub fn init_tracing(config: TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let json = config.log_format == "json";

    let Some(log_file_path) = config.log_file else {
        if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_current_span(true).with_span_list(true))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false).with_thread_ids(false))
                .init();
        }
        return Ok(None);
    };

    let path = std::path::Path::new(&log_file_path);
    let directory = path
        .parent()
        .ok_or_else(|| EngineError::Config(format!("log file {} has no parent directory", log_file_path)))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| EngineError::Config(format!("log file {} has no file name", log_file_path)))?;
    let file_stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("chainrepair");

    let file_appender = match config.rotation.as_str() {
        "hourly" => rolling::hourly(directory, file_stem),
        "never" => rolling::never(directory, file_name),
        _ => rolling::daily(directory, file_stem),
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(non_blocking),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(non_blocking),
            )
            .init();
    }

    Ok(Some(guard))
}

/// Truncate hex string for logging
///
/// Example: "0a1b2c3d4e5f67890a1b2c3d4e5f6789" → "0a1b2c3d4e5f6789..."
pub fn truncate_hex(hex: &str, len: usize) -> String {
    if hex.len() <= len {
        hex.to_string()
    } else {
        format!("{}...", &hex[..len])
    }
}

/// Hex-encode bytes and truncate to 16 chars
pub fn short_hex(bytes: &[u8]) -> String {
    truncate_hex(&hex::encode(bytes), 16)
}

/// Returns true every `interval` calls (e.g., every 100,000)
pub fn should_log_progress(counter: &AtomicU64, interval: u64) -> bool {
    let count = counter.fetch_add(1, Ordering::Relaxed);
    count % interval == 0
}

/// Sampled progress counter for per-record loops
pub struct ProgressCounter {
    counter: AtomicU64,
    interval: u64,
}

impl ProgressCounter {
    pub fn new(interval: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            interval: interval.max(1),
        }
    }

    pub fn should_log(&self) -> bool {
        should_log_progress(&self.counter, self.interval)
    }

    pub fn get(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

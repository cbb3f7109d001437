/// Batch Committer
///
/// Every destination write goes through here. Operations accumulate in memory
/// and are committed as one atomic RocksDB `WriteBatch` written with
/// `sync = true`, so a crash leaves the destination at the last commit
/// boundary and never in the middle of a batch.
///
/// Cancellation is cooperative and only observed right after a durable commit:
/// the committed prefix is always valid, and re-running the pass is idempotent.
use std::sync::Arc;

use rocksdb::{WriteBatch, WriteOptions, DB};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::metrics;
use crate::store::DestStore;

/// A single pending destination operation
#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

pub struct BatchCommitter {
    /// `None` in dry-run mode
    db: Option<Arc<DB>>,
    operations: Vec<Operation>,
    batch_size: usize,
    cancel: CancellationToken,
    committed_ops: u64,
    commits: u64,
}

impl BatchCommitter {
    /// Committer writing to `dest`.
    ///
    /// # Arguments
    /// * `dest` - destination store; must be writable
    /// * `batch_size` - operations per commit (0 is treated as 1)
    /// * `cancel` - checked after every durable commit
    pub fn new(dest: &DestStore, batch_size: usize, cancel: CancellationToken) -> Result<Self> {
        if dest.is_read_only() {
            return Err(EngineError::ReadOnly);
        }
        Ok(Self {
            db: Some(dest.db().clone()),
            operations: Vec::new(),
            batch_size: batch_size.max(1),
            cancel,
            committed_ops: 0,
            commits: 0,
        })
    }

    /// Committer that counts operations and writes nothing
    pub fn dry_run(batch_size: usize, cancel: CancellationToken) -> Self {
        Self {
            db: None,
            operations: Vec::new(),
            batch_size: batch_size.max(1),
            cancel,
            committed_ops: 0,
            commits: 0,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.db.is_none()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.operations.push(Operation::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.operations.push(Operation::Delete { key });
    }

    /// Check if batch should be committed based on size
    pub fn should_flush(&self) -> bool {
        self.operations.len() >= self.batch_size
    }

    pub fn pending_count(&self) -> usize {
        self.operations.len()
    }

    /// Operations durably committed so far (counted but not written in dry-run)
    pub fn committed_ops(&self) -> u64 {
        self.committed_ops
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Commit if the pending batch has reached its size limit
    pub async fn maybe_commit(&mut self) -> Result<()> {
        if self.should_flush() {
            self.commit().await?;
        }
        Ok(())
    }

    /// Commit every pending operation as one atomic, synced write.
    ///
    /// On a write error nothing from this batch is visible and the pending
    /// operations are dropped. Returns `Cancelled` when the token fired,
    /// after the batch is durable.
    pub async fn commit(&mut self) -> Result<()> {
        if !self.operations.is_empty() {
            let pending_ops = self.operations.len();
            let operations = std::mem::take(&mut self.operations);

            match &self.db {
                None => {
                    debug!(pending_ops, "Dry run: batch counted, not written");
                }
                Some(db) => {
                    let timer = metrics::Timer::new();
                    let db = db.clone();

                    let write_result = tokio::task::spawn_blocking(move || {
                        let mut batch = WriteBatch::default();
                        for op in operations {
                            match op {
                                Operation::Put { key, value } => batch.put(key, value),
                                Operation::Delete { key } => batch.delete(key),
                            }
                        }
                        let mut opts = WriteOptions::default();
                        opts.set_sync(true);
                        db.write_opt(batch, &opts)
                    })
                    .await?;

                    let elapsed_secs = timer.elapsed_secs();
                    if let Err(e) = write_result {
                        error!(batch_size = pending_ops, error = %e, "Batch commit failed");
                        return Err(e.into());
                    }

                    metrics::COMMIT_DURATION.observe(elapsed_secs);
                    metrics::COMMITTED_OPS.inc_by(pending_ops as u64);

                    if elapsed_secs > 10.0 {
                        warn!(batch_size = pending_ops, duration_secs = elapsed_secs, "Slow batch commit");
                    } else {
                        debug!(
                            batch_size = pending_ops,
                            duration_ms = format!("{:.2}", elapsed_secs * 1000.0),
                            "Batch committed"
                        );
                    }
                }
            }

            self.committed_ops += pending_ops as u64;
            self.commits += 1;
        }

        if self.cancel.is_cancelled() {
            info!(committed_ops = self.committed_ops, "Cancellation observed at commit boundary");
            return Err(EngineError::Cancelled {
                committed_ops: self.committed_ops,
            });
        }
        Ok(())
    }

    /// Commit the final partial batch and return the total committed
    pub async fn finish(mut self) -> Result<u64> {
        self.commit().await?;
        Ok(self.committed_ops)
    }

    /// Drop pending operations without writing; returns how many were dropped
    pub fn discard(&mut self) -> usize {
        let dropped = self.operations.len();
        self.operations.clear();
        dropped
    }
}

impl Drop for BatchCommitter {
    fn drop(&mut self) {
        if !self.operations.is_empty() {
            warn!(
                pending_ops = self.operations.len(),
                "Discarding uncommitted operations"
            );
        }
    }
}

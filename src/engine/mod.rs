mod cancellation;
mod catalog;
mod clock;
mod conflict;
mod coordinator;
mod error;
mod holds;
mod inventory;
mod isolation;
mod queries;
mod retry;
mod tables;
mod txn;

pub use cancellation::{CancelDecision, cancellation_decision};
pub use catalog::quote;
pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{ConflictScope, conflicts, has_conflict};
pub use coordinator::{AttemptState, BookingRequest};
pub use error::EngineError;
pub use holds::HoldRequest;
pub use isolation::PhantomProbe;
pub use tables::{RowKey, Tables, Versioned};
pub use txn::{IsolationLevel, Transaction};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::EngineConfig;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Rewrite the log as a single snapshot commit of its own contents.
    Compact {
        now: Ms,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => {
                            batch.push((commit, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            timed_flush(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    timed_flush(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type Batch = Vec<(Commit, oneshot::Sender<io::Result<()>>)>;

fn timed_flush(wal: &mut Wal, batch: &mut Batch) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Commit, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(commit, _)| wal.append_buffered(commit))
        .and_then(|()| wal.flush_sync());
    // Every caller in the batch is told it failed, so none of its frames may
    // survive to be replayed.
    if result.is_err()
        && let Err(e) = wal.discard_pending()
    {
        tracing::error!(error = %e, "could not discard failed WAL batch");
    }
    result
}

fn respond_batch(batch: &mut Batch, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { now, response } => {
            let _ = response.send(compact_in_place(wal, now));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Rebuild state from the log into scratch tables and write it back as one
/// commit. Runs on the writer task, so no append can interleave.
fn compact_in_place(wal: &mut Wal, now: Ms) -> io::Result<()> {
    wal.flush_sync()?;
    let scratch = Tables::new();
    for commit in Wal::replay(wal.path())? {
        scratch.replay(&commit);
    }
    wal.rewrite(&[scratch.snapshot(now)])
}

pub struct Engine {
    pub(crate) tables: Tables,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(crate) config: EngineConfig,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, config: EngineConfig) -> io::Result<Self> {
        Self::with_clock(wal_path, config, Arc::new(SystemClock))
    }

    /// Open the engine, replaying every commit found in the WAL.
    pub fn with_clock(
        wal_path: PathBuf,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let (wal, commits) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let tables = Tables::new();
        for commit in &commits {
            tables.replay(commit);
        }
        tracing::info!(
            path = %wal_path.display(),
            commits = commits.len(),
            resources = tables.resources.len(),
            bookings = tables.bookings.len(),
            "engine state replayed"
        );

        Ok(Self {
            tables,
            wal_tx,
            config,
            clock,
        })
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Write a commit to the WAL via the background group-commit writer.
    pub(crate) async fn wal_append(&self, commit: &Commit) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                commit: commit.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                now: self.now_ms(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

//! Correlated request/reply over the worker channel
//!
//! Every request gets a fresh id and an entry in the pending table holding
//! the caller's continuation. A background task reads reply frames and
//! settles the matching entry. An entry is removed exactly once: by its
//! reply, by its deadline, or by the worker going away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::protocol::{Operation, Reply, ReplyFrame, RequestFrame, WorkerError, PROTOCOL_VERSION};

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("worker failed: {0}")]
    WorkerFailure(String),

    #[error("worker reported {0}")]
    Remote(#[from] WorkerError),

    #[error("broker closed, the worker must be restarted")]
    Closed,

    #[error("failed to encode request: {0}")]
    Codec(#[from] serde_json::Error),
}

type Waiter = oneshot::Sender<Result<Reply, BrokerError>>;

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, Waiter>,
    /// Set once the reply channel closes; nothing is accepted afterwards
    failed: bool,
}

fn lock(pending: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the entry when the caller stops waiting, whatever the reason
struct PendingGuard<'a> {
    pending: &'a Mutex<PendingTable>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).waiters.remove(&self.id);
    }
}

pub struct Broker {
    next_id: AtomicU64,
    outbound: mpsc::Sender<String>,
    pending: Arc<Mutex<PendingTable>>,
    reader: JoinHandle<()>,
}

impl Broker {
    /// Attach to a worker's request sink and reply stream.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let reader = tokio::spawn(read_replies(inbound, Arc::clone(&pending)));
        Self {
            next_id: AtomicU64::new(1),
            outbound,
            pending,
            reader,
        }
    }

    /// Send `operation` and wait at most `timeout` for its reply
    pub async fn send(
        &self,
        operation: Operation,
        timeout: Duration,
    ) -> Result<Reply, BrokerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = operation.name();
        let text = RequestFrame::new(id, operation).encode()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock(&self.pending);
            if table.failed {
                return Err(BrokerError::Closed);
            }
            table.waiters.insert(id, tx);
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        tracing::debug!(id, operation = name, "sending request");
        let exchange = async {
            self.outbound
                .send(text)
                .await
                .map_err(|_| {
                    BrokerError::WorkerFailure("worker is not accepting requests".into())
                })?;
            rx.await
                .map_err(|_| BrokerError::WorkerFailure("reply channel dropped".into()))?
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(id, operation = name, ?timeout, "request timed out");
                Err(BrokerError::Timeout {
                    operation: name,
                    timeout,
                })
            }
        }
    }

    /// Whether the worker has gone away
    pub fn is_failed(&self) -> bool {
        lock(&self.pending).failed
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).waiters.len()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies(mut inbound: mpsc::Receiver<String>, pending: Arc<Mutex<PendingTable>>) {
    while let Some(text) = inbound.recv().await {
        let frame = match ReplyFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable reply frame dropped");
                continue;
            }
        };

        let Some(waiter) = lock(&pending).waiters.remove(&frame.id) else {
            tracing::warn!(id = frame.id, "reply for unknown request dropped");
            continue;
        };

        let result = if frame.version != PROTOCOL_VERSION {
            Err(BrokerError::WorkerFailure(format!(
                "reply uses protocol version {}, expected {}",
                frame.version, PROTOCOL_VERSION
            )))
        } else {
            Result::<Reply, WorkerError>::from(frame.outcome).map_err(BrokerError::Remote)
        };
        // The caller may have given up between removal and here
        let _ = waiter.send(result);
    }

    let drained: Vec<Waiter> = {
        let mut table = lock(&pending);
        table.failed = true;
        table.waiters.drain().map(|(_, waiter)| waiter).collect()
    };
    if drained.is_empty() {
        tracing::info!("worker channel closed");
    } else {
        tracing::error!(pending = drained.len(), "worker exited with requests in flight");
    }
    for waiter in drained {
        let _ = waiter.send(Err(BrokerError::WorkerFailure("worker exited".into())));
    }
}

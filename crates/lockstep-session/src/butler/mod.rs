//! Non-realtime worker for locate settling and disk refills.
//!
//! The audio thread only ever talks to the butler through a [`ButlerHandle`]:
//! a bounded queue it pushes to with `try_send`. When the queue is full the
//! request is counted as dropped and the caller retries on a later cycle.

mod metrics;
mod request;
mod thread;

pub use metrics::{ButlerMetrics, ButlerMetricsSnapshot};
pub use request::ButlerCommand;
pub use thread::{Butler, DEFAULT_QUEUE_DEPTH};

use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;

/// Realtime-safe sending side of the butler queue.
#[derive(Clone)]
pub struct ButlerHandle {
    tx: Sender<ButlerCommand>,
    metrics: Arc<ButlerMetrics>,
}

impl ButlerHandle {
    pub(crate) fn new(tx: Sender<ButlerCommand>, metrics: Arc<ButlerMetrics>) -> Self {
        Self { tx, metrics }
    }

    /// Returns `false` if the request was not queued.
    pub fn request_locate(&self, seq: u64, target: i64) -> bool {
        self.try_send(ButlerCommand::Locate { seq, target })
    }

    pub fn request_refill(&self) -> bool {
        self.try_send(ButlerCommand::Refill)
    }

    pub fn metrics(&self) -> &Arc<ButlerMetrics> {
        &self.metrics
    }

    fn try_send(&self, command: ButlerCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => {
                self.metrics.record_queue_depth(self.tx.len());
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.metrics.record_dropped();
                false
            }
        }
    }
}

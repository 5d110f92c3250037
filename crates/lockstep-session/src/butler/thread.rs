//! Butler thread.

use super::metrics::ButlerMetrics;
use super::request::ButlerCommand;
use super::ButlerHandle;
use crate::session::Session;
use crate::{Error, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;
use tracing::{debug, error};

pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// How often an idle butler wakes to check for dropped requests.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct Butler {
    command_tx: Sender<ButlerCommand>,
    command_rx: Option<Receiver<ButlerCommand>>,
    session: Arc<Session>,
    metrics: Arc<ButlerMetrics>,
    shutdown: Arc<AtomicBool>,
    /// Simulated time a locate takes to settle
    seek_latency: Duration,
    thread_handle: Option<JoinHandle<()>>,
}

impl Butler {
    pub fn new(queue_depth: usize, session: Arc<Session>) -> Self {
        let (tx, rx) = bounded(queue_depth.max(1));
        Self {
            command_tx: tx,
            command_rx: Some(rx),
            session,
            metrics: Arc::new(ButlerMetrics::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            seek_latency: Duration::ZERO,
            thread_handle: None,
        }
    }

    pub fn with_seek_latency(mut self, latency: Duration) -> Self {
        self.seek_latency = latency;
        self
    }

    pub fn handle(&self) -> ButlerHandle {
        ButlerHandle::new(self.command_tx.clone(), Arc::clone(&self.metrics))
    }

    pub fn metrics(&self) -> Arc<ButlerMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.thread_handle.is_some() {
            return Ok(());
        }
        let rx = self.command_rx.take().ok_or(Error::ButlerUnavailable)?;

        let worker = Worker {
            rx,
            session: Arc::clone(&self.session),
            metrics: Arc::clone(&self.metrics),
            shutdown: Arc::clone(&self.shutdown),
            seek_latency: self.seek_latency,
            dropped_seen: self.metrics.dropped_requests(),
        };

        let handle = thread::Builder::new()
            .name("lockstep-butler".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                worker.run();
            })
            .map_err(|source| Error::ButlerSpawn {
                name: "butler",
                source,
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Block until everything queued so far has been handled.
    pub fn flush(&self) -> Result<()> {
        if self.thread_handle.is_none() {
            return Err(Error::ButlerUnavailable);
        }
        let (reply_tx, reply_rx) = bounded(1);
        self.command_tx
            .send(ButlerCommand::Flush(reply_tx))
            .map_err(|_| Error::ButlerUnavailable)?;
        reply_rx.recv().map_err(|_| Error::ButlerUnavailable)
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.try_send(ButlerCommand::Shutdown);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Butler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    rx: Receiver<ButlerCommand>,
    session: Arc<Session>,
    metrics: Arc<ButlerMetrics>,
    shutdown: Arc<AtomicBool>,
    seek_latency: Duration,
    dropped_seen: u64,
}

impl Worker {
    fn run(mut self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.check_dropped();

            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(ButlerCommand::Shutdown) => break,
                Ok(command) => self.handle(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("butler exiting");
    }

    fn handle(&mut self, command: ButlerCommand) {
        match command {
            ButlerCommand::Locate { seq, target } => {
                if !self.seek_latency.is_zero() {
                    thread::sleep(self.seek_latency);
                }
                self.session.complete_locate(seq);
                self.metrics.record_locate();
                debug!(seq, target, "locate settled");
            }
            ButlerCommand::Refill => {
                self.metrics.record_refill();
            }
            ButlerCommand::Flush(reply) => {
                self.check_dropped();
                let _ = reply.send(());
            }
            ButlerCommand::Shutdown => {}
        }
    }

    fn check_dropped(&mut self) {
        let dropped = self.metrics.dropped_requests();
        if dropped > self.dropped_seen {
            error!(
                dropped = dropped - self.dropped_seen,
                total = dropped,
                "butler queue full, audio thread requests were dropped"
            );
            self.dropped_seen = dropped;
        }
    }
}

//! Backend event watcher.
//!
//! Backend resets and xruns are reported off the audio thread. The watcher
//! takes the process lock (so the callback skips cycles while masters are
//! being rebuilt) and restarts or resyncs the manager.

use crate::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use lockstep_core::{AudioBackend, MasterEnv, TransportMasterManager};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    /// The backend came back, possibly with a new sample rate
    Reset,
    /// The audio stream dropped or repeated samples
    Xrun,
    Shutdown,
}

pub struct BackendWatcher {
    events_tx: Sender<BackendEvent>,
    handled: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl BackendWatcher {
    pub fn spawn(
        manager: Arc<TransportMasterManager>,
        backend: Arc<dyn AudioBackend>,
        process_lock: Arc<Mutex<()>>,
    ) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();
        let handled = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&handled);

        let handle = thread::Builder::new()
            .name("lockstep-watcher".into())
            .spawn(move || watch(events_rx, manager, backend, process_lock, counter))
            .map_err(|source| Error::ButlerSpawn {
                name: "watcher",
                source,
            })?;

        Ok(Self {
            events_tx,
            handled,
            thread_handle: Some(handle),
        })
    }

    /// Sender for the backend's notification callbacks.
    pub fn sender(&self) -> Sender<BackendEvent> {
        self.events_tx.clone()
    }

    pub fn notify(&self, event: BackendEvent) {
        if self.events_tx.send(event).is_err() {
            warn!(?event, "backend watcher has exited");
        }
    }

    /// Events processed so far.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        let _ = self.events_tx.send(BackendEvent::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackendWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(
    events: Receiver<BackendEvent>,
    manager: Arc<TransportMasterManager>,
    backend: Arc<dyn AudioBackend>,
    process_lock: Arc<Mutex<()>>,
    handled: Arc<AtomicU64>,
) {
    for event in events.iter() {
        match event {
            BackendEvent::Reset => {
                let _guard = process_lock.lock();
                let env = MasterEnv {
                    sample_rate: backend.sample_rate(),
                    timecode_format: manager.settings().timecode_format,
                    backend: Some(Arc::clone(&backend)),
                };
                match manager.restart(env) {
                    Ok(()) => debug!(
                        backend = backend.name(),
                        sample_rate = backend.sample_rate(),
                        "backend reset handled"
                    ),
                    Err(e) => error!("transport master restart failed: {e}"),
                }
            }
            BackendEvent::Xrun => {
                let _guard = process_lock.lock();
                manager.resync_xrun();
            }
            BackendEvent::Shutdown => break,
        }
        handled.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use lockstep_core::{ManagerEvent, SmpteFrameRate, SyncSettings};
    use std::time::{Duration, Instant};

    fn wait_for(watcher: &BackendWatcher, count: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while watcher.handled() < count {
            assert!(Instant::now() < deadline, "watcher stalled");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn manager() -> Arc<TransportMasterManager> {
        Arc::new(TransportMasterManager::new(
            MasterEnv {
                sample_rate: 48_000.0,
                timecode_format: SmpteFrameRate::Fps25,
                backend: None,
            },
            SyncSettings::default(),
        ))
    }

    #[test]
    fn test_reset_restarts_masters() {
        let manager = manager();
        let events = manager.events();
        let backend = Arc::new(DummyBackend::new(96_000.0, 256));
        let mut watcher = BackendWatcher::spawn(
            Arc::clone(&manager),
            backend,
            Arc::new(Mutex::new(())),
        )
        .unwrap();

        watcher.notify(BackendEvent::Reset);
        wait_for(&watcher, 1);
        assert!(events
            .try_iter()
            .any(|e| matches!(e, ManagerEvent::Restarted)));
        watcher.stop();
    }

    #[test]
    fn test_holds_process_lock_while_handling() {
        let lock = Arc::new(Mutex::new(()));
        let backend = Arc::new(DummyBackend::new(48_000.0, 256));
        let watcher =
            BackendWatcher::spawn(manager(), backend, Arc::clone(&lock)).unwrap();

        let guard = lock.lock();
        watcher.notify(BackendEvent::Xrun);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(watcher.handled(), 0);
        drop(guard);

        wait_for(&watcher, 1);
    }
}

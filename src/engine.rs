//! LockstepEngine that wires the manager, session and worker threads together

use crate::core::{
    AudioBackend, MasterStatus, MidiSyncSink, SampleClock, TransportMasterManager,
};
use crate::session::{
    BackendEvent, BackendWatcher, Butler, ButlerMetricsSnapshot, ProcessStats,
    ProcessStatsSnapshot, Processor, Session,
};
use crate::{Error, Result};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "midi-io")]
use lockstep_midi::MidiSyncInput;

/// A synchronized session transport.
///
/// The engine owns the non-realtime side: the butler, the backend watcher and
/// the master registry. The realtime side is a [`Processor`], taken once with
/// [`take_processor`](Self::take_processor) and moved into the audio callback.
///
/// # Example
///
/// ```
/// use lockstep::prelude::*;
///
/// let engine = LockstepEngine::builder().build()?;
/// let mut processor = engine.take_processor().expect("taken once");
///
/// engine.session().request_roll();
/// let mut out = [0.0f32; 512];
/// processor.process(512, &mut out);
/// assert_eq!(engine.session().position(), 512);
/// # Ok::<(), lockstep::Error>(())
/// ```
pub struct LockstepEngine {
    backend: Arc<dyn AudioBackend>,
    manager: Arc<TransportMasterManager>,
    session: Arc<Session>,
    clock: Arc<SampleClock>,
    butler: Butler,
    watcher: BackendWatcher,
    stats: Arc<ProcessStats>,
    processor: Mutex<Option<Processor>>,

    #[cfg(feature = "midi-io")]
    midi_inputs: Mutex<Vec<MidiSyncInput>>,
}

impl LockstepEngine {
    pub fn builder() -> crate::LockstepEngineBuilder {
        crate::LockstepEngineBuilder::default()
    }

    pub(crate) fn from_parts(
        backend: Arc<dyn AudioBackend>,
        manager: Arc<TransportMasterManager>,
        session: Arc<Session>,
        clock: Arc<SampleClock>,
        butler: Butler,
        watcher: BackendWatcher,
        processor: Processor,
    ) -> Self {
        Self {
            backend,
            manager,
            session,
            clock,
            butler,
            watcher,
            stats: processor.stats(),
            processor: Mutex::new(Some(processor)),

            #[cfg(feature = "midi-io")]
            midi_inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.backend.sample_rate()
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn manager(&self) -> &Arc<TransportMasterManager> {
        &self.manager
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Sample clock published by the process cycle, for stamping MIDI input.
    pub fn clock(&self) -> &Arc<SampleClock> {
        &self.clock
    }

    /// The realtime half. Returns `None` once taken.
    pub fn take_processor(&self) -> Option<Processor> {
        self.processor.lock().take()
    }

    pub fn stats(&self) -> ProcessStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn butler_metrics(&self) -> ButlerMetricsSnapshot {
        self.butler.metrics().snapshot()
    }

    /// Block until the butler has handled everything queued so far.
    pub fn flush_butler(&self) -> Result<()> {
        Ok(self.butler.flush()?)
    }

    /// Where backend callbacks report resets and xruns.
    pub fn backend_events(&self) -> Sender<BackendEvent> {
        self.watcher.sender()
    }

    pub fn notify_backend(&self, event: BackendEvent) {
        self.watcher.notify(event);
    }

    pub fn status(&self) -> Vec<MasterStatus> {
        self.manager.status()
    }

    /// Feed a MIDI-driven master by hand, stamping each message with the
    /// current sample time.
    pub fn feed_midi(&self, master: &str, message: &crate::SyncMessage) -> Result<()> {
        let sink = self.sink(master)?;
        sink.handle(message, self.clock.now());
        Ok(())
    }

    pub fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        self.manager.to_config().save(path)?;
        Ok(())
    }

    /// Route a hardware MIDI port into the named MTC or MIDI clock master.
    #[cfg(feature = "midi-io")]
    pub fn connect_midi(&self, port: &str, master: &str) -> Result<()> {
        let sink = self.sink(master)?;
        let clock = Arc::clone(&self.clock);
        let handler_sink = Arc::clone(&sink);
        let input = MidiSyncInput::connect_by_name(port, move |_, message| {
            handler_sink.handle(&message, clock.now());
        })?;
        sink.set_connected(true);
        self.midi_inputs.lock().push(input);
        Ok(())
    }

    fn sink(&self, master: &str) -> Result<Arc<dyn MidiSyncSink>> {
        self.manager.midi_sink(master)?.ok_or_else(|| {
            Error::Core(lockstep_core::Error::InvalidConfig(format!(
                "master '{master}' does not take MIDI input"
            )))
        })
    }
}

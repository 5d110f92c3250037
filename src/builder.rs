//! Builder for configuring and constructing a `LockstepEngine`.

use crate::core::{AudioBackend, MasterEnv, SampleClock, TransportMasterManager, TransportMastersConfig};
use crate::session::{BackendWatcher, Butler, DummyBackend, Processor, Session};
use crate::{LockstepEngine, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Without an explicit [`backend`](Self::backend) the engine runs on a
/// [`DummyBackend`] built from the sample rate, block size and io latency
/// given here. With one, those three come from the backend.
///
/// # Example
///
/// ```
/// use lockstep::prelude::*;
///
/// let engine = LockstepEngine::builder()
///     .sample_rate(48_000.0)
///     .block_size(256)
///     .build()?;
///
/// assert_eq!(engine.sample_rate(), 48_000.0);
/// assert_eq!(engine.manager().names().len(), 4);
/// # Ok::<(), lockstep::Error>(())
/// ```
pub struct LockstepEngineBuilder {
    sample_rate: f64,
    block_size: u32,
    io_latency: u32,
    queue_depth: usize,
    seek_latency: Duration,
    config: TransportMastersConfig,
    config_file: Option<PathBuf>,
    backend: Option<Arc<dyn AudioBackend>>,
}

impl Default for LockstepEngineBuilder {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: 512,
            io_latency: 0,
            queue_depth: crate::session::butler::DEFAULT_QUEUE_DEPTH,
            seek_latency: Duration::ZERO,
            config: TransportMastersConfig::default(),
            config_file: None,
            backend: None,
        }
    }
}

impl LockstepEngineBuilder {
    /// Default: 48000
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Default: 512
    pub fn block_size(mut self, frames: u32) -> Self {
        self.block_size = frames;
        self
    }

    /// Default: 0
    pub fn io_latency(mut self, frames: u32) -> Self {
        self.io_latency = frames;
        self
    }

    /// Butler command queue capacity. Default: 32
    pub fn butler_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Time the butler spends settling each locate. Default: none
    pub fn seek_latency(mut self, latency: Duration) -> Self {
        self.seek_latency = latency;
        self
    }

    pub fn config(mut self, config: TransportMastersConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the master configuration from a TOML file at build time.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<LockstepEngine> {
        let config = match &self.config_file {
            Some(path) => TransportMastersConfig::load(path)?,
            None => self.config,
        };

        let backend: Arc<dyn AudioBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(
                DummyBackend::new(self.sample_rate, self.block_size)
                    .with_io_latency(self.io_latency),
            ),
        };
        let sample_rate = backend.sample_rate();

        let env = MasterEnv {
            sample_rate,
            timecode_format: config.sync.timecode_format,
            backend: Some(Arc::clone(&backend)),
        };
        let manager = Arc::new(TransportMasterManager::from_config(&config, env)?);

        let session = Arc::new(Session::new());
        let mut butler =
            Butler::new(self.queue_depth, Arc::clone(&session)).with_seek_latency(self.seek_latency);
        butler.start()?;

        let process_lock = Arc::new(Mutex::new(()));
        let clock = Arc::new(SampleClock::new(sample_rate));
        let processor = Processor::new(
            Arc::clone(&session),
            Arc::clone(&manager),
            Arc::clone(&backend),
            Arc::clone(&clock),
            butler.handle(),
            Arc::clone(&process_lock),
        );
        let watcher = BackendWatcher::spawn(
            Arc::clone(&manager),
            Arc::clone(&backend),
            process_lock,
        )?;

        Ok(LockstepEngine::from_parts(
            backend, manager, session, clock, butler, watcher, processor,
        ))
    }
}

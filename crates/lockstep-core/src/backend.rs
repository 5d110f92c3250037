//! Contract the audio backend offers to transport sync.

/// Transport state reported by a backend with its own transport (JACK-style).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendTransport {
    pub rolling: bool,
    pub speed: f64,
    pub position: i64,
}

/// The audio backend as seen by transport masters and the process cycle.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn sample_rate(&self) -> f64;

    /// Samples per process cycle.
    fn block_size(&self) -> u32;

    /// Sample time at the start of the current cycle.
    fn sample_time(&self) -> i64;

    /// Worst-case capture + playback latency in samples.
    fn io_latency(&self) -> u32;

    fn running(&self) -> bool;

    /// Whether the backend can report a transport of its own.
    fn has_native_transport(&self) -> bool {
        false
    }

    fn transport_state(&self) -> Option<BackendTransport> {
        None
    }
}

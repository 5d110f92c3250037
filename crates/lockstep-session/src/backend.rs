//! Deterministic backend for tests and headless runs.

use lockstep_core::{AtomicDouble, AtomicFlag, AudioBackend, BackendTransport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// A backend whose clock only moves when [`advance`](Self::advance) is
/// called. Optionally emulates a JACK-style transport of its own.
pub struct DummyBackend {
    sample_rate: AtomicDouble,
    block_size: AtomicU32,
    sample_time: AtomicI64,
    io_latency: AtomicU32,
    running: AtomicFlag,
    transport: Option<Mutex<BackendTransport>>,
}

impl DummyBackend {
    pub fn new(sample_rate: f64, block_size: u32) -> Self {
        Self {
            sample_rate: AtomicDouble::new(sample_rate),
            block_size: AtomicU32::new(block_size),
            sample_time: AtomicI64::new(0),
            io_latency: AtomicU32::new(0),
            running: AtomicFlag::new(true),
            transport: None,
        }
    }

    pub fn with_io_latency(self, latency: u32) -> Self {
        self.io_latency.store(latency, Ordering::Relaxed);
        self
    }

    pub fn with_native_transport(mut self) -> Self {
        self.transport = Some(Mutex::new(BackendTransport {
            rolling: false,
            speed: 1.0,
            position: 0,
        }));
        self
    }

    /// Move the clock on by one block, rolling the native transport with it.
    pub fn advance(&self) {
        let block = self.block_size();
        self.sample_time
            .fetch_add(i64::from(block), Ordering::AcqRel);

        if let Some(transport) = &self.transport {
            let mut t = transport.lock();
            if t.rolling {
                t.position += (t.speed * f64::from(block)).round() as i64;
            }
        }
    }

    /// No-op without a native transport.
    pub fn set_transport(&self, rolling: bool, speed: f64, position: i64) {
        if let Some(transport) = &self.transport {
            *transport.lock() = BackendTransport {
                rolling,
                speed,
                position,
            };
        }
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.sample_rate.set(sample_rate);
    }

    pub fn set_block_size(&self, block_size: u32) {
        self.block_size.store(block_size, Ordering::Relaxed);
    }

    pub fn set_running(&self, running: bool) {
        self.running.set(running);
    }
}

impl AudioBackend for DummyBackend {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate.get()
    }

    fn block_size(&self) -> u32 {
        self.block_size.load(Ordering::Relaxed)
    }

    fn sample_time(&self) -> i64 {
        self.sample_time.load(Ordering::Acquire)
    }

    fn io_latency(&self) -> u32 {
        self.io_latency.load(Ordering::Relaxed)
    }

    fn running(&self) -> bool {
        self.running.get()
    }

    fn has_native_transport(&self) -> bool {
        self.transport.is_some()
    }

    fn transport_state(&self) -> Option<BackendTransport> {
        self.transport.as_ref().map(|t| *t.lock())
    }
}

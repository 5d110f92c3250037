//! Host-visible session transport state.
//!
//! Every field is an atomic so UI and control threads can read the transport
//! without touching the audio thread. Only the process cycle writes position,
//! rolling and ratio; the butler writes `completed_locate`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use lockstep_core::{AtomicDouble, AtomicFlag, RollDisposition, SessionSnapshot};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Transport change asked for by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportRequest {
    Locate { target: i64, roll: RollDisposition },
    /// Zero stops; anything else rolls at that speed.
    Speed(f64),
}

pub struct Session {
    position: AtomicI64,
    rolling: AtomicFlag,
    nominal_speed: AtomicDouble,
    /// Resampling ratio applied in the last cycle
    ratio: AtomicDouble,
    recording: AtomicFlag,
    locate_pending: AtomicFlag,
    disk_blocked: AtomicFlag,
    /// Highest locate sequence number the butler has finished
    completed_locate: AtomicU64,
    requests_tx: Sender<TransportRequest>,
    requests_rx: Receiver<TransportRequest>,
}

impl Session {
    pub fn new() -> Self {
        let (requests_tx, requests_rx) = unbounded();
        Self {
            position: AtomicI64::new(0),
            rolling: AtomicFlag::new(false),
            nominal_speed: AtomicDouble::new(1.0),
            ratio: AtomicDouble::new(1.0),
            recording: AtomicFlag::new(false),
            locate_pending: AtomicFlag::new(false),
            disk_blocked: AtomicFlag::new(false),
            completed_locate: AtomicU64::new(0),
            requests_tx,
            requests_rx,
        }
    }

    /// Ask the transport to move to `target`. Takes effect once the butler
    /// has settled the locate.
    pub fn request_locate(&self, target: i64, roll: RollDisposition) {
        self.request(TransportRequest::Locate { target, roll });
    }

    pub fn request_transport_speed(&self, speed: f64) {
        self.request(TransportRequest::Speed(speed));
    }

    pub fn request_roll(&self) {
        self.request_transport_speed(self.nominal_speed());
    }

    pub fn request_stop(&self) {
        self.request_transport_speed(0.0);
    }

    fn request(&self, request: TransportRequest) {
        // Both ends live in `self`, so the channel cannot be disconnected
        let _ = self.requests_tx.send(request);
    }

    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn rolling(&self) -> bool {
        self.rolling.get()
    }

    pub fn nominal_speed(&self) -> f64 {
        self.nominal_speed.get()
    }

    /// Ratio the I/O resampler ran at in the last cycle.
    pub fn ratio(&self) -> f64 {
        self.ratio.get()
    }

    pub fn actively_recording(&self) -> bool {
        self.recording.get()
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.set(recording);
    }

    pub fn locate_pending(&self) -> bool {
        self.locate_pending.get()
    }

    /// Output was silenced last cycle because the session drifted from the master.
    pub fn disk_blocked(&self) -> bool {
        self.disk_blocked.get()
    }

    /// Transport state as the chase policy sees it.
    pub fn snapshot(&self, io_latency: u32) -> SessionSnapshot {
        SessionSnapshot {
            position: self.position(),
            rolling: self.rolling(),
            nominal_speed: self.nominal_speed(),
            actively_recording: self.actively_recording(),
            locate_pending: self.locate_pending(),
            io_latency,
        }
    }

    pub(crate) fn set_position(&self, position: i64) {
        self.position.store(position, Ordering::Release);
    }

    pub(crate) fn advance(&self, frames: i64) {
        self.position.fetch_add(frames, Ordering::AcqRel);
    }

    pub(crate) fn set_rolling(&self, rolling: bool) {
        self.rolling.set(rolling);
    }

    pub(crate) fn set_nominal_speed(&self, speed: f64) {
        self.nominal_speed.set(speed);
    }

    pub(crate) fn set_ratio(&self, ratio: f64) {
        self.ratio.set(ratio);
    }

    pub(crate) fn set_locate_pending(&self, pending: bool) {
        self.locate_pending.set(pending);
    }

    pub(crate) fn set_disk_blocked(&self, blocked: bool) {
        self.disk_blocked.set(blocked);
    }

    /// Butler side of the locate handshake.
    pub(crate) fn complete_locate(&self, seq: u64) {
        self.completed_locate.fetch_max(seq, Ordering::AcqRel);
    }

    pub(crate) fn completed_locate(&self) -> u64 {
        self.completed_locate.load(Ordering::Acquire)
    }

    pub(crate) fn take_request(&self) -> Option<TransportRequest> {
        self.requests_rx.try_recv().ok()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

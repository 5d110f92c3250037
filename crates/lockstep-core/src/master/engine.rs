//! Passthrough to the audio backend's own transport.

use super::{position_from, CycleContext, MasterPosition, SyncSource, TransportMaster};
use crate::backend::AudioBackend;
use crate::snapshot::SnapshotCell;
use std::sync::Arc;

pub struct EngineMaster {
    name: String,
    backend: Option<Arc<dyn AudioBackend>>,
    snapshot: Arc<SnapshotCell>,
    have_state: bool,
    current_delta: i64,
}

impl EngineMaster {
    pub fn new(name: &str, backend: Option<Arc<dyn AudioBackend>>) -> Self {
        Self {
            name: name.to_string(),
            backend,
            snapshot: Arc::new(SnapshotCell::new()),
            have_state: false,
            current_delta: 0,
        }
    }
}

impl TransportMaster for EngineMaster {
    fn kind(&self) -> SyncSource {
        SyncSource::Engine
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pre_process(&mut self, cycle: &CycleContext) {
        let Some(state) = self.backend.as_ref().and_then(|b| b.transport_state()) else {
            self.have_state = false;
            return;
        };

        let speed = if state.rolling { state.speed } else { 0.0 };
        self.snapshot.update(state.position, cycle.now, speed);
        self.have_state = true;

        if let Some(session) = cycle.session_position {
            self.current_delta = state.position - session;
        }
    }

    fn speed_and_position(&self, now: i64) -> Option<MasterPosition> {
        position_from(&self.snapshot, now)
    }

    fn reset(&mut self, with_position: bool) {
        self.have_state = false;
        self.current_delta = 0;
        if !with_position {
            self.snapshot.clear();
        }
    }

    fn locked(&self) -> bool {
        self.have_state
    }

    fn ok(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.running())
    }

    fn usable(&self) -> bool {
        self.backend
            .as_ref()
            .is_some_and(|b| b.has_native_transport())
    }

    fn resolution(&self) -> i64 {
        1
    }

    fn update_interval(&self) -> i64 {
        self.backend
            .as_ref()
            .map(|b| b.block_size() as i64)
            .unwrap_or(1)
    }

    fn sample_clock_synced(&self) -> bool {
        true
    }

    fn position_string(&self) -> String {
        if self.have_state {
            self.snapshot.read().position.to_string()
        } else {
            "--".to_string()
        }
    }

    fn current_delta(&self) -> i64 {
        self.current_delta
    }

    fn snapshot(&self) -> Arc<SnapshotCell> {
        Arc::clone(&self.snapshot)
    }
}

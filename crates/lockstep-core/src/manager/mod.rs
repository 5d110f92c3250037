//! Transport master manager.
//!
//! ```text
//!  admin threads                      audio thread
//! ┌──────────────┐   write()     ┌──────────────────────┐
//! │ add / remove │──────────────▶│   RwLock<Registry>   │◀── try_write() per cycle
//! │ set_current  │               └──────────────────────┘        │
//! └──────┬───────┘                                                ▼
//!        │ ManagerEvent (crossbeam)                    pre_process + chase policy
//!        ▼                                                        │
//!     host UI  ◀──── ArcSwap current name ────────────────────────┘
//! ```
//!
//! Administrative calls take the registry write lock and may block. The
//! per-cycle path only ever `try_write`s it; on contention the cycle is
//! deferred and reported as a pending locate.

mod policy;
mod registry;
mod strategy;

pub use policy::ChaseState;
pub use strategy::{
    CycleOutcome, RollDisposition, SessionSnapshot, StrategyAction, StrategyDecision,
};

use crate::config::{MasterConfig, SyncSettings, TransportMastersConfig};
use crate::master::{
    create_master, CycleContext, LtcAudioInput, MasterEnv, MidiSyncSink, SyncSource,
    TransportMaster,
};
use crate::snapshot::SnapshotCell;
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use registry::Registry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry changes, delivered to hosts that poll [`TransportMasterManager::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    Added(String),
    Removed(String),
    CurrentChanged {
        old: Option<String>,
        new: Option<String>,
    },
    /// Masters were rebuilt; MIDI sinks and LTC inputs must be fetched again
    Restarted,
}

/// Point-in-time view of one master, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterStatus {
    pub name: String,
    pub kind: SyncSource,
    pub removable: bool,
    pub current: bool,
    pub locked: bool,
    pub ok: bool,
    pub position: String,
    pub delta: String,
}

struct Inner {
    registry: Registry,
    settings: SyncSettings,
    env: MasterEnv,
    chase: ChaseState,
}

pub struct TransportMasterManager {
    inner: RwLock<Inner>,
    current_name: ArcSwapOption<String>,
    events_tx: Sender<ManagerEvent>,
    events_rx: Receiver<ManagerEvent>,
    deferred_cycles: AtomicU64,
}

impl TransportMasterManager {
    pub fn new(env: MasterEnv, settings: SyncSettings) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            inner: RwLock::new(Inner {
                registry: Registry::default(),
                settings,
                env,
                chase: ChaseState::new(),
            }),
            current_name: ArcSwapOption::empty(),
            events_tx,
            events_rx,
            deferred_cycles: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &TransportMastersConfig, env: MasterEnv) -> Result<Self> {
        let manager = Self::new(env, config.sync.clone());
        manager.load_config(config)?;
        Ok(manager)
    }

    /// Replace every master, the selection and the settings with `config`.
    pub fn load_config(&self, config: &TransportMastersConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.inner.write();
        let old = inner.registry.current_name();
        for (_, slot) in inner.registry.iter() {
            self.emit(ManagerEvent::Removed(slot.master.name().to_string()));
        }
        inner.registry.clear();
        inner.chase.reset();
        inner.settings = config.sync.clone();

        for master_config in &config.masters {
            let master = create_master(master_config, &inner.env);
            inner.registry.insert(master, master_config.removable)?;
            self.emit(ManagerEvent::Added(master_config.name.clone()));
        }

        let current = match &config.current {
            Some(name) => Some(inner.registry.index_of(name)?),
            None => None,
        };
        inner.registry.set_current(current);
        self.publish_current(&inner, old);
        info!(
            "loaded {} transport masters, current {:?}",
            inner.registry.len(),
            config.current
        );
        Ok(())
    }

    pub fn to_config(&self) -> TransportMastersConfig {
        let inner = self.inner.read();
        TransportMastersConfig {
            current: inner.registry.current_name(),
            sync: inner.settings.clone(),
            masters: inner
                .registry
                .iter()
                .map(|(_, slot)| MasterConfig {
                    kind: slot.master.kind(),
                    name: slot.master.name().to_string(),
                    removable: slot.removable,
                    sample_clock_synced: slot.master.sample_clock_synced(),
                })
                .collect(),
        }
    }

    /// Rebuild every master against a new environment, e.g. after the
    /// backend reconnected at a different sample rate.
    pub fn restart(&self, env: MasterEnv) -> Result<()> {
        let config = self.to_config();
        {
            let mut inner = self.inner.write();
            inner.env = env;
            inner.registry.clear();
            inner.chase.reset();
            for master_config in &config.masters {
                let master = create_master(master_config, &inner.env);
                inner.registry.insert(master, master_config.removable)?;
            }
            let current = match &config.current {
                Some(name) => Some(inner.registry.index_of(name)?),
                None => None,
            };
            inner.registry.set_current(current);
        }
        info!("transport masters restarted");
        self.emit(ManagerEvent::Restarted);
        Ok(())
    }

    pub fn add(&self, config: &MasterConfig) -> Result<()> {
        let master = {
            let inner = self.inner.read();
            create_master(config, &inner.env)
        };
        self.add_master(master, config.removable)
    }

    /// Register an already-built master.
    pub fn add_master(&self, master: Box<dyn TransportMaster>, removable: bool) -> Result<()> {
        let name = master.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::InvalidConfig("master name is empty".into()));
        }
        self.inner.write().registry.insert(master, removable)?;
        debug!("added transport master {}", name);
        self.emit(ManagerEvent::Added(name));
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.inner.write().registry.remove(name)?;
        debug!("removed transport master {}", name);
        self.emit(ManagerEvent::Removed(name.to_string()));
        Ok(())
    }

    /// Select the master to chase, or none.
    pub fn set_current(&self, name: Option<&str>) -> Result<()> {
        let mut inner = self.inner.write();
        let index = name.map(|n| inner.registry.index_of(n)).transpose()?;
        if index == inner.registry.current() {
            return Ok(());
        }
        let old = inner.registry.current_name();
        inner.registry.set_current(index);
        inner.chase.reset();
        info!("current transport master: {:?} -> {:?}", old, name);
        self.publish_current(&inner, old);
        Ok(())
    }

    /// Current master's name, without taking any lock.
    pub fn current_name(&self) -> Option<Arc<String>> {
        self.current_name.load_full()
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .registry
            .iter()
            .map(|(_, slot)| slot.master.name().to_string())
            .collect()
    }

    pub fn events(&self) -> Receiver<ManagerEvent> {
        self.events_rx.clone()
    }

    pub fn settings(&self) -> SyncSettings {
        self.inner.read().settings.clone()
    }

    pub fn set_settings(&self, settings: SyncSettings) {
        let mut inner = self.inner.write();
        inner.settings = settings;
        inner.chase.reset();
    }

    pub fn set_external_sync(&self, enabled: bool) {
        let mut inner = self.inner.write();
        if inner.settings.external_sync != enabled {
            info!("external sync {}", if enabled { "on" } else { "off" });
            inner.settings.external_sync = enabled;
            inner.chase.reset();
        }
    }

    pub fn status(&self) -> Vec<MasterStatus> {
        let inner = self.inner.read();
        let current = inner.registry.current();
        inner
            .registry
            .iter()
            .map(|(index, slot)| MasterStatus {
                name: slot.master.name().to_string(),
                kind: slot.master.kind(),
                removable: slot.removable,
                current: current == Some(index),
                locked: slot.master.locked(),
                ok: slot.master.ok(),
                position: slot.master.position_string(),
                delta: slot.master.delta_string(),
            })
            .collect()
    }

    pub fn snapshot(&self, name: &str) -> Result<Arc<SnapshotCell>> {
        let inner = self.inner.read();
        let index = inner.registry.index_of(name)?;
        inner
            .registry
            .get(index)
            .map(|slot| slot.master.snapshot())
            .ok_or_else(|| Error::UnknownMaster(name.to_string()))
    }

    /// MIDI input handle for a MIDI-driven master; `None` for other kinds.
    pub fn midi_sink(&self, name: &str) -> Result<Option<Arc<dyn MidiSyncSink>>> {
        let inner = self.inner.read();
        let index = inner.registry.index_of(name)?;
        Ok(inner
            .registry
            .get(index)
            .and_then(|slot| slot.master.midi_sink()))
    }

    /// Take the capture-side producer of an LTC master. Succeeds once per build.
    pub fn take_ltc_input(&self, name: &str) -> Result<Option<LtcAudioInput>> {
        let mut inner = self.inner.write();
        Ok(inner.registry.by_name_mut(name)?.master.take_audio_input())
    }

    pub fn set_sample_clock_synced(&self, name: &str, synced: bool) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .registry
            .by_name_mut(name)?
            .master
            .set_sample_clock_synced(synced);
        Ok(())
    }

    /// Reset one master, keeping or dropping its last position.
    pub fn reset_master(&self, name: &str, with_position: bool) -> Result<()> {
        let mut inner = self.inner.write();
        inner.registry.by_name_mut(name)?.master.reset(with_position);
        inner.chase.reset();
        Ok(())
    }

    /// The audio stream glitched. Called off the audio thread.
    pub fn resync_xrun(&self) {
        let mut inner = self.inner.write();
        let order = inner.registry.order().to_vec();
        for index in order {
            if let Some(slot) = inner.registry.get_mut(index) {
                slot.master.resync_xrun();
            }
        }
        inner.chase.reset();
    }

    /// Cycles skipped because an administrative call held the registry.
    pub fn deferred_cycles(&self) -> u64 {
        self.deferred_cycles.load(Ordering::Relaxed)
    }

    /// The per-cycle entry point. Never blocks.
    pub fn pre_process_transport_masters(
        &self,
        cycle: &CycleContext,
        session: &SessionSnapshot,
    ) -> CycleOutcome {
        let Some(mut guard) = self.inner.try_write() else {
            self.deferred_cycles.fetch_add(1, Ordering::Relaxed);
            return CycleOutcome::deferred();
        };
        let Inner {
            registry,
            settings,
            chase,
            ..
        } = &mut *guard;

        let ctx = CycleContext {
            session_position: Some(session.position),
            tempo_bpm: settings.tempo_bpm,
            timecode_format: settings.timecode_format,
            ..*cycle
        };

        let current = registry.current();
        for i in 0..registry.order().len() {
            let index = registry.order()[i];
            if !settings.preprocess_all && Some(index) != current {
                continue;
            }
            if let Some(slot) = registry.get_mut(index) {
                slot.master.pre_process(&ctx);
            }
        }

        if !settings.external_sync {
            return CycleOutcome::new(
                session.nominal_speed,
                StrategyDecision::relax(session.nominal_speed),
                true,
            );
        }

        let Some(slot) = current.and_then(|index| registry.get_mut(index)) else {
            return CycleOutcome::new(1.0, StrategyDecision::of(StrategyAction::NoRoll), false);
        };
        policy::chase(slot.master.as_mut(), &ctx, session, settings, chase)
    }

    fn publish_current(&self, inner: &Inner, old: Option<String>) {
        let new = inner.registry.current_name();
        self.current_name.store(new.clone().map(Arc::new));
        if old != new {
            self.emit(ManagerEvent::CurrentChanged { old, new });
        }
    }

    fn emit(&self, event: ManagerEvent) {
        // We hold a receiver, so this only fails if the manager is being dropped
        let _ = self.events_tx.send(event);
    }
}

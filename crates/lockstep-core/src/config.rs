//! Persisted transport master configuration.
//!
//! ```toml
//! current = "MTC"
//!
//! [sync]
//! external_sync = true
//! timecode_format = "25"
//!
//! [[masters]]
//! type = "mtc"
//! name = "MTC"
//! removable = false
//! ```

use crate::master::SyncSource;
use crate::timecode::SmpteFrameRate;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// One entry of the ordered master list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(rename = "type")]
    pub kind: SyncSource,
    pub name: String,
    #[serde(default = "default_true")]
    pub removable: bool,
    #[serde(default)]
    pub sample_clock_synced: bool,
}

fn default_true() -> bool {
    true
}

impl MasterConfig {
    pub fn new(kind: SyncSource, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            removable: true,
            // The backend's own transport runs off the audio clock
            sample_clock_synced: kind == SyncSource::Engine,
        }
    }

    pub fn fixed(mut self) -> Self {
        self.removable = false;
        self
    }
}

/// Chase policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Follow the current master at all
    pub external_sync: bool,
    /// Run `pre_process` on every master each cycle, not just the current one
    pub preprocess_all: bool,
    /// Divergence beyond this many blocks forces a locate
    pub locate_threshold_blocks: u32,
    pub keep_rolling_on_sync_loss: bool,
    /// Used when a source does not announce its own rate
    pub timecode_format: SmpteFrameRate,
    /// Session tempo, for MIDI clock
    pub tempo_bpm: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            external_sync: false,
            preprocess_all: true,
            locate_threshold_blocks: 5,
            keep_rolling_on_sync_loss: false,
            timecode_format: SmpteFrameRate::Fps25,
            tempo_bpm: 120.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportMastersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub masters: Vec<MasterConfig>,
}

impl Default for TransportMastersConfig {
    /// One fixed master of each kind, none selected.
    fn default() -> Self {
        Self {
            current: None,
            sync: SyncSettings::default(),
            masters: vec![
                MasterConfig::new(SyncSource::Engine, "Engine").fixed(),
                MasterConfig::new(SyncSource::Mtc, "MTC").fixed(),
                MasterConfig::new(SyncSource::Ltc, "LTC").fixed(),
                MasterConfig::new(SyncSource::MidiClock, "MIDI Clock").fixed(),
            ],
        }
    }
}

impl TransportMastersConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for master in &self.masters {
            if master.name.trim().is_empty() {
                return Err(Error::InvalidConfig("master name is empty".into()));
            }
            if !seen.insert(master.name.as_str()) {
                return Err(Error::DuplicateName(master.name.clone()));
            }
        }

        if let Some(current) = &self.current {
            if !seen.contains(current.as_str()) {
                return Err(Error::UnknownMaster(current.clone()));
            }
        }

        if self.sync.locate_threshold_blocks == 0 {
            return Err(Error::InvalidConfig(
                "locate_threshold_blocks must be at least 1".into(),
            ));
        }
        if !(20.0..=999.0).contains(&self.sync.tempo_bpm) {
            return Err(Error::InvalidConfig(format!(
                "tempo_bpm {} out of range (20-999)",
                self.sync.tempo_bpm
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportMastersConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.masters.len(), 4);
        assert!(config.masters.iter().all(|m| !m.removable));
        assert_eq!(config.sync.locate_threshold_blocks, 5);
    }

    #[test]
    fn test_parse_with_defaults() {
        let text = r#"
            current = "Desk"

            [sync]
            external_sync = true
            timecode_format = "29.97df"

            [[masters]]
            type = "mtc"
            name = "Desk"

            [[masters]]
            type = "ltc"
            name = "Tape"
            removable = false
            sample_clock_synced = true
        "#;
        let config = TransportMastersConfig::from_toml_str(text).unwrap();
        assert_eq!(config.current.as_deref(), Some("Desk"));
        assert!(config.sync.external_sync);
        assert!(config.sync.preprocess_all);
        assert_eq!(config.sync.timecode_format, SmpteFrameRate::Fps2997Df);
        assert_eq!(config.masters[0].kind, SyncSource::Mtc);
        assert!(config.masters[0].removable);
        assert!(!config.masters[1].removable);
        assert!(config.masters[1].sample_clock_synced);
    }

    #[test]
    fn test_rejects_bad_config() {
        let mut config = TransportMastersConfig::default();
        config.masters.push(MasterConfig::new(SyncSource::Mtc, "MTC"));
        assert!(matches!(config.validate(), Err(Error::DuplicateName(n)) if n == "MTC"));

        let mut config = TransportMastersConfig::default();
        config.current = Some("Nope".into());
        assert!(matches!(config.validate(), Err(Error::UnknownMaster(_))));

        let mut config = TransportMastersConfig::default();
        config.sync.locate_threshold_blocks = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        assert!(matches!(
            TransportMastersConfig::from_toml_str("masters = 3"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("masters.toml");

        let mut config = TransportMastersConfig::default();
        config.current = Some("LTC".into());
        config.sync.keep_rolling_on_sync_loss = true;
        config.masters.push(MasterConfig::new(SyncSource::MidiClock, "Drum machine"));
        config.save(&path).unwrap();

        let loaded = TransportMastersConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = TransportMastersConfig::load(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}

//! Hardware MIDI input for sync messages.
//!
//! midir invokes the handler on its own input thread with a microsecond
//! timestamp. Only sync messages are forwarded.

use crate::{Error, Result, SyncMessage};
use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{debug, info};

/// Information about an available MIDI input device.
#[derive(Debug, Clone)]
pub struct MidiInputDevice {
    pub index: usize,
    pub name: String,
}

/// An open MIDI input connection delivering parsed sync messages.
///
/// The connection closes when this value is dropped.
pub struct MidiSyncInput {
    connection: Option<MidiInputConnection<()>>,
    port_name: String,
}

impl MidiSyncInput {
    pub fn list_devices() -> Vec<MidiInputDevice> {
        let mut devices = Vec::new();
        if let Ok(midi_input) = MidiInput::new("lockstep-device-list") {
            for (index, port) in midi_input.ports().iter().enumerate() {
                let name = midi_input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Unknown Device {index}"));
                devices.push(MidiInputDevice { index, name });
            }
        }
        devices
    }

    /// Connect to the first input port whose name contains `name` (case-insensitive).
    ///
    /// `handler` receives `(timestamp_us, message)` on the MIDI input thread.
    pub fn connect_by_name<F>(name: &str, mut handler: F) -> Result<Self>
    where
        F: FnMut(u64, SyncMessage) + Send + 'static,
    {
        let mut midi_input = MidiInput::new("lockstep-sync-input")?;
        // Sync lives in SysEx and system realtime messages
        midi_input.ignore(Ignore::ActiveSense);

        let needle = name.to_lowercase();
        let ports = midi_input.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_input
                    .port_name(p)
                    .map(|n| n.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| Error::PortNotFound(name.to_string()))?;

        let port_name = midi_input
            .port_name(port)
            .unwrap_or_else(|_| name.to_string());

        let connection = midi_input.connect(
            port,
            "lockstep-sync",
            move |timestamp_us, bytes, _| match SyncMessage::parse(bytes) {
                Ok(Some(msg)) => handler(timestamp_us, msg),
                Ok(None) => {}
                Err(e) => debug!("Dropping malformed sync message: {}", e),
            },
            (),
        )?;

        info!("Connected MIDI sync input '{}'", port_name);

        Ok(Self {
            connection: Some(connection),
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
            info!("Disconnected MIDI sync input '{}'", self.port_name);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

impl Drop for MidiSyncInput {
    fn drop(&mut self) {
        self.disconnect();
    }
}

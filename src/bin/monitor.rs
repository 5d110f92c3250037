//! Headless sync monitor. Runs a session against the dummy backend in real
//! time and logs what the current master is doing.
//!
//! ```text
//! lockstep-monitor [masters.toml] [--midi PORT MASTER] [--seconds N]
//! ```

use lockstep::prelude::*;
use lockstep::{DummyBackend, Result};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const SAMPLE_RATE: f64 = 48_000.0;
const BLOCK_SIZE: u32 = 512;

struct Args {
    config: Option<String>,
    midi: Option<(String, String)>,
    seconds: Option<u64>,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        midi: None,
        seconds: None,
    };
    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--midi" => {
                if let (Some(port), Some(master)) = (it.next(), it.next()) {
                    args.midi = Some((port, master));
                }
            }
            "--seconds" => args.seconds = it.next().and_then(|s| s.parse().ok()),
            _ => args.config = Some(arg),
        }
    }
    args
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = parse_args();

    let backend = Arc::new(DummyBackend::new(SAMPLE_RATE, BLOCK_SIZE).with_native_transport());
    let mut builder = LockstepEngine::builder().backend(backend.clone());
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let engine = builder.build()?;

    if let Some((port, master)) = &args.midi {
        connect_midi(&engine, port, master)?;
    }

    let Some(mut processor) = engine.take_processor() else {
        return Ok(());
    };

    info!(
        masters = ?engine.manager().names(),
        current = ?engine.manager().current_name(),
        "monitor running"
    );

    let period = Duration::from_secs_f64(f64::from(BLOCK_SIZE) / SAMPLE_RATE);
    let started = Instant::now();
    let mut next_cycle = started;
    let mut next_report = started;
    let mut output = vec![0.0f32; BLOCK_SIZE as usize];

    loop {
        processor.process(BLOCK_SIZE, &mut output);
        backend.advance();

        let now = Instant::now();
        if now >= next_report {
            report(&engine);
            next_report += Duration::from_secs(1);
        }
        if args
            .seconds
            .is_some_and(|limit| now.duration_since(started).as_secs() >= limit)
        {
            break;
        }

        next_cycle += period;
        if let Some(wait) = next_cycle.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    let stats = engine.stats();
    info!(
        cycles = stats.cycles,
        overruns = stats.overruns,
        deferred = stats.deferred,
        "monitor stopped"
    );
    Ok(())
}

fn report(engine: &LockstepEngine) {
    let session = engine.session();
    info!(
        position = session.position(),
        rolling = session.rolling(),
        ratio = session.ratio(),
        "session"
    );
    for status in engine.status().iter().filter(|s| s.current) {
        info!(
            master = %status.name,
            kind = %status.kind,
            locked = status.locked,
            position = %status.position,
            delta = %status.delta,
            "current master"
        );
    }
}

#[cfg(feature = "midi-io")]
fn connect_midi(engine: &LockstepEngine, port: &str, master: &str) -> Result<()> {
    engine.connect_midi(port, master)
}

#[cfg(not(feature = "midi-io"))]
fn connect_midi(_engine: &LockstepEngine, port: &str, _master: &str) -> Result<()> {
    tracing::warn!("built without midi-io, ignoring MIDI port '{port}'");
    Ok(())
}

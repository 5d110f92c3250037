//! Chasing linear timecode fed through the audio input path.

use lockstep::prelude::*;
use lockstep::LtcEncoder;

mod helpers;
use helpers::tolerances::*;
use helpers::*;

const TAPE_START_HOURS: i64 = 1;

#[test]
fn test_session_chases_ltc_audio() {
    let mut rig = Rig::new(LockstepEngine::builder(), Rig::dummy());
    let manager = rig.engine.manager();
    manager.set_current(Some("LTC")).unwrap();
    manager.set_external_sync(true);
    let mut input = manager.take_ltc_input("LTC").unwrap().unwrap();
    assert!(manager.take_ltc_input("LTC").unwrap().is_none());

    // Four seconds of 25 fps timecode starting at 01:00:00:00
    let mut encoder = LtcEncoder::new(SmpteFrameRate::Fps25, TEST_SAMPLE_RATE);
    let mut audio = Vec::new();
    encoder.encode_run(Timecode::new(1, 0, 0, 0), 100, &mut audio);

    let mut saw_locate = false;
    for block in audio.chunks_exact(TEST_BLOCK_SIZE as usize) {
        assert_eq!(input.push(block), block.len());
        if let Some(outcome) = rig.cycle() {
            saw_locate |= outcome.decision.action == StrategyAction::Locate;
        }
    }
    assert!(saw_locate);

    let status = rig.engine.status();
    let ltc = status.iter().find(|s| s.name == "LTC").unwrap();
    assert!(ltc.current);
    assert!(ltc.locked);

    let session = rig.engine.session();
    assert!(session.rolling());
    let tape = TAPE_START_HOURS * 3600 * 48_000 + rig.now();
    assert!(
        (session.position() - tape).abs() <= BLOCK_EPSILON,
        "session {} tape {}",
        session.position(),
        tape
    );
    assert!((session.ratio() - 1.0).abs() <= RATIO_EPSILON);
}

#[test]
fn test_ltc_dropout_stops_session() {
    let mut rig = Rig::new(LockstepEngine::builder(), Rig::dummy());
    let manager = rig.engine.manager();
    manager.set_current(Some("LTC")).unwrap();
    manager.set_external_sync(true);
    let mut input = manager.take_ltc_input("LTC").unwrap().unwrap();

    let mut encoder = LtcEncoder::new(SmpteFrameRate::Fps25, TEST_SAMPLE_RATE);
    let mut audio = Vec::new();
    encoder.encode_run(Timecode::new(0, 10, 0, 0), 75, &mut audio);
    for block in audio.chunks_exact(TEST_BLOCK_SIZE as usize) {
        input.push(block);
        rig.cycle();
    }
    assert!(rig.engine.session().rolling());

    // Tape stops: past the flywheel the master unlocks and the session halts
    let silence = vec![0.0f32; TEST_BLOCK_SIZE as usize];
    for _ in 0..(2 * 48_000 / TEST_BLOCK_SIZE as usize) {
        input.push(&silence);
        rig.cycle();
    }
    assert!(!rig.engine.session().rolling());
    let status = rig.engine.status();
    assert!(!status.iter().find(|s| s.name == "LTC").unwrap().locked);
}

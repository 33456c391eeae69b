//! End-to-end recording sessions driven by scripted sources

use macro_core::ErrorCode;
use macro_recorder::prelude::*;
use macro_recorder::{InputEvent, InputKind, SourceContext};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn scripted(script: Vec<(u64, InputKind)>) -> Vec<Box<dyn EventSource>> {
    vec![Box::new(ScriptedSource::from_millis("script", script))]
}

fn click_key_cancel() -> Vec<(u64, InputKind)> {
    vec![
        (0, InputKind::press(100, 200, MouseButton::Left)),
        (40, InputKind::release(100, 200, MouseButton::Left)),
        (500, InputKind::key("a")),
        (1000, InputKind::key("esc")),
    ]
}

#[test]
fn cancel_key_ends_the_session() {
    let mut recorder = MacroRecorder::new();
    recorder.start(scripted(click_key_cancel())).unwrap();

    let rec = recorder.wait().unwrap();
    assert!(rec.cancelled);
    assert!(!recorder.is_recording());
    assert_eq!(
        rec.actions,
        vec![
            Action::wait(0),
            Action::click(100, 200, MouseButton::Left),
            Action::wait(500),
            Action::key_press("a"),
        ]
    );
    assert_eq!(rec.input_count(), 2);
    assert_eq!(rec.elapsed, Duration::from_millis(1000));

    let m = rec.into_macro("demo").unwrap();
    assert_eq!(m.total_duration_ms(), 500);
    assert_eq!(m.counts().clicks, 1);
    assert_eq!(m.counts().keys, 1);
}

#[test]
fn stop_interrupts_and_is_idempotent() {
    let mut recorder = MacroRecorder::new();
    recorder
        .start(scripted(vec![
            (0, InputKind::key("x")),
            (60_000, InputKind::key("never")),
        ]))
        .unwrap();

    // let the first event through
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while recorder.recorded_count() == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(recorder.is_recording());

    let first = recorder.stop().unwrap();
    assert!(!first.cancelled);
    assert_eq!(first.input_count(), 1);
    assert_eq!(first.actions[1], Action::key_press("x"));

    let second = recorder.stop().unwrap();
    assert_eq!(first, second);
    assert!(!recorder.is_recording());
}

#[test]
fn second_start_is_rejected() {
    let mut recorder = MacroRecorder::new();
    recorder
        .start(scripted(vec![(60_000, InputKind::key("z"))]))
        .unwrap();

    let err = recorder
        .start(scripted(vec![(0, InputKind::key("y"))]))
        .unwrap_err();
    assert!(err.is(ErrorCode::AlreadyRecording));

    let rec = recorder.stop().unwrap();
    assert!(rec.actions.is_empty());
}

#[test]
fn sources_are_merged_in_arrival_order() {
    let mut recorder = MacroRecorder::new();
    let sources: Vec<Box<dyn EventSource>> = vec![
        Box::new(ScriptedSource::from_millis(
            "pointer",
            vec![
                (0, InputKind::press(1, 1, MouseButton::Left)),
                (200, InputKind::press(2, 2, MouseButton::Right)),
            ],
        )),
        Box::new(ScriptedSource::from_millis(
            "keyboard",
            vec![(100, InputKind::key("b")), (300, InputKind::key("esc"))],
        )),
    ];
    recorder.start(sources).unwrap();
    let rec = recorder.wait().unwrap();

    let inputs: Vec<_> = rec.actions.iter().filter(|a| a.is_input()).cloned().collect();
    assert_eq!(
        inputs,
        vec![
            Action::click(1, 1, MouseButton::Left),
            Action::key_press("b"),
            Action::click(2, 2, MouseButton::Right),
        ]
    );
    // timestamps are taken from the events, so thread scheduling does not skew waits
    let waits: Vec<u64> = rec
        .actions
        .iter()
        .filter(|a| a.kind() == "wait")
        .map(Action::duration_ms)
        .collect();
    for (got, want) in waits.iter().zip([0u64, 100, 100]) {
        assert!(got.abs_diff(want) <= 5, "wait {} vs {}", got, want);
    }
}

/// Sleeps between events and stamps each one when it is sent, like a hook
struct SleepingSource {
    gaps_ms: Vec<u64>,
}

impl EventSource for SleepingSource {
    fn name(&self) -> &str {
        "sleeping"
    }

    fn run(self: Box<Self>, ctx: SourceContext) {
        for (i, gap) in self.gaps_ms.iter().enumerate() {
            std::thread::sleep(Duration::from_millis(*gap));
            let kind = InputKind::key(format!("k{}", i));
            if !ctx.emit(InputEvent::now(kind)) {
                return;
            }
        }
        ctx.emit(InputEvent::now(InputKind::key("esc")));
    }
}

#[test]
fn waits_track_arrival_times() {
    let gaps = vec![50u64, 120, 30, 200];
    let mut recorder = MacroRecorder::new();
    let started = Instant::now();
    recorder
        .start(vec![Box::new(SleepingSource { gaps_ms: gaps.clone() })])
        .unwrap();
    let rec = recorder.wait().unwrap();
    assert!(rec.cancelled);

    let waits: Vec<u64> = rec
        .actions
        .iter()
        .filter(|a| a.kind() == "wait")
        .map(Action::duration_ms)
        .collect();
    assert_eq!(waits.len(), gaps.len());
    // the first wait also covers thread start-up, so it is only bounded below
    assert!(waits[0] >= gaps[0], "first wait {}", waits[0]);
    for (got, want) in waits.iter().zip(&gaps).skip(1) {
        assert!(got.abs_diff(*want) <= 5, "wait {} vs {}", got, want);
    }
    let total: u64 = gaps.iter().sum();
    assert!(rec.elapsed >= Duration::from_millis(total));
    assert!(rec.elapsed <= started.elapsed());
}

#[test]
fn recording_saves_and_loads() {
    let tmp = TempDir::new().unwrap();
    let storage = MacroStorage::with_dir(tmp.path()).unwrap();

    let mut recorder = MacroRecorder::new();
    recorder.start(scripted(click_key_cancel())).unwrap();
    let m = recorder.wait().unwrap().into_macro("round trip").unwrap();

    storage.save(&m, false).unwrap();
    let loaded = storage.load("round trip").unwrap();
    assert_eq!(loaded.actions(), m.actions());
    assert_eq!(loaded.created().timestamp_millis(), m.created().timestamp_millis());

    let listed = storage.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].actions_count, 4);
    assert_eq!(listed[0].total_duration, 500);
}

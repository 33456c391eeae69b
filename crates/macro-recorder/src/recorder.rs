//! Macro recorder: event sources -> channel -> single-writer action log
//!
//! Every event source runs on its own thread and pushes [`InputEvent`]s into
//! one bounded channel. A single consumer thread owns the [`ActionLog`], so
//! the action sequence has exactly one writer and keeps channel arrival
//! order. The controller only sees the actions once the session is stopped.

use crate::events::*;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError};
pub use crossbeam_channel::{Receiver, Sender};
use macro_core::{Error, RecorderSettings, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const POLL: Duration = Duration::from_millis(20);

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Key that ends the session instead of being recorded
    pub cancel_key: String,
    pub record_pointer: bool,
    pub record_keyboard: bool,
    /// Channel capacity between sources and the action log
    pub max_buffer: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::from(&RecorderSettings::default())
    }
}

impl From<&RecorderSettings> for RecorderConfig {
    fn from(s: &RecorderSettings) -> Self {
        Self {
            cancel_key: s.cancel_key.clone(),
            record_pointer: s.record_pointer,
            record_keyboard: s.record_keyboard,
            max_buffer: s.channel_capacity.max(1),
        }
    }
}

/// Key names are compared case-insensitively, with common aliases folded
pub fn normalize_key(key: &str) -> String {
    let lower = key.trim().to_lowercase();
    match lower.as_str() {
        "escape" | "key.esc" => "esc".to_string(),
        "return" | "key.enter" => "enter".to_string(),
        _ => lower,
    }
}

// ============================================================================
// Action log
// ============================================================================

/// What happened to an event handed to [`ActionLog::record_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Recorded,
    /// Release edge, or the log is not recording
    Ignored,
    /// The cancellation key: the log is now finished
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogState {
    Idle,
    Recording,
    Finished,
}

/// Append-only sequence of timed actions built from raw input events
///
/// Each recorded event is preceded by a wait holding the milliseconds since
/// the previous event (or since the origin for the first one), measured on
/// the events' own capture instants.
#[derive(Debug)]
pub struct ActionLog {
    cancel_key: String,
    actions: Vec<Action>,
    state: LogState,
    origin: Instant,
    last: Instant,
    ended: Option<Instant>,
    cancelled: bool,
}

impl ActionLog {
    pub fn new(cancel_key: &str) -> Self {
        let now = Instant::now();
        Self {
            cancel_key: normalize_key(cancel_key),
            actions: Vec::new(),
            state: LogState::Idle,
            origin: now,
            last: now,
            ended: None,
            cancelled: false,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.start_at(Instant::now())
    }

    /// Start with an explicit timing origin
    pub fn start_at(&mut self, origin: Instant) -> Result<()> {
        if self.state == LogState::Recording {
            return Err(Error::already_recording());
        }
        self.actions.clear();
        self.state = LogState::Recording;
        self.origin = origin;
        self.last = origin;
        self.ended = None;
        self.cancelled = false;
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.state == LogState::Recording
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn record_event(&mut self, event: &InputEvent) -> Flow {
        if self.state != LogState::Recording {
            return Flow::Ignored;
        }

        let action = match &event.kind {
            InputKind::Pointer { pressed: false, .. } => return Flow::Ignored,
            InputKind::Pointer { x, y, button, .. } => Action::click(*x, *y, *button),
            InputKind::Key { key } if normalize_key(key) == self.cancel_key => {
                debug!("Cancellation key '{}' received", key);
                self.cancelled = true;
                self.finish_at(event.at.max(self.last));
                return Flow::Cancelled;
            }
            InputKind::Key { key } => Action::key_press(key.clone()),
        };

        // a late arrival from another source never moves the timeline back
        let at = event.at.max(self.last);
        self.actions.push(Action::wait(round_ms(at - self.last)));
        self.actions.push(action);
        self.last = at;
        Flow::Recorded
    }

    /// Finalize and return the actions; later calls return the same list
    pub fn stop(&mut self) -> Vec<Action> {
        if self.state == LogState::Recording {
            self.finish_at(Instant::now().max(self.last));
        }
        self.actions.clone()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Origin to the finalizing event (or to now while recording)
    pub fn elapsed(&self) -> Duration {
        self.ended
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.origin)
    }

    fn finish_at(&mut self, at: Instant) {
        self.state = LogState::Finished;
        self.ended = Some(at);
    }
}

fn round_ms(d: Duration) -> u64 {
    ((d.as_micros() + 500) / 1000) as u64
}

// ============================================================================
// Event sources
// ============================================================================

/// Shared stop flag for one recording session
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything a source needs to feed a session
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub tx: Sender<InputEvent>,
    pub stop: StopSignal,
    /// Timing origin of the session
    pub origin: Instant,
}

impl SourceContext {
    /// Returns false once the session is over
    pub fn emit(&self, event: InputEvent) -> bool {
        if self.stop.is_set() {
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

/// A producer of raw input events
///
/// `run` is called on a dedicated thread and must return soon after
/// `ctx.stop` is set or `ctx.emit` returns false.
pub trait EventSource: Send + 'static {
    fn name(&self) -> &str;
    fn run(self: Box<Self>, ctx: SourceContext);
}

/// Emits a fixed script of events, each stamped at `origin + offset`
///
/// Used to simulate input and to drive recordings in tests.
pub struct ScriptedSource {
    name: String,
    script: Vec<(Duration, InputKind)>,
}

impl ScriptedSource {
    pub fn new(name: impl Into<String>, script: Vec<(Duration, InputKind)>) -> Self {
        Self {
            name: name.into(),
            script,
        }
    }

    /// Script with offsets given in milliseconds
    pub fn from_millis(name: impl Into<String>, script: Vec<(u64, InputKind)>) -> Self {
        Self::new(
            name,
            script
                .into_iter()
                .map(|(ms, kind)| (Duration::from_millis(ms), kind))
                .collect(),
        )
    }
}

impl EventSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>, ctx: SourceContext) {
        for (offset, kind) in self.script {
            let due = ctx.origin + offset;
            loop {
                if ctx.stop.is_set() {
                    return;
                }
                let now = Instant::now();
                if now >= due {
                    break;
                }
                thread::sleep((due - now).min(Duration::from_millis(5)));
            }
            if !ctx.emit(InputEvent::new(due, kind)) {
                return;
            }
        }
    }
}

// ============================================================================
// Recording session
// ============================================================================

/// Result of a finished session
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub actions: Vec<Action>,
    pub started: DateTime<Utc>,
    pub elapsed: Duration,
    /// Ended by the cancellation key
    pub cancelled: bool,
}

impl Recording {
    pub fn into_macro(self, name: impl Into<String>) -> Result<Macro> {
        Macro::with_created(name, self.started, self.actions)
    }

    /// Number of clicks and key presses
    pub fn input_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_input()).count()
    }
}

/// Recording handle - owns the threads of one session
pub struct RecordingHandle {
    stop: StopSignal,
    consumer: thread::JoinHandle<ActionLog>,
    threads: Vec<thread::JoinHandle<()>>,
    recorded: Arc<AtomicUsize>,
    started: DateTime<Utc>,
}

impl RecordingHandle {
    fn is_running(&self) -> bool {
        !self.consumer.is_finished()
    }

    fn finish(self, interrupt: bool) -> Recording {
        if interrupt {
            self.stop.trigger();
        }
        let mut log = match self.consumer.join() {
            Ok(log) => log,
            Err(_) => {
                error!("Action log consumer panicked, recording lost");
                ActionLog::new("")
            }
        };
        self.stop.trigger();
        for t in self.threads {
            let _ = t.join();
        }

        let actions = log.stop();
        Recording {
            actions,
            started: self.started,
            elapsed: log.elapsed(),
            cancelled: log.was_cancelled(),
        }
    }
}

/// The recorder; holds at most one live session
pub struct MacroRecorder {
    config: RecorderConfig,
    session: Option<RecordingHandle>,
    last: Option<Recording>,
}

impl MacroRecorder {
    pub fn new() -> Self {
        Self::with_config(RecorderConfig::default())
    }

    pub fn with_config(config: RecorderConfig) -> Self {
        Self {
            config,
            session: None,
            last: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Start a session fed by the given sources
    pub fn start(&mut self, sources: Vec<Box<dyn EventSource>>) -> Result<()> {
        if self.is_recording() {
            return Err(Error::already_recording());
        }
        if sources.is_empty() {
            return Err(Error::initialization("No event sources to record from"));
        }
        // a session ended by the cancellation key but not collected yet
        if let Some(old) = self.session.take() {
            self.last = Some(old.finish(true));
        }

        let origin = Instant::now();
        let (tx, rx) = bounded::<InputEvent>(self.config.max_buffer);
        let stop = StopSignal::new();
        let recorded = Arc::new(AtomicUsize::new(0));

        let mut log = ActionLog::new(&self.config.cancel_key);
        log.start_at(origin)?;

        let mut threads = Vec::with_capacity(sources.len());
        for source in sources {
            let ctx = SourceContext {
                tx: tx.clone(),
                stop: stop.clone(),
                origin,
            };
            let name = format!("source-{}", source.name());
            debug!("Starting event source {}", name);
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || source.run(ctx));
            match handle {
                Ok(h) => threads.push(h),
                Err(e) => {
                    stop.trigger();
                    return Err(Error::initialization(format!(
                        "Failed to spawn event source thread: {}",
                        e
                    )));
                }
            }
        }
        // sources hold the only senders now, so the channel closes when they all end
        drop(tx);

        let consumer = {
            let stop = stop.clone();
            let recorded = recorded.clone();
            thread::Builder::new()
                .name("action-log".into())
                .spawn(move || run_consumer(log, rx, stop, recorded))
        };
        let consumer = match consumer {
            Ok(c) => c,
            Err(e) => {
                stop.trigger();
                return Err(Error::initialization(format!(
                    "Failed to spawn action log thread: {}",
                    e
                )));
            }
        };

        info!(
            "Recording started ({} sources, cancel key '{}')",
            threads.len(),
            self.config.cancel_key
        );
        self.last = None;
        self.session = Some(RecordingHandle {
            stop,
            consumer,
            threads,
            recorded,
            started: Utc::now(),
        });
        Ok(())
    }

    /// Start a session on the platform's global pointer and keyboard hooks
    pub fn start_live(&mut self) -> Result<()> {
        let source = crate::platform::live_source(&self.config)?;
        self.start(vec![source])
    }

    pub fn is_recording(&self) -> bool {
        self.session.as_ref().is_some_and(RecordingHandle::is_running)
    }

    /// Clicks and key presses recorded so far in the current session
    pub fn recorded_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |s| s.recorded.load(Ordering::Relaxed))
    }

    /// Stop the session and return its result
    ///
    /// Idempotent: once stopped, every call returns the same recording.
    /// `None` if nothing was ever recorded.
    pub fn stop(&mut self) -> Option<Recording> {
        if let Some(session) = self.session.take() {
            let recording = session.finish(true);
            info!(
                "Recording stopped: {} input actions over {}ms",
                recording.input_count(),
                recording.elapsed.as_millis()
            );
            self.last = Some(recording);
        }
        self.last.clone()
    }

    /// Block until the session ends on its own (cancellation key, or every
    /// source exhausted), then return it like [`stop`](Self::stop)
    pub fn wait(&mut self) -> Option<Recording> {
        if let Some(session) = self.session.take() {
            self.last = Some(session.finish(false));
        }
        self.last.clone()
    }
}

impl Default for MacroRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MacroRecorder {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop.trigger();
        }
    }
}

fn run_consumer(
    mut log: ActionLog,
    rx: Receiver<InputEvent>,
    stop: StopSignal,
    recorded: Arc<AtomicUsize>,
) -> ActionLog {
    let apply = |log: &mut ActionLog, event: InputEvent| -> bool {
        match log.record_event(&event) {
            Flow::Recorded => {
                recorded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Flow::Ignored => true,
            Flow::Cancelled => {
                info!("Recording cancelled from the keyboard");
                false
            }
        }
    };

    loop {
        if stop.is_set() {
            // keep what the sources already delivered
            while let Ok(event) = rx.try_recv() {
                if !apply(&mut log, event) {
                    break;
                }
            }
            break;
        }
        match rx.recv_timeout(POLL) {
            Ok(event) => {
                if !apply(&mut log, event) {
                    stop.trigger();
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("All event sources finished");
                break;
            }
        }
    }

    log.stop();
    log
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(origin: Instant, ms: u64) -> Instant {
        origin + Duration::from_millis(ms)
    }

    #[test]
    fn waits_precede_each_event() {
        let origin = Instant::now();
        let mut log = ActionLog::new("esc");
        log.start_at(origin).unwrap();

        assert_eq!(
            log.record_event(&InputEvent::new(at(origin, 40), InputKind::press(10, 20, MouseButton::Left))),
            Flow::Recorded
        );
        assert_eq!(
            log.record_event(&InputEvent::new(at(origin, 90), InputKind::release(10, 20, MouseButton::Left))),
            Flow::Ignored
        );
        assert_eq!(
            log.record_event(&InputEvent::new(at(origin, 340), InputKind::key("q"))),
            Flow::Recorded
        );

        let actions = log.stop();
        assert_eq!(
            actions,
            vec![
                Action::wait(40),
                Action::click(10, 20, MouseButton::Left),
                Action::wait(300),
                Action::key_press("q"),
            ]
        );
    }

    #[test]
    fn start_twice_is_already_recording() {
        let mut log = ActionLog::new("esc");
        log.start().unwrap();
        let err = log.start().unwrap_err();
        assert!(err.is(macro_core::ErrorCode::AlreadyRecording));
    }

    #[test]
    fn start_resets_previous_actions() {
        let origin = Instant::now();
        let mut log = ActionLog::new("esc");
        log.start_at(origin).unwrap();
        log.record_event(&InputEvent::new(origin, InputKind::key("a")));
        log.stop();

        log.start_at(Instant::now()).unwrap();
        assert!(log.actions().is_empty());
        assert!(log.is_recording());
    }

    #[test]
    fn cancel_key_finishes_without_recording() {
        let origin = Instant::now();
        let mut log = ActionLog::new("esc");
        log.start_at(origin).unwrap();
        log.record_event(&InputEvent::new(at(origin, 5), InputKind::key("a")));

        let flow = log.record_event(&InputEvent::new(at(origin, 800), InputKind::key("Escape")));
        assert_eq!(flow, Flow::Cancelled);
        assert!(log.was_cancelled());
        assert!(!log.is_recording());
        assert_eq!(log.elapsed(), Duration::from_millis(800));

        // nothing is appended after the log is finished
        assert_eq!(
            log.record_event(&InputEvent::new(at(origin, 900), InputKind::key("b"))),
            Flow::Ignored
        );
        assert_eq!(log.stop().len(), 2);
    }

    #[test]
    fn stop_is_idempotent() {
        let origin = Instant::now();
        let mut log = ActionLog::new("esc");
        log.start_at(origin).unwrap();
        log.record_event(&InputEvent::new(at(origin, 12), InputKind::key("z")));

        let first = log.stop();
        let elapsed = log.elapsed();
        let second = log.stop();
        assert_eq!(first, second);
        assert_eq!(log.elapsed(), elapsed);
    }

    #[test]
    fn late_event_gets_zero_wait() {
        let origin = Instant::now();
        let mut log = ActionLog::new("esc");
        log.start_at(origin).unwrap();
        log.record_event(&InputEvent::new(at(origin, 100), InputKind::key("a")));
        log.record_event(&InputEvent::new(at(origin, 60), InputKind::press(0, 0, MouseButton::Right)));

        assert_eq!(log.actions()[2], Action::wait(0));
    }

    #[test]
    fn events_before_start_are_ignored() {
        let mut log = ActionLog::new("esc");
        assert_eq!(log.record_event(&InputEvent::now(InputKind::key("a"))), Flow::Ignored);
        assert!(log.stop().is_empty());
    }

    #[test]
    fn waits_round_to_nearest_millisecond() {
        assert_eq!(round_ms(Duration::from_micros(1499)), 1);
        assert_eq!(round_ms(Duration::from_micros(1500)), 2);
        assert_eq!(round_ms(Duration::ZERO), 0);
    }

    #[test]
    fn key_aliases() {
        assert_eq!(normalize_key("Escape"), "esc");
        assert_eq!(normalize_key("RETURN"), "enter");
        assert_eq!(normalize_key("F5"), "f5");
    }

    #[test]
    fn config_from_settings() {
        let mut s = RecorderSettings::default();
        s.cancel_key = "f12".into();
        s.channel_capacity = 0;
        let c = RecorderConfig::from(&s);
        assert_eq!(c.cancel_key, "f12");
        assert_eq!(c.max_buffer, 1);
    }
}

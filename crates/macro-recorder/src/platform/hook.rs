//! Global input hook via rdev
//!
//! `rdev::listen` never returns and can only be installed once per process,
//! so one hook thread lives for the whole process and forwards events to
//! whichever session is currently subscribed.

use crate::events::{InputEvent, InputKind, MouseButton};
use crate::recorder::{EventSource, SourceContext};
use parking_lot::{const_mutex, Mutex};
use rdev::{Button, EventType, Key};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

struct Subscriber {
    ctx: SourceContext,
    pointer: bool,
    keyboard: bool,
    last_pos: (f64, f64),
}

static SUBSCRIBER: Mutex<Option<Subscriber>> = const_mutex(None);
static HOOK: OnceLock<()> = OnceLock::new();

/// Pointer presses/releases and key presses from the OS
pub struct HookSource {
    pointer: bool,
    keyboard: bool,
}

impl HookSource {
    pub fn new(pointer: bool, keyboard: bool) -> Self {
        Self { pointer, keyboard }
    }
}

impl EventSource for HookSource {
    fn name(&self) -> &str {
        "hook"
    }

    fn run(self: Box<Self>, ctx: SourceContext) {
        let stop = ctx.stop.clone();
        *SUBSCRIBER.lock() = Some(Subscriber {
            ctx,
            pointer: self.pointer,
            keyboard: self.keyboard,
            last_pos: (0.0, 0.0),
        });
        ensure_hook();

        while !stop.is_set() {
            thread::sleep(Duration::from_millis(20));
        }
        *SUBSCRIBER.lock() = None;
        debug!("Hook source unsubscribed");
    }
}

fn ensure_hook() {
    HOOK.get_or_init(|| {
        let spawned = thread::Builder::new()
            .name("input-hook".into())
            .spawn(|| {
                if let Err(e) = rdev::listen(dispatch) {
                    error!("Input hook failed: {:?}", e);
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn input hook thread: {}", e);
        }
    });
}

fn dispatch(event: rdev::Event) {
    let mut guard = SUBSCRIBER.lock();
    let Some(sub) = guard.as_mut() else {
        return;
    };

    let kind = match event.event_type {
        EventType::MouseMove { x, y } => {
            sub.last_pos = (x, y);
            return;
        }
        EventType::ButtonPress(b) if sub.pointer => match pointer(sub.last_pos, b, true) {
            Some(kind) => kind,
            None => return,
        },
        EventType::ButtonRelease(b) if sub.pointer => match pointer(sub.last_pos, b, false) {
            Some(kind) => kind,
            None => return,
        },
        EventType::KeyPress(key) if sub.keyboard => InputKind::Key {
            key: key_name(key, event.name.as_deref()),
        },
        _ => return,
    };

    if !sub.ctx.emit(InputEvent::now(kind)) {
        *guard = None;
    }
}

fn pointer((x, y): (f64, f64), b: Button, pressed: bool) -> Option<InputKind> {
    let button = match b {
        Button::Left => MouseButton::Left,
        Button::Right => MouseButton::Right,
        Button::Middle => MouseButton::Middle,
        Button::Unknown(_) => return None,
    };
    Some(InputKind::Pointer {
        x: x.round() as i32,
        y: y.round() as i32,
        button,
        pressed,
    })
}

/// Printable characters as themselves, everything else by name
fn key_name(key: Key, typed: Option<&str>) -> String {
    if let Some(s) = typed {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if !c.is_control() && !c.is_whitespace() {
                return c.to_string();
            }
        }
    }
    match key {
        Key::Escape => "esc".into(),
        Key::Return | Key::KpReturn => "enter".into(),
        Key::Space => "space".into(),
        Key::Tab => "tab".into(),
        Key::Backspace => "backspace".into(),
        Key::Delete => "delete".into(),
        Key::UpArrow => "up".into(),
        Key::DownArrow => "down".into(),
        Key::LeftArrow => "left".into(),
        Key::RightArrow => "right".into(),
        Key::Home => "home".into(),
        Key::End => "end".into(),
        Key::PageUp => "pageup".into(),
        Key::PageDown => "pagedown".into(),
        Key::ShiftLeft | Key::ShiftRight => "shift".into(),
        Key::ControlLeft | Key::ControlRight => "ctrl".into(),
        Key::Alt | Key::AltGr => "alt".into(),
        Key::MetaLeft | Key::MetaRight => "win".into(),
        Key::CapsLock => "capslock".into(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

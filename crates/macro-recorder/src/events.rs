//! Macro data model
//!
//! A macro is a flat list of actions. Timing is carried by explicit `wait`
//! actions: every recorded click or key press is preceded by exactly one wait
//! holding the milliseconds elapsed since the previous event.

use chrono::{DateTime, Utc};
use macro_core::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Mouse button of a recorded click
///
/// Written lowercase; read through [`FromStr`], so `"Left"` and `"center"`
/// are accepted everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MouseButton {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" | "center" => Ok(MouseButton::Middle),
            other => Err(Error::validation(format!("Unknown mouse button: {}", other))),
        }
    }
}

impl<'de> Deserialize<'de> for MouseButton {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse()
            .map_err(|e: Error| serde::de::Error::custom(e.message))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wait {
    /// Milliseconds
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Click {
    pub x: i32,
    pub y: i32,
    pub button: MouseButton,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    /// Single character ("a") or named key ("esc", "enter", "f5")
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An action whose `type` this version does not know, kept verbatim
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownAction {
    pub kind: String,
    /// Every field of the original object except `type`
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// One entry of a macro
///
/// Serializes to a JSON object with a `type` discriminator; see
/// [`crate::codec`] for the exact wire format and validation rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Wait(Wait),
    Click(Click),
    KeyPress(KeyPress),
    Unknown(UnknownAction),
}

impl Action {
    pub fn wait(duration_ms: u64) -> Self {
        Action::Wait(Wait {
            duration: duration_ms,
            description: Some(format!("Wait {}ms", duration_ms)),
        })
    }

    pub fn click(x: i32, y: i32, button: MouseButton) -> Self {
        Action::Click(Click {
            x,
            y,
            button,
            description: Some(format!("Click {} at {},{}", button, x, y)),
        })
    }

    pub fn key_press(key: impl Into<String>) -> Self {
        let key = key.into();
        Action::KeyPress(KeyPress {
            description: Some(format!("Key: {}", key)),
            key,
        })
    }

    /// The wire `type` value
    pub fn kind(&self) -> &str {
        match self {
            Action::Wait(_) => "wait",
            Action::Click(_) => "click",
            Action::KeyPress(_) => "key_press",
            Action::Unknown(u) => &u.kind,
        }
    }

    /// Wait duration in ms, zero for everything else
    pub fn duration_ms(&self) -> u64 {
        match self {
            Action::Wait(w) => w.duration,
            _ => 0,
        }
    }

    /// True for actions that reproduce input (click, key press)
    pub fn is_input(&self) -> bool {
        matches!(self, Action::Click(_) | Action::KeyPress(_))
    }

    /// Human readable one-liner, the stored description when present
    pub fn describe(&self) -> String {
        let stored = match self {
            Action::Wait(w) => w.description.as_deref(),
            Action::Click(c) => c.description.as_deref(),
            Action::KeyPress(k) => k.description.as_deref(),
            Action::Unknown(_) => None,
        };
        if let Some(s) = stored {
            return s.to_string();
        }
        match self {
            Action::Wait(w) => format!("Wait {}ms", w.duration),
            Action::Click(c) => format!("Click {} at {},{}", c.button, c.x, c.y),
            Action::KeyPress(k) => format!("Key: {}", k.key),
            Action::Unknown(u) => format!("Unknown action '{}'", u.kind),
        }
    }
}

/// A named, immutable recording
///
/// Fields are private: a macro is only ever built whole, either from a
/// finished recording or by the codec.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    name: String,
    created: DateTime<Utc>,
    actions: Vec<Action>,
}

impl Macro {
    pub fn new(name: impl Into<String>, actions: Vec<Action>) -> Result<Self> {
        Self::with_created(name, Utc::now(), actions)
    }

    pub fn with_created(
        name: impl Into<String>,
        created: DateTime<Utc>,
        actions: Vec<Action>,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("Macro name must not be empty"));
        }
        Ok(Self {
            name,
            created,
            actions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Sum of all waits, in ms; saturates at `u64::MAX`
    pub fn total_duration_ms(&self) -> u64 {
        self.actions
            .iter()
            .map(Action::duration_ms)
            .fold(0u64, u64::saturating_add)
    }

    pub fn counts(&self) -> ActionCounts {
        let mut counts = ActionCounts::default();
        for a in &self.actions {
            match a {
                Action::Wait(_) => counts.waits += 1,
                Action::Click(_) => counts.clicks += 1,
                Action::KeyPress(_) => counts.keys += 1,
                Action::Unknown(_) => counts.unknown += 1,
            }
        }
        counts
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub waits: usize,
    pub clicks: usize,
    pub keys: usize,
    pub unknown: usize,
}

/// Raw input as observed by an event source
#[derive(Debug, Clone, PartialEq)]
pub struct InputEvent {
    /// When the source observed the event
    pub at: Instant,
    pub kind: InputKind,
}

impl InputEvent {
    pub fn new(at: Instant, kind: InputKind) -> Self {
        Self { at, kind }
    }

    pub fn now(kind: InputKind) -> Self {
        Self::new(Instant::now(), kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputKind {
    Pointer {
        x: i32,
        y: i32,
        button: MouseButton,
        /// `false` for the release edge
        pressed: bool,
    },
    Key {
        key: String,
    },
}

impl InputKind {
    pub fn press(x: i32, y: i32, button: MouseButton) -> Self {
        InputKind::Pointer {
            x,
            y,
            button,
            pressed: true,
        }
    }

    pub fn release(x: i32, y: i32, button: MouseButton) -> Self {
        InputKind::Pointer {
            x,
            y,
            button,
            pressed: false,
        }
    }

    pub fn key(key: impl Into<String>) -> Self {
        InputKind::Key { key: key.into() }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, InputKind::Pointer { .. })
    }
}

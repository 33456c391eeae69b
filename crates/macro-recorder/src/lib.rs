//! macro-recorder - record, store and replay input macros
//!
//! Pointer clicks and key presses are turned into a timed action list
//! (the Action Log), persisted as JSON (the Macro Codec) and handed to an
//! external automation engine for playback.
//!
//! ## Platform Support
//!
//! - **Windows / macOS**: live capture via a global rdev hook
//! - **Linux**: no live capture; scripted sources, storage and playback work

pub mod codec;
pub mod events;
pub mod platform;
pub mod recorder;
pub mod replay;
pub mod storage;

pub use codec::ParseOptions;
pub use events::*;
pub use platform::live_source;
pub use recorder::{
    ActionLog, EventSource, Flow, MacroRecorder, RecorderConfig, Recording, ScriptedSource,
    SourceContext, StopSignal,
};
pub use replay::{PlaybackDispatcher, PlaybackFailure, PlaybackOutcome, PlaybackReport};
pub use storage::{MacroInfo, MacroStorage};

pub mod prelude {
    pub use crate::codec;
    pub use crate::events::*;
    pub use crate::recorder::{EventSource, MacroRecorder, RecorderConfig, Recording, ScriptedSource};
    pub use crate::replay::{PlaybackDispatcher, PlaybackOutcome, PlaybackReport};
    pub use crate::storage::{MacroInfo, MacroStorage};
}

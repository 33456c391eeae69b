//! macro-maker - record mouse/keyboard macros and replay them
//!
//! ## Crates
//!
//! - **core** ([`macro_core`]): structured errors and settings
//! - **recorder** ([`macro_recorder`]): action log, recording sessions,
//!   JSON codec, storage and the playback dispatcher
//!
//! ```no_run
//! use macro_maker::prelude::*;
//!
//! # fn main() -> macro_maker::Result<()> {
//! let settings = Settings::load(None)?;
//! let storage = MacroStorage::new(&settings)?;
//!
//! let mut recorder = MacroRecorder::with_config(RecorderConfig::from(&settings.recorder));
//! recorder.start_live()?;
//! if let Some(recording) = recorder.wait() {
//!     let path = storage.save(&recording.into_macro("demo")?, false)?;
//!     PlaybackDispatcher::new(&settings.engine).play(&path)?.into_result()?;
//! }
//! # Ok(())
//! # }
//! ```

pub use macro_core as core;
pub use macro_recorder as recorder;

pub use macro_core::{Error, ErrorCode, Result, Settings};
pub use macro_recorder::codec;

pub mod prelude {
    pub use macro_core::prelude::*;
    pub use macro_recorder::prelude::*;
}

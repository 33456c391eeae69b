//! macro-core - shared foundations for macro-maker
//!
//! Structured errors that serialize cleanly for `--json` output, and the
//! settings layer every other crate reads from.

pub mod config;
pub mod error;

pub use config::{EngineSettings, RecorderSettings, Settings};
pub use error::{Error, ErrorCode, Result};

pub mod prelude {
    pub use crate::config::{EngineSettings, RecorderSettings, Settings};
    pub use crate::error::{Error, ErrorCode, Result};
}

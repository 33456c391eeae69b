//! Platform input capture
//!
//! Windows and macOS capture through a global rdev hook. Other platforms
//! can still record from any custom [`EventSource`].

#[cfg(any(target_os = "windows", target_os = "macos"))]
mod hook;

#[cfg(any(target_os = "windows", target_os = "macos"))]
pub use hook::HookSource;

use crate::recorder::{EventSource, RecorderConfig};
use macro_core::Result;

/// The live pointer + keyboard source for this platform
#[cfg(any(target_os = "windows", target_os = "macos"))]
pub fn live_source(config: &RecorderConfig) -> Result<Box<dyn EventSource>> {
    if !config.record_pointer && !config.record_keyboard {
        return Err(macro_core::Error::initialization(
            "Both pointer and keyboard recording are disabled",
        ));
    }
    Ok(Box::new(HookSource::new(
        config.record_pointer,
        config.record_keyboard,
    )))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn live_source(_config: &RecorderConfig) -> Result<Box<dyn EventSource>> {
    Err(macro_core::Error::initialization(
        "Live input capture is not supported on this platform",
    )
    .with_suggestions(vec!["Record on Windows or macOS".into()]))
}

#[cfg(all(test, not(any(target_os = "windows", target_os = "macos"))))]
mod tests {
    use super::*;

    #[test]
    fn live_capture_unsupported() {
        let err = live_source(&RecorderConfig::default()).err().unwrap();
        assert!(err.is(macro_core::ErrorCode::Initialization));
    }
}

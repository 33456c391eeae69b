//! Structured errors shared by recording, storage and playback

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code:?}] {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed macro document
    Validation,
    AlreadyRecording,
    /// No playback engine executable could be located
    ExecutableMissing,
    Timeout,
    /// The playback engine exited with a non-zero status
    ProcessFailure,
    NotFound,
    AlreadyExists,
    Initialization,
    Io,
    Unknown,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestions: Vec::new(),
            context: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, reason)
    }

    pub fn already_recording() -> Self {
        Self::new(ErrorCode::AlreadyRecording, "A recording session is already active")
            .with_suggestions(vec!["Stop the current session before starting a new one".into()])
    }

    pub fn executable_missing(candidates: &[String]) -> Self {
        Self::new(
            ErrorCode::ExecutableMissing,
            "No playback engine executable found",
        )
        .with_suggestions(vec![
            "Install AutoHotkey or add it to PATH".into(),
            "Set engine.candidates in the config file".into(),
        ])
        .with_context(serde_json::json!({ "candidates": candidates }))
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Playback timed out after {}ms", timeout_ms),
        )
    }

    pub fn process_failure(code: Option<i32>, output: &str) -> Self {
        let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        Self::new(
            ErrorCode::ProcessFailure,
            format!("Playback engine failed (exit {}): {}", status, output.trim()),
        )
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("Not found: {}", what))
    }

    pub fn already_exists(what: &str) -> Self {
        Self::new(ErrorCode::AlreadyExists, format!("Already exists: {}", what))
            .with_suggestions(vec!["Pass --force to overwrite".into()])
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Initialization, message)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::new(ErrorCode::Unknown, e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::new(ErrorCode::NotFound, e.to_string()),
            _ => Self::new(ErrorCode::Io, e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::validation(format!("Invalid JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let e = Error::validation("Missing 'actions' field");
        assert_eq!(e.to_string(), "[Validation] Missing 'actions' field");
    }

    #[test]
    fn serializes_code_in_screaming_case() {
        let json = serde_json::to_value(Error::timeout(1500)).unwrap();
        assert_eq!(json["code"], "TIMEOUT");
        assert!(json.get("suggestions").is_none());
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(Error::from(io).is(ErrorCode::NotFound));
    }

    #[test]
    fn process_failure_reports_signal_when_no_code() {
        let e = Error::process_failure(None, "killed\n");
        assert!(e.message.contains("exit signal"));
        assert!(e.message.ends_with("killed"));
    }
}

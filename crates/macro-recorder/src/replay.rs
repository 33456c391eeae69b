//! Macro playback through an external automation engine
//!
//! The engine (AutoHotkey by default) is a black box: it is started as
//! `<engine> [script] <macro.json>`, reads the document itself and replays
//! the waits, clicks and key presses. We only locate it, bound its runtime
//! and classify how it exited.

use crate::codec;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use macro_core::{EngineSettings, Error, Result};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(10);
/// How long pipes may stay open after the engine itself has exited
const PIPE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlaybackOutcome {
    Success,
    Failure(PlaybackFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PlaybackFailure {
    ExecutableMissing { candidates: Vec<String> },
    /// The engine was killed after running past the timeout
    Timeout { after_ms: u64 },
    /// Non-zero exit; `output` is stderr, else stdout
    ProcessFailure { code: Option<i32>, output: String },
    Spawn { message: String },
}

/// Everything observed about one engine run
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub outcome: PlaybackOutcome,
    pub executable: Option<PathBuf>,
    pub pid: Option<u32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl PlaybackReport {
    fn failed(failure: PlaybackFailure, started: Instant) -> Self {
        Self {
            outcome: PlaybackOutcome::Failure(failure),
            executable: None,
            pid: None,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == PlaybackOutcome::Success
    }

    /// Map a failed run onto the error taxonomy
    pub fn into_result(self) -> Result<Self> {
        let failure = match &self.outcome {
            PlaybackOutcome::Success => return Ok(self),
            PlaybackOutcome::Failure(f) => f,
        };
        Err(match failure {
            PlaybackFailure::ExecutableMissing { candidates } => Error::executable_missing(candidates),
            PlaybackFailure::Timeout { after_ms } => Error::timeout(*after_ms),
            PlaybackFailure::ProcessFailure { code, output } => Error::process_failure(*code, output),
            PlaybackFailure::Spawn { message } => {
                Error::new(macro_core::ErrorCode::Io, format!("Failed to start engine: {}", message))
            }
        })
    }
}

/// Locates the engine and runs macros through it
#[derive(Debug, Clone)]
pub struct PlaybackDispatcher {
    candidates: Vec<String>,
    script: Option<PathBuf>,
    timeout: Duration,
}

impl PlaybackDispatcher {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            candidates: settings.candidates.clone(),
            script: settings.script.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn with_candidates(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            ..Self::new(&EngineSettings::default())
        }
    }

    /// Player script passed before the macro path
    pub fn script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// First existing candidate path, then the first candidate found on PATH
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        for candidate in &self.candidates {
            let path = Path::new(candidate);
            if path.is_file() {
                debug!("Engine found at {}", path.display());
                return Ok(path.to_path_buf());
            }
        }
        for candidate in &self.candidates {
            if let Some(found) = find_on_path(candidate) {
                debug!("Engine '{}' found on PATH at {}", candidate, found.display());
                return Ok(found);
            }
        }
        Err(Error::executable_missing(&self.candidates))
    }

    /// Validate the macro file, then run it with the configured timeout
    pub fn play(&self, macro_path: &Path) -> Result<PlaybackReport> {
        let text = std::fs::read_to_string(macro_path)?;
        let m = codec::parse_str(&text)?;
        info!(
            "Playing '{}' ({} actions, {}ms)",
            m.name(),
            m.actions().len(),
            m.total_duration_ms()
        );
        Ok(self.run(macro_path, self.timeout))
    }

    /// Run the engine against `macro_path`, killing it after `timeout`
    pub fn run(&self, macro_path: &Path, timeout: Duration) -> PlaybackReport {
        let started = Instant::now();

        let exe = match self.resolve_executable() {
            Ok(exe) => exe,
            Err(_) => {
                warn!("No playback engine among {:?}", self.candidates);
                return PlaybackReport::failed(
                    PlaybackFailure::ExecutableMissing {
                        candidates: self.candidates.clone(),
                    },
                    started,
                );
            }
        };

        let mut cmd = Command::new(&exe);
        if let Some(script) = &self.script {
            cmd.arg(script);
        }
        cmd.arg(macro_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // own process group, so a timeout can take down whatever the engine started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        info!("Running {} on {}", exe.display(), macro_path.display());
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                let mut report = PlaybackReport::failed(
                    PlaybackFailure::Spawn {
                        message: e.to_string(),
                    },
                    started,
                );
                report.executable = Some(exe);
                return report;
            }
        };
        let pid = child.id();

        let (tx, rx) = unbounded();
        drain(child.stdout.take(), Pipe::Stdout, tx.clone());
        drain(child.stderr.take(), Pipe::Stderr, tx);
        let waited = wait_with_timeout(&mut child, timeout);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut collect = |deadline: Instant| -> bool {
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(left) {
                    Ok((Pipe::Stdout, chunk)) => stdout.extend_from_slice(&chunk),
                    Ok((Pipe::Stderr, chunk)) => stderr.extend_from_slice(&chunk),
                    Err(RecvTimeoutError::Disconnected) => return true,
                    Err(RecvTimeoutError::Timeout) => return false,
                }
            }
        };
        if !collect(Instant::now() + PIPE_GRACE) {
            // the engine is gone but something it started still holds the pipes
            debug!("Engine pid {} left processes behind, killing its group", pid);
            kill_tree(pid);
            if !collect(Instant::now() + PIPE_GRACE) {
                warn!("Engine output pipes still open, giving up on them");
            }
        }
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        let outcome = match waited {
            Ok(Some(status)) if status.success() => PlaybackOutcome::Success,
            Ok(Some(status)) => {
                let output = pick_output(&stderr, &stdout);
                PlaybackOutcome::Failure(PlaybackFailure::ProcessFailure {
                    code: status.code(),
                    output,
                })
            }
            Ok(None) => PlaybackOutcome::Failure(PlaybackFailure::Timeout {
                after_ms: timeout.as_millis() as u64,
            }),
            Err(e) => PlaybackOutcome::Failure(PlaybackFailure::Spawn {
                message: e.to_string(),
            }),
        };

        let report = PlaybackReport {
            outcome,
            executable: Some(exe),
            pid: Some(pid),
            stdout,
            stderr,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        match &report.outcome {
            PlaybackOutcome::Success => info!("Playback finished in {}ms", report.elapsed_ms),
            PlaybackOutcome::Failure(f) => warn!("Playback failed: {:?}", f),
        }
        report
    }
}

/// `Ok(None)` when the child had to be killed
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            debug!("Killing engine pid {} after {:?}", child.id(), timeout);
            kill_tree(child.id());
            // kill fails only if it already exited; wait reaps it either way
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL);
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Forward a pipe in chunks; the sender drops at EOF
fn drain<R: Read + Send + 'static>(pipe: Option<R>, which: Pipe, tx: Sender<(Pipe, Vec<u8>)>) {
    let Some(mut r) = pipe else {
        return;
    };
    let spawned = thread::Builder::new()
        .name("engine-output".into())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match r.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send((which, buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to spawn output reader: {}", e);
    }
}

/// Kill the engine's process group (unix) or process tree (windows)
#[cfg(unix)]
fn kill_tree(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only signals that process group
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!("No process group {} left to kill", pgid);
    }
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    let result = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        debug!("taskkill failed for pid {}: {}", pid, e);
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(_pid: u32) {}

fn pick_output(stderr: &str, stdout: &str) -> String {
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else if !stdout.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        "Unknown error".to_string()
    }
}

/// PATH lookup of a bare executable name
fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.components().count() != 1 {
        return None;
    }
    let dirs = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&dirs) {
        for file in with_extensions(name) {
            let full = dir.join(&file);
            if is_executable(&full) {
                return Some(full);
            }
        }
    }
    None
}

#[cfg(windows)]
fn with_extensions(name: &str) -> Vec<String> {
    if Path::new(name).extension().is_some() {
        return vec![name.to_string()];
    }
    let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.BAT;.CMD".into());
    std::iter::once(name.to_string())
        .chain(exts.split(';').filter(|e| !e.is_empty()).map(|e| format!("{}{}", name, e)))
        .collect()
}

#[cfg(not(windows))]
fn with_extensions(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

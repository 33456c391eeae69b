//! mm - macro maker CLI
//!
//! Record pointer clicks and key presses into JSON macros, then replay them
//! through an external automation engine (AutoHotkey by default).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use macro_core::config::{data_dir, default_config_path};
use macro_core::{Error, Settings};
use macro_recorder::codec::{self, ParseOptions};
use macro_recorder::prelude::*;

#[derive(Parser)]
#[command(name = "mm")]
#[command(about = "Macro maker - record and replay mouse/keyboard macros")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// Log filter (e.g. "debug", "macro_recorder=trace"); defaults to RUST_LOG, then "info"
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Config file (default: ~/.macro-maker/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record clicks and key presses until the cancel key or Ctrl+C
    Record {
        #[arg(short, long, default_value = codec::DEFAULT_NAME)]
        name: String,
        /// Overwrite an existing macro with the same name
        #[arg(long)]
        force: bool,
    },
    /// Play a saved macro (by name) or a macro file
    Play {
        target: String,
        /// Kill the engine after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List saved macros
    List,
    /// Show a macro's summary
    Show {
        target: String,
        /// Also print every action
        #[arg(long)]
        all: bool,
    },
    /// Check that a file is a valid macro
    Validate {
        file: PathBuf,
        /// Reject unknown action types
        #[arg(long)]
        strict: bool,
    },
    /// Delete a saved macro
    Delete { name: String },
    /// Copy a saved macro into the backups folder
    Backup { name: String },
    /// Print system and engine information
    Doctor,
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        init: bool,
    },
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Error>,
}

impl<T: Serialize> Output<T> {
    fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
    fn err(e: Error) -> Output<()> {
        Output { success: false, data: None, error: Some(e) }
    }
}

fn print_json<T: Serialize>(output: &T) {
    match serde_json::to_string_pretty(output) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to encode output: {}", e),
    }
}

struct Ctx {
    settings: Settings,
    config_path: PathBuf,
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            report_error(cli.json, e.into());
            std::process::exit(1);
        }
    };
    init_logging(&settings.log_file, cli.log_level.as_deref());

    let ctx = Ctx {
        config_path: cli.config.clone().unwrap_or_else(default_config_path),
        settings,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Record { name, force } => record(&ctx, &name, force),
        Commands::Play { target, timeout } => play(&ctx, &target, timeout),
        Commands::List => list(&ctx),
        Commands::Show { target, all } => show(&ctx, &target, all),
        Commands::Validate { file, strict } => validate(&ctx, &file, strict),
        Commands::Delete { name } => delete(&ctx, &name),
        Commands::Backup { name } => backup(&ctx, &name),
        Commands::Doctor => doctor(&ctx),
        Commands::Config { init } => config(&ctx, init),
    };

    if let Err(e) = result {
        report_error(ctx.json, e);
        std::process::exit(1);
    }
}

fn report_error(json: bool, e: anyhow::Error) {
    let err = match e.downcast::<Error>() {
        Ok(err) => err,
        Err(other) => Error::from(other),
    };
    tracing::error!("{}", err.message);
    if json {
        print_json(&Output::<()>::err(err));
        return;
    }
    eprintln!("Error: {}", err.message);
    for s in &err.suggestions {
        eprintln!("  hint: {}", s);
    }
}

/// Console layer on stderr plus an append-only file layer
fn init_logging(log_file: &Path, level: Option<&str>) {
    let filter = || match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(filter());

    let file = match open_log(log_file) {
        Ok(f) => Some(f),
        Err(e) => {
            eprintln!(
                "Note: file logging disabled, cannot open {}: {}",
                log_file.display(),
                e
            );
            None
        }
    };
    let file_layer = file.map(|f| {
        fmt::layer()
            .with_writer(Mutex::new(f))
            .with_ansi(false)
            .with_filter(filter())
    });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();
}

fn open_log(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

// ── Recording ───────────────────────────────────────────────────────────────

fn record(ctx: &Ctx, name: &str, force: bool) -> Result<()> {
    let storage = MacroStorage::new(&ctx.settings)?;
    if storage.exists(name) && !force {
        return Err(Error::already_exists(&format!("Macro '{}'", name)).into());
    }

    let config = RecorderConfig::from(&ctx.settings.recorder);
    let cancel_key = config.cancel_key.clone();
    let mut recorder = MacroRecorder::with_config(config);

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    recorder.start_live()?;
    if !ctx.json {
        println!("Recording: {} (press {} or Ctrl+C to stop)", name, cancel_key);
    }

    let mut count = 0;
    while recorder.is_recording() && !interrupted.load(Ordering::SeqCst) {
        let now = recorder.recorded_count();
        if now != count && !ctx.json {
            count = now;
            print!("\r{} actions", count);
            io::stdout().flush()?;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let recording = recorder.stop().context("Recording produced no result")?;
    let cancelled = recording.cancelled;
    let m = recording.into_macro(name)?;
    let path = storage.save(&m, force)?;

    if ctx.json {
        print_json(&Output::ok(serde_json::json!({
            "name": m.name(),
            "path": path,
            "actions": m.actions().len(),
            "counts": m.counts(),
            "total_duration": m.total_duration_ms(),
            "cancelled": cancelled,
        })));
    } else {
        let counts = m.counts();
        println!(
            "\n{} clicks, {} keys over {:.1}s",
            counts.clicks,
            counts.keys,
            m.total_duration_ms() as f64 / 1000.0
        );
        println!("Saved: {}", path.display());
    }
    Ok(())
}

// ── Playback ────────────────────────────────────────────────────────────────

fn play(ctx: &Ctx, target: &str, timeout: Option<u64>) -> Result<()> {
    let storage = MacroStorage::new(&ctx.settings)?;
    let path = storage.resolve(target)?;

    let mut dispatcher = PlaybackDispatcher::new(&ctx.settings.engine);
    if let Some(secs) = timeout {
        dispatcher = dispatcher.timeout(Duration::from_secs(secs));
    }
    if !ctx.json {
        println!("Playing {}...", path.display());
    }
    let report = dispatcher.play(&path)?;
    if !report.stdout.trim().is_empty() {
        debug!("Engine output: {}", report.stdout.trim());
    }
    let report = report.into_result()?;

    if ctx.json {
        print_json(&Output::ok(&report));
    } else {
        println!("Done in {:.1}s", report.elapsed_ms as f64 / 1000.0);
    }
    Ok(())
}

// ── Storage ─────────────────────────────────────────────────────────────────

fn list(ctx: &Ctx) -> Result<()> {
    let storage = MacroStorage::new(&ctx.settings)?;
    let macros = storage.list()?;
    if ctx.json {
        print_json(&Output::ok(&macros));
        return Ok(());
    }
    if macros.is_empty() {
        println!("No macros saved in {}", storage.path().display());
        return Ok(());
    }
    for m in &macros {
        println!(
            "{:<30} {:>5} actions {:>8.1}s  {}",
            m.name,
            m.actions_count,
            m.total_duration as f64 / 1000.0,
            m.created.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn show(ctx: &Ctx, target: &str, all: bool) -> Result<()> {
    let storage = MacroStorage::new(&ctx.settings)?;
    let m = storage.load(target)?;
    let counts = m.counts();

    if ctx.json {
        let mut data = serde_json::json!({
            "name": m.name(),
            "created": m.created(),
            "total_duration": m.total_duration_ms(),
            "counts": counts,
        });
        if all {
            data["actions"] = serde_json::to_value(m.actions())?;
        }
        print_json(&Output::ok(data));
        return Ok(());
    }

    println!("Name: {}", m.name());
    println!("Created: {}", m.created().to_rfc3339());
    println!("Actions: {}", m.actions().len());
    println!("Duration: {:.1}s", m.total_duration_ms() as f64 / 1000.0);
    println!(
        "\nSummary: {} clicks, {} keys, {} waits, {} unknown",
        counts.clicks, counts.keys, counts.waits, counts.unknown
    );
    if all {
        for (i, a) in m.actions().iter().enumerate() {
            println!("{:>4}: {}", i, a.describe());
        }
    }
    Ok(())
}

fn validate(ctx: &Ctx, file: &Path, strict: bool) -> Result<()> {
    let text = fs::read_to_string(file).map_err(Error::from)?;
    let opts = if strict { ParseOptions::strict() } else { ParseOptions::default() };
    let m = codec::parse_str_with(&text, opts)?;
    info!("{} is a valid macro", file.display());

    if ctx.json {
        print_json(&Output::ok(serde_json::json!({
            "valid": true,
            "name": m.name(),
            "actions": m.actions().len(),
            "counts": m.counts(),
        })));
    } else {
        println!("Valid: {} ({} actions)", m.name(), m.actions().len());
        if m.counts().unknown > 0 {
            println!("Warning: {} actions of unknown type", m.counts().unknown);
        }
    }
    Ok(())
}

fn delete(ctx: &Ctx, name: &str) -> Result<()> {
    let storage = MacroStorage::new(&ctx.settings)?;
    storage.delete(name)?;
    if ctx.json {
        print_json(&Output::ok(serde_json::json!({ "deleted": name })));
    } else {
        println!("Deleted: {}", name);
    }
    Ok(())
}

fn backup(ctx: &Ctx, name: &str) -> Result<()> {
    let storage = MacroStorage::new(&ctx.settings)?;
    let dest = storage.backup(name)?;
    if ctx.json {
        print_json(&Output::ok(serde_json::json!({ "backup": dest })));
    } else {
        println!("Backup: {}", dest.display());
    }
    Ok(())
}

// ── Diagnostics ─────────────────────────────────────────────────────────────

fn doctor(ctx: &Ctx) -> Result<()> {
    let engine = PlaybackDispatcher::new(&ctx.settings.engine).resolve_executable();
    let live = macro_recorder::live_source(&RecorderConfig::from(&ctx.settings.recorder));
    let saved = MacroStorage::new(&ctx.settings)
        .and_then(|s| s.list())
        .map(|l| l.len())
        .unwrap_or(0);

    let report = serde_json::json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cwd": std::env::current_dir().ok(),
        "data_dir": data_dir(),
        "config_file": ctx.config_path,
        "config_exists": ctx.config_path.is_file(),
        "macros_dir": ctx.settings.macros_dir,
        "macros_saved": saved,
        "log_file": ctx.settings.log_file,
        "engine": engine.as_ref().ok(),
        "live_capture": live.is_ok(),
    });

    if ctx.json {
        print_json(&Output::ok(report));
        return Ok(());
    }
    println!("OS: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    if let Ok(cwd) = std::env::current_dir() {
        println!("Working dir: {}", cwd.display());
    }
    println!(
        "Config: {}{}",
        ctx.config_path.display(),
        if ctx.config_path.is_file() { "" } else { " (not found, using defaults)" }
    );
    println!("Macros: {} ({} saved)", ctx.settings.macros_dir.display(), saved);
    println!("Log: {}", ctx.settings.log_file.display());
    match &engine {
        Ok(p) => println!("Engine: {}", p.display()),
        Err(e) => println!("Engine: MISSING ({})", e.message),
    }
    match &live {
        Ok(_) => println!("Live capture: OK"),
        Err(e) => println!("Live capture: UNAVAILABLE ({})", e.message),
    }
    Ok(())
}

fn config(ctx: &Ctx, init: bool) -> Result<()> {
    if init {
        if ctx.config_path.exists() {
            return Err(Error::already_exists(&ctx.config_path.display().to_string()).into());
        }
        ctx.settings.save(&ctx.config_path)?;
        info!("Wrote config to {}", ctx.config_path.display());
    }
    if ctx.json {
        print_json(&Output::ok(&ctx.settings));
    } else {
        println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
        if init {
            println!("Written to {}", ctx.config_path.display());
        }
    }
    Ok(())
}

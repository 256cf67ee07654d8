//! Structured JSONL logging for post-run analysis and compact stderr output.
//!
//! This module provides dual-output logging:
//! - **JSONL to file** (~/.chat-escalation/logs/driver.jsonl) - one object per event
//! - **Compact to stderr** - human-readable for whoever runs the driver
//!
//! stdout is never written by logging: it carries protocol results only.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chat_escalation_driver::logging;
//!
//! // Initialize logging - MUST keep guard alive for duration of program
//! let _guard = logging::init(&config.log);
//!
//! tracing::info!(event_type = "flow", attempt = 1, "Flow attempt started");
//! ```
//!
//! # JSONL Output Format
//!
//! ```json
//! {"timestamp":"2026-03-02T10:30:45.123Z","level":"INFO","target":"chat_escalation_driver::flow","fields":{"message":"Step finished","event_type":"step","step":5,"label":"group_selected","success":true,"duration_ms":812}}
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Steps slower than this are logged at warn level.
const SLOW_STEP_MS: u64 = 30_000;

/// Guard that must be kept alive for the duration of the program.
/// Dropping this guard will flush and close the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initialize the dual-output logging system.
///
/// Returns a guard that MUST be kept alive for the duration of the program.
/// A log file that cannot be opened disables the file layer only.
pub fn init(config: &LogConfig) -> LoggingGuard {
    let log_path = config.path();

    let writer: Box<dyn Write + Send> = match open_log_file(&log_path) {
        Ok(file) => Box::new(file),
        Err(e) => {
            eprintln!("[LOGGING] Failed to open {}: {}", log_path.display(), e);
            Box::new(std::io::sink())
        }
    };

    // Non-blocking so slow disks never stall input timing
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(writer);

    // RUST_LOG wins over the configured filter
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE);

    let compact_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .compact();

    // try_init: a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer)
        .try_init();

    tracing::info!(
        event_type = "driver_lifecycle",
        action = "started",
        log_path = %log_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Driver logging initialized"
    );

    LoggingGuard {
        _file_guard: file_guard,
    }
}

/// Open the JSONL file in append mode, creating its directory.
fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

// =============================================================================
// STRUCTURED LOGGING HELPERS
// =============================================================================

/// Log the start of a flow step (`step` is the state being reached)
pub fn log_step_started(step: u8, label: &str, attempt: u32) {
    tracing::info!(
        event_type = "step",
        action = "started",
        step,
        label,
        attempt,
        "Step {} ({}) started",
        step,
        label
    );
}

/// Log the end of a flow step with duration and outcome
pub fn log_step_finished(step: u8, label: &str, success: bool, duration_ms: u64) {
    if !success {
        tracing::warn!(
            event_type = "step",
            action = "failed",
            step,
            label,
            success,
            duration_ms,
            "Step {} ({}) failed after {}ms",
            step,
            label,
            duration_ms
        );
    } else if duration_ms > SLOW_STEP_MS {
        tracing::warn!(
            event_type = "step",
            action = "finished",
            step,
            label,
            success,
            duration_ms,
            is_slow = true,
            "Slow step {} ({}) took {}ms",
            step,
            label,
            duration_ms
        );
    } else {
        tracing::info!(
            event_type = "step",
            action = "finished",
            step,
            label,
            success,
            duration_ms,
            "Step {} ({}) finished in {}ms",
            step,
            label,
            duration_ms
        );
    }
}

/// Log one visual classification with the measurement behind it
pub fn log_detection(kind: &str, dark_pixels: u32, detected: bool) {
    tracing::debug!(
        event_type = "detection",
        kind,
        dark_pixels,
        detected,
        "{} = {} ({} dark pixels)",
        kind,
        detected,
        dark_pixels
    );
}

/// Log a synthesized click, tagged with why it happened
pub fn log_click(x: i32, y: i32, purpose: &str) {
    tracing::debug!(event_type = "input", action = "click", x, y, purpose, "Click at ({}, {}) for {}", x, y, purpose);
}

/// Log a failure that will be reported to the caller
pub fn log_failure(reason: &str, failed_step: Option<u8>, message: &str) {
    tracing::error!(
        event_type = "failure",
        error_reason = reason,
        failed_step,
        error_message = message,
        "{}: {}",
        reason,
        message
    );
}

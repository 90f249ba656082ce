//! Activity Logging Module
//!
//! Structured run logging for auditing and debugging.
//! IMPORTANT: This module must NEVER log PHI (Protected Health Information).
//!
//! What IS logged:
//! - Run IDs, claim IDs, insurance plan tags
//! - Step names, strategy indices and outcomes (success/failure)
//! - Durations, character counts and code counts
//! - CPT codes and modifiers (billing data, not clinical content)
//! - Model IDs and endpoints
//! - Error messages (sanitized)
//!
//! What is NOT logged:
//! - Progress note text
//! - Prompts or raw model responses
//! - Patient names or demographics
//! - Passwords

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Guard held for the lifetime of the process so file logs are flushed on exit
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the activity logging system
///
/// Sets up dual logging:
/// - Console output (human-readable, stderr)
/// - File output (JSON, daily rotation) under `log_dir` or ~/.ecw-autocoder/logs/
///
/// Returns the directory the file log is written to.
pub fn init_logging(
    log_dir: Option<&Path>,
    verbose: bool,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = match log_dir {
        Some(dir) => dir.to_path_buf(),
        None => get_log_directory()?,
    };
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "activity.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(EnvFilter::new("debug"));

    let default_level = if verbose { "debug" } else { "info" };
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        );

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    info!(
        event = "logging_initialized",
        log_dir = %log_dir.display(),
        "Activity logging system initialized"
    );

    Ok(log_dir)
}

/// Default log directory
fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let home = dirs::home_dir().ok_or("Could not determine home directory")?;
    Ok(home.join(".ecw-autocoder").join("logs"))
}

// ============================================================================
// Run Lifecycle Events
// ============================================================================

pub fn log_run_start(run_id: &str, claim_id: &str, plan: &str, headless: bool) {
    info!(
        event = "run_start",
        run_id = %run_id,
        claim_id = %claim_id,
        insurance_plan = %plan,
        headless = headless,
        "Automation run started"
    );
}

pub fn log_run_finished(
    run_id: &str,
    verdict: &str,
    populated: usize,
    attempted: usize,
    duration_ms: u64,
) {
    info!(
        event = "run_finished",
        run_id = %run_id,
        verdict = %verdict,
        populated = populated,
        attempted = attempted,
        duration_ms = duration_ms,
        "Automation run finished"
    );
}

/// Log a pipeline stage outcome
pub fn log_step(
    run_id: &str,
    step: &str,
    success: bool,
    duration_ms: u64,
    error_message: Option<&str>,
) {
    if success {
        info!(
            event = "step",
            run_id = %run_id,
            step = %step,
            success = true,
            duration_ms = duration_ms,
            "Step completed"
        );
    } else {
        error!(
            event = "step",
            run_id = %run_id,
            step = %step,
            success = false,
            duration_ms = duration_ms,
            error_message = error_message,
            "Step failed"
        );
    }
}

// ============================================================================
// Notes / Prediction Events
// ============================================================================

/// Log notes acquisition. Takes a character count, never the note text.
pub fn log_notes_acquired(run_id: &str, source: &str, char_count: usize, attempts: usize) {
    info!(
        event = "notes_acquired",
        run_id = %run_id,
        source = %source,
        char_count = char_count,
        attempts = attempts,
        "Progress notes acquired"
    );
}

/// Log a prediction call. Takes sizes and counts, never prompt or response text.
pub fn log_prediction(
    model: &str,
    plan: &str,
    prompt_chars: usize,
    code_count: usize,
    generation_time_ms: u64,
    success: bool,
    error_message: Option<&str>,
) {
    if success {
        info!(
            event = "prediction",
            model = %model,
            insurance_plan = %plan,
            prompt_chars = prompt_chars,
            code_count = code_count,
            generation_time_ms = generation_time_ms,
            success = true,
            "CPT prediction completed"
        );
    } else {
        error!(
            event = "prediction",
            model = %model,
            insurance_plan = %plan,
            prompt_chars = prompt_chars,
            generation_time_ms = generation_time_ms,
            success = false,
            error_message = error_message,
            "CPT prediction failed"
        );
    }
}

// ============================================================================
// Code Population Events
// ============================================================================

pub fn log_code_cycle(
    index: usize,
    code: &str,
    modifiers_written: usize,
    success: bool,
    error_message: Option<&str>,
) {
    if success {
        info!(
            event = "code_cycle",
            index = index,
            code = %code,
            modifiers_written = modifiers_written,
            success = true,
            "Code populated"
        );
    } else {
        warn!(
            event = "code_cycle",
            index = index,
            code = %code,
            modifiers_written = modifiers_written,
            success = false,
            error_message = error_message,
            "Code population failed"
        );
    }
}

// ============================================================================
// Warning Events
// ============================================================================

/// Log a warning (sanitized - no PHI)
pub fn log_warning(context: &str, warning_type: &str, message: &str) {
    warn!(
        event = "warning",
        context = %context,
        warning_type = %warning_type,
        message = %message,
        "Warning"
    );
}

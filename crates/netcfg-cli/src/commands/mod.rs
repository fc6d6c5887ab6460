pub mod install;
pub mod list;
pub mod show_config;
pub mod uninstall;

use indicatif::{ProgressBar, ProgressStyle};
use netcfg_core::{
    ClassId, ErrorKind, NetCfgError, NetcfgConfig, SessionOrchestrator, TransactionResult,
};
use netcfg_store::{FileProvider, FsPackageStager, StoreLayout};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_LOCK_CONTENTION: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_CLEANUP_FAILED: u8 = 4;

pub fn json_pretty(value: &impl Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = match ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        Ok(style) => style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        Err(_) => ProgressStyle::default_spinner(),
    };
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

pub fn colorize_class(class_id: ClassId) -> String {
    use console::Style;
    match class_id.alias() {
        Some("adapter") => Style::new().green().apply_to("adapter").to_string(),
        Some("client") => Style::new().cyan().apply_to("client").to_string(),
        Some("service") => Style::new().yellow().apply_to("service").to_string(),
        Some("protocol") => Style::new().blue().apply_to("protocol").to_string(),
        Some(other) => other.to_owned(),
        None => class_id.to_string(),
    }
}

pub fn orchestrator(store_path: &Path, config: &NetcfgConfig) -> SessionOrchestrator<FileProvider> {
    let layout = StoreLayout::new(store_path);
    SessionOrchestrator::with_config(
        FileProvider::new(layout.clone()),
        Box::new(FsPackageStager::new(layout)),
        config.session(),
    )
}

pub fn exit_code_for(err: &NetCfgError) -> u8 {
    match err.kind() {
        ErrorKind::LockContention => EXIT_LOCK_CONTENTION,
        ErrorKind::StoreInitFailed => EXIT_STORE_ERROR,
        ErrorKind::PostApplyCleanupFailed => EXIT_CLEANUP_FAILED,
        _ => EXIT_FAILURE,
    }
}

/// Machine-readable form of a session outcome.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub status: &'static str,
    pub action: &'a str,
    pub component_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_holder: Option<&'a str>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<'a> Report<'a> {
    pub fn new(action: &'a str, component_id: &'a str, result: &'a TransactionResult) -> Self {
        let status = match result {
            TransactionResult::Applied => "applied",
            TransactionResult::Failed(_) => "failed",
            TransactionResult::CleanupFailed(_) => "cleanup_failed",
        };
        let kind = result.kind();
        Self {
            status,
            action,
            component_id,
            kind,
            code: result.code().map(|c| format!("{c:#010x}")),
            lock_holder: result.lock_holder(),
            retryable: kind.is_some_and(ErrorKind::is_retryable),
            message: result.error().map(ToString::to_string),
        }
    }
}

/// Human-readable failure line; contention names the holder.
pub fn describe_error(err: &NetCfgError) -> String {
    match err {
        NetCfgError::LockContention { holder: Some(holder) } => {
            format!("configuration store is locked by {holder}")
        }
        NetCfgError::LockContention { holder: None } => {
            "configuration store is locked by another application".to_owned()
        }
        other => other.to_string(),
    }
}

/// Print a session outcome and pick the process exit code.
pub fn report(
    action: &str,
    component_id: &str,
    result: &TransactionResult,
    pb: Option<&ProgressBar>,
    json: bool,
) -> Result<u8, String> {
    if json {
        println!("{}", json_pretty(&Report::new(action, component_id, result))?);
    }
    let code = match result {
        TransactionResult::Applied => {
            if let Some(pb) = pb {
                spin_ok(pb, &format!("{action} {component_id}"));
            }
            EXIT_SUCCESS
        }
        TransactionResult::Failed(err) => {
            if let Some(pb) = pb {
                spin_fail(pb, &format!("{action} {component_id}"));
            }
            if !json {
                eprintln!("error: {}", describe_error(err));
                if err.kind().is_retryable() {
                    eprintln!("hint: retry once the store is free");
                }
            }
            exit_code_for(err)
        }
        TransactionResult::CleanupFailed(err) => {
            if let Some(pb) = pb {
                spin_ok(pb, &format!("{action} {component_id}"));
            }
            if !json {
                eprintln!("warning: {}", describe_error(err));
            }
            EXIT_CLEANUP_FAILED
        }
    };
    Ok(code)
}

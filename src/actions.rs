//! Action registry — the fixed catalog of maintenance actions.
//!
//! Every action reports one progress message before it starts and always
//! comes back with an [`Outcome`]; failures are data, never errors.

use crate::config::Config;
use crate::registry::{self, Setting, SettingsStore, VISUAL_FX_BEST_PERFORMANCE};
use crate::runner::{self, CommandRunner};
use crate::services;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Declaration order is the display and execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    CleanTempFiles,
    ClearUpdateCache,
    EmptyRecycleBin,
    FlushDns,
    OptimizeDisk,
    HighPerformancePower,
    VisualEffects,
    DisableBackgroundApps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    Success(String),
    /// Nothing to do, e.g. the bin was already empty.
    Skipped(String),
    Failure(String),
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Outcome::Success(message.into())
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Outcome::Skipped(message.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success(m) | Outcome::Skipped(m) | Outcome::Failure(m) => m,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Receives human-readable progress lines.
pub trait ProgressSink {
    fn progress(&mut self, message: &str);
}

impl<F: FnMut(&str)> ProgressSink for F {
    fn progress(&mut self, message: &str) {
        self(message)
    }
}

/// Catalog entry as shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    /// The Settings Guard can undo this action.
    pub restorable: bool,
}

/// Everything the actions touch on the machine.
#[derive(Clone)]
pub struct ActionEnv {
    pub runner: Arc<dyn CommandRunner>,
    pub store: Arc<dyn SettingsStore>,
    pub temp_dirs: Vec<PathBuf>,
    pub update_cache_dir: PathBuf,
    pub update_service: String,
    pub system_volume: String,
}

impl ActionEnv {
    pub fn from_config(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            runner,
            store,
            temp_dirs: config.temp_dirs.clone(),
            update_cache_dir: config.update_cache_dir.clone(),
            update_service: config.update_service.clone(),
            system_volume: config.system_volume.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════════════

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::CleanTempFiles,
        ActionKind::ClearUpdateCache,
        ActionKind::EmptyRecycleBin,
        ActionKind::FlushDns,
        ActionKind::OptimizeDisk,
        ActionKind::HighPerformancePower,
        ActionKind::VisualEffects,
        ActionKind::DisableBackgroundApps,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::CleanTempFiles => "Clean Temporary Files",
            ActionKind::ClearUpdateCache => "Clear Windows Update Cache",
            ActionKind::EmptyRecycleBin => "Empty Recycle Bin",
            ActionKind::FlushDns => "Clear DNS Cache",
            ActionKind::OptimizeDisk => "Optimize System Disk (Defrag/TRIM)",
            ActionKind::HighPerformancePower => "Set High Performance Power Plan",
            ActionKind::VisualEffects => "Adjust Visual Effects for Performance",
            ActionKind::DisableBackgroundApps => "Disable Background Apps (Global)",
        }
    }

    /// Short command-line friendly identifier.
    pub fn id(self) -> &'static str {
        match self {
            ActionKind::CleanTempFiles => "temp_files",
            ActionKind::ClearUpdateCache => "update_cache",
            ActionKind::EmptyRecycleBin => "recycle_bin",
            ActionKind::FlushDns => "dns_flush",
            ActionKind::OptimizeDisk => "disk_optimize",
            ActionKind::HighPerformancePower => "power_plan",
            ActionKind::VisualEffects => "visual_effects",
            ActionKind::DisableBackgroundApps => "background_apps",
        }
    }

    /// Resolve a user-facing name or an id, ignoring case.
    pub fn from_name(name: &str) -> Option<ActionKind> {
        let name = name.trim();
        ActionKind::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(name) || a.id().eq_ignore_ascii_case(name))
    }

    pub fn progress_message(self) -> &'static str {
        match self {
            ActionKind::CleanTempFiles => "Cleaning temporary files...",
            ActionKind::ClearUpdateCache => "Cleaning Windows Update cache...",
            ActionKind::EmptyRecycleBin => "Emptying Recycle Bin...",
            ActionKind::FlushDns => "Clearing DNS cache...",
            ActionKind::OptimizeDisk => "Optimizing system disk (Defrag/TRIM)...",
            ActionKind::HighPerformancePower => "Setting power plan to High Performance...",
            ActionKind::VisualEffects => "Adjusting visual effects for performance...",
            ActionKind::DisableBackgroundApps => "Disabling background apps...",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ActionKind::CleanTempFiles => "Delete everything in the user and system temp folders, skipping locked files",
            ActionKind::ClearUpdateCache => "Stop Windows Update, wipe SoftwareDistribution, start it again",
            ActionKind::EmptyRecycleBin => "Permanently delete the contents of the Recycle Bin",
            ActionKind::FlushDns => "Flush the DNS resolver cache",
            ActionKind::OptimizeDisk => "Run defrag /O on the system volume (defragments HDDs, TRIMs SSDs)",
            ActionKind::HighPerformancePower => "Activate the fastest power plan available",
            ActionKind::VisualEffects => "Switch visual effects to \"Adjust for best performance\"",
            ActionKind::DisableBackgroundApps => "Stop Store apps from running in the background",
        }
    }

    /// The setting this action overwrites, if any.
    pub fn touches(self) -> Option<Setting> {
        match self {
            ActionKind::VisualEffects => Some(Setting::VisualEffects),
            ActionKind::DisableBackgroundApps => Some(Setting::BackgroundApps),
            _ => None,
        }
    }

    pub fn info(self) -> ActionInfo {
        ActionInfo {
            id: self.id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            restorable: self
                .touches()
                .is_some_and(|s| crate::backup::BACKED_UP_SETTINGS.contains(&s)),
        }
    }

    /// Announce the action on `sink`, then perform it.
    pub fn execute(self, env: &ActionEnv, sink: &mut dyn ProgressSink) -> Outcome {
        sink.progress(self.progress_message());
        match self {
            ActionKind::CleanTempFiles => clean_temp_files(env),
            ActionKind::ClearUpdateCache => clear_update_cache(env),
            ActionKind::EmptyRecycleBin => empty_recycle_bin(env),
            ActionKind::FlushDns => run_cmd(
                env,
                "ipconfig",
                &["/flushdns"],
                "DNS cache flushed successfully.",
                "Failed to flush DNS cache",
            ),
            ActionKind::OptimizeDisk => run_cmd(
                env,
                "defrag",
                &[env.system_volume.as_str(), "/O"],
                "System disk optimization complete.",
                "Disk optimization failed",
            ),
            ActionKind::HighPerformancePower => set_high_performance_power(env),
            ActionKind::VisualEffects => adjust_visual_effects(env),
            ActionKind::DisableBackgroundApps => disable_background_apps(env),
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub fn catalog() -> Vec<ActionInfo> {
    ActionKind::ALL.into_iter().map(ActionKind::info).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Disk & Temp Cleanup
// ═══════════════════════════════════════════════════════════════════════════════

/// Delete every entry under `path`. Returns (removed, could not remove).
/// A missing directory counts as nothing to do.
fn clean_directory(path: &Path) -> (u32, u32) {
    let mut removed = 0u32;
    let mut failed = 0u32;

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            if path.exists() {
                log::warn!("Cannot list {}: {}", path.display(), e);
                failed += 1;
            }
            return (removed, failed);
        }
    };

    for entry in entries.flatten() {
        let result = match entry.file_type() {
            Ok(ft) if ft.is_dir() => std::fs::remove_dir_all(entry.path()),
            Ok(_) => std::fs::remove_file(entry.path()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => {
                log::debug!("Could not remove {}: {}", entry.path().display(), e);
                failed += 1;
            }
        }
    }

    (removed, failed)
}

fn clean_temp_files(env: &ActionEnv) -> Outcome {
    let (mut removed, mut failed) = (0u32, 0u32);
    for dir in &env.temp_dirs {
        let (r, f) = clean_directory(dir);
        removed += r;
        failed += f;
    }
    Outcome::success(format!(
        "Temp files cleaned. Removed {} item(s); could not remove {} locked file(s).",
        removed, failed
    ))
}

/// Stop the update service, wipe and recreate its cache, start it again.
/// The restart is attempted no matter which step failed.
fn clear_update_cache(env: &ActionEnv) -> Outcome {
    let service = env.update_service.as_str();
    let runner = env.runner.as_ref();

    let cleared = services::stop_service(runner, service)
        .map_err(|e| e.to_string())
        .and_then(|_| reset_directory(&env.update_cache_dir).map_err(|e| e.to_string()));

    let restarted = services::start_service(runner, service);
    if let Err(e) = &restarted {
        log::warn!("Could not restart {}: {}", service, e);
    }

    match (cleared, restarted) {
        (Ok(()), Ok(_)) => Outcome::success("Windows Update cache cleared successfully."),
        (Err(e), _) => Outcome::failure(format!("Failed to clear Update cache: {}", e)),
        (Ok(()), Err(e)) => Outcome::failure(format!(
            "Update cache cleared but {} did not restart: {}",
            service, e
        )),
    }
}

fn reset_directory(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let (_, failed) = clean_directory(dir);
    if failed > 0 {
        log::warn!("{} item(s) left behind in {}", failed, dir.display());
    }
    std::fs::create_dir_all(dir)
}

const RECYCLE_BIN_COUNT: &str = "(New-Object -ComObject Shell.Application).NameSpace(10).Items().Count";
const RECYCLE_BIN_CLEAR: &str = "Clear-RecycleBin -Force -ErrorAction Stop";

fn empty_recycle_bin(env: &ActionEnv) -> Outcome {
    let runner = env.runner.as_ref();
    let count = match runner::powershell(runner, RECYCLE_BIN_COUNT) {
        Ok(out) => out.parse::<u64>().map_err(|_| format!("unexpected item count '{}'", out)),
        Err(e) => Err(e.to_string()),
    };

    match count {
        Ok(0) => Outcome::skipped("Recycle Bin is already empty."),
        Ok(_) => match runner::powershell(runner, RECYCLE_BIN_CLEAR) {
            Ok(_) => Outcome::success("Recycle Bin emptied successfully."),
            Err(e) => Outcome::failure(format!("Failed to empty Recycle Bin: {}", e)),
        },
        Err(e) => Outcome::failure(format!("Failed to empty Recycle Bin: {}", e)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Power
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerPlan {
    pub guid: String,
    pub name: String,
    pub active: bool,
}

impl PowerPlan {
    /// Higher is faster; 0 means not a performance plan.
    fn performance_rank(&self) -> u8 {
        let name = self.name.to_lowercase();
        if name.contains("ultimate performance") {
            2
        } else if name.contains("high performance") {
            1
        } else {
            0
        }
    }
}

/// Parse `powercfg /l` lines like
/// `Power Scheme GUID: 8c5e7fda-e8bf-4a96-9a85-a6e23a8c635c  (High performance) *`
pub fn parse_power_plans(stdout: &str) -> Vec<PowerPlan> {
    stdout
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once("GUID:")?;
            let rest = rest.trim();
            let guid = rest.split_whitespace().next()?.to_string();
            let name = rest
                .split_once('(')
                .and_then(|(_, tail)| tail.rsplit_once(')'))
                .map(|(name, _)| name.trim().to_string())
                .unwrap_or_default();
            Some(PowerPlan {
                guid,
                name,
                active: rest.ends_with('*'),
            })
        })
        .collect()
}

/// The fastest performance plan in `plans`, if there is one.
pub fn best_performance_plan(plans: &[PowerPlan]) -> Option<&PowerPlan> {
    plans
        .iter()
        .filter(|p| p.performance_rank() > 0)
        .max_by_key(|p| p.performance_rank())
}

fn set_high_performance_power(env: &ActionEnv) -> Outcome {
    let runner = env.runner.as_ref();
    let listing = match runner.check("powercfg", &["/l"]) {
        Ok(o) => o.stdout,
        Err(e) => return Outcome::failure(format!("Failed to set power plan: {}", e)),
    };

    let plans = parse_power_plans(&listing);
    let Some(plan) = best_performance_plan(&plans) else {
        return Outcome::skipped("High Performance plan not found.");
    };

    match runner.check("powercfg", &["/s", plan.guid.as_str()]) {
        Ok(_) => Outcome::success(format!("Power plan set to {}.", plan.name)),
        Err(e) => Outcome::failure(format!("Failed to set power plan: {}", e)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Visual Tweaks (Registry)
// ═══════════════════════════════════════════════════════════════════════════════

fn adjust_visual_effects(env: &ActionEnv) -> Outcome {
    match registry::apply(env.store.as_ref(), Setting::VisualEffects, VISUAL_FX_BEST_PERFORMANCE) {
        Ok(()) => Outcome::success("Visual effects adjusted for performance."),
        Err(e) => Outcome::failure(format!("Failed to adjust visual effects: {}", e)),
    }
}

fn disable_background_apps(env: &ActionEnv) -> Outcome {
    match registry::apply(env.store.as_ref(), Setting::BackgroundApps, 1) {
        Ok(()) => Outcome::success("Background apps setting disabled."),
        Err(e) => Outcome::failure(format!("Failed to disable background apps: {}", e)),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

fn run_cmd(env: &ActionEnv, cmd: &str, args: &[&str], done: &str, failed: &str) -> Outcome {
    match env.runner.check(cmd, args) {
        Ok(_) => Outcome::success(done),
        Err(e) => Outcome::failure(format!("{}: {}", failed, e)),
    }
}

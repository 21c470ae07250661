//! System Optimizer — runs a user-selected batch of Windows maintenance actions
//! on a background worker and keeps an undo point for the settings it changes.

pub mod actions;
pub mod backup;
pub mod config;
pub mod error;
pub mod monitor;
pub mod optimizer;
pub mod registry;
pub mod runner;
pub mod services;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use actions::{ActionKind, Outcome, ProgressSink};
pub use backup::{BackupRecord, SettingsGuard};
pub use config::Config;
pub use monitor::{SnapshotSource, StaticInventory, SysinfoMonitor, SystemSnapshot};
pub use optimizer::{OptimizationSelection, Optimizer, RunEvent, RunHandle, RunResult};

// ═══════════════════════════════════════════════════════════════════════════════
// Helper — run blocking code on a background thread (keeps the caller responsive)
// ═══════════════════════════════════════════════════════════════════════════════

/// Wraps a blocking closure in tokio's spawn_blocking.
pub async fn bg<T: Send + 'static>(
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<T, tokio::task::JoinError> {
    tokio::task::spawn_blocking(f).await
}

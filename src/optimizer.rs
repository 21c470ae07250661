//! Optimization engine — runs a selection of actions as one background unit of work.
//!
//! A run backs up the guarded settings, takes a before-snapshot, executes every
//! selected action in registry order, takes an after-snapshot and hands back a
//! [`RunResult`]. A failing action is recorded and the run moves on.

use crate::actions::{ActionEnv, ActionKind, Outcome, ProgressSink};
use crate::backup::SettingsGuard;
use crate::config::Config;
use crate::error::{RunError, SelectionError};
use crate::monitor::{SnapshotSource, SysinfoMonitor, SystemSnapshot};
use crate::registry::RegStore;
use crate::runner::{CommandRunner, SystemRunner};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

// ═══════════════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════════════

/// A non-empty set of actions, kept in registry order without duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationSelection {
    actions: Vec<ActionKind>,
}

impl OptimizationSelection {
    pub fn new(actions: impl IntoIterator<Item = ActionKind>) -> Result<Self, SelectionError> {
        let mut actions: Vec<ActionKind> = actions.into_iter().collect();
        actions.sort();
        actions.dedup();
        if actions.is_empty() {
            return Err(SelectionError::Empty);
        }
        Ok(Self { actions })
    }

    /// Resolve user-facing names (or ids).
    pub fn from_names<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Result<Self, SelectionError> {
        let actions = names
            .into_iter()
            .map(|n| {
                ActionKind::from_name(n.as_ref())
                    .ok_or_else(|| SelectionError::UnknownAction(n.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(actions)
    }

    pub fn all() -> Self {
        Self {
            actions: ActionKind::ALL.to_vec(),
        }
    }

    pub fn actions(&self) -> &[ActionKind] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Always false; kept for the usual `len`/`is_empty` pairing.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn contains(&self, action: ActionKind) -> bool {
        self.actions.contains(&action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: ActionKind,
    pub name: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// Everything one run produced. Outcomes are in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub before: SystemSnapshot,
    pub after: SystemSnapshot,
    pub outcomes: Vec<ActionReport>,
    /// Whether an undo point was written before the actions ran.
    pub backup_saved: bool,
    pub total_duration_ms: u64,
}

impl RunResult {
    pub fn outcome(&self, action: ActionKind) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|r| r.action == action)
            .map(|r| &r.outcome)
    }

    pub fn actions(&self) -> Vec<ActionKind> {
        self.outcomes.iter().map(|r| r.action).collect()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|r| r.outcome.is_failure()).count()
    }

    /// Plain-text report for the user.
    pub fn render(&self) -> String {
        let mut report = String::from("--- Optimization Report ---\n\n");
        report.push_str("Resource Usage (Before -> After):\n");
        report.push_str(&format!(
            "  - CPU Usage: {:.1}% -> {:.1}%\n",
            self.before.cpu_usage_percent, self.after.cpu_usage_percent
        ));
        report.push_str(&format!(
            "  - RAM Usage: {:.1}% -> {:.1}%\n",
            self.before.ram_usage_percent, self.after.ram_usage_percent
        ));
        report.push_str(&format!(
            "  - Disk Usage: {:.1}% -> {:.1}%\n\n",
            self.before.disk_usage_percent, self.after.disk_usage_percent
        ));
        report.push_str("Actions Taken:\n");
        for r in &self.outcomes {
            report.push_str(&format!("  - {}: {}\n", r.name, r.outcome));
        }
        if !self.backup_saved {
            report.push_str("\nWarning: settings could not be backed up before this run.\n");
        }
        report
    }
}

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    BackingUp,
    Running(usize),
    Finalizing,
    Complete,
}

/// Messages from the worker to whoever started the run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Progress(String),
    Complete(RunResult),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Optimizer
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Optimizer {
    guard: SettingsGuard,
    env: ActionEnv,
    monitor: Arc<dyn SnapshotSource>,
    settle_delay: Duration,
}

impl Optimizer {
    pub fn new(guard: SettingsGuard, env: ActionEnv, monitor: Arc<dyn SnapshotSource>) -> Self {
        Self {
            guard,
            env,
            monitor,
            settle_delay: Duration::ZERO,
        }
    }

    /// Pause between the last action and the after-snapshot.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Wired to the real machine: `reg.exe`, `net`, `powercfg`, sysinfo.
    pub fn from_config(config: &Config) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let store = Arc::new(RegStore::new(runner.clone()));
        let guard = SettingsGuard::new(store.clone(), config.backup_file.clone());
        let env = ActionEnv::from_config(config, runner.clone(), store);
        let monitor = Arc::new(SysinfoMonitor::new(config.system_volume.clone(), runner));
        Self::new(guard, env, monitor).with_settle_delay(config.settle_delay())
    }

    pub fn guard(&self) -> &SettingsGuard {
        &self.guard
    }

    /// Run the whole selection on the calling thread.
    pub fn execute(&self, selection: &OptimizationSelection, sink: &mut dyn ProgressSink) -> RunResult {
        let started = Instant::now();
        let mut phase = RunPhase::Idle;
        log::info!("Starting optimization run: {} action(s)", selection.len());

        enter(&mut phase, RunPhase::BackingUp);
        let backup_saved = guarded("Settings backup", || self.guard.backup()).unwrap_or(false);
        if !backup_saved {
            log::warn!("Continuing without a settings backup");
        }
        let before = self.snapshot();

        let mut outcomes = Vec::with_capacity(selection.len());
        for (i, &action) in selection.actions().iter().enumerate() {
            enter(&mut phase, RunPhase::Running(i));
            let item_start = Instant::now();
            let outcome = self.run_action(action, sink);
            match &outcome {
                Outcome::Failure(msg) => log::warn!("{}: {}", action, msg),
                other => log::info!("{}: {}", action, other),
            }
            outcomes.push(ActionReport {
                action,
                name: action.name().to_string(),
                outcome,
                duration_ms: item_start.elapsed().as_millis() as u64,
            });
        }

        enter(&mut phase, RunPhase::Finalizing);
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
        let after = self.snapshot();

        let result = RunResult {
            before,
            after,
            outcomes,
            backup_saved,
            total_duration_ms: started.elapsed().as_millis() as u64,
        };
        enter(&mut phase, RunPhase::Complete);
        log::info!(
            "Optimization run finished: {} action(s), {} failed",
            result.outcomes.len(),
            result.failed()
        );
        result
    }

    /// Actions report their own failures; a panic is the one thing that could
    /// still escape, so it is turned into a failure outcome here.
    fn run_action(&self, action: ActionKind, sink: &mut dyn ProgressSink) -> Outcome {
        guarded(action.name(), || action.execute(&self.env, sink)).unwrap_or_else(|detail| {
            Outcome::failure(format!("{} aborted unexpectedly: {}", action.name(), detail))
        })
    }

    /// An unreadable snapshot is reported as all zeros.
    fn snapshot(&self) -> SystemSnapshot {
        guarded("Usage snapshot", || self.monitor.live_usage()).unwrap_or_default()
    }

    /// Hand the run to a blocking worker. Must be called inside a tokio runtime.
    pub fn spawn(self: Arc<Self>, selection: OptimizationSelection) -> RunHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || {
            let mut sink = ChannelSink(tx.clone());
            let result = self.execute(&selection, &mut sink);
            if tx.send(RunEvent::Complete(result)).is_err() {
                log::debug!("Run finished after its receiver was dropped");
            }
        });
        RunHandle { events: rx, worker }
    }

    /// Callback form of [`spawn`](Self::spawn). Callbacks run on a runtime task,
    /// never on the blocking worker. The task ends with an error if the worker
    /// dies before delivering a result, in which case `on_complete` is not called.
    pub fn run<P, C>(
        self: Arc<Self>,
        selection: OptimizationSelection,
        on_progress: P,
        on_complete: C,
    ) -> JoinHandle<Result<(), RunError>>
    where
        P: FnMut(String) + Send + 'static,
        C: FnOnce(RunResult) + Send + 'static,
    {
        let handle = self.spawn(selection);
        tokio::spawn(forward(handle, on_progress, on_complete))
    }
}

async fn forward<P, C>(mut handle: RunHandle, mut on_progress: P, on_complete: C) -> Result<(), RunError>
where
    P: FnMut(String),
    C: FnOnce(RunResult),
{
    while let Some(event) = handle.events.recv().await {
        match event {
            RunEvent::Progress(msg) => on_progress(msg),
            RunEvent::Complete(result) => {
                on_complete(result);
                return Ok(());
            }
        }
    }
    Err(handle.worker_error().await)
}

/// Run `f`, turning a panic into its message.
fn guarded<T>(what: &str, f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        log::error!("{} panicked: {}", what, detail);
        detail
    })
}

fn enter(phase: &mut RunPhase, next: RunPhase) {
    log::debug!("Run phase {:?} -> {:?}", phase, next);
    *phase = next;
}

struct ChannelSink(mpsc::UnboundedSender<RunEvent>);

impl ProgressSink for ChannelSink {
    fn progress(&mut self, message: &str) {
        // a dropped receiver does not stop the run
        let _ = self.0.send(RunEvent::Progress(message.to_string()));
    }
}

/// The caller's end of a background run.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    worker: JoinHandle<()>,
}

impl RunHandle {
    /// Next progress line or the final result; `None` once the run is over.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll for UI loops that drain the queue on a timer.
    /// `Disconnected` means the run is over: after `Complete`, or because the
    /// worker died.
    pub fn try_next_event(&mut self) -> Result<RunEvent, TryRecvError> {
        self.events.try_recv()
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Skip progress and wait for the result.
    pub async fn wait(mut self) -> Result<RunResult, RunError> {
        while let Some(event) = self.events.recv().await {
            if let RunEvent::Complete(result) = event {
                return Ok(result);
            }
        }
        Err(self.worker_error().await)
    }

    /// Why the queue closed without a result.
    async fn worker_error(self) -> RunError {
        let err = match self.worker.await {
            Err(e) => RunError::Worker(e),
            Ok(()) => RunError::NoResult,
        };
        log::error!("{}", err);
        err
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex};
use sysopt::actions::ActionEnv;
use sysopt::error::StoreError;
use sysopt::monitor::SnapshotSource;
use sysopt::registry::{Setting, SettingsStore, VISUAL_FX_BEST_PERFORMANCE};
use sysopt::testing::{FakeResponse, FakeRunner, FakeStore, ScriptedMonitor};
use sysopt::{ActionKind, OptimizationSelection, Optimizer, Outcome, RunEvent, SettingsGuard, SystemSnapshot};

struct Rig {
    optimizer: Arc<Optimizer>,
    runner: Arc<FakeRunner>,
    store: Arc<FakeStore>,
    _dir: tempfile::TempDir,
}

fn snapshot(cpu: f64) -> SystemSnapshot {
    SystemSnapshot {
        cpu_usage_percent: cpu,
        ram_usage_percent: 50.0,
        disk_usage_percent: 60.0,
    }
}

fn rig(runner: FakeRunner, store: FakeStore) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(runner);
    let store = Arc::new(store);
    let env = ActionEnv {
        runner: runner.clone(),
        store: store.clone(),
        temp_dirs: vec![dir.path().join("temp")],
        update_cache_dir: dir.path().join("SoftwareDistribution"),
        update_service: "wuauserv".into(),
        system_volume: "C:".into(),
    };
    let guard = SettingsGuard::new(store.clone(), dir.path().join("backup.json"));
    let monitor = Arc::new(ScriptedMonitor::new([snapshot(80.0), snapshot(20.0)]));
    Rig {
        optimizer: Arc::new(Optimizer::new(guard, env, monitor)),
        runner,
        store,
        _dir: dir,
    }
}

fn backup_path(rig: &Rig) -> &Path {
    rig.optimizer.guard().path()
}

#[tokio::test]
async fn spawned_run_streams_progress_then_result() {
    let rig = rig(FakeRunner::new(), FakeStore::new());
    let selection = OptimizationSelection::new([ActionKind::OptimizeDisk, ActionKind::FlushDns]).unwrap();

    let mut handle = rig.optimizer.clone().spawn(selection);
    let mut progress = Vec::new();
    let mut result = None;
    while let Some(event) = handle.next_event().await {
        match event {
            RunEvent::Progress(msg) => {
                assert!(result.is_none(), "progress after completion");
                progress.push(msg);
            }
            RunEvent::Complete(r) => result = Some(r),
        }
    }

    let result = result.expect("run completed");
    assert_eq!(
        progress,
        vec!["Clearing DNS cache...", "Optimizing system disk (Defrag/TRIM)..."]
    );
    assert_eq!(result.actions(), vec![ActionKind::FlushDns, ActionKind::OptimizeDisk]);
    assert_eq!(result.before, snapshot(80.0));
    assert_eq!(result.after, snapshot(20.0));
    assert_eq!(
        rig.runner.calls(),
        vec!["ipconfig /flushdns".to_string(), "defrag C: /O".to_string()]
    );
}

#[tokio::test]
async fn callback_run_delivers_every_message_and_the_result() {
    let rig = rig(
        FakeRunner::new().respond("Items().Count", FakeResponse::ok("0")),
        FakeStore::new(),
    );
    let selection = OptimizationSelection::from_names(["Empty Recycle Bin"]).unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let finished = Arc::new(Mutex::new(None));
    let (p, f) = (progress.clone(), finished.clone());
    rig.optimizer
        .clone()
        .run(
            selection,
            move |msg| p.lock().unwrap().push(msg),
            move |result| *f.lock().unwrap() = Some(result),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(*progress.lock().unwrap(), vec!["Emptying Recycle Bin...".to_string()]);
    let result = finished.lock().unwrap().take().expect("completion callback ran");
    assert_eq!(
        result.outcome(ActionKind::EmptyRecycleBin),
        Some(&Outcome::skipped("Recycle Bin is already empty."))
    );
}

#[tokio::test]
async fn every_action_runs_even_when_all_commands_fail() {
    let rig = rig(
        FakeRunner::new().otherwise(FakeResponse::fail("Access is denied.")),
        FakeStore::new().reject_writes(),
    );
    let result = rig.optimizer.clone().spawn(OptimizationSelection::all()).wait().await.unwrap();

    assert_eq!(result.actions(), ActionKind::ALL.to_vec());
    // temp cleanup of a missing folder still succeeds; everything else fails
    assert_eq!(result.failed(), ActionKind::ALL.len() - 1);
    assert!(rig.runner.was_called("net start wuauserv"));
    assert!(rig.runner.was_called("powercfg /l"));
}

#[tokio::test]
async fn panicking_action_is_recorded_and_the_run_continues() {
    let rig = rig(
        FakeRunner::new().respond("ipconfig", FakeResponse::Panic),
        FakeStore::new(),
    );
    let selection = OptimizationSelection::new([
        ActionKind::FlushDns,
        ActionKind::OptimizeDisk,
        ActionKind::VisualEffects,
    ])
    .unwrap();
    let result = rig.optimizer.clone().spawn(selection).wait().await.unwrap();

    let dns = result.outcome(ActionKind::FlushDns).unwrap();
    assert!(dns.is_failure());
    assert!(dns.message().contains("aborted unexpectedly"));
    assert!(!result.outcome(ActionKind::OptimizeDisk).unwrap().is_failure());
    assert!(!result.outcome(ActionKind::VisualEffects).unwrap().is_failure());
}

#[tokio::test]
async fn update_cache_stop_failure_records_failure_and_restarts_service() {
    let rig = rig(
        FakeRunner::new().respond("net stop", FakeResponse::fail("System error 5 has occurred.")),
        FakeStore::new(),
    );
    let selection = OptimizationSelection::from_names(["Clear Windows Update Cache"]).unwrap();
    let result = rig.optimizer.clone().spawn(selection).wait().await.unwrap();

    let outcome = result.outcome(ActionKind::ClearUpdateCache).unwrap();
    assert!(outcome.is_failure());
    assert!(outcome.message().contains("System error 5"));
    assert!(rig.runner.was_called("net start wuauserv"));
}

#[tokio::test]
async fn sequential_runs_do_not_share_outcomes() {
    let rig = rig(FakeRunner::new(), FakeStore::new());

    let first = rig
        .optimizer
        .clone()
        .spawn(OptimizationSelection::new([ActionKind::FlushDns]).unwrap())
        .wait()
        .await
        .unwrap();
    let second = rig
        .optimizer
        .clone()
        .spawn(OptimizationSelection::new([ActionKind::DisableBackgroundApps]).unwrap())
        .wait()
        .await
        .unwrap();

    assert_eq!(first.actions(), vec![ActionKind::FlushDns]);
    assert_eq!(second.actions(), vec![ActionKind::DisableBackgroundApps]);
    assert!(second.outcome(ActionKind::FlushDns).is_none());
}

#[tokio::test]
async fn run_backs_up_before_changing_visual_effects_and_restore_undoes_it() {
    let rig = rig(FakeRunner::new(), FakeStore::new().with_value(Setting::VisualEffects, 3));
    let selection = OptimizationSelection::new([ActionKind::VisualEffects]).unwrap();
    let result = rig.optimizer.clone().spawn(selection).wait().await.unwrap();

    assert!(result.backup_saved);
    assert_eq!(rig.store.value(Setting::VisualEffects), Some(VISUAL_FX_BEST_PERFORMANCE));
    let saved = std::fs::read_to_string(backup_path(&rig)).unwrap();
    assert!(saved.contains("\"VisualEffects\": 3"));

    assert!(rig.optimizer.guard().restore());
    assert_eq!(rig.store.value(Setting::VisualEffects), Some(3));
}

#[tokio::test]
async fn failed_backup_does_not_block_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let store = Arc::new(FakeStore::new());
    let env = ActionEnv {
        runner: runner.clone(),
        store: store.clone(),
        temp_dirs: Vec::new(),
        update_cache_dir: dir.path().join("cache"),
        update_service: "wuauserv".into(),
        system_volume: "C:".into(),
    };
    // a directory where the backup file should be
    let guard = SettingsGuard::new(store, dir.path());
    let optimizer = Arc::new(Optimizer::new(guard, env, Arc::new(ScriptedMonitor::default())));

    let result = optimizer
        .spawn(OptimizationSelection::new([ActionKind::FlushDns]).unwrap())
        .wait()
        .await
        .unwrap();
    assert!(!result.backup_saved);
    assert!(!result.outcome(ActionKind::FlushDns).unwrap().is_failure());
    assert!(result.render().contains("Warning: settings could not be backed up"));
}

/// Registry that blows up on every call.
struct ExplodingStore;

impl SettingsStore for ExplodingStore {
    fn read_dword(&self, setting: Setting) -> Result<u32, StoreError> {
        panic!("registry handle for {} is gone", setting)
    }

    fn write_dword(&self, setting: Setting, _value: u32) -> Result<(), StoreError> {
        panic!("registry handle for {} is gone", setting)
    }

    fn broadcast_change(&self, _setting: Setting) -> Result<(), StoreError> {
        Ok(())
    }
}

struct ExplodingMonitor;

impl SnapshotSource for ExplodingMonitor {
    fn live_usage(&self) -> SystemSnapshot {
        panic!("performance counters unavailable")
    }
}

fn exploding_rig(dir: &Path, monitor: Arc<dyn SnapshotSource>) -> (Arc<Optimizer>, Arc<FakeRunner>) {
    let runner = Arc::new(FakeRunner::new());
    let store: Arc<dyn SettingsStore> = Arc::new(ExplodingStore);
    let env = ActionEnv {
        runner: runner.clone(),
        store: store.clone(),
        temp_dirs: Vec::new(),
        update_cache_dir: dir.join("cache"),
        update_service: "wuauserv".into(),
        system_volume: "C:".into(),
    };
    let guard = SettingsGuard::new(store, dir.join("backup.json"));
    (Arc::new(Optimizer::new(guard, env, monitor)), runner)
}

#[tokio::test]
async fn panicking_backup_does_not_lose_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (optimizer, runner) = exploding_rig(dir.path(), Arc::new(ScriptedMonitor::default()));

    let result = optimizer
        .clone()
        .spawn(OptimizationSelection::new([ActionKind::FlushDns]).unwrap())
        .wait()
        .await
        .unwrap();
    assert!(!result.backup_saved);
    assert!(runner.was_called("ipconfig /flushdns"));
    assert!(!result.outcome(ActionKind::FlushDns).unwrap().is_failure());

    let finished = Arc::new(Mutex::new(None));
    let f = finished.clone();
    optimizer
        .run(
            OptimizationSelection::new([ActionKind::VisualEffects]).unwrap(),
            |_| {},
            move |result| *f.lock().unwrap() = Some(result),
        )
        .await
        .unwrap()
        .unwrap();
    let result = finished.lock().unwrap().take().expect("completion callback ran");
    assert!(!result.backup_saved);
    assert!(result.outcome(ActionKind::VisualEffects).unwrap().is_failure());
}

#[tokio::test]
async fn panicking_monitor_reports_zero_usage_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let (optimizer, runner) = exploding_rig(dir.path(), Arc::new(ExplodingMonitor));

    let result = optimizer
        .spawn(OptimizationSelection::new([ActionKind::OptimizeDisk]).unwrap())
        .wait()
        .await
        .unwrap();
    assert_eq!(result.before, SystemSnapshot::default());
    assert_eq!(result.after, SystemSnapshot::default());
    assert!(runner.was_called("defrag C: /O"));
}

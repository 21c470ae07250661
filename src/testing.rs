//! In-memory stand-ins for the OS boundaries, used by the unit and integration tests.

use crate::error::{CommandError, StoreError};
use crate::monitor::{SnapshotSource, SystemSnapshot};
use crate::registry::{Setting, SettingsStore};
use crate::runner::{CommandOutput, CommandRunner};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Exit 0 with this stdout.
    Ok(String),
    /// Exit 1 with this stderr.
    Fail(String),
    /// The program could not be launched.
    Missing,
    /// The runner itself panics.
    Panic,
}

impl FakeResponse {
    pub fn ok(stdout: &str) -> Self {
        FakeResponse::Ok(stdout.to_string())
    }

    pub fn fail(stderr: &str) -> Self {
        FakeResponse::Fail(stderr.to_string())
    }
}

/// Records every command line and answers with the first rule whose pattern is
/// contained in it. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeRunner {
    rules: Vec<(String, FakeResponse)>,
    fallback: Option<FakeResponse>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pattern: &str, response: FakeResponse) -> Self {
        self.rules.push((pattern.to_string(), response));
        self
    }

    /// Response for commands that match no rule.
    pub fn otherwise(mut self, response: FakeResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn was_called(&self, pattern: &str) -> bool {
        lock(&self.calls).iter().any(|c| c.contains(pattern))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        lock(&self.calls).push(line.clone());

        let response = self
            .rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, r)| r.clone())
            .or_else(|| self.fallback.clone())
            .unwrap_or(FakeResponse::Ok(String::new()));

        match response {
            FakeResponse::Ok(stdout) => Ok(CommandOutput {
                success: true,
                code: Some(0),
                stdout,
                stderr: String::new(),
            }),
            FakeResponse::Fail(stderr) => Ok(CommandOutput {
                success: false,
                code: Some(1),
                stdout: String::new(),
                stderr,
            }),
            FakeResponse::Missing => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", program),
            )),
            FakeResponse::Panic => panic!("fake runner asked to panic on `{}`", line),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct FakeStore {
    values: Mutex<HashMap<Setting, u32>>,
    broken_reads: Mutex<HashSet<Setting>>,
    reject_writes: bool,
    writes: Mutex<Vec<(Setting, u32)>>,
    broadcasts: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, setting: Setting, value: u32) -> Self {
        lock(&self.values).insert(setting, value);
        self
    }

    /// Reads of `setting` fail with something other than "not found".
    pub fn break_reads_of(self, setting: Setting) -> Self {
        lock(&self.broken_reads).insert(setting);
        self
    }

    pub fn reject_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    pub fn value(&self, setting: Setting) -> Option<u32> {
        lock(&self.values).get(&setting).copied()
    }

    pub fn set(&self, setting: Setting, value: u32) {
        lock(&self.values).insert(setting, value);
    }

    pub fn writes(&self) -> Vec<(Setting, u32)> {
        lock(&self.writes).clone()
    }

    pub fn broadcasts(&self) -> usize {
        self.broadcasts.load(Ordering::SeqCst)
    }
}

impl SettingsStore for FakeStore {
    fn read_dword(&self, setting: Setting) -> Result<u32, StoreError> {
        if lock(&self.broken_reads).contains(&setting) {
            return Err(CommandError::Failed {
                program: "reg".into(),
                detail: format!("access denied reading {}", setting),
            }
            .into());
        }
        self.value(setting)
            .ok_or_else(|| StoreError::NotFound(setting.value_name().to_string()))
    }

    fn write_dword(&self, setting: Setting, value: u32) -> Result<(), StoreError> {
        if self.reject_writes {
            return Err(CommandError::Failed {
                program: "reg".into(),
                detail: format!("write to {} rejected", setting),
            }
            .into());
        }
        lock(&self.writes).push((setting, value));
        self.set(setting, value);
        Ok(())
    }

    fn broadcast_change(&self, _setting: Setting) -> Result<(), StoreError> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Snapshots
// ═══════════════════════════════════════════════════════════════════════════════

/// Hands out queued readings in order, then repeats the last one.
#[derive(Debug, Default)]
pub struct ScriptedMonitor {
    readings: Mutex<VecDeque<SystemSnapshot>>,
    last: Mutex<SystemSnapshot>,
    reads: AtomicUsize,
}

impl ScriptedMonitor {
    pub fn new(readings: impl IntoIterator<Item = SystemSnapshot>) -> Self {
        Self {
            readings: Mutex::new(readings.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SnapshotSource for ScriptedMonitor {
    fn live_usage(&self) -> SystemSnapshot {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut last = lock(&self.last);
        if let Some(next) = lock(&self.readings).pop_front() {
            *last = next;
        }
        *last
    }
}

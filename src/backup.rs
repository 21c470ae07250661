//! Settings Guard — snapshot of the registry values the optimizer overwrites,
//! kept in one JSON file so a run can be undone.
//!
//! Only the most recent backup exists; every run replaces it.

use crate::error::{GuardError, StoreError};
use crate::registry::{self, Setting, SettingsStore};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Settings the guard backs up and restores.
pub const BACKED_UP_SETTINGS: &[Setting] = &[Setting::VisualEffects];

/// Raw values as read from the registry, keyed by setting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupRecord {
    values: BTreeMap<Setting, u32>,
}

impl BackupRecord {
    pub fn get(&self, setting: Setting) -> Option<u32> {
        self.values.get(&setting).copied()
    }

    pub fn insert(&mut self, setting: Setting, value: u32) {
        self.values.insert(setting, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Setting, u32)> + '_ {
        self.values.iter().map(|(s, v)| (*s, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `{"VisualEffects": 2}`
    pub fn to_json(&self) -> Result<String, GuardError> {
        let map: BTreeMap<&str, u32> = self.values.iter().map(|(s, v)| (s.id(), *v)).collect();
        Ok(serde_json::to_string_pretty(&map)?)
    }

    /// Unknown identifiers are ignored. A known identifier whose value is not a
    /// 32-bit unsigned integer makes the whole file invalid.
    pub fn from_json(content: &str) -> Result<Self, GuardError> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;
        let mut record = BackupRecord::default();
        for (id, value) in raw {
            let Some(setting) = Setting::from_id(&id).filter(|s| BACKED_UP_SETTINGS.contains(s))
            else {
                log::debug!("Ignoring unknown backup entry '{}'", id);
                continue;
            };
            let value = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| GuardError::Format(format!("{} has invalid value {}", id, value)))?;
            record.insert(setting, value);
        }
        Ok(record)
    }
}

pub struct SettingsGuard {
    store: Arc<dyn SettingsStore>,
    path: PathBuf,
}

impl SettingsGuard {
    pub fn new(store: Arc<dyn SettingsStore>, path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current values of every guarded setting. A missing value falls back to
    /// its documented default; any other read error drops that setting.
    pub fn read_current(&self) -> BackupRecord {
        let mut record = BackupRecord::default();
        for &setting in BACKED_UP_SETTINGS {
            match self.store.read_dword(setting) {
                Ok(value) => record.insert(setting, value),
                Err(StoreError::NotFound(_)) => match setting.absent_default() {
                    Some(default) => {
                        log::info!(
                            "{} not found in registry, backing up default {}",
                            setting,
                            default
                        );
                        record.insert(setting, default);
                    }
                    None => log::info!("{} not found in registry, skipping", setting),
                },
                Err(e) => log::warn!("Could not read {} for backup: {}", setting, e),
            }
        }
        record
    }

    /// Read the guarded settings and overwrite the backup file with them.
    pub fn try_backup(&self) -> Result<BackupRecord, GuardError> {
        let record = self.read_current();
        let content = record.to_json()?;
        let io_err = |source| GuardError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&self.path, content).map_err(io_err)?;
        log::info!(
            "Backed up {} setting(s) to {}",
            record.len(),
            self.path.display()
        );
        Ok(record)
    }

    /// `false` only when the backup file could not be written.
    pub fn backup(&self) -> bool {
        match self.try_backup() {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to write backup file: {}", e);
                false
            }
        }
    }

    /// Parse the backup file without touching the registry.
    pub fn load(&self) -> Result<BackupRecord, GuardError> {
        if !self.path.exists() {
            return Err(GuardError::NoBackup(self.path.clone()));
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| GuardError::Io {
            path: self.path.clone(),
            source,
        })?;
        BackupRecord::from_json(&content)
    }

    /// Write every backed-up value back. Nothing is written unless the whole
    /// file parses; the first failed write stops the restore.
    pub fn try_restore(&self) -> Result<usize, GuardError> {
        let record = self.load()?;
        for (setting, value) in record.iter() {
            registry::apply(self.store.as_ref(), setting, value).map_err(|source| {
                GuardError::Store {
                    setting: setting.id(),
                    source,
                }
            })?;
            log::info!("Restored {} = {}", setting, value);
        }
        Ok(record.len())
    }

    pub fn restore(&self) -> bool {
        match self.try_restore() {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Restore failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{VISUAL_FX_BEST_PERFORMANCE, VISUAL_FX_LET_WINDOWS_DECIDE};
    use crate::registry::RegStore;
    use crate::testing::{FakeResponse, FakeRunner, FakeStore};

    fn guard(store: FakeStore) -> (SettingsGuard, Arc<FakeStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store);
        let guard = SettingsGuard::new(store.clone(), dir.path().join("backup.json"));
        (guard, store, dir)
    }

    #[test]
    fn backup_records_current_value() {
        let (guard, _, _dir) = guard(FakeStore::new().with_value(Setting::VisualEffects, 3));
        assert!(guard.backup());
        assert_eq!(guard.load().unwrap().get(Setting::VisualEffects), Some(3));
    }

    #[test]
    fn backup_of_absent_setting_stores_default() {
        let (guard, _, _dir) = guard(FakeStore::new());
        assert!(guard.backup());
        let content = std::fs::read_to_string(guard.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["VisualEffects"], VISUAL_FX_LET_WINDOWS_DECIDE);
    }

    #[test]
    fn unreadable_setting_is_skipped_but_backup_succeeds() {
        let (guard, _, _dir) = guard(FakeStore::new().break_reads_of(Setting::VisualEffects));
        assert!(guard.backup());
        assert!(guard.load().unwrap().is_empty());
    }

    #[test]
    fn localized_registry_failure_is_skipped_not_defaulted() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            FakeRunner::new().respond("reg query", FakeResponse::fail("FEHLER: Zugriff verweigert")),
        );
        let guard = SettingsGuard::new(Arc::new(RegStore::new(runner)), dir.path().join("backup.json"));
        assert!(guard.backup());
        assert!(guard.load().unwrap().is_empty());
    }

    #[test]
    fn backup_overwrites_previous_record() {
        let (guard, store, _dir) = guard(FakeStore::new().with_value(Setting::VisualEffects, 0));
        assert!(guard.backup());
        store.set(Setting::VisualEffects, 3);
        assert!(guard.backup());
        assert_eq!(guard.load().unwrap().get(Setting::VisualEffects), Some(3));
    }

    #[test]
    fn backup_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Roaming").join("backup.json");
        let guard = SettingsGuard::new(Arc::new(FakeStore::new()), &path);
        assert!(guard.backup());
        assert!(path.is_file());
    }

    #[test]
    fn backup_write_failure_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        // the target path is an existing directory
        let guard = SettingsGuard::new(Arc::new(FakeStore::new()), dir.path());
        assert!(!guard.backup());
    }

    #[test]
    fn restore_without_backup_fails_and_writes_nothing() {
        let (guard, store, _dir) = guard(FakeStore::new());
        assert!(!guard.restore());
        assert!(matches!(guard.try_restore(), Err(GuardError::NoBackup(_))));
        assert!(store.writes().is_empty());
        assert_eq!(store.broadcasts(), 0);
    }

    #[test]
    fn restore_of_corrupt_file_fails_and_writes_nothing() {
        let (guard, store, _dir) = guard(FakeStore::new());
        std::fs::write(guard.path(), "{\"VisualEffects\": ").unwrap();
        assert!(!guard.restore());

        std::fs::write(guard.path(), "{\"VisualEffects\": \"fast\"}").unwrap();
        assert!(matches!(guard.try_restore(), Err(GuardError::Format(_))));
        assert!(store.writes().is_empty());
    }

    #[test]
    fn backup_then_restore_round_trips() {
        let (guard, store, _dir) = guard(FakeStore::new().with_value(Setting::VisualEffects, 3));
        assert!(guard.backup());
        store.set(Setting::VisualEffects, VISUAL_FX_BEST_PERFORMANCE);

        assert!(guard.restore());
        assert_eq!(store.value(Setting::VisualEffects), Some(3));
        assert_eq!(store.broadcasts(), 1);
    }

    #[test]
    fn restore_ignores_unknown_and_skips_absent_entries() {
        let (guard, store, _dir) = guard(FakeStore::new());
        std::fs::write(guard.path(), r#"{"Wallpaper": 7, "BackgroundApps": 0}"#).unwrap();
        assert_eq!(guard.try_restore().unwrap(), 0);
        assert!(store.writes().is_empty());
    }

    #[test]
    fn restore_write_failure_returns_false() {
        let (guard, _, _dir) = guard(FakeStore::new().reject_writes());
        std::fs::write(guard.path(), r#"{"VisualEffects": 1}"#).unwrap();
        assert!(!guard.restore());
        assert!(matches!(guard.try_restore(), Err(GuardError::Store { .. })));
    }
}

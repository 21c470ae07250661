//! Registry access — the per-user DWORD settings the optimizer changes.
//! Reads and writes go through `reg.exe`, the change broadcast through winapi.

use crate::error::{CommandError, StoreError};
use crate::runner::{CommandOutput, CommandRunner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// "Let Windows choose what's best for my computer"
pub const VISUAL_FX_LET_WINDOWS_DECIDE: u32 = 1;
/// "Adjust for best performance"
pub const VISUAL_FX_BEST_PERFORMANCE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Setting {
    VisualEffects,
    BackgroundApps,
}

impl Setting {
    /// Identifier used in the backup file.
    pub fn id(self) -> &'static str {
        match self {
            Setting::VisualEffects => "VisualEffects",
            Setting::BackgroundApps => "BackgroundApps",
        }
    }

    pub fn from_id(id: &str) -> Option<Setting> {
        match id {
            "VisualEffects" => Some(Setting::VisualEffects),
            "BackgroundApps" => Some(Setting::BackgroundApps),
            _ => None,
        }
    }

    pub fn key_path(self) -> &'static str {
        match self {
            Setting::VisualEffects => {
                "HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\Explorer\\VisualEffects"
            }
            Setting::BackgroundApps => {
                "HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\BackgroundAccessApplications"
            }
        }
    }

    pub fn value_name(self) -> &'static str {
        match self {
            Setting::VisualEffects => "VisualFxSetting",
            Setting::BackgroundApps => "GlobalUserDisabled",
        }
    }

    /// Value to assume when the setting has never been written.
    pub fn absent_default(self) -> Option<u32> {
        match self {
            Setting::VisualEffects => Some(VISUAL_FX_LET_WINDOWS_DECIDE),
            Setting::BackgroundApps => None,
        }
    }

    /// Whether Explorer must be told about a change for it to take effect without a restart.
    pub fn needs_broadcast(self) -> bool {
        matches!(self, Setting::VisualEffects)
    }
}

impl std::fmt::Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

pub trait SettingsStore: Send + Sync {
    /// `StoreError::NotFound` when the key or value does not exist.
    fn read_dword(&self, setting: Setting) -> Result<u32, StoreError>;
    /// Creates the key if needed.
    fn write_dword(&self, setting: Setting, value: u32) -> Result<(), StoreError>;
    /// System-wide "setting changed" notification.
    fn broadcast_change(&self, setting: Setting) -> Result<(), StoreError>;
}

/// Write `value` and broadcast the change when the setting needs it. A failed
/// broadcast is logged; the value itself is already stored at that point.
pub fn apply(store: &dyn SettingsStore, setting: Setting, value: u32) -> Result<(), StoreError> {
    store.write_dword(setting, value)?;
    if setting.needs_broadcast() {
        if let Err(e) = store.broadcast_change(setting) {
            log::warn!("Could not broadcast {} change: {}", setting, e);
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// reg.exe backend
// ═══════════════════════════════════════════════════════════════════════════════

pub struct RegStore {
    runner: Arc<dyn CommandRunner>,
}

impl RegStore {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn query(&self, args: &[&str]) -> Result<CommandOutput, CommandError> {
        self.runner.run("reg", args).map_err(|source| CommandError::Spawn {
            program: "reg".into(),
            source,
        })
    }

    /// `reg.exe` exits with 1 for every failure and its messages are localized,
    /// so absence is only reported when a listing proves it: the key exists
    /// without the value, or the parent key exists without the key.
    fn value_is_absent(&self, setting: Setting) -> bool {
        let key = setting.key_path();
        match self.query(&["query", key]) {
            Ok(out) if out.success => return !lists_value(&out.stdout, setting.value_name()),
            Ok(_) => {}
            Err(_) => return false,
        }

        let Some((parent, leaf)) = key.rsplit_once('\\') else {
            return false;
        };
        match self.query(&["query", parent]) {
            Ok(out) if out.success => !lists_subkey(&out.stdout, leaf),
            _ => false,
        }
    }
}

impl SettingsStore for RegStore {
    fn read_dword(&self, setting: Setting) -> Result<u32, StoreError> {
        let output = self.query(&["query", setting.key_path(), "/v", setting.value_name()])?;

        if !output.success {
            if self.value_is_absent(setting) {
                return Err(StoreError::NotFound(format!(
                    "{}\\{}",
                    setting.key_path(),
                    setting.value_name()
                )));
            }
            return Err(CommandError::Failed {
                program: "reg".into(),
                detail: output.error_text(),
            }
            .into());
        }

        parse_reg_dword(&output.stdout, setting.value_name()).ok_or_else(|| StoreError::Parse {
            setting: setting.id().to_string(),
            detail: output.stdout.trim().to_string(),
        })
    }

    fn write_dword(&self, setting: Setting, value: u32) -> Result<(), StoreError> {
        let value = value.to_string();
        self.runner.check(
            "reg",
            &[
                "add",
                setting.key_path(),
                "/v",
                setting.value_name(),
                "/t",
                "REG_DWORD",
                "/d",
                &value,
                "/f",
            ],
        )?;
        Ok(())
    }

    fn broadcast_change(&self, setting: Setting) -> Result<(), StoreError> {
        #[cfg(windows)]
        {
            use winapi::um::winuser::SystemParametersInfoW;

            const SPI_SETCURSORS: u32 = 0x0057;
            const SPIF_SENDCHANGE: u32 = 0x0002;

            let ok = unsafe {
                SystemParametersInfoW(SPI_SETCURSORS, 0, std::ptr::null_mut(), SPIF_SENDCHANGE)
            };
            if ok == 0 {
                return Err(StoreError::Broadcast {
                    setting: setting.id().to_string(),
                    detail: "SystemParametersInfoW returned FALSE".into(),
                });
            }
            return Ok(());
        }

        #[cfg(not(windows))]
        {
            let _ = setting;
            Err(StoreError::Unsupported("setting change broadcast"))
        }
    }
}

/// Pull a REG_DWORD out of `reg query` output:
/// `    VisualFxSetting    REG_DWORD    0x2`
pub fn parse_reg_dword(stdout: &str, value_name: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let name = parts.next()?;
        let kind = parts.next()?;
        let raw = parts.next()?;
        if !name.eq_ignore_ascii_case(value_name) || kind != "REG_DWORD" {
            return None;
        }
        let hex = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"));
        match hex {
            Some(h) => u32::from_str_radix(h, 16).ok(),
            None => raw.parse().ok(),
        }
    })
}

/// Whether a key listing has a value line for `value_name`.
fn lists_value(stdout: &str, value_name: &str) -> bool {
    stdout.lines().any(|line| {
        let mut parts = line.split_whitespace();
        matches!(
            (parts.next(), parts.next()),
            (Some(name), Some(kind)) if name.eq_ignore_ascii_case(value_name) && kind.starts_with("REG_")
        )
    })
}

/// Whether a key listing has a subkey line ending in `\leaf`.
fn lists_subkey(stdout: &str, leaf: &str) -> bool {
    stdout
        .lines()
        .filter_map(|line| line.trim().rsplit_once('\\'))
        .any(|(_, last)| last.eq_ignore_ascii_case(leaf))
}

//! Durable mute/unmute duty-cycle state.
//!
//! A single JSON file holds `{current_state, last_toggle_time}`. Loading is
//! lenient — a missing, empty, or corrupt file yields the default state so
//! storage problems can never block a routing decision. Writing happens
//! under an exclusive file lock held for the whole read-check-toggle-write
//! cycle, so two concurrent toggle-eligible requests cannot double-flip the
//! state or interleave partial writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Duty-cycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Mute,
    Unmute,
    Normal,
}

impl CycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleState::Mute => "mute",
            CycleState::Unmute => "unmute",
            CycleState::Normal => "normal",
        }
    }
}

/// Persisted duty-cycle state. `current_state: None` means no toggle has
/// ever been recorded; the selector bootstraps to unmute on first use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuteState {
    pub current_state: Option<CycleState>,
    pub last_toggle_time: Option<DateTime<Utc>>,
}

/// On-disk shape. Fields are validated individually so one bad field does
/// not discard the other.
#[derive(Debug, Serialize, Deserialize)]
struct RawState {
    current_state: Option<String>,
    last_toggle_time: Option<String>,
}

impl MuteState {
    fn from_raw(raw: RawState) -> Self {
        let current_state = raw
            .current_state
            .as_deref()
            .and_then(|s| match s.to_lowercase().as_str() {
                "mute" => Some(CycleState::Mute),
                "unmute" => Some(CycleState::Unmute),
                "normal" => Some(CycleState::Normal),
                _ => None,
            });
        let last_toggle_time = raw
            .last_toggle_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        Self {
            current_state,
            last_toggle_time,
        }
    }

    fn to_raw(&self) -> RawState {
        RawState {
            current_state: self.current_state.map(|s| s.as_str().to_string()),
            last_toggle_time: self.last_toggle_time.map(|t| t.to_rfc3339()),
        }
    }

    fn parse(bytes: &[u8]) -> Self {
        serde_json::from_slice::<RawState>(bytes)
            .map(Self::from_raw)
            .unwrap_or_default()
    }
}

/// File-backed store for [`MuteState`].
#[derive(Debug, Clone)]
pub struct MuteStateStore {
    path: PathBuf,
}

impl MuteStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lockless read for display purposes. Missing/empty/corrupt → default.
    pub fn load(&self) -> MuteState {
        match std::fs::read(&self.path) {
            Ok(bytes) => MuteState::parse(&bytes),
            Err(_) => MuteState::default(),
        }
    }

    /// Open-or-create the state file and acquire an exclusive lock on it.
    ///
    /// The returned guard keeps the lock for its lifetime; the whole
    /// load-check-toggle-save cycle must run against one guard. Acquisition
    /// blocks until the lock is free.
    pub fn lock(&self) -> Result<StoreGuard> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;
        Ok(StoreGuard { file })
    }
}

/// RAII guard over the locked state file. Releases the lock on drop, so
/// every exit path — including error paths — unlocks.
pub struct StoreGuard {
    file: File,
}

impl StoreGuard {
    /// Read the current state through the locked handle.
    pub fn load(&mut self) -> MuteState {
        let mut contents = Vec::new();
        if self.file.seek(SeekFrom::Start(0)).is_err() {
            return MuteState::default();
        }
        if self.file.read_to_end(&mut contents).is_err() {
            return MuteState::default();
        }
        MuteState::parse(&contents)
    }

    /// Truncate and rewrite the full JSON body, then flush.
    pub fn save(&mut self, state: &MuteState) -> Result<()> {
        let body = serde_json::to_vec_pretty(&state.to_raw())
            .map_err(|e| crate::error::Error::Validation(format!("failed to encode state: {e}")))?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.set_len(0)?;
        self.file.write_all(&body)?;
        self.file.flush()?;
        Ok(())
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_in(dir: &tempfile::TempDir) -> MuteStateStore {
        MuteStateStore::new(dir.path().join("mute_state.json"))
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load(), MuteState::default());
    }

    #[test]
    fn test_load_empty_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), b"").unwrap();
        assert_eq!(store.load(), MuteState::default());
    }

    #[test]
    fn test_load_corrupt_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), b"{not json").unwrap();
        assert_eq!(store.load(), MuteState::default());
    }

    #[test]
    fn test_load_unknown_state_string_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            br#"{"current_state": "weird", "last_toggle_time": "2026-01-15T10:00:00+00:00"}"#,
        )
        .unwrap();
        let state = store.load();
        assert_eq!(state.current_state, None);
        // A bad state string must not discard the valid timestamp
        assert!(state.last_toggle_time.is_some());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let state = MuteState {
            current_state: Some(CycleState::Mute),
            last_toggle_time: Some(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()),
        };

        let mut guard = store.lock().unwrap();
        guard.save(&state).unwrap();
        drop(guard);

        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_save_truncates_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        // Seed with a long body, then overwrite with a shorter one
        std::fs::write(store.path(), " ".repeat(4096)).unwrap();
        let state = MuteState {
            current_state: Some(CycleState::Unmute),
            last_toggle_time: Some(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()),
        };
        let mut guard = store.lock().unwrap();
        guard.save(&state).unwrap();
        drop(guard);

        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_concurrent_toggle_persists_exactly_one_flip() {
        use crate::select::{self, DutyCycle, RoutingTarget};

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        // Seed a toggle-eligible state: unmuted since t=1000, window 120s
        let seeded = MuteState {
            current_state: Some(CycleState::Unmute),
            last_toggle_time: Some(Utc.timestamp_opt(1000, 0).unwrap()),
        };
        let mut guard = store.lock().unwrap();
        guard.save(&seeded).unwrap();
        drop(guard);

        let now = Utc.timestamp_opt(1200, 0).unwrap();
        let duty = DutyCycle {
            mute_duration: 120,
            unmute_duration: 120,
        };

        // Every worker sees "due to toggle" at the same instant; only the
        // first to win the lock may actually flip.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let candidates = vec![RoutingTarget {
                        url: "https://a.example".to_string(),
                        weight: 5,
                        priority: 1,
                        active: true,
                    }];
                    let mut guard = store.lock().unwrap();
                    let mut state = guard.load();
                    let selection =
                        select::select_target("mute_unmute", &candidates, &mut state, duty, now);
                    if selection.state_changed {
                        guard.save(&state).unwrap();
                    }
                    selection.state_changed
                })
            })
            .collect();

        let flips = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&changed| changed)
            .count();

        assert_eq!(flips, 1, "exactly one worker may persist the toggle");
        let final_state = store.load();
        assert_eq!(final_state.current_state, Some(CycleState::Mute));
        assert_eq!(final_state.last_toggle_time, Some(now));
    }

    #[test]
    fn test_guard_load_sees_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let state = MuteState {
            current_state: Some(CycleState::Unmute),
            last_toggle_time: Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()),
        };

        let mut guard = store.lock().unwrap();
        assert_eq!(guard.load(), MuteState::default());
        guard.save(&state).unwrap();
        assert_eq!(guard.load(), state);
    }
}

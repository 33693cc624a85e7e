//! User preferences that gate automatic sync.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Automatic sync preferences, as stored by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncPreferences {
    /// Pull once after sign-in.
    pub auto_pull_on_start: bool,
    /// Flush pending changes when the app is hidden or closed.
    pub auto_push_on_exit: bool,
    pub periodic_pull_enabled: bool,
    /// Minutes between periodic pulls.
    pub periodic_pull_interval: u64,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            auto_pull_on_start: true,
            auto_push_on_exit: true,
            periodic_pull_enabled: true,
            periodic_pull_interval: 15,
        }
    }
}

impl SyncPreferences {
    /// Parse preferences from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The periodic pull interval, never shorter than a minute.
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_pull_interval.max(1).saturating_mul(60))
    }
}

/// Where the orchestrator reads preferences from. Read on every decision,
/// so changes apply without restarting.
pub trait PreferenceSource: Send + Sync {
    fn current(&self) -> SyncPreferences;
}

impl PreferenceSource for SyncPreferences {
    fn current(&self) -> SyncPreferences {
        self.clone()
    }
}

/// Mutable in-process preferences.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    prefs: RwLock<SyncPreferences>,
}

impl MemoryPreferences {
    pub fn new(prefs: SyncPreferences) -> Self {
        Self {
            prefs: RwLock::new(prefs),
        }
    }

    pub fn set(&self, prefs: SyncPreferences) {
        *self.prefs.write() = prefs;
    }

    pub fn update(&self, f: impl FnOnce(&mut SyncPreferences)) {
        f(&mut self.prefs.write());
    }
}

impl PreferenceSource for MemoryPreferences {
    fn current(&self) -> SyncPreferences {
        self.prefs.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_camel_case_with_defaults() {
        let prefs = SyncPreferences::from_json(
            r#"{"autoPullOnStart": false, "periodicPullInterval": 5}"#,
        )
        .unwrap();
        assert!(!prefs.auto_pull_on_start);
        assert!(prefs.auto_push_on_exit);
        assert_eq!(prefs.periodic_interval(), Duration::from_secs(300));

        let json = prefs.to_json().unwrap();
        assert!(json.contains("\"periodicPullEnabled\":true"));
    }

    #[test]
    fn test_interval_is_clamped() {
        let zero = SyncPreferences::from_json(r#"{"periodicPullInterval": 0}"#).unwrap();
        assert_eq!(zero.periodic_interval(), Duration::from_secs(60));

        let huge = SyncPreferences::from_json(&format!(r#"{{"periodicPullInterval": {}}}"#, u64::MAX))
            .unwrap();
        assert_eq!(huge.periodic_interval(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_memory_preferences_update() {
        let prefs = MemoryPreferences::new(SyncPreferences::default());
        prefs.update(|p| p.periodic_pull_enabled = false);
        assert!(!prefs.current().periodic_pull_enabled);
    }
}

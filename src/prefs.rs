//! Persisted user preferences.
//!
//! A single JSON document survives process restarts; everything
//! session-scoped (membership, speakers, emergency state) is deliberately
//! absent and reconstructed from the next connection. Unknown keys are
//! carried through a load→save round trip so newer documents are not
//! truncated by older builds.

use crate::constants::clamp_volume;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fs, io, path::Path};
use tracing::warn;

fn default_volume() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

/// The persisted preference document.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Initial listening volume applied to each talkgroup at connect.
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Whether static talkgroups are joined automatically after connect.
    #[serde(default)]
    pub auto_join_static: bool,
    /// Whether emergency transitions publish [`Alert`]s.
    ///
    /// [`Alert`]: crate::events::Alert
    #[serde(default = "default_true")]
    pub emergency_alert_enabled: bool,
    /// Master fader, restored at startup.
    #[serde(default = "default_volume")]
    pub master_volume: f32,
    /// Whether priority ducking is applied, restored at startup.
    #[serde(default = "default_true")]
    pub is_ducking_enabled: bool,
    /// Keys this build does not understand, preserved verbatim.
    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_volume: 1.0,
            auto_join_static: false,
            emergency_alert_enabled: true,
            master_volume: 1.0,
            is_ducking_enabled: true,
            unknown: Map::new(),
        }
    }
}

impl Preferences {
    /// Loads the document, falling back to defaults on a missing or
    /// malformed file. Volumes are clamped on the way in.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let mut prefs = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(prefs) => prefs,
                Err(e) => {
                    warn!("malformed preference document {:?}: {}", path, e);
                    Self::default()
                },
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("could not read preference document {:?}: {}", path, e);
                Self::default()
            },
        };

        prefs.default_volume = clamp_volume(prefs.default_volume);
        prefs.master_volume = clamp_volume(prefs.master_volume);
        prefs
    }

    /// Writes the document, preserving unknown keys. Best-effort: failures
    /// are logged, never fatal.
    pub fn save(&self, path: &Path) {
        let serialised = match serde_json::to_string_pretty(self) {
            Ok(s) => s,
            Err(e) => {
                warn!("could not serialise preferences: {}", e);
                return;
            },
        };

        if let Err(e) = fs::write(path, serialised) {
            warn!("could not write preference document {:?}: {}", path, e);
        }
    }
}

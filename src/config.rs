use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Process-wide configuration, loaded once at startup and passed by value
/// into the subsystems that need it. Every field has a default so a partial
/// (or missing) settings file still yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Root directory for all persisted documents.
    pub data_path: PathBuf,
    /// Discord user IDs allowed to run owner commands.
    #[serde(rename = "ownerIDs")]
    pub owner_ids: Vec<u64>,
    pub debug_printing: bool,
    pub spammy_debug_printing: bool,
    /// When false, fingerprinting always re-fetches instead of consulting
    /// the URL cache document.
    pub hash_caching: bool,
    /// When true, hashing spawns one task per URL instead of the bounded
    /// concurrent stream.
    pub threaded_hashing: bool,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data"),
            owner_ids: Vec::new(),
            debug_printing: true,
            spammy_debug_printing: false,
            hash_caching: true,
            threaded_hashing: false,
            max_concurrent_fetches: 4,
            fetch_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. A missing file yields the defaults;
    /// a malformed file is an error (better to refuse startup than run with
    /// half-applied configuration).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;

        Ok(settings)
    }

    pub fn is_owner(&self, user_id: u64) -> bool {
        self.owner_ids.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"dataPath": "/tmp/x", "hashCaching": false}"#).unwrap();
        assert_eq!(settings.data_path, PathBuf::from("/tmp/x"));
        assert!(!settings.hash_caching);
        assert!(settings.debug_printing);
        assert_eq!(settings.max_concurrent_fetches, 4);
    }

    #[test]
    fn owner_ids_round_trip() {
        let settings: Settings = serde_json::from_str(r#"{"ownerIDs": [1, 2]}"#).unwrap();
        assert!(settings.is_owner(1));
        assert!(!settings.is_owner(3));
    }
}

//! One-time schema migration for the on-disk document layout.
//!
//! Version 0 wrapped every document in a storage-object envelope
//! (`{"value": {..}, "created": .., "lastEdit": ..}`); version 1 stores the
//! bare mapping. The data root carries a `version.json` stamp; the stamp only
//! advances after every document has been rewritten, so an interrupted
//! migration re-runs from the top (rewriting a document is idempotent).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const CURRENT_VERSION: u32 = 1;

const VERSION_FILE: &str = "version.json";

#[derive(Debug, Serialize, Deserialize)]
struct VersionStamp {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    migrated_at: Option<i64>,
}

/// Bring the data root up to the current schema version. No-op when already
/// current; a fresh (empty) root is stamped current directly.
pub fn run(root: &Path) -> Result<()> {
    let on_disk = read_version(root);

    if on_disk >= CURRENT_VERSION {
        debug!("Storage schema is current (version {})", on_disk);
        return Ok(());
    }

    if on_disk == 0 && is_empty_root(root) {
        write_version(root, CURRENT_VERSION, None)?;
        info!("Stamped fresh data root at schema version {}", CURRENT_VERSION);
        return Ok(());
    }

    info!(
        "Migrating storage schema from version {} to {}",
        on_disk, CURRENT_VERSION
    );
    let rewritten = migrate_v0_to_v1(root)?;
    write_version(root, CURRENT_VERSION, Some(chrono::Utc::now().timestamp()))?;
    info!(rewritten, "Storage schema migration complete");

    Ok(())
}

fn read_version(root: &Path) -> u32 {
    let path = root.join(VERSION_FILE);
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str::<VersionStamp>(&raw) {
            Ok(stamp) => stamp.version,
            Err(e) => {
                warn!("Malformed version stamp [{}]: {}", path.display(), e);
                0
            }
        },
        Err(_) => 0,
    }
}

fn write_version(root: &Path, version: u32, migrated_at: Option<i64>) -> Result<()> {
    let stamp = VersionStamp {
        version,
        migrated_at,
    };
    let path = root.join(VERSION_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(&stamp)?)
        .with_context(|| format!("Failed to write version stamp {:?}", path))
}

fn is_empty_root(root: &Path) -> bool {
    match std::fs::read_dir(root) {
        Ok(mut entries) => entries
            .all(|e| !e.map(|e| e.path().is_dir()).unwrap_or(false)),
        Err(_) => true,
    }
}

/// Rewrite every `<scope>/<owner>/<key>.json` document from the legacy
/// envelope into the bare mapping. Documents already in bare form (or
/// unparseable ones) are left untouched.
fn migrate_v0_to_v1(root: &Path) -> Result<usize> {
    let mut rewritten = 0;

    for scope in read_dirs(root)? {
        for owner in read_dirs(&scope)? {
            for entry in std::fs::read_dir(&owner)
                .with_context(|| format!("Failed to list {:?}", owner))?
            {
                let path = entry?.path();
                let is_doc = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(".json"))
                    .unwrap_or(false);
                if !is_doc {
                    continue;
                }

                if migrate_document(&path)? {
                    rewritten += 1;
                }
            }
        }
    }

    Ok(rewritten)
}

fn read_dirs(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))?
    {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    Ok(dirs)
}

fn migrate_document(path: &Path) -> Result<bool> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let parsed: Value = match serde_json::from_slice(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Skipping unparseable document [{}]: {}", path.display(), e);
            return Ok(false);
        }
    };

    let Some(inner) = unwrap_envelope(&parsed) else {
        debug!("Document already in bare form [{}]", path.display());
        return Ok(false);
    };

    std::fs::write(path, serde_json::to_vec_pretty(inner)?)
        .with_context(|| format!("Failed to rewrite {:?}", path))?;
    debug!("Migrated [{}]", path.display());
    Ok(true)
}

/// Returns the wrapped value if `parsed` is a legacy envelope: an object
/// whose `value` field is itself an object and whose remaining fields are
/// only the envelope's own bookkeeping timestamps.
fn unwrap_envelope(parsed: &Value) -> Option<&Value> {
    let map = parsed.as_object()?;
    let inner = map.get("value")?;
    if !inner.is_object() {
        return None;
    }
    let only_envelope_keys = map
        .keys()
        .all(|k| matches!(k.as_str(), "value" | "created" | "lastEdit" | "last_edit"));
    if only_envelope_keys {
        Some(inner)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_is_unwrapped() {
        let parsed = json!({
            "value": {"hashBlacklist": ["abc"]},
            "created": "2023-01-05T10:00:00",
            "lastEdit": "2023-02-01T09:30:00",
        });
        let inner = unwrap_envelope(&parsed).unwrap();
        assert_eq!(inner, &json!({"hashBlacklist": ["abc"]}));
    }

    #[test]
    fn bare_mapping_is_left_alone() {
        assert!(unwrap_envelope(&json!({"hashBlacklist": ["abc"]})).is_none());
        // A bare document with its own "value" field is not an envelope.
        assert!(unwrap_envelope(&json!({"value": {"x": 1}, "other": 2})).is_none());
        assert!(unwrap_envelope(&json!({"value": "scalar"})).is_none());
    }
}

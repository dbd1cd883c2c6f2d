pub mod migrate;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::Settings;

/// Scope for documents shared across feature modules.
pub const GLOBAL_SCOPE: &str = "global";

/// Owner sentinel for bot-global documents that belong to no guild.
pub const BOT_OWNER: u64 = 0;

/// A persisted document: a JSON object keyed by (scope, owner, key).
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Triple {
    scope: String,
    owner: u64,
    key: String,
}

/// File-backed document store. One JSON file per (scope, owner, key) triple
/// under `<data_root>/<scope>/<owner>/<key>.json`, with a transient
/// `<key>.json.lock` marker while an edit transaction is open.
///
/// Edits against the same triple are serialized by an in-process async mutex
/// per triple; the on-disk marker additionally makes an in-progress edit
/// visible to operators and surfaces leftovers from a hard crash. There is no
/// cross-process guarantee.
pub struct Store {
    root: PathBuf,
    locks: std::sync::Mutex<HashMap<Triple, Arc<tokio::sync::Mutex<()>>>>,
}

impl Store {
    /// Open the store rooted at the configured data path, running any
    /// pending schema migration before the first document is touched.
    pub fn open(settings: &Settings) -> Result<Self> {
        let root = settings.data_path.clone();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create data root {:?}", root))?;

        migrate::run(&root)?;

        Ok(Self {
            root,
            locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    fn doc_path(&self, scope: &str, owner: u64, key: &str) -> PathBuf {
        self.root
            .join(scope)
            .join(owner.to_string())
            .join(format!("{}.json", key))
    }

    fn lock_for(&self, scope: &str, owner: u64, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let triple = Triple {
            scope: scope.to_string(),
            owner,
            key: key.to_string(),
        };
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(triple).or_default().clone()
    }

    /// Read the current persisted state of a document. Missing or malformed
    /// data degrades to an empty document. Does not wait on in-flight edits,
    /// so the value may be stale while a concurrent edit is open.
    pub async fn read(&self, scope: &str, owner: u64, key: &str) -> Document {
        let path = self.doc_path(scope, owner, key);
        debug!("Read-only request for [{}]", path.display());
        load_document(&path).await
    }

    /// Run an exclusive edit transaction against a document: acquire the
    /// triple's lock, load the document (missing or malformed degrades to
    /// empty), apply `f`, then persist and unlock regardless of what `f`
    /// returned. A persistence failure is logged and the mutation is lost
    /// for this transaction; the lock is always released.
    pub async fn edit<F, R>(&self, scope: &str, owner: u64, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Document) -> R,
    {
        let lock = self.lock_for(scope, owner, key);
        let _guard = lock.lock().await;

        let path = self.doc_path(scope, owner, key);
        let marker = path.with_extension("json.lock");
        debug!("Edit request opened for [{}]", path.display());

        if let Some(dir) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                error!("Failed to create document directory [{}]: {}", dir.display(), e);
            }
        }

        // Atomic create: an existing marker here can only be a leftover from
        // a hard crash, since in-process edits are serialized above.
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => debug!("Locked [{}]", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!("Stale lock marker found for [{}], taking over", path.display());
            }
            Err(e) => warn!("Failed to create lock marker for [{}]: {}", path.display(), e),
        }

        let mut doc = load_document(&path).await;
        let out = f(&mut doc);

        match serde_json::to_vec_pretty(&Value::Object(doc)) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    error!("Failed to save [{}]: {}", path.display(), e);
                } else {
                    debug!("Saved [{}]", path.display());
                }
            }
            Err(e) => error!("Failed to serialize [{}]: {}", path.display(), e),
        }

        if let Err(e) = tokio::fs::remove_file(&marker).await {
            warn!("Failed to remove lock marker for [{}]: {}", path.display(), e);
        } else {
            debug!("Unlocked [{}]", path.display());
        }

        out
    }
}

async fn load_document(path: &std::path::Path) -> Document {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("File was not found [{}]", path.display());
            return Document::new();
        }
        Err(e) => {
            warn!("Failed to load [{}]: {}", path.display(), e);
            return Document::new();
        }
    };

    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("Document is not a JSON object [{}]", path.display());
            Document::new()
        }
        Err(e) => {
            warn!("Failed to parse [{}]: {}", path.display(), e);
            Document::new()
        }
    }
}

/// Decode a document into its typed schema, with uniform defaulting: a
/// document that does not match the schema (including the empty document a
/// fresh triple yields) decodes to `T::default()`.
pub fn decode<T>(doc: &Document) -> T
where
    T: DeserializeOwned + Default,
{
    match serde_json::from_value(Value::Object(doc.clone())) {
        Ok(value) => value,
        Err(e) => {
            warn!("Document does not match schema, using defaults: {}", e);
            T::default()
        }
    }
}

/// Encode a typed schema back into document form.
pub fn encode<T: Serialize>(value: &T) -> Document {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!("Schema did not serialize to a JSON object");
            Document::new()
        }
    }
}

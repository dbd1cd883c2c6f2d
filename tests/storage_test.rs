//! Integration tests for the document store: transactions, locking,
//! degradation, and schema migration.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use mammoth::config::Settings;
use mammoth::storage::{self, Store, GLOBAL_SCOPE};

fn test_settings(root: &Path) -> Settings {
    Settings {
        data_path: root.to_path_buf(),
        ..Settings::default()
    }
}

fn open_store(root: &Path) -> Arc<Store> {
    Arc::new(Store::open(&test_settings(root)).expect("Failed to open store"))
}

#[tokio::test]
async fn edit_then_read_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    store
        .edit(GLOBAL_SCOPE, 42, "settings", |doc| {
            doc.insert("greeting".into(), json!("hello"));
        })
        .await;

    let doc = store.read(GLOBAL_SCOPE, 42, "settings").await;
    assert_eq!(doc.get("greeting"), Some(&json!("hello")));
}

#[tokio::test]
async fn read_of_missing_document_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    let doc = store.read("alerts", 1, "never_written").await;
    assert!(doc.is_empty());
}

#[tokio::test]
async fn malformed_document_degrades_to_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    let dir = tmp.path().join(GLOBAL_SCOPE).join("9");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("settings.json"), b"{not valid json").unwrap();

    let doc = store.read(GLOBAL_SCOPE, 9, "settings").await;
    assert!(doc.is_empty());

    // An edit over the malformed file starts from empty and repairs it.
    store
        .edit(GLOBAL_SCOPE, 9, "settings", |doc| {
            doc.insert("fixed".into(), json!(true));
        })
        .await;
    let doc = store.read(GLOBAL_SCOPE, 9, "settings").await;
    assert_eq!(doc.get("fixed"), Some(&json!(true)));
}

#[tokio::test]
async fn concurrent_edits_lose_no_updates() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    // Read-modify-write increments would interleave without per-triple
    // serialization.
    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .edit(GLOBAL_SCOPE, 5, "counter", |doc| {
                    let current = doc
                        .get("count")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    doc.insert("count".into(), json!(current + 1));
                })
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let doc = store.read(GLOBAL_SCOPE, 5, "counter").await;
    assert_eq!(doc.get("count"), Some(&json!(16)));
}

#[tokio::test]
async fn concurrent_disjoint_field_edits_all_persist() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .edit("alerts", 3, "fields", move |doc| {
                    doc.insert(format!("field_{}", i), json!(i));
                })
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let doc = store.read("alerts", 3, "fields").await;
    assert_eq!(doc.len(), 8);
    for i in 0..8 {
        assert_eq!(doc.get(&format!("field_{}", i)), Some(&json!(i)));
    }
}

#[tokio::test]
async fn lock_marker_exists_during_edit_and_is_removed_after() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    let marker = tmp
        .path()
        .join(GLOBAL_SCOPE)
        .join("7")
        .join("doc.json.lock");

    let seen = store
        .edit(GLOBAL_SCOPE, 7, "doc", |_doc| marker.exists())
        .await;
    assert!(seen, "lock marker should exist while the transaction is open");
    assert!(!marker.exists(), "lock marker should be removed on exit");
}

#[tokio::test]
async fn stale_lock_marker_does_not_block_edits() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    let dir = tmp.path().join(GLOBAL_SCOPE).join("8");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("doc.json.lock"), b"").unwrap();

    store
        .edit(GLOBAL_SCOPE, 8, "doc", |doc| {
            doc.insert("ok".into(), json!(true));
        })
        .await;

    let doc = store.read(GLOBAL_SCOPE, 8, "doc").await;
    assert_eq!(doc.get("ok"), Some(&json!(true)));
    assert!(!dir.join("doc.json.lock").exists());
}

#[tokio::test]
async fn independent_triples_do_not_share_state() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    store
        .edit(GLOBAL_SCOPE, 1, "doc", |doc| {
            doc.insert("guild".into(), json!(1));
        })
        .await;
    store
        .edit(GLOBAL_SCOPE, 2, "doc", |doc| {
            doc.insert("guild".into(), json!(2));
        })
        .await;

    assert_eq!(
        store.read(GLOBAL_SCOPE, 1, "doc").await.get("guild"),
        Some(&json!(1))
    );
    assert_eq!(
        store.read(GLOBAL_SCOPE, 2, "doc").await.get("guild"),
        Some(&json!(2))
    );
}

#[tokio::test]
async fn typed_decode_defaults_on_mismatch() {
    #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    #[serde(default)]
    struct Shape {
        name: String,
        limit: u32,
    }

    let doc = storage::encode(&Shape {
        name: "x".into(),
        limit: 3,
    });
    assert_eq!(storage::decode::<Shape>(&doc), Shape { name: "x".into(), limit: 3 });

    // Wrong types fall back to the schema default.
    let mut bad = storage::Document::new();
    bad.insert("name".into(), json!(17));
    assert_eq!(storage::decode::<Shape>(&bad), Shape::default());

    // Missing fields take their defaults.
    let empty = storage::Document::new();
    assert_eq!(storage::decode::<Shape>(&empty), Shape::default());
}

#[test]
fn fresh_root_is_stamped_current() {
    let tmp = tempfile::tempdir().unwrap();
    let _store = Store::open(&test_settings(tmp.path())).unwrap();

    let stamp: Value =
        serde_json::from_slice(&std::fs::read(tmp.path().join("version.json")).unwrap()).unwrap();
    assert_eq!(stamp["version"], json!(storage::migrate::CURRENT_VERSION));
}

#[tokio::test]
async fn legacy_documents_migrate_once() {
    let tmp = tempfile::tempdir().unwrap();

    // A version-0 layout: enveloped documents, no version stamp.
    let dir = tmp.path().join(GLOBAL_SCOPE).join("11");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("hash_blacklist.json"),
        serde_json::to_vec_pretty(&json!({
            "value": {"hash_blacklist": ["aaaa", "bbbb"]},
            "created": "2023-01-05T10:00:00",
            "last_edit": "2023-02-01T09:30:00",
        }))
        .unwrap(),
    )
    .unwrap();

    let store = open_store(tmp.path());
    let doc = store.read(GLOBAL_SCOPE, 11, "hash_blacklist").await;
    assert_eq!(doc.get("hash_blacklist"), Some(&json!(["aaaa", "bbbb"])));
    assert!(doc.get("value").is_none());

    let stamp: Value =
        serde_json::from_slice(&std::fs::read(tmp.path().join("version.json")).unwrap()).unwrap();
    assert_eq!(stamp["version"], json!(1));

    // Re-opening at the current version is a no-op.
    drop(store);
    let store = open_store(tmp.path());
    let doc = store.read(GLOBAL_SCOPE, 11, "hash_blacklist").await;
    assert_eq!(doc.get("hash_blacklist"), Some(&json!(["aaaa", "bbbb"])));
}

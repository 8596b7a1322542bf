use super::*;
use tempfile::tempdir;

fn keys(items: &[&str]) -> BTreeSet<TaskKey> {
    items.iter().map(|k| TaskKey::from(*k)).collect()
}

#[tokio::test]
async fn save_then_load_returns_same_sets() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());

    store
        .save(
            "folder-1",
            &keys(&["a_1", "b_2"]),
            &keys(&["c_3"]),
            Path::new("/data/out"),
        )
        .await
        .unwrap();

    let record = store.load("folder-1").await.expect("record should exist");
    assert_eq!(record.schema_version, SCHEMA_VERSION);
    assert_eq!(record.scope_id, "folder-1");
    assert_eq!(record.destination_root, "/data/out");
    assert_eq!(record.completed_keys, keys(&["a_1", "b_2"]));
    assert_eq!(record.failed_keys, keys(&["c_3"]));
}

#[tokio::test]
async fn load_of_missing_scope_is_absent() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("never-created"));

    assert!(matches!(
        store.load_checked("nothing").await,
        CheckpointLoad::Absent
    ));
}

#[tokio::test]
async fn written_json_uses_camel_case_fields() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    store
        .save("s", &keys(&["k_1"]), &keys(&[]), Path::new("/out"))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(store.record_path("s")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["schemaVersion"], 1);
    assert_eq!(json["scopeId"], "s");
    assert_eq!(json["destinationRoot"], "/out");
    assert_eq!(json["completedKeys"], serde_json::json!(["k_1"]));
    assert_eq!(json["failedKeys"], serde_json::json!([]));
    let ts = json["timestamp"].as_str().unwrap();
    assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "timestamp {ts} is not ISO-8601");
}

#[tokio::test]
async fn overlapping_sets_are_saved_disjoint() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());

    let record = store
        .save(
            "s",
            &keys(&["a", "b"]),
            &keys(&["b", "c"]),
            Path::new("/out"),
        )
        .await
        .unwrap();

    assert_eq!(record.completed_keys, keys(&["a", "b"]));
    assert_eq!(record.failed_keys, keys(&["c"]));
    assert_eq!(
        record
            .completed_keys
            .intersection(&record.failed_keys)
            .count(),
        0
    );
}

#[tokio::test]
async fn repeated_saves_are_equivalent_in_meaning() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let completed = keys(&["x_1", "y_2", "z_3"]);
    let failed = keys(&["w_4"]);

    let first = store
        .save("s", &completed, &failed, Path::new("/out"))
        .await
        .unwrap();
    let second = store
        .save("s", &completed, &failed, Path::new("/out"))
        .await
        .unwrap();

    assert_eq!(first.completed_keys, second.completed_keys);
    assert_eq!(first.failed_keys, second.failed_keys);
    assert_eq!(first.destination_root, second.destination_root);

    let loaded = store.load("s").await.unwrap();
    assert_eq!(loaded.completed_keys, completed);
    assert_eq!(loaded.failed_keys, failed);
}

#[tokio::test]
async fn garbage_record_is_corrupt_not_fatal() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    std::fs::write(store.record_path("s"), b"{ not json").unwrap();

    match store.load_checked("s").await {
        CheckpointLoad::Corrupt { path, reason } => {
            assert_eq!(path, store.record_path("s"));
            assert!(reason.contains("invalid record"), "reason was: {reason}");
        }
        other => panic!("expected corrupt, got {other:?}"),
    }
    assert!(store.load("s").await.is_none());
}

#[tokio::test]
async fn missing_required_field_is_corrupt() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let json = serde_json::json!({
        "schemaVersion": 1,
        "scopeId": "s",
        "destinationRoot": "/out",
        "completedKeys": ["a"],
        "timestamp": "2026-01-01T00:00:00Z"
    });
    std::fs::write(store.record_path("s"), json.to_string()).unwrap();

    assert!(matches!(
        store.load_checked("s").await,
        CheckpointLoad::Corrupt { .. }
    ));
}

#[tokio::test]
async fn unparseable_timestamp_is_corrupt() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let json = serde_json::json!({
        "schemaVersion": 1,
        "scopeId": "s",
        "destinationRoot": "/out",
        "completedKeys": [],
        "failedKeys": [],
        "timestamp": "yesterday-ish"
    });
    std::fs::write(store.record_path("s"), json.to_string()).unwrap();

    assert!(matches!(
        store.load_checked("s").await,
        CheckpointLoad::Corrupt { .. }
    ));
}

#[tokio::test]
async fn future_schema_version_is_corrupt() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let json = serde_json::json!({
        "schemaVersion": SCHEMA_VERSION + 1,
        "scopeId": "s",
        "destinationRoot": "/out",
        "completedKeys": [],
        "failedKeys": [],
        "timestamp": "2026-01-01T00:00:00Z"
    });
    std::fs::write(store.record_path("s"), json.to_string()).unwrap();

    match store.load_checked("s").await {
        CheckpointLoad::Corrupt { reason, .. } => assert!(reason.contains("schema version")),
        other => panic!("expected corrupt, got {other:?}"),
    }
}

#[tokio::test]
async fn hand_edited_overlap_is_normalized_on_load() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let json = serde_json::json!({
        "schemaVersion": 1,
        "scopeId": "s",
        "destinationRoot": "/out",
        "completedKeys": ["a", "b"],
        "failedKeys": ["b", "c"],
        "timestamp": "2026-01-01T00:00:00+02:00"
    });
    std::fs::write(store.record_path("s"), json.to_string()).unwrap();

    let record = store.load("s").await.unwrap();
    assert_eq!(record.completed_keys, keys(&["a", "b"]));
    assert_eq!(record.failed_keys, keys(&["c"]));
}

#[tokio::test]
async fn interrupted_write_at_any_offset_keeps_previous_record() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());

    let previous = store
        .save("s", &keys(&["old_1"]), &keys(&[]), Path::new("/out"))
        .await
        .unwrap();

    // Bytes of the record the interrupted save was about to write
    let next = CheckpointRecord {
        completed_keys: keys(&["old_1", "new_2", "new_3"]),
        failed_keys: keys(&["bad_4"]),
        timestamp: Utc::now(),
        ..previous.clone()
    };
    let bytes = serde_json::to_vec_pretty(&next).unwrap();
    let tmp = tmp_path(&store.record_path("s"));

    for offset in 0..=bytes.len() {
        std::fs::write(&tmp, &bytes[..offset]).unwrap();
        let loaded = store.load("s").await.expect("previous record must survive");
        assert_eq!(
            loaded.completed_keys, previous.completed_keys,
            "offset {offset}: loader must never see the in-flight write"
        );
        assert_eq!(loaded.failed_keys, previous.failed_keys);
    }
}

#[tokio::test]
async fn truncated_final_record_is_never_returned_as_hybrid() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let full = store
        .save(
            "s",
            &keys(&["a_1", "b_2", "c_3"]),
            &keys(&["d_4"]),
            Path::new("/out"),
        )
        .await
        .unwrap();
    let bytes = std::fs::read(store.record_path("s")).unwrap();

    for offset in 0..bytes.len() {
        std::fs::write(store.record_path("s"), &bytes[..offset]).unwrap();
        match store.load_checked("s").await {
            CheckpointLoad::Corrupt { .. } | CheckpointLoad::Absent => {}
            CheckpointLoad::Found(record) => {
                assert_eq!(record.completed_keys, full.completed_keys);
                assert_eq!(record.failed_keys, full.failed_keys);
            }
        }
    }
}

#[tokio::test]
async fn save_removes_tmp_sibling() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    store
        .save("s", &keys(&["a"]), &keys(&[]), Path::new("/out"))
        .await
        .unwrap();

    assert!(store.record_path("s").exists());
    assert!(!tmp_path(&store.record_path("s")).exists());
}

#[tokio::test]
async fn clear_removes_record_and_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    store
        .save("s", &keys(&["a"]), &keys(&[]), Path::new("/out"))
        .await
        .unwrap();
    std::fs::write(tmp_path(&store.record_path("s")), b"partial").unwrap();

    store.clear("s").await.unwrap();
    assert!(!store.record_path("s").exists());
    assert!(!tmp_path(&store.record_path("s")).exists());

    store.clear("s").await.unwrap();
    store.clear("never-saved").await.unwrap();
}

#[tokio::test]
async fn record_path_is_deterministic_and_filesystem_safe() {
    let store = CheckpointStore::new("/ckpt");
    let scope = "https://drive.example.com/folders/AbC?x=1&y=../..";

    let first = store.record_path(scope);
    let second = store.record_path(scope);
    assert_eq!(first, second);
    assert_eq!(first.parent(), Some(Path::new("/ckpt")));

    let name = first.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("checkpoint_"));
    assert!(name.ends_with(".json"));
    assert!(
        name.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')),
        "unsafe file name: {name}"
    );
}

#[tokio::test]
async fn scopes_that_sanitize_alike_get_distinct_files() {
    let store = CheckpointStore::new("/ckpt");
    assert_ne!(store.record_path("a/b"), store.record_path("a?b"));
    assert_ne!(store.record_path(""), store.record_path("?"));
}

#[tokio::test]
async fn scope_id_mismatch_is_corrupt() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    store
        .save("other", &keys(&["a"]), &keys(&[]), Path::new("/out"))
        .await
        .unwrap();
    std::fs::copy(store.record_path("other"), store.record_path("mine")).unwrap();

    assert!(matches!(
        store.load_checked("mine").await,
        CheckpointLoad::Corrupt { .. }
    ));
}

#[tokio::test]
async fn concurrent_saves_of_one_scope_leave_a_valid_record() {
    let dir = tempdir().unwrap();
    let store = Arc::new(CheckpointStore::new(dir.path()));

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let completed: BTreeSet<TaskKey> =
                (0..=i).map(|n| TaskKey(format!("k_{n}"))).collect();
            store
                .save("shared", &completed, &BTreeSet::new(), Path::new("/out"))
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = store.load("shared").await.expect("valid record");
    assert!(!record.completed_keys.is_empty());
    assert!(record.completed_keys.len() <= 16);
}

#[tokio::test]
async fn different_scopes_do_not_interfere() {
    let dir = tempdir().unwrap();
    let store = Arc::new(CheckpointStore::new(dir.path()));

    let a = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .save("scope-a", &keys(&["a"]), &keys(&[]), Path::new("/a"))
                .await
        })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .save("scope-b", &keys(&["b"]), &keys(&["bb"]), Path::new("/b"))
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(
        store.load("scope-a").await.unwrap().completed_keys,
        keys(&["a"])
    );
    assert_eq!(
        store.load("scope-b").await.unwrap().failed_keys,
        keys(&["bb"])
    );
}

#[tokio::test]
async fn info_reports_counts() {
    let dir = tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());

    let empty = store.info("s").await;
    assert!(!empty.exists);
    assert_eq!(empty.completed, 0);

    store
        .save("s", &keys(&["a", "b"]), &keys(&["c"]), Path::new("/out"))
        .await
        .unwrap();
    let info = store.info("s").await;
    assert!(info.exists);
    assert_eq!(info.completed, 2);
    assert_eq!(info.failed, 1);
    assert_eq!(info.destination_root.as_deref(), Some("/out"));
    assert!(info.timestamp.is_some());
}

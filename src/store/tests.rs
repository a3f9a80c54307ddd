use super::*;
use tempfile::TempDir;

fn create_test_store() -> (VectorStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = VectorStore::new(temp_dir.path().join("vector_store")).with_model_tag("test-model");
    (store, temp_dir)
}

fn chunks(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test]
async fn save_and_load_roundtrip() {
    let (store, _temp_dir) = create_test_store();
    let texts = chunks(&[
        "Leave must be requested in advance.",
        "Line one\nline two with \"quotes\" and unicode: café ✓",
        "Remote work requires manager approval.",
    ]);
    let embeddings = vec![
        vec![0.1, 0.2, 0.3],
        vec![-1.5, 0.0, 1e-7],
        vec![0.333_333_34, 123.456, -0.0],
    ];

    let path = store
        .save("acme", &texts, &embeddings)
        .await
        .expect("save succeeds");
    assert!(path.ends_with("acme_embeddings.jsonl"));

    let records = store.load("acme").await.expect("load succeeds");
    assert_eq!(records.len(), 3);
    for ((record, text), embedding) in records.iter().zip(&texts).zip(&embeddings) {
        assert_eq!(&record.chunk, text);
        assert_eq!(&record.embedding, embedding);
    }
}

#[tokio::test]
async fn file_is_one_json_object_per_line() {
    let (store, _temp_dir) = create_test_store();
    let path = store
        .save(
            "acme",
            &chunks(&["first", "second"]),
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .await
        .expect("save succeeds");

    let content = std::fs::read_to_string(path).expect("store file is readable");
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(content.ends_with('\n'));

    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).expect("line is json");
        let object = value.as_object().expect("line is an object");
        assert_eq!(object.len(), 2);
        assert!(object["chunk"].is_string());
        assert!(object["embedding"].is_array());
    }
}

#[tokio::test]
async fn overwrite_keeps_only_latest_save() {
    let (store, _temp_dir) = create_test_store();
    assert_eq!(store.write_mode(), WriteMode::Overwrite);

    store
        .save("acme", &chunks(&["old one", "old two"]), &[vec![1.0], vec![2.0]])
        .await
        .expect("first save succeeds");
    store
        .save("acme", &chunks(&["new"]), &[vec![3.0]])
        .await
        .expect("second save succeeds");

    let records = store.load("acme").await.expect("load succeeds");
    assert_eq!(
        records,
        vec![Record {
            chunk: "new".to_string(),
            embedding: vec![3.0],
        }]
    );
}

#[tokio::test]
async fn append_keeps_previous_records() {
    let (store, _temp_dir) = create_test_store();
    let store = store.with_write_mode(WriteMode::Append);

    store
        .save("acme", &chunks(&["first"]), &[vec![1.0, 0.0]])
        .await
        .expect("first save succeeds");
    store
        .save("acme", &chunks(&["second", "third"]), &[vec![0.0, 1.0], vec![0.5, 0.5]])
        .await
        .expect("second save succeeds");

    let records = store.load("acme").await.expect("load succeeds");
    let texts: Vec<&str> = records.iter().map(|r| r.chunk.as_str()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);

    let manifest = store
        .manifest("acme")
        .await
        .expect("manifest readable")
        .expect("manifest exists");
    assert_eq!(manifest.record_count, 3);
}

#[tokio::test]
async fn append_rejects_dimension_change() {
    let (store, _temp_dir) = create_test_store();
    let store = store.with_write_mode(WriteMode::Append);

    store
        .save("acme", &chunks(&["first"]), &[vec![1.0, 0.0]])
        .await
        .expect("first save succeeds");
    let result = store
        .save("acme", &chunks(&["second"]), &[vec![1.0, 0.0, 0.0]])
        .await;

    assert!(matches!(result, Err(RagError::Validation(_))));
    assert_eq!(store.load("acme").await.expect("load succeeds").len(), 1);
}

#[tokio::test]
async fn append_rejects_other_embedding_model() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let root = temp_dir.path().join("vector_store");
    let first = VectorStore::new(&root)
        .with_model_tag("model-a")
        .with_write_mode(WriteMode::Append);
    let second = VectorStore::new(&root)
        .with_model_tag("model-b")
        .with_write_mode(WriteMode::Append);

    first
        .save("acme", &chunks(&["first"]), &[vec![1.0, 0.0]])
        .await
        .expect("first save succeeds");
    let result = second
        .save("acme", &chunks(&["second"]), &[vec![0.0, 1.0]])
        .await;

    assert!(matches!(result, Err(RagError::Validation(_))));
    assert_eq!(first.load("acme").await.expect("load succeeds").len(), 1);
    let manifest = first
        .manifest("acme")
        .await
        .expect("manifest readable")
        .expect("manifest exists");
    assert_eq!(manifest.embedding_model, "model-a");

    second
        .with_write_mode(WriteMode::Overwrite)
        .save("acme", &chunks(&["second"]), &[vec![0.0, 1.0]])
        .await
        .expect("overwrite with the new model succeeds");
}

#[tokio::test]
async fn non_finite_embeddings_are_rejected() {
    let (store, _temp_dir) = create_test_store();

    for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        let result = store
            .save("acme", &chunks(&["ok", "bad"]), &[vec![1.0, 0.0], vec![bad, 1.0]])
            .await;
        assert!(matches!(result, Err(RagError::Validation(_))));
    }
    assert!(!store.exists("acme").await.expect("exists check succeeds"));

    store
        .save("acme", &chunks(&["ok"]), &[vec![1.0, 0.0]])
        .await
        .expect("finite save succeeds");
    assert_eq!(store.load("acme").await.expect("load succeeds").len(), 1);
}

#[tokio::test]
async fn mismatched_counts_are_rejected() {
    let (store, _temp_dir) = create_test_store();

    let result = store
        .save("acme", &chunks(&["one", "two"]), &[vec![1.0]])
        .await;

    assert!(matches!(result, Err(RagError::Validation(_))));
    assert!(!store.exists("acme").await.expect("exists check succeeds"));
}

#[tokio::test]
async fn mixed_dimensions_are_rejected() {
    let (store, _temp_dir) = create_test_store();

    let result = store
        .save("acme", &chunks(&["one", "two"]), &[vec![1.0, 0.0], vec![1.0]])
        .await;

    assert!(matches!(result, Err(RagError::Validation(_))));
}

#[tokio::test]
async fn missing_store_loads_empty() {
    let (store, _temp_dir) = create_test_store();

    let records = store.load("nobody").await.expect("load succeeds");
    assert!(records.is_empty());
    assert!(!store.exists("nobody").await.expect("exists check succeeds"));
    assert!(store
        .manifest("nobody")
        .await
        .expect("manifest check succeeds")
        .is_none());
}

#[tokio::test]
async fn malformed_line_is_validation_error() {
    let (store, _temp_dir) = create_test_store();
    std::fs::create_dir_all(store.root()).expect("should create store dir");
    std::fs::write(
        store.records_path("acme").expect("valid tenant"),
        "{\"chunk\": \"ok\", \"embedding\": [1.0]}\n{\"chunk\": \"missing embedding\"}\n",
    )
    .expect("should write store file");

    let result = store.load("acme").await;
    match result {
        Err(RagError::Validation(message)) => assert!(message.contains("line 2")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn blank_lines_are_ignored() {
    let (store, _temp_dir) = create_test_store();
    std::fs::create_dir_all(store.root()).expect("should create store dir");
    std::fs::write(
        store.records_path("acme").expect("valid tenant"),
        "{\"chunk\": \"a\", \"embedding\": [1.0]}\n\n{\"chunk\": \"b\", \"embedding\": [2.0]}\n",
    )
    .expect("should write store file");

    let records = store.load("acme").await.expect("load succeeds");
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn manifest_records_model_and_shape() {
    let (store, _temp_dir) = create_test_store();
    store
        .save("acme", &chunks(&["a", "b"]), &[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
        .await
        .expect("save succeeds");

    let manifest = store
        .manifest("acme")
        .await
        .expect("manifest readable")
        .expect("manifest exists");
    assert_eq!(manifest.schema_version, SCHEMA_VERSION);
    assert_eq!(manifest.embedding_model, "test-model");
    assert_eq!(manifest.dimension, 3);
    assert_eq!(manifest.record_count, 2);
}

#[tokio::test]
async fn no_temporary_files_left_behind() {
    let (store, _temp_dir) = create_test_store();
    store
        .save("acme", &chunks(&["a"]), &[vec![1.0]])
        .await
        .expect("save succeeds");
    store
        .save("acme", &chunks(&["b"]), &[vec![2.0]])
        .await
        .expect("save succeeds");

    let mut names: Vec<String> = std::fs::read_dir(store.root())
        .expect("store dir readable")
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    assert_eq!(names, vec!["acme_embeddings.jsonl", "acme_manifest.json"]);
}

#[tokio::test]
async fn invalid_tenant_ids_are_rejected() {
    let (store, _temp_dir) = create_test_store();

    for tenant in ["", "../etc", "a/b", ".hidden", "name with space", "tenant\\x"] {
        let result = store.save(tenant, &chunks(&["a"]), &[vec![1.0]]).await;
        assert!(
            matches!(result, Err(RagError::Validation(_))),
            "tenant {:?} should be rejected",
            tenant
        );
        assert!(matches!(
            store.load(tenant).await,
            Err(RagError::Validation(_))
        ));
    }

    assert!(validate_tenant_id("default_client").is_ok());
    assert!(validate_tenant_id("acme-corp.eu").is_ok());
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (store, _temp_dir) = create_test_store();
    store
        .save("alpha", &chunks(&["alpha doc"]), &[vec![1.0]])
        .await
        .expect("save succeeds");
    store
        .save("beta", &chunks(&["beta doc"]), &[vec![2.0]])
        .await
        .expect("save succeeds");

    let alpha = store.load("alpha").await.expect("load succeeds");
    assert_eq!(alpha.len(), 1);
    assert_eq!(alpha[0].chunk, "alpha doc");
}

#[tokio::test]
async fn list_and_delete_tenants() {
    let (store, _temp_dir) = create_test_store();
    assert!(store.list_tenants().await.expect("listing succeeds").is_empty());

    for tenant in ["zeta", "alpha", "mid"] {
        store
            .save(tenant, &chunks(&["doc"]), &[vec![1.0]])
            .await
            .expect("save succeeds");
    }

    assert_eq!(
        store.list_tenants().await.expect("listing succeeds"),
        vec!["alpha", "mid", "zeta"]
    );

    assert!(store.delete("mid").await.expect("delete succeeds"));
    assert!(!store.delete("mid").await.expect("delete succeeds"));
    assert!(!store.exists("mid").await.expect("exists check succeeds"));
    assert_eq!(
        store.list_tenants().await.expect("listing succeeds"),
        vec!["alpha", "zeta"]
    );
}

#[tokio::test]
async fn delete_releases_tenant_lock() {
    let (store, _temp_dir) = create_test_store();

    store
        .save("acme", &chunks(&["doc"]), &[vec![1.0]])
        .await
        .expect("save succeeds");
    assert!(store.locks.lock().expect("lock not poisoned").contains_key("acme"));

    store.delete("acme").await.expect("delete succeeds");
    assert!(!store.locks.lock().expect("lock not poisoned").contains_key("acme"));

    store
        .save("acme", &chunks(&["again"]), &[vec![1.0]])
        .await
        .expect("save after delete succeeds");
    assert_eq!(store.load("acme").await.expect("load succeeds").len(), 1);
}

#[tokio::test]
async fn concurrent_appends_are_serialized() {
    let (store, _temp_dir) = create_test_store();
    let store = Arc::new(store.with_write_mode(WriteMode::Append));

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .save("acme", &[format!("chunk {}", i)], &[vec![i as f32, 1.0]])
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("task completes").expect("save succeeds");
    }

    let records = store.load("acme").await.expect("load succeeds");
    assert_eq!(records.len(), 10);
    for i in 0..10 {
        let text = format!("chunk {}", i);
        assert!(records.iter().any(|r| r.chunk == text));
    }
}

#[test]
fn write_mode_display() {
    assert_eq!(WriteMode::Overwrite.to_string(), "overwrite");
    assert_eq!(WriteMode::Append.to_string(), "append");
    assert_eq!(WriteMode::default(), WriteMode::Overwrite);
}

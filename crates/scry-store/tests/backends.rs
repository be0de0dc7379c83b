use std::collections::HashMap;

use scry_store::{
    BackendKind, EmbeddingRecord, Persistence, QdrantBackend, VectorBackend, VectorConfig,
    VectorFilter, open_backend,
};
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);

fn record(id: &str, vector: Vec<f32>, file: &str) -> EmbeddingRecord {
    EmbeddingRecord {
        id: id.into(),
        vector,
        metadata: HashMap::from([("file_path".to_string(), serde_json::json!(file))]),
    }
}

async fn exercise(backend: &dyn VectorBackend, collection: &str) {
    backend.ensure_collection(collection, 3).await.unwrap();
    backend.ensure_collection(collection, 3).await.unwrap();
    backend
        .add(
            collection,
            vec![
                record("00000000-0000-0000-0000-000000000001", vec![1.0, 0.0, 0.0], "a.rs"),
                record("00000000-0000-0000-0000-000000000002", vec![0.7, 0.7, 0.0], "b.rs"),
                record("00000000-0000-0000-0000-000000000003", vec![0.0, 0.0, 1.0], "c.rs"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(backend.count(collection).await.unwrap(), 3);

    let hits = backend
        .query(collection, vec![1.0, 0.1, 0.0], 2, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].metadata["file_path"], "a.rs");
    assert!(hits[0].score >= hits[1].score);

    let filtered = backend
        .query(
            collection,
            vec![1.0, 0.0, 0.0],
            5,
            Some(VectorFilter::text_eq("file_path", "c.rs")),
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);

    backend.clear(collection).await.unwrap();
    assert!(
        backend
            .query(collection, vec![1.0, 0.0, 0.0], 5, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn sqlite_backend_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = VectorConfig {
        backend: BackendKind::Sqlite,
        sqlite_path: dir.path().join("vectors.db").to_string_lossy().into_owned(),
        ..VectorConfig::default()
    };
    let backend = open_backend(&config).await.unwrap();
    assert_eq!(backend.name(), "sqlite");
    assert_eq!(backend.persistence(), Persistence::Local);
    exercise(backend.as_ref(), "code").await;
}

#[tokio::test]
async fn memory_backend_from_config() {
    let config = VectorConfig {
        backend: BackendKind::Memory,
        ..VectorConfig::default()
    };
    let backend = open_backend(&config).await.unwrap();
    assert_eq!(backend.persistence(), Persistence::Ephemeral);
    exercise(backend.as_ref(), "code").await;
}

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup_qdrant() -> (QdrantBackend, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let backend = QdrantBackend::new(&format!("http://127.0.0.1:{grpc_port}")).unwrap();
    (backend, container)
}

#[tokio::test]
#[ignore = "needs a docker daemon"]
async fn qdrant_backend_round() {
    let (backend, _container) = setup_qdrant().await;
    assert_eq!(backend.persistence(), Persistence::Remote);
    exercise(&backend, "scry_test").await;
}

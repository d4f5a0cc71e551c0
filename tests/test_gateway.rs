//! End-to-end scenarios over real backends: a SQLite socket and a
//! filesystem socket behind the stateful frontend, driven the way the
//! HTTP controller drives it.

use std::path::Path;
use std::sync::Arc;

use blobgate::prelude::*;

fn db_socket(dir: &Path) -> Arc<DbSocket> {
    let path = dir.join("storage.db");
    Arc::new(DbSocket::new(
        DbSocketConfig::default().with_path(path.to_str().unwrap()),
    ))
}

fn fs_socket(dir: &Path) -> Arc<FsSocket> {
    let root = dir.join("blobs");
    let sidecar = dir.join("blobs.meta.json");
    Arc::new(FsSocket::new(
        FsSocketConfig::default()
            .with_root(root.to_str().unwrap())
            .with_meta_table(sidecar.to_str().unwrap()),
    ))
}

fn gateway(dir: &Path) -> StatefulFrontend {
    let index = dir.join("index.db");
    StatefulFrontend::new(
        vec![db_socket(dir), fs_socket(dir)],
        IndexConfig::default()
            .with_path(index.to_str().unwrap())
            .with_aliases(["db_1", "fs_1"]),
    )
    .unwrap()
}

#[tokio::test]
async fn test_happy_write_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path());
    gateway.init().await.unwrap();

    // The literal POST body the controller would hand over.
    let payload: WritePayload =
        serde_json::from_str(r#"{"id":"hello.txt","data":"SGVsbG8gV29ybGQh"}"#).unwrap();
    gateway.write_object(&payload, None).await.unwrap();

    let stored = gateway
        .read_object("hello.txt", None)
        .await
        .unwrap()
        .expect("freshly written blob must resolve");
    assert_eq!(stored.data, b"Hello World!");
    assert_eq!(stored.metadata.size, 12);
    assert!(stored.metadata.created_at > 0);

    let record: blobgate::api::BlobRecord = stored.into();
    assert_eq!(record.data, "SGVsbG8gV29ybGQh");
}

#[tokio::test]
async fn test_duplicate_id_maps_to_422() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path());
    gateway.init().await.unwrap();

    let payload = WritePayload {
        id: "hello.txt".into(),
        data: "SGVsbG8gV29ybGQh".into(),
    };
    gateway.write_object(&payload, None).await.unwrap();

    let refusal = gateway.write_object(&payload, None).await.unwrap_err();
    assert_eq!(status_for(&refusal), 422);
}

#[tokio::test]
async fn test_bearer_protected_object() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path());
    gateway.init().await.unwrap();

    let owner = bearer_token(Some("Bearer tok-A"));
    let payload = WritePayload {
        id: "secret".into(),
        data: "QUJD".into(),
    };
    gateway
        .write_object(&payload, owner.as_deref())
        .await
        .unwrap();

    // Wrong bearer: 401.
    let intruder = bearer_token(Some("Bearer tok-B"));
    let denied = gateway
        .read_object("secret", intruder.as_deref())
        .await
        .unwrap_err();
    assert_eq!(status_for(&denied), 401);

    // No bearer at all: still 401.
    let denied = gateway.read_object("secret", None).await.unwrap_err();
    assert_eq!(status_for(&denied), 401);

    // The owner reads the bytes back.
    let stored = gateway
        .read_object("secret", owner.as_deref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.data, b"ABC");
}

#[tokio::test]
async fn test_public_object_readable_with_any_bearer() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path());
    gateway.init().await.unwrap();

    // An Authorization header that is not a Bearer scheme means no
    // bearer, so the object lands public.
    let no_bearer = bearer_token(Some("Basic dXNlcjpwdw=="));
    assert_eq!(no_bearer, None);

    let payload = WritePayload {
        id: "pub".into(),
        data: "QUJD".into(),
    };
    gateway
        .write_object(&payload, no_bearer.as_deref())
        .await
        .unwrap();

    let stored = gateway
        .read_object("pub", Some("tok-X"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.data, b"ABC");
}

#[tokio::test]
async fn test_all_backends_offline_maps_to_503() {
    let dir = tempfile::tempdir().unwrap();

    // A gateway over a single filesystem socket whose root vanishes
    // after init: the liveness probe reports it offline.
    let root = dir.path().join("blobs");
    let index = dir.path().join("index.db");
    let gateway = StatefulFrontend::new(
        vec![fs_socket(dir.path())],
        IndexConfig::default()
            .with_path(index.to_str().unwrap())
            .with_aliases(["fs_1"]),
    )
    .unwrap();
    gateway.init().await.unwrap();
    std::fs::remove_dir_all(&root).unwrap();

    let payload = WritePayload {
        id: "nowhere".into(),
        data: "QUJD".into(),
    };
    let refusal = gateway.write_object(&payload, None).await.unwrap_err();
    assert!(matches!(refusal, GatewayError::NoBackendOnline));
    assert_eq!(status_for(&refusal), 503);
}

#[tokio::test]
async fn test_restart_durability() {
    let dir = tempfile::tempdir().unwrap();

    {
        let gateway = gateway(dir.path());
        gateway.init().await.unwrap();
        let payload = WritePayload {
            id: "hello.txt".into(),
            data: "SGVsbG8gV29ybGQh".into(),
        };
        gateway.write_object(&payload, None).await.unwrap();
        gateway.close().await.unwrap();
    }

    // Fresh sockets and frontend over the same files.
    let gateway = gateway(dir.path());
    gateway.init().await.unwrap();

    let stored = gateway
        .read_object("hello.txt", None)
        .await
        .unwrap()
        .expect("blob must survive a restart");
    assert_eq!(stored.data, b"Hello World!");
    assert_eq!(stored.metadata.size, 12);
}

#[tokio::test]
async fn test_readiness_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path());

    assert_eq!(gateway.is_ready().state(), PromiseState::Pending);
    gateway.init().await.unwrap();
    assert!(gateway.is_ready().wait().await.unwrap());

    gateway.close().await.unwrap();
    assert!(matches!(
        gateway.is_ready().wait().await,
        Err(GatewayError::Closed)
    ));
}

use std::net::SocketAddr;
use std::sync::Arc;

use streamer_server::storage::Storage;
use streamer_server::{AppState, router};

async fn spawn_server() -> (SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::new(dir.path().to_path_buf()).await.unwrap());
    let app = router(AppState { storage });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, dir)
}

#[tokio::test]
async fn upload_then_download_roundtrip() {
    let (addr, dir) = spawn_server().await;
    let client = reqwest::Client::new();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let resp = client
        .post(format!("http://{}/upload/blob.bin", addr))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["bytes"], 200_000);
    assert_eq!(body["sha256"].as_str().unwrap().len(), 64);
    assert!(dir.path().join("blob.bin").is_file());

    let resp = client
        .get(format!("http://{}/download/blob.bin", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.content_length(), Some(200_000));
    assert_eq!(resp.bytes().await.unwrap().as_ref(), payload.as_slice());
}

#[tokio::test]
async fn default_name_accepts_put() {
    let (addr, dir) = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("http://{}/upload", addr))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(std::fs::read(dir.path().join("stream.bin")).unwrap(), b"hello");

    let resp = client
        .get(format!("http://{}/download", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "hello");
}

#[tokio::test]
async fn missing_file_is_404() {
    let (addr, _dir) = spawn_server().await;
    let resp = reqwest::get(format!("http://{}/download/nope.bin", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(body["error"], "File not found");
}

#[tokio::test]
async fn health_is_ok() {
    let (addr, _dir) = spawn_server().await;
    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn rejected_uploads_are_answered_after_the_body() {
    let (addr, dir) = spawn_server().await;
    let client = reqwest::Client::new();
    let payload = vec![0x5au8; 4 * 1024 * 1024];

    let resp = client
        .post(format!("http://{}/upload/bad..name", addr))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(body["error"], "Invalid stream name");

    let resp = client
        .put(format!("http://{}/nope", addr))
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use tenant_rag::config::Config;
use tenant_rag::embedding::HashEmbedder;
use tenant_rag::generate::{AnswerGenerator, FallbackGenerator};
use tenant_rag::server;
use tenant_rag::Engine;

async fn start_server(dir: &TempDir) -> String {
    let mut config = Config::with_root(dir.path());
    config.generator.api_key_env = "TRAG_SERVER_TEST_NO_KEY".into();
    let engine = Engine::with_components(
        config,
        Arc::new(HashEmbedder::new(128)),
        AnswerGenerator::Fallback(FallbackGenerator),
    )
    .await
    .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, Arc::new(engine)));
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_app_lifecycle_over_http() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/apps", base))
        .json(&json!({ "appId": "CSS", "name": "CSS Docs" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let app: Value = resp.json().await.unwrap();
    assert_eq!(app["appId"], "css");
    assert_eq!(app["status"], "CREATED");

    // Not trained yet
    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({ "appId": "css", "message": "What is CSS?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "app_not_ready");

    // Nothing to train on
    let resp = client
        .post(format!("{}/api/apps/css/train", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "no_documents");

    let resp = client
        .put(format!("{}/api/apps/css/files/doc1.txt", base))
        .body("CSS is a style sheet language.")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let file: Value = resp.json().await.unwrap();
    assert_eq!(file["sizeBytes"], 30);

    let resp = client
        .put(format!("{}/api/apps/css/files/notes.pdf", base))
        .body("%PDF")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let files: Value = client
        .get(format!("{}/api/apps/css/files", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(files["files"].as_array().unwrap().len(), 1);

    let report: Value = client
        .post(format!("{}/api/apps/css/train", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["documents"], 1);
    assert_eq!(report["chunks"], 1);
    assert_eq!(report["status"], "READY");

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({ "appId": "css", "message": "What is CSS?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert!(answer["answer"].as_str().unwrap().contains("style sheet"));
    assert_eq!(answer["sources"], json!(["doc1.txt"]));

    let resp = client
        .delete(format!("{}/api/apps/css", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/api/apps/css", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_conflicts_and_validation() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir).await;
    let client = reqwest::Client::new();

    let create = |id: &'static str| {
        client
            .post(format!("{}/api/apps", base))
            .json(&json!({ "appId": id, "name": "x" }))
            .send()
    };

    assert_eq!(create("docs").await.unwrap().status(), 201);
    let resp = create("docs").await.unwrap();
    assert_eq!(resp.status(), 409);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "app_exists");

    let resp = create("no spaces allowed").await.unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "invalid_app_id");

    let resp = client
        .post(format!("{}/api/chat", base))
        .json(&json!({ "appId": "docs", "message": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "empty_message");

    let apps: Value = client
        .get(format!("{}/api/apps", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(apps["apps"].as_array().unwrap().len(), 1);
}

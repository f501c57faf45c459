//! End-to-end HTTP tests against a real SQLite knowledge base with stub
//! embedding and language models.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use virtual_ta::config::{load_config, Config};
use virtual_ta::server::{router, AppState};
use virtual_ta::sqlite_store::{load_store, replace_knowledge_base};
use virtual_ta::{db, migrate};
use virtual_ta_core::answer::{LanguageModel, Orchestrator};
use virtual_ta_core::embedding::Embedder;
use virtual_ta_core::error::{EmbeddingError, UpstreamError};
use virtual_ta_core::models::{ChunkRow, SourceType};
use virtual_ta_core::prompt::Prompt;
use virtual_ta_core::store::{EmbeddingSpec, StoreHandle, StoreManifest};

const DOCKER_URL: &str = "https://tds.s-anand.net/#/docker";
const FORUM_URL: &str = "https://discourse.onlinedegree.iitm.ac.in/t/42/2";
const PYTHON_URL: &str = "https://tds.s-anand.net/#/python";

/// Maps keywords to fixed directions so similarity is predictable.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if t.contains("docker") || t.contains("podman") {
                    vec![1.0, 0.0]
                } else if t.contains("python") {
                    vec![0.0, 1.0]
                } else {
                    vec![-1.0, 0.0]
                }
            })
            .collect())
    }
}

struct CannedModel {
    reply: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl CannedModel {
    fn new(reply: &str, delay: Duration) -> Self {
        Self {
            reply: reply.to_string(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }
    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError> {
        assert!(prompt.user.contains("Context:"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

fn row(id: &str, source_type: SourceType, url: &str, text: &str, embedding: [f32; 2]) -> ChunkRow {
    ChunkRow {
        id: id.to_string(),
        source_type,
        text: text.to_string(),
        url: url.to_string(),
        embedding: embedding.to_vec(),
        title: None,
        created_at: None,
    }
}

fn seed_rows() -> Vec<ChunkRow> {
    let podman = "Yes, podman works fine for the project.";
    vec![
        row("c1", SourceType::Course, DOCKER_URL, "Install Docker Desktop or Podman.", [1.0, 0.0]),
        row("f1", SourceType::Forum, FORUM_URL, podman, [0.9, 0.1]),
        row("c2", SourceType::Course, PYTHON_URL, "Use uv to manage Python.", [0.0, 1.0]),
    ]
}

fn manifest() -> StoreManifest {
    StoreManifest {
        embedding_model: Some("stub".to_string()),
        embedding_dims: Some(2),
    }
}

fn write_config(tmp: &TempDir) -> Config {
    let path = tmp.path().join("vta.toml");
    std::fs::write(
        &path,
        format!(
            "[db]\npath = \"{}/kb.sqlite\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();
    load_config(&path).unwrap()
}

async fn seed(config: &Config, rows: &[ChunkRow]) {
    let pool = db::connect(config).await.unwrap();
    migrate::create_schema(&pool).await.unwrap();
    replace_knowledge_base(&pool, rows, &manifest()).await.unwrap();
    pool.close().await;
}

struct TestServer {
    base: String,
    model: Arc<CannedModel>,
    config: Config,
    _tmp: TempDir,
}

async fn spawn_server(reply: &str) -> TestServer {
    spawn_server_with(CannedModel::new(reply, Duration::ZERO), |state| state).await
}

async fn spawn_server_with(
    model: CannedModel,
    customize: impl FnOnce(AppState) -> AppState,
) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let config = write_config(&tmp);
    seed(&config, &seed_rows()).await;

    let spec = EmbeddingSpec {
        model: "stub".to_string(),
        dims: 2,
    };
    let store = load_store(&config.db.path, Some(&spec)).await.unwrap();
    let model = Arc::new(model);
    let orchestrator = Orchestrator::new(
        Arc::new(KeywordEmbedder),
        model.clone(),
        config.answer_settings(),
    );
    let state = AppState::new(
        Arc::new(StoreHandle::new(store)),
        orchestrator,
        PathBuf::from(&config.db.path),
    )
    .with_expected_embedding(spec);
    let state = customize(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        model,
        config,
        _tmp: tmp,
    }
}

async fn post_query(server: &TestServer, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/query", server.base))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

const GOOD_REPLY: &str = "Answer:\nPodman is fine; the course page lists it as an alternative.\n\nSources:\n1. URL: https://tds.s-anand.net/#/docker, Text: Install Docker Desktop or Podman.\n2. URL: https://discourse.onlinedegree.iitm.ac.in/t/42/2, Text: podman works fine";

#[tokio::test]
async fn test_health_reports_partition_counts() {
    let server = spawn_server(GOOD_REPLY).await;

    let body: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["course_chunks"], 2);
    assert_eq!(body["forum_chunks"], 1);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_query_returns_verified_links() {
    let server = spawn_server(GOOD_REPLY).await;

    let (status, body) =
        post_query(&server, json!({"question": "Can I use podman instead?"})).await;
    assert_eq!(status, 200, "body: {}", body);
    assert!(body["answer"].as_str().unwrap().contains("Podman is fine"));
    let links = body["links"].as_array().unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0]["url"], DOCKER_URL);
    assert_eq!(links[1]["url"], FORUM_URL);
    assert_eq!(server.model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_with_image_text() {
    let server = spawn_server(GOOD_REPLY).await;

    let (status, _) = post_query(
        &server,
        json!({
            "question": "What does this error mean?",
            "image_text": "docker: command not found"
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(server.model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_without_relevant_context_skips_model() {
    let server = spawn_server(GOOD_REPLY).await;

    let (status, body) = post_query(&server, json!({"question": "When is the exam?"})).await;
    assert_eq!(status, 200);
    assert!(body["links"].as_array().unwrap().is_empty());
    assert_eq!(server.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_question_is_bad_request() {
    let server = spawn_server(GOOD_REPLY).await;

    let (status, body) = post_query(&server, json!({"question": "   "})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = spawn_server(GOOD_REPLY).await;

    let (status, body) = post_query(&server, json!({"image": "abc"})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_unstructured_reply_is_response_format_error() {
    let server = spawn_server("Sure, podman is fine.").await;

    let (status, body) = post_query(&server, json!({"question": "Can I use podman?"})).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "response_format");
}

#[tokio::test]
async fn test_hallucinated_link_rejected() {
    let server = spawn_server(
        "Answer:\nYes.\n\nSources:\n1. URL: https://example.com/made-up, Text: trust me",
    )
    .await;

    let (status, body) = post_query(&server, json!({"question": "Can I use podman?"})).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "response_format");
}

#[tokio::test]
async fn test_reload_swaps_store() {
    let server = spawn_server(GOOD_REPLY).await;

    let mut rows = seed_rows();
    rows.push(row(
        "f2",
        SourceType::Forum,
        "https://discourse.onlinedegree.iitm.ac.in/t/43/1",
        "Docker compose questions.",
        [1.0, 0.0],
    ));
    seed(&server.config, &rows).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/admin/reload", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["course_chunks"], 2);
    assert_eq!(body["forum_chunks"], 2);

    let health: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["forum_chunks"], 2);
}

#[tokio::test]
async fn test_failed_reload_keeps_current_store() {
    let server = spawn_server(GOOD_REPLY).await;
    std::fs::remove_file(&server.config.db.path).unwrap();

    let resp = reqwest::Client::new()
        .post(format!("{}/admin/reload", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "internal");

    let health: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["course_chunks"], 2);
}

#[tokio::test]
async fn test_large_screenshot_does_not_fail_request() {
    let server = spawn_server(GOOD_REPLY).await;

    let image = "A".repeat(3_000_000);
    let (status, body) = post_query(
        &server,
        json!({"question": "Can I use podman?", "image": image}),
    )
    .await;
    assert_eq!(status, 200, "body: {}", body);
    assert_eq!(body["links"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_body_over_configured_limit_is_rejected() {
    let server = spawn_server_with(CannedModel::new(GOOD_REPLY, Duration::ZERO), |state| {
        state.with_body_limit(1024)
    })
    .await;

    let (status, body) = post_query(
        &server,
        json!({"question": "Can I use podman?", "image": "A".repeat(4096)}),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(server.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_slow_model_hits_request_timeout() {
    let server = spawn_server_with(
        CannedModel::new(GOOD_REPLY, Duration::from_secs(5)),
        |state| state.with_request_timeout(Duration::from_secs(1)),
    )
    .await;

    let (status, body) = post_query(&server, json!({"question": "Can I use podman?"})).await;
    assert_eq!(status, 504);
    assert_eq!(body["error"]["code"], "timeout");
    assert_eq!(server.model.calls.load(Ordering::SeqCst), 1);
}

use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::services::ai_client::{CompletionBackend, CompletionRequest, RemoteError};
use crate::services::generation::{QuestionGenerator, RetryPolicy};

const TEST_DATABASE_URL: &str = "sqlite::memory:";
const TEST_API_KEY: &str = "sk-test";
const MULTIPART_BOUNDARY: &str = "question-paper-test-boundary";

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("PAPER_ENV", "test");
    std::env::set_var("PAPER_STRICT_CONFIG", "0");
    std::env::set_var("DATABASE_URL", TEST_DATABASE_URL);
    std::env::set_var("XAI_API_KEY", TEST_API_KEY);
    std::env::set_var("AI_RETRY_BASE_MS", "1");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("AI_MAX_ATTEMPTS");
    std::env::remove_var("PAPER_PORT");
    std::env::remove_var("BACKEND_CORS_ORIGINS");
}

/// Completion backend that answers every call with the same envelope.
pub(crate) struct StaticBackend {
    body: Value,
}

impl StaticBackend {
    pub(crate) fn new(body: Value) -> Arc<Self> {
        Arc::new(Self { body })
    }
}

#[async_trait]
impl CompletionBackend for StaticBackend {
    async fn complete(
        &self,
        _api_key: &str,
        _request: &CompletionRequest,
    ) -> Result<Value, RemoteError> {
        Ok(self.body.clone())
    }
}

pub(crate) fn completion_body(items: Value) -> Value {
    json!({"choices": [{"message": {"role": "assistant", "content": items.to_string()}}]})
}

pub(crate) fn sample_completion() -> Value {
    completion_body(json!([
        {
            "question": "Which protocol guarantees ordered delivery?",
            "type": "Multiple Choice",
            "difficulty": "Medium",
            "blooms_level": "Remember",
            "topic": "Networking",
            "options": ["UDP", "TCP", "ICMP", "ARP"],
            "answer": "TCP"
        },
        {
            "question": "Explain the purpose of a subnet mask.",
            "type": "Short Answer",
            "answer": "It separates network and host bits."
        }
    ]))
}

pub(crate) fn test_generator(backend: Arc<dyn CompletionBackend>, settings: &Settings) -> QuestionGenerator {
    QuestionGenerator::new(backend, settings.ai())
        .expect("generator")
        .with_retry_policy(RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1) })
}

pub(crate) async fn setup_test_context() -> TestContext {
    setup_test_context_with_backend(StaticBackend::new(sample_completion())).await
}

pub(crate) async fn setup_test_context_with_backend(
    backend: Arc<dyn CompletionBackend>,
) -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let db = crate::db::init_pool(&settings).await.expect("db pool");
    crate::db::run_migrations(&db).await.expect("migrations");

    let generator = test_generator(backend, &settings);
    let state = AppState::new(settings, db, generator);
    let app = api::router::router(state.clone());

    TestContext { state, app, _guard: guard }
}

/// Fresh migrated in-memory database, independent of the environment.
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str(TEST_DATABASE_URL)
        .expect("sqlite url")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("sqlite pool");
    crate::db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub(crate) fn json_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

/// `multipart/form-data` POST with text fields and an optional `file` part.
pub(crate) fn multipart_request(
    uri: &str,
    fields: &[(&str, &str)],
    file: Option<(&str, &[u8])>,
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, contents)) = file {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(contents);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"))
        .body(Body::from(body))
        .expect("request body")
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}

pub(crate) async fn read_bytes(response: axum::response::Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.expect("response body").to_vec()
}

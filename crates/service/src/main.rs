use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ibtikar_rag::{
    detect_language, no_context_reply, Chunk, GroundedPrompt, Lang, LazyRetriever, PromptOptions,
    RagError, Retrieval, RetrievalConfig, RetrievalTrace,
};

const DEFAULT_TIMEOUT_MS: u64 = 15_000;

#[derive(Clone)]
struct AppState {
    retriever: Arc<LazyRetriever>,
    default_top_k: usize,
    deadline: Duration,
    prompt: PromptOptions,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RetrievalConfig::from_env()?;
    let default_top_k = config.top_k;
    let deadline = retrieve_deadline(std::env::var("RETRIEVE_TIMEOUT_MS").ok())?;
    let lazy_load = std::env::var("LAZY_LOAD")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    let retriever = Arc::new(LazyRetriever::new(config));
    if !lazy_load {
        let warm = Arc::clone(&retriever);
        task::spawn_blocking(move || warm.get().map(|_| ())).await??;
    }
    let state = AppState {
        retriever,
        default_top_k,
        deadline,
        prompt: PromptOptions::from_env(),
    };
    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Unset falls back to the default; anything else must be a positive
/// millisecond count.
fn retrieve_deadline(raw: Option<String>) -> Result<Duration, RagError> {
    let Some(raw) = raw else {
        return Ok(Duration::from_millis(DEFAULT_TIMEOUT_MS));
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(RagError::InvalidConfig(format!(
            "RETRIEVE_TIMEOUT_MS must be a positive integer, got {raw:?}"
        ))),
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/retrieve", post(handle_retrieve))
        .route("/context", post(handle_context))
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    query: String,
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RetrieveResponse {
    chunks: Vec<Chunk>,
    trace: RetrievalTrace,
}

#[derive(Debug, Serialize)]
struct ContextResponse {
    lang: Lang,
    system: Option<String>,
    prompt: Option<String>,
    sources: Vec<String>,
    fallback_reply: Option<String>,
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "loaded": state.retriever.is_loaded(),
    }))
}

async fn handle_retrieve(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    let top_k = body.top_k.unwrap_or(state.default_top_k);
    let retrieval = run_retrieval(&state, body.query, top_k).await?;
    Ok(Json(RetrieveResponse {
        chunks: retrieval.chunks,
        trace: retrieval.trace,
    }))
}

async fn handle_context(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RetrieveRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    let top_k = body.top_k.unwrap_or(state.default_top_k);
    let question = body.query.clone();
    let retrieval = run_retrieval(&state, body.query, top_k).await?;
    let response = match GroundedPrompt::compose(&question, &retrieval.chunks, &state.prompt) {
        Some(prompt) => ContextResponse {
            lang: prompt.lang,
            system: Some(prompt.system),
            prompt: Some(prompt.user),
            sources: prompt.sources,
            fallback_reply: None,
        },
        None => {
            let lang = detect_language(&question);
            ContextResponse {
                lang,
                system: None,
                prompt: None,
                sources: Vec::new(),
                fallback_reply: Some(no_context_reply(lang).to_string()),
            }
        }
    };
    Ok(Json(response))
}

/// Runs retrieval off the async runtime under the configured deadline.
async fn run_retrieval(state: &AppState, query: String, top_k: usize) -> Result<Retrieval, AppError> {
    if top_k == 0 {
        return Err(AppError::bad_request("top_k must be > 0"));
    }
    let retriever = Arc::clone(&state.retriever);
    let job = task::spawn_blocking(move || {
        retriever
            .get()
            .and_then(|r| r.retrieve_with_trace(&query, top_k))
    });
    match tokio::time::timeout(state.deadline, job).await {
        Ok(joined) => Ok(joined.map_err(AppError::internal)??),
        Err(_) => Err(AppError::Timeout(state.deadline)),
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("retrieval exceeded {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Retrieval(#[from] RagError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    fn internal<E: Into<anyhow::Error>>(err: E) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Retrieval(RagError::InvalidArgument(msg)) => {
                (StatusCode::BAD_REQUEST, msg).into_response()
            }
            AppError::Timeout(deadline) => {
                error!(?deadline, "retrieval deadline exceeded");
                (StatusCode::GATEWAY_TIMEOUT, "retrieval timed out").into_response()
            }
            AppError::Retrieval(err) => {
                error!("retrieval_error" = %err);
                (StatusCode::INTERNAL_SERVER_ERROR, "retrieval failed").into_response()
            }
            AppError::Internal(err) => {
                error!("internal_error" = %err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use ibtikar_core::{HashEmbedder, HashEmbedderConfig};
    use ibtikar_index::{ChunkStore, FlatL2Index};
    use ibtikar_rag::Retriever;

    fn demo_retriever() -> ibtikar_rag::Result<Retriever> {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 32,
            seed: 3,
        });
        let chunks = vec![
            Chunk::new("https://ibtikar.org.tr/", "Ibtikar was founded in 2022."),
            Chunk::new("https://evil.example/", "Unrelated text."),
        ];
        let rows: Vec<Vec<f32>> = chunks.iter().map(|c| embedder.embed_text(&c.text)).collect();
        Retriever::builder(
            Arc::new(embedder),
            Arc::new(FlatL2Index::from_rows(32, &rows)?),
            Arc::new(ChunkStore::new(chunks)),
        )
        .build()
    }

    fn state_with(lazy: LazyRetriever, deadline: Duration) -> AppState {
        AppState {
            retriever: Arc::new(lazy),
            default_top_k: 6,
            deadline,
            prompt: PromptOptions::default(),
        }
    }

    async fn post_json(router: Router, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    #[test]
    fn deadline_env_is_validated() {
        assert_eq!(retrieve_deadline(None).unwrap(), Duration::from_millis(15_000));
        assert_eq!(
            retrieve_deadline(Some(" 2500 ".into())).unwrap(),
            Duration::from_millis(2500)
        );
        assert!(matches!(
            retrieve_deadline(Some("soon".into())),
            Err(RagError::InvalidConfig(_))
        ));
        assert!(matches!(
            retrieve_deadline(Some("0".into())),
            Err(RagError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn retrieve_returns_allowed_chunks() {
        let state = state_with(LazyRetriever::with_loader(demo_retriever), Duration::from_secs(5));
        let (status, body) = post_json(
            app(state),
            "/retrieve",
            serde_json::json!({"query": "When was Ibtikar founded?", "top_k": 1}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["chunks"][0]["source"], "https://ibtikar.org.tr/");
        assert_eq!(value["trace"]["fallback"], false);
    }

    #[tokio::test]
    async fn zero_top_k_is_bad_request() {
        let state = state_with(LazyRetriever::with_loader(demo_retriever), Duration::from_secs(5));
        let (status, _) = post_json(app(state), "/retrieve", serde_json::json!({"query": "x", "top_k": 0})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn slow_retrieval_times_out() {
        let lazy = LazyRetriever::with_loader(|| {
            std::thread::sleep(Duration::from_millis(300));
            demo_retriever()
        });
        let state = state_with(lazy, Duration::from_millis(10));
        let (status, _) = post_json(app(state), "/retrieve", serde_json::json!({"query": "x"})).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn load_failure_is_server_error() {
        let lazy = LazyRetriever::with_loader(|| Err(RagError::Index("missing index".into())));
        let state = state_with(lazy, Duration::from_secs(5));
        let (status, _) = post_json(app(state), "/retrieve", serde_json::json!({"query": "x"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn context_builds_grounded_prompt() {
        let state = state_with(LazyRetriever::with_loader(demo_retriever), Duration::from_secs(5));
        let (status, body) = post_json(
            app(state),
            "/context",
            serde_json::json!({"query": "When was Ibtikar founded?", "top_k": 1}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["lang"], "en");
        assert!(value["prompt"].as_str().unwrap().contains("Ibtikar was founded in 2022."));
        assert_eq!(value["sources"][0], "https://ibtikar.org.tr/");
        assert!(value["fallback_reply"].is_null());
    }
}

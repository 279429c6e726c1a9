use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use docrag::logging;
use docrag::{
    build_pipeline, AskOutcome, ConversationTurn, Document, Pipeline, PipelineArgs,
    ProviderArgs, RetrieveError, ScoredChunk, Session, Stage,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "docrag-api",
    about = "HTTP API for asking questions about uploaded documents"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "DOCRAG_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Largest accepted upload, in megabytes.
    #[arg(long, env = "DOCRAG_MAX_UPLOAD_MB", default_value_t = 64)]
    max_upload_mb: usize,

    /// Maximum top-k allowed per /v1/query request.
    #[arg(long, default_value_t = 20)]
    max_top_k: usize,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    providers: ProviderArgs,
}

/// Pipeline and session behind one lock so submissions run one at a time.
struct Workspace {
    pipeline: Pipeline,
    session: Session,
}

#[derive(Clone)]
struct AppState {
    workspace: Arc<Mutex<Workspace>>,
    default_top_k: usize,
    max_top_k: usize,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    answer: String,
    recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_at: Option<Stage>,
    warnings: Vec<String>,
    history: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    chunks: Vec<ScoredChunk>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    top_k: usize,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    turns: Vec<ConversationTurn>,
    rendered: String,
}

#[derive(Debug, Serialize)]
struct EndSessionResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    logging::init(logging::DEFAULT_FILTER);
    let cli = ApiCli::parse();

    let pipeline = build_pipeline(&cli.pipeline, &cli.providers)?;
    let default_top_k = pipeline.settings().top_k;
    let state = AppState {
        workspace: Arc::new(Mutex::new(Workspace {
            pipeline,
            session: Session::new(),
        })),
        default_top_k,
        max_top_k: cli.max_top_k.max(1),
    };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/ask", post(ask_handler))
        .route("/v1/query", post(query_handler))
        .route("/v1/history", get(history_handler))
        .route("/v1/session/end", post(end_session_handler))
        .layer(DefaultBodyLimit::max(cli.max_upload_mb.max(1) * 1024 * 1024))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    info!(%addr, "docrag-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn ask_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AskResponse>, ApiError> {
    let mut documents = Vec::new();
    let mut question = String::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| bad_request(format!("invalid multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("upload-{}", documents.len() + 1));
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| bad_request(format!("failed to read {file_name}: {err}")))?;
                documents.push(Document::new(file_name, bytes.to_vec()));
            }
            "question" => {
                question = field
                    .text()
                    .await
                    .map_err(|err| bad_request(format!("invalid question field: {err}")))?;
            }
            other => warn!(field = other, "ignoring unknown multipart field"),
        }
    }

    let mut workspace = state.workspace.clone().lock_owned().await;
    let (outcome, history) = tokio::task::spawn_blocking(move || {
        let Workspace { pipeline, session } = &mut *workspace;
        let outcome: AskOutcome = pipeline.ask(session, &documents, &question);
        (outcome, session.render())
    })
    .await
    .map_err(|err| internal_error(format!("ask task join error: {err}")))?;

    Ok(Json(AskResponse {
        answer: outcome.message,
        recorded: outcome.recorded,
        failed_at: outcome.failed_at,
        warnings: outcome.warnings,
        history,
    }))
}

async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    let top_k = request
        .top_k
        .unwrap_or(state.default_top_k)
        .clamp(1, state.max_top_k);
    let start = Instant::now();
    let workspace = state.workspace.clone().lock_owned().await;
    let result = tokio::task::spawn_blocking(move || workspace.pipeline.query(&request.query, top_k))
        .await
        .map_err(|err| internal_error(format!("query task join error: {err}")))?;
    let chunks = result.map_err(|err| match err {
        RetrieveError::NotReady => (
            StatusCode::CONFLICT,
            Json(ErrorBody {
                message: err.to_string(),
            }),
        ),
        RetrieveError::EmptyQuery => bad_request(err.to_string()),
        other => internal_error(other.to_string()),
    })?;
    Ok(Json(QueryResponse {
        chunks,
        meta: ResponseMeta {
            top_k,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
    }))
}

async fn history_handler(State(state): State<AppState>) -> Json<HistoryResponse> {
    let workspace = state.workspace.lock().await;
    Json(HistoryResponse {
        turns: workspace.session.turns().to_vec(),
        rendered: workspace.session.render_text(),
    })
}

async fn end_session_handler(State(state): State<AppState>) -> Json<EndSessionResponse> {
    let mut workspace = state.workspace.lock().await;
    let message = workspace.session.clear().to_string();
    info!("session cleared");
    Json(EndSessionResponse { message })
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Config,
    errors::{AppError, AppResult},
    middleware::request_context,
    providers::{
        GenerateRequest, Provider, ProviderRegistry, ResponseKind, TaskHandle, build_request,
        registry::ProviderProfile,
        stream::relay_sse,
        task::TaskSnapshot,
    },
};

/// 应用程序状态 - 在所有请求处理器之间共享
///
/// 核心组件本身无状态：注册表在启动时解析一次，之后只读
#[derive(Clone)]
pub struct AppState {
    /// 应用程序配置（只读共享）
    pub config: Arc<Config>,
    /// HTTP客户端，用于与上游提供商通信
    pub http_client: Client,
    /// 提供商注册表（静态路由表）
    pub registry: Arc<ProviderRegistry>,
}

impl AppState {
    /// Create new application state from configuration
    pub fn new(config: Config) -> AppResult<Self> {
        // Connect timeout only: streamed chat responses and video-task
        // creation can legitimately outlive any total-request deadline.
        let http_client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(
                config.server.connect_timeout_seconds,
            ))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let registry = Arc::new(ProviderRegistry::new(&config.endpoints));

        Ok(Self {
            config: Arc::new(config),
            http_client,
            registry,
        })
    }
}

/// Create the main application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.server.max_request_size_bytes;

    Router::new()
        // Uniform generation endpoint: chat streaming, image, video
        .route("/api/chat", post(generate_handler))
        // Video task status
        .route("/api/chat/task/{task_id}", get(task_status_handler))
        // Health check
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // The caller is a browser page served from another origin
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn(request_context)),
        )
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> AppResult<()> {
    let app_state = AppState::new(config.clone())?;
    let app = create_app(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

    tracing::info!("Chat proxy server starting on {}", addr);
    tracing::info!("Available endpoints:");
    tracing::info!("  POST /api/chat - Chat / image / video generation");
    tracing::info!("  GET  /api/chat/task/{{task_id}} - Video task status");
    tracing::info!("  GET  /health - System health check");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

// Request Handlers

/// Handle generation requests for every provider and model class.
///
/// Validation runs before provider dispatch; an unknown provider or a
/// missing field never reaches the network.
async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> AppResult<Response> {
    request.validate()?;
    let provider = Provider::parse(&request.provider)?;
    let profile = state.registry.resolve(provider, &request.model);

    tracing::info!(
        provider = %provider,
        model = %request.model,
        url = %profile.url,
        kind = ?profile.kind,
        "dispatching generation request"
    );

    let prepared = build_request(&profile, &request)?;

    let response = state
        .http_client
        .post(&prepared.url)
        .headers(prepared.headers.clone())
        .json(&prepared.body)
        .send()
        .await
        .map_err(|e| AppError::internal(format!("Failed to reach provider API: {}", e)))?;

    let status = response.status();
    tracing::info!(status = status.as_u16(), "provider responded");

    if !status.is_success() {
        let details = response.text().await.unwrap_or_default();
        tracing::warn!(
            provider = %provider,
            model = %request.model,
            status = status.as_u16(),
            "provider returned an error"
        );
        return Err(AppError::Upstream {
            status: status.as_u16(),
            details,
            provider: provider.as_str().to_string(),
            model: request.model.clone(),
        });
    }

    match profile.kind {
        ResponseKind::ImageJson => image_response(response).await,
        ResponseKind::VideoTask => video_task_response(&profile, response).await,
        ResponseKind::StreamingText => Ok(stream_response(response)),
    }
}

/// Image generation/editing: the upstream JSON is returned as-is.
async fn image_response(response: reqwest::Response) -> AppResult<Response> {
    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::internal(format!("Failed to parse image response: {}", e)))?;
    Ok(Json(body).into_response())
}

/// Video creation: project the upstream job into `{data: {task_id, status}}`.
async fn video_task_response(
    profile: &ProviderProfile,
    response: reqwest::Response,
) -> AppResult<Response> {
    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::internal(format!("Failed to parse video task response: {}", e)))?;

    let handle = TaskHandle::from_creation_response(profile.provider, &body)?;
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("queued");

    tracing::info!(task_id = %handle.task_id, status, "video task created");

    Ok(Json(json!({
        "data": {
            "task_id": handle.task_id,
            "status": status,
        }
    }))
    .into_response())
}

/// Chat streaming: re-frame the upstream bytes into uniform SSE.
fn stream_response(response: reqwest::Response) -> Response {
    let stream = relay_sse(response.bytes_stream());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Handle video task status queries.
///
/// The API key arrives as a bearer token; the upstream reply is reshaped
/// into `{data: {task_id, status, video_url, video_params}}` with a
/// top-level `error` field when the task failed.
async fn task_status_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let api_key = bearer_token(&headers)?;

    if task_id.is_empty() {
        return Err(AppError::validation("Task ID is required"));
    }

    let url = state.registry.task_status_url(&task_id);
    let response = state
        .http_client
        .get(&url)
        .bearer_auth(api_key)
        .send()
        .await
        .map_err(|e| AppError::internal(format!("Failed to reach provider API: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let details = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream {
            status: status.as_u16(),
            details,
            provider: Provider::Doubao.as_str().to_string(),
            model: String::new(),
        });
    }

    let snapshot: TaskSnapshot = response
        .json()
        .await
        .map_err(|e| AppError::internal(format!("Failed to parse task status: {}", e)))?;

    let mut video_url = Value::Null;
    let mut video_params = snapshot.video_params.clone().unwrap_or(Value::Null);

    if snapshot.status == "succeeded" {
        if let Some(content) = &snapshot.content {
            if let Some(url) = &content.video_url {
                video_url = Value::String(url.clone());
            }
            if let Some(params) = &content.video_parameters {
                video_params = params.clone();
            }
        }
    }

    let data = json!({
        "task_id": snapshot.id.clone().unwrap_or(task_id),
        "status": snapshot.status,
        "video_url": video_url,
        "video_params": video_params,
    });

    if snapshot.status == "failed" {
        if let Some(error) = &snapshot.error {
            return Ok(Json(json!({ "data": data, "error": error })));
        }
    }

    Ok(Json(json!({ "data": data })))
}

/// Handle system health check
async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let response = json!({
        "status": "healthy",
        "service": "chat-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "providers_supported": ["siliconflow", "openai", "anthropic", "doubao"],
        "poll_interval_seconds": state.config.poller.interval_seconds,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(response))
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|key| !key.is_empty())
        .ok_or(AppError::Unauthorized)
}

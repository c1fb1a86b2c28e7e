// Alias gateway API server
// Decision: engine selection via ALIAS_ENGINE_URL - remote HTTP engine when
// set, simulated engine otherwise (local development and demos)

mod chat;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use alias_contracts::{
    AgentRequest, ChatMode, ChatRequest, ContentEvent, ContentKind, ContentPart, ErrorPayload,
    MessageEvent, MessageKind, ResponseEnvelope, Role, RunStatus, Sequenced, StopChatPayload,
    StopChatResponse, StreamEvent, Usage,
};
use alias_core::{
    ChatBackend, HttpChatBackend, ResponseRunner, RunnerConfig, SimulatedBackend,
    StaticConversations,
};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    engine: String,
    chat_mode: String,
}

/// State for health endpoint
#[derive(Clone)]
struct HealthState {
    engine: String,
    chat_mode: String,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        engine: state.engine.clone(),
        chat_mode: state.chat_mode.clone(),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        chat::create_response,
        chat::chat_native,
        chat::stop_chat,
    ),
    components(
        schemas(
            AgentRequest, ChatRequest, ChatMode,
            Sequenced, StreamEvent, ResponseEnvelope, MessageEvent, ContentEvent,
            ContentPart, ContentKind, MessageKind, Role, RunStatus, ErrorPayload, Usage,
            StopChatResponse, StopChatPayload,
        )
    ),
    tags(
        (name = "chat", description = "Chat streaming endpoints (SSE)")
    ),
    info(
        title = "Alias Gateway API",
        version = "0.2.0",
        description = "Streams chat engine output to web clients as canonical or native SSE events",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alias_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("alias-api starting...");

    // Default chat mode for requests that don't specify one
    let chat_mode: ChatMode = std::env::var("ALIAS_CHAT_MODE")
        .unwrap_or_else(|_| "general".to_string())
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid ALIAS_CHAT_MODE: {err}"))?;

    // Select the chat engine
    let (backend, engine_label): (Arc<dyn ChatBackend>, String) =
        match std::env::var("ALIAS_ENGINE_URL") {
            Ok(url) if !url.is_empty() => {
                tracing::info!(engine_url = %url, "using remote chat engine");
                let mut engine = HttpChatBackend::new(url.clone());
                if let Ok(api_key) = std::env::var("ALIAS_ENGINE_API_KEY") {
                    engine = engine.with_api_key(api_key);
                }
                (Arc::new(engine), url)
            }
            _ => {
                tracing::warn!(
                    "ALIAS_ENGINE_URL not set; using the simulated chat engine"
                );
                (Arc::new(SimulatedBackend::new()), "simulated".to_string())
            }
        };

    let config = RunnerConfig {
        default_chat_mode: chat_mode,
        ..RunnerConfig::default()
    };
    tracing::info!(chat_mode = %chat_mode, "runner configured");

    let runner = Arc::new(ResponseRunner::new(
        backend,
        Arc::new(StaticConversations::new()),
        config,
    ));

    let chat_state = chat::AppState::new(runner);
    let health_state = HealthState {
        engine: engine_label,
        chat_mode: chat_mode.to_string(),
    };

    // Load API prefix from environment (default: empty)
    // Example: API_PREFIX="/api" results in routes like /api/v1/responses
    let api_prefix = std::env::var("API_PREFIX").unwrap_or_default();
    if !api_prefix.is_empty() {
        tracing::info!(prefix = %api_prefix, "API prefix configured");
    }

    // Load CORS allowed origins from environment (optional)
    let cors_origins: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| s.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();

    if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
    }

    let api_routes = chat::routes(chat_state);

    let mut app = Router::new().route("/health", get(health).with_state(health_state));
    app = app.merge(build_router_with_prefix(api_routes, &api_prefix));

    // Add Swagger UI
    let app =
        app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    // Add CORS layer only if origins are configured
    let app = if !cors_origins.is_empty() {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::CACHE_CONTROL,
                ])
                .allow_credentials(true),
        )
    } else {
        app
    };

    // Add tracing
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let host = std::env::var("ALIAS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("ALIAS_PORT").unwrap_or_else(|_| "8090".to_string());
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Build router with optional API prefix (extracted for testing)
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

//! HTTP + WebSocket control-surface API
//!
//! Exposes the local surface (catalog, variables, feedbacks) and the action
//! dispatcher of the running device session to external control surfaces.
//! Default port: 8125

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::device::{ConnectionState, DeviceInfo, VersionInfo};
use crate::error::GatewayError;
use crate::orchestrator::Orchestrator;
use crate::surface::{LocalSurface, OptionValues, SurfaceContribution, SurfaceEvent};

/// Shared state for API handlers
pub struct ApiState {
    /// Current device session; swapped when the config forces a rebuild
    session: RwLock<Arc<Orchestrator>>,
    /// Surface host fed by the synchronizers
    pub surface: Arc<LocalSurface>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(session: Arc<Orchestrator>, surface: Arc<LocalSurface>) -> Arc<Self> {
        Arc::new(Self {
            session: RwLock::new(session),
            surface,
            started_at: Utc::now(),
        })
    }

    pub fn session(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.session.read())
    }

    pub fn replace_session(&self, session: Arc<Orchestrator>) {
        *self.session.write() = session;
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connection: ConnectionState,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

/// Feedback evaluation response
#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub id: String,
    pub value: bool,
}

/// API error response
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let status = match &e {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnknownAction(_) | GatewayError::UnknownFeedback(_) => {
                StatusCode::NOT_FOUND
            },
            GatewayError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Http { .. } | GatewayError::Transport(_) | GatewayError::Decode(_) => {
                StatusCode::BAD_GATEWAY
            },
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/definitions", get(definitions))
        .route("/api/actions/:id", post(run_action))
        .route("/api/feedbacks/:id", get(check_feedback))
        .route("/api/variables", get(variables))
        .route("/api/device/version", get(device_version))
        .route("/api/device/info", get(device_info))
        .route("/api/ws", get(events_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /api/health - Liveness plus device connection state
async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok",
        connection: state.session().state(),
        started_at: state.started_at,
        uptime_seconds: (now - state.started_at).num_seconds(),
    })
}

/// GET /api/definitions - Registered actions, feedbacks and variables
async fn definitions(State(state): State<Arc<ApiState>>) -> Json<SurfaceContribution> {
    Json(state.surface.definitions())
}

/// POST /api/actions/:id - Run an action with a JSON object of options
async fn run_action(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(options): Json<OptionValues>,
) -> Result<Json<Value>, ApiError> {
    state.session().handle_action(&id, &options).await?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/feedbacks/:id?channel=n - Evaluate a boolean feedback
async fn check_feedback(
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let options: OptionValues = query
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let value = state.session().check_feedback(&id, &options)?;
    Ok(Json(FeedbackResponse { id, value }))
}

/// GET /api/variables - Latest value of every variable
async fn variables(State(state): State<Arc<ApiState>>) -> Json<BTreeMap<String, Value>> {
    Json(state.surface.variables())
}

/// GET /api/device/version - Firmware version (not cached)
async fn device_version(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<VersionInfo>, ApiError> {
    Ok(Json(state.session().version().await?))
}

/// GET /api/device/info - Device description (not cached)
async fn device_info(State(state): State<Arc<ApiState>>) -> Result<Json<DeviceInfo>, ApiError> {
    Ok(Json(state.session().device_info().await?))
}

/// GET /api/ws - WebSocket stream of surface events
async fn events_ws(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let rx = state.surface.subscribe();
    let initial = SurfaceEvent::Status {
        state: state.surface.status(),
    };
    ws.on_upgrade(move |socket| handle_websocket(socket, initial, rx))
}

async fn send_event(socket: &mut WebSocket, event: &SurfaceEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(msg) => socket.send(Message::Text(msg.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize surface event: {}", e);
            true
        },
    }
}

/// Forward surface events until the client goes away
async fn handle_websocket(
    mut socket: WebSocket,
    initial: SurfaceEvent,
    mut rx: broadcast::Receiver<SurfaceEvent>,
) {
    debug!("WebSocket client connected");

    if !send_event(&mut socket, &initial).await {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Surface event channel closed");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} events", n);
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

/// Start the API server
pub async fn start_server(state: Arc<ApiState>, port: u16) -> Result<()> {
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("🌐 Control-surface API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::device::Verb;
    use crate::testing::{connected_manager, MockTransport};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn make_router(transport: &Arc<MockTransport>) -> Router {
        let config =
            AppConfig::from_yaml("device:\n  host: \"192.168.1.50\"\n  token: \"token\"\n")
                .unwrap();
        let surface = Arc::new(LocalSurface::new());
        let session = Orchestrator::with_connection(
            config,
            connected_manager(transport).await,
            surface.clone(),
        );
        build_router(ApiState::new(session, surface))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_connection() {
        let transport = MockTransport::new();
        let router = make_router(&transport).await;

        let (status, body) = call(&router, "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connection"], "connected");
    }

    #[tokio::test]
    async fn test_action_success_updates_variables() {
        let transport = MockTransport::new();
        transport.respond(Verb::Put, "/settings/channel/1/dsp/volume", 200, json!({}));
        let router = make_router(&transport).await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/actions/volume_ch",
            Some(json!({ "channel": 1, "volume": -20 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (_, vars) = call(&router, "GET", "/api/variables", None).await;
        assert_eq!(vars["volume_ch_1"], -20.0);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let transport = MockTransport::new();
        transport.respond(Verb::Put, "/settings/channel/1/dsp/mute", 500, Value::Null);
        let router = make_router(&transport).await;

        let (status, body) = call(
            &router,
            "POST",
            "/api/actions/mute_ch",
            Some(json!({ "channel": 5, "mute": true })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("channel"));

        let (status, _) = call(&router, "POST", "/api/actions/nope", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &router,
            "POST",
            "/api/actions/mute_ch",
            Some(json!({ "channel": 1, "mute": true })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_not_connected_maps_to_503() {
        let transport = MockTransport::new();
        let config =
            AppConfig::from_yaml("device:\n  host: \"192.168.1.50\"\n  token: \"token\"\n")
                .unwrap();
        let surface = Arc::new(LocalSurface::new());
        let session = Orchestrator::with_connection(
            config,
            connected_manager(&transport).await,
            surface.clone(),
        );
        session.connection().close();
        let router = build_router(ApiState::new(session, surface));

        let (status, _) = call(&router, "GET", "/api/device/version", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_feedback_query() {
        let transport = MockTransport::new();
        let router = make_router(&transport).await;

        let (status, body) = call(&router, "GET", "/api/feedbacks/power?channel=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "id": "power", "value": false }));

        let (status, _) = call(&router, "GET", "/api/feedbacks/power", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_definitions_and_device_reads() {
        let transport = MockTransport::new();
        transport.respond(Verb::Get, "/version", 200, json!({ "version": "2.0.1" }));
        let router = make_router(&transport).await;

        let (_, defs) = call(&router, "GET", "/api/definitions", None).await;
        assert_eq!(defs["actions"].as_array().map(Vec::len), Some(4));
        assert_eq!(defs["feedbacks"][0]["style"]["bgcolor"], json!([255, 0, 0]));

        let (status, version) = call(&router, "GET", "/api/device/version", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(version["version"], "2.0.1");
    }
}

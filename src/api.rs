//! HTTP control surface.
//!
//! Registration, outbound sends, status, deletion and a health check. Every
//! error body is `{"status": "error", "message": ...}`.

use crate::gateway::{Gateway, Registration, RegistrationOutcome, SendRequest};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use wabridge_core::{config::ServerConfig, error::GatewayError, traits::opt_string_or_number};

type ApiError = (StatusCode, Json<Value>);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Gateway>,
    registration_timeout: Duration,
}

/// Registration request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    #[serde(default)]
    phone: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    line_id: Option<String>,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(json!({"status": "error", "message": message.into()})),
    )
}

fn bad_json(rejection: JsonRejection) -> ApiError {
    error_body(StatusCode::BAD_REQUEST, rejection.body_text())
}

/// Map a gateway error onto its HTTP status.
fn gateway_error(e: GatewayError) -> ApiError {
    let status = match e {
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::NotConnected(_) => StatusCode::NOT_FOUND,
        GatewayError::AlreadyExists(_) => StatusCode::CONFLICT,
        GatewayError::Client(_) | GatewayError::Backend(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("request failed: {e}");
    }
    error_body(status, e.to_string())
}

/// `POST /registerwhatsapp`: start pairing, answer with the first outcome.
async fn register(
    State(state): State<ApiState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    let phone = req.phone.trim().to_string();
    if phone.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "'phone' is required"));
    }

    let rx = match state
        .gateway
        .register(&phone, req.line_id.clone())
        .await
        .map_err(gateway_error)?
    {
        Registration::Existing { state: current, line_id } => {
            info!("register {phone}: session already live ({})", current.as_str());
            return Ok(Json(json!({
                "status": "connected",
                "phone": phone,
                "lineId": req.line_id.or(line_id),
            })));
        }
        Registration::Pending(rx) => rx,
    };

    let outcome = tokio::time::timeout(state.registration_timeout, rx)
        .await
        .map_err(|_| {
            warn!("register {phone}: no pairing outcome in time");
            error_body(
                StatusCode::GATEWAY_TIMEOUT,
                "timed out waiting for the pairing QR code",
            )
        })?
        .map_err(|_| {
            error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                "session ended before pairing started",
            )
        })?;

    match outcome {
        RegistrationOutcome::Qr(url) => Ok(Json(json!({
            "status": "qr",
            "qr": url,
            "phone": phone,
        }))),
        RegistrationOutcome::Ready => Ok(Json(json!({
            "status": "success",
            "message": "WhatsApp session authenticated",
            "phone": phone,
            "lineId": req.line_id,
        }))),
        RegistrationOutcome::AuthFailed(reason) => Err(error_body(
            StatusCode::UNAUTHORIZED,
            format!("authentication failed: {reason}"),
        )),
        RegistrationOutcome::Disconnected(reason) => Err(error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("client disconnected: {reason}"),
        )),
    }
}

/// `POST /sendmsg`: relay a text or media message.
async fn send_message(
    State(state): State<ApiState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(bad_json)?;
    let message_id = state.gateway.send(&req).await.map_err(gateway_error)?;
    Ok(Json(json!({
        "status": "sent",
        "messageId": message_id,
        "bitrixMessageId": req.bitrix_message_id,
    })))
}

/// `GET /status/{phone}`
async fn status(State(state): State<ApiState>, Path(phone): Path<String>) -> Json<Value> {
    match state.gateway.status(&phone) {
        Some(current) => Json(json!({
            "status": "connected",
            "phone": phone,
            "isAuthenticated": current.is_authenticated(),
            "state": current,
        })),
        None => Json(json!({
            "status": "disconnected",
            "phone": phone,
            "isAuthenticated": false,
            "state": Value::Null,
        })),
    }
}

/// `DELETE /sessiondelete/{phone}`. Idempotent.
async fn delete_session(
    State(state): State<ApiState>,
    Path(phone): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .gateway
        .delete_session(&phone)
        .await
        .map_err(gateway_error)?;
    Ok(Json(json!({
        "status": "deleted",
        "phone": phone,
        "message": "session and stored credentials removed",
    })))
}

/// `GET /health`
async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.gateway.uptime().as_secs(),
        "sessions": state.gateway.session_count(),
    }))
}

/// Build the router.
pub fn build_router(gateway: Arc<Gateway>, config: &ServerConfig) -> Router {
    let state = ApiState {
        gateway,
        registration_timeout: config.registration_timeout(),
    };
    Router::new()
        .route("/registerwhatsapp", post(register))
        .route("/sendmsg", post(send_message))
        .route("/status/{phone}", get(status))
        .route("/sessiondelete/{phone}", delete(delete_session))
        .route("/health", get(health))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}

/// Serve the control surface until Ctrl-C.
pub async fn serve(gateway: Arc<Gateway>, config: &ServerConfig) -> anyhow::Result<()> {
    let app = build_router(gateway, config);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use wabridge_core::{
        config::{MediaConfig, RecoveryConfig},
        message::{InboundMedia, OutboundMedia},
        storage::StorageLayout,
        traits::{Backend, ClientEvent, ClientFactory, ClientSpec, MessagingClient, RegisteredPhone},
    };

    // -----------------------------------------------------------------------
    // Mocks
    // -----------------------------------------------------------------------

    /// Emits a scripted sequence of events on connect.
    #[derive(Default)]
    struct ScriptedFactory {
        script: Vec<ClientEvent>,
        /// Keeps event streams open after the script runs.
        senders: Mutex<HashMap<String, mpsc::Sender<ClientEvent>>>,
    }

    struct NullClient;

    #[async_trait]
    impl MessagingClient for NullClient {
        async fn send_text(&self, _: &str, _: &str) -> Result<Option<String>, GatewayError> {
            Ok(Some("WAMID-1".into()))
        }

        async fn send_media(
            &self,
            _: &str,
            _: OutboundMedia,
        ) -> Result<Option<String>, GatewayError> {
            Ok(None)
        }

        async fn download_media(&self, _: &InboundMedia) -> Result<Vec<u8>, GatewayError> {
            Ok(Vec::new())
        }

        async fn destroy(&self) {}
    }

    #[async_trait]
    impl ClientFactory for ScriptedFactory {
        async fn connect(
            &self,
            spec: ClientSpec,
        ) -> Result<(Box<dyn MessagingClient>, mpsc::Receiver<ClientEvent>), GatewayError> {
            let (tx, rx) = mpsc::channel(16);
            for event in &self.script {
                let _ = tx.try_send(event.clone());
            }
            self.senders.lock().unwrap().insert(spec.phone, tx);
            Ok((Box::new(NullClient), rx))
        }
    }

    struct QuietBackend;

    #[async_trait]
    impl Backend for QuietBackend {
        async fn registered_phones(&self) -> Result<Vec<RegisteredPhone>, GatewayError> {
            Ok(Vec::new())
        }

        async fn notify_auth_success(&self, _: &str, _: Option<&str>) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn deliver_webhook(&self, _: &Value) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    fn test_router(script: Vec<ClientEvent>, dir: &std::path::Path) -> Router {
        let factory = Arc::new(ScriptedFactory {
            script,
            ..Default::default()
        });
        let gateway = Gateway::new(
            factory,
            Arc::new(QuietBackend),
            StorageLayout::new(dir),
            RecoveryConfig::default(),
            MediaConfig::default(),
        );
        let config = ServerConfig {
            registration_timeout_secs: 5,
            ..Default::default()
        };
        build_router(gateway, &config)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Parse response body as JSON.
    async fn body_json(resp: axum::http::Response<Body>) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"], 0);
    }

    #[tokio::test]
    async fn test_register_requires_phone() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let resp = app
            .oneshot(post_json("/registerwhatsapp", r#"{"lineId": "1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["status"], "error");
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let resp = app
            .oneshot(post_json("/sendmsg", "{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "error");
        assert!(json["message"].is_string());
    }

    #[tokio::test]
    async fn test_register_returns_qr() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(vec![ClientEvent::Qr("2@abc,def".into())], dir.path());
        let resp = app
            .oneshot(post_json(
                "/registerwhatsapp",
                r#"{"phone": "15550001111", "lineId": 4}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "qr");
        assert_eq!(json["phone"], "15550001111");
        assert!(json["qr"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_register_resumed_session_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(vec![ClientEvent::Ready], dir.path());
        let resp = app
            .clone()
            .oneshot(post_json(
                "/registerwhatsapp",
                r#"{"phone": "15550001111", "lineId": "9"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["lineId"], "9");

        let resp = app
            .clone()
            .oneshot(post_json("/registerwhatsapp", r#"{"phone": "15550001111"}"#))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["status"], "connected");

        let req = Request::get("/status/15550001111")
            .body(Body::empty())
            .unwrap();
        let json = body_json(app.oneshot(req).await.unwrap()).await;
        assert_eq!(json["status"], "connected");
        assert_eq!(json["isAuthenticated"], true);
        assert_eq!(json["state"], "ready");
    }

    #[tokio::test]
    async fn test_register_auth_failure_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(
            vec![ClientEvent::AuthFailure("unlinked".into())],
            dir.path(),
        );
        let resp = app
            .oneshot(post_json("/registerwhatsapp", r#"{"phone": "15550001111"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_disconnect_is_503() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(
            vec![ClientEvent::Disconnected("socket closed".into())],
            dir.path(),
        );
        let resp = app
            .oneshot(post_json("/registerwhatsapp", r#"{"phone": "15550001111"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_without_outcome_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let resp = app
            .oneshot(post_json("/registerwhatsapp", r#"{"phone": "15550001111"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_status_unknown_phone() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let req = Request::get("/status/15550009999")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "disconnected");
        assert_eq!(json["isAuthenticated"], false);
    }

    #[tokio::test]
    async fn test_delete_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let req = Request::delete("/sessiondelete/15550009999")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "deleted");
        assert_eq!(json["phone"], "15550009999");
    }

    #[tokio::test]
    async fn test_send_without_session_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let resp = app
            .oneshot(post_json(
                "/sendmsg",
                r#"{"from": "15550001111", "to": "5511999887766", "message": "hi"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_validation_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(Vec::new(), dir.path());
        let resp = app
            .oneshot(post_json(
                "/sendmsg",
                r#"{"from": "15550001111", "to": "5511999887766", "message": "hi", "contentType": "image"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_text_to_ready_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_router(vec![ClientEvent::Ready], dir.path());
        let resp = app
            .clone()
            .oneshot(post_json("/registerwhatsapp", r#"{"phone": "15550001111"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(post_json(
                "/sendmsg",
                r#"{"from": "15550001111", "to": "5511999887766", "message": "hi", "bitrixMessageId": 42}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "sent");
        assert_eq!(json["messageId"], "WAMID-1");
        assert_eq!(json["bitrixMessageId"], 42);
    }
}

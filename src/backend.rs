//! HTTP client for the backend API.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use wabridge_core::{
    config::BackendConfig,
    error::GatewayError,
    traits::{Backend, RegisteredPhone},
};

/// [`Backend`] over plain HTTP/JSON.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    webhook_path: String,
    notify_path: String,
    phones_path: String,
}

impl HttpBackend {
    pub fn from_config(cfg: &BackendConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| GatewayError::Backend(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: cfg.resolved_base_url(),
            webhook_path: cfg.webhook_path.clone(),
            notify_path: cfg.notify_path.clone(),
            phones_path: cfg.phones_path.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, GatewayError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    Err(GatewayError::Backend(format!("{what} returned {status}: {text}")))
}

/// Parse the registered-phones body. `null` and an empty body mean no phones.
fn parse_phones(body: &str) -> Result<Vec<RegisteredPhone>, GatewayError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let phones: Option<Vec<RegisteredPhone>> = serde_json::from_str(body)?;
    Ok(phones.unwrap_or_default())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn registered_phones(&self) -> Result<Vec<RegisteredPhone>, GatewayError> {
        let url = self.url(&self.phones_path);
        debug!("backend: GET {url}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Backend(format!("registered phones request failed: {e}")))?;
        let body = check(resp, "registered phones")
            .await?
            .text()
            .await
            .map_err(|e| GatewayError::Backend(format!("registered phones body: {e}")))?;
        parse_phones(&body)
    }

    async fn notify_auth_success(
        &self,
        phone: &str,
        line_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        let url = self.url(&self.notify_path);
        let resp = self
            .client
            .get(&url)
            .query(&[("phone", phone), ("lineId", line_id.unwrap_or_default())])
            .send()
            .await
            .map_err(|e| GatewayError::Backend(format!("auth notification failed: {e}")))?;
        check(resp, "auth notification").await?;
        info!("backend notified of authentication for {phone}");
        Ok(())
    }

    async fn deliver_webhook(&self, payload: &Value) -> Result<(), GatewayError> {
        let url = self.url(&self.webhook_path);
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Backend(format!("webhook request failed: {e}")))?;
        check(resp, "webhook").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Query, State},
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen {
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    /// Serve a fake backend on an ephemeral port and return its base URL.
    async fn fake_backend(phones_body: &'static str, webhook_status: StatusCode) -> (String, Seen) {
        let seen = Seen::default();
        let app = Router::new()
            .route("/api/whatsapp/RegisteredPhones", get(move || async move { phones_body }))
            .route(
                "/api/whatsapp/NotifyAuthSuccess",
                get(
                    |State(seen): State<Seen>, Query(q): Query<HashMap<String, String>>| async move {
                        seen.queries.lock().unwrap().push(q);
                        StatusCode::OK
                    },
                ),
            )
            .route(
                "/api/whatsapp/webhook",
                post(move |State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    seen.bodies.lock().unwrap().push(body);
                    webhook_status
                }),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::from_config(&BackendConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_phones_empty_forms() {
        assert!(parse_phones("").unwrap().is_empty());
        assert!(parse_phones("null").unwrap().is_empty());
        assert!(parse_phones("[]").unwrap().is_empty());
        assert!(parse_phones("{oops").is_err());
    }

    #[tokio::test]
    async fn test_registered_phones() {
        let (url, _) = fake_backend(
            r#"[{"phoneNumber":"15550001111","lineId":3}]"#,
            StatusCode::OK,
        )
        .await;
        let phones = backend(&url).registered_phones().await.unwrap();
        assert_eq!(
            phones,
            vec![RegisteredPhone {
                phone_number: "15550001111".into(),
                line_id: Some("3".into()),
            }]
        );
    }

    #[tokio::test]
    async fn test_notify_sends_phone_and_line() {
        let (url, seen) = fake_backend("null", StatusCode::OK).await;
        backend(&url)
            .notify_auth_success("15550001111", Some("7"))
            .await
            .unwrap();
        let queries = seen.queries.lock().unwrap();
        assert_eq!(queries[0]["phone"], "15550001111");
        assert_eq!(queries[0]["lineId"], "7");
    }

    #[tokio::test]
    async fn test_webhook_posts_json() {
        let (url, seen) = fake_backend("null", StatusCode::OK).await;
        backend(&url)
            .deliver_webhook(&json!({"entry": []}))
            .await
            .unwrap();
        assert_eq!(seen.bodies.lock().unwrap()[0], json!({"entry": []}));
    }

    #[tokio::test]
    async fn test_webhook_non_2xx_is_error() {
        let (url, _) = fake_backend("null", StatusCode::INTERNAL_SERVER_ERROR).await;
        let err = backend(&url)
            .deliver_webhook(&json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_error() {
        let err = backend("http://127.0.0.1:1")
            .registered_phones()
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Backend(_)));
    }
}

//! Webhook dispatch: one best-effort POST per normalized message.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wabridge_core::{message::NormalizedMessage, traits::Backend};

#[derive(Clone)]
pub struct WebhookDispatcher {
    backend: Arc<dyn Backend>,
}

impl WebhookDispatcher {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Deliver `msg` on its own task. Failures are logged, never retried.
    pub fn dispatch(&self, msg: &NormalizedMessage) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let payload = msg.to_webhook_payload();
        let id = msg.id.clone();
        let owner = msg.to_phone.clone();
        tokio::spawn(async move {
            match backend.deliver_webhook(&payload).await {
                Ok(()) => debug!("{owner}: webhook delivered for {id}"),
                Err(e) => warn!("{owner}: webhook delivery for {id} failed: {e}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::Mutex;
    use wabridge_core::{
        error::GatewayError,
        message::MessageKind,
        traits::RegisteredPhone,
    };

    struct RecordingBackend {
        fail: bool,
        payloads: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        async fn registered_phones(&self) -> Result<Vec<RegisteredPhone>, GatewayError> {
            Ok(Vec::new())
        }

        async fn notify_auth_success(&self, _: &str, _: Option<&str>) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn deliver_webhook(&self, payload: &Value) -> Result<(), GatewayError> {
            self.payloads.lock().unwrap().push(payload.clone());
            if self.fail {
                Err(GatewayError::Backend("HTTP 500".into()))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> NormalizedMessage {
        NormalizedMessage {
            id: "MSG1".into(),
            from_phone: "5511999887766".into(),
            to_phone: "15550001111".into(),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            text: "hello".into(),
            media: None,
            size_rejected: false,
        }
    }

    #[tokio::test]
    async fn test_dispatch_posts_once() {
        let backend = Arc::new(RecordingBackend {
            fail: false,
            payloads: Mutex::new(Vec::new()),
        });
        let dispatcher = WebhookDispatcher::new(backend.clone());
        dispatcher.dispatch(&message()).await.unwrap();

        let payloads = backend.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads[0]["entry"][0]["changes"][0]["value"]["messages"][0]["text"]["body"],
            "hello"
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_not_retried() {
        let backend = Arc::new(RecordingBackend {
            fail: true,
            payloads: Mutex::new(Vec::new()),
        });
        let dispatcher = WebhookDispatcher::new(backend.clone());
        dispatcher.dispatch(&message()).await.unwrap();
        assert_eq!(backend.payloads.lock().unwrap().len(), 1);
    }
}

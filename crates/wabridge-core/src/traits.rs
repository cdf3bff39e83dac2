use crate::{
    error::GatewayError,
    message::{InboundEvent, InboundMedia, OutboundMedia},
    storage::StorageLayout,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Lifecycle and message events emitted by a messaging client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A pairing challenge (raw QR payload) to show to the user.
    Qr(String),
    /// The pairing was accepted on the phone.
    Authenticated,
    /// The client is connected and can send and receive.
    Ready,
    /// Credentials were rejected or the device was unlinked.
    AuthFailure(String),
    Disconnected(String),
    Message(Box<InboundEvent>),
}

/// Everything a factory needs to build the client for one phone.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub phone: String,
    pub layout: StorageLayout,
}

/// A connected messaging client: the protocol engine for one phone.
///
/// Owned exclusively by the session that created it.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send a text to an individual chat. Returns the provider message id, if any.
    async fn send_text(&self, to: &str, text: &str) -> Result<Option<String>, GatewayError>;

    /// Send typed media to an individual chat.
    async fn send_media(
        &self,
        to: &str,
        media: OutboundMedia,
    ) -> Result<Option<String>, GatewayError>;

    /// Download the payload of an inbound media message.
    async fn download_media(&self, media: &InboundMedia) -> Result<Vec<u8>, GatewayError>;

    /// Disconnect and release the underlying connection.
    async fn destroy(&self);
}

/// Builds messaging clients. The returned receiver yields the client's events
/// in emission order; it closes when the client stops.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(
        &self,
        spec: ClientSpec,
    ) -> Result<(Box<dyn MessagingClient>, mpsc::Receiver<ClientEvent>), GatewayError>;
}

/// A phone the backend expects to be active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPhone {
    pub phone_number: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub line_id: Option<String>,
}

/// Accept an optional id sent either as a JSON string or a number.
pub fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// The backend the gateway reports to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// One attempt at fetching the phones that should be active.
    async fn registered_phones(&self) -> Result<Vec<RegisteredPhone>, GatewayError>;

    /// Tell the backend a phone finished authenticating.
    async fn notify_auth_success(
        &self,
        phone: &str,
        line_id: Option<&str>,
    ) -> Result<(), GatewayError>;

    /// Deliver one webhook payload. Never retried by callers.
    async fn deliver_webhook(&self, payload: &Value) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_phone_line_id_forms() {
        let phones: Vec<RegisteredPhone> = serde_json::from_str(
            r#"[
                {"phoneNumber": "15550001111", "lineId": "7"},
                {"phoneNumber": "15550002222", "lineId": 12},
                {"phoneNumber": "15550003333", "lineId": null},
                {"phoneNumber": "15550004444"}
            ]"#,
        )
        .unwrap();
        assert_eq!(phones[0].line_id.as_deref(), Some("7"));
        assert_eq!(phones[1].line_id.as_deref(), Some("12"));
        assert_eq!(phones[2].line_id, None);
        assert_eq!(phones[3].line_id, None);
    }

    #[test]
    fn test_registered_phone_rejects_object_line_id() {
        let result: Result<RegisteredPhone, _> =
            serde_json::from_str(r#"{"phoneNumber": "1555", "lineId": {"a": 1}}"#);
        assert!(result.is_err());
    }
}

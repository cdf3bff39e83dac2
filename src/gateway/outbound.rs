//! Outbound sends: validation and relay to the owning session.

use super::machine::CreationContext;
use super::session::SessionCommand;
use super::Gateway;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;
use wabridge_core::{
    error::GatewayError,
    message::{MediaKind, OutboundMedia},
};

/// Body of a send request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub message: Option<String>,
    pub content_type: Option<String>,
    pub file_path: Option<String>,
    /// Caller correlation id, echoed back untouched.
    #[serde(default)]
    pub bitrix_message_id: Option<Value>,
}

/// What a session is asked to send.
#[derive(Debug, Clone)]
pub enum OutboundPayload {
    Text(String),
    Media(OutboundMedia),
}

/// A send that passed validation; media is not read yet.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ValidatedSend {
    pub from: String,
    pub to: String,
    pub text: String,
    pub media: Option<(MediaKind, PathBuf)>,
}

/// Check a request without touching any session.
pub(super) async fn validate(req: &SendRequest) -> Result<ValidatedSend, GatewayError> {
    let from = req.from.trim();
    let to = req.to.trim();
    if from.is_empty() || to.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "'from' and 'to' are required".into(),
        ));
    }
    let Some(text) = req.message.clone() else {
        return Err(GatewayError::InvalidRequest("'message' is required".into()));
    };

    let content_type = req.content_type.as_deref().unwrap_or("text");
    let media = if content_type == "text" {
        None
    } else {
        let kind = MediaKind::from_content_type(content_type).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("unsupported contentType '{content_type}'"))
        })?;
        let path = req
            .file_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!("'filePath' is required for {kind}"))
            })?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(GatewayError::InvalidRequest(format!(
                "file {} does not exist",
                path.display()
            )));
        }
        Some((kind, path))
    };

    Ok(ValidatedSend {
        from: from.to_string(),
        to: to.to_string(),
        text,
        media,
    })
}

/// Mime type for an outbound file, from its extension.
pub(super) fn mime_from_extension(path: &Path, kind: MediaKind) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mov" => "video/quicktime",
        "ogg" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => match kind {
            MediaKind::Document => "application/octet-stream",
            other => other.fallback_mime(),
        },
    };
    mime.to_string()
}

impl Gateway {
    /// Validate and relay a send. Returns the provider message id, or a
    /// generated one when the provider gives none.
    pub async fn send(self: &Arc<Self>, req: &SendRequest) -> Result<String, GatewayError> {
        let send = validate(req).await?;

        let Some(handle) = self.registry.get(&send.from) else {
            self.reconnect_in_background(&send.from);
            return Err(GatewayError::NotConnected(send.from));
        };

        let payload = match send.media {
            None => OutboundPayload::Text(send.text),
            Some((kind, path)) => {
                let data = tokio::fs::read(&path).await?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{kind}.bin"));
                OutboundPayload::Media(OutboundMedia {
                    kind,
                    mime_type: mime_from_extension(&path, kind),
                    data,
                    file_name,
                    caption: send.text,
                })
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .commands
            .send(SessionCommand::Send {
                to: send.to.clone(),
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GatewayError::NotConnected(send.from.clone()))?;
        let provider_id = reply_rx
            .await
            .map_err(|_| GatewayError::NotConnected(send.from.clone()))??;

        let message_id = provider_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!("{} sent message {message_id} to {}", send.from, send.to);
        Ok(message_id)
    }

    /// Start re-creating a session that a send found missing.
    fn reconnect_in_background(self: &Arc<Self>, phone: &str) {
        if !self.layout.has_credentials(phone) {
            warn!("send from {phone}: no session and no stored credentials, not reconnecting");
            return;
        }
        if self.timers.pending(phone).is_some() {
            return;
        }
        info!("send from {phone}: no live session, reconnecting in background");
        tokio::spawn(Arc::clone(self).recreate(
            phone.to_string(),
            None,
            CreationContext::Reconnect,
            self.clock(),
        ));
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Kind of chat an inbound event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one chat with a person.
    Individual,
    Group,
    /// Status updates, newsletters and broadcast lists.
    Broadcast,
}

/// Media categories the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }

    /// Parse an outbound `contentType`. Stickers cannot be sent.
    pub fn from_content_type(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            _ => None,
        }
    }

    /// Mime type used when the sender did not declare one.
    pub fn fallback_mime(&self) -> &'static str {
        match self {
            Self::Sticker => "image/webp",
            Self::Audio => "audio/ogg",
            Self::Video => "video/mp4",
            _ => "image/jpeg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference the client adapter uses to download a media payload.
///
/// Adapters put their own protocol type inside and downcast it back in
/// `MessagingClient::download_media`.
#[derive(Clone)]
pub struct MediaHandle(Arc<dyn Any + Send + Sync>);

impl MediaHandle {
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MediaHandle(..)")
    }
}

/// Media attached to an inbound event, not yet downloaded.
#[derive(Debug, Clone)]
pub struct InboundMedia {
    pub kind: MediaKind,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    /// Size announced by the sender, if any.
    pub declared_size: Option<u64>,
    pub handle: MediaHandle,
}

/// Content of an inbound event.
#[derive(Debug, Clone)]
pub enum InboundContent {
    Text(String),
    Media(InboundMedia),
    Reaction { target_id: String, emoji: String },
    /// Anything else; carries the protocol's type name.
    Unsupported(String),
}

/// A raw inbound chat event as emitted by a messaging client.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: String,
    /// Sender phone number (user part of the address).
    pub from: String,
    pub chat: ChatKind,
    /// Sent by the session's own account (outbound mirrored as inbound).
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub content: InboundContent,
}

/// Type of a normalized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Reaction,
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Reaction => "reaction",
            Self::Unknown => "unknown",
        }
    }
}

impl From<MediaKind> for MessageKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => Self::Image,
            MediaKind::Video => Self::Video,
            MediaKind::Audio => Self::Audio,
            MediaKind::Document => Self::Document,
            MediaKind::Sticker => Self::Sticker,
        }
    }
}

/// Stored inbound media, as exposed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub mime_type: String,
    pub caption: Option<String>,
    pub file_path: PathBuf,
}

/// An inbound message in the canonical, type-agnostic shape.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub id: String,
    pub from_phone: String,
    /// Phone of the session that received the message.
    pub to_phone: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub text: String,
    pub media: Option<MediaInfo>,
    pub size_rejected: bool,
}

impl NormalizedMessage {
    /// Build the webhook payload.
    ///
    /// The shape is identical for every message type; media types add a key
    /// named after the type holding the media object (or `null`).
    pub fn to_webhook_payload(&self) -> Value {
        let mut message = json!({
            "id": self.id,
            "from": self.from_phone,
            "timestamp": self.timestamp.timestamp().to_string(),
            "type": self.kind.as_str(),
            "text": { "body": self.text },
            "size_rejected": self.size_rejected,
        });

        if let Value::Object(ref mut map) = message {
            match self.kind {
                MessageKind::Image
                | MessageKind::Video
                | MessageKind::Audio
                | MessageKind::Document
                | MessageKind::Sticker => {
                    let media = match self.media {
                        Some(ref m) => json!({
                            "mime_type": m.mime_type,
                            "caption": m.caption,
                            "file_path": m.file_path.to_string_lossy(),
                        }),
                        None => Value::Null,
                    };
                    map.insert(self.kind.as_str().to_string(), media);
                }
                _ => {}
            }
        }

        json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [message],
                        "metadata": { "phone_number_id": self.to_phone },
                    }
                }]
            }]
        })
    }
}

/// Media to send through a messaging client.
#[derive(Debug, Clone)]
pub struct OutboundMedia {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
    pub caption: String,
}

//! Incoming WhatsApp message handling: unwrapping, classification, and media download.

use tracing::debug;
use wabridge_core::{
    error::GatewayError,
    message::{ChatKind, InboundContent, InboundEvent, InboundMedia, MediaHandle, MediaKind},
};
use waproto::whatsapp::message::{
    AudioMessage, DocumentMessage, ImageMessage, StickerMessage, VideoMessage,
};
use whatsapp_rust::client::Client;

/// Protocol media kept inside a [`MediaHandle`] until the gateway asks for it.
pub(super) enum WaMedia {
    Image(Box<ImageMessage>),
    Video(Box<VideoMessage>),
    Audio(Box<AudioMessage>),
    Document(Box<DocumentMessage>),
    Sticker(Box<StickerMessage>),
}

/// Unwrap nested wrappers (device_sent, ephemeral, view_once).
pub(super) fn unwrap_message(msg: &waproto::whatsapp::Message) -> &waproto::whatsapp::Message {
    msg.device_sent_message
        .as_ref()
        .and_then(|d| d.message.as_deref())
        .or_else(|| {
            msg.ephemeral_message
                .as_ref()
                .and_then(|e| e.message.as_deref())
        })
        .or_else(|| {
            msg.view_once_message
                .as_ref()
                .and_then(|v| v.message.as_deref())
        })
        .unwrap_or(msg)
}

/// Classify the chat a message was received in.
pub(super) fn chat_kind(is_group: bool, server: &str) -> ChatKind {
    if is_group {
        ChatKind::Group
    } else if server == "broadcast" || server == "newsletter" {
        ChatKind::Broadcast
    } else {
        ChatKind::Individual
    }
}

fn media(
    kind: MediaKind,
    mime_type: Option<&String>,
    caption: Option<&String>,
    file_name: Option<&String>,
    file_length: Option<u64>,
    handle: WaMedia,
) -> InboundContent {
    InboundContent::Media(InboundMedia {
        kind,
        mime_type: mime_type.filter(|m| !m.is_empty()).cloned(),
        caption: caption.filter(|c| !c.is_empty()).cloned(),
        file_name: file_name.filter(|f| !f.is_empty()).cloned(),
        declared_size: file_length,
        handle: MediaHandle::new(handle),
    })
}

/// Extract the content of an (unwrapped) message.
///
/// Returns `None` for protocol housekeeping (key distribution, revokes, edits)
/// that never reaches the user as a message.
pub(super) fn extract_content(inner: &waproto::whatsapp::Message) -> Option<InboundContent> {
    if let Some(text) = inner.conversation.as_deref().or_else(|| {
        inner
            .extended_text_message
            .as_ref()
            .and_then(|e| e.text.as_deref())
    }) {
        return Some(InboundContent::Text(text.to_string()));
    }

    if let Some(ref img) = inner.image_message {
        return Some(media(
            MediaKind::Image,
            img.mimetype.as_ref(),
            img.caption.as_ref(),
            None,
            img.file_length,
            WaMedia::Image(img.clone()),
        ));
    }
    if let Some(ref video) = inner.video_message {
        return Some(media(
            MediaKind::Video,
            video.mimetype.as_ref(),
            video.caption.as_ref(),
            None,
            video.file_length,
            WaMedia::Video(video.clone()),
        ));
    }
    if let Some(ref audio) = inner.audio_message {
        return Some(media(
            MediaKind::Audio,
            audio.mimetype.as_ref(),
            None,
            None,
            audio.file_length,
            WaMedia::Audio(audio.clone()),
        ));
    }
    if let Some(ref doc) = inner.document_message {
        return Some(media(
            MediaKind::Document,
            doc.mimetype.as_ref(),
            doc.caption.as_ref(),
            doc.file_name.as_ref(),
            doc.file_length,
            WaMedia::Document(doc.clone()),
        ));
    }
    if let Some(ref sticker) = inner.sticker_message {
        return Some(media(
            MediaKind::Sticker,
            sticker.mimetype.as_ref(),
            None,
            None,
            sticker.file_length,
            WaMedia::Sticker(sticker.clone()),
        ));
    }

    if let Some(ref reaction) = inner.reaction_message {
        let target_id = reaction
            .key
            .as_ref()
            .and_then(|k| k.id.clone())
            .unwrap_or_default();
        return Some(InboundContent::Reaction {
            target_id,
            emoji: reaction.text.clone().unwrap_or_default(),
        });
    }

    if inner.protocol_message.is_some() || inner.sender_key_distribution_message.is_some() {
        return None;
    }

    let name = if inner.location_message.is_some() {
        "location"
    } else if inner.contact_message.is_some() {
        "contact"
    } else if inner.poll_creation_message.is_some() {
        "poll"
    } else {
        "unknown"
    };
    Some(InboundContent::Unsupported(name.to_string()))
}

/// Convert a protocol message into the gateway's raw inbound event.
pub(super) fn to_inbound_event(
    msg: waproto::whatsapp::Message,
    info: wacore::types::message::MessageInfo,
) -> Option<InboundEvent> {
    let inner = unwrap_message(&msg);
    let Some(content) = extract_content(inner) else {
        debug!("WA filtered: protocol message {}", info.id);
        return None;
    };

    Some(InboundEvent {
        id: info.id.clone(),
        from: info.source.sender.user.clone(),
        chat: chat_kind(info.source.is_group, &info.source.chat.server),
        from_me: info.source.is_from_me,
        timestamp: info.timestamp,
        content,
    })
}

/// Download an inbound media payload.
pub(super) async fn download(
    client: &Client,
    media: &InboundMedia,
) -> Result<Vec<u8>, GatewayError> {
    let wa_media = media
        .handle
        .downcast_ref::<WaMedia>()
        .ok_or_else(|| GatewayError::Media("media handle is not a WhatsApp message".into()))?;

    let result = match wa_media {
        WaMedia::Image(m) => client.download(m.as_ref()).await,
        WaMedia::Video(m) => client.download(m.as_ref()).await,
        WaMedia::Audio(m) => client.download(m.as_ref()).await,
        WaMedia::Document(m) => client.download(m.as_ref()).await,
        WaMedia::Sticker(m) => client.download(m.as_ref()).await,
    };
    result.map_err(|e| GatewayError::Media(format!("whatsapp {} download failed: {e}", media.kind)))
}

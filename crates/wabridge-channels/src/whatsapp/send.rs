//! Message sending: addressing, media upload, and retry logic.

use tracing::{error, warn};
use wabridge_core::{
    error::GatewayError,
    message::{MediaKind, OutboundMedia},
};
use wacore_binary::jid::Jid;
use waproto::whatsapp::message::{AudioMessage, DocumentMessage, ImageMessage, VideoMessage};
use whatsapp_rust::client::Client;
use whatsapp_rust::download::MediaType;

/// Retry delays for exponential backoff: 500ms, 1s, 2s.
pub(super) const RETRY_DELAYS_MS: [u64; 3] = [500, 1000, 2000];

/// Build the individual-chat JID for a phone number.
///
/// Accepts `+55 11 99988-7766`, `5511999887766`, or an explicit JID.
pub(super) fn individual_jid(to: &str) -> Result<Jid, GatewayError> {
    let address = if to.contains('@') {
        to.to_string()
    } else {
        let digits: String = to.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(GatewayError::InvalidRequest(format!(
                "'{to}' is not a phone number"
            )));
        }
        format!("{digits}@s.whatsapp.net")
    };

    address
        .parse()
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid whatsapp JID '{address}': {e}")))
}

/// Send a WhatsApp message with retry and exponential backoff.
///
/// Attempts up to 3 times with delays of 500ms, 1s, 2s between retries.
pub(super) async fn retry_send(
    client: &Client,
    jid: &Jid,
    msg: waproto::whatsapp::Message,
) -> Result<String, GatewayError> {
    let mut last_err = None;

    for (attempt, delay_ms) in RETRY_DELAYS_MS.iter().enumerate() {
        match client.send_message(jid.clone(), msg.clone()).await {
            Ok(msg_id) => return Ok(msg_id),
            Err(e) => {
                let attempt_num = attempt + 1;
                if attempt_num < RETRY_DELAYS_MS.len() {
                    warn!(
                        "whatsapp send attempt {attempt_num}/{} failed: {e}, retrying in {delay_ms}ms",
                        RETRY_DELAYS_MS.len()
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                } else {
                    error!(
                        "whatsapp send attempt {attempt_num}/{} failed: {e}, giving up",
                        RETRY_DELAYS_MS.len()
                    );
                }
                last_err = Some(e);
            }
        }
    }

    Err(GatewayError::Client(format!(
        "whatsapp send failed after {} attempts: {}",
        RETRY_DELAYS_MS.len(),
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Send a text message to an individual chat.
pub(super) async fn send_text(client: &Client, to: &str, text: &str) -> Result<String, GatewayError> {
    let jid = individual_jid(to)?;
    let msg = waproto::whatsapp::Message {
        conversation: Some(text.to_string()),
        ..Default::default()
    };
    retry_send(client, &jid, msg).await
}

fn upload_type(kind: MediaKind) -> Result<MediaType, GatewayError> {
    match kind {
        MediaKind::Image => Ok(MediaType::Image),
        MediaKind::Video => Ok(MediaType::Video),
        MediaKind::Audio => Ok(MediaType::Audio),
        MediaKind::Document => Ok(MediaType::Document),
        MediaKind::Sticker => Err(GatewayError::InvalidRequest(
            "stickers cannot be sent".into(),
        )),
    }
}

/// Upload a media payload and send it with its caption.
pub(super) async fn send_media(
    client: &Client,
    to: &str,
    media: OutboundMedia,
) -> Result<String, GatewayError> {
    let jid = individual_jid(to)?;
    let media_type = upload_type(media.kind)?;

    let upload = client
        .upload(media.data, media_type)
        .await
        .map_err(|e| GatewayError::Client(format!("whatsapp {} upload failed: {e}", media.kind)))?;

    let caption = (!media.caption.is_empty()).then(|| media.caption.clone());
    let mut msg = waproto::whatsapp::Message::default();

    match media.kind {
        MediaKind::Image => {
            msg.image_message = Some(Box::new(ImageMessage {
                mimetype: Some(media.mime_type),
                caption,
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            }));
        }
        MediaKind::Video => {
            msg.video_message = Some(Box::new(VideoMessage {
                mimetype: Some(media.mime_type),
                caption,
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            }));
        }
        MediaKind::Audio => {
            // Audio messages carry no caption on WhatsApp.
            msg.audio_message = Some(Box::new(AudioMessage {
                mimetype: Some(media.mime_type),
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            }));
        }
        MediaKind::Document => {
            msg.document_message = Some(Box::new(DocumentMessage {
                mimetype: Some(media.mime_type),
                caption,
                file_name: Some(media.file_name.clone()),
                title: Some(media.file_name),
                url: Some(upload.url),
                direct_path: Some(upload.direct_path),
                media_key: Some(upload.media_key),
                file_enc_sha256: Some(upload.file_enc_sha256),
                file_sha256: Some(upload.file_sha256),
                file_length: Some(upload.file_length),
                ..Default::default()
            }));
        }
        MediaKind::Sticker => {
            return Err(GatewayError::InvalidRequest(
                "stickers cannot be sent".into(),
            ))
        }
    }

    retry_send(client, &jid, msg).await
}

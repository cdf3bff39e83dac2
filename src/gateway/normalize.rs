//! Inbound normalization: raw client events into the canonical message shape.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wabridge_core::{
    message::{
        ChatKind, InboundContent, InboundEvent, InboundMedia, MediaInfo, MessageKind,
        NormalizedMessage,
    },
    traits::MessagingClient,
};

/// Text sent in place of media larger than the inbound limit.
pub const OVERSIZED_NOTICE: &str = "[File exceeds the 16 MB limit and was not delivered]";

fn digits(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Why an event is not forwarded, if it is filtered out.
pub fn filter_reason(event: &InboundEvent, own_phone: &str) -> Option<&'static str> {
    if event.chat != ChatKind::Individual {
        return Some("not an individual chat");
    }
    if event.from_me {
        return Some("sent by this account");
    }
    let own = digits(own_phone);
    if !own.is_empty() && digits(&event.from) == own {
        return Some("sender is the session's own phone");
    }
    None
}

/// File extension for a mime type (`image/jpeg` → `jpg`, parameters dropped).
pub fn extension_for_mime(mime: &str) -> String {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    let subtype = essence.rsplit('/').next().unwrap_or_default();
    match subtype {
        "jpeg" | "pjpeg" => "jpg".into(),
        "quicktime" => "mov".into(),
        "mpeg" if essence.starts_with("audio/") => "mp3".into(),
        "plain" => "txt".into(),
        s if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()) => s.to_string(),
        _ => "bin".into(),
    }
}

/// Strip any directory components from a sender-supplied file name.
fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}

/// Turns one session's inbound events into [`NormalizedMessage`]s.
pub struct Normalizer {
    phone: String,
    files_dir: PathBuf,
    max_inbound_bytes: u64,
}

impl Normalizer {
    pub fn new(phone: &str, files_dir: PathBuf, max_inbound_bytes: u64) -> Self {
        Self {
            phone: phone.to_string(),
            files_dir,
            max_inbound_bytes,
        }
    }

    /// Normalize `event`. Returns `None` when the event is filtered out.
    pub async fn normalize(
        &self,
        event: InboundEvent,
        client: &dyn MessagingClient,
    ) -> Option<NormalizedMessage> {
        if let Some(reason) = filter_reason(&event, &self.phone) {
            debug!("{}: dropped {} ({reason})", self.phone, event.id);
            return None;
        }

        let mut msg = NormalizedMessage {
            id: event.id.clone(),
            from_phone: event.from.clone(),
            to_phone: self.phone.clone(),
            timestamp: event.timestamp,
            kind: MessageKind::Unknown,
            text: String::new(),
            media: None,
            size_rejected: false,
        };

        match event.content {
            InboundContent::Text(body) => {
                msg.kind = MessageKind::Text;
                msg.text = body;
            }
            InboundContent::Media(media) => {
                msg.kind = media.kind.into();
                self.attach_media(&mut msg, &media, client).await;
            }
            InboundContent::Reaction { target_id, emoji } => {
                msg.kind = MessageKind::Reaction;
                msg.text = format!("Reaction \"{emoji}\" to message {target_id}");
            }
            InboundContent::Unsupported(name) => {
                msg.text = format!("Unsupported message type: {name}");
            }
        }
        Some(msg)
    }

    async fn attach_media(
        &self,
        msg: &mut NormalizedMessage,
        media: &InboundMedia,
        client: &dyn MessagingClient,
    ) {
        if media
            .declared_size
            .is_some_and(|size| size > self.max_inbound_bytes)
        {
            self.reject_oversized(msg, media.declared_size.unwrap_or_default());
            return;
        }

        let data = match client.download_media(media).await {
            Ok(data) => data,
            Err(e) => {
                warn!("{}: {} {} download failed: {e}", self.phone, media.kind, msg.id);
                msg.text = format!("[{} could not be downloaded]", media.kind);
                return;
            }
        };

        if data.len() as u64 > self.max_inbound_bytes {
            self.reject_oversized(msg, data.len() as u64);
            return;
        }

        let mime_type = media
            .mime_type
            .clone()
            .unwrap_or_else(|| media.kind.fallback_mime().to_string());
        let file_name = media
            .file_name
            .as_deref()
            .and_then(safe_file_name)
            .unwrap_or_else(|| {
                format!("{}_{}.{}", media.kind, msg.id, extension_for_mime(&mime_type))
            });

        match write_media(&self.files_dir, &file_name, &data).await {
            Ok(file_path) => {
                info!(
                    "{}: stored {} ({} bytes) at {}",
                    self.phone,
                    media.kind,
                    data.len(),
                    file_path.display()
                );
                msg.text = media.caption.clone().unwrap_or_default();
                msg.media = Some(MediaInfo {
                    mime_type,
                    caption: media.caption.clone(),
                    file_path,
                });
            }
            Err(e) => {
                warn!("{}: failed to store {} {}: {e}", self.phone, media.kind, msg.id);
                msg.text = format!("[{} could not be downloaded]", media.kind);
            }
        }
    }

    fn reject_oversized(&self, msg: &mut NormalizedMessage, size: u64) {
        info!(
            "{}: {} {} rejected, {size} bytes over the {} byte limit",
            self.phone, msg.kind.as_str(), msg.id, self.max_inbound_bytes
        );
        msg.text = OVERSIZED_NOTICE.to_string();
        msg.media = None;
        msg.size_rejected = true;
    }
}

async fn write_media(dir: &Path, file_name: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wabridge_core::{
        error::GatewayError,
        message::{MediaHandle, MediaKind, OutboundMedia},
    };

    /// Serves a fixed payload for every download.
    struct StubClient {
        payload: Option<Vec<u8>>,
        downloads: AtomicUsize,
    }

    impl StubClient {
        fn serving(payload: Option<Vec<u8>>) -> Self {
            Self {
                payload,
                downloads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessagingClient for StubClient {
        async fn send_text(&self, _: &str, _: &str) -> Result<Option<String>, GatewayError> {
            Ok(None)
        }

        async fn send_media(
            &self,
            _: &str,
            _: OutboundMedia,
        ) -> Result<Option<String>, GatewayError> {
            Ok(None)
        }

        async fn download_media(&self, _: &InboundMedia) -> Result<Vec<u8>, GatewayError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.payload
                .clone()
                .ok_or_else(|| GatewayError::Media("expired".into()))
        }

        async fn destroy(&self) {}
    }

    fn event(content: InboundContent) -> InboundEvent {
        InboundEvent {
            id: "MSG1".into(),
            from: "5511999887766".into(),
            chat: ChatKind::Individual,
            from_me: false,
            timestamp: Utc::now(),
            content,
        }
    }

    fn image(declared_size: Option<u64>, file_name: Option<&str>) -> InboundContent {
        InboundContent::Media(InboundMedia {
            kind: MediaKind::Image,
            mime_type: None,
            caption: Some("look".into()),
            file_name: file_name.map(str::to_string),
            declared_size,
            handle: MediaHandle::new(()),
        })
    }

    fn normalizer(dir: &Path, limit: u64) -> Normalizer {
        Normalizer::new("15550001111", dir.to_path_buf(), limit)
    }

    #[test]
    fn test_filters() {
        let mut ev = event(InboundContent::Text("hi".into()));
        assert_eq!(filter_reason(&ev, "15550001111"), None);

        ev.chat = ChatKind::Group;
        assert!(filter_reason(&ev, "15550001111").is_some());

        ev.chat = ChatKind::Individual;
        ev.from_me = true;
        assert!(filter_reason(&ev, "15550001111").is_some());

        ev.from_me = false;
        ev.from = "15550001111".into();
        assert!(filter_reason(&ev, "+1 555 000 1111").is_some());
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_for_mime("video/mp4"), "mp4");
        assert_eq!(extension_for_mime("application/pdf"), "pdf");
        assert_eq!(
            extension_for_mime("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            "bin"
        );
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_file_name("C:\\docs\\a.pdf").as_deref(), Some("a.pdf"));
        assert_eq!(safe_file_name(".."), None);
        assert_eq!(safe_file_name(""), None);
    }

    #[tokio::test]
    async fn test_text_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(None);
        let msg = normalizer(dir.path(), 1024)
            .normalize(event(InboundContent::Text("hello".into())), &client)
            .await
            .unwrap();
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.to_phone, "15550001111");
    }

    #[tokio::test]
    async fn test_media_stored_with_synthesized_name() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(Some(vec![1, 2, 3]));
        let msg = normalizer(dir.path(), 1024)
            .normalize(event(image(Some(3), None)), &client)
            .await
            .unwrap();

        assert_eq!(msg.kind, MessageKind::Image);
        assert_eq!(msg.text, "look");
        let media = msg.media.unwrap();
        assert_eq!(media.mime_type, "image/jpeg");
        assert_eq!(media.file_path, dir.path().join("image_MSG1.jpg"));
        assert_eq!(std::fs::read(&media.file_path).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_supplied_name_loses_directories() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(Some(vec![0]));
        let msg = normalizer(dir.path(), 1024)
            .normalize(event(image(None, Some("../escape.png"))), &client)
            .await
            .unwrap();
        assert_eq!(msg.media.unwrap().file_path, dir.path().join("escape.png"));
    }

    #[tokio::test]
    async fn test_oversized_download_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(Some(vec![0; 11]));
        let msg = normalizer(dir.path(), 10)
            .normalize(event(image(None, None)), &client)
            .await
            .unwrap();

        assert!(msg.size_rejected);
        assert_eq!(msg.text, OVERSIZED_NOTICE);
        assert!(msg.media.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_declaration_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(Some(vec![0]));
        let msg = normalizer(dir.path(), 10)
            .normalize(event(image(Some(11), None)), &client)
            .await
            .unwrap();

        assert!(msg.size_rejected);
        assert_eq!(client.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_failure_falls_back_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(None);
        let msg = normalizer(dir.path(), 1024)
            .normalize(event(image(None, None)), &client)
            .await
            .unwrap();

        assert_eq!(msg.kind, MessageKind::Image);
        assert_eq!(msg.text, "[image could not be downloaded]");
        assert!(msg.media.is_none());
        assert!(!msg.size_rejected);
    }

    #[tokio::test]
    async fn test_reaction_and_unsupported_text() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(None);
        let n = normalizer(dir.path(), 1024);

        let reaction = n
            .normalize(
                event(InboundContent::Reaction {
                    target_id: "ABC".into(),
                    emoji: "👍".into(),
                }),
                &client,
            )
            .await
            .unwrap();
        assert_eq!(reaction.kind, MessageKind::Reaction);
        assert_eq!(reaction.text, "Reaction \"👍\" to message ABC");

        let other = n
            .normalize(event(InboundContent::Unsupported("poll".into())), &client)
            .await
            .unwrap();
        assert_eq!(other.kind, MessageKind::Unknown);
        assert_eq!(other.text, "Unsupported message type: poll");
    }

    #[tokio::test]
    async fn test_group_message_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let client = StubClient::serving(None);
        let mut ev = event(InboundContent::Text("hi".into()));
        ev.chat = ChatKind::Group;
        assert!(normalizer(dir.path(), 1024)
            .normalize(ev, &client)
            .await
            .is_none());
    }
}

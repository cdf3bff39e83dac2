//! Bot lifecycle: building and running the WhatsApp bot for one phone.

use super::events::to_inbound_event;
use super::qr::generate_qr_image;
use super::WhatsAppClient;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use wabridge_core::{
    error::GatewayError,
    traits::{ClientEvent, ClientSpec},
};
use wacore::types::events::Event;
use whatsapp_rust::bot::Bot;
use whatsapp_rust_sqlite_storage::SqliteStore;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

/// Capacity of the per-phone event channel.
const EVENT_BUFFER: usize = 64;

/// Map a protocol event onto the gateway's client events.
///
/// Returns `None` for events the gateway does not care about.
fn map_event(event: Event) -> Option<ClientEvent> {
    match event {
        Event::PairingQrCode { code, .. } => Some(ClientEvent::Qr(code)),
        Event::PairSuccess(_) => Some(ClientEvent::Authenticated),
        Event::Connected(_) => Some(ClientEvent::Ready),
        Event::Disconnected(_) => Some(ClientEvent::Disconnected("connection closed".into())),
        Event::LoggedOut(_) => Some(ClientEvent::AuthFailure(
            "device was logged out from the phone".into(),
        )),
        Event::Message(msg, info) => {
            to_inbound_event(*msg, info).map(|ev| ClientEvent::Message(Box::new(ev)))
        }
        _ => None,
    }
}

/// Write the latest QR code next to the session cache, best effort.
async fn cache_qr_png(cache_dir: &Path, code: &str) {
    match generate_qr_image(code) {
        Ok(png) => {
            if let Err(e) = tokio::fs::write(cache_dir.join("qr.png"), png).await {
                warn!("failed to cache QR image in {}: {e}", cache_dir.display());
            }
        }
        Err(e) => warn!("{e}"),
    }
}

/// Build a WhatsApp bot for `spec.phone` and run it in the background.
///
/// Opens (or creates) the credential store; if it already holds a paired
/// device the bot resumes without a QR code.
pub(super) async fn build_and_run_bot(
    spec: &ClientSpec,
    device_name: &str,
) -> Result<(WhatsAppClient, mpsc::Receiver<ClientEvent>), GatewayError> {
    let credentials_dir = spec.layout.credentials_dir(&spec.phone);
    let cache_dir = spec.layout.cache_dir(&spec.phone);
    tokio::fs::create_dir_all(&credentials_dir).await?;
    tokio::fs::create_dir_all(&cache_dir).await?;

    let db_path = credentials_dir.join("whatsapp.db");
    info!(
        "WhatsApp bot building for {} (session: {})...",
        spec.phone,
        db_path.display()
    );

    let backend = Arc::new(
        SqliteStore::new(&db_path.to_string_lossy())
            .await
            .map_err(|e| GatewayError::Client(format!("whatsapp store init failed: {e}")))?,
    );

    let (tx, rx) = mpsc::channel::<ClientEvent>(EVENT_BUFFER);
    let phone = spec.phone.clone();

    let mut bot = Bot::builder()
        .with_backend(backend)
        .with_transport_factory(TokioWebSocketTransportFactory::new())
        .with_http_client(UreqHttpClient::new())
        .with_device_props(
            Some(device_name.to_string()),
            None,
            Some(waproto::whatsapp::device_props::PlatformType::Desktop),
        )
        .on_event(move |event, _client| {
            let tx = tx.clone();
            let cache_dir = cache_dir.clone();
            let phone = phone.clone();
            async move {
                if let Event::PairingQrCode { ref code, .. } = event {
                    cache_qr_png(&cache_dir, code).await;
                }
                let Some(mapped) = map_event(event) else {
                    return;
                };
                if tx.send(mapped).await.is_err() {
                    debug!("session for {phone} no longer listening, dropping event");
                }
            }
        })
        .build()
        .await
        .map_err(|e| GatewayError::Client(format!("whatsapp bot build failed: {e}")))?;

    let client = bot.client();

    let handle = bot
        .run()
        .await
        .map_err(|e| GatewayError::Client(format!("whatsapp bot run failed: {e}")))?;

    info!("WhatsApp bot started for {}", spec.phone);
    Ok((
        WhatsAppClient {
            phone: spec.phone.clone(),
            client,
            run_handle: Mutex::new(Some(handle)),
        },
        rx,
    ))
}

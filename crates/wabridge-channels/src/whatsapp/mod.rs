//! WhatsApp client adapter built on `whatsapp-rust`.
//!
//! Uses the WhatsApp Web protocol (Noise handshake + Signal encryption).
//! Each phone number gets its own `Bot`. Pairing is done by scanning a QR
//! code, like WhatsApp Web. Credentials are persisted to
//! `{credentials_dir}/whatsapp.db`; the latest QR code is also written to
//! `{cache_dir}/qr.png`.

mod bot;
mod events;
mod qr;
mod send;


pub use qr::{generate_qr_image, generate_qr_terminal, qr_data_url};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;
use wabridge_core::{
    error::GatewayError,
    message::{InboundMedia, OutboundMedia},
    traits::{ClientEvent, ClientFactory, ClientSpec, MessagingClient},
};
use whatsapp_rust::client::Client;

/// Builds one WhatsApp Web client per phone number.
pub struct WhatsAppFactory {
    /// Device name shown under "Linked devices" on the phone.
    device_name: String,
}

impl WhatsAppFactory {
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
        }
    }
}

#[async_trait]
impl ClientFactory for WhatsAppFactory {
    async fn connect(
        &self,
        spec: ClientSpec,
    ) -> Result<(Box<dyn MessagingClient>, mpsc::Receiver<ClientEvent>), GatewayError> {
        let (client, rx) = bot::build_and_run_bot(&spec, &self.device_name).await?;
        Ok((Box::new(client), rx))
    }
}

/// A running WhatsApp Web client for one phone number.
pub struct WhatsAppClient {
    phone: String,
    client: Arc<Client>,
    /// Background run loop of the bot, aborted on `destroy()`.
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MessagingClient for WhatsAppClient {
    async fn send_text(&self, to: &str, text: &str) -> Result<Option<String>, GatewayError> {
        send::send_text(&self.client, to, text).await.map(Some)
    }

    async fn send_media(
        &self,
        to: &str,
        media: OutboundMedia,
    ) -> Result<Option<String>, GatewayError> {
        send::send_media(&self.client, to, media).await.map(Some)
    }

    async fn download_media(&self, media: &InboundMedia) -> Result<Vec<u8>, GatewayError> {
        events::download(&self.client, media).await
    }

    async fn destroy(&self) {
        self.client.disconnect().await;
        if let Some(handle) = self.run_handle.lock().await.take() {
            handle.abort();
        }
        info!("WhatsApp client for {} destroyed", self.phone);
    }
}

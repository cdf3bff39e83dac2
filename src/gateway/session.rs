//! Per-phone session actor.
//!
//! The actor owns the messaging client and applies client events, timer
//! commands, sends and deletion strictly in arrival order.

use super::machine::{
    transition, CreationContext, Effect, RegistrationOutcome, SessionState, Transition, Trigger,
};
use super::normalize::Normalizer;
use super::outbound::OutboundPayload;
use super::Gateway;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};
use wabridge_channels::whatsapp::{generate_qr_terminal, qr_data_url};
use wabridge_core::{
    error::GatewayError,
    message::InboundEvent,
    traits::{ClientEvent, MessagingClient},
};

/// Commands delivered through a session's mailbox.
pub enum SessionCommand {
    Send {
        to: String,
        payload: OutboundPayload,
        reply: oneshot::Sender<Result<Option<String>, GatewayError>>,
    },
    QrTimeout,
    Destroy {
        ack: oneshot::Sender<()>,
    },
}

impl fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send { to, .. } => write!(f, "Send({to})"),
            Self::QrTimeout => f.write_str("QrTimeout"),
            Self::Destroy { .. } => f.write_str("Destroy"),
        }
    }
}

pub(super) struct SessionActor {
    pub(super) phone: String,
    pub(super) line_id: Option<String>,
    pub(super) generation: u64,
    pub(super) context: CreationContext,
    pub(super) state: SessionState,
    pub(super) state_tx: watch::Sender<SessionState>,
    pub(super) client: Box<dyn MessagingClient>,
    pub(super) events: mpsc::Receiver<ClientEvent>,
    pub(super) commands: mpsc::Receiver<SessionCommand>,
    pub(super) responder: Option<oneshot::Sender<RegistrationOutcome>>,
    pub(super) normalizer: Normalizer,
    pub(super) gateway: Arc<Gateway>,
}

impl SessionActor {
    pub(super) async fn run(mut self) {
        info!(
            "session {} started ({}, generation {})",
            self.phone,
            self.context.as_str(),
            self.generation
        );

        while !self.state.is_terminal() {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.apply(Trigger::Destroy).await,
                },
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        self.apply(Trigger::Disconnected("client event stream closed".into()))
                            .await
                    }
                },
            }
        }

        info!("session {} ended in {}", self.phone, self.state.as_str());
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Send { to, payload, reply } => {
                let result = self.send(&to, payload).await;
                let _ = reply.send(result);
            }
            SessionCommand::QrTimeout => {
                if self.state == SessionState::AwaitingQrScan {
                    warn!("session {}: QR code was not scanned in time", self.phone);
                }
                self.apply(Trigger::QrTimeout).await;
            }
            SessionCommand::Destroy { ack } => {
                self.apply(Trigger::Destroy).await;
                let _ = ack.send(());
            }
        }
    }

    async fn send(
        &self,
        to: &str,
        payload: OutboundPayload,
    ) -> Result<Option<String>, GatewayError> {
        if self.state != SessionState::Ready {
            return Err(GatewayError::NotConnected(self.phone.clone()));
        }
        match payload {
            OutboundPayload::Text(text) => self.client.send_text(to, &text).await,
            OutboundPayload::Media(media) => self.client.send_media(to, media).await,
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) {
        let trigger = match event {
            ClientEvent::Qr(code) => Trigger::Qr(code),
            ClientEvent::Authenticated => Trigger::Authenticated,
            ClientEvent::Ready => Trigger::Ready,
            ClientEvent::AuthFailure(reason) => Trigger::AuthFailure(reason),
            ClientEvent::Disconnected(reason) => Trigger::Disconnected(reason),
            ClientEvent::Message(event) => {
                self.handle_message(*event).await;
                return;
            }
        };
        self.apply(trigger).await;
    }

    async fn handle_message(&self, event: InboundEvent) {
        if let Some(msg) = self
            .normalizer
            .normalize(event, self.client.as_ref())
            .await
        {
            info!(
                "session {}: {} message {} from {}",
                self.phone,
                msg.kind.as_str(),
                msg.id,
                msg.from_phone
            );
            self.gateway.dispatcher.dispatch(&msg);
        }
    }

    async fn apply(&mut self, trigger: Trigger) {
        let Transition { next, effects } = transition(self.state, trigger);
        if next != self.state {
            info!(
                "session {}: {} -> {}",
                self.phone,
                self.state.as_str(),
                next.as_str()
            );
            self.state = next;
            self.state_tx.send_replace(next);
        }
        for effect in effects {
            self.run_effect(effect).await;
        }
    }

    async fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::RenderQr(code) => self.render_qr(&code),
            Effect::StartQrTimer => self.gateway.start_qr_timer(&self.phone, self.generation),
            Effect::CancelTimer => {
                // Once deleted or superseded, the slot belongs to someone else.
                if self.gateway.registry.is_current(&self.phone, self.generation) {
                    self.gateway.timers.cancel(&self.phone);
                }
            }
            Effect::NotifyAuthSuccess => {
                let backend = Arc::clone(&self.gateway.backend);
                let phone = self.phone.clone();
                let line_id = self.line_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = backend.notify_auth_success(&phone, line_id.as_deref()).await {
                        warn!("auth success notification for {phone} failed: {e}");
                    }
                });
            }
            Effect::Resolve(outcome) => self.resolve(outcome),
            Effect::Teardown => {
                self.client.destroy().await;
                self.gateway.registry.remove_if(&self.phone, self.generation);
            }
            Effect::ScheduleRecreate(context) => {
                self.gateway.schedule_recreate(
                    &self.phone,
                    self.line_id.clone(),
                    context,
                    self.generation,
                );
            }
        }
    }

    fn resolve(&mut self, outcome: RegistrationOutcome) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(outcome);
        }
    }

    /// Hand a pairing challenge to the waiting caller, or print it.
    fn render_qr(&mut self, code: &str) {
        if self.responder.is_some() {
            match qr_data_url(code) {
                Ok(url) => self.resolve(RegistrationOutcome::Qr(url)),
                Err(e) => error!("session {}: {e}", self.phone),
            }
            return;
        }
        match generate_qr_terminal(code) {
            Ok(qr) => info!("session {}: scan to pair\n{qr}", self.phone),
            Err(e) => error!("session {}: {e}", self.phone),
        }
    }
}

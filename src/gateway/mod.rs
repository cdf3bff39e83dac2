//! Gateway: owns every phone's session and the recovery loops around them.
//!
//! Sessions are actors (see `session`); this module creates them, tears them
//! down and schedules their re-creation after failures.

mod bootstrap;
mod dispatch;
mod machine;
mod normalize;
mod outbound;
mod registry;
mod session;
mod timer;


pub use machine::{CreationContext, RegistrationOutcome, SessionState};
pub use outbound::SendRequest;

use dispatch::WebhookDispatcher;
use normalize::Normalizer;
use registry::{SessionHandle, SessionRegistry};
use session::{SessionActor, SessionCommand};
use std::sync::atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use timer::{TimerKind, TimerService};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use wabridge_core::{
    config::{MediaConfig, RecoveryConfig},
    error::GatewayError,
    storage::StorageLayout,
    traits::{Backend, ClientFactory, ClientSpec},
};

/// Capacity of a session's command mailbox.
const COMMAND_BUFFER: usize = 32;
/// How long deletion waits for the actor to release its client.
const DESTROY_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a registration request.
#[derive(Debug)]
pub enum Registration {
    /// The phone already had a live session.
    Existing {
        state: SessionState,
        line_id: Option<String>,
    },
    /// A new session was started; the first outcome arrives here.
    Pending(oneshot::Receiver<RegistrationOutcome>),
}

fn existing_registration(handle: &SessionHandle) -> Registration {
    debug!(
        "register {}: reusing session created by {}",
        handle.phone,
        handle.context.as_str()
    );
    Registration::Existing {
        state: handle.current_state(),
        line_id: handle.line_id.clone(),
    }
}

/// The multi-phone session gateway.
pub struct Gateway {
    pub(super) registry: SessionRegistry,
    pub(super) timers: TimerService,
    pub(super) factory: Arc<dyn ClientFactory>,
    pub(super) backend: Arc<dyn Backend>,
    pub(super) dispatcher: WebhookDispatcher,
    pub(super) layout: StorageLayout,
    pub(super) recovery: RecoveryConfig,
    pub(super) media: MediaConfig,
    /// Logical clock: session generations and deletion marks share it.
    next_generation: AtomicU64,
    /// Clock value taken when each phone was last deleted.
    deleted: Mutex<HashMap<String, u64>>,
    uptime: Instant,
}

impl Gateway {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        backend: Arc<dyn Backend>,
        layout: StorageLayout,
        recovery: RecoveryConfig,
        media: MediaConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(),
            timers: TimerService::new(),
            factory,
            dispatcher: WebhookDispatcher::new(Arc::clone(&backend)),
            backend,
            layout,
            recovery,
            media,
            next_generation: AtomicU64::new(0),
            deleted: Mutex::new(HashMap::new()),
            uptime: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.uptime.elapsed()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// State of the live session for `phone`, if any.
    pub fn status(&self, phone: &str) -> Option<SessionState> {
        self.registry.get(phone).map(|h| h.current_state())
    }

    fn tick(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current clock value. Anything issued later compares greater.
    pub(super) fn clock(&self) -> u64 {
        self.next_generation.load(Ordering::SeqCst)
    }

    fn mark_deleted(&self, phone: &str) {
        let mark = self.tick();
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(phone.to_string(), mark);
    }

    /// Whether `phone` was deleted after `origin` was issued.
    pub(super) fn deleted_since(&self, phone: &str, origin: u64) -> bool {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(phone)
            .is_some_and(|&mark| mark > origin)
    }

    /// Start interactive registration for `phone`.
    pub async fn register(
        self: &Arc<Self>,
        phone: &str,
        line_id: Option<String>,
    ) -> Result<Registration, GatewayError> {
        if let Some(existing) = self.registry.get(phone) {
            return Ok(existing_registration(&existing));
        }

        let (tx, rx) = oneshot::channel();
        match self
            .start_session(phone, line_id, CreationContext::Register, Some(tx))
            .await
        {
            Ok(()) => Ok(Registration::Pending(rx)),
            Err(GatewayError::AlreadyExists(_)) => match self.registry.get(phone) {
                Some(existing) => Ok(existing_registration(&existing)),
                None => Ok(Registration::Existing {
                    state: SessionState::Initializing,
                    line_id: None,
                }),
            },
            Err(e) => Err(e),
        }
    }

    /// Claim the registry slot for `phone`, connect a client and spawn its actor.
    pub(super) async fn start_session(
        self: &Arc<Self>,
        phone: &str,
        line_id: Option<String>,
        context: CreationContext,
        responder: Option<oneshot::Sender<RegistrationOutcome>>,
    ) -> Result<(), GatewayError> {
        let generation = self.tick();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(SessionState::Initializing);

        self.registry.put(SessionHandle {
            phone: phone.to_string(),
            line_id: line_id.clone(),
            context,
            generation,
            state: state_rx,
            commands: cmd_tx,
        })?;
        self.timers.cancel_kind(phone, TimerKind::Retry);

        info!("creating session for {phone} ({})", context.as_str());
        let spec = ClientSpec {
            phone: phone.to_string(),
            layout: self.layout.clone(),
        };
        let (client, events) = match self.factory.connect(spec).await {
            Ok(connected) => connected,
            Err(e) => {
                self.registry.remove_if(phone, generation);
                return Err(e);
            }
        };

        if !self.registry.is_current(phone, generation) {
            info!("session for {phone} was deleted while connecting");
            client.destroy().await;
            return Ok(());
        }

        let actor = SessionActor {
            phone: phone.to_string(),
            line_id,
            generation,
            context,
            state: SessionState::Initializing,
            state_tx,
            client,
            events,
            commands: cmd_rx,
            responder,
            normalizer: Normalizer::new(
                phone,
                self.layout.files_dir(phone),
                self.media.max_inbound_bytes,
            ),
            gateway: Arc::clone(self),
        };
        tokio::spawn(actor.run());
        Ok(())
    }

    /// Arm the QR-scan timeout for one session generation.
    pub(super) fn start_qr_timer(self: &Arc<Self>, phone: &str, generation: u64) {
        if !self.registry.is_current(phone, generation) {
            return;
        }
        let gateway = Arc::clone(self);
        let key = phone.to_string();
        self.timers.schedule(
            phone,
            TimerKind::QrScan,
            self.recovery.qr_timeout(),
            async move {
                let Some(handle) = gateway.registry.get(&key) else {
                    return;
                };
                if handle.generation == generation {
                    let _ = handle.commands.send(SessionCommand::QrTimeout).await;
                }
            },
        );
    }

    /// Re-create the session for `phone` after the retry delay.
    ///
    /// `origin` is the generation (or clock value) that asked for it. Requests
    /// older than a deletion of the phone, or than its live session, are dropped.
    pub(super) fn schedule_recreate(
        self: &Arc<Self>,
        phone: &str,
        line_id: Option<String>,
        context: CreationContext,
        origin: u64,
    ) {
        if self.deleted_since(phone, origin) {
            debug!("{phone} was deleted, not recreating ({})", context.as_str());
            return;
        }
        if self
            .registry
            .get(phone)
            .is_some_and(|live| live.generation > origin)
        {
            debug!("{phone} has a newer session, not recreating ({})", context.as_str());
            return;
        }
        let delay = self.recovery.retry_delay();
        info!(
            "session for {phone} will be recreated ({}) in {}s",
            context.as_str(),
            delay.as_secs()
        );
        let gateway = Arc::clone(self);
        let key = phone.to_string();
        self.timers.schedule(phone, TimerKind::Retry, delay, async move {
            gateway.recreate(key, line_id, context, origin).await;
        });
    }

    /// One re-creation attempt. Resume gets a single retry; every other
    /// context keeps retrying at the fixed delay.
    pub(super) async fn recreate(
        self: Arc<Self>,
        phone: String,
        line_id: Option<String>,
        context: CreationContext,
        origin: u64,
    ) {
        if self.deleted_since(&phone, origin) {
            debug!("{phone} was deleted, dropping {} attempt", context.as_str());
            return;
        }
        match self
            .start_session(&phone, line_id.clone(), context, None)
            .await
        {
            Ok(()) => {}
            Err(GatewayError::AlreadyExists(_)) => {
                debug!("session for {phone} already exists, skipping {}", context.as_str());
            }
            Err(e) => {
                warn!("recreating session for {phone} ({}) failed: {e}", context.as_str());
                if context != CreationContext::Resume {
                    self.schedule_recreate(&phone, line_id, context, origin);
                }
            }
        }
    }

    /// Tear down the live session for `phone`, if any, without touching storage.
    ///
    /// Recovery requests issued before this call are void afterwards, even
    /// ones the actor raises while it still drains earlier events.
    async fn destroy_session(&self, phone: &str) {
        self.mark_deleted(phone);
        self.timers.cancel(phone);
        let Some(handle) = self.registry.remove(phone) else {
            return;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if handle
            .commands
            .send(SessionCommand::Destroy { ack: ack_tx })
            .await
            .is_err()
        {
            return;
        }
        if tokio::time::timeout(DESTROY_ACK_TIMEOUT, ack_rx)
            .await
            .is_err()
        {
            warn!("session for {phone} did not acknowledge deletion in time");
        }
    }

    /// Delete the session for `phone` and purge its credentials and cache.
    /// Deleting a phone with no session is not an error.
    pub async fn delete_session(&self, phone: &str) -> Result<(), GatewayError> {
        self.destroy_session(phone).await;
        self.layout.purge(phone).await?;
        info!("session for {phone} deleted");
        Ok(())
    }

    /// Destroy every live session, keeping storage for the next start.
    pub async fn shutdown(&self) {
        self.timers.cancel_all();
        let phones = self.registry.phones();
        info!("shutting down {} session(s)", phones.len());
        for phone in phones {
            self.destroy_session(&phone).await;
        }
    }
}

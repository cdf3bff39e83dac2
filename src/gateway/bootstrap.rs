//! Startup reconciliation: resume every backend phone that has stored credentials.

use super::machine::CreationContext;
use super::Gateway;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use wabridge_core::{
    error::GatewayError,
    traits::{Backend, RegisteredPhone},
};

/// Fetch the phones that should be active, retrying at a fixed delay.
/// Gives up with an empty list once `attempts` are used.
pub(super) async fn fetch_with_retry(
    backend: &dyn Backend,
    attempts: u32,
    delay: Duration,
) -> Vec<RegisteredPhone> {
    for attempt in 1..=attempts {
        match backend.registered_phones().await {
            Ok(phones) => {
                info!("backend lists {} registered phone(s)", phones.len());
                return phones;
            }
            Err(e) if attempt < attempts => {
                warn!(
                    "fetching registered phones failed (attempt {attempt}/{attempts}): {e}, retrying in {}s",
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("fetching registered phones failed (attempt {attempt}/{attempts}): {e}, giving up");
            }
        }
    }
    Vec::new()
}

impl Gateway {
    /// Resume sessions for every registered phone with persisted credentials.
    pub async fn bootstrap(self: &Arc<Self>) {
        let phones = fetch_with_retry(
            self.backend.as_ref(),
            self.recovery.bootstrap_attempts,
            self.recovery.bootstrap_retry_delay(),
        )
        .await;

        let mut resumed = 0usize;
        for RegisteredPhone {
            phone_number,
            line_id,
        } in phones
        {
            if !self.layout.has_credentials(&phone_number) {
                info!("no stored credentials for {phone_number}, skipping resume");
                continue;
            }
            match self
                .start_session(&phone_number, line_id.clone(), CreationContext::Resume, None)
                .await
            {
                Ok(()) => resumed += 1,
                Err(GatewayError::AlreadyExists(_)) => {
                    info!("{phone_number} already has a live session");
                }
                Err(e) => {
                    warn!("resuming {phone_number} failed: {e}");
                    self.schedule_recreate(
                        &phone_number,
                        line_id,
                        CreationContext::Resume,
                        self.clock(),
                    );
                }
            }
        }
        info!("bootstrap complete, {resumed} session(s) resumed");
    }
}

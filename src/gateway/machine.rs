//! Session lifecycle state machine.
//!
//! `transition` is pure: it maps the current state and a trigger onto the
//! next state plus the side effects the session actor must run, in order.

use serde::Serialize;

/// Lifecycle state of one phone's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingQrScan,
    Authenticated,
    Ready,
    Disconnected,
    AuthFailed,
    Destroyed,
}

impl SessionState {
    /// No further transitions happen once a session lands here.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::AuthFailed | Self::Destroyed)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated | Self::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingQrScan => "awaiting_qr_scan",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::AuthFailed => "auth_failed",
            Self::Destroyed => "destroyed",
        }
    }
}

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationContext {
    /// Interactive registration through the control surface.
    Register,
    /// Restored from persisted credentials at startup.
    Resume,
    /// After a disconnection, or a send for a phone with no live session.
    Reconnect,
    /// Scheduled re-pairing after a QR timeout or an auth failure.
    Retry,
}

impl CreationContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Resume => "resume",
            Self::Reconnect => "reconnect",
            Self::Retry => "retry",
        }
    }
}

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Qr(String),
    Authenticated,
    Ready,
    AuthFailure(String),
    Disconnected(String),
    QrTimeout,
    Destroy,
}

/// What a waiting registration caller receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Pairing challenge rendered as a PNG data URL.
    Qr(String),
    Ready,
    AuthFailed(String),
    Disconnected(String),
}

/// A side effect for the session actor to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RenderQr(String),
    StartQrTimer,
    CancelTimer,
    NotifyAuthSuccess,
    Resolve(RegistrationOutcome),
    /// Release the client and drop the registry entry.
    Teardown,
    ScheduleRecreate(CreationContext),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(state: SessionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    fn to(next: SessionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }
}

/// Compute the next state and effects for `trigger` in `state`.
pub fn transition(state: SessionState, trigger: Trigger) -> Transition {
    use SessionState::*;

    if state.is_terminal() {
        return Transition::stay(state);
    }

    match (state, trigger) {
        (Initializing, Trigger::Qr(code)) => Transition::to(
            AwaitingQrScan,
            vec![Effect::RenderQr(code), Effect::StartQrTimer],
        ),
        // Rotation: re-render only, the scan window keeps running.
        (AwaitingQrScan, Trigger::Qr(code)) => {
            Transition::to(AwaitingQrScan, vec![Effect::RenderQr(code)])
        }
        (Initializing | AwaitingQrScan, Trigger::Authenticated) => {
            Transition::to(Authenticated, vec![Effect::CancelTimer])
        }
        (Initializing | AwaitingQrScan | Authenticated, Trigger::Ready) => Transition::to(
            Ready,
            vec![
                Effect::CancelTimer,
                Effect::NotifyAuthSuccess,
                Effect::Resolve(RegistrationOutcome::Ready),
            ],
        ),
        (_, Trigger::AuthFailure(reason)) => Transition::to(
            AuthFailed,
            vec![
                Effect::CancelTimer,
                Effect::Resolve(RegistrationOutcome::AuthFailed(reason)),
                Effect::Teardown,
                Effect::ScheduleRecreate(CreationContext::Retry),
            ],
        ),
        (_, Trigger::Disconnected(reason)) => Transition::to(
            Disconnected,
            vec![
                Effect::CancelTimer,
                Effect::Resolve(RegistrationOutcome::Disconnected(reason)),
                Effect::Teardown,
                Effect::ScheduleRecreate(CreationContext::Reconnect),
            ],
        ),
        (AwaitingQrScan, Trigger::QrTimeout) => Transition::to(
            Disconnected,
            vec![
                Effect::CancelTimer,
                Effect::Teardown,
                Effect::ScheduleRecreate(CreationContext::Retry),
            ],
        ),
        (_, Trigger::Destroy) => Transition::to(
            Destroyed,
            vec![
                Effect::CancelTimer,
                Effect::Resolve(RegistrationOutcome::Disconnected(
                    "session deleted".into(),
                )),
                Effect::Teardown,
            ],
        ),
        // Stale timers, duplicate readiness, QR after authentication.
        (state, _) => Transition::stay(state),
    }
}

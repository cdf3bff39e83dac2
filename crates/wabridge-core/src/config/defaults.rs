//! Default values for serde `default = "..."` attributes.

/// Used when `backend.base_url` is empty.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Inbound media above this size is never stored (16 MiB).
pub const MAX_INBOUND_MEDIA_BYTES: u64 = 16 * 1024 * 1024;

pub(super) fn default_host() -> String {
    "0.0.0.0".to_string()
}
pub(super) fn default_port() -> u16 {
    3000
}
pub(super) fn default_registration_timeout() -> u64 {
    60
}
pub(super) fn default_webhook_path() -> String {
    "/api/whatsapp/webhook".to_string()
}
pub(super) fn default_notify_path() -> String {
    "/api/whatsapp/NotifyAuthSuccess".to_string()
}
pub(super) fn default_phones_path() -> String {
    "/api/whatsapp/RegisteredPhones".to_string()
}
pub(super) fn default_request_timeout() -> u64 {
    15
}
pub(super) fn default_data_dir() -> String {
    "~/.wabridge".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_recovery_secs() -> u64 {
    30
}
pub(super) fn default_bootstrap_attempts() -> u32 {
    5
}
pub(super) fn default_max_inbound_bytes() -> u64 {
    MAX_INBOUND_MEDIA_BYTES
}

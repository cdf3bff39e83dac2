//! Per-phone on-disk layout: credentials, client cache, inbound media.
//!
//! ```text
//! {data_dir}/auth/session-{id}/    credentials (owned by the live session)
//! {data_dir}/cache/session-{id}/   client cache
//! {data_dir}/files/session-{id}/   inbound media
//! ```
//!
//! `{id}` is the phone number reduced to `[A-Za-z0-9_-]`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::GatewayError;

/// Reduce a phone number to a filesystem-safe identifier.
pub fn sanitize_phone_id(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Resolves the directories that belong to one phone number.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, area: &str, phone: &str) -> PathBuf {
        self.root
            .join(area)
            .join(format!("session-{}", sanitize_phone_id(phone)))
    }

    pub fn credentials_dir(&self, phone: &str) -> PathBuf {
        self.session_dir("auth", phone)
    }

    pub fn cache_dir(&self, phone: &str) -> PathBuf {
        self.session_dir("cache", phone)
    }

    pub fn files_dir(&self, phone: &str) -> PathBuf {
        self.session_dir("files", phone)
    }

    /// Whether a credential directory was persisted for this phone.
    pub fn has_credentials(&self, phone: &str) -> bool {
        self.credentials_dir(phone).is_dir()
    }

    /// Sanitized identifiers of every phone with persisted credentials.
    pub fn stored_sessions(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.root.join("auth")) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.strip_prefix("session-"))
                    .map(str::to_string)
            })
            .collect();
        ids.sort();
        ids
    }

    /// Remove credential and cache directories. Missing directories are fine.
    ///
    /// Callers must tear the live session down first.
    pub async fn purge(&self, phone: &str) -> Result<(), GatewayError> {
        for dir in [self.credentials_dir(phone), self.cache_dir(phone)] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => info!("removed {}", dir.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

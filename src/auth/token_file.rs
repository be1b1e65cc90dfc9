//! Persisted OAuth credential
//!
//! The credential is stored as a small versioned JSON document holding the
//! access token, refresh token and expiry. It plugs into yup-oauth2 as a
//! [`TokenStorage`], so tokens obtained by the first-run flow or by a
//! refresh are written back automatically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use google_drive3::yup_oauth2::storage::{TokenInfo, TokenStorage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Current on-disk format version
pub const RECORD_VERSION: u32 = 1;

/// Serializable credential record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub version: u32,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as seconds since the Unix epoch
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
    /// Scopes the token was granted for
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CredentialRecord {
    fn from_token(scopes: &[&str], token: &TokenInfo) -> Self {
        Self {
            version: RECORD_VERSION,
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token.expires_at.map(|t| t.unix_timestamp()),
            id_token: token.id_token.clone(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn to_token(&self) -> TokenInfo {
        TokenInfo {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self
                .expires_at
                .and_then(|secs| time::OffsetDateTime::from_unix_timestamp(secs).ok()),
            id_token: self.id_token.clone(),
        }
    }

    /// True once the access token is past its expiry
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= Utc::now().timestamp(),
            None => self.access_token.is_none(),
        }
    }

    /// A refresh token lets an expired access token be renewed silently
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    fn covers(&self, scopes: &[&str]) -> bool {
        scopes.iter().all(|s| self.scopes.iter().any(|have| have == s))
    }

    /// Load a record. A missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: CredentialRecord = serde_json::from_str(&content).map_err(|e| {
            GatewayError::Auth(format!("Malformed credential file {:?}: {}", path, e))
        })?;

        if record.version != RECORD_VERSION {
            return Err(GatewayError::Auth(format!(
                "Unsupported credential file version {} in {:?}",
                record.version, path
            )));
        }
        Ok(Some(record))
    }

    /// Write the record, replacing the previous file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| GatewayError::Auth(format!("Failed to encode credential: {}", e)))?;

        let tmp = path.with_extension("tmp");
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// yup-oauth2 token storage backed by a [`CredentialRecord`] file
pub struct FileTokenStorage {
    path: PathBuf,
    current: Mutex<Option<CredentialRecord>>,
}

impl FileTokenStorage {
    /// Open the storage, reading any existing record.
    ///
    /// An unreadable or outdated record is ignored so the interactive flow
    /// can replace it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match CredentialRecord::load(&path) {
            Ok(Some(record)) => {
                if record.is_expired() && record.can_refresh() {
                    debug!("Stored credential expired; it will be refreshed");
                }
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring stored credential: {}", e);
                None
            }
        };

        Self {
            path,
            current: Mutex::new(current),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> Option<CredentialRecord> {
        self.current.lock().clone()
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn set(&self, scopes: &[&str], token: TokenInfo) -> anyhow::Result<()> {
        let mut record = CredentialRecord::from_token(scopes, &token);

        // A refresh response may omit the refresh token; keep the old one
        if record.refresh_token.is_none() {
            if let Some(previous) = self.current.lock().as_ref() {
                record.refresh_token = previous.refresh_token.clone();
            }
        }

        record.save(&self.path)?;
        debug!("Saved credential to {:?}", self.path);
        *self.current.lock() = Some(record);
        Ok(())
    }

    async fn get(&self, scopes: &[&str]) -> Option<TokenInfo> {
        let current = self.current.lock();
        current
            .as_ref()
            .filter(|record| record.covers(scopes))
            .map(CredentialRecord::to_token)
    }
}

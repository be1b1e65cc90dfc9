//! Google Drive authentication
//!
//! The Drive client only needs something that hands out bearer tokens.
//! [`TokenProviderInner`] is that seam; [`TokenProviderWrapper`] adapts it
//! to the `GetToken` trait the generated Drive client expects.
//!
//! - [`InstalledFlowProvider`]: OAuth2 installed-application flow with a
//!   persisted, automatically refreshed credential
//! - [`token_file`]: the on-disk credential record

pub mod installed;
pub mod token_file;

use async_trait::async_trait;
use google_apis_common::GetToken;
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use installed::InstalledFlowProvider;

/// Full read/write access to the user's Drive
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Environment toggle selecting console code entry over the browser redirect
pub const CONSOLE_ENV_VAR: &str = "OAUTH_CONSOLE";

/// Interface implemented by every token source.
#[async_trait]
pub trait TokenProviderInner: Send + Sync {
    /// Get a token for the given scopes.
    ///
    /// Returns `Ok(Some(token))` if a token is available,
    /// `Ok(None)` if no token is needed/available,
    /// or `Err` if token fetching failed.
    async fn get_token(
        &self,
        scopes: &[&str],
    ) -> Result<Option<String>, Box<dyn StdError + Send + Sync>>;
}

/// Wrapper that implements google-apis-common's GetToken trait.
#[derive(Clone)]
pub struct TokenProviderWrapper {
    inner: Arc<dyn TokenProviderInner>,
}

impl TokenProviderWrapper {
    pub fn new<T: TokenProviderInner + 'static>(provider: T) -> Self {
        Self {
            inner: Arc::new(provider),
        }
    }

    /// Fetch a token up front so an interactive first-run flow happens
    /// before any client connects
    pub async fn warm_up(&self) -> Result<(), Box<dyn StdError + Send + Sync>> {
        match self.inner.get_token(&[DRIVE_SCOPE]).await? {
            Some(_) => Ok(()),
            None => Err("Authorization flow returned no access token".into()),
        }
    }
}

impl GetToken for TokenProviderWrapper {
    fn get_token<'a>(
        &'a self,
        scopes: &'a [&str],
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Option<String>, Box<dyn StdError + Send + Sync>>>
                + Send
                + 'a,
        >,
    > {
        let inner = self.inner.clone();
        Box::pin(async move { inner.get_token(scopes).await })
    }
}

/// Decide between console and browser authorization.
///
/// The environment variable wins over the configured default when set.
pub fn console_flow_requested(configured: bool, env_value: Option<&str>) -> bool {
    match env_value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v.is_empty() => configured,
        Some(v) => matches!(v.as_str(), "1" | "true" | "yes"),
        None => configured,
    }
}

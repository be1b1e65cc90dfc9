//! Installed-application OAuth2 flow.
//!
//! On first run the user authorizes the app, either through a local
//! redirect (browser) or by pasting a code into the console. The resulting
//! credential is persisted through [`FileTokenStorage`] and refreshed by
//! yup-oauth2 whenever it expires.

use async_trait::async_trait;
use google_drive3::yup_oauth2::{
    read_application_secret, InstalledFlowAuthenticator, InstalledFlowReturnMethod,
};
use hyper_util::client::legacy::connect::HttpConnector;
use std::error::Error as StdError;
use std::path::Path;
use tracing::info;

use super::token_file::FileTokenStorage;
use super::TokenProviderInner;
use crate::error::{GatewayError, Result};

type Authenticator = google_drive3::yup_oauth2::authenticator::Authenticator<
    hyper_rustls::HttpsConnector<HttpConnector>,
>;

/// Token provider driven by an OAuth2 client secret file
pub struct InstalledFlowProvider {
    auth: Authenticator,
}

impl InstalledFlowProvider {
    /// Build the authenticator.
    ///
    /// `credentials_path` is the client secret JSON downloaded from the
    /// Google Cloud Console; `token_path` is where the credential record
    /// lives between runs.
    pub async fn new(credentials_path: &Path, token_path: &Path, console: bool) -> Result<Self> {
        let secret = read_application_secret(credentials_path)
            .await
            .map_err(|e| {
                GatewayError::Auth(format!(
                    "Failed to read credentials {:?}: {}",
                    credentials_path, e
                ))
            })?;

        let method = if console {
            info!("Using console authorization flow");
            InstalledFlowReturnMethod::Interactive
        } else {
            InstalledFlowReturnMethod::HTTPRedirect
        };

        let storage = FileTokenStorage::open(token_path);
        let auth = InstalledFlowAuthenticator::builder(secret, method)
            .with_storage(Box::new(storage))
            .build()
            .await
            .map_err(|e| {
                GatewayError::Auth(format!("Failed to create authenticator: {}", e))
            })?;

        Ok(Self { auth })
    }
}

#[async_trait]
impl TokenProviderInner for InstalledFlowProvider {
    async fn get_token(
        &self,
        scopes: &[&str],
    ) -> std::result::Result<Option<String>, Box<dyn StdError + Send + Sync>> {
        let token = self.auth.token(scopes).await?;
        Ok(token.token().map(|t| t.to_string()))
    }
}

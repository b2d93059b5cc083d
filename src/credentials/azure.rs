//
// Copyright 2026 The kv-signer Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Service principal sign-in against Microsoft Entra ID.
//!
//! The secret is the JSON credential bundle also consumed by the
//! `azure/login` action:
//!
//! ```json
//! {
//!   "clientId": "<app id>",
//!   "clientSecret": "<password>",
//!   "subscriptionId": "<subscription>",
//!   "tenantId": "<tenant>"
//! }
//! ```
//!
//! It is exchanged, through the OAuth2 client credentials grant, for a bearer
//! token scoped to Key Vault.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use super::{Credential, CredentialBroker, Secret};
use crate::errors::{from_reqwest, Result, SignerError};

/// Default public Microsoft Entra ID authority.
pub const AZURE_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// Scope granting access to the Key Vault data plane.
pub const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialBundle {
    client_id: String,
    client_secret: Zeroizing<String>,
    tenant_id: String,
    #[allow(dead_code)]
    subscription_id: Option<String>,
}

impl CredentialBundle {
    fn parse(secret: &Secret) -> Result<Self> {
        let bundle: CredentialBundle = serde_json::from_str(secret.as_str()).map_err(|e| {
            // serde_json errors only carry line and column, never the input.
            SignerError::AuthError(format!("cloud credential bundle is malformed: {e}"))
        })?;

        for (name, value) in [
            ("clientId", bundle.client_id.as_str()),
            ("clientSecret", bundle.client_secret.as_str()),
            ("tenantId", bundle.tenant_id.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(SignerError::AuthError(format!(
                    "cloud credential bundle has an empty {name}"
                )));
            }
        }
        Ok(bundle)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Zeroizing<String>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Broker exchanging a service principal credential bundle for a Key Vault
/// access token.
#[derive(Debug, Clone)]
pub struct AzureIdentityBroker {
    authority_host: Url,
    http: reqwest::Client,
}

impl AzureIdentityBroker {
    /// Create a new broker.
    ///
    /// * authority_host: root of the identity provider, [`AZURE_AUTHORITY_HOST`]
    ///   for the public cloud.
    pub fn new(authority_host: Url) -> Self {
        Self {
            authority_host,
            http: reqwest::Client::new(),
        }
    }

    /// Broker for the public cloud, or for `authority_host` when given.
    pub fn from_authority(authority_host: Option<&str>) -> Result<Self> {
        let host = authority_host.unwrap_or(AZURE_AUTHORITY_HOST);
        let mut url = Url::parse(host)
            .map_err(|e| SignerError::ConfigError(format!("invalid authority host {host}: {e}")))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self::new(url))
    }

    fn token_url(&self, tenant_id: &str) -> Result<Url> {
        if !tenant_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
        {
            return Err(SignerError::AuthError(
                "cloud credential bundle has an invalid tenantId".into(),
            ));
        }
        self.authority_host
            .join(&format!("{tenant_id}/oauth2/v2.0/token"))
            .map_err(|e| SignerError::ConfigError(format!("invalid authority host: {e}")))
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl CredentialBroker for AzureIdentityBroker {
    async fn authenticate(&self, secret: &Secret) -> Result<Credential> {
        let bundle = CredentialBundle::parse(secret)?;
        let url = self.token_url(&bundle.tenant_id)?;
        debug!(url = %url, client_id = %bundle.client_id, "requesting access token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", bundle.client_id.as_str()),
            ("client_secret", bundle.client_secret.as_str()),
            ("scope", KEY_VAULT_SCOPE),
        ];
        let requested_at = Utc::now();
        let response = self
            .http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| from_reqwest("identity provider", e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SignerError::NetworkError(format!(
                "identity provider answered with {status}"
            )));
        }
        if !status.is_success() {
            let reason = match response.json::<TokenErrorResponse>().await {
                Ok(body) => match body.error_description {
                    Some(description) => format!("{}: {description}", body.error),
                    None => body.error,
                },
                Err(_) => status.to_string(),
            };
            return Err(SignerError::AuthError(format!(
                "identity provider rejected the credential: {reason}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| from_reqwest("identity provider", e))?;
        if token.access_token.is_empty() || token.expires_in <= 0 {
            return Err(SignerError::AuthError(
                "identity provider returned an unusable token".into(),
            ));
        }

        Ok(Credential::bearer(
            Secret::new(token.access_token.as_str()),
            requested_at + Duration::seconds(token.expires_in),
        ))
    }
}

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

//! Key Vault REST client.

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD as BASE64_STD_ENGINE, URL_SAFE_NO_PAD as BASE64_URL_ENGINE},
    Engine as _,
};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{KeyVaultApi, SigningKeyHandle, VaultCertificate};
use crate::credentials::Credential;
use crate::crypto::SigningAlgorithm;
use crate::errors::{from_reqwest, Result, SignerError};

pub const KEY_VAULT_API_VERSION: &str = "7.4";

#[derive(Deserialize)]
struct CertificateBundle {
    cer: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    attributes: Option<CertificateAttributes>,
}

#[derive(Deserialize)]
struct CertificateAttributes {
    #[serde(default = "enabled_by_default")]
    enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Serialize)]
struct SignRequest {
    alg: String,
    value: String,
}

#[derive(Deserialize)]
struct SignResult {
    value: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: VaultError,
}

#[derive(Deserialize)]
struct VaultError {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the Key Vault data plane.
#[derive(Debug, Clone, Default)]
pub struct KeyVaultClient {
    http: reqwest::Client,
}

impl KeyVaultClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn url(key: &SigningKeyHandle, path: &str) -> Result<Url> {
        let mut url = key
            .vault_url()
            .join(path)
            .map_err(|e| SignerError::ConfigError(format!("invalid vault url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api-version", KEY_VAULT_API_VERSION);
        Ok(url)
    }

    /// Turn a non successful answer into the error taxonomy.
    async fn check(response: Response, operation: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = match response.json::<ErrorEnvelope>().await {
            Ok(body) => match body.error.message {
                Some(message) => format!("{}: {message}", body.error.code),
                None => body.error.code,
            },
            Err(_) => status.to_string(),
        };
        let message = format!("vault refused to {operation}: {reason}");
        Err(match status {
            StatusCode::UNAUTHORIZED => SignerError::AuthError(message),
            s if s.is_server_error() => SignerError::NetworkError(message),
            _ => SignerError::SigningError(message),
        })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl KeyVaultApi for KeyVaultClient {
    async fn fetch_certificate(
        &self,
        key: &SigningKeyHandle,
        credential: &Credential,
    ) -> Result<VaultCertificate> {
        let path = match key.version() {
            Some(version) => format!("certificates/{}/{version}", key.name()),
            None => format!("certificates/{}", key.name()),
        };
        let url = Self::url(key, &path)?;
        debug!(url = %url, "GET certificate");

        let response = self
            .http
            .get(url)
            .bearer_auth(credential.bearer_token()?)
            .send()
            .await
            .map_err(|e| from_reqwest("key vault", e))?;
        let bundle: CertificateBundle = Self::check(response, "read the certificate")
            .await?
            .json()
            .await
            .map_err(|e| from_reqwest("key vault", e))?;

        let der = BASE64_STD_ENGINE.decode(bundle.cer.as_bytes()).map_err(|e| {
            SignerError::SigningError(format!("vault returned an undecodable certificate: {e}"))
        })?;
        Ok(VaultCertificate {
            der,
            key_id: bundle.kid,
            enabled: bundle.attributes.map(|a| a.enabled).unwrap_or(true),
        })
    }

    async fn sign_digest(
        &self,
        key: &SigningKeyHandle,
        algorithm: SigningAlgorithm,
        digest: &[u8],
        credential: &Credential,
    ) -> Result<Vec<u8>> {
        let version = key.version().ok_or_else(|| {
            SignerError::SigningError(format!("{key} must be pinned to a version to sign"))
        })?;
        let url = Self::url(key, &format!("keys/{}/{version}/sign", key.name()))?;
        debug!(url = %url, %algorithm, "POST sign");

        let request = SignRequest {
            alg: algorithm.to_string(),
            value: BASE64_URL_ENGINE.encode(digest),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(credential.bearer_token()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| from_reqwest("key vault", e))?;
        let result: SignResult = Self::check(response, "sign")
            .await?
            .json()
            .await
            .map_err(|e| from_reqwest("key vault", e))?;

        let signature = BASE64_URL_ENGINE
            .decode(result.value.trim_end_matches('=').as_bytes())
            .map_err(|e| {
                SignerError::SigningError(format!("vault returned an undecodable signature: {e}"))
            })?;
        if signature.is_empty() {
            return Err(SignerError::SigningError(
                "vault returned an empty signature".into(),
            ));
        }
        Ok(signature)
    }
}

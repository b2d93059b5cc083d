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

//! Exchange of stored secrets for short-lived credentials.
//!
//! Secrets enter the process through the environment, are wrapped into a
//! [`Secret`] right away and never leave it again other than inside of an
//! HTTP request. Neither [`Secret`] nor [`Credential`] print their material
//! through `Debug`, and both wipe it from memory when dropped.
//!
//! Credentials are bound to a single run: they carry an expiry and must be
//! acquired again by the next run instead of being cached on disk.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroizing;

use crate::errors::{Result, SignerError};

pub mod azure;
pub use azure::AzureIdentityBroker;

/// Lifetime granted to registry credentials for the duration of a run.
pub const REGISTRY_CREDENTIAL_LIFETIME_SECS: i64 = 3600;

/// An opaque secret supplied out-of-band.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(Zeroizing::new(value.into()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// The material held by a [`Credential`].
#[derive(Clone)]
pub enum CredentialMaterial {
    /// HTTP basic pair
    Basic { username: String, password: Secret },
    /// Bearer token
    Bearer(Secret),
}

/// Short-lived access material with an expiry.
#[derive(Clone)]
pub struct Credential {
    material: CredentialMaterial,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: Secret, expires_at: DateTime<Utc>) -> Self {
        Credential {
            material: CredentialMaterial::Basic {
                username: username.into(),
                password,
            },
            expires_at,
        }
    }

    pub fn bearer(token: Secret, expires_at: DateTime<Utc>) -> Self {
        Credential {
            material: CredentialMaterial::Bearer(token),
            expires_at,
        }
    }

    pub fn material(&self) -> &CredentialMaterial {
        &self.material
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns whether or not the credential can still be used.
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }

    /// Fail with an [`SignerError::AuthError`] once the credential expired.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SignerError::AuthError(format!(
                "credential expired at {}, it must be acquired again",
                self.expires_at
            )))
        }
    }

    /// Value of an `Authorization` header carrying this credential.
    pub(crate) fn bearer_token(&self) -> Result<&str> {
        match &self.material {
            CredentialMaterial::Bearer(token) => Ok(token.as_str()),
            CredentialMaterial::Basic { .. } => Err(SignerError::AuthError(
                "a bearer token is required, got a username/password pair".into(),
            )),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.material {
            CredentialMaterial::Basic { username, .. } => format!("Basic({username})"),
            CredentialMaterial::Bearer(_) => "Bearer".to_string(),
        };
        f.debug_struct("Credential")
            .field("material", &kind)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
/// Capabilities expected from anything that turns a secret into a credential
pub trait CredentialBroker: Send + Sync {
    /// Exchange `secret` for a credential.
    ///
    /// Fails with [`SignerError::AuthError`] when the secret is malformed or
    /// rejected upstream.
    async fn authenticate(&self, secret: &Secret) -> Result<Credential>;
}

/// Broker for registry credentials: the registry password together with the
/// configured username.
///
/// Whether the registry accepts the pair is checked by the registry client
/// at login time.
#[derive(Debug, Clone)]
pub struct RegistryBroker {
    username: String,
}

impl RegistryBroker {
    pub fn new(username: impl Into<String>) -> Self {
        RegistryBroker {
            username: username.into(),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl CredentialBroker for RegistryBroker {
    async fn authenticate(&self, secret: &Secret) -> Result<Credential> {
        if self.username.trim().is_empty() {
            return Err(SignerError::AuthError("registry username is empty".into()));
        }
        if secret.is_empty() {
            return Err(SignerError::AuthError("registry password is empty".into()));
        }
        Ok(Credential::basic(
            self.username.clone(),
            secret.clone(),
            Utc::now() + Duration::seconds(REGISTRY_CREDENTIAL_LIFETIME_SECS),
        ))
    }
}

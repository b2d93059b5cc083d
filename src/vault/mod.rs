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

//! Remote signing with a key held by a cloud key vault.
//!
//! The private key never leaves the vault. The [`KeyVaultSigner`] fetches the
//! certificate bound to the key, works out the signing algorithm from it,
//! hashes the envelope's to-be-signed bytes locally and ships only the digest
//! to the vault.
//!
//! The trust mode of the resulting envelope is controlled by
//! [`PluginConfig`]:
//!
//! * `self_signed=true`: the vault certificate is the only certificate of
//!   the chain. `ca_certs` is ignored.
//! * `self_signed=false`: `ca_certs` must point to a PEM bundle with the
//!   chain of the CA that issued the vault certificate, which is appended to
//!   the leaf.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use crate::credentials::Credential;
use crate::crypto::{certificate, SigningAlgorithm};
use crate::envelope::{EnvelopeBuilder, EnvelopeFormat, Payload, SignatureEnvelope, TrustMode};
use crate::errors::{Result, SignerError};
use crate::registry::PinnedArtifact;

mod client;
pub use client::{KeyVaultClient, KEY_VAULT_API_VERSION};

/// DNS suffix of Key Vault instances in the public cloud.
pub const KEY_VAULT_DNS_SUFFIX: &str = "vault.azure.net";

/// Reference to a key held by the vault. Never key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyHandle {
    vault_url: Url,
    name: String,
    version: Option<String>,
}

fn valid_object_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl SigningKeyHandle {
    /// Create a handle from its parts.
    pub fn new(vault_url: Url, name: &str, version: Option<&str>) -> Result<Self> {
        if !valid_object_name(name) {
            return Err(SignerError::ConfigError(format!("invalid key name {name:?}")));
        }
        if let Some(version) = version {
            if !valid_object_name(version) {
                return Err(SignerError::ConfigError(format!(
                    "invalid key version {version:?}"
                )));
            }
        }
        let mut vault_url = vault_url;
        vault_url.set_path("/");
        vault_url.set_query(None);
        Ok(SigningKeyHandle {
            vault_url,
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }

    /// Parse the `KEY_ID` setting.
    ///
    /// Accepted forms:
    /// * a key identifier: `https://<vault>.vault.azure.net/keys/<name>[/<version>]`
    /// * a key name, optionally followed by `/<version>`, combined with
    ///   `vault_name` (the `AKV_NAME` setting)
    pub fn parse(key_id: &str, vault_name: Option<&str>) -> Result<Self> {
        if key_id.starts_with("https://") || key_id.starts_with("http://") {
            let url = Url::parse(key_id)
                .map_err(|e| SignerError::ConfigError(format!("invalid key id {key_id}: {e}")))?;
            let segments: Vec<&str> = url
                .path_segments()
                .map(|s| s.filter(|s| !s.is_empty()).collect())
                .unwrap_or_default();
            return match segments.as_slice() {
                ["keys", name] => SigningKeyHandle::new(url.clone(), name, None),
                ["keys", name, version] => SigningKeyHandle::new(url.clone(), name, Some(version)),
                _ => Err(SignerError::ConfigError(format!(
                    "key id {key_id} does not name a key"
                ))),
            };
        }

        let vault_name = vault_name.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            SignerError::ConfigError(format!(
                "key {key_id} is not a full key id and no vault name was given"
            ))
        })?;
        if !valid_object_name(vault_name) {
            return Err(SignerError::ConfigError(format!(
                "invalid vault name {vault_name:?}"
            )));
        }
        let vault_url = Url::parse(&format!("https://{vault_name}.{KEY_VAULT_DNS_SUFFIX}/"))
            .map_err(|e| SignerError::ConfigError(format!("invalid vault name: {e}")))?;
        match key_id.split_once('/') {
            Some((name, version)) => SigningKeyHandle::new(vault_url, name, Some(version)),
            None => SigningKeyHandle::new(vault_url, key_id, None),
        }
    }

    pub fn vault_url(&self) -> &Url {
        &self.vault_url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Same key, pinned to `version`.
    pub(crate) fn with_version(&self, version: &str) -> Result<Self> {
        SigningKeyHandle::new(self.vault_url.clone(), &self.name, Some(version))
    }
}

impl Display for SigningKeyHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}keys/{}", self.vault_url, self.name)?;
        if let Some(version) = &self.version {
            write!(f, "/{version}")?;
        }
        Ok(())
    }
}

/// Options passed to the signer, as `key=value` pairs.
///
/// Recognized keys: `ca_certs` (path to a PEM bundle) and `self_signed`
/// (`true` or `false`, default `false`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginConfig {
    pub ca_certs: Option<PathBuf>,
    pub self_signed: bool,
}

impl PluginConfig {
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = PluginConfig::default();
        for pair in pairs {
            let pair = pair.as_ref().trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                SignerError::ConfigError(format!("plugin config entry {pair:?} is not key=value"))
            })?;
            match key.trim() {
                "ca_certs" => config.ca_certs = Some(PathBuf::from(value.trim())),
                "self_signed" => {
                    config.self_signed = value.trim().parse().map_err(|_| {
                        SignerError::ConfigError(format!(
                            "self_signed must be true or false, got {value:?}"
                        ))
                    })?
                }
                other => {
                    return Err(SignerError::ConfigError(format!(
                        "unknown plugin config key {other:?}"
                    )))
                }
            }
        }
        Ok(config)
    }

    /// Work out the trust mode, loading the CA chain when needed.
    ///
    /// Runs before any vault call, so a broken bundle costs nothing.
    pub fn resolve(&self) -> Result<TrustAnchor> {
        if self.self_signed {
            if let Some(ca_certs) = &self.ca_certs {
                warn!(ca_certs = %ca_certs.display(), "self_signed is set, ignoring ca_certs");
            }
            return Ok(TrustAnchor::SelfSigned);
        }
        let path = self.ca_certs.as_ref().ok_or_else(|| {
            SignerError::ConfigError(
                "ca_certs is required unless self_signed=true".to_string(),
            )
        })?;
        let chain = certificate::load_pem_bundle(path)?;
        debug!(ca_certs = %path.display(), certificates = chain.len(), "loaded CA bundle");
        Ok(TrustAnchor::CaIssued(chain))
    }
}

/// A resolved trust mode, together with the CA chain for CA-issued signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustAnchor {
    SelfSigned,
    CaIssued(Vec<Vec<u8>>),
}

impl TrustAnchor {
    pub fn trust_mode(&self) -> TrustMode {
        match self {
            TrustAnchor::SelfSigned => TrustMode::SelfSigned,
            TrustAnchor::CaIssued(_) => TrustMode::CaIssued,
        }
    }

    fn chain(&self, leaf: Vec<u8>) -> Vec<Vec<u8>> {
        match self {
            TrustAnchor::SelfSigned => vec![leaf],
            TrustAnchor::CaIssued(bundle) => {
                let mut chain = Vec::with_capacity(bundle.len() + 1);
                chain.push(leaf);
                chain.extend(bundle.iter().cloned());
                chain
            }
        }
    }
}

/// Certificate bound to a vault key.
#[derive(Debug, Clone)]
pub struct VaultCertificate {
    /// DER encoding.
    pub der: Vec<u8>,
    /// Identifier of the key backing the certificate, version included.
    pub key_id: Option<String>,
    pub enabled: bool,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
/// Operations the signer needs from the vault
pub trait KeyVaultApi: Send + Sync {
    /// Fetch the certificate bound to `key`.
    async fn fetch_certificate(
        &self,
        key: &SigningKeyHandle,
        credential: &Credential,
    ) -> Result<VaultCertificate>;

    /// Sign a precomputed `digest` with `key`.
    async fn sign_digest(
        &self,
        key: &SigningKeyHandle,
        algorithm: SigningAlgorithm,
        digest: &[u8],
        credential: &Credential,
    ) -> Result<Vec<u8>>;
}

/// Produces signature envelopes with a vault-held key.
pub struct KeyVaultSigner<V = KeyVaultClient> {
    api: V,
    format: EnvelopeFormat,
}

impl KeyVaultSigner<KeyVaultClient> {
    pub fn new(format: EnvelopeFormat) -> Self {
        KeyVaultSigner::with_api(KeyVaultClient::new(), format)
    }
}

impl<V: KeyVaultApi> KeyVaultSigner<V> {
    pub fn with_api(api: V, format: EnvelopeFormat) -> Self {
        KeyVaultSigner { api, format }
    }

    pub fn format(&self) -> EnvelopeFormat {
        self.format
    }

    /// Sign `target` with `key`.
    ///
    /// Only a digest-pinned artifact can be signed. Fails with
    /// [`SignerError::ConfigError`] when `config` is invalid (before the
    /// vault is contacted) and with [`SignerError::SigningError`] when the
    /// vault refuses to sign or its certificate cannot be used.
    pub async fn sign(
        &self,
        key: &SigningKeyHandle,
        target: &PinnedArtifact,
        config: &PluginConfig,
        credential: &Credential,
    ) -> Result<SignatureEnvelope> {
        let anchor = config.resolve()?;
        credential.ensure_valid()?;

        debug!(key = %key, "fetching signing certificate");
        let certificate = self.api.fetch_certificate(key, credential).await?;
        if !certificate.enabled {
            return Err(SignerError::SigningError(format!(
                "certificate of {key} is disabled"
            )));
        }
        let key = match (key.version(), certificate.key_id.as_deref()) {
            (Some(_), _) => key.clone(),
            (None, Some(kid)) => {
                let version = kid.rsplit('/').next().unwrap_or_default();
                key.with_version(version)?
            }
            (None, None) => {
                return Err(SignerError::SigningError(format!(
                    "vault did not say which version of {key} to use"
                )))
            }
        };

        let leaf = certificate::parse_der(&certificate.der)?;
        let now = Utc::now();
        certificate::verify_validity(&leaf, now)?;
        let algorithm = certificate::signing_algorithm(&leaf)?;

        let builder = EnvelopeBuilder::new(
            Payload::new(target.descriptor()),
            algorithm,
            anchor.trust_mode(),
            now,
        );
        let format = self.format.to_string();
        let digest = algorithm.digest(&builder.to_be_signed(&format)?);

        debug!(key = %key, %algorithm, "requesting remote signature");
        let signature = self
            .api
            .sign_digest(&key, algorithm, &digest, credential)
            .await?;

        let envelope = builder.build(signature, anchor.chain(certificate.der), &format)?;
        info!(
            artifact = %target.reference,
            key = %key,
            format = %envelope.format(),
            trust_mode = %envelope.trust_mode(),
            "artifact signed"
        );
        Ok(envelope)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credentials::Secret;
    use crate::registry::ArtifactReference;
    use base64::{engine::general_purpose::STANDARD as BASE64_STD_ENGINE, Engine as _};
    use httpmock::prelude::*;
    use rstest::rstest;
    use serde_json::json;
    use std::io::Write;

    pub(crate) const CA_LEAF: &str = include_str!("../../tests/data/certs/ec-p384-intermediate.pem");
    pub(crate) const CA_ROOT: &str = include_str!("../../tests/data/certs/ec-p384-root.pem");
    pub(crate) const SELF_SIGNED: &str =
        include_str!("../../tests/data/certs/rsa-2048-self-signed.pem");
    const EXPIRED: &str = include_str!("../../tests/data/certs/ec-p256-expired-leaf.pem");
    pub(crate) const MALFORMED_BUNDLE: &str =
        include_str!("../../tests/data/certs/malformed-bundle.pem");

    pub(crate) fn credential() -> Credential {
        Credential::bearer(Secret::new("vault-token"), Utc::now() + chrono::Duration::hours(1))
    }

    pub(crate) fn key(server: &MockServer) -> SigningKeyHandle {
        SigningKeyHandle::new(Url::parse(&server.base_url()).unwrap(), "net-monitor", None).unwrap()
    }

    pub(crate) fn target() -> PinnedArtifact {
        let reference: ArtifactReference = "myregistry.azurecr.io/net-monitor:v1".parse().unwrap();
        PinnedArtifact {
            reference: reference.pin("sha256:abc123").unwrap(),
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            size: 528,
        }
    }

    pub(crate) fn bundle_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    /// Serve `leaf_pem` as the certificate of `net-monitor`, and a fixed
    /// signature for every sign request.
    pub(crate) async fn mock_vault<'a>(
        server: &'a MockServer,
        leaf_pem: &str,
    ) -> (httpmock::Mock<'a>, httpmock::Mock<'a>) {
        let der = pem::parse(leaf_pem).unwrap().into_contents();
        let kid = format!("{}/keys/net-monitor/0123abcd", server.base_url());
        let certificate = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/certificates/net-monitor")
                    .query_param("api-version", KEY_VAULT_API_VERSION)
                    .header("authorization", "Bearer vault-token");
                then.status(200).json_body(json!({
                    "id": format!("{}/certificates/net-monitor/0123abcd", server.base_url()),
                    "kid": kid,
                    "cer": BASE64_STD_ENGINE.encode(&der),
                    "attributes": { "enabled": true }
                }));
            })
            .await;
        let sign = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/keys/net-monitor/0123abcd/sign")
                    .query_param("api-version", KEY_VAULT_API_VERSION)
                    .header("authorization", "Bearer vault-token");
                then.status(200).json_body(json!({
                    "kid": kid,
                    "value": "c2lnbmF0dXJl"
                }));
            })
            .await;
        (certificate, sign)
    }

    #[rstest]
    #[case("https://myvault.vault.azure.net/keys/net-monitor/0123abcd", None, "https://myvault.vault.azure.net/", Some("0123abcd"))]
    #[case("https://myvault.vault.azure.net/keys/net-monitor", Some("other"), "https://myvault.vault.azure.net/", None)]
    #[case("net-monitor", Some("myvault"), "https://myvault.vault.azure.net/", None)]
    #[case("net-monitor/0123abcd", Some("myvault"), "https://myvault.vault.azure.net/", Some("0123abcd"))]
    fn key_handle_forms(
        #[case] key_id: &str,
        #[case] vault: Option<&str>,
        #[case] vault_url: &str,
        #[case] version: Option<&str>,
    ) {
        let handle = SigningKeyHandle::parse(key_id, vault).unwrap();
        assert_eq!(handle.vault_url().as_str(), vault_url);
        assert_eq!(handle.name(), "net-monitor");
        assert_eq!(handle.version(), version);
    }

    #[rstest]
    #[case("net-monitor", None)]
    #[case("net-monitor", Some(""))]
    #[case("https://myvault.vault.azure.net/secrets/net-monitor", None)]
    #[case("net monitor", Some("myvault"))]
    #[case("net-monitor", Some("my.vault"))]
    fn invalid_key_handles(#[case] key_id: &str, #[case] vault: Option<&str>) {
        assert!(matches!(
            SigningKeyHandle::parse(key_id, vault),
            Err(SignerError::ConfigError(_))
        ));
    }

    #[test]
    fn plugin_config_pairs() {
        let config = PluginConfig::from_pairs(["ca_certs=/etc/ca.pem", "self_signed=false"]).unwrap();
        assert_eq!(config.ca_certs, Some(PathBuf::from("/etc/ca.pem")));
        assert!(!config.self_signed);

        for invalid in ["self_signed=yes", "colour=blue", "self_signed"] {
            assert!(matches!(
                PluginConfig::from_pairs([invalid]),
                Err(SignerError::ConfigError(_))
            ));
        }
    }

    #[rstest]
    #[case(None)]
    #[case(Some("/does/not/exist.pem"))]
    #[case(Some("malformed"))]
    fn self_signed_ignores_ca_certs(#[case] ca_certs: Option<&str>) {
        let bundle = bundle_file(MALFORMED_BUNDLE);
        let ca_certs = ca_certs.map(|c| match c {
            "malformed" => bundle.path().to_path_buf(),
            path => PathBuf::from(path),
        });
        let config = PluginConfig {
            ca_certs,
            self_signed: true,
        };
        assert_eq!(config.resolve().unwrap(), TrustAnchor::SelfSigned);
    }

    #[test]
    fn ca_issued_requires_a_bundle() {
        let err = PluginConfig::default().resolve().unwrap_err();
        assert!(matches!(err, SignerError::ConfigError(_)));
    }

    #[tokio::test]
    async fn ca_issued_envelope_carries_the_bundle() {
        let server = MockServer::start_async().await;
        let (certificate, sign) = mock_vault(&server, CA_LEAF).await;
        let bundle = bundle_file(CA_ROOT);
        let config = PluginConfig {
            ca_certs: Some(bundle.path().to_path_buf()),
            self_signed: false,
        };

        let signer = KeyVaultSigner::new(EnvelopeFormat::Cose);
        let envelope = signer
            .sign(&key(&server), &target(), &config, &credential())
            .await
            .unwrap();

        certificate.assert_async().await;
        sign.assert_async().await;
        assert_eq!(envelope.format(), EnvelopeFormat::Cose);
        assert_eq!(envelope.trust_mode(), TrustMode::CaIssued);
        assert_eq!(envelope.algorithm(), SigningAlgorithm::ES384);
        assert_eq!(envelope.certificate_chain().len(), 2);
        assert_eq!(envelope.signature(), b"signature");
        assert_eq!(envelope.payload().target_artifact.digest, "sha256:abc123");
    }

    #[tokio::test]
    async fn self_signed_envelope_carries_only_the_leaf() {
        let server = MockServer::start_async().await;
        mock_vault(&server, SELF_SIGNED).await;
        let bundle = bundle_file(CA_ROOT);

        let signer = KeyVaultSigner::new(EnvelopeFormat::Jws);
        let mut envelopes = Vec::new();
        for ca_certs in [None, Some(bundle.path().to_path_buf())] {
            let config = PluginConfig {
                ca_certs,
                self_signed: true,
            };
            envelopes.push(
                signer
                    .sign(&key(&server), &target(), &config, &credential())
                    .await
                    .unwrap(),
            );
        }

        for envelope in envelopes {
            assert_eq!(envelope.trust_mode(), TrustMode::SelfSigned);
            assert_eq!(envelope.algorithm(), SigningAlgorithm::PS256);
            assert_eq!(envelope.certificate_chain().len(), 1);
        }
    }

    #[tokio::test]
    async fn malformed_bundle_fails_before_contacting_the_vault() {
        let server = MockServer::start_async().await;
        let (certificate, sign) = mock_vault(&server, CA_LEAF).await;
        let bundle = bundle_file(MALFORMED_BUNDLE);
        let config = PluginConfig {
            ca_certs: Some(bundle.path().to_path_buf()),
            self_signed: false,
        };

        let err = KeyVaultSigner::new(EnvelopeFormat::Cose)
            .sign(&key(&server), &target(), &config, &credential())
            .await
            .unwrap_err();

        assert!(matches!(err, SignerError::ConfigError(_)));
        assert_eq!(certificate.hits_async().await, 0);
        assert_eq!(sign.hits_async().await, 0);
    }

    #[tokio::test]
    async fn expired_certificate_is_not_used() {
        let server = MockServer::start_async().await;
        let (_, sign) = mock_vault(&server, EXPIRED).await;
        let config = PluginConfig {
            ca_certs: None,
            self_signed: true,
        };

        let err = KeyVaultSigner::new(EnvelopeFormat::Cose)
            .sign(&key(&server), &target(), &config, &credential())
            .await
            .unwrap_err();

        assert!(matches!(err, SignerError::SigningError(_)));
        assert_eq!(sign.hits_async().await, 0);
    }

    #[tokio::test]
    async fn expired_credential_is_an_auth_error() {
        let server = MockServer::start_async().await;
        let expired = Credential::bearer(Secret::new("vault-token"), Utc::now() - chrono::Duration::seconds(1));
        let config = PluginConfig {
            ca_certs: None,
            self_signed: true,
        };

        let err = KeyVaultSigner::new(EnvelopeFormat::Cose)
            .sign(&key(&server), &target(), &config, &expired)
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::AuthError(_)));
    }
}

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

//! Run settings, read from the command line or from the environment of the
//! pipeline job.
//!
//! Every value can be given either way: `--key-id` or `KEY_ID`. Settings are
//! only checked when a command needs them, so that, for instance, listing
//! signatures works without any vault configured.

use std::path::PathBuf;

use clap::Args;

use crate::credentials::{AzureIdentityBroker, Secret};
use crate::envelope::EnvelopeFormat;
use crate::errors::{Result, SignerError};
use crate::orchestrator::{Orchestrator, SigningOptions};
use crate::registry::{ArtifactReference, ClientConfig, ImageArtifact, OciClient};
use crate::vault::{KeyVaultClient, KeyVaultSigner, PluginConfig, SigningKeyHandle};

fn parse_secret(value: &str) -> std::result::Result<Secret, std::convert::Infallible> {
    Ok(Secret::new(value))
}

/// Orchestrator talking to real services.
pub type LiveOrchestrator = Orchestrator<OciClient, KeyVaultClient, AzureIdentityBroker>;

#[derive(Debug, Clone, Default, Args)]
pub struct Settings {
    /// Registry hosting the image, e.g. `myregistry.azurecr.io`
    #[arg(long, env = "REGISTRY", global = true)]
    pub registry: Option<String>,

    /// Repository of the image inside of the registry
    #[arg(long, env = "REPOSITORY", global = true)]
    pub repository: Option<String>,

    /// Tag given to the pushed image
    #[arg(long, env = "TAG", default_value = "latest", global = true)]
    pub tag: String,

    #[arg(long, env = "REGISTRY_USERNAME", global = true)]
    pub registry_username: Option<String>,

    #[arg(
        long,
        env = "REGISTRY_PASSWORD",
        hide_env_values = true,
        value_parser = parse_secret,
        global = true
    )]
    pub registry_password: Option<Secret>,

    /// Service principal credential bundle, as JSON
    #[arg(
        long,
        env = "AZURE_CREDENTIALS",
        hide_env_values = true,
        value_parser = parse_secret,
        global = true
    )]
    pub azure_credentials: Option<Secret>,

    /// Identity provider, defaults to the public cloud
    #[arg(long, env = "AZURE_AUTHORITY_HOST", global = true)]
    pub azure_authority_host: Option<String>,

    /// Name of the key vault, needed unless the key id is a full URL
    #[arg(long, env = "AKV_NAME", global = true)]
    pub akv_name: Option<String>,

    /// Signing key: `name`, `name/version` or a full key URL
    #[arg(long, env = "KEY_ID", global = true)]
    pub key_id: Option<String>,

    /// Comma separated `key=value` signer options: `ca_certs`, `self_signed`
    #[arg(long, env = "PLUGIN_CONFIG", default_value = "", global = true)]
    pub plugin_config: String,

    /// Envelope format: `cose` or `jws`
    #[arg(long, env = "SIGNATURE_FORMAT", default_value = "cose", global = true)]
    pub signature_format: String,

    /// Link signatures through the Referrers API when the registry has it
    #[arg(long, env = "USE_REFERRERS_API", global = true)]
    pub use_referrers_api: bool,

    /// OCI image layout directory holding the image to push
    #[arg(long, env = "IMAGE_LAYOUT", global = true)]
    pub image_layout: Option<PathBuf>,

    /// Talk plain HTTP to the registry
    #[arg(long, env = "INSECURE_REGISTRY", global = true)]
    pub insecure_registry: bool,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(SignerError::ConfigError(format!("{name} is not set"))),
    }
}

impl Settings {
    /// Reference the image gets pushed as, `REGISTRY/REPOSITORY:TAG`.
    pub fn image_reference(&self) -> Result<ArtifactReference> {
        let registry = required(&self.registry, "REGISTRY")?;
        let repository = required(&self.repository, "REPOSITORY")?;
        format!("{registry}/{repository}:{}", self.tag).parse()
    }

    /// Parse a reference given on the command line. A bare repository name
    /// is looked up in the configured registry.
    pub fn reference(&self, reference: &str) -> Result<ArtifactReference> {
        let reference = reference.trim();
        let qualified = match (reference.split_once('/'), self.registry.as_deref()) {
            (Some((host, _)), _) if host.contains(['.', ':']) || host == "localhost" => {
                reference.to_string()
            }
            (_, Some(registry)) if !registry.trim().is_empty() => {
                format!("{}/{reference}", registry.trim())
            }
            _ => reference.to_string(),
        };
        qualified.parse()
    }

    pub fn image(&self) -> Result<ImageArtifact> {
        let dir = self
            .image_layout
            .as_ref()
            .ok_or_else(|| SignerError::ConfigError("IMAGE_LAYOUT is not set".to_string()))?;
        ImageArtifact::from_layout(dir, Some(&self.tag))
    }

    pub fn registry_password(&self) -> Result<&Secret> {
        self.registry_password
            .as_ref()
            .ok_or_else(|| SignerError::ConfigError("REGISTRY_PASSWORD is not set".to_string()))
    }

    pub fn azure_credentials(&self) -> Result<&Secret> {
        self.azure_credentials
            .as_ref()
            .ok_or_else(|| SignerError::ConfigError("AZURE_CREDENTIALS is not set".to_string()))
    }

    pub fn signature_format(&self) -> Result<EnvelopeFormat> {
        self.signature_format.parse()
    }

    pub fn plugin_config(&self) -> Result<PluginConfig> {
        PluginConfig::from_pairs(self.plugin_config.split(','))
    }

    /// The signing key, `None` when no key is configured.
    pub fn key_handle(&self) -> Result<Option<SigningKeyHandle>> {
        match self.key_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(key_id) => SigningKeyHandle::parse(key_id, self.akv_name.as_deref()).map(Some),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        match (&self.registry, self.insecure_registry) {
            (Some(registry), true) => ClientConfig::insecure(registry.trim()),
            _ => ClientConfig::default(),
        }
    }

    /// Check everything and wire up an orchestrator talking to the real
    /// registry, identity provider and vault.
    pub fn orchestrator(&self) -> Result<LiveOrchestrator> {
        let options = SigningOptions {
            registry_username: self.registry_username.clone().unwrap_or_default(),
            key: self.key_handle()?,
            plugin_config: self.plugin_config()?,
            use_referrers_api: self.use_referrers_api,
        };
        Ok(Orchestrator::new(
            OciClient::new(self.client_config()),
            KeyVaultSigner::new(self.signature_format()?),
            AzureIdentityBroker::from_authority(self.azure_authority_host.as_deref())?,
            options,
        ))
    }
}

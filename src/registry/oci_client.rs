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

use async_trait::async_trait;
use oci_client::errors::{OciDistributionError, OciErrorCode};
use oci_client::manifest::{
    OciDescriptor, OciImageIndex, OciImageManifest, OciManifest, IMAGE_MANIFEST_LIST_MEDIA_TYPE,
    IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_client::secrets::RegistryAuth;
use oci_client::{Reference, RegistryOperation};
use serde::Deserialize;
use tracing::debug;

use super::{ClientCapabilities, ClientCapabilitiesDeps, ClientConfig, PushResponse};
use crate::errors::{Result, SignerError};

/// Client for an OCI Registry. This performs actual calls against the
/// remote registry.
///
/// For testing purposes, use instead the client inside of the
/// `mock_client` module.
pub struct OciClient {
    pub registry_client: oci_client::Client,
}

impl OciClient {
    pub fn new(config: ClientConfig) -> Self {
        OciClient {
            registry_client: oci_client::Client::new(config.into()),
        }
    }
}

impl ClientCapabilitiesDeps for OciClient {}

/// Whether the failed operation wrote to the registry.
#[derive(Clone, Copy, PartialEq)]
enum Access {
    Read,
    Write,
}

fn registry_codes(error: &OciDistributionError) -> Vec<&OciErrorCode> {
    match error {
        OciDistributionError::RegistryError { envelope, .. } => {
            envelope.errors.iter().map(|e| &e.code).collect()
        }
        _ => Vec::new(),
    }
}

fn is_not_found(error: &OciDistributionError) -> bool {
    match error {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        _ => registry_codes(error)
            .iter()
            .any(|c| matches!(c, OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown)),
    }
}

/// Translate a registry error into the error taxonomy.
fn map_error(reference: &Reference, access: Access, error: OciDistributionError) -> SignerError {
    let codes = registry_codes(&error);
    let message = format!("{}: {error}", reference.whole());

    if codes.iter().any(|c| matches!(c, OciErrorCode::Unauthorized)) {
        return SignerError::AuthError(message);
    }
    if codes.iter().any(|c| matches!(c, OciErrorCode::Denied)) {
        return match access {
            Access::Write => SignerError::ConflictError(message),
            Access::Read => SignerError::AuthError(message),
        };
    }
    match error {
        OciDistributionError::AuthenticationFailure(_)
        | OciDistributionError::UnauthorizedError { .. } => SignerError::AuthError(message),
        OciDistributionError::ServerError { code: 401, .. }
        | OciDistributionError::ServerError { code: 403, .. } => SignerError::AuthError(message),
        OciDistributionError::ServerError { code: 409, .. } => SignerError::ConflictError(message),
        _ => SignerError::NetworkError(message),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestMediaType {
    media_type: Option<String>,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ClientCapabilities for OciClient {
    async fn login(&mut self, image: &Reference, auth: &RegistryAuth) -> Result<()> {
        debug!(registry = image.registry(), "checking push access");
        self.registry_client
            .auth(image, auth, RegistryOperation::Push)
            .await
            .map(|_| ())
            .map_err(|e| map_error(image, Access::Read, e))
    }

    async fn fetch_manifest_descriptor(
        &mut self,
        image: &Reference,
        auth: &RegistryAuth,
    ) -> Result<OciDescriptor> {
        let (manifest, digest) = self
            .registry_client
            .pull_manifest_raw(
                image,
                auth,
                &[
                    OCI_IMAGE_MEDIA_TYPE,
                    IMAGE_MANIFEST_MEDIA_TYPE,
                    OCI_IMAGE_INDEX_MEDIA_TYPE,
                    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
                ],
            )
            .await
            .map_err(|e| map_error(image, Access::Read, e))?;
        let manifest = manifest.to_vec();

        let media_type = serde_json::from_slice::<ManifestMediaType>(&manifest)
            .ok()
            .and_then(|parsed| parsed.media_type)
            .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string());
        debug!(image = %image, %digest, "resolved manifest");
        Ok(OciDescriptor {
            media_type,
            digest,
            size: manifest.len() as i64,
            ..Default::default()
        })
    }

    async fn pull_manifest(
        &mut self,
        image: &Reference,
        auth: &RegistryAuth,
    ) -> Result<(OciManifest, String)> {
        self.registry_client
            .pull_manifest(image, auth)
            .await
            .map_err(|e| map_error(image, Access::Read, e))
    }

    async fn pull_image_index(
        &mut self,
        image: &Reference,
        auth: &RegistryAuth,
    ) -> Result<Option<OciImageIndex>> {
        match self.registry_client.pull_manifest(image, auth).await {
            Ok((OciManifest::ImageIndex(index), _)) => Ok(Some(index)),
            Ok((OciManifest::Image(_), _)) => Err(SignerError::ConflictError(format!(
                "{} is an image, not an index",
                image.whole()
            ))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(map_error(image, Access::Read, e)),
        }
    }

    async fn push(
        &mut self,
        image_ref: &Reference,
        layers: &[oci_client::client::ImageLayer],
        config: oci_client::client::Config,
        auth: &RegistryAuth,
        manifest: Option<OciImageManifest>,
    ) -> Result<PushResponse> {
        self.registry_client
            .push(image_ref, layers, config, auth, manifest)
            .await
            .map(PushResponse::from)
            .map_err(|e| map_error(image_ref, Access::Write, e))
    }

    async fn push_manifest_list(
        &mut self,
        reference: &Reference,
        auth: &RegistryAuth,
        index: OciImageIndex,
    ) -> Result<String> {
        self.registry_client
            .push_manifest_list(reference, auth, index)
            .await
            .map_err(|e| map_error(reference, Access::Write, e))
    }

    async fn pull_referrers(
        &mut self,
        image: &Reference,
        artifact_type: Option<&str>,
        auth: &RegistryAuth,
    ) -> Result<Option<OciImageIndex>> {
        // The Referrers API relies on the token obtained here.
        self.registry_client
            .auth(image, auth, RegistryOperation::Pull)
            .await
            .map_err(|e| map_error(image, Access::Read, e))?;

        match self
            .registry_client
            .pull_referrers(image, artifact_type)
            .await
        {
            Ok(index) => Ok(Some(index)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(OciDistributionError::ServerError { code: 400 | 405, .. }) => Ok(None),
            Err(e) if registry_codes(&e)
                .iter()
                .any(|c| matches!(c, OciErrorCode::Unsupported)) =>
            {
                Ok(None)
            }
            Err(e) => Err(map_error(image, Access::Read, e)),
        }
    }
}

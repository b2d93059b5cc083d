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

//! Interaction with OCI registries: pushing images, resolving digests and
//! linking signatures to the images they sign.

pub mod config;
pub use config::*;

pub mod image;
pub use image::ImageArtifact;

pub(crate) mod oci_client;
pub use self::oci_client::OciClient;

pub mod oci_reference;
pub use oci_reference::{validate_digest, ArtifactReference, DigestReference};

pub mod referrers;
pub use referrers::{Attachment, AttachmentMode};

use ::oci_client::manifest::OciManifest;
use async_trait::async_trait;
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::envelope::Descriptor;
use crate::errors::{Result, SignerError};

pub(crate) fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// The bytes of `manifest` as the registry client uploads them: canonical
/// JSON, keys sorted.
pub(crate) fn canonical_manifest(manifest: &OciManifest) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    manifest
        .serialize(&mut serializer)
        .map_err(|e| SignerError::SigningError(format!("cannot serialize manifest: {e}")))?;
    Ok(data)
}

/// Digest of the manifest a push stored.
///
/// Read from the manifest url the registry answered with. When that url
/// does not end with a digest, it is computed from the uploaded bytes.
pub(crate) fn pushed_digest(response: &PushResponse, manifest: &OciManifest) -> Result<String> {
    let location = response
        .manifest_url
        .rsplit_once("/manifests/")
        .and_then(|(_, rest)| rest.split(['?', '#']).next());
    match location {
        Some(digest) if validate_digest(digest).is_ok() => Ok(digest.to_string()),
        _ => Ok(sha256_digest(&canonical_manifest(manifest)?)),
    }
}

/// An artifact whose manifest digest is known.
#[derive(Debug, Clone, PartialEq)]
pub struct PinnedArtifact {
    pub reference: DigestReference,
    pub media_type: String,
    pub size: i64,
}

impl PinnedArtifact {
    /// Descriptor of the manifest, as embedded in signature payloads.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor {
            media_type: self.media_type.clone(),
            digest: self.reference.digest().to_string(),
            size: self.size,
        }
    }

    pub(crate) fn oci_descriptor(&self) -> ::oci_client::manifest::OciDescriptor {
        ::oci_client::manifest::OciDescriptor {
            media_type: self.media_type.clone(),
            digest: self.reference.digest().to_string(),
            size: self.size,
            ..Default::default()
        }
    }
}

/// Auxiliary trait, needed to express the `Send` requirement of the
/// registry clients only on targets supporting threads.
#[cfg(not(target_arch = "wasm32"))]
pub trait ClientCapabilitiesDeps: Send {}

#[cfg(target_arch = "wasm32")]
pub trait ClientCapabilitiesDeps {}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
/// Capabilities that are expected to be provided by a registry client
pub trait ClientCapabilities: ClientCapabilitiesDeps {
    /// Check that `auth` grants push access to the repository of `image`.
    async fn login(
        &mut self,
        image: &::oci_client::Reference,
        auth: &::oci_client::secrets::RegistryAuth,
    ) -> Result<()>;

    /// Media type, digest and size of the manifest `image` points to.
    async fn fetch_manifest_descriptor(
        &mut self,
        image: &::oci_client::Reference,
        auth: &::oci_client::secrets::RegistryAuth,
    ) -> Result<::oci_client::manifest::OciDescriptor>;

    async fn pull_manifest(
        &mut self,
        image: &::oci_client::Reference,
        auth: &::oci_client::secrets::RegistryAuth,
    ) -> Result<(::oci_client::manifest::OciManifest, String)>;

    /// Fetch the image index tagged by `image`, `None` when the tag does not
    /// exist yet.
    async fn pull_image_index(
        &mut self,
        image: &::oci_client::Reference,
        auth: &::oci_client::secrets::RegistryAuth,
    ) -> Result<Option<::oci_client::manifest::OciImageIndex>>;

    async fn push(
        &mut self,
        image_ref: &::oci_client::Reference,
        layers: &[::oci_client::client::ImageLayer],
        config: ::oci_client::client::Config,
        auth: &::oci_client::secrets::RegistryAuth,
        manifest: Option<::oci_client::manifest::OciImageManifest>,
    ) -> Result<PushResponse>;

    /// Push an image index, returns the url of the pushed index.
    async fn push_manifest_list(
        &mut self,
        reference: &::oci_client::Reference,
        auth: &::oci_client::secrets::RegistryAuth,
        index: ::oci_client::manifest::OciImageIndex,
    ) -> Result<String>;

    /// Query the Referrers API. `None` means the registry does not
    /// implement it.
    async fn pull_referrers(
        &mut self,
        image: &::oci_client::Reference,
        artifact_type: Option<&str>,
        auth: &::oci_client::secrets::RegistryAuth,
    ) -> Result<Option<::oci_client::manifest::OciImageIndex>>;
}

/// Resolve `reference` to the digest of the manifest it currently points to.
pub async fn resolve<C: ClientCapabilities + ?Sized>(
    client: &mut C,
    reference: &ArtifactReference,
    auth: &Auth,
) -> Result<PinnedArtifact> {
    let descriptor = client
        .fetch_manifest_descriptor(&reference.oci_reference, &auth.into())
        .await?;
    if let Some(expected) = reference.digest() {
        if expected != descriptor.digest {
            return Err(SignerError::NetworkError(format!(
                "registry served {} for {reference}",
                descriptor.digest
            )));
        }
    }
    Ok(PinnedArtifact {
        reference: reference.pin(&descriptor.digest)?,
        media_type: descriptor.media_type,
        size: descriptor.size,
    })
}

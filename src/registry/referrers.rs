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

//! Linking signature envelopes to the images they sign.
//!
//! Every envelope is stored as the single layer of its own OCI manifest,
//! whose `subject` is the signed image. Registries implementing the
//! Referrers API index such manifests on their own. For the others, the
//! list of referrers is maintained by hand in an image index tagged after
//! the subject digest (`sha256-<hex>`).

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use oci_client::client::{Config, ImageLayer};
use oci_client::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageIndex, OciImageManifest, OciManifest,
    OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_client::secrets::RegistryAuth;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
    canonical_manifest, sha256_digest, Auth, ClientCapabilities, DigestReference, PinnedArtifact,
};
use crate::crypto::certificate::thumbprint;
use crate::envelope::constants::{
    EMPTY_CONFIG_MEDIA_TYPE, SIGNATURE_ARTIFACT_TYPE, THUMBPRINT_ANNOTATION,
};
use crate::envelope::SignatureEnvelope;
use crate::errors::Result;

pub const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";

const EMPTY_CONFIG: &[u8] = b"{}";

/// How a signature got linked to its subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentMode {
    /// The registry indexes the signature through the Referrers API.
    ReferrersApi,
    /// The signature was added to the index with the given tag.
    TagFallback(String),
}

impl Display for AttachmentMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachmentMode::ReferrersApi => f.write_str("referrers API"),
            AttachmentMode::TagFallback(tag) => write!(f, "tag {tag}"),
        }
    }
}

/// Result of attaching a signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Where the signature manifest lives.
    pub signature: DigestReference,
    pub mode: AttachmentMode,
}

/// A signature found while listing the referrers of an image.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureDescriptor {
    pub reference: DigestReference,
    /// Media type of the envelope, which gives away its format.
    pub envelope_media_type: String,
    pub created: Option<String>,
}

/// Everything needed to push an envelope as an OCI artifact.
pub(crate) struct SignatureManifest {
    pub manifest: OciImageManifest,
    pub digest: String,
    pub size: i64,
    pub config: Config,
    pub layer: ImageLayer,
}

impl SignatureManifest {
    pub(crate) fn new(subject: &PinnedArtifact, envelope: &SignatureEnvelope) -> Result<Self> {
        let data = envelope.encode()?;
        let layer_descriptor = OciDescriptor {
            media_type: envelope.media_type().to_string(),
            digest: sha256_digest(&data),
            size: data.len() as i64,
            ..Default::default()
        };
        let config_descriptor = OciDescriptor {
            media_type: EMPTY_CONFIG_MEDIA_TYPE.to_string(),
            digest: sha256_digest(EMPTY_CONFIG),
            size: EMPTY_CONFIG.len() as i64,
            ..Default::default()
        };

        let thumbprints: Vec<String> = envelope
            .certificate_chain()
            .iter()
            .map(|der| thumbprint(der))
            .collect();
        let annotations: BTreeMap<String, String> = [
            (
                THUMBPRINT_ANNOTATION.to_string(),
                serde_json::to_string(&thumbprints)?,
            ),
            (
                CREATED_ANNOTATION.to_string(),
                envelope
                    .signing_time()
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ),
        ]
        .into_iter()
        .collect();

        let manifest = OciImageManifest {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_MEDIA_TYPE.to_string()),
            config: config_descriptor,
            layers: vec![layer_descriptor],
            subject: Some(subject.oci_descriptor()),
            artifact_type: Some(SIGNATURE_ARTIFACT_TYPE.to_string()),
            annotations: Some(annotations),
        };
        let serialized = canonical_manifest(&OciManifest::Image(manifest.clone()))?;

        Ok(SignatureManifest {
            digest: sha256_digest(&serialized),
            size: serialized.len() as i64,
            manifest,
            config: Config::new(EMPTY_CONFIG.to_vec(), EMPTY_CONFIG_MEDIA_TYPE.to_string(), None),
            layer: ImageLayer::new(data, envelope.media_type().to_string(), None),
        })
    }

    fn index_entry(&self) -> Result<ImageIndexEntry> {
        Ok(serde_json::from_value(json!({
            "mediaType": OCI_IMAGE_MEDIA_TYPE,
            "digest": self.digest,
            "size": self.size,
            "artifactType": SIGNATURE_ARTIFACT_TYPE,
            "annotations": self.manifest.annotations,
        }))?)
    }
}

fn empty_index() -> Result<OciImageIndex> {
    Ok(serde_json::from_value(json!({
        "schemaVersion": 2,
        "mediaType": OCI_IMAGE_INDEX_MEDIA_TYPE,
        "manifests": [],
    }))?)
}

/// Store `envelope` in the registry and link it to `subject`.
///
/// With `use_referrers_api` the Referrers API is used when the registry
/// implements it, otherwise the tag based scheme is used.
pub async fn attach<C: ClientCapabilities + ?Sized>(
    client: &mut C,
    auth: &Auth,
    subject: &PinnedArtifact,
    envelope: &SignatureEnvelope,
    use_referrers_api: bool,
) -> Result<Attachment> {
    let oci_auth: RegistryAuth = auth.into();
    let signature = SignatureManifest::new(subject, envelope)?;

    let mode = if use_referrers_api {
        match client
            .pull_referrers(
                subject.reference.as_oci(),
                Some(SIGNATURE_ARTIFACT_TYPE),
                &oci_auth,
            )
            .await?
        {
            Some(_) => AttachmentMode::ReferrersApi,
            None => {
                warn!(
                    registry = subject.reference.registry(),
                    "registry does not implement the referrers API, falling back to tags"
                );
                AttachmentMode::TagFallback(subject.reference.referrers_tag())
            }
        }
    } else {
        AttachmentMode::TagFallback(subject.reference.referrers_tag())
    };

    let reference = subject.reference.sibling(&signature.digest)?;
    debug!(signature = %reference, "pushing signature manifest");
    client
        .push(
            reference.as_oci(),
            std::slice::from_ref(&signature.layer),
            signature.config.clone(),
            &oci_auth,
            Some(signature.manifest.clone()),
        )
        .await?;

    if let AttachmentMode::TagFallback(tag) = &mode {
        let index_reference = subject.reference.sibling_tag(tag);
        let mut index = match client
            .pull_image_index(&index_reference.oci_reference, &oci_auth)
            .await?
        {
            Some(index) => index,
            None => empty_index()?,
        };
        if !index.manifests.iter().any(|m| m.digest == signature.digest) {
            index.manifests.push(signature.index_entry()?);
        }
        debug!(index = %index_reference, entries = index.manifests.len(), "updating referrers index");
        client
            .push_manifest_list(&index_reference.oci_reference, &oci_auth, index)
            .await?;
    }

    info!(subject = %subject.reference, signature = %reference, mode = %mode, "signature attached");
    Ok(Attachment {
        signature: reference,
        mode,
    })
}

/// List the signatures linked to `subject`.
pub async fn list_signatures<C: ClientCapabilities + ?Sized>(
    client: &mut C,
    auth: &Auth,
    subject: &DigestReference,
    use_referrers_api: bool,
) -> Result<Vec<SignatureDescriptor>> {
    let oci_auth: RegistryAuth = auth.into();

    let mut entries = None;
    if use_referrers_api {
        entries = client
            .pull_referrers(subject.as_oci(), Some(SIGNATURE_ARTIFACT_TYPE), &oci_auth)
            .await?
            .map(|index| index.manifests);
    }
    let entries = match entries {
        Some(entries) => entries,
        None => {
            let index_reference = subject.sibling_tag(&subject.referrers_tag());
            client
                .pull_image_index(&index_reference.oci_reference, &oci_auth)
                .await?
                .map(|index| index.manifests)
                .unwrap_or_default()
        }
    };

    let mut signatures = Vec::new();
    for entry in entries {
        let reference = subject.sibling(&entry.digest)?;
        let manifest = match client.pull_manifest(reference.as_oci(), &oci_auth).await? {
            (OciManifest::Image(manifest), _) => manifest,
            (OciManifest::ImageIndex(_), _) => continue,
        };
        let is_signature = manifest.artifact_type.as_deref() == Some(SIGNATURE_ARTIFACT_TYPE);
        let links_subject = manifest
            .subject
            .as_ref()
            .is_some_and(|s| s.digest == subject.digest());
        if !(is_signature && links_subject) {
            continue;
        }
        let Some(layer) = manifest.layers.first() else {
            continue;
        };
        signatures.push(SignatureDescriptor {
            reference,
            envelope_media_type: layer.media_type.clone(),
            created: manifest
                .annotations
                .as_ref()
                .and_then(|a| a.get(CREATED_ANNOTATION).cloned()),
        });
    }
    Ok(signatures)
}

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

#[cfg(test)]
pub(crate) mod test {
    use std::collections::{HashMap, HashSet};

    use async_trait::async_trait;
    use oci_client::{
        client::{Config, ImageLayer},
        manifest::{OciDescriptor, OciImageIndex, OciImageManifest, OciManifest},
        secrets::RegistryAuth,
        Reference,
    };
    use serde_json::json;

    use crate::errors::{Result, SignerError};
    use crate::registry::{
        canonical_manifest, sha256_digest, ClientCapabilities, ClientCapabilitiesDeps,
        PushResponse,
    };

    /// In-memory, content addressed registry.
    pub struct MockOciClient {
        pub blobs: HashMap<String, Vec<u8>>,
        /// `registry/repository@digest` to media type and manifest bytes
        pub manifests: HashMap<String, (String, Vec<u8>)>,
        /// `registry/repository:tag` to digest
        pub tags: HashMap<String, String>,
        /// Tags that cannot be moved once set, `registry/repository:tag`
        pub protected_tags: HashSet<String>,
        pub referrers_supported: bool,
        /// Accepted basic credentials, anything goes when unset
        pub credentials: Option<(String, String)>,
        /// Digest reported for pushed images instead of the real one
        pub image_digest_override: Option<String>,
        /// Digest the tag of a pushed image moves to right after the push,
        /// as if someone else pushed to the same tag
        pub moved_tag_digest: Option<String>,
        pub unreachable: bool,
    }

    impl Default for MockOciClient {
        fn default() -> Self {
            MockOciClient {
                blobs: HashMap::new(),
                manifests: HashMap::new(),
                tags: HashMap::new(),
                protected_tags: HashSet::new(),
                referrers_supported: true,
                credentials: None,
                image_digest_override: None,
                moved_tag_digest: None,
                unreachable: false,
            }
        }
    }

    impl ClientCapabilitiesDeps for MockOciClient {}

    fn repository(reference: &Reference) -> String {
        format!("{}/{}", reference.registry(), reference.repository())
    }

    impl MockOciClient {
        fn check(&self, auth: &RegistryAuth) -> Result<()> {
            if self.unreachable {
                return Err(SignerError::NetworkError(
                    "connection refused".to_string(),
                ));
            }
            match (&self.credentials, auth) {
                (None, _) => Ok(()),
                (Some((user, pass)), RegistryAuth::Basic(u, p)) if user == u && pass == p => Ok(()),
                _ => Err(SignerError::AuthError("401 Unauthorized".to_string())),
            }
        }

        fn resolve(&self, reference: &Reference) -> Option<String> {
            match reference.digest() {
                Some(digest) => Some(digest.to_string()),
                None => self
                    .tags
                    .get(&format!("{}:{}", repository(reference), reference.tag()?))
                    .cloned(),
            }
        }

        fn lookup(&self, reference: &Reference) -> Option<(String, &(String, Vec<u8>))> {
            let digest = self.resolve(reference)?;
            let entry = self
                .manifests
                .get(&format!("{}@{digest}", repository(reference)))?;
            Some((digest, entry))
        }

        fn store(
            &mut self,
            reference: &Reference,
            media_type: &str,
            data: Vec<u8>,
            digest: String,
        ) -> Result<String> {
            if let Some(expected) = reference.digest() {
                if expected != digest {
                    return Err(SignerError::NetworkError(format!(
                        "DIGEST_INVALID: manifest has digest {digest}, pushed as {expected}"
                    )));
                }
            }
            if let Some(tag) = reference.tag() {
                let key = format!("{}:{tag}", repository(reference));
                let moved = self.tags.get(&key).is_some_and(|current| *current != digest);
                if moved && self.protected_tags.contains(&key) {
                    return Err(SignerError::ConflictError(format!(
                        "DENIED: {key} is protected"
                    )));
                }
                self.tags.insert(key, digest.clone());
            }
            self.manifests.insert(
                format!("{}@{digest}", repository(reference)),
                (media_type.to_string(), data),
            );
            Ok(digest)
        }

        /// Number of manifests stored in the repository of `reference`.
        pub fn manifest_count(&self, reference: &Reference) -> usize {
            let prefix = format!("{}@", repository(reference));
            self.manifests.keys().filter(|k| k.starts_with(&prefix)).count()
        }
    }

    #[async_trait]
    impl ClientCapabilities for MockOciClient {
        async fn login(&mut self, _image: &Reference, auth: &RegistryAuth) -> Result<()> {
            self.check(auth)
        }

        async fn fetch_manifest_descriptor(
            &mut self,
            image: &Reference,
            auth: &RegistryAuth,
        ) -> Result<OciDescriptor> {
            self.check(auth)?;
            let (digest, (media_type, data)) = self
                .lookup(image)
                .ok_or_else(|| SignerError::NetworkError(format!("MANIFEST_UNKNOWN: {image}")))?;
            Ok(OciDescriptor {
                media_type: media_type.clone(),
                digest,
                size: data.len() as i64,
                ..Default::default()
            })
        }

        async fn pull_manifest(
            &mut self,
            image: &Reference,
            auth: &RegistryAuth,
        ) -> Result<(OciManifest, String)> {
            self.check(auth)?;
            let (digest, (_, data)) = self
                .lookup(image)
                .ok_or_else(|| SignerError::NetworkError(format!("MANIFEST_UNKNOWN: {image}")))?;
            let manifest: OciManifest = serde_json::from_slice(data)?;
            Ok((manifest, digest))
        }

        async fn pull_image_index(
            &mut self,
            image: &Reference,
            auth: &RegistryAuth,
        ) -> Result<Option<OciImageIndex>> {
            self.check(auth)?;
            match self.lookup(image) {
                Some((_, (_, data))) => Ok(Some(serde_json::from_slice(data)?)),
                None => Ok(None),
            }
        }

        async fn push(
            &mut self,
            image_ref: &Reference,
            layers: &[ImageLayer],
            config: Config,
            auth: &RegistryAuth,
            manifest: Option<OciImageManifest>,
        ) -> Result<PushResponse> {
            self.check(auth)?;
            for layer in layers {
                self.blobs
                    .insert(sha256_digest(&layer.data), layer.data.to_vec());
            }
            self.blobs
                .insert(sha256_digest(&config.data), config.data.to_vec());

            let manifest = manifest.unwrap_or_else(|| OciImageManifest::build(layers, &config, None));
            let data = canonical_manifest(&OciManifest::Image(manifest.clone()))?;
            let digest = match (&self.image_digest_override, &manifest.artifact_type) {
                (Some(digest), None) => digest.clone(),
                _ => sha256_digest(&data),
            };
            let media_type = manifest
                .media_type
                .clone()
                .unwrap_or_else(|| oci_client::manifest::OCI_IMAGE_MEDIA_TYPE.to_string());
            let digest = self.store(image_ref, &media_type, data, digest)?;

            if let (Some(moved), None, Some(tag)) =
                (&self.moved_tag_digest, &manifest.artifact_type, image_ref.tag())
            {
                self.tags
                    .insert(format!("{}:{tag}", repository(image_ref)), moved.clone());
            }

            Ok(PushResponse {
                config_url: format!("https://{}/v2/{}/blobs/{}", image_ref.registry(), image_ref.repository(), manifest.config.digest),
                manifest_url: format!("https://{}/v2/{}/manifests/{digest}", image_ref.registry(), image_ref.repository()),
            })
        }

        async fn push_manifest_list(
            &mut self,
            reference: &Reference,
            auth: &RegistryAuth,
            index: OciImageIndex,
        ) -> Result<String> {
            self.check(auth)?;
            let data = canonical_manifest(&OciManifest::ImageIndex(index.clone()))?;
            let digest = sha256_digest(&data);
            let media_type = index
                .media_type
                .clone()
                .unwrap_or_else(|| oci_client::manifest::OCI_IMAGE_INDEX_MEDIA_TYPE.to_string());
            let digest = self.store(reference, &media_type, data, digest)?;
            Ok(format!("https://{}/v2/{}/manifests/{digest}", reference.registry(), reference.repository()))
        }

        async fn pull_referrers(
            &mut self,
            image: &Reference,
            artifact_type: Option<&str>,
            auth: &RegistryAuth,
        ) -> Result<Option<OciImageIndex>> {
            self.check(auth)?;
            if !self.referrers_supported {
                return Ok(None);
            }
            let subject = self.resolve(image).unwrap_or_default();
            let prefix = format!("{}@", repository(image));

            let mut entries = Vec::new();
            for (key, (media_type, data)) in &self.manifests {
                let Some(digest) = key.strip_prefix(&prefix) else {
                    continue;
                };
                let Ok(OciManifest::Image(manifest)) = serde_json::from_slice::<OciManifest>(data) else {
                    continue;
                };
                let links = manifest.subject.as_ref().is_some_and(|s| s.digest == subject);
                let wanted = artifact_type.is_none() || manifest.artifact_type.as_deref() == artifact_type;
                if links && wanted {
                    entries.push(json!({
                        "mediaType": media_type,
                        "digest": digest,
                        "size": data.len(),
                        "artifactType": manifest.artifact_type,
                    }));
                }
            }
            Ok(Some(serde_json::from_value(json!({
                "schemaVersion": 2,
                "mediaType": oci_client::manifest::OCI_IMAGE_INDEX_MEDIA_TYPE,
                "manifests": entries,
            }))?))
        }
    }
}

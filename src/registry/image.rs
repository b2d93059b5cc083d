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

//! Images stored in an [OCI image layout](https://github.com/opencontainers/image-spec/blob/main/image-layout.md)
//! directory, the format written by `docker buildx build --output type=oci,tar=false`.

use std::path::{Path, PathBuf};

use oci_client::client::{Config, ImageLayer};
use oci_client::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageIndex, OciImageManifest,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE,
};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{Result, SignerError};

/// Annotation carrying the tag of a manifest inside of `index.json`.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// An image ready to be pushed.
#[derive(Clone)]
pub struct ImageArtifact {
    pub manifest: OciImageManifest,
    pub config: Config,
    pub layers: Vec<ImageLayer>,
}

impl std::fmt::Debug for ImageArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageArtifact")
            .field("config", &self.manifest.config.digest)
            .field("layers", &self.layers.len())
            .finish()
    }
}

fn layout_error(path: &Path, reason: impl std::fmt::Display) -> SignerError {
    SignerError::ConfigError(format!("image layout {}: {reason}", path.display()))
}

impl ImageArtifact {
    /// Load the image tagged `tag` from the layout at `dir`. Without a tag,
    /// the layout must hold exactly one manifest.
    ///
    /// The digest of every blob is checked while reading it.
    pub fn from_layout(dir: &Path, tag: Option<&str>) -> Result<Self> {
        let index: OciImageIndex = serde_json::from_slice(
            &std::fs::read(dir.join("index.json")).map_err(|e| layout_error(dir, e))?,
        )
        .map_err(|e| layout_error(dir, e))?;

        let entry = match tag {
            Some(tag) => index
                .manifests
                .iter()
                .find(|m| {
                    m.annotations
                        .as_ref()
                        .and_then(|a| a.get(REF_NAME_ANNOTATION))
                        .is_some_and(|name| name == tag)
                })
                .or_else(|| (index.manifests.len() == 1).then(|| &index.manifests[0])),
            None if index.manifests.len() == 1 => index.manifests.first(),
            None => None,
        }
        .ok_or_else(|| {
            layout_error(
                dir,
                format!(
                    "cannot pick a manifest among {} entries for tag {tag:?}",
                    index.manifests.len()
                ),
            )
        })?;

        let data = read_blob(dir, &entry.digest)?;
        if is_index(entry, &data) {
            return Err(layout_error(
                dir,
                format!(
                    "{} is an image index, multi-platform layouts are not supported",
                    entry.digest
                ),
            ));
        }
        let manifest: OciImageManifest = serde_json::from_slice(&data)
            .map_err(|e| layout_error(dir, format!("{} is not an image manifest: {e}", entry.digest)))?;

        let config = Config::new(
            read_descriptor(dir, &manifest.config)?,
            manifest.config.media_type.clone(),
            manifest.config.annotations.clone(),
        );
        let layers = manifest
            .layers
            .iter()
            .map(|layer| {
                Ok(ImageLayer::new(
                    read_descriptor(dir, layer)?,
                    layer.media_type.clone(),
                    layer.annotations.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(layout = %dir.display(), manifest = %entry.digest, layers = layers.len(), "loaded image");
        Ok(ImageArtifact {
            manifest,
            config,
            layers,
        })
    }
}

/// Whether `entry` points at an index instead of a single image.
fn is_index(entry: &ImageIndexEntry, data: &[u8]) -> bool {
    if matches!(
        entry.media_type.as_str(),
        OCI_IMAGE_INDEX_MEDIA_TYPE | IMAGE_MANIFEST_LIST_MEDIA_TYPE
    ) {
        return true;
    }
    serde_json::from_slice::<serde_json::Value>(data)
        .is_ok_and(|body| body.get("manifests").is_some_and(serde_json::Value::is_array))
}

fn blob_path(dir: &Path, digest: &str) -> Result<PathBuf> {
    super::validate_digest(digest)?;
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| layout_error(dir, format!("invalid digest {digest}")))?;
    Ok(dir.join("blobs").join(algorithm).join(encoded))
}

fn read_blob(dir: &Path, digest: &str) -> Result<Vec<u8>> {
    let path = blob_path(dir, digest)?;
    let data = std::fs::read(&path).map_err(|e| layout_error(dir, format!("{}: {e}", path.display())))?;

    match digest.split_once(':') {
        Some(("sha256", expected)) => {
            let actual = hex::encode(Sha256::digest(&data));
            if actual != expected {
                return Err(layout_error(
                    dir,
                    format!("blob {digest} has digest sha256:{actual}"),
                ));
            }
        }
        _ => {
            return Err(layout_error(
                dir,
                format!("unsupported digest algorithm in {digest}"),
            ))
        }
    }
    Ok(data)
}

fn read_descriptor(dir: &Path, descriptor: &OciDescriptor) -> Result<Vec<u8>> {
    let data = read_blob(dir, &descriptor.digest)?;
    if data.len() as i64 != descriptor.size {
        return Err(layout_error(
            dir,
            format!(
                "blob {} is {} bytes long, expected {}",
                descriptor.digest,
                data.len(),
                descriptor.size
            ),
        ));
    }
    Ok(data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    fn write_blob(dir: &Path, data: &[u8]) -> (String, i64) {
        let hex = hex::encode(Sha256::digest(data));
        let blobs = dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs).unwrap();
        std::fs::write(blobs.join(&hex), data).unwrap();
        (format!("sha256:{hex}"), data.len() as i64)
    }

    /// Write a single layer image tagged `v1` into `dir`.
    pub(crate) fn write_layout(dir: &Path, layer: &[u8]) {
        let (config_digest, config_size) = write_blob(dir, br#"{"architecture":"amd64","os":"linux"}"#);
        let (layer_digest, layer_size) = write_blob(dir, layer);
        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest,
                "size": config_size
            },
            "layers": [{
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": layer_digest,
                "size": layer_size
            }]
        });
        let (manifest_digest, manifest_size) = write_blob(dir, manifest.to_string().as_bytes());
        let index = json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest,
                "size": manifest_size,
                "annotations": { (REF_NAME_ANNOTATION): "v1" }
            }]
        });
        std::fs::write(dir.join("index.json"), index.to_string()).unwrap();
        std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
    }

    #[test]
    fn load_tagged_image() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path(), b"layer data");

        let image = ImageArtifact::from_layout(dir.path(), Some("v1")).unwrap();
        assert_eq!(image.layers.len(), 1);
        assert_eq!(image.layers[0].data.to_vec(), b"layer data".to_vec());
        assert_eq!(image.config.media_type, "application/vnd.oci.image.config.v1+json");
    }

    #[test]
    fn tampered_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path(), b"layer data");
        let layer = hex::encode(Sha256::digest(b"layer data"));
        std::fs::write(dir.path().join("blobs/sha256").join(layer), b"other data").unwrap();

        let err = ImageArtifact::from_layout(dir.path(), None).unwrap_err();
        assert!(matches!(err, SignerError::ConfigError(ref m) if m.contains("has digest")));
    }

    #[test]
    fn multi_platform_layout_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path(), b"layer data");
        let nested = std::fs::read(dir.path().join("index.json")).unwrap();
        let (nested_digest, nested_size) = write_blob(dir.path(), &nested);
        let index = json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "digest": nested_digest,
                "size": nested_size,
                "annotations": { (REF_NAME_ANNOTATION): "v1" }
            }]
        });
        std::fs::write(dir.path().join("index.json"), index.to_string()).unwrap();

        let err = ImageArtifact::from_layout(dir.path(), Some("v1")).unwrap_err();
        assert!(matches!(err, SignerError::ConfigError(ref m) if m.contains("multi-platform")));
    }

    #[test]
    fn missing_layout_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageArtifact::from_layout(dir.path(), None).unwrap_err();
        assert!(matches!(err, SignerError::ConfigError(_)));
    }
}

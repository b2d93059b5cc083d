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

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::errors::{Result, SignerError};

/// `ArtifactReference` names an artifact inside of an OCI registry, either by
/// a mutable tag or by an immutable digest.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactReference {
    pub(crate) oci_reference: oci_client::Reference,
}

impl FromStr for ArtifactReference {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<oci_client::Reference>()
            .map_err(|e| SignerError::ConfigError(format!("invalid reference {s}: {e}")))
            .map(|oci_reference| ArtifactReference { oci_reference })
    }
}

impl ArtifactReference {
    /// Create a reference with a registry, repository and tag.
    pub fn with_tag(registry: String, repository: String, tag: String) -> Self {
        ArtifactReference {
            oci_reference: oci_client::Reference::with_tag(registry, repository, tag),
        }
    }

    /// registry returns the name of the registry.
    pub fn registry(&self) -> &str {
        self.oci_reference.registry()
    }

    /// repository returns the name of the repository
    pub fn repository(&self) -> &str {
        self.oci_reference.repository()
    }

    /// digest returns the object's digest, if present.
    pub fn digest(&self) -> Option<&str> {
        self.oci_reference.digest()
    }

    /// tag returns the object's tag, if present.
    pub fn tag(&self) -> Option<&str> {
        self.oci_reference.tag()
    }

    /// whole returns the whole reference.
    pub fn whole(&self) -> String {
        self.oci_reference.whole()
    }

    /// Pin the reference to `digest`, dropping any tag.
    pub fn pin(&self, digest: &str) -> Result<DigestReference> {
        validate_digest(digest)?;
        Ok(DigestReference {
            oci_reference: oci_client::Reference::with_digest(
                self.registry().to_string(),
                self.repository().to_string(),
                digest.to_string(),
            ),
        })
    }

    /// Reference to another tag of the same repository.
    pub(crate) fn sibling_tag(&self, tag: &str) -> ArtifactReference {
        ArtifactReference::with_tag(
            self.registry().to_string(),
            self.repository().to_string(),
            tag.to_string(),
        )
    }
}

impl Display for ArtifactReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.oci_reference.fmt(f)
    }
}

/// A reference that is guaranteed to be qualified by a content digest.
///
/// This is the only kind of reference the signer accepts: a tag can move
/// between the moment it is resolved and the moment it is signed, a digest
/// cannot.
#[derive(Debug, Clone, PartialEq)]
pub struct DigestReference {
    oci_reference: oci_client::Reference,
}

impl DigestReference {
    pub fn registry(&self) -> &str {
        self.oci_reference.registry()
    }

    pub fn repository(&self) -> &str {
        self.oci_reference.repository()
    }

    pub fn digest(&self) -> &str {
        // Construction always goes through `validate_digest`.
        self.oci_reference.digest().unwrap_or_default()
    }

    pub fn whole(&self) -> String {
        format!("{}/{}@{}", self.registry(), self.repository(), self.digest())
    }

    /// Tag under which registries without the Referrers API keep the list of
    /// objects referring to this digest, e.g. `sha256-abc123`.
    pub fn referrers_tag(&self) -> String {
        self.digest().replacen(':', "-", 1)
    }

    pub(crate) fn as_oci(&self) -> &oci_client::Reference {
        &self.oci_reference
    }

    /// Another digest inside of the same repository.
    pub(crate) fn sibling(&self, digest: &str) -> Result<DigestReference> {
        ArtifactReference::from(self.clone()).pin(digest)
    }

    pub(crate) fn sibling_tag(&self, tag: &str) -> ArtifactReference {
        ArtifactReference::from(self.clone()).sibling_tag(tag)
    }
}

impl TryFrom<ArtifactReference> for DigestReference {
    type Error = SignerError;

    fn try_from(reference: ArtifactReference) -> Result<Self> {
        match reference.digest() {
            Some(digest) => reference.pin(&digest.to_string()),
            None => Err(SignerError::ConfigError(format!(
                "{reference} is not qualified by a digest"
            ))),
        }
    }
}

impl From<DigestReference> for ArtifactReference {
    fn from(reference: DigestReference) -> Self {
        ArtifactReference {
            oci_reference: reference.oci_reference,
        }
    }
}

impl Display for DigestReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.whole())
    }
}

/// Check `digest` against the OCI digest grammar:
/// `algorithm ":" encoded`, where algorithm is `[a-z0-9]+([+._-][a-z0-9]+)*`
/// and encoded is `[a-zA-Z0-9=_-]+`.
pub fn validate_digest(digest: &str) -> Result<()> {
    let invalid = || SignerError::ConfigError(format!("invalid digest {digest:?}"));
    let (algorithm, encoded) = digest.split_once(':').ok_or_else(invalid)?;

    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .split(['+', '.', '_', '-'])
            .all(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    let encoded_ok = !encoded.is_empty()
        && encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'=' || b == b'_' || b == b'-');

    if algorithm_ok && encoded_ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sha256:abc123", true)]
    #[case(
        "sha256:f3cfc9d0dbf931d3db4685ec659b7ac68e2a578219da4aae65427886e649b06b",
        true
    )]
    #[case("multihash+base58:QmRZxt2b1FVZPNqd8hsiykDL3TdBDeTSPX9Kv46HmX4Gx8", true)]
    #[case("sha256", false)]
    #[case(":abc", false)]
    #[case("sha256:", false)]
    #[case("SHA256:abc", false)]
    #[case("sha256:ab/c", false)]
    fn digest_grammar(#[case] digest: &str, #[case] valid: bool) {
        assert_eq!(validate_digest(digest).is_ok(), valid);
    }

    #[test]
    fn pin_drops_the_tag() {
        let reference: ArtifactReference = "myregistry.azurecr.io/net-monitor:v1".parse().unwrap();
        let pinned = reference.pin("sha256:abc123").unwrap();
        assert_eq!(pinned.whole(), "myregistry.azurecr.io/net-monitor@sha256:abc123");
        assert_eq!(pinned.referrers_tag(), "sha256-abc123");
    }

    #[test]
    fn tag_only_reference_cannot_become_digest_reference() {
        let reference: ArtifactReference = "myregistry.azurecr.io/net-monitor:v1".parse().unwrap();
        let err = DigestReference::try_from(reference).expect_err("a tag is not a digest");
        assert!(matches!(err, SignerError::ConfigError(_)));
    }

    #[test]
    fn digest_reference_from_text() {
        let reference: ArtifactReference = "localhost:5000/app@sha256:f3cfc9d0dbf931d3db4685ec659b7ac68e2a578219da4aae65427886e649b06b"
            .parse()
            .unwrap();
        let pinned = DigestReference::try_from(reference).unwrap();
        assert_eq!(pinned.registry(), "localhost:5000");
        assert_eq!(pinned.repository(), "app");
    }
}

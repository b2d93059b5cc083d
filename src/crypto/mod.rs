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

//! Structures and constants required to perform cryptographic operations.
//!
//! No private key ever lives in this process: the types below only describe
//! which algorithm the remote key uses and how to hash what it signs.

use coset::iana;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::errors::{Result, SignerError};

pub mod certificate;

/// Signature algorithms a vault-held key can produce.
/// * `ES256`, `ES384`, `ES512`: ECDSA on P-256, P-384 and P-521 with the
///   matching SHA-2 digest. Signatures are the raw `r || s` concatenation.
/// * `PS256`, `PS384`, `PS512`: RSASSA-PSS with SHA-256, SHA-384 and SHA-512,
///   picked by key size (2048, 3072, 4096 bits).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SigningAlgorithm {
    ES256,
    ES384,
    ES512,
    PS256,
    PS384,
    PS512,
}

impl std::fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningAlgorithm::ES256 => write!(f, "ES256"),
            SigningAlgorithm::ES384 => write!(f, "ES384"),
            SigningAlgorithm::ES512 => write!(f, "ES512"),
            SigningAlgorithm::PS256 => write!(f, "PS256"),
            SigningAlgorithm::PS384 => write!(f, "PS384"),
            SigningAlgorithm::PS512 => write!(f, "PS512"),
        }
    }
}

impl TryFrom<&str> for SigningAlgorithm {
    type Error = SignerError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "ES256" => Ok(Self::ES256),
            "ES384" => Ok(Self::ES384),
            "ES512" => Ok(Self::ES512),
            "PS256" => Ok(Self::PS256),
            "PS384" => Ok(Self::PS384),
            "PS512" => Ok(Self::PS512),
            unknown => Err(SignerError::SigningError(format!(
                "unsupported signing algorithm: {unknown}"
            ))),
        }
    }
}

impl SigningAlgorithm {
    /// Hash `data` with the digest function bound to the algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            SigningAlgorithm::ES256 | SigningAlgorithm::PS256 => Sha256::digest(data).to_vec(),
            SigningAlgorithm::ES384 | SigningAlgorithm::PS384 => Sha384::digest(data).to_vec(),
            SigningAlgorithm::ES512 | SigningAlgorithm::PS512 => Sha512::digest(data).to_vec(),
        }
    }

    pub fn cose_algorithm(&self) -> iana::Algorithm {
        match self {
            SigningAlgorithm::ES256 => iana::Algorithm::ES256,
            SigningAlgorithm::ES384 => iana::Algorithm::ES384,
            SigningAlgorithm::ES512 => iana::Algorithm::ES512,
            SigningAlgorithm::PS256 => iana::Algorithm::PS256,
            SigningAlgorithm::PS384 => iana::Algorithm::PS384,
            SigningAlgorithm::PS512 => iana::Algorithm::PS512,
        }
    }

    pub fn from_cose_algorithm(algorithm: iana::Algorithm) -> Result<Self> {
        match algorithm {
            iana::Algorithm::ES256 => Ok(SigningAlgorithm::ES256),
            iana::Algorithm::ES384 => Ok(SigningAlgorithm::ES384),
            iana::Algorithm::ES512 => Ok(SigningAlgorithm::ES512),
            iana::Algorithm::PS256 => Ok(SigningAlgorithm::PS256),
            iana::Algorithm::PS384 => Ok(SigningAlgorithm::PS384),
            iana::Algorithm::PS512 => Ok(SigningAlgorithm::PS512),
            other => Err(SignerError::SigningError(format!(
                "unsupported COSE algorithm: {other:?}"
            ))),
        }
    }
}

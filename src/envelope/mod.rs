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

//! Signature envelopes.
//!
//! An envelope binds together the signed payload, the signature produced by
//! the vault and the certificate chain of the signing key, so that a verifier
//! can check it without talking to the vault.
//!
//! Two serializations are supported, selected through [`EnvelopeFormat`]:
//!
//! * `cose`: a tagged `COSE_Sign1` structure (RFC 9052), media type
//!   `application/cose`.
//! * `jws`: a JWS using the flattened JSON serialization (RFC 7515), media
//!   type `application/jose+json`.
//!
//! Signing happens in two steps, since the private key lives in the vault:
//!
//! ```rust,no_run
//! # use kv_signer::envelope::{Descriptor, EnvelopeBuilder, Payload, TrustMode};
//! # use kv_signer::crypto::SigningAlgorithm;
//! # fn remote_sign(_digest: &[u8]) -> Vec<u8> { vec![] }
//! # fn main() -> kv_signer::errors::Result<()> {
//! # let leaf: Vec<u8> = vec![];
//! let payload = Payload::new(Descriptor {
//!     media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
//!     digest: "sha256:abc123".to_string(),
//!     size: 528,
//! });
//! let builder = EnvelopeBuilder::new(
//!     payload,
//!     SigningAlgorithm::ES256,
//!     TrustMode::SelfSigned,
//!     chrono::Utc::now(),
//! );
//!
//! let tbs = builder.to_be_signed("cose")?;
//! let signature = remote_sign(&SigningAlgorithm::ES256.digest(&tbs));
//! let envelope = builder.build(signature, vec![leaf], "cose")?;
//! let bytes = envelope.encode()?;
//! # Ok(())
//! # }
//! ```

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::SigningAlgorithm;
use crate::errors::{Result, SignerError};

pub mod constants;
mod cose;
mod jws;

use constants::*;

/// Serialization of a signature envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeFormat {
    #[default]
    Cose,
    Jws,
}

impl EnvelopeFormat {
    /// Media type of the envelope when stored as an OCI layer.
    pub fn media_type(&self) -> &'static str {
        match self {
            EnvelopeFormat::Cose => COSE_MEDIA_TYPE,
            EnvelopeFormat::Jws => JWS_MEDIA_TYPE,
        }
    }

    pub fn from_media_type(media_type: &str) -> Result<Self> {
        match media_type {
            COSE_MEDIA_TYPE => Ok(EnvelopeFormat::Cose),
            JWS_MEDIA_TYPE => Ok(EnvelopeFormat::Jws),
            other => Err(SignerError::UnsupportedFormatError(format!(
                "no envelope format for media type {other}"
            ))),
        }
    }
}

impl FromStr for EnvelopeFormat {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cose" => Ok(EnvelopeFormat::Cose),
            "jws" => Ok(EnvelopeFormat::Jws),
            _ => Err(SignerError::UnsupportedFormatError(format!(
                "{s:?}, expected one of: cose, jws"
            ))),
        }
    }
}

impl Display for EnvelopeFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeFormat::Cose => f.write_str("cose"),
            EnvelopeFormat::Jws => f.write_str("jws"),
        }
    }
}

/// How the signing certificate is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustMode {
    /// The leaf certificate is its own trust anchor.
    SelfSigned,
    /// The leaf was issued by a CA whose chain travels with the envelope.
    CaIssued,
}

impl TrustMode {
    /// Trust mode of a stored envelope, given its chain.
    pub(crate) fn from_chain(chain: &[Vec<u8>]) -> Result<Self> {
        match chain.len() {
            0 => Err(SignerError::SigningError(
                "envelope carries no certificate".into(),
            )),
            1 => Ok(TrustMode::SelfSigned),
            _ => Ok(TrustMode::CaIssued),
        }
    }

    fn check_chain(&self, chain: &[Vec<u8>]) -> Result<()> {
        match (self, chain.len()) {
            (TrustMode::SelfSigned, 1) => Ok(()),
            (TrustMode::CaIssued, n) if n >= 2 => Ok(()),
            (mode, n) => Err(SignerError::ConfigError(format!(
                "a {mode} envelope cannot carry {n} certificate(s)"
            ))),
        }
    }
}

impl Display for TrustMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustMode::SelfSigned => f.write_str("self-signed"),
            TrustMode::CaIssued => f.write_str("CA-issued"),
        }
    }
}

/// OCI content descriptor of the signed artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
}

/// The statement being signed: "this is the artifact".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub target_artifact: Descriptor,
}

impl Payload {
    pub fn new(target_artifact: Descriptor) -> Self {
        Payload { target_artifact }
    }

    pub(crate) fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SignerError::SigningError(format!("cannot serialize payload: {e}")))
    }

    pub(crate) fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| SignerError::SigningError(format!("malformed envelope payload: {e}")))
    }
}

/// The part of an envelope covered by the signature.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SignedContent {
    pub payload: Payload,
    pub algorithm: SigningAlgorithm,
    pub signing_time: DateTime<Utc>,
    pub signing_agent: String,
}

/// Assembles envelopes around a signature computed elsewhere.
///
/// The builder is pure: given the same inputs it always produces the same
/// to-be-signed bytes and the same envelope.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    content: SignedContent,
    trust_mode: TrustMode,
}

impl EnvelopeBuilder {
    /// Create a builder. The signing time is kept with a one second
    /// resolution, which is what both envelope formats can carry.
    pub fn new(
        payload: Payload,
        algorithm: SigningAlgorithm,
        trust_mode: TrustMode,
        signing_time: DateTime<Utc>,
    ) -> Self {
        EnvelopeBuilder {
            content: SignedContent {
                payload,
                algorithm,
                signing_time: signing_time.trunc_subsecs(0),
                signing_agent: SIGNING_AGENT.to_string(),
            },
            trust_mode,
        }
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.content.algorithm
    }

    pub fn trust_mode(&self) -> TrustMode {
        self.trust_mode
    }

    /// The exact bytes the signature of a `format` envelope must cover.
    pub fn to_be_signed(&self, format: &str) -> Result<Vec<u8>> {
        match format.parse::<EnvelopeFormat>()? {
            EnvelopeFormat::Cose => cose::to_be_signed(&self.content),
            EnvelopeFormat::Jws => jws::to_be_signed(&self.content),
        }
    }

    /// Wrap `signature` and `chain` (leaf first) into an envelope.
    ///
    /// Fails with [`SignerError::UnsupportedFormatError`] for an unknown
    /// format, and with [`SignerError::ConfigError`] when the chain does not
    /// match the trust mode.
    pub fn build(
        &self,
        signature: Vec<u8>,
        chain: Vec<Vec<u8>>,
        format: &str,
    ) -> Result<SignatureEnvelope> {
        let format = format.parse::<EnvelopeFormat>()?;
        self.trust_mode.check_chain(&chain)?;
        if signature.is_empty() {
            return Err(SignerError::SigningError("signature is empty".into()));
        }

        Ok(SignatureEnvelope {
            format,
            trust_mode: self.trust_mode,
            content: self.content.clone(),
            signature,
            certificate_chain: chain,
        })
    }
}

/// A signature together with everything needed to verify it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureEnvelope {
    format: EnvelopeFormat,
    trust_mode: TrustMode,
    content: SignedContent,
    signature: Vec<u8>,
    certificate_chain: Vec<Vec<u8>>,
}

impl SignatureEnvelope {
    pub fn format(&self) -> EnvelopeFormat {
        self.format
    }

    pub fn media_type(&self) -> &'static str {
        self.format.media_type()
    }

    pub fn trust_mode(&self) -> TrustMode {
        self.trust_mode
    }

    pub fn payload(&self) -> &Payload {
        &self.content.payload
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.content.algorithm
    }

    pub fn signing_time(&self) -> DateTime<Utc> {
        self.content.signing_time
    }

    pub fn signing_agent(&self) -> &str {
        &self.content.signing_agent
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// DER certificates, leaf first.
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.certificate_chain
    }

    /// The bytes the signature covers.
    pub fn to_be_signed(&self) -> Result<Vec<u8>> {
        match self.format {
            EnvelopeFormat::Cose => cose::to_be_signed(&self.content),
            EnvelopeFormat::Jws => jws::to_be_signed(&self.content),
        }
    }

    /// Serialize the envelope, the result is stored as an OCI layer of
    /// type [`SignatureEnvelope::media_type`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self.format {
            EnvelopeFormat::Cose => cose::encode(&self.content, &self.signature, &self.certificate_chain),
            EnvelopeFormat::Jws => jws::encode(&self.content, &self.signature, &self.certificate_chain),
        }
    }

    /// Read back an envelope stored with `media_type`.
    pub fn decode(media_type: &str, data: &[u8]) -> Result<Self> {
        let format = EnvelopeFormat::from_media_type(media_type)?;
        let (content, signature, certificate_chain) = match format {
            EnvelopeFormat::Cose => cose::decode(data)?,
            EnvelopeFormat::Jws => jws::decode(data)?,
        };
        Ok(SignatureEnvelope {
            format,
            trust_mode: TrustMode::from_chain(&certificate_chain)?,
            content,
            signature,
            certificate_chain,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    pub(crate) fn payload() -> Payload {
        Payload::new(Descriptor {
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            digest: "sha256:abc123".to_string(),
            size: 528,
        })
    }

    fn builder(trust_mode: TrustMode) -> EnvelopeBuilder {
        EnvelopeBuilder::new(
            payload(),
            SigningAlgorithm::ES384,
            trust_mode,
            Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap(),
        )
    }

    #[rstest]
    #[case("cose", EnvelopeFormat::Cose)]
    #[case("COSE", EnvelopeFormat::Cose)]
    #[case("jws", EnvelopeFormat::Jws)]
    fn known_formats_parse(#[case] input: &str, #[case] expected: EnvelopeFormat) {
        assert_eq!(input.parse::<EnvelopeFormat>().unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("pgp")]
    #[case("cose+json")]
    fn unknown_format_is_rejected(#[case] input: &str) {
        let err = builder(TrustMode::SelfSigned)
            .build(vec![1], vec![vec![0x30]], input)
            .unwrap_err();
        assert!(matches!(err, SignerError::UnsupportedFormatError(_)));
        assert!(matches!(
            builder(TrustMode::SelfSigned).to_be_signed(input),
            Err(SignerError::UnsupportedFormatError(_))
        ));
    }

    #[rstest]
    #[case(TrustMode::SelfSigned, 2)]
    #[case(TrustMode::SelfSigned, 0)]
    #[case(TrustMode::CaIssued, 1)]
    fn chain_must_match_trust_mode(#[case] mode: TrustMode, #[case] certificates: usize) {
        let chain = vec![vec![0x30]; certificates];
        let err = builder(mode).build(vec![1], chain, "cose").unwrap_err();
        assert!(matches!(err, SignerError::ConfigError(_)));
    }

    #[test]
    fn signing_time_is_truncated_to_seconds() {
        let time = Utc.timestamp_opt(1_792_400_000, 123_456_789).unwrap();
        let builder = EnvelopeBuilder::new(payload(), SigningAlgorithm::ES256, TrustMode::SelfSigned, time);
        let envelope = builder.build(vec![1], vec![vec![0x30]], "jws").unwrap();
        assert_eq!(envelope.signing_time().timestamp_subsec_nanos(), 0);
    }

    #[rstest]
    #[case("cose")]
    #[case("jws")]
    fn decoded_envelope_matches_built_one(#[case] format: &str) {
        let builder = builder(TrustMode::CaIssued);
        let envelope = builder
            .build(vec![7; 96], vec![b"leaf".to_vec(), b"root".to_vec()], format)
            .unwrap();
        let encoded = envelope.encode().unwrap();

        let decoded = SignatureEnvelope::decode(envelope.media_type(), &encoded).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.to_be_signed().unwrap(), builder.to_be_signed(format).unwrap());
    }

    #[test]
    fn format_and_media_type_disagree() {
        let envelope = builder(TrustMode::SelfSigned)
            .build(vec![7; 64], vec![b"leaf".to_vec()], "cose")
            .unwrap();
        let encoded = envelope.encode().unwrap();
        assert!(SignatureEnvelope::decode(JWS_MEDIA_TYPE, &encoded).is_err());
        assert!(matches!(
            SignatureEnvelope::decode("application/pgp-signature", &encoded),
            Err(SignerError::UnsupportedFormatError(_))
        ));
    }
}

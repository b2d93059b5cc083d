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

use std::path::Path;

use chrono::{TimeZone, Utc};
use kv_signer::crypto::certificate::{load_pem_bundle, thumbprint};
use kv_signer::crypto::SigningAlgorithm;
use kv_signer::envelope::constants::{COSE_MEDIA_TYPE, JWS_MEDIA_TYPE};
use kv_signer::envelope::{
    Descriptor, EnvelopeBuilder, EnvelopeFormat, Payload, SignatureEnvelope, TrustMode,
};
use kv_signer::errors::SignerError;
use rstest::rstest;

fn certificate(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data/certs")
        .join(name);
    load_pem_bundle(&path).unwrap().remove(0)
}

fn builder(trust_mode: TrustMode) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        Payload::new(Descriptor {
            media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
            digest: "sha256:abc123".to_string(),
            size: 528,
        }),
        SigningAlgorithm::ES384,
        trust_mode,
        Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap(),
    )
}

fn ca_chain() -> Vec<Vec<u8>> {
    vec![
        certificate("ec-p384-intermediate.pem"),
        certificate("ec-p384-root.pem"),
    ]
}

#[rstest]
#[case("cose", COSE_MEDIA_TYPE)]
#[case("jws", JWS_MEDIA_TYPE)]
fn ca_issued_envelope_reads_back(#[case] format: &str, #[case] media_type: &str) {
    let builder = builder(TrustMode::CaIssued);
    let tbs = builder.to_be_signed(format).unwrap();
    assert!(!tbs.is_empty());

    let envelope = builder
        .build(b"opaque signature".to_vec(), ca_chain(), format)
        .unwrap();
    assert_eq!(envelope.media_type(), media_type);
    assert_eq!(envelope.to_be_signed().unwrap(), tbs);

    let decoded = SignatureEnvelope::decode(media_type, &envelope.encode().unwrap()).unwrap();
    assert_eq!(decoded, envelope);
    assert_eq!(decoded.format().to_string(), format);
    assert_eq!(decoded.trust_mode(), TrustMode::CaIssued);
    assert_eq!(decoded.algorithm(), SigningAlgorithm::ES384);
    assert_eq!(decoded.payload().target_artifact.digest, "sha256:abc123");
    assert_eq!(decoded.certificate_chain(), ca_chain().as_slice());
    assert_eq!(decoded.signature(), b"opaque signature");
}

#[test]
fn self_signed_envelope_carries_one_certificate() {
    let leaf = certificate("rsa-2048-self-signed.pem");
    let envelope = builder(TrustMode::SelfSigned)
        .build(b"opaque signature".to_vec(), vec![leaf.clone()], "jws")
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
    assert!(json["protected"].is_string());
    assert!(json["payload"].is_string());
    assert!(json["signature"].is_string());
    assert_eq!(json["header"]["x5c"].as_array().unwrap().len(), 1);

    let decoded = SignatureEnvelope::decode(JWS_MEDIA_TYPE, &envelope.encode().unwrap()).unwrap();
    assert_eq!(decoded.trust_mode(), TrustMode::SelfSigned);
    assert_eq!(thumbprint(&decoded.certificate_chain()[0]), thumbprint(&leaf));
}

#[test]
fn default_format_is_cose() {
    assert_eq!(EnvelopeFormat::default(), EnvelopeFormat::Cose);
    assert_eq!(EnvelopeFormat::default().media_type(), COSE_MEDIA_TYPE);
}

#[test]
fn unknown_media_type_is_unsupported() {
    let err = SignatureEnvelope::decode("application/pgp-signature", b"...").unwrap_err();
    assert!(matches!(err, SignerError::UnsupportedFormatError(_)));
    assert_eq!(err.exit_code(), 6);
}

#[rstest]
#[case(COSE_MEDIA_TYPE)]
#[case(JWS_MEDIA_TYPE)]
fn garbage_is_not_an_envelope(#[case] media_type: &str) {
    let err = SignatureEnvelope::decode(media_type, b"not an envelope").unwrap_err();
    assert!(matches!(err, SignerError::SigningError(_)));
}

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

//! JWS flattened JSON serialization.

use base64::{
    engine::general_purpose::{STANDARD as BASE64_STD_ENGINE, URL_SAFE_NO_PAD as BASE64_URL_ENGINE},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{constants::*, Payload, SignedContent};
use crate::crypto::SigningAlgorithm;
use crate::errors::{Result, SignerError};

#[derive(Serialize, Deserialize)]
struct ProtectedHeader {
    alg: String,
    crit: Vec<String>,
    cty: String,
    #[serde(rename = "io.cncf.notary.signingScheme")]
    signing_scheme: String,
    #[serde(rename = "io.cncf.notary.signingTime")]
    signing_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct UnprotectedHeader {
    x5c: Vec<String>,
    #[serde(
        rename = "io.cncf.notary.signingAgent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    signing_agent: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct FlattenedJws {
    payload: String,
    protected: String,
    header: UnprotectedHeader,
    signature: String,
}

fn malformed(reason: impl std::fmt::Display) -> SignerError {
    SignerError::SigningError(format!("malformed JWS envelope: {reason}"))
}

fn encoded_parts(content: &SignedContent) -> Result<(String, String)> {
    let header = ProtectedHeader {
        alg: content.algorithm.to_string(),
        crit: vec![SIGNING_SCHEME_HEADER.to_string()],
        cty: PAYLOAD_CONTENT_TYPE.to_string(),
        signing_scheme: SIGNING_SCHEME_X509.to_string(),
        signing_time: content.signing_time,
    };
    let header = serde_json::to_vec(&header)
        .map_err(|e| SignerError::SigningError(format!("cannot serialize JWS header: {e}")))?;
    Ok((
        BASE64_URL_ENGINE.encode(header),
        BASE64_URL_ENGINE.encode(content.payload.to_json()?),
    ))
}

/// JWS signing input: `BASE64URL(protected) "." BASE64URL(payload)`.
pub(super) fn to_be_signed(content: &SignedContent) -> Result<Vec<u8>> {
    let (protected, payload) = encoded_parts(content)?;
    Ok(format!("{protected}.{payload}").into_bytes())
}

pub(super) fn encode(
    content: &SignedContent,
    signature: &[u8],
    chain: &[Vec<u8>],
) -> Result<Vec<u8>> {
    let (protected, payload) = encoded_parts(content)?;
    let jws = FlattenedJws {
        payload,
        protected,
        header: UnprotectedHeader {
            x5c: chain.iter().map(|der| BASE64_STD_ENGINE.encode(der)).collect(),
            signing_agent: Some(content.signing_agent.clone()),
        },
        signature: BASE64_URL_ENGINE.encode(signature),
    };
    serde_json::to_vec(&jws)
        .map_err(|e| SignerError::SigningError(format!("cannot encode JWS envelope: {e}")))
}

pub(super) fn decode(data: &[u8]) -> Result<(SignedContent, Vec<u8>, Vec<Vec<u8>>)> {
    let jws: FlattenedJws = serde_json::from_slice(data).map_err(malformed)?;

    let header = BASE64_URL_ENGINE.decode(&jws.protected).map_err(malformed)?;
    let header: ProtectedHeader = serde_json::from_slice(&header).map_err(malformed)?;
    if header.cty != PAYLOAD_CONTENT_TYPE {
        return Err(malformed(format!("unexpected payload content type {}", header.cty)));
    }
    if header.signing_scheme != SIGNING_SCHEME_X509 {
        return Err(malformed(format!(
            "unsupported signing scheme {}",
            header.signing_scheme
        )));
    }

    let payload = BASE64_URL_ENGINE.decode(&jws.payload).map_err(malformed)?;
    let signature = BASE64_URL_ENGINE.decode(&jws.signature).map_err(malformed)?;
    let chain = jws
        .header
        .x5c
        .iter()
        .map(|der| BASE64_STD_ENGINE.decode(der).map_err(malformed))
        .collect::<Result<Vec<_>>>()?;

    let content = SignedContent {
        payload: Payload::from_json(&payload)?,
        algorithm: SigningAlgorithm::try_from(header.alg.as_str())?,
        signing_time: header.signing_time,
        signing_agent: jws.header.signing_agent.unwrap_or_default(),
    };
    Ok((content, signature, chain))
}

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

//! `COSE_Sign1` serialization.
//!
//! Protected header:
//!
//! | label                          | value                                   |
//! |--------------------------------|-----------------------------------------|
//! | `alg` (1)                      | algorithm of the vault key              |
//! | `crit` (2)                     | `["io.cncf.notary.signingScheme"]`      |
//! | `content type` (3)             | the payload content type                |
//! | `io.cncf.notary.signingScheme` | `"notary.x509"`                         |
//! | `io.cncf.notary.signingTime`   | tag 1 (epoch seconds)                   |
//!
//! Unprotected header: `x5chain` (33) with the DER chain, leaf first, and
//! `io.cncf.notary.signingAgent`.

use chrono::{DateTime, Utc};
use coset::{
    cbor::value::Value, iana, CoseSign1, CoseSign1Builder, Header, HeaderBuilder, Label,
    RegisteredLabel, RegisteredLabelWithPrivate, TaggedCborSerializable,
};

use super::{constants::*, Payload, SignedContent};
use crate::crypto::SigningAlgorithm;
use crate::errors::{Result, SignerError};

const X5CHAIN: i64 = iana::HeaderParameter::X5Chain as i64;
const EPOCH_DATE_TIME_TAG: u64 = 1;

fn malformed(reason: impl std::fmt::Display) -> SignerError {
    SignerError::SigningError(format!("malformed COSE envelope: {reason}"))
}

fn protected_header(content: &SignedContent) -> Header {
    let mut header = HeaderBuilder::new()
        .algorithm(content.algorithm.cose_algorithm())
        .content_type(PAYLOAD_CONTENT_TYPE.to_string())
        .text_value(
            SIGNING_SCHEME_HEADER.to_string(),
            Value::Text(SIGNING_SCHEME_X509.to_string()),
        )
        .text_value(
            SIGNING_TIME_HEADER.to_string(),
            Value::Tag(
                EPOCH_DATE_TIME_TAG,
                Box::new(Value::Integer(content.signing_time.timestamp().into())),
            ),
        )
        .build();
    header
        .crit
        .push(RegisteredLabel::Text(SIGNING_SCHEME_HEADER.to_string()));
    header
}

fn unprotected_header(content: &SignedContent, chain: &[Vec<u8>]) -> Header {
    HeaderBuilder::new()
        .value(
            X5CHAIN,
            Value::Array(chain.iter().cloned().map(Value::Bytes).collect()),
        )
        .text_value(
            SIGNING_AGENT_HEADER.to_string(),
            Value::Text(content.signing_agent.clone()),
        )
        .build()
}

pub(super) fn to_be_signed(content: &SignedContent) -> Result<Vec<u8>> {
    let sign1 = CoseSign1Builder::new()
        .protected(protected_header(content))
        .payload(content.payload.to_json()?)
        .build();
    Ok(sign1.tbs_data(&[]))
}

pub(super) fn encode(
    content: &SignedContent,
    signature: &[u8],
    chain: &[Vec<u8>],
) -> Result<Vec<u8>> {
    CoseSign1Builder::new()
        .protected(protected_header(content))
        .unprotected(unprotected_header(content, chain))
        .payload(content.payload.to_json()?)
        .signature(signature.to_vec())
        .build()
        .to_tagged_vec()
        .map_err(|e| SignerError::SigningError(format!("cannot encode COSE envelope: {e:?}")))
}

fn text_header<'a>(header: &'a Header, name: &str) -> Option<&'a Value> {
    header.rest.iter().find_map(|(label, value)| match label {
        Label::Text(text) if text == name => Some(value),
        _ => None,
    })
}

fn signing_time(header: &Header) -> Result<DateTime<Utc>> {
    let seconds = match text_header(header, SIGNING_TIME_HEADER) {
        Some(Value::Tag(EPOCH_DATE_TIME_TAG, inner)) => match inner.as_ref() {
            Value::Integer(seconds) => i64::try_from(*seconds).map_err(malformed)?,
            _ => return Err(malformed("signing time is not an integer")),
        },
        _ => return Err(malformed("signing time missing")),
    };
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| malformed("signing time out of range"))
}

fn certificate_chain(header: &Header) -> Result<Vec<Vec<u8>>> {
    let value = header
        .rest
        .iter()
        .find_map(|(label, value)| (*label == Label::Int(X5CHAIN)).then_some(value))
        .ok_or_else(|| malformed("x5chain missing"))?;
    match value {
        // A single certificate may be carried as a bare byte string.
        Value::Bytes(der) => Ok(vec![der.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Bytes(der) => Ok(der.clone()),
                _ => Err(malformed("x5chain entry is not a byte string")),
            })
            .collect(),
        _ => Err(malformed("x5chain is neither a byte string nor an array")),
    }
}

pub(super) fn decode(data: &[u8]) -> Result<(SignedContent, Vec<u8>, Vec<Vec<u8>>)> {
    let sign1 = CoseSign1::from_tagged_slice(data).map_err(|e| malformed(format!("{e:?}")))?;
    let protected = &sign1.protected.header;

    let algorithm = match &protected.alg {
        Some(RegisteredLabelWithPrivate::Assigned(alg)) => {
            SigningAlgorithm::from_cose_algorithm(*alg)?
        }
        _ => return Err(malformed("unsupported or missing algorithm")),
    };
    match &protected.content_type {
        Some(RegisteredLabel::Text(cty)) if cty == PAYLOAD_CONTENT_TYPE => {}
        _ => return Err(malformed("unexpected payload content type")),
    }
    match text_header(protected, SIGNING_SCHEME_HEADER) {
        Some(Value::Text(scheme)) if scheme == SIGNING_SCHEME_X509 => {}
        _ => return Err(malformed("unsupported signing scheme")),
    }

    let payload = sign1
        .payload
        .as_deref()
        .ok_or_else(|| malformed("detached payloads are not supported"))?;
    let signing_agent = match text_header(&sign1.unprotected, SIGNING_AGENT_HEADER) {
        Some(Value::Text(agent)) => agent.clone(),
        _ => String::new(),
    };

    let content = SignedContent {
        payload: Payload::from_json(payload)?,
        algorithm,
        signing_time: signing_time(protected)?,
        signing_agent,
    };
    Ok((
        content,
        sign1.signature.clone(),
        certificate_chain(&sign1.unprotected)?,
    ))
}

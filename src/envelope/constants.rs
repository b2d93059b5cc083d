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

pub const COSE_MEDIA_TYPE: &str = "application/cose";
pub const JWS_MEDIA_TYPE: &str = "application/jose+json";

pub const PAYLOAD_CONTENT_TYPE: &str = "application/vnd.cncf.notary.payload.v1+json";

pub const SIGNATURE_ARTIFACT_TYPE: &str = "application/vnd.cncf.notary.signature";
pub const EMPTY_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";
pub const THUMBPRINT_ANNOTATION: &str = "io.cncf.notary.x509chain.thumbprint#S256";

pub(crate) const SIGNING_SCHEME_HEADER: &str = "io.cncf.notary.signingScheme";
pub(crate) const SIGNING_TIME_HEADER: &str = "io.cncf.notary.signingTime";
pub(crate) const SIGNING_AGENT_HEADER: &str = "io.cncf.notary.signingAgent";
pub(crate) const SIGNING_SCHEME_X509: &str = "notary.x509";

pub(crate) const SIGNING_AGENT: &str = concat!("kv-signer/", env!("CARGO_PKG_VERSION"));

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

//! The errors that can be raised by kv-signer

use thiserror::Error;

use crate::orchestrator::Stage;

pub type Result<T> = std::result::Result<T, SignerError>;

/// Every failure a run can end with.
///
/// There is no local recovery: each variant aborts the run and its message is
/// surfaced verbatim to the pipeline log.
#[derive(Error, Debug)]
pub enum SignerError {
    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("network failure: {0}")]
    NetworkError(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("unsupported signature envelope format: {0}")]
    UnsupportedFormatError(String),

    #[error("registry conflict: {0}")]
    ConflictError(String),
}

impl SignerError {
    /// Process exit code associated with the error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            SignerError::AuthError(_) => 2,
            SignerError::NetworkError(_) => 3,
            SignerError::ConfigError(_) => 4,
            SignerError::SigningError(_) => 5,
            SignerError::UnsupportedFormatError(_) => 6,
            SignerError::ConflictError(_) => 7,
        }
    }

    /// Short name of the kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SignerError::AuthError(_) => "AuthError",
            SignerError::NetworkError(_) => "NetworkError",
            SignerError::ConfigError(_) => "ConfigError",
            SignerError::SigningError(_) => "SigningError",
            SignerError::UnsupportedFormatError(_) => "UnsupportedFormatError",
            SignerError::ConflictError(_) => "ConflictError",
        }
    }
}

/// Error returned by the orchestrator: the failure plus the stage it happened in.
#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub error: SignerError,
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

impl From<std::io::Error> for SignerError {
    fn from(e: std::io::Error) -> Self {
        SignerError::ConfigError(e.to_string())
    }
}

impl From<serde_json::Error> for SignerError {
    fn from(e: serde_json::Error) -> Self {
        SignerError::ConfigError(format!("malformed JSON document: {e}"))
    }
}

/// Classify a transport level error coming from `reqwest`.
///
/// Anything that produced an HTTP status is left to the caller, which knows
/// what the status means for the service being talked to.
pub(crate) fn from_reqwest(service: &str, e: reqwest::Error) -> SignerError {
    if e.is_decode() {
        SignerError::NetworkError(format!("{service} returned an unreadable response: {e}"))
    } else {
        SignerError::NetworkError(format!("cannot reach {service}: {e}"))
    }
}

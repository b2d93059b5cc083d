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

//! Push container images to an OCI registry and sign them with keys that
//! never leave a cloud key vault.
//!
//! A run goes through these steps:
//!
//! 1. the image is pushed and its manifest digest resolved,
//! 2. the cloud credential bundle is exchanged for a vault access token,
//! 3. the vault signs the digest of a [Notary v2](https://notaryproject.dev)
//!    style payload, which is wrapped into a COSE or JWS envelope together
//!    with the certificate chain of the key,
//! 4. the envelope is pushed as an OCI artifact whose `subject` is the image,
//!    through the Referrers API or the `sha256-<hex>` tag scheme.
//!
//! The [`orchestrator::Orchestrator`] sequences those steps, usually built
//! out of [`config::Settings`]:
//!
//! ```rust,no_run
//! use kv_signer::config::Settings;
//!
//! # async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
//! let image = settings.image()?;
//! let reference = settings.image_reference()?;
//! let mut orchestrator = settings.orchestrator()?;
//!
//! let report = orchestrator
//!     .run(
//!         &image,
//!         &reference,
//!         settings.registry_password()?,
//!         settings.azure_credentials()?,
//!     )
//!     .await?;
//! println!("{} signed, envelope {}", report.subject.reference, report.attachment.signature);
//! # Ok(())
//! # }
//! ```
//!
//! Every failure is one of the [`errors::SignerError`] kinds; the process exit
//! code of the command line tool depends on it.

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod envelope;
pub mod errors;
pub mod orchestrator;
pub mod registry;
pub mod vault;

#[cfg(test)]
mod mock_client;

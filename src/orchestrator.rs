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

//! Sequencing of a signing run.
//!
//! A run walks through the following stages, in order:
//!
//! ```text
//! Init -> Pushed -> DigestResolved -> Authenticated -> Signed -> Attached -> Done
//! ```
//!
//! Any failure moves the run to the terminal `Failed` stage and aborts it:
//! nothing is retried. Signing an image that is already in the registry
//! starts directly with the digest resolution.

use std::fmt::{Display, Formatter};

use oci_client::manifest::OciManifest;
use tracing::{error, info};

use crate::credentials::{Credential, CredentialBroker, RegistryBroker, Secret};
use crate::envelope::SignatureEnvelope;
use crate::errors::{Result, RunError, SignerError};
use crate::registry::{
    self, referrers::SignatureDescriptor, ArtifactReference, Attachment, Auth,
    ClientCapabilities, DigestReference, ImageArtifact, PinnedArtifact,
};
use crate::vault::{KeyVaultApi, KeyVaultSigner, PluginConfig, SigningKeyHandle};

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Pushed,
    DigestResolved,
    Authenticated,
    Signed,
    Attached,
    Done,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Pushed => "push",
            Stage::DigestResolved => "resolve digest",
            Stage::Authenticated => "authenticate",
            Stage::Signed => "sign",
            Stage::Attached => "attach",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl Stage {
    fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Init, Stage::Pushed)
                | (Stage::Init, Stage::DigestResolved)
                | (Stage::Pushed, Stage::DigestResolved)
                | (Stage::DigestResolved, Stage::Authenticated)
                | (Stage::Authenticated, Stage::Signed)
                | (Stage::Signed, Stage::Attached)
                | (Stage::Attached, Stage::Done)
        )
    }
}

/// What to sign with, and how to link the result.
#[derive(Debug, Clone)]
pub struct SigningOptions {
    pub registry_username: String,
    /// Required by the signing steps only.
    pub key: Option<SigningKeyHandle>,
    pub plugin_config: PluginConfig,
    pub use_referrers_api: bool,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub subject: PinnedArtifact,
    pub envelope: SignatureEnvelope,
    pub attachment: Attachment,
}

/// Drives the registry client, the credential brokers and the signer.
///
/// An orchestrator performs a single run: once it reached `Done` or
/// `Failed`, a new one has to be created.
pub struct Orchestrator<C, V, B> {
    registry: C,
    signer: KeyVaultSigner<V>,
    identity: B,
    options: SigningOptions,
    registry_auth: Option<Auth>,
    history: Vec<Stage>,
}

impl<C, V, B> Orchestrator<C, V, B>
where
    C: ClientCapabilities,
    V: KeyVaultApi,
    B: CredentialBroker,
{
    pub fn new(registry: C, signer: KeyVaultSigner<V>, identity: B, options: SigningOptions) -> Self {
        Orchestrator {
            registry,
            signer,
            identity,
            options,
            registry_auth: None,
            history: vec![Stage::Init],
        }
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Init)
    }

    /// Every stage reached so far, `Init` first.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn registry(&self) -> &C {
        &self.registry
    }

    fn advance(&mut self, next: Stage) -> Result<()> {
        let current = self.stage();
        if !current.can_advance_to(next) {
            return Err(SignerError::ConfigError(format!(
                "cannot move from the {current} stage to the {next} stage"
            )));
        }
        info!(from = %current, to = %next, "stage complete");
        self.history.push(next);
        Ok(())
    }

    fn fail(&mut self, stage: Stage, error: SignerError) -> RunError {
        error!(stage = %stage, kind = error.kind(), error = %error, "run failed");
        if self.stage() != Stage::Failed {
            self.history.push(Stage::Failed);
        }
        RunError { stage, error }
    }

    /// Run `step` as the `stage` step: on success move to `stage`, on
    /// failure move to `Failed`.
    async fn step<T>(
        &mut self,
        stage: Stage,
        step: impl std::future::Future<Output = Result<T>>,
    ) -> std::result::Result<T, RunError> {
        if !self.stage().can_advance_to(stage) {
            let current = self.stage();
            return Err(RunError {
                stage,
                error: SignerError::ConfigError(format!(
                    "a run in the {current} stage cannot {stage}"
                )),
            });
        }
        match step.await {
            Ok(value) => {
                self.advance(stage).map_err(|e| RunError { stage, error: e })?;
                Ok(value)
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }

    /// Validate the registry password and remember the resulting credential.
    pub async fn login(&mut self, reference: &ArtifactReference, password: &Secret) -> Result<()> {
        let credential = RegistryBroker::new(self.options.registry_username.clone())
            .authenticate(password)
            .await?;
        let auth = Auth::from(&credential);
        self.registry
            .login(&reference.oci_reference, &(&auth).into())
            .await?;
        info!(registry = reference.registry(), "logged in");
        self.registry_auth = Some(auth);
        Ok(())
    }

    fn signing_key(&mut self) -> std::result::Result<SigningKeyHandle, RunError> {
        match self.options.key.clone() {
            Some(key) => Ok(key),
            None => Err(self.fail(
                Stage::Signed,
                SignerError::ConfigError("no signing key configured".to_string()),
            )),
        }
    }

    fn auth(&self) -> Auth {
        self.registry_auth.clone().unwrap_or(Auth::Anonymous)
    }

    /// Push `image` as `reference`, returning its digest.
    pub async fn push(
        &mut self,
        image: &ImageArtifact,
        reference: &ArtifactReference,
    ) -> Result<PinnedArtifact> {
        let pushed = self.push_image(image, reference).await?;
        let auth = self.auth();
        registry::resolve(&mut self.registry, &pushed.into(), &auth).await
    }

    /// The tag may move again right after the push, so the digest comes
    /// from the push itself.
    async fn push_image(
        &mut self,
        image: &ImageArtifact,
        reference: &ArtifactReference,
    ) -> Result<DigestReference> {
        let auth = self.auth();
        let response = self
            .registry
            .push(
                &reference.oci_reference,
                &image.layers,
                image.config.clone(),
                &(&auth).into(),
                Some(image.manifest.clone()),
            )
            .await?;
        let digest = registry::pushed_digest(&response, &OciManifest::Image(image.manifest.clone()))?;
        let pushed = reference.pin(&digest)?;
        info!(reference = %reference, digest = %digest, manifest = %response.manifest_url, "image pushed");
        Ok(pushed)
    }

    async fn authenticate_vault(&self, secret: &Secret) -> Result<Credential> {
        let credential = self.identity.authenticate(secret).await?;
        info!(expires_at = %credential.expires_at(), "key vault credential acquired");
        Ok(credential)
    }

    /// The full pipeline: push `image` as `reference`, sign it and attach
    /// the signature.
    pub async fn run(
        &mut self,
        image: &ImageArtifact,
        reference: &ArtifactReference,
        registry_password: &Secret,
        cloud_credentials: &Secret,
    ) -> std::result::Result<RunReport, RunError> {
        if self.stage() != Stage::Init {
            return Err(RunError {
                stage: self.stage(),
                error: SignerError::ConfigError("the run already happened".to_string()),
            });
        }
        let key = self.signing_key()?;

        let login = self.login(reference, registry_password).await;
        if let Err(e) = login {
            return Err(self.fail(Stage::Pushed, e));
        }
        let pushed = self.push_image(image, reference).await;
        let pushed = self.step(Stage::Pushed, async { pushed }).await?;

        self.sign_pinned(&key, &pushed.into(), cloud_credentials).await
    }

    /// Sign an image already stored in the registry.
    pub async fn sign(
        &mut self,
        reference: &ArtifactReference,
        cloud_credentials: &Secret,
    ) -> std::result::Result<RunReport, RunError> {
        let key = self.signing_key()?;
        self.sign_pinned(&key, reference, cloud_credentials).await
    }

    async fn sign_pinned(
        &mut self,
        key: &SigningKeyHandle,
        reference: &ArtifactReference,
        cloud_credentials: &Secret,
    ) -> std::result::Result<RunReport, RunError> {
        let auth = self.auth();
        let resolved = registry::resolve(&mut self.registry, reference, &auth).await;
        let subject = self.step(Stage::DigestResolved, async { resolved }).await?;
        info!(subject = %subject.reference, "digest resolved");

        let credential = self.authenticate_vault(cloud_credentials).await;
        let credential = self.step(Stage::Authenticated, async { credential }).await?;

        let signed = self
            .signer
            .sign(key, &subject, &self.options.plugin_config, &credential)
            .await;
        drop(credential);
        let envelope = self.step(Stage::Signed, async { signed }).await?;

        let attached = registry::referrers::attach(
            &mut self.registry,
            &auth,
            &subject,
            &envelope,
            self.options.use_referrers_api,
        )
        .await;
        let attachment = self.step(Stage::Attached, async { attached }).await?;

        self.step(Stage::Done, async { Ok(()) }).await?;
        Ok(RunReport {
            subject,
            envelope,
            attachment,
        })
    }

    /// Signatures linked to `reference`.
    pub async fn list_signatures(
        &mut self,
        reference: &ArtifactReference,
    ) -> Result<(DigestReference, Vec<SignatureDescriptor>)> {
        let auth = self.auth();
        let subject = registry::resolve(&mut self.registry, reference, &auth).await?;
        let signatures = registry::referrers::list_signatures(
            &mut self.registry,
            &auth,
            &subject.reference,
            self.options.use_referrers_api,
        )
        .await?;
        Ok((subject.reference, signatures))
    }
}

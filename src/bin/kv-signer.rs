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

//! kv-signer CLI: push an image and sign it with a key held in Azure Key Vault.
//!
//! Meant to run as a pipeline step. All the settings can be given through
//! the environment of the job, secrets included.

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kv_signer::config::{LiveOrchestrator, Settings};
use kv_signer::errors::{RunError, SignerError};
use kv_signer::orchestrator::RunReport;
use kv_signer::registry::ArtifactReference;

#[derive(Parser)]
#[command(name = "kv-signer")]
#[command(about = "Push container images and sign them with Azure Key Vault", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level, unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the registry credentials
    Login,
    /// Push the image of the layout and print its digest
    Push,
    /// Sign an image already stored in the registry
    Sign {
        /// Tag or digest reference of the image
        reference: String,
    },
    /// Push the image, sign it and attach the signature
    Run,
    /// List the signatures attached to an image
    List {
        /// Tag or digest reference of the image
        reference: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kv_signer=debug" } else { "kv_signer=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Exit code of the first taxonomy error found in the chain, 1 otherwise.
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<RunError>()
                .map(RunError::exit_code)
                .or_else(|| cause.downcast_ref::<SignerError>().map(SignerError::exit_code))
        })
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

async fn login_if_configured(
    orchestrator: &mut LiveOrchestrator,
    settings: &Settings,
    reference: &ArtifactReference,
) -> anyhow::Result<()> {
    if let Some(password) = settings.registry_password.as_ref() {
        orchestrator
            .login(reference, password)
            .await
            .with_context(|| format!("cannot log into {}", reference.registry()))?;
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Signed:    {}", report.subject.reference);
    println!("Format:    {}", report.envelope.format());
    println!("Trust:     {}", report.envelope.trust_mode());
    println!("Signature: {} ({})", report.attachment.signature, report.attachment.mode);
}

async fn execute(command: Commands, settings: Settings) -> anyhow::Result<()> {
    let mut orchestrator = settings.orchestrator().context("invalid settings")?;

    match command {
        Commands::Login => {
            let reference = settings.image_reference()?;
            orchestrator
                .login(&reference, settings.registry_password()?)
                .await
                .with_context(|| format!("cannot log into {}", reference.registry()))?;
            println!("Login succeeded");
        }
        Commands::Push => {
            let reference = settings.image_reference()?;
            let image = settings.image()?;
            orchestrator
                .login(&reference, settings.registry_password()?)
                .await
                .with_context(|| format!("cannot log into {}", reference.registry()))?;
            let pinned = orchestrator
                .push(&image, &reference)
                .await
                .with_context(|| format!("cannot push {reference}"))?;
            println!("{}", pinned.reference.digest());
        }
        Commands::Sign { reference } => {
            let reference = settings.reference(&reference)?;
            login_if_configured(&mut orchestrator, &settings, &reference).await?;
            let report = orchestrator
                .sign(&reference, settings.azure_credentials()?)
                .await?;
            print_report(&report);
        }
        Commands::Run => {
            let reference = settings.image_reference()?;
            let image = settings.image()?;
            let report = orchestrator
                .run(
                    &image,
                    &reference,
                    settings.registry_password()?,
                    settings.azure_credentials()?,
                )
                .await?;
            print_report(&report);
        }
        Commands::List { reference } => {
            let reference = settings.reference(&reference)?;
            login_if_configured(&mut orchestrator, &settings, &reference).await?;
            let (subject, signatures) = orchestrator
                .list_signatures(&reference)
                .await
                .with_context(|| format!("cannot list the signatures of {reference}"))?;
            println!("{subject}: {} signature(s)", signatures.len());
            for signature in signatures {
                println!(
                    "{}\t{}\t{}",
                    signature.reference,
                    signature.envelope_media_type,
                    signature.created.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli.command, cli.settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use std::error::Error;
use std::fs;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use vtpmtoken::config::Config;
use vtpmtoken::source::Nonce;
use vtpmtoken::store::TrustedRootSet;
use vtpmtoken::AttestationService;

#[derive(Parser)]
enum VtpmTokenCli {
    Request(RequestArgs),
    Verify(VerifyArgs),
    Fingerprint(FingerprintArgs),
    /// Print a fresh random nonce
    Nonce,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Request an attestation token from the configured source")]
struct RequestArgs {
    #[arg(short, long, default_value = "vtpmtoken.json")]
    config: String,

    #[arg(short, long)]
    audience: String,

    /// A fresh nonce is generated, and printed on stderr, if none is given
    #[arg(short, long)]
    nonce: Option<String>,

    #[arg(short, long, default_value = "token.jwt")]
    output: String,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Verify the supplied attestation token, and appraise its claims \
    against the configured policy")]
struct VerifyArgs {
    #[arg(short, long, default_value = "vtpmtoken.json")]
    config: String,

    #[arg(short, long, default_value = "token.jwt")]
    token: String,

    #[arg(short, long)]
    audience: String,

    #[arg(short, long)]
    nonce: String,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Print the SHA-256 fingerprints of the certificates in a PEM \
    file, for pinning as trusted roots")]
struct FingerprintArgs {
    #[arg(short, long, default_value = "root.pem")]
    pem: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match VtpmTokenCli::parse() {
        VtpmTokenCli::Request(args) => match request(&args) {
            Ok(nonce) => {
                eprintln!("token written to {} (nonce {nonce})", args.output);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("token request failed: {e}");
                ExitCode::FAILURE
            }
        },

        VtpmTokenCli::Verify(args) => match verify(&args) {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("verification failed: {e}");
                ExitCode::FAILURE
            }
        },

        VtpmTokenCli::Fingerprint(args) => match fingerprint(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("fingerprinting failed: {e}");
                ExitCode::FAILURE
            }
        },

        VtpmTokenCli::Nonce => match Nonce::generate() {
            Ok(n) => {
                println!("{n}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("nonce generation failed: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

fn request(args: &RequestArgs) -> Result<String, Box<dyn Error>> {
    let c = Config::load_file(&args.config)?;
    let s = AttestationService::from_config(&c)?;

    let nonce = match &args.nonce {
        Some(n) => n.clone(),
        None => Nonce::generate()?.to_string(),
    };

    let t = s.request_token(&args.audience, &nonce)?;

    fs::write(&args.output, t.as_str())?;

    Ok(nonce)
}

fn verify(args: &VerifyArgs) -> Result<bool, Box<dyn Error>> {
    let c = Config::load_file(&args.config)?;
    let s = AttestationService::from_config(&c)?;

    let raw = fs::read_to_string(&args.token)?;

    let r = s.verify(raw.trim(), &args.audience, &args.nonce);

    println!("{}", serde_json::to_string_pretty(&r)?);

    Ok(r.is_verified())
}

fn fingerprint(args: &FingerprintArgs) -> Result<(), Box<dyn Error>> {
    let pem = fs::read(&args.pem)?;

    let roots = TrustedRootSet::from_pem(&pem)?;

    println!("{}", serde_json::to_string_pretty(&roots.iter().collect::<Vec<_>>())?);

    Ok(())
}

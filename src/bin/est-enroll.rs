// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
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

//! EST Enrollment Command-Line Tool
//!
//! Generates a P-256 key, enrolls it with an EST server (RFC 7030) and prints
//! the issued certificates.
//!
//! # Usage
//!
//! ```text
//! est-enroll [OPTIONS] --url <URL> --cn <CN>
//!
//! Options:
//!   -u, --url <URL>            EST server URL
//!   -c, --cn <CN>              Subject common name or distinguished name
//!   -t, --trust <PATH>         Trust anchor PEM file (default: web PKI roots)
//!   -r, --reenroll             Use simplereenroll
//!       --cert <PATH>          Client certificate PEM for TLS authentication
//!       --key <PATH>           Client private key PEM for TLS authentication
//!       --auth <CREDS>         HTTP Digest credentials, [realm:]user:password
//!       --basic-auth <CREDS>   HTTP Basic credentials, user:password
//!       --tls <VERSION>        TLSv1.2 or TLSv1.3
//!       --pop                  Bind the request to the TLS session
//!       --to <MS>              Overall timeout in milliseconds (0 = none)
//!   -v, --verbose              Enable verbose output
//!   -q, --quiet                Suppress non-error output
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Enroll against a test server with Digest auth
//! est-enroll -u https://testrfc7030.com:8443 -c device-42 -t dstcax3.pem \
//!     --auth estrealm:estuser:estpwd
//!
//! # Proof-of-possession enrollment with a 60 second deadline
//! est-enroll -u https://est.example.com -c device-42 --pop --to 60000
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use der::{EncodePem, pem::LineEnding};
use x509_cert::Certificate;

use usg_est_enroll::auth::{AuthProvider, BasicAuth, Credentials, DigestAuth, NoAuth};
use usg_est_enroll::hsm::EnrollmentKey;
use usg_est_enroll::{
    CancellationToken, ClientIdentity, EnrollOptions, EnrollmentClient, EnrollmentOutcome,
    EstClientConfig, TlsVersion,
};

/// EST Enrollment Command-Line Tool
#[derive(Parser)]
#[command(name = "est-enroll")]
#[command(author = "U.S. Federal Government")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Certificate enrollment using EST (RFC 7030)", long_about = None)]
struct Cli {
    /// EST server URL
    #[arg(short = 'u', long = "url", value_name = "URL")]
    url: String,

    /// Subject common name or distinguished name
    #[arg(short = 'c', long = "cn", value_name = "CN")]
    common_name: String,

    /// Trust anchor PEM file
    #[arg(short = 't', long = "trust", value_name = "PATH")]
    trust: Option<PathBuf>,

    /// Re-enroll instead of enroll
    #[arg(short = 'r', long)]
    reenroll: bool,

    /// Client certificate PEM for TLS authentication
    #[arg(long, value_name = "PATH", requires = "key")]
    cert: Option<PathBuf>,

    /// Client private key PEM for TLS authentication
    #[arg(long, value_name = "PATH", requires = "cert")]
    key: Option<PathBuf>,

    /// HTTP Digest credentials ([realm:]user:password)
    #[arg(long, value_name = "CREDS", conflicts_with = "basic_auth")]
    auth: Option<String>,

    /// HTTP Basic credentials (user:password)
    #[arg(long, value_name = "CREDS")]
    basic_auth: Option<String>,

    /// TLS protocol version
    #[arg(long, value_name = "VERSION")]
    tls: Option<TlsVersion>,

    /// Bind the request to the TLS session (proof-of-possession)
    #[arg(long)]
    pop: bool,

    /// Overall timeout in milliseconds (0 = none)
    #[arg(long = "to", value_name = "MS", default_value_t = 0)]
    timeout_ms: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    // Create runtime for async operations
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(EnrollmentOutcome::Issued(certs)) => {
            for (i, cert) in certs.iter().enumerate() {
                println!("Certificate {}:", i + 1);
                print_certificate(cert);
                println!();
            }
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            eprintln!("Enrollment failed: {}", outcome);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<EnrollmentOutcome, Box<dyn std::error::Error>> {
    let mut builder = EstClientConfig::builder()
        .server_url(&cli.url)?
        .timeout(Duration::from_millis(cli.timeout_ms));

    if let Some(ref path) = cli.trust {
        builder = builder.trust_explicit(std::fs::read(path)?);
    }
    if let (Some(cert), Some(key)) = (&cli.cert, &cli.key) {
        builder = builder.client_identity(ClientIdentity::from_files(cert, key)?);
    }
    if let Some(version) = cli.tls {
        builder = builder.tls_version(version);
    }
    if cli.pop {
        builder = builder.enable_channel_binding();
    }

    let config = builder.build()?;
    let client = EnrollmentClient::new(config).await?;

    let mut auth: Box<dyn AuthProvider> = match (&cli.auth, &cli.basic_auth) {
        (Some(creds), _) => Box::new(DigestAuth::new(Credentials::parse(creds)?)),
        (None, Some(creds)) => Box::new(BasicAuth::new(Credentials::parse(creds)?)),
        (None, None) => Box::new(NoAuth),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling enrollment");
            on_interrupt.cancel();
        }
    });

    let key = EnrollmentKey::generate_software(None).await?;
    let mut options = EnrollOptions::default().with_cancel(cancel);
    options.reenroll = cli.reenroll;

    tracing::info!(
        "Enrolling '{}' with {}{}",
        cli.common_name,
        cli.url,
        if cli.pop { " (proof-of-possession)" } else { "" }
    );

    let outcome = if cli.pop {
        client
            .enroll_with_proof_of_possession(&cli.common_name, key, auth.as_mut(), options)
            .await?
    } else {
        client
            .enroll(&cli.common_name, key, auth.as_mut(), options)
            .await?
    };

    Ok(outcome)
}

fn print_certificate(cert: &Certificate) {
    let tbs = &cert.tbs_certificate;

    println!("  Subject: {}", tbs.subject);
    println!("  Issuer: {}", tbs.issuer);
    println!("  Serial Number: {}", format_serial(tbs.serial_number.as_bytes()));
    println!("  Not Before: {}", format_time(&tbs.validity.not_before));
    println!("  Not After: {}", format_time(&tbs.validity.not_after));

    match cert.to_pem(LineEnding::LF) {
        Ok(pem) => print!("{}", pem),
        Err(e) => tracing::warn!("Could not PEM-encode certificate: {}", e),
    }
}

fn format_serial(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(":")
}

fn format_time(time: &x509_cert::time::Time) -> String {
    let secs = time.to_unix_duration().as_secs();
    i64::try_from(secs)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{}s since epoch", secs))
}

//! codesign - sign and verify application and platform trees.
//!
//! ## Usage
//!
//! ```bash
//! # Sign an app in place (writes appinfo/signature.json)
//! codesign sign-app --path apps/calendar \
//!     --certificate calendar.crt --private-key calendar.key
//!
//! # Sign the platform tree (writes core/signature.json)
//! codesign --platform-root /var/www/platform sign-core \
//!     --certificate core.crt --private-key core.key
//!
//! # Verify everything that is shipped or signed, persisting results
//! codesign --platform-root /var/www/platform \
//!     --results-file /var/lib/codesign/results.json verify-instance
//! ```
//!
//! Exits with status 1 when any report is non-empty.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use codesign_core::types::APP_MANIFEST_PATH;
use codesign_core::{
    Checker, DifferenceKind, DifferenceReport, IntegrityConfig, TreeSigner, CORE_SCOPE,
};
use codesign_crypto::PssSigner;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Code signing for application and platform trees.
///
/// Every signed tree carries a manifest of SHA-512 file digests, an RSA-PSS
/// signature over them and the signing certificate. Verification checks the
/// certificate against the pinned root, the signature against the
/// certificate, and the digests against the files on disk.
#[derive(Parser)]
#[command(name = "codesign")]
#[command(version = VERSION)]
#[command(about = "Sign and verify application and platform trees")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Platform installation root
    #[arg(long, default_value = ".")]
    platform_root: PathBuf,

    /// Pinned root certificate (default: <platform-root>/resources/codesigning/root.crt)
    #[arg(long)]
    root_certificate: Option<PathBuf>,

    /// Persist verification results to this JSON file
    #[arg(long)]
    results_file: Option<PathBuf>,

    /// Threads used to hash file contents
    #[arg(long, default_value = "1")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign an app and write its appinfo/signature.json
    SignApp {
        /// Installed app id
        #[arg(long, required_unless_present = "path", conflicts_with = "path")]
        app_id: Option<String>,

        /// App directory (instead of an installed app id)
        #[arg(long)]
        path: Option<PathBuf>,

        /// PEM signing certificate
        #[arg(long)]
        certificate: PathBuf,

        /// PEM private key (PKCS#8 or PKCS#1)
        #[arg(long)]
        private_key: PathBuf,
    },

    /// Sign the platform tree and write core/signature.json
    SignCore {
        /// PEM signing certificate (CN=core)
        #[arg(long)]
        certificate: PathBuf,

        /// PEM private key (PKCS#8 or PKCS#1)
        #[arg(long)]
        private_key: PathBuf,
    },

    /// Verify an app against its manifest
    VerifyApp {
        /// App id, also the scope the certificate must cover
        app_id: String,

        /// App directory (default: resolved from the app directories)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Verify the platform tree against core/signature.json
    VerifyCore,

    /// Verify the platform and every shipped or signed app
    VerifyInstance {
        /// Only consider these apps (default: every installed app)
        #[arg(long = "app", value_name = "APP_ID")]
        apps: Vec<String>,
    },

    /// Show stored verification results
    Results,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = IntegrityConfig::for_platform_root(cli.platform_root.clone());
    if let Some(root_certificate) = cli.root_certificate {
        config.root_certificate = root_certificate;
    }
    config.result_store_path = cli.results_file;
    config.hash_threads = cli.threads;

    let json = cli.format == OutputFormat::Json;

    // Signing never consults the pinned root, so it works outside an install
    match cli.command {
        Commands::SignApp {
            app_id,
            path,
            certificate,
            private_key,
        } => {
            let tree_signer = TreeSigner::from_config(config);
            let (certificate, signer) = load_signing_material(&certificate, &private_key)?;
            let manifest = match (path, app_id) {
                (Some(path), _) => tree_signer.sign_tree(&path, &certificate, &signer)?,
                (None, Some(app_id)) => tree_signer.sign_app(&app_id, &certificate, &signer)?,
                (None, None) => anyhow::bail!("either --app-id or --path is required"),
            };
            eprintln!("Signed {} files.", manifest.hashes.len());
            Ok(ExitCode::SUCCESS)
        },

        Commands::SignCore {
            certificate,
            private_key,
        } => {
            let tree_signer = TreeSigner::from_config(config);
            let (certificate, signer) = load_signing_material(&certificate, &private_key)?;
            let manifest = tree_signer.sign_core(&certificate, &signer)?;
            eprintln!("Signed {} files.", manifest.hashes.len());
            Ok(ExitCode::SUCCESS)
        },

        Commands::VerifyApp { app_id, path } => {
            let checker = load_checker(config)?;
            let report = match path {
                Some(path) => checker.verify_tree(&path.join(APP_MANIFEST_PATH), &path, &app_id),
                None => checker.verify_app_signature(&app_id),
            };
            let mut reports = BTreeMap::new();
            reports.insert(app_id, report);
            Ok(print_reports(&reports, json))
        },

        Commands::VerifyCore => {
            let checker = load_checker(config)?;
            let mut reports = BTreeMap::new();
            reports.insert(CORE_SCOPE.to_string(), checker.verify_core_signature());
            Ok(print_reports(&reports, json))
        },

        Commands::VerifyInstance { apps } => {
            let checker = load_checker(config)?;
            let instance = if apps.is_empty() {
                checker.run_full_instance_verification()
            } else {
                checker.run_instance_verification(&apps)
            };
            for skipped in &instance.skipped {
                eprintln!("Skipped {} (not shipped, not signed)", skipped);
            }

            let mut reports = BTreeMap::new();
            reports.insert(CORE_SCOPE.to_string(), instance.core);
            reports.extend(instance.apps);
            Ok(print_reports(&reports, json))
        },

        Commands::Results => Ok(print_reports(&load_checker(config)?.results(), json)),
    }
}

fn load_checker(config: IntegrityConfig) -> anyhow::Result<Checker> {
    Checker::from_config(config).context("failed to initialize checker")
}

fn load_signing_material(
    certificate: &Path,
    private_key: &Path,
) -> anyhow::Result<(String, PssSigner)> {
    let certificate = std::fs::read_to_string(certificate)
        .with_context(|| format!("failed to read certificate {}", certificate.display()))?;
    let key_pem = std::fs::read_to_string(private_key)
        .with_context(|| format!("failed to read private key {}", private_key.display()))?;
    let signer = PssSigner::from_pem(&key_pem).context("failed to load private key")?;
    Ok((certificate, signer))
}

/// Print reports and return the exit code they imply.
fn print_reports(reports: &BTreeMap<String, DifferenceReport>, json: bool) -> ExitCode {
    let passed = reports.values().all(DifferenceReport::is_empty);

    if json {
        match serde_json::to_string_pretty(reports) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("failed to encode results: {}", e);
                return ExitCode::FAILURE;
            },
        }
    } else {
        if reports.is_empty() {
            println!("No stored results.");
        }
        for (scope, report) in reports {
            print_report(scope, report);
        }
    }

    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_report(scope: &str, report: &DifferenceReport) {
    if let Some(failure) = report.failure() {
        println!("\x1b[31m[FAIL]\x1b[0m {}: {} ({})", scope, failure.message, failure.class);
        return;
    }
    let Some(discrepancies) = report.discrepancies() else {
        return;
    };
    if discrepancies.is_empty() {
        println!("\x1b[32m[PASS]\x1b[0m {}", scope);
        return;
    }

    println!(
        "\x1b[31m[FAIL]\x1b[0m {}: {} differences",
        scope,
        discrepancies.len()
    );
    for kind in [
        DifferenceKind::ExtraFile,
        DifferenceKind::FileMissing,
        DifferenceKind::InvalidHash,
    ] {
        for path in discrepancies.bucket(kind).keys() {
            println!("  {:<13} {}", kind.as_str(), path);
        }
    }
}

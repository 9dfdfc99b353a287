// BlackBook Outcome Resolver - Command Line Entry Point
// Resolve a game from a request file, or produce governance attestations

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blackbook_resolver::cli;
use blackbook_resolver::config::{DEFAULT_LOG_FILTER, ENV_LOG};
use blackbook_resolver::crypto::{self, AttestationSigner};
use blackbook_resolver::EngineConfig;

const USAGE: &str = "\
Usage:
  blackbook-resolver resolve <request.json>
  blackbook-resolver sign <seed> <name> <data>
  blackbook-resolver address <seed> <name>
  blackbook-resolver recover <digest> <signature>";

type CliResult = Result<(), cli::CliError>;

#[tokio::main]
async fn main() -> ExitCode {
    // Logging comes up before config so that config warnings are not lost
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    info!(log_filter = %config.log_filter, checker = ?config.default_checker, "configuration loaded");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["resolve", path] => resolve(&config, path).await,
        ["sign", seed, name, data] => sign(seed, name, data),
        ["address", seed, name] => address(seed, name),
        ["recover", digest, signature] => recover(digest, signature),
        _ => {
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn resolve(config: &EngineConfig, path: &str) -> CliResult {
    let output = cli::resolve_file(config, path).await?;
    info!(path, "request resolved");
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn sign(seed: &str, name: &str, data: &str) -> CliResult {
    let signer = AttestationSigner::from_seed(seed.as_bytes(), name)?;
    println!("address:   {}", signer.address);
    println!("digest:    {}", crypto::to_hex(&crypto::hash_message(data.as_bytes())));
    println!("signature: {}", signer.sign_message(data.as_bytes()));
    Ok(())
}

fn address(seed: &str, name: &str) -> CliResult {
    let signer = AttestationSigner::from_seed(seed.as_bytes(), name)?;
    println!("{}", signer.address);
    Ok(())
}

fn recover(digest: &str, signature: &str) -> CliResult {
    println!("{}", crypto::recover_address(digest, signature)?);
    Ok(())
}

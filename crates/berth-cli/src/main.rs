//! Deploy and launch an iOS app on a connected device or a simulator.
//!
//! # Usage
//!
//! ```bash
//! # Install and launch on the first connected device (or the default simulator)
//! berth --app build/MyApp.ipa
//!
//! # Force the default simulator
//! berth --app build/Debug-iphonesimulator/MyApp.app --simulator
//!
//! # Pick a target by UDID
//! berth --app MyApp.ipa --target 00008110-001A0C123456789A
//!
//! # List devices and simulators
//! berth --list
//! berth --list --json
//!
//! # More logging
//! berth --app MyApp.ipa -vv
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use berth_core::config::BerthConfig;
use berth_core::deploy::{DeployRequest, Deployer};
use berth_core::error::DeployError;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

/// Deploy and launch iOS apps on devices and simulators.
#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Deploy and launch iOS apps on devices and simulators")]
#[command(version)]
struct Cli {
    /// Path to a .app bundle or .ipa package
    #[arg(long, required_unless_present = "list")]
    app: Option<PathBuf>,

    /// UDID of the device or simulator to deploy to
    #[arg(long, env = "BERTH_TARGET")]
    target: Option<String>,

    /// Prefer the default simulator over connected devices
    #[arg(long)]
    simulator: bool,

    /// List connected devices and available simulators
    #[arg(long, conflicts_with = "app")]
    list: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn log_filter(verbose: u8) -> EnvFilter {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default))
}

fn exit_status(err: &DeployError) -> u8 {
    if err.is_argument() {
        2
    } else if err.is_target_missing() {
        3
    } else {
        1
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(cli: Cli) -> Result<(), DeployError> {
    let deployer = Deployer::from_config(&BerthConfig::load());

    if cli.list {
        let targets = deployer.list_targets().await?;
        if cli.json {
            println!("{}", serde_json::json!({ "targets": targets }));
        } else if targets.is_empty() {
            eprintln!("No connected devices and no available simulators");
        } else {
            for target in targets {
                println!(
                    "{}\t{}\t{}",
                    target.kind,
                    target.udid,
                    target.name.as_deref().unwrap_or("")
                );
            }
        }
        return Ok(());
    }

    let report = deployer
        .run(DeployRequest {
            app: cli.app,
            target: cli.target,
            prefer_simulator: cli.simulator,
        })
        .await?;

    if cli.json {
        println!("{}", serde_json::json!(report));
    } else {
        println!("Launched {} on {}", report.bundle_id, report.target);
    }
    Ok(())
}

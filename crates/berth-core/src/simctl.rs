//! Interface to Apple's `xcrun simctl` command-line tool.
//!
//! This module wraps the simulator control commands berth needs: listing the
//! available simulators, booting one, installing a bundle, and launching an
//! app by bundle identifier.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` to be available.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use berth_core::command::SystemRunner;
//! use berth_core::simctl::Simctl;
//!
//! # async fn example() -> Result<(), berth_core::simctl::SimctlError> {
//! let simctl = Simctl::new(Arc::new(SystemRunner));
//! for sim in simctl.list_simulators().await? {
//!     println!("{}: {} ({})", sim.udid, sim.name, sim.state);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::command::{stream_text, CommandRunner};

/// Errors that can occur when interacting with simctl.
#[derive(Error, Debug)]
pub enum SimctlError {
    /// A simctl command exited with a non-zero status.
    #[error("xcrun simctl {command} failed: {stderr}")]
    CommandFailed {
        /// The simctl subcommand that failed (e.g. `boot`).
        command: &'static str,
        /// Diagnostic text captured from stderr.
        stderr: String,
    },

    /// Failed to parse JSON output from simctl.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// An I/O error occurred while executing the command.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Represents an iOS Simulator device.
///
/// This struct contains information about a simulator device as reported
/// by `xcrun simctl list devices -j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorDevice {
    /// The unique device identifier (UDID) for this simulator.
    pub udid: String,

    /// The human-readable name of the device (e.g., "iPhone 15 Pro").
    pub name: String,

    /// The current state of the device (e.g., "Booted", "Shutdown").
    pub state: String,

    /// Whether the simulator's runtime is installed and usable.
    #[serde(rename = "isAvailable", default = "available_by_default")]
    pub is_available: bool,
}

fn available_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: HashMap<String, Vec<SimulatorDevice>>,
}

/// Platform and numeric version parsed from a runtime identifier such as
/// `com.apple.CoreSimulator.SimRuntime.iOS-17-0`.
fn parse_runtime(identifier: &str) -> Option<(&str, Vec<u32>)> {
    let name = identifier.rsplit('.').next()?;
    let mut parts = name.split('-');
    let platform = parts.next()?;
    let version = parts.map(|p| p.parse().ok()).collect::<Option<Vec<u32>>>()?;
    Some((platform, version))
}

/// Returns true if a failed `simctl boot` only reports that the device is
/// already running.
///
/// simctl offers no dedicated exit status for this case, so the diagnostic
/// text is the only signal.
pub fn is_already_booted(stderr: &str) -> bool {
    stderr.contains("current state: Booted")
}

/// Wrapper for `xcrun simctl` commands.
#[derive(Clone)]
pub struct Simctl {
    runner: Arc<dyn CommandRunner>,
}

impl Simctl {
    /// Create a wrapper that runs simctl through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn simctl(&self, command: &'static str, args: &[&str]) -> Result<Vec<u8>, SimctlError> {
        let mut full = vec!["simctl", command];
        full.extend_from_slice(args);
        let output = self.runner.run("xcrun", &full).await?;

        if !output.status.success() {
            return Err(SimctlError::CommandFailed {
                command,
                stderr: stream_text(&output.stderr),
            });
        }
        Ok(output.stdout)
    }

    /// Lists the available iOS simulators.
    ///
    /// The result is ordered by runtime version (oldest first) and then by the
    /// order simctl reports devices within a runtime, so the last element is
    /// the default simulator of the newest runtime.
    ///
    /// # Errors
    ///
    /// - [`SimctlError::Io`] if the command fails to execute
    /// - [`SimctlError::CommandFailed`] if simctl returns a non-zero exit code
    /// - [`SimctlError::JsonParse`] if the output cannot be parsed as JSON
    pub async fn list_simulators(&self) -> Result<Vec<SimulatorDevice>, SimctlError> {
        let stdout = self.simctl("list", &["devices", "-j"]).await?;
        Self::parse_device_list(&stdout)
    }

    /// Boots a simulator device.
    ///
    /// If the simulator is already booted this returns successfully.
    ///
    /// # Errors
    ///
    /// - [`SimctlError::Io`] if the command fails to execute
    /// - [`SimctlError::CommandFailed`] for any failure other than "already booted"
    pub async fn boot(&self, udid: &str) -> Result<(), SimctlError> {
        match self.simctl("boot", &[udid]).await {
            Ok(_) => Ok(()),
            Err(SimctlError::CommandFailed { stderr, .. }) if is_already_booted(&stderr) => {
                debug!(udid, "simulator already booted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Installs an `.app` bundle onto a booted simulator.
    pub async fn install(&self, udid: &str, bundle: &Path) -> Result<(), SimctlError> {
        let bundle = bundle.to_string_lossy();
        self.simctl("install", &[udid, &bundle]).await.map(|_| ())
    }

    /// Launches an installed app by bundle identifier.
    pub async fn launch(&self, udid: &str, bundle_id: &str) -> Result<(), SimctlError> {
        self.simctl("launch", &[udid, bundle_id]).await.map(|_| ())
    }

    /// Parses device list JSON into an ordered list of available iOS simulators.
    ///
    /// # Errors
    ///
    /// - [`SimctlError::JsonParse`] if the JSON is invalid or has unexpected structure
    pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimulatorDevice>, SimctlError> {
        let device_list: DeviceList = serde_json::from_slice(json)?;

        let mut runtimes: Vec<(Vec<u32>, Vec<SimulatorDevice>)> = device_list
            .devices
            .into_iter()
            .filter_map(|(runtime, devices)| match parse_runtime(&runtime) {
                Some(("iOS", version)) => Some((version, devices)),
                _ => None,
            })
            .collect();
        runtimes.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(runtimes
            .into_iter()
            .flat_map(|(_, devices)| devices)
            .filter(|d| d.is_available)
            .collect())
    }
}

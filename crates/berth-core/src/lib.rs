//! # berth-core
//!
//! Core library for deploying and launching iOS apps without the Xcode IDE.
//!
//! Given a `.app` bundle or `.ipa` package, berth picks a target (a connected
//! device or a local simulator), installs the app there and launches it.
//!
//! ## Modules
//!
//! - [`deploy`] - The top-level run: bundle preparation, target selection, dispatch
//! - [`archive`] - Streaming `.ipa` extraction
//! - [`bundle`] - `Info.plist` bundle identifier lookup
//! - [`target`] - Deployment targets and the selection policy
//! - [`simulator`] - Boot / install / launch on a simulator
//! - [`device`] - Mount / upload / install / launch on a physical device
//! - [`simctl`] - Wrapper around Apple's `xcrun simctl` CLI
//! - [`xcode`] - Locating the active Xcode developer directory
//! - [`command`] - External process execution
//! - [`config`] - Persistent settings in `~/.berth/config.json`
//! - [`error`] - The unified [`DeployError`](error::DeployError)
//!
//! ## External Dependencies
//!
//! - **Xcode** (for `xcrun simctl`, `Simulator.app` and developer disk images)
//! - **usbmuxd** for physical devices (bundled with macOS)
//!
//! ## Example
//!
//! ```no_run
//! use berth_core::config::BerthConfig;
//! use berth_core::deploy::{DeployRequest, Deployer};
//!
//! # async fn example() -> Result<(), berth_core::error::DeployError> {
//! let deployer = Deployer::from_config(&BerthConfig::load());
//! let report = deployer
//!     .run(DeployRequest {
//!         app: Some("build/MyApp.ipa".into()),
//!         prefer_simulator: true,
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("launched {} on {}", report.bundle_id, report.target);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod bundle;
pub mod command;
pub mod config;
pub mod deploy;
pub mod device;
pub mod error;
pub mod simctl;
pub mod simulator;
pub mod target;
pub mod xcode;

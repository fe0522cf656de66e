//! Simulator deployment.
//!
//! Installing on a simulator is a fixed sequence of native tool invocations:
//! boot the simulator, install the bundle, bring `Simulator.app` to the front
//! on that simulator, and launch the app by bundle identifier. The first
//! failing step aborts the run; nothing is retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, info_span, Instrument};

use crate::command::{stream_text, CommandRunner};
use crate::simctl::{Simctl, SimctlError};
use crate::xcode::{self, XcodeError};

/// Errors from the simulator deployment pipeline.
#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error(transparent)]
    Simctl(#[from] SimctlError),

    #[error(transparent)]
    Xcode(#[from] XcodeError),

    /// `open Simulator.app` failed.
    #[error("Failed to open Simulator.app: {0}")]
    OpenFailed(String),
}

/// Deploys bundles to local simulators.
pub struct SimulatorPipeline {
    simctl: Simctl,
    runner: Arc<dyn CommandRunner>,
    developer_dir: Option<PathBuf>,
}

impl SimulatorPipeline {
    /// `developer_dir` overrides the Xcode lookup when set.
    pub fn new(runner: Arc<dyn CommandRunner>, developer_dir: Option<PathBuf>) -> Self {
        Self {
            simctl: Simctl::new(Arc::clone(&runner)),
            runner,
            developer_dir,
        }
    }

    /// Boot, install, show and launch `bundle` on the simulator `udid`.
    pub async fn deploy(
        &self,
        udid: &str,
        bundle: &Path,
        bundle_id: &str,
    ) -> Result<(), SimulatorError> {
        async {
            info!("booting simulator");
            self.simctl.boot(udid).await?;

            info!(bundle = %bundle.display(), "installing app");
            self.simctl.install(udid, bundle).await?;

            self.open_simulator_app(udid).await?;

            info!(bundle_id, "launching app");
            self.simctl.launch(udid, bundle_id).await?;
            Ok::<_, SimulatorError>(())
        }
        .instrument(info_span!("simulator_deploy", udid))
        .await
    }

    /// Bring `Simulator.app` up showing the simulator `udid`.
    async fn open_simulator_app(&self, udid: &str) -> Result<(), SimulatorError> {
        let runner = self.runner.as_ref();
        let configured = self.developer_dir.as_deref();
        let developer_dir = xcode::developer_dir(runner, configured).await?;
        let app = xcode::simulator_app(&developer_dir);
        let app = app.to_string_lossy();

        let output = self
            .runner
            .run("open", &[&app, "--args", "-CurrentDeviceUDID", udid])
            .await
            .map_err(|e| SimulatorError::OpenFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(SimulatorError::OpenFailed(stream_text(&output.stderr)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_display() {
        let err = SimulatorError::OpenFailed("LSOpenURLsWithRole() failed".into());
        assert_eq!(
            err.to_string(),
            "Failed to open Simulator.app: LSOpenURLsWithRole() failed"
        );
    }

    #[test]
    fn simctl_errors_pass_through() {
        let err: SimulatorError = SimctlError::CommandFailed {
            command: "boot",
            stderr: "Invalid device".into(),
        }
        .into();
        assert_eq!(err.to_string(), "xcrun simctl boot failed: Invalid device");
    }
}

//! The top-level deployment run.
//!
//! [`Deployer::run`] ties the components together: validate the request,
//! extract an `.ipa` if needed, read the bundle identifier, discover and
//! resolve the target, and hand off to the simulator or device pipeline.
//!
//! Discovery is lazy. Devices are only listed when the selection policy can
//! pick one, and simulators only when no device was chosen.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::archive::{extract_app, is_app_archive};
use crate::bundle::AppBundle;
use crate::command::{CommandRunner, SystemRunner};
use crate::config::BerthConfig;
use crate::device::backend::default_connector;
use crate::device::discovery::{list_devices, DiscoveryError};
use crate::device::mounter::DiskImageLocator;
use crate::device::DevicePipeline;
use crate::error::DeployError;
use crate::simctl::Simctl;
use crate::simulator::SimulatorPipeline;
use crate::target::{resolve, Target, TargetKind};

/// Prefix of temporary extraction directories.
const SCRATCH_PREFIX: &str = "berth-";

/// Source of deployable targets.
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Connected physical devices, in discovery order.
    async fn devices(&self) -> Result<Vec<Target>, DeployError>;

    /// Available simulators, default last.
    async fn simulators(&self) -> Result<Vec<Target>, DeployError>;
}

/// Discovers devices through usbmuxd and simulators through simctl.
pub struct SystemTargets {
    simctl: Simctl,
}

impl SystemTargets {
    pub fn new(simctl: Simctl) -> Self {
        Self { simctl }
    }
}

#[async_trait]
impl TargetSource for SystemTargets {
    async fn devices(&self) -> Result<Vec<Target>, DeployError> {
        match list_devices().await {
            Ok(devices) => Ok(devices.into_iter().map(Target::from).collect()),
            // No usbmuxd means no physical devices can be reached.
            Err(DiscoveryError::UsbmuxdUnavailable(reason)) => {
                debug!(%reason, "usbmuxd unavailable, assuming no devices");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn simulators(&self) -> Result<Vec<Target>, DeployError> {
        Ok(self
            .simctl
            .list_simulators()
            .await?
            .into_iter()
            .map(|sim| Target::simulator(sim.udid).with_name(sim.name))
            .collect())
    }
}

/// What to deploy and where.
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    /// A `.app` directory or `.ipa` package.
    pub app: Option<PathBuf>,
    /// Explicit target UDID.
    pub target: Option<String>,
    /// Prefer the default simulator over connected devices.
    pub prefer_simulator: bool,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub target: Target,
    pub bundle_id: String,
}

/// Runs deployments.
pub struct Deployer {
    targets: Arc<dyn TargetSource>,
    simulator: SimulatorPipeline,
    device: DevicePipeline,
    temp_root: Option<PathBuf>,
}

impl Deployer {
    pub fn new(
        targets: Arc<dyn TargetSource>,
        simulator: SimulatorPipeline,
        device: DevicePipeline,
    ) -> Self {
        Self {
            targets,
            simulator,
            device,
            temp_root: None,
        }
    }

    /// A deployer wired to the host's tools and devices.
    pub fn from_config(config: &BerthConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let targets = SystemTargets::new(Simctl::new(Arc::clone(&runner)));
        let simulator = SimulatorPipeline::new(Arc::clone(&runner), config.developer_dir.clone());
        let device = DevicePipeline::new(
            default_connector(),
            DiskImageLocator::new(runner, config.developer_dir.clone()),
        );
        Self::new(Arc::new(targets), simulator, device)
            .with_temp_dir(config.temp_dir.clone())
    }

    /// Extract packages under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_root = dir;
        self
    }

    /// Deploy and launch the requested app.
    pub async fn run(&self, request: DeployRequest) -> Result<DeployReport, DeployError> {
        let app = request
            .app
            .as_deref()
            .ok_or_else(|| DeployError::Argument("--app argument is required".into()))?;
        if !app.exists() {
            return Err(DeployError::Argument(format!(
                "App path does not exist: {}",
                app.display()
            )));
        }

        // Dropped on every return below, removing the extracted bundle.
        let (_scratch, bundle_path) = self.prepare_bundle(app).await?;
        let bundle = AppBundle::open(bundle_path)?;
        let target = self.select_target(&request).await?;
        info!(target = %target, bundle_id = %bundle.bundle_id, "deploying");

        match target.kind {
            TargetKind::Simulator => {
                self.simulator
                    .deploy(&target.udid, &bundle.path, &bundle.bundle_id)
                    .await?
            }
            TargetKind::Device => {
                self.device
                    .deploy(&target.udid, &bundle.path, &bundle.bundle_id)
                    .await?
            }
        }

        Ok(DeployReport {
            target,
            bundle_id: bundle.bundle_id,
        })
    }

    /// All devices followed by all simulators.
    pub async fn list_targets(&self) -> Result<Vec<Target>, DeployError> {
        let mut targets = self.targets.devices().await?;
        targets.extend(self.targets.simulators().await?);
        Ok(targets)
    }

    /// Returns the bundle directory to deploy, extracting `app` first when it
    /// is a package. The returned [`TempDir`] owns the extracted files.
    async fn prepare_bundle(&self, app: &Path) -> Result<(Option<TempDir>, PathBuf), DeployError> {
        if !is_app_archive(app) {
            return Ok((None, app.to_path_buf()));
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let scratch = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        debug!(package = %app.display(), dest = %scratch.path().display(), "extracting package");

        let package = app.to_path_buf();
        let dest = scratch.path().to_path_buf();
        let task = tokio::task::spawn_blocking(move || extract_app(&package, &dest));
        let relative = task.await??;
        let bundle = scratch.path().join(relative);
        Ok((Some(scratch), bundle))
    }

    /// Query only the discovery sources the selection policy needs, then resolve.
    async fn select_target(&self, request: &DeployRequest) -> Result<Target, DeployError> {
        let explicit = request.target.as_deref();

        let devices = if explicit.is_none() && request.prefer_simulator {
            Vec::new()
        } else {
            self.targets.devices().await?
        };
        let needs_simulators = match explicit {
            Some(id) => !devices.iter().any(|d| d.udid == id),
            None => request.prefer_simulator || devices.is_empty(),
        };
        let simulators = if needs_simulators {
            self.targets.simulators().await?
        } else {
            Vec::new()
        };

        Ok(resolve(explicit, request.prefer_simulator, &devices, &simulators)?)
    }
}

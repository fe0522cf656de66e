//! Top-level deployment error.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::bundle::BundleIdError;
use crate::device::discovery::DiscoveryError;
use crate::device::DeviceDeployError;
use crate::simctl::SimctlError;
use crate::simulator::SimulatorError;
use crate::target::ResolveError;

/// Any failure of a [`Deployer`](crate::deploy::Deployer) run.
///
/// Each component keeps its own error type; this enum only unifies them so
/// callers can report a failure and pick an exit status from one value.
#[derive(Error, Debug)]
pub enum DeployError {
    /// The request itself is invalid (missing or nonexistent app path).
    #[error("{0}")]
    Argument(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    BundleId(#[from] BundleIdError),

    #[error(transparent)]
    Simulator(#[from] SimulatorError),

    #[error(transparent)]
    Device(#[from] DeviceDeployError),

    /// Listing simulators failed.
    #[error("Failed to list simulators: {0}")]
    SimulatorDiscovery(#[from] SimctlError),

    /// Listing physical devices failed.
    #[error(transparent)]
    DeviceDiscovery(#[from] DiscoveryError),

    /// Creating the extraction directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking extraction task panicked or was cancelled.
    #[error("Extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DeployError {
    /// True for errors caused by the request rather than the deployment.
    pub fn is_argument(&self) -> bool {
        matches!(self, DeployError::Argument(_))
    }

    /// True when no target matched or none was available.
    pub fn is_target_missing(&self) -> bool {
        matches!(self, DeployError::Resolve(_))
    }
}

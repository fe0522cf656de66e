//! Deployment targets and the policy for choosing one.
//!
//! [`resolve`] is a pure function over the discovered device and simulator
//! lists. The preference order is: an explicitly requested UDID, then the
//! first connected physical device, then the default (last listed) simulator.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// What kind of environment a [`Target`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A physical device reachable through usbmuxd.
    Device,
    /// A local iOS Simulator.
    Simulator,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Device => write!(f, "device"),
            TargetKind::Simulator => write!(f, "simulator"),
        }
    }
}

/// A device or simulator an app can be deployed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Platform-assigned unique identifier.
    pub udid: String,
    /// Human-readable name, when discovery provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Whether this is a physical device or a simulator.
    pub kind: TargetKind,
}

impl Target {
    pub fn device(udid: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            name: None,
            kind: TargetKind::Device,
        }
    }

    pub fn simulator(udid: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            name: None,
            kind: TargetKind::Simulator,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {} ({})", self.kind, self.udid, name),
            None => write!(f, "{} {}", self.kind, self.udid),
        }
    }
}

/// Errors produced while choosing a target.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// The requested UDID matched neither a device nor a simulator.
    #[error("No device or simulator with udid {0} found")]
    TargetNotFound(String),

    /// No UDID was requested and there is nothing to fall back to.
    #[error("No connected devices and no available simulators")]
    NoTargetAvailable,
}

/// Choose exactly one target.
///
/// 1. With `explicit_id`, devices are searched before simulators and the first
///    exact match wins.
/// 2. Otherwise, with `prefer_simulator`, the last simulator is used.
/// 3. Otherwise the first device is used, falling back to rule 2.
pub fn resolve(
    explicit_id: Option<&str>,
    prefer_simulator: bool,
    devices: &[Target],
    simulators: &[Target],
) -> Result<Target, ResolveError> {
    if let Some(id) = explicit_id {
        return devices
            .iter()
            .chain(simulators)
            .find(|t| t.udid == id)
            .cloned()
            .ok_or_else(|| ResolveError::TargetNotFound(id.to_string()));
    }

    if !prefer_simulator {
        if let Some(device) = devices.first() {
            return Ok(device.clone());
        }
    }

    simulators
        .last()
        .cloned()
        .ok_or(ResolveError::NoTargetAvailable)
}

//! Physical device discovery through usbmuxd.
//!
//! Apple's `usbmuxd` daemon tracks every device connected over USB (or
//! paired over the network). [`list_devices`] asks it for the current list and
//! turns each entry into a [`Target`].

use std::fmt;
use std::net::IpAddr;

use idevice::usbmuxd::{Connection, UsbmuxdConnection};
use thiserror::Error;
use tracing::debug;

use crate::target::Target;

/// Errors that can occur while listing devices.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Failed to connect to the local usbmuxd daemon.
    #[error("failed to connect to usbmuxd: {0}")]
    UsbmuxdUnavailable(String),

    /// usbmuxd answered but the device list request failed.
    #[error("failed to list devices: {0}")]
    ListFailed(String),
}

/// A physical iOS device discovered via usbmuxd.
#[derive(Debug, Clone)]
pub struct PhysicalDevice {
    /// Unique Device Identifier (UDID).
    pub udid: String,
    /// How the device is connected.
    pub connection: DeviceConnection,
}

impl From<PhysicalDevice> for Target {
    fn from(device: PhysicalDevice) -> Self {
        let name = device.connection.to_string();
        Target::device(device.udid).with_name(name)
    }
}

/// How a physical device is connected to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConnection {
    /// Connected via USB cable.
    Usb,
    /// Connected via the network (WiFi).
    Network(IpAddr),
    /// Unknown connection type.
    Unknown(String),
}

impl fmt::Display for DeviceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConnection::Usb => write!(f, "USB"),
            DeviceConnection::Network(ip) => write!(f, "Network ({ip})"),
            DeviceConnection::Unknown(s) => write!(f, "Unknown ({s})"),
        }
    }
}

impl From<Connection> for DeviceConnection {
    fn from(conn: Connection) -> Self {
        match conn {
            Connection::Usb => DeviceConnection::Usb,
            Connection::Network(ip) => DeviceConnection::Network(ip),
            Connection::Unknown(s) => DeviceConnection::Unknown(s),
        }
    }
}

/// List all physical iOS devices currently known to usbmuxd.
///
/// Devices are returned in the order usbmuxd reports them.
pub async fn list_devices() -> Result<Vec<PhysicalDevice>, DiscoveryError> {
    let mut muxd = UsbmuxdConnection::default()
        .await
        .map_err(|e| DiscoveryError::UsbmuxdUnavailable(e.to_string()))?;

    let devices = muxd
        .get_devices()
        .await
        .map_err(|e| DiscoveryError::ListFailed(e.to_string()))?;
    debug!(count = devices.len(), "usbmuxd devices");

    Ok(devices
        .into_iter()
        .map(|d| PhysicalDevice {
            udid: d.udid,
            connection: d.connection_type.into(),
        })
        .collect())
}

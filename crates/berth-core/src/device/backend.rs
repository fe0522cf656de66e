//! `idevice`-backed implementation of the device capability traits.
//!
//! Every service (lockdown, image mounter, AFC, installation proxy and
//! debugserver) is reached through a [`UsbmuxdProvider`] for the session's
//! device. [`default_connector`] is what [`Deployer::from_config`] wires into
//! the device pipeline.
//!
//! [`Deployer::from_config`]: crate::deploy::Deployer::from_config

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use idevice::afc::errors::AfcError;
use idevice::afc::opcode::AfcFopenMode;
use idevice::afc::AfcClient;
use idevice::debug_proxy::{DebugProxyClient, DebugserverCommand};
use idevice::installation_proxy::InstallationProxyClient;
use idevice::lockdown::LockdownClient;
use idevice::mobile_image_mounter::ImageMounter;
use idevice::provider::{IdeviceProvider, UsbmuxdProvider};
use idevice::usbmuxd::{UsbmuxdAddr, UsbmuxdConnection};
use idevice::{IdeviceError, IdeviceService, ReadWrite};
use tracing::debug;

use super::{
    AppLaunchInfo, DeviceConnector, DeviceError, DeviceSession, FileTransfer, Installer,
    ProcessControl,
};

const LABEL: &str = "berth";
const DEVELOPER_IMAGE_TYPE: &str = "Developer";
const DEBUGSERVER_SERVICE: &str = "com.apple.debugserver";
const USER_APPS: &str = "User";

/// The connector used for real deployments.
pub fn default_connector() -> Arc<dyn DeviceConnector> {
    Arc::new(IdeviceConnector::new())
}

fn protocol(err: IdeviceError) -> DeviceError {
    DeviceError::Protocol(err.to_string())
}

/// Opens sessions through the local usbmuxd daemon.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdeviceConnector;

impl IdeviceConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceConnector for IdeviceConnector {
    async fn open(&self, udid: &str) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let mut muxd = UsbmuxdConnection::default().await.map_err(protocol)?;
        let device = muxd.get_device(udid).await.map_err(|e| match e {
            IdeviceError::DeviceNotFound => DeviceError::NotFound(udid.to_string()),
            e => protocol(e),
        })?;
        debug!(udid, "opened device session");
        Ok(Box::new(IdeviceSession {
            provider: device.to_provider(UsbmuxdAddr::default(), LABEL),
            mounter: None,
        }))
    }
}

struct IdeviceSession {
    provider: UsbmuxdProvider,
    mounter: Option<ImageMounter>,
}

impl IdeviceSession {
    async fn mounter(&mut self) -> Result<&mut ImageMounter, DeviceError> {
        if self.mounter.is_none() {
            let mounter = ImageMounter::connect(&self.provider)
                .await
                .map_err(protocol)?;
            self.mounter = Some(mounter);
        }
        self.mounter
            .as_mut()
            .ok_or_else(|| DeviceError::Protocol("image mounter unavailable".into()))
    }

    /// A lockdown client with a TLS session, and whether the device needs
    /// legacy TLS for the services it starts.
    async fn lockdown(&self) -> Result<(LockdownClient, bool), DeviceError> {
        let mut lockdown = LockdownClient::connect(&self.provider)
            .await
            .map_err(protocol)?;
        let pairing = self.provider.get_pairing_file().await.map_err(protocol)?;
        let legacy = lockdown.start_session(&pairing).await.map_err(protocol)?;
        Ok((lockdown, legacy))
    }
}

#[async_trait]
impl DeviceSession for IdeviceSession {
    async fn image_mounted(&mut self) -> Result<bool, DeviceError> {
        let lookup = self
            .mounter()
            .await?
            .lookup_image(DEVELOPER_IMAGE_TYPE)
            .await;
        match lookup {
            Ok(signature) => Ok(!signature.is_empty()),
            Err(IdeviceError::NotFound) => Ok(false),
            Err(e) => Err(protocol(e)),
        }
    }

    async fn value(&mut self, key: &str) -> Result<String, DeviceError> {
        let (mut lockdown, _) = self.lockdown().await?;
        let value = lockdown
            .get_value(Some(key), None)
            .await
            .map_err(protocol)?;
        value
            .as_string()
            .map(String::from)
            .ok_or_else(|| DeviceError::Protocol(format!("{key} is not a string")))
    }

    async fn upload_image(&mut self, image: &Path, signature: &[u8]) -> Result<(), DeviceError> {
        let bytes = tokio::fs::read(image).await?;
        self.mounter()
            .await?
            .upload_image(DEVELOPER_IMAGE_TYPE, &bytes, signature.to_vec())
            .await
            .map_err(protocol)
    }

    async fn mount_image(&mut self, _image: &Path, signature: &[u8]) -> Result<(), DeviceError> {
        self.mounter()
            .await?
            .mount_image(DEVELOPER_IMAGE_TYPE, signature.to_vec(), None, None)
            .await
            .map_err(protocol)
    }

    async fn file_transfer(&mut self) -> Result<Box<dyn FileTransfer>, DeviceError> {
        let afc = AfcClient::connect(&self.provider).await.map_err(protocol)?;
        Ok(Box::new(AfcTransfer { afc }))
    }

    async fn installer(&mut self) -> Result<Box<dyn Installer>, DeviceError> {
        let client = InstallationProxyClient::connect(&self.provider)
            .await
            .map_err(protocol)?;
        Ok(Box::new(ProxyInstaller { client }))
    }

    async fn process_control(&mut self) -> Result<Box<dyn ProcessControl>, DeviceError> {
        let (mut lockdown, legacy) = self.lockdown().await?;
        let (port, ssl) = lockdown
            .start_service(DEBUGSERVER_SERVICE)
            .await
            .map_err(protocol)?;
        let mut idevice = self.provider.connect(port).await.map_err(protocol)?;
        if ssl {
            let pairing = self.provider.get_pairing_file().await.map_err(protocol)?;
            idevice
                .start_session(&pairing, legacy)
                .await
                .map_err(protocol)?;
        }
        let socket = idevice
            .get_socket()
            .ok_or_else(|| DeviceError::Protocol("debugserver socket unavailable".into()))?;
        Ok(Box::new(Debugserver {
            client: Some(DebugProxyClient::new(socket)),
        }))
    }

    async fn close(&mut self) {
        self.mounter = None;
        debug!("closed device session");
    }
}

/// Maps a failed AFC stat so that a missing object reads as `NotFound`.
fn stat_error(path: &str, err: IdeviceError) -> DeviceError {
    match err {
        IdeviceError::Afc(AfcError::ObjectNotFound) => DeviceError::NotFound(path.to_string()),
        e => protocol(e),
    }
}

struct AfcTransfer {
    afc: AfcClient,
}

#[async_trait]
impl FileTransfer for AfcTransfer {
    async fn stat(&mut self, path: &str) -> Result<(), DeviceError> {
        self.afc
            .get_file_info(path)
            .await
            .map(|_| ())
            .map_err(|e| stat_error(path, e))
    }

    async fn make_dir(&mut self, path: &str) -> Result<(), DeviceError> {
        self.afc.mk_dir(path).await.map_err(protocol)
    }

    async fn upload_dir(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        let mut pending: VecDeque<(PathBuf, String)> =
            VecDeque::from([(local.to_path_buf(), remote.to_string())]);

        while let Some((dir, remote_dir)) = pending.pop_front() {
            self.afc.mk_dir(remote_dir.as_str()).await.map_err(protocol)?;
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let remote_path = format!("{remote_dir}/{name}");
                if entry.file_type().await?.is_dir() {
                    pending.push_back((entry.path(), remote_path));
                    continue;
                }
                let bytes = tokio::fs::read(entry.path()).await?;
                let mut file = self
                    .afc
                    .open(remote_path, AfcFopenMode::WrOnly)
                    .await
                    .map_err(protocol)?;
                file.write_entire(&bytes).await.map_err(protocol)?;
                file.close().await.map_err(protocol)?;
            }
        }
        Ok(())
    }
}

/// Reads the launch fields of `bundle_id` out of an installation proxy
/// lookup result.
fn launch_info(
    bundle_id: &str,
    apps: &HashMap<String, plist::Value>,
) -> Result<AppLaunchInfo, DeviceError> {
    let info = apps
        .get(bundle_id)
        .and_then(plist::Value::as_dictionary)
        .ok_or_else(|| DeviceError::NotFound(bundle_id.to_string()))?;
    let field = |key: &str| {
        info.get(key)
            .and_then(plist::Value::as_string)
            .map(String::from)
            .ok_or_else(|| DeviceError::Protocol(format!("{bundle_id} has no {key}")))
    };
    Ok(AppLaunchInfo {
        container_path: field("Container")?,
        executable_path: field("Path")?,
        executable_name: field("CFBundleExecutable")?,
    })
}

struct ProxyInstaller {
    client: InstallationProxyClient,
}

#[async_trait]
impl Installer for ProxyInstaller {
    async fn install(&mut self, staged_path: &str, _bundle_id: &str) -> Result<(), DeviceError> {
        self.client
            .install(staged_path, None)
            .await
            .map_err(protocol)
    }

    async fn lookup(&mut self, bundle_id: &str) -> Result<AppLaunchInfo, DeviceError> {
        let apps = self
            .client
            .get_apps(Some(USER_APPS), Some(vec![bundle_id.to_string()]))
            .await
            .map_err(protocol)?;
        launch_info(bundle_id, &apps)
    }
}

/// `QSetWorkingDir:` with `dir` as its argument; the debug proxy hex-encodes
/// command arguments on the wire.
fn working_dir_command(dir: &str) -> DebugserverCommand {
    DebugserverCommand::new("QSetWorkingDir:".to_string(), vec![dir.to_string()])
}

fn max_packet_size_command(size: usize) -> DebugserverCommand {
    DebugserverCommand::new(format!("QSetMaxPacketSize:{size:x}"), Vec::new())
}

/// GDB remote protocol channel to debugserver.
struct Debugserver {
    client: Option<DebugProxyClient<Box<dyn ReadWrite>>>,
}

impl Debugserver {
    fn client(&mut self) -> Result<&mut DebugProxyClient<Box<dyn ReadWrite>>, DeviceError> {
        self.client
            .as_mut()
            .ok_or_else(|| DeviceError::Protocol("debugserver channel closed".into()))
    }

    async fn send(&mut self, command: DebugserverCommand) -> Result<String, DeviceError> {
        let reply = self
            .client()?
            .send_command(command)
            .await
            .map_err(protocol)?;
        Ok(reply.unwrap_or_default())
    }
}

#[async_trait]
impl ProcessControl for Debugserver {
    async fn set_max_packet_size(&mut self, size: usize) -> Result<(), DeviceError> {
        self.send(max_packet_size_command(size)).await?;
        Ok(())
    }

    async fn set_working_dir(&mut self, dir: &str) -> Result<(), DeviceError> {
        self.send(working_dir_command(dir)).await?;
        Ok(())
    }

    async fn launch(
        &mut self,
        executable_path: &str,
        executable_name: &str,
    ) -> Result<(), DeviceError> {
        let program = format!("{executable_path}/{executable_name}");
        self.client()?
            .set_argv(vec![program])
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn launch_status(&mut self) -> Result<String, DeviceError> {
        let command = DebugserverCommand::new("qLaunchSuccess".to_string(), Vec::new());
        self.send(command).await
    }

    async fn close(&mut self) {
        // Detach so the launched app keeps running after the socket closes.
        if self.client.is_some() {
            let detach = DebugserverCommand::new("D".to_string(), Vec::new());
            let _ = self.send(detach).await;
        }
        self.client = None;
    }
}

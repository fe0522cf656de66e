//! Shared test helpers for berth-core integration tests.
//!
//! In-memory stand-ins for the native tools, the device protocol stack and
//! target discovery, plus builders for bundles, packages and a fake Xcode
//! developer directory.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use berth_core::command::CommandRunner;
use berth_core::deploy::TargetSource;
use berth_core::device::mounter::{DiskImageLocator, DISK_IMAGE_NAME};
use berth_core::device::{
    AppLaunchInfo, DeviceConnector, DeviceError, DevicePipeline, DeviceSession, FileTransfer,
    Installer, ProcessControl,
};
use berth_core::error::DeployError;
use berth_core::target::Target;

// ---------------------------------------------------------------------------
// Native tools
// ---------------------------------------------------------------------------

/// A [`CommandRunner`] that records every invocation and answers from a script.
///
/// Invocations are matched by prefix against `"<program> <args...>"`. Anything
/// unscripted succeeds with empty output.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<String>>,
    failures: Vec<(String, i32, String)>,
    missing: Vec<String>,
    responses: Vec<(String, String)>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` and `stderr` for invocations starting with `prefix`.
    pub fn fail(mut self, prefix: &str, code: i32, stderr: &str) -> Self {
        self.failures.push((prefix.into(), code, stderr.into()));
        self
    }

    /// Fail to spawn invocations starting with `prefix`, as if the tool
    /// were not installed.
    pub fn missing(mut self, prefix: &str) -> Self {
        self.missing.push(prefix.into());
        self
    }

    /// Print `stdout` for invocations starting with `prefix`.
    pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
        self.responses.push((prefix.into(), stdout.into()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[&str]) -> std::io::Result<Output> {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());

        if self.missing.iter().any(|p| line.starts_with(p)) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{program}: not found"),
            ));
        }
        let failure = self.failures.iter().find(|(p, _, _)| line.starts_with(p));
        if let Some((_, code, stderr)) = failure {
            return Ok(Output {
                status: ExitStatus::from_raw(code << 8),
                stdout: Vec::new(),
                stderr: stderr.clone().into_bytes(),
            });
        }
        let stdout = self
            .responses
            .iter()
            .find(|(p, _)| line.starts_with(p))
            .map(|(_, out)| out.clone().into_bytes())
            .unwrap_or_default();
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout,
            stderr: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Device protocol stack
// ---------------------------------------------------------------------------

/// Behaviour of a [`FakeDevice`].
#[derive(Debug, Clone)]
pub struct DeviceScript {
    pub image_mounted: bool,
    pub product_version: String,
    pub staging_exists: bool,
    /// Returned by every staging lookup instead of the normal answer.
    pub stat_error: Option<DeviceError>,
    pub install_error: Option<DeviceError>,
    pub open_error: Option<DeviceError>,
    /// Launch status per attempt; `OK` once exhausted.
    pub launch_codes: VecDeque<String>,
}

impl Default for DeviceScript {
    fn default() -> Self {
        Self {
            image_mounted: true,
            product_version: "17.2.1".into(),
            staging_exists: true,
            stat_error: None,
            install_error: None,
            open_error: None,
            launch_codes: VecDeque::new(),
        }
    }
}

impl DeviceScript {
    pub fn with_launch_codes(mut self, codes: &[&str]) -> Self {
        self.launch_codes = codes.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// One call made against a [`FakeDevice`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ImageMountedCheck,
    ProductVersion,
    UploadImage,
    MountImage,
    Stat,
    MakeDir,
    UploadDir,
    Install,
    Lookup,
    SetMaxPacketSize,
    SetWorkingDir,
    Launch,
    LaunchStatus,
}

/// Everything a [`FakeDevice`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    pub events: Vec<DeviceEvent>,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub images_uploaded: usize,
    pub images_mounted: Vec<PathBuf>,
    pub stats: usize,
    pub dirs_made: Vec<String>,
    pub uploads: Vec<(PathBuf, String)>,
    pub installs: Vec<(String, String)>,
    pub channels_opened: usize,
    pub channels_closed: usize,
    pub packet_sizes: Vec<usize>,
    pub working_dirs: Vec<String>,
    pub launches: Vec<String>,
}

#[derive(Clone)]
struct Shared {
    script: Arc<Mutex<DeviceScript>>,
    log: Arc<Mutex<DeviceLog>>,
}

impl Shared {
    fn script(&self) -> std::sync::MutexGuard<'_, DeviceScript> {
        self.script.lock().unwrap()
    }

    fn record(&self, f: impl FnOnce(&mut DeviceLog)) {
        f(&mut self.log.lock().unwrap());
    }

    fn event(&self, event: DeviceEvent) {
        self.record(|log| log.events.push(event));
    }
}

/// In-memory device reachable through [`DeviceConnector`].
pub struct FakeDevice {
    shared: Shared,
}

pub const CONTAINER_PATH: &str = "/private/var/mobile/Containers/Data/Application/5B1F";
pub const EXECUTABLE_PATH: &str = "/private/var/containers/Bundle/Application/9C2E/Demo.app";
pub const EXECUTABLE_NAME: &str = "Demo";

/// Contents written for every fake executable.
pub const MACHO_MAGIC: &[u8] = b"\xcf\xfa\xed\xfe";

impl FakeDevice {
    pub fn new(script: DeviceScript) -> Arc<Self> {
        Arc::new(Self {
            shared: Shared {
                script: Arc::new(Mutex::new(script)),
                log: Arc::new(Mutex::new(DeviceLog::default())),
            },
        })
    }

    pub fn log(&self) -> DeviceLog {
        self.shared.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceConnector for FakeDevice {
    async fn open(&self, _udid: &str) -> Result<Box<dyn DeviceSession>, DeviceError> {
        if let Some(err) = self.shared.script().open_error.clone() {
            return Err(err);
        }
        self.shared.record(|log| log.sessions_opened += 1);
        Ok(Box::new(FakeSession {
            shared: self.shared.clone(),
        }))
    }
}

struct FakeSession {
    shared: Shared,
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn image_mounted(&mut self) -> Result<bool, DeviceError> {
        self.shared.event(DeviceEvent::ImageMountedCheck);
        Ok(self.shared.script().image_mounted)
    }

    async fn value(&mut self, _key: &str) -> Result<String, DeviceError> {
        self.shared.event(DeviceEvent::ProductVersion);
        Ok(self.shared.script().product_version.clone())
    }

    async fn upload_image(&mut self, _image: &Path, _signature: &[u8]) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::UploadImage);
        self.shared.record(|log| log.images_uploaded += 1);
        Ok(())
    }

    async fn mount_image(&mut self, image: &Path, _signature: &[u8]) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::MountImage);
        self.shared.script().image_mounted = true;
        let image = image.to_path_buf();
        self.shared.record(|log| log.images_mounted.push(image));
        Ok(())
    }

    async fn file_transfer(&mut self) -> Result<Box<dyn FileTransfer>, DeviceError> {
        Ok(Box::new(FakeAfc {
            shared: self.shared.clone(),
        }))
    }

    async fn installer(&mut self) -> Result<Box<dyn Installer>, DeviceError> {
        Ok(Box::new(FakeInstaller {
            shared: self.shared.clone(),
        }))
    }

    async fn process_control(&mut self) -> Result<Box<dyn ProcessControl>, DeviceError> {
        self.shared.record(|log| log.channels_opened += 1);
        Ok(Box::new(FakeChannel {
            shared: self.shared.clone(),
        }))
    }

    async fn close(&mut self) {
        self.shared.record(|log| log.sessions_closed += 1);
    }
}

struct FakeAfc {
    shared: Shared,
}

#[async_trait]
impl FileTransfer for FakeAfc {
    async fn stat(&mut self, path: &str) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::Stat);
        self.shared.record(|log| log.stats += 1);
        let script = self.shared.script();
        if let Some(err) = script.stat_error.clone() {
            return Err(err);
        }
        if script.staging_exists {
            Ok(())
        } else {
            Err(DeviceError::NotFound(path.to_string()))
        }
    }

    async fn make_dir(&mut self, path: &str) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::MakeDir);
        self.shared.script().staging_exists = true;
        self.shared.record(|log| log.dirs_made.push(path.to_string()));
        Ok(())
    }

    async fn upload_dir(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::UploadDir);
        let upload = (local.to_path_buf(), remote.to_string());
        self.shared.record(|log| log.uploads.push(upload));
        Ok(())
    }
}

struct FakeInstaller {
    shared: Shared,
}

#[async_trait]
impl Installer for FakeInstaller {
    async fn install(&mut self, staged_path: &str, bundle_id: &str) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::Install);
        if let Some(err) = self.shared.script().install_error.clone() {
            return Err(err);
        }
        let install = (staged_path.to_string(), bundle_id.to_string());
        self.shared.record(|log| log.installs.push(install));
        Ok(())
    }

    async fn lookup(&mut self, _bundle_id: &str) -> Result<AppLaunchInfo, DeviceError> {
        self.shared.event(DeviceEvent::Lookup);
        Ok(AppLaunchInfo {
            container_path: CONTAINER_PATH.into(),
            executable_path: EXECUTABLE_PATH.into(),
            executable_name: EXECUTABLE_NAME.into(),
        })
    }
}

struct FakeChannel {
    shared: Shared,
}

#[async_trait]
impl ProcessControl for FakeChannel {
    async fn set_max_packet_size(&mut self, size: usize) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::SetMaxPacketSize);
        self.shared.record(|log| log.packet_sizes.push(size));
        Ok(())
    }

    async fn set_working_dir(&mut self, dir: &str) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::SetWorkingDir);
        let dir = dir.to_string();
        self.shared.record(|log| log.working_dirs.push(dir));
        Ok(())
    }

    async fn launch(
        &mut self,
        executable_path: &str,
        executable_name: &str,
    ) -> Result<(), DeviceError> {
        self.shared.event(DeviceEvent::Launch);
        let program = format!("{executable_path}/{executable_name}");
        self.shared.record(|log| log.launches.push(program));
        Ok(())
    }

    async fn launch_status(&mut self) -> Result<String, DeviceError> {
        self.shared.event(DeviceEvent::LaunchStatus);
        let code = self.shared.script().launch_codes.pop_front();
        Ok(code.unwrap_or_else(|| "OK".into()))
    }

    async fn close(&mut self) {
        self.shared.record(|log| log.channels_closed += 1);
    }
}

/// A device pipeline over `device` whose disk images come from `developer_dir`.
pub fn device_pipeline(device: Arc<FakeDevice>, developer_dir: &Path) -> DevicePipeline {
    let runner = Arc::new(FakeRunner::new());
    let locator = DiskImageLocator::new(runner, Some(developer_dir.to_path_buf()));
    DevicePipeline::new(device, locator)
}

// ---------------------------------------------------------------------------
// Target discovery
// ---------------------------------------------------------------------------

/// A fixed [`TargetSource`] that counts how often each list is requested.
#[derive(Default)]
pub struct FakeTargets {
    pub devices: Vec<Target>,
    pub simulators: Vec<Target>,
    pub device_queries: AtomicUsize,
    pub simulator_queries: AtomicUsize,
}

impl FakeTargets {
    pub fn new(devices: Vec<Target>, simulators: Vec<Target>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            simulators,
            ..Default::default()
        })
    }

    pub fn device_queries(&self) -> usize {
        self.device_queries.load(Ordering::SeqCst)
    }

    pub fn simulator_queries(&self) -> usize {
        self.simulator_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetSource for FakeTargets {
    async fn devices(&self) -> Result<Vec<Target>, DeployError> {
        self.device_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.clone())
    }

    async fn simulators(&self) -> Result<Vec<Target>, DeployError> {
        self.simulator_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.simulators.clone())
    }
}

// ---------------------------------------------------------------------------
// Filesystem fixtures
// ---------------------------------------------------------------------------

pub fn info_plist(bundle_id: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleExecutable</key>
    <string>Demo</string>
    <key>CFBundleIdentifier</key>
    <string>{bundle_id}</string>
</dict>
</plist>
"#
    )
}

/// Create `<dir>/<name>` as a minimal app bundle.
pub fn write_app(dir: &Path, name: &str, bundle_id: &str) -> PathBuf {
    let app = dir.join(name);
    std::fs::create_dir_all(&app).unwrap();
    let plist = info_plist(bundle_id);
    std::fs::write(app.join("Info.plist"), plist).unwrap();
    std::fs::write(app.join("Demo"), MACHO_MAGIC).unwrap();
    app
}

/// Write an `.ipa` holding `Payload/<app_name>` with the given identifier.
pub fn write_ipa(path: &Path, app_name: &str, bundle_id: &str) {
    let mut zip = ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = SimpleFileOptions::default();
    zip.add_directory("Payload/", options).unwrap();
    zip.add_directory(format!("Payload/{app_name}/"), options)
        .unwrap();
    zip.start_file(format!("Payload/{app_name}/Info.plist"), options)
        .unwrap();
    zip.write_all(info_plist(bundle_id).as_bytes()).unwrap();
    zip.start_file(
        format!("Payload/{app_name}/Demo"),
        options.unix_permissions(0o755),
    )
    .unwrap();
    zip.write_all(MACHO_MAGIC).unwrap();
    zip.finish().unwrap();
}

/// A developer directory whose `DeviceSupport` holds images for `versions`.
pub fn developer_dir(versions: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let support = dir
        .path()
        .join("Platforms")
        .join("iPhoneOS.platform")
        .join("DeviceSupport");
    for version in versions {
        let version_dir = support.join(version);
        std::fs::create_dir_all(&version_dir).unwrap();
        let image = version_dir.join(DISK_IMAGE_NAME);
        std::fs::write(image, b"dmg").unwrap();
        let signature = version_dir.join(format!("{DISK_IMAGE_NAME}.signature"));
        std::fs::write(signature, b"sig").unwrap();
    }
    dir
}

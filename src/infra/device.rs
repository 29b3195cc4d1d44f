//! Serial line access for the plotter.
//!
//! The line is configured by shelling out to `stty` before every job and then
//! opened as a plain write-only file. [`PlotterPort`] is the seam the
//! controller depends on, so tests can substitute an in-memory channel.

use std::{
    io::{self, ErrorKind},
    num::NonZeroU32,
    path::PathBuf,
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{fs::OpenOptions, io::AsyncWrite, process::Command};
use tracing::{info, warn};

use crate::config::DeviceSettings;

pub type DeviceWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum DeviceSetupError {
    #[error("artifact `{artifact}` has not been rendered for this session")]
    MissingArtifact { artifact: &'static str },
    #[error("failed to stage snapshot: {0}")]
    Snapshot(#[source] io::Error),
    #[error("line configuration tool unavailable: {0}")]
    ConfigureSpawn(#[source] io::Error),
    #[error("line configuration failed (exit {exit_code:?}): {stderr}")]
    Configure {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("failed to open device: {0}")]
    Open(#[source] io::Error),
}

impl DeviceSetupError {
    /// Short status recorded on the device job when setup fails.
    pub fn status_label(&self) -> &'static str {
        match self {
            DeviceSetupError::MissingArtifact { .. } | DeviceSetupError::Snapshot(_) => {
                "copy failed"
            }
            DeviceSetupError::ConfigureSpawn(_)
            | DeviceSetupError::Configure { .. }
            | DeviceSetupError::Open(_) => "setup failed",
        }
    }
}

/// The hardware channel a plot job streams into.
#[async_trait]
pub trait PlotterPort: Send + Sync {
    /// Human-readable identifier used in logs.
    fn describe(&self) -> String;

    /// Apply line parameters. Called before every job.
    async fn configure(&self) -> Result<(), DeviceSetupError>;

    /// Open the channel for sequential writes.
    async fn open(&self) -> Result<DeviceWriter, DeviceSetupError>;
}

/// A serial device configured through `stty`.
#[derive(Debug, Clone)]
pub struct SerialLine {
    path: PathBuf,
    baud_rate: NonZeroU32,
    hardware_flow_control: bool,
    stty_path: PathBuf,
}

impl SerialLine {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            path: settings.path.clone(),
            baud_rate: settings.baud_rate,
            hardware_flow_control: settings.hardware_flow_control,
            stty_path: settings.stty_path.clone(),
        }
    }

    fn flow_control_flag(&self) -> &'static str {
        if self.hardware_flow_control {
            "crtscts"
        } else {
            "-crtscts"
        }
    }
}

#[async_trait]
impl PlotterPort for SerialLine {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn configure(&self) -> Result<(), DeviceSetupError> {
        let started_at = Instant::now();
        let output = Command::new(&self.stty_path)
            .arg("-F")
            .arg(&self.path)
            .arg(self.baud_rate.get().to_string())
            .arg(self.flow_control_flag())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = "wildplot::device",
                    op = "device::configure",
                    result = "error",
                    error_code = "spawn_stty",
                    stty = %self.stty_path.display(),
                    error = %err,
                    "Failed to spawn line configuration tool"
                );
                DeviceSetupError::ConfigureSpawn(err)
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "wildplot::device",
                op = "device::configure",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "stty",
                stdout = %String::from_utf8_lossy(&output.stdout),
                stderr = %stderr,
                "Line configuration failed"
            );
            return Err(DeviceSetupError::Configure { exit_code, stderr });
        }

        info!(
            target = "wildplot::device",
            op = "device::configure",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            device = %self.path.display(),
            baud_rate = self.baud_rate.get(),
            flow_control = self.flow_control_flag(),
            "Serial line configured"
        );
        Ok(())
    }

    async fn open(&self) -> Result<DeviceWriter, DeviceSetupError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    warn!(
                        target = "wildplot::device",
                        op = "device::open",
                        result = "error",
                        device = %self.path.display(),
                        "Serial device does not exist"
                    );
                }
                DeviceSetupError::Open(err)
            })?;
        Ok(Box::new(file))
    }
}

//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, DeviceOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "wildplot";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_WORKSPACES_ROOT: &str = "files";
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 4 * 1024 * 1024;
const DEFAULT_RENDERER_PATH: &str = "./wild_driver_bin";
const DEFAULT_DEVICE_PATH: &str = "/dev/ttyS0";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_STTY_PATH: &str = "stty";
const DEFAULT_STAGING_PATH: &str = "files/current_plot.wild";
const PORT_ENV_FALLBACK: &str = "PORT";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub workspaces: WorkspaceSettings,
    pub uploads: UploadSettings,
    pub render: RenderSettings,
    pub device: DeviceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_request_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub renderer_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub path: PathBuf,
    pub baud_rate: NonZeroU32,
    pub hardware_flow_control: bool,
    pub stty_path: PathBuf,
    pub staging_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("WILDPLOT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_port_fallback(std::env::var(PORT_ENV_FALLBACK).ok().as_deref())?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    workspaces: RawWorkspaceSettings,
    uploads: RawUploadSettings,
    render: RawRenderSettings,
    device: RawDeviceSettings,
}

impl RawSettings {
    /// Honour the conventional `PORT` variable when no explicit port is configured.
    fn apply_port_fallback(&mut self, value: Option<&str>) -> Result<(), LoadError> {
        if self.server.port.is_some() {
            return Ok(());
        }
        if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
            let port = value
                .parse::<u16>()
                .map_err(|err| LoadError::invalid("PORT", format!("failed to parse: {err}")))?;
            self.server.port = Some(port);
        }
        Ok(())
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(root) = overrides.workspaces_root.as_ref() {
            self.workspaces.root = Some(root.clone());
        }
        if let Some(limit) = overrides.uploads_max_request_bytes {
            self.uploads.max_request_bytes = Some(limit);
        }
        if let Some(path) = overrides.renderer_path.as_ref() {
            self.render.renderer_path = Some(path.clone());
        }

        self.apply_device_overrides(&overrides.device);
    }

    fn apply_device_overrides(&mut self, overrides: &DeviceOverrides) {
        if let Some(path) = overrides.device_path.as_ref() {
            self.device.path = Some(path.clone());
        }
        if let Some(baud) = overrides.baud_rate {
            self.device.baud_rate = Some(baud);
        }
        if let Some(flow) = overrides.hardware_flow_control {
            self.device.hardware_flow_control = Some(flow);
        }
        if let Some(path) = overrides.stty_path.as_ref() {
            self.device.stty_path = Some(path.clone());
        }
        if let Some(path) = overrides.staging_path.as_ref() {
            self.device.staging_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            workspaces,
            uploads,
            render,
            device,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            workspaces: build_workspace_settings(workspaces)?,
            uploads: build_upload_settings(uploads)?,
            render: build_render_settings(render)?,
            device: build_device_settings(device)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_workspace_settings(
    workspaces: RawWorkspaceSettings,
) -> Result<WorkspaceSettings, LoadError> {
    let root = non_empty_path(
        workspaces.root,
        DEFAULT_WORKSPACES_ROOT,
        "workspaces.root",
    )?;
    Ok(WorkspaceSettings { root })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UploadSettings { max_request_bytes })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let renderer_path = non_empty_path(
        render.renderer_path,
        DEFAULT_RENDERER_PATH,
        "render.renderer_path",
    )?;
    Ok(RenderSettings { renderer_path })
}

fn build_device_settings(device: RawDeviceSettings) -> Result<DeviceSettings, LoadError> {
    let path = non_empty_path(device.path, DEFAULT_DEVICE_PATH, "device.path")?;
    let stty_path = non_empty_path(device.stty_path, DEFAULT_STTY_PATH, "device.stty_path")?;
    let staging_path = non_empty_path(
        device.staging_path,
        DEFAULT_STAGING_PATH,
        "device.staging_path",
    )?;
    if staging_path == path {
        return Err(LoadError::invalid(
            "device.staging_path",
            "must differ from device.path",
        ));
    }

    let baud_rate = NonZeroU32::new(device.baud_rate.unwrap_or(DEFAULT_BAUD_RATE))
        .ok_or_else(|| LoadError::invalid("device.baud_rate", "must be greater than zero"))?;

    Ok(DeviceSettings {
        path,
        baud_rate,
        hardware_flow_control: device.hardware_flow_control.unwrap_or(true),
        stty_path,
        staging_path,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkspaceSettings {
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    renderer_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDeviceSettings {
    path: Option<PathBuf>,
    baud_rate: Option<u32>,
    hardware_flow_control: Option<bool>,
    stty_path: Option<PathBuf>,
    staging_path: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

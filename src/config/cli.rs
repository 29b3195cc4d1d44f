use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the wildplot binary.
#[derive(Debug, Parser)]
#[command(name = "wildplot", version, about = "Pen plotter session server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "WILDPLOT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP gateway and the plotter controller.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DeviceOverrides {
    /// Override the serial device path.
    #[arg(long = "device-path", value_name = "PATH")]
    pub device_path: Option<PathBuf>,

    /// Override the serial line baud rate.
    #[arg(long = "device-baud-rate", value_name = "BAUD")]
    pub baud_rate: Option<u32>,

    /// Toggle RTS/CTS hardware flow control.
    #[arg(
        long = "device-hardware-flow-control",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub hardware_flow_control: Option<bool>,

    /// Override the `stty` executable used to configure the line.
    #[arg(long = "device-stty-path", value_name = "PATH")]
    pub stty_path: Option<PathBuf>,

    /// Override where the streamed snapshot is staged.
    #[arg(long = "device-staging-path", value_name = "PATH")]
    pub staging_path: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub device: DeviceOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the directory holding session workspaces.
    #[arg(long = "workspaces-root", value_name = "PATH")]
    pub workspaces_root: Option<PathBuf>,

    /// Override the maximum upload request size in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Override the renderer executable path.
    #[arg(long = "renderer-path", value_name = "PATH")]
    pub renderer_path: Option<PathBuf>,
}

#![allow(dead_code)]

use std::{
    fs,
    num::NonZeroU32,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use tempfile::TempDir;
use wildplot::{
    application::{pipeline::RenderPipeline, plotter::PlotterController},
    config::DeviceSettings,
    infra::{
        device::SerialLine,
        http::{GatewayState, build_router},
        workspace::WorkspaceStore,
    },
};

/// Scratch deployment: workspace root, fake renderer, fake `stty`, and a
/// regular file standing in for the serial device.
pub struct Deployment {
    pub dir: TempDir,
    pub device: PathBuf,
    pub renderer: PathBuf,
    pub state: GatewayState,
}

impl Deployment {
    pub fn new(fail_stage: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let renderer = write_script(&dir.path().join("fake-renderer"), &renderer_script(fail_stage));
        let stty = write_script(&dir.path().join("fake-stty"), "#!/bin/sh\nexit 0\n");
        let device = dir.path().join("ttyFAKE");
        fs::write(&device, b"").expect("device file");

        let workspaces =
            Arc::new(WorkspaceStore::new(dir.path().join("files")).expect("workspace store"));
        let settings = DeviceSettings {
            path: device.clone(),
            baud_rate: NonZeroU32::new(9600).expect("non-zero"),
            hardware_flow_control: true,
            stty_path: stty,
            staging_path: dir.path().join("files").join("current_plot.wild"),
        };
        let plotter = PlotterController::new(
            Arc::new(SerialLine::new(&settings)),
            Arc::clone(&workspaces),
            settings.staging_path.clone(),
        );
        let state = GatewayState {
            workspaces,
            pipeline: Arc::new(RenderPipeline::new(renderer.clone())),
            plotter,
            upload_limit_bytes: 64 * 1024,
        };

        Self {
            dir,
            device,
            renderer,
            state,
        }
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    pub fn workspace_dir(&self, session: &str) -> PathBuf {
        self.dir.path().join("files").join(session)
    }
}

/// Renderer stand-in that writes `<mode>:<input size>` to `--output` and a
/// matching preview, failing with exit 3 in the stage named `fail_stage`.
fn renderer_script(fail_stage: &str) -> String {
    format!(
        r#"#!/bin/sh
out=""
vis=""
input=""
mode="draw"
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output) shift; out="$1" ;;
    --vis) shift; vis="$1" ;;
    --input) shift; input="$1" ;;
    --box) mode="box" ;;
    --dry_run) mode="dry_run" ;;
  esac
  shift
done
if [ "$mode" = "{fail_stage}" ]; then
  echo "renderer rejected $mode" >&2
  exit 3
fi
printf 'PU;%s;PD;' "$mode" > "$out"
echo "<svg><!-- $mode --></svg>" > "$vis"
echo "{{\"mode\":\"$mode\"}}"
"#
    )
}

pub fn write_script(path: &Path, body: &str) -> PathBuf {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
    path.to_path_buf()
}

pub const BOUNDARY: &str = "wildplot-test-boundary";

pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/svg+xml\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

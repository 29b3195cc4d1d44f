use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use metrics::{counter, histogram};
use tokio::{fs, process::Command};
use tracing::{debug, info, warn};

use crate::{
    domain::params::RenderParams,
    infra::{
        telemetry::{RENDER_FAILURES_TOTAL, RENDER_STAGE_MS},
        workspace::Workspace,
    },
};

use super::{
    command::RenderCommand,
    stage::{RenderError, RenderOutcome, RenderStage, StageFailure},
};

/// Runs the renderer executable once per stage against a session workspace.
#[derive(Debug, Clone)]
pub struct RenderPipeline {
    renderer: PathBuf,
}

impl RenderPipeline {
    pub fn new(renderer: PathBuf) -> Self {
        Self { renderer }
    }

    /// Produce `box.wild`, `dry_run.wild` and `draw.wild`, in that order.
    ///
    /// The first failing stage aborts the run. Artifacts of that stage and of
    /// every later one keep whatever content they had before the call.
    pub async fn render(
        &self,
        workspace: &Workspace,
        params: &RenderParams,
    ) -> Result<RenderOutcome, RenderError> {
        let started_at = Instant::now();
        let command = RenderCommand::new(workspace, params);

        let mut stdout = String::new();
        for stage in RenderStage::ALL {
            match self.run_stage(&command, stage).await {
                Ok(output) => stdout = output,
                Err(failure) => {
                    counter!(RENDER_FAILURES_TOTAL, "stage" => stage.as_str()).increment(1);
                    warn!(
                        target = "wildplot::render",
                        op = "render::run",
                        result = "error",
                        session = %workspace.session(),
                        stage = stage.index(),
                        elapsed_ms = started_at.elapsed().as_millis() as u64,
                        error = %failure,
                        "Render aborted"
                    );
                    return Err(RenderError::StageFailed { stage, failure });
                }
            }
        }

        info!(
            target = "wildplot::render",
            op = "render::run",
            result = "ok",
            session = %workspace.session(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            stdout_bytes = stdout.len(),
            "Render completed"
        );
        Ok(RenderOutcome { stdout })
    }

    async fn run_stage(
        &self,
        command: &RenderCommand,
        stage: RenderStage,
    ) -> Result<String, StageFailure> {
        let started_at = Instant::now();
        let workspace = command.workspace();
        let staged_output = command.staged_output(stage);
        let staged_preview = command.staged_preview();
        discard(&[&staged_output, &staged_preview]).await;

        info!(
            target = "wildplot::render",
            op = "render::stage",
            stage = stage.index(),
            command = %command.display_line(&self.renderer, stage),
            "Invoking renderer"
        );

        let output = match Command::new(&self.renderer)
            .args(command.stage_args(stage))
            .current_dir(workspace.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                record_stage(stage, "spawn_error", started_at);
                warn!(
                    target = "wildplot::render",
                    op = "render::stage",
                    result = "error",
                    error_code = "spawn",
                    stage = stage.index(),
                    renderer = %self.renderer.display(),
                    error = %err,
                    "Failed to spawn renderer"
                );
                return Err(StageFailure::Spawn(err));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            discard(&[&staged_output, &staged_preview]).await;
            record_stage(stage, "error", started_at);
            let exit_code = output.status.code();
            warn!(
                target = "wildplot::render",
                op = "render::stage",
                result = "error",
                stage = stage.index(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stdout = %stdout,
                stderr = %stderr,
                "Renderer exited unsuccessfully"
            );
            return Err(StageFailure::Exit {
                exit_code,
                stdout,
                stderr,
            });
        }

        let artifact = stage.artifact();
        if let Err(source) = fs::rename(&staged_output, workspace.artifact_path(artifact)).await {
            discard(&[&staged_output, &staged_preview]).await;
            record_stage(stage, "error", started_at);
            return Err(StageFailure::Promote {
                file: artifact.file_name(),
                source,
            });
        }

        if stage.publishes_preview() {
            match fs::rename(&staged_preview, workspace.preview_path()).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(
                        target = "wildplot::render",
                        op = "render::stage",
                        stage = stage.index(),
                        "Renderer produced no preview"
                    );
                }
                Err(err) => {
                    warn!(
                        target = "wildplot::render",
                        op = "render::stage",
                        stage = stage.index(),
                        error = %err,
                        "Failed to publish preview"
                    );
                }
            }
        } else {
            discard(&[&staged_preview]).await;
        }

        record_stage(stage, "ok", started_at);
        info!(
            target = "wildplot::render",
            op = "render::stage",
            result = "ok",
            stage = stage.index(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Render stage completed"
        );
        Ok(stdout)
    }
}

fn record_stage(stage: RenderStage, result: &'static str, started_at: Instant) {
    histogram!(RENDER_STAGE_MS, "stage" => stage.as_str(), "result" => result)
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
}

async fn discard(paths: &[&Path]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path).await
            && err.kind() != ErrorKind::NotFound
        {
            debug!(
                target = "wildplot::render",
                op = "render::discard",
                path = %path.display(),
                error = %err,
                "Failed to remove staged file"
            );
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::infra::workspace::WorkspaceStore;
    use bytes::Bytes;
    use std::{fs as stdfs, os::unix::fs::PermissionsExt};
    use tempfile::TempDir;

    /// Fake renderer: writes `<mode>-<tag>` into `--output` and a matching
    /// preview into `--vis`, failing with exit 3 when the mode equals `fail`.
    fn write_renderer(dir: &Path, tag: &str, fail: &str) -> PathBuf {
        let path = dir.join("fake-renderer");
        let log = dir.join("renderer.log");
        let script = format!(
            r#"#!/bin/sh
echo "$@" >> "{log}"
out=""
vis=""
mode="draw"
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output) shift; out="$1" ;;
    --vis) shift; vis="$1" ;;
    --box) mode="box" ;;
    --dry_run) mode="dry_run" ;;
  esac
  shift
done
if [ "$mode" = "{fail}" ]; then
  echo "cannot trace paths" >&2
  exit 3
fi
echo "$mode-{tag}" > "$out"
echo "<svg>$mode-{tag}</svg>" > "$vis"
echo "{{\"mode\":\"$mode\"}}"
"#,
            log = log.display(),
        );
        stdfs::write(&path, script).expect("write renderer");
        let mut perms = stdfs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        stdfs::set_permissions(&path, perms).expect("chmod");
        path
    }

    async fn workspace(dir: &TempDir) -> Workspace {
        let store = WorkspaceStore::new(dir.path().join("files")).expect("store");
        let ws = store.ensure("session1").await.expect("workspace");
        ws.store_source(Bytes::from_static(b"<svg/>"))
            .await
            .expect("source");
        ws
    }

    fn read(path: PathBuf) -> Option<String> {
        stdfs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    fn staged_leftovers(ws: &Workspace) -> Vec<String> {
        stdfs::read_dir(ws.dir())
            .expect("list")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".partial."))
            .collect()
    }

    #[tokio::test]
    async fn successful_render_writes_every_artifact() {
        let dir = TempDir::new().expect("temp dir");
        let ws = workspace(&dir).await;
        let pipeline = RenderPipeline::new(write_renderer(dir.path(), "v1", "none"));

        let outcome = pipeline
            .render(&ws, &RenderParams::with_scale(2.0))
            .await
            .expect("render");

        assert_eq!(outcome.stdout.trim(), r#"{"mode":"draw"}"#);
        assert_eq!(read(ws.dir().join("box.wild")).as_deref(), Some("box-v1"));
        assert_eq!(
            read(ws.dir().join("dry_run.wild")).as_deref(),
            Some("dry_run-v1")
        );
        assert_eq!(read(ws.dir().join("draw.wild")).as_deref(), Some("draw-v1"));
        assert_eq!(
            read(ws.preview_path()).as_deref(),
            Some("<svg>draw-v1</svg>")
        );
        assert!(staged_leftovers(&ws).is_empty());

        let log = stdfs::read_to_string(dir.path().join("renderer.log")).expect("log");
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("--box"));
        assert!(lines[1].ends_with("--dry_run"));
        assert!(lines[2].contains("--scale 2 --output"));
    }

    #[tokio::test]
    async fn failing_stage_leaves_later_artifacts_untouched() {
        let dir = TempDir::new().expect("temp dir");
        let ws = workspace(&dir).await;

        RenderPipeline::new(write_renderer(dir.path(), "v1", "none"))
            .render(&ws, &RenderParams::with_scale(1.0))
            .await
            .expect("first render");

        let pipeline = RenderPipeline::new(write_renderer(dir.path(), "v2", "dry_run"));
        let err = pipeline
            .render(&ws, &RenderParams::with_scale(1.0))
            .await
            .expect_err("second stage fails");

        match err {
            RenderError::StageFailed {
                stage,
                failure: StageFailure::Exit {
                    exit_code, stderr, ..
                },
            } => {
                assert_eq!(stage, RenderStage::DryRun);
                assert_eq!(stage.index(), 2);
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("cannot trace paths"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(read(ws.dir().join("box.wild")).as_deref(), Some("box-v2"));
        assert_eq!(
            read(ws.dir().join("dry_run.wild")).as_deref(),
            Some("dry_run-v1")
        );
        assert_eq!(read(ws.dir().join("draw.wild")).as_deref(), Some("draw-v1"));
        assert_eq!(
            read(ws.preview_path()).as_deref(),
            Some("<svg>draw-v1</svg>")
        );
        assert!(staged_leftovers(&ws).is_empty());
    }

    #[tokio::test]
    async fn first_stage_failure_produces_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let ws = workspace(&dir).await;
        let pipeline = RenderPipeline::new(write_renderer(dir.path(), "v1", "box"));

        let err = pipeline
            .render(&ws, &RenderParams::with_scale(1.0))
            .await
            .expect_err("first stage fails");
        assert!(matches!(
            err,
            RenderError::StageFailed {
                stage: RenderStage::Box,
                ..
            }
        ));
        for kind in crate::domain::types::ArtifactKind::ALL {
            assert!(!ws.artifact_path(kind).exists(), "{kind:?} exists");
        }
        assert!(!ws.preview_path().exists());
    }

    #[tokio::test]
    async fn missing_renderer_is_a_spawn_failure() {
        let dir = TempDir::new().expect("temp dir");
        let ws = workspace(&dir).await;
        let pipeline = RenderPipeline::new(dir.path().join("no-such-renderer"));

        let err = pipeline
            .render(&ws, &RenderParams::with_scale(1.0))
            .await
            .expect_err("spawn failure");
        assert!(matches!(
            err,
            RenderError::StageFailed {
                stage: RenderStage::Box,
                failure: StageFailure::Spawn(_),
            }
        ));
    }

    #[tokio::test]
    async fn box_stage_preview_is_not_published() {
        let dir = TempDir::new().expect("temp dir");
        let ws = workspace(&dir).await;
        let pipeline = RenderPipeline::new(write_renderer(dir.path(), "v1", "dry_run"));

        pipeline
            .render(&ws, &RenderParams::with_scale(1.0))
            .await
            .expect_err("second stage fails");

        assert!(ws.artifact_path(crate::domain::types::ArtifactKind::Box).exists());
        assert!(!ws.preview_path().exists());
    }
}

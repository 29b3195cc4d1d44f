use std::{
    io::{self, ErrorKind},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use futures::future::BoxFuture;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{fs, sync::watch};
use tracing::{info, warn};

use crate::{
    domain::{
        session::SessionId,
        types::{ArtifactKind, DeviceState},
    },
    infra::{
        device::{DeviceSetupError, DeviceWriter, PlotterPort},
        telemetry::{PLOTTER_BYTES_TOTAL, PLOTTER_JOBS_TOTAL},
        workspace::WorkspaceStore,
    },
    util::{lock::mutex_lock, progress::format_progress},
};

use super::transfer::{Control, Phase, TransferEnd, TransferOutcome, TransferScope, TransferSink};

const LOCK_TARGET: &str = "wildplot::plotter";
const STATUS_PREPARING: &str = "preparing...";
const STATUS_PRINTING: &str = "printing...";
const STATUS_PAUSED: &str = "paused";

/// Measures the staged snapshot so progress has a total to report against.
pub(super) type SizeProbe = fn(PathBuf) -> BoxFuture<'static, io::Result<u64>>;

fn snapshot_len(path: PathBuf) -> BoxFuture<'static, io::Result<u64>> {
    Box::pin(async move { fs::metadata(path).await.map(|meta| meta.len()) })
}

#[derive(Debug, Error)]
pub enum PlotterError {
    #[error("the plotter is already running a job")]
    Busy,
    #[error("no plot job is running")]
    NotRunning,
    #[error("the plot job is already paused")]
    AlreadyPaused,
    #[error("the plot job is not paused")]
    NotPaused,
    #[error(transparent)]
    Setup(#[from] DeviceSetupError),
}

/// Point-in-time view of the device job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotterStatus {
    pub busy: bool,
    pub state: DeviceState,
    pub last_output: String,
    /// Session that started the most recent job. Kept after the job ends.
    pub author: Option<String>,
    pub size_cur: u64,
    pub size_total: u64,
    pub paused: bool,
    /// Terminal state of the most recent job that reached streaming.
    pub outcome: Option<DeviceState>,
    pub target: Option<ArtifactKind>,
    pub started_at: Option<String>,
}

struct ActiveJob {
    control: watch::Sender<Control>,
    phase: watch::Receiver<Phase>,
}

struct JobState {
    state: DeviceState,
    last_output: String,
    author: Option<SessionId>,
    target: Option<ArtifactKind>,
    size_total: u64,
    started_at: Option<OffsetDateTime>,
    outcome: Option<DeviceState>,
    active: Option<ActiveJob>,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            state: DeviceState::Idle,
            last_output: String::new(),
            author: None,
            target: None,
            size_total: 1,
            started_at: None,
            outcome: None,
            active: None,
        }
    }
}

struct Shared {
    job: Mutex<JobState>,
    streamed: Arc<AtomicU64>,
}

impl Shared {
    fn lock(&self, op: &'static str) -> std::sync::MutexGuard<'_, JobState> {
        mutex_lock(&self.job, LOCK_TARGET, op)
    }
}

impl TransferSink for Shared {
    fn release(&self, outcome: Option<&TransferOutcome>, streamed: u64) {
        let (terminal, label, metric) = match outcome {
            Some(Ok(TransferEnd::Completed)) => (DeviceState::Completed, "success", "completed"),
            Some(Ok(TransferEnd::Stopped)) => (DeviceState::Stopped, "stopped", "stopped"),
            Some(Err(err)) => (DeviceState::Failed, err.status_label(), "failed"),
            None => (DeviceState::Failed, "transfer aborted", "aborted"),
        };
        counter!(PLOTTER_JOBS_TOTAL, "outcome" => metric).increment(1);
        counter!(PLOTTER_BYTES_TOTAL).increment(streamed);

        let mut job = self.lock("plotter::release");
        job.outcome = Some(terminal);
        job.last_output = label.to_string();
        job.active = None;
        job.state = DeviceState::Idle;
    }
}

/// Resets a job stuck in `Preparing` when setup fails or the caller goes away.
struct Preparation<'a> {
    shared: &'a Shared,
    label: &'static str,
    armed: bool,
}

impl Preparation<'_> {
    fn fail(&mut self, err: &DeviceSetupError) {
        self.label = err.status_label();
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Preparation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut job = self.shared.lock("plotter::prepare");
        if job.state == DeviceState::Preparing {
            counter!(PLOTTER_JOBS_TOTAL, "outcome" => "setup_failed").increment(1);
            job.state = DeviceState::Idle;
            job.last_output = self.label.to_string();
        }
    }
}

/// The only owner of the plotter device.
#[derive(Clone)]
pub struct PlotterController {
    shared: Arc<Shared>,
    port: Arc<dyn PlotterPort>,
    workspaces: Arc<WorkspaceStore>,
    staging_path: PathBuf,
    size_probe: SizeProbe,
}

impl PlotterController {
    pub fn new(
        port: Arc<dyn PlotterPort>,
        workspaces: Arc<WorkspaceStore>,
        staging_path: PathBuf,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                job: Mutex::new(JobState::default()),
                streamed: Arc::new(AtomicU64::new(0)),
            }),
            port,
            workspaces,
            staging_path,
            size_probe: snapshot_len,
        }
    }

    #[cfg(test)]
    pub(super) fn with_size_probe(mut self, probe: SizeProbe) -> Self {
        self.size_probe = probe;
        self
    }

    /// Stream `target` from `session`'s workspace to the device.
    ///
    /// Returns once the transfer task is running; progress is observed
    /// through [`PlotterController::status`].
    pub async fn start(
        &self,
        session: &SessionId,
        target: ArtifactKind,
    ) -> Result<(), PlotterError> {
        let started_at = Instant::now();
        {
            let mut job = self.shared.lock("plotter::start");
            if job.state != DeviceState::Idle {
                return Err(PlotterError::Busy);
            }
            job.state = DeviceState::Preparing;
            job.last_output = STATUS_PREPARING.to_string();
            job.author = Some(session.clone());
            job.target = Some(target);
            job.size_total = 1;
            job.started_at = Some(OffsetDateTime::now_utc());
            job.active = None;
            self.shared.streamed.store(0, Ordering::Release);
        }

        let mut preparation = Preparation {
            shared: &self.shared,
            label: "setup failed",
            armed: true,
        };

        let (reader, writer) = match self.prepare(session, target).await {
            Ok(ends) => ends,
            Err(err) => {
                warn!(
                    target = "wildplot::plotter",
                    op = "plotter::start",
                    result = "error",
                    session = %session,
                    artifact = target.as_str(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "Plot job setup failed"
                );
                preparation.fail(&err);
                return Err(err.into());
            }
        };

        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (phase_tx, phase_rx) = watch::channel(Phase::Running);
        let scope = TransferScope::new(
            Box::new(reader),
            writer,
            control_rx,
            phase_tx,
            Arc::clone(&self.shared.streamed),
            self.shared.clone(),
            self.port.describe(),
        );

        {
            let mut job = self.shared.lock("plotter::start");
            job.state = DeviceState::Streaming;
            job.last_output = STATUS_PRINTING.to_string();
            job.active = Some(ActiveJob {
                control: control_tx,
                phase: phase_rx,
            });
        }
        preparation.disarm();
        tokio::spawn(scope.run());

        info!(
            target = "wildplot::plotter",
            op = "plotter::start",
            result = "ok",
            session = %session,
            artifact = target.as_str(),
            device = %self.port.describe(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Plot job streaming"
        );
        Ok(())
    }

    async fn prepare(
        &self,
        session: &SessionId,
        target: ArtifactKind,
    ) -> Result<(fs::File, DeviceWriter), DeviceSetupError> {
        let workspace = self.workspaces.locate(session);
        let artifact = workspace.artifact_path(target);
        match fs::metadata(&artifact).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(DeviceSetupError::MissingArtifact {
                    artifact: target.file_name(),
                });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DeviceSetupError::MissingArtifact {
                    artifact: target.file_name(),
                });
            }
            Err(err) => return Err(DeviceSetupError::Snapshot(err)),
        }

        if let Some(parent) = self.staging_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(DeviceSetupError::Snapshot)?;
        }
        fs::copy(&artifact, &self.staging_path)
            .await
            .map_err(DeviceSetupError::Snapshot)?;

        match (self.size_probe)(self.staging_path.clone()).await {
            Ok(size) => {
                self.shared.lock("plotter::prepare").size_total = size;
                info!(
                    target = "wildplot::plotter",
                    op = "plotter::prepare",
                    session = %session,
                    artifact = target.as_str(),
                    size_bytes = size,
                    "Snapshot staged"
                );
            }
            Err(err) => {
                warn!(
                    target = "wildplot::plotter",
                    op = "plotter::prepare",
                    result = "size_unknown",
                    staging = %self.staging_path.display(),
                    error = %err,
                    "Could not determine snapshot size; progress total stays at 1"
                );
            }
        }

        self.port.configure().await?;

        let reader = fs::File::open(&self.staging_path)
            .await
            .map_err(DeviceSetupError::Snapshot)?;
        let writer = self.port.open().await?;
        Ok((reader, writer))
    }

    /// Never blocks on the transfer.
    pub fn status(&self) -> PlotterStatus {
        let job = self.shared.lock("plotter::status");
        PlotterStatus {
            busy: job.state.is_busy(),
            state: job.state,
            last_output: job.last_output.clone(),
            author: job.author.as_ref().map(|session| session.as_str().to_string()),
            size_cur: self.shared.streamed.load(Ordering::Acquire),
            size_total: job.size_total,
            paused: job.state == DeviceState::Paused,
            outcome: job.outcome,
            target: job.target,
            started_at: job
                .started_at
                .and_then(|instant| instant.format(&Rfc3339).ok()),
        }
    }

    /// Suspend forwarding at the next byte boundary.
    ///
    /// Returns once the transfer task has acknowledged, so the streamed count
    /// no longer moves. A `resume` or `stop` issued before the acknowledgement
    /// supersedes the request and also ends the wait.
    pub async fn pause(&self) -> Result<(), PlotterError> {
        let (mut phase, mut control, total) = {
            let mut job = self.shared.lock("plotter::pause");
            match job.state {
                DeviceState::Streaming => {}
                DeviceState::Paused => return Err(PlotterError::AlreadyPaused),
                _ => return Err(PlotterError::NotRunning),
            }
            let Some(active) = job.active.as_ref() else {
                return Err(PlotterError::NotRunning);
            };
            active.control.send_replace(Control::Pause);
            let phase = active.phase.clone();
            let control = active.control.subscribe();
            job.state = DeviceState::Paused;
            job.last_output = STATUS_PAUSED.to_string();
            (phase, control, job.size_total)
        };

        let acknowledged = async {
            let _ = phase.wait_for(|phase| *phase != Phase::Running).await;
        };
        let superseded = async {
            let _ = control.wait_for(|control| *control != Control::Pause).await;
        };
        let result = tokio::select! {
            () = acknowledged => "ok",
            () = superseded => "superseded",
        };
        info!(
            target = "wildplot::plotter",
            op = "plotter::pause",
            result,
            progress = %format_progress(self.shared.streamed.load(Ordering::Acquire), total),
            "Plot job paused"
        );
        Ok(())
    }

    pub fn resume(&self) -> Result<(), PlotterError> {
        let mut job = self.shared.lock("plotter::resume");
        match job.state {
            DeviceState::Paused => {}
            DeviceState::Streaming => return Err(PlotterError::NotPaused),
            _ => return Err(PlotterError::NotRunning),
        }
        let Some(active) = job.active.as_ref() else {
            return Err(PlotterError::NotRunning);
        };
        active.control.send_replace(Control::Run);
        job.state = DeviceState::Streaming;
        job.last_output = STATUS_PRINTING.to_string();
        info!(
            target = "wildplot::plotter",
            op = "plotter::resume",
            result = "ok",
            "Plot job resumed"
        );
        Ok(())
    }

    /// Stop the job and wait until the device is released.
    pub async fn stop(&self) -> Result<(), PlotterError> {
        let (mut phase, total) = {
            let job = self.shared.lock("plotter::stop");
            if !matches!(job.state, DeviceState::Streaming | DeviceState::Paused) {
                return Err(PlotterError::NotRunning);
            }
            let Some(active) = job.active.as_ref() else {
                return Err(PlotterError::NotRunning);
            };
            active.control.send_replace(Control::Stop);
            (active.phase.clone(), job.size_total)
        };

        let _ = phase.wait_for(|phase| *phase == Phase::Finished).await;
        info!(
            target = "wildplot::plotter",
            op = "plotter::stop",
            result = "ok",
            progress = %format_progress(self.shared.streamed.load(Ordering::Acquire), total),
            "Plot job stopped"
        );
        Ok(())
    }
}

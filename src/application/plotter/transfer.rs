use std::{
    io::{self, ErrorKind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    sync::watch,
};
use tracing::{info, warn};

use crate::infra::device::DeviceWriter;

pub(super) type SnapshotReader = Box<dyn AsyncRead + Send + Unpin>;

/// Instruction sent from the controller to the transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Control {
    Run,
    Pause,
    Stop,
}

/// What the transfer task is currently doing, as acknowledged to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Running,
    Suspended,
    Finished,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to read snapshot: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write to device: {0}")]
    Write(#[source] io::Error),
}

impl TransferError {
    pub fn status_label(&self) -> &'static str {
        match self {
            TransferError::Read(_) => "read failed",
            TransferError::Write(_) => "write failed",
        }
    }
}

/// How a transfer ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TransferEnd {
    Completed,
    Stopped,
}

pub(super) type TransferOutcome = Result<TransferEnd, TransferError>;

/// Receives the final outcome once both ends of the transfer are closed.
pub(super) trait TransferSink: Send + Sync + 'static {
    fn release(&self, outcome: Option<&TransferOutcome>, streamed: u64);
}

/// Owns both ends of a running transfer.
///
/// Dropping the scope closes the snapshot and the device, releases the job
/// and only then publishes [`Phase::Finished`]. This runs on every exit path,
/// including a panic inside the task.
pub(super) struct TransferScope {
    reader: Option<BufReader<SnapshotReader>>,
    writer: Option<DeviceWriter>,
    control: watch::Receiver<Control>,
    phase: watch::Sender<Phase>,
    streamed: Arc<AtomicU64>,
    sink: Arc<dyn TransferSink>,
    outcome: Option<TransferOutcome>,
    device: String,
    started_at: Instant,
}

impl TransferScope {
    pub(super) fn new(
        reader: SnapshotReader,
        writer: DeviceWriter,
        control: watch::Receiver<Control>,
        phase: watch::Sender<Phase>,
        streamed: Arc<AtomicU64>,
        sink: Arc<dyn TransferSink>,
        device: String,
    ) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            writer: Some(writer),
            control,
            phase,
            streamed,
            sink,
            outcome: None,
            device,
            started_at: Instant::now(),
        }
    }

    pub(super) async fn run(mut self) {
        let outcome = self.pump().await;
        self.outcome = Some(outcome);
    }

    async fn pump(&mut self) -> TransferOutcome {
        let Self {
            reader,
            writer,
            control,
            phase,
            streamed,
            ..
        } = self;
        let (Some(reader), Some(writer)) = (reader.as_mut(), writer.as_mut()) else {
            return Ok(TransferEnd::Stopped);
        };

        // A byte read from the snapshot but not yet accepted by the device.
        let mut pending: Option<u8> = None;

        loop {
            let current = *control.borrow_and_update();
            match current {
                Control::Run => {}
                Control::Stop => return Ok(TransferEnd::Stopped),
                Control::Pause => {
                    if !hold(control, phase).await {
                        return Ok(TransferEnd::Stopped);
                    }
                    continue;
                }
            }

            let byte = match pending.take() {
                Some(byte) => byte,
                None => match reader.read_u8().await {
                    Ok(byte) => byte,
                    Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                        return finish(writer, control, phase).await;
                    }
                    Err(err) => return Err(TransferError::Read(err)),
                },
            };

            let buf = [byte];
            tokio::select! {
                biased;
                changed = control.changed() => {
                    pending = Some(byte);
                    if changed.is_err() {
                        return Ok(TransferEnd::Stopped);
                    }
                }
                written = writer.write_all(&buf) => {
                    written.map_err(TransferError::Write)?;
                    streamed.fetch_add(1, Ordering::AcqRel);
                }
            }
        }
    }
}

/// Park the transfer until the controller resumes or stops it.
///
/// Returns `false` when the transfer must stop.
async fn hold(control: &mut watch::Receiver<Control>, phase: &watch::Sender<Phase>) -> bool {
    phase.send_replace(Phase::Suspended);
    loop {
        if control.changed().await.is_err() {
            return false;
        }
        match *control.borrow_and_update() {
            Control::Pause => continue,
            Control::Stop => return false,
            Control::Run => {
                phase.send_replace(Phase::Running);
                return true;
            }
        }
    }
}

/// Flush the device once the snapshot is exhausted, still honouring control.
async fn finish(
    writer: &mut DeviceWriter,
    control: &mut watch::Receiver<Control>,
    phase: &watch::Sender<Phase>,
) -> TransferOutcome {
    let flush = writer.flush();
    tokio::pin!(flush);
    loop {
        tokio::select! {
            biased;
            changed = control.changed() => {
                if changed.is_err() {
                    return Ok(TransferEnd::Stopped);
                }
                let current = *control.borrow_and_update();
                match current {
                    Control::Run => {}
                    Control::Stop => return Ok(TransferEnd::Stopped),
                    Control::Pause => {
                        if !hold(control, phase).await {
                            return Ok(TransferEnd::Stopped);
                        }
                    }
                }
            }
            flushed = &mut flush => {
                flushed.map_err(TransferError::Write)?;
                return Ok(TransferEnd::Completed);
            }
        }
    }
}

impl Drop for TransferScope {
    fn drop(&mut self) {
        self.reader.take();
        self.writer.take();

        let streamed = self.streamed.load(Ordering::Acquire);
        let elapsed_ms = self.started_at.elapsed().as_millis() as u64;
        match &self.outcome {
            Some(Ok(end)) => info!(
                target = "wildplot::plotter",
                op = "plotter::transfer",
                result = if *end == TransferEnd::Completed { "completed" } else { "stopped" },
                device = %self.device,
                streamed,
                elapsed_ms,
                "Plot job ended"
            ),
            Some(Err(err)) => warn!(
                target = "wildplot::plotter",
                op = "plotter::transfer",
                result = "error",
                device = %self.device,
                streamed,
                elapsed_ms,
                error = %err,
                "Plot job failed"
            ),
            None => warn!(
                target = "wildplot::plotter",
                op = "plotter::transfer",
                result = "aborted",
                device = %self.device,
                streamed,
                elapsed_ms,
                "Plot job aborted before reporting an outcome"
            ),
        }

        self.sink.release(self.outcome.as_ref(), streamed);
        self.phase.send_replace(Phase::Finished);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        sync::Mutex,
        task::{Context, Poll},
    };

    use tokio::io::{ReadBuf, duplex};

    use super::*;

    /// A snapshot whose backing storage disappears mid-read.
    struct VanishingSnapshot;

    impl AsyncRead for VanishingSnapshot {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("snapshot vanished")))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        released: Mutex<Vec<(Option<String>, u64)>>,
    }

    impl TransferSink for RecordingSink {
        fn release(&self, outcome: Option<&TransferOutcome>, streamed: u64) {
            let label = outcome.map(|outcome| match outcome {
                Ok(end) => format!("{end:?}"),
                Err(err) => err.status_label().to_string(),
            });
            self.released
                .lock()
                .expect("sink")
                .push((label, streamed));
        }
    }

    fn transfer(
        reader: SnapshotReader,
        writer: DeviceWriter,
        sink: Arc<RecordingSink>,
    ) -> (
        TransferScope,
        watch::Sender<Control>,
        watch::Receiver<Phase>,
    ) {
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (phase_tx, phase_rx) = watch::channel(Phase::Running);
        let scope = TransferScope::new(
            reader,
            writer,
            control_rx,
            phase_tx,
            Arc::new(AtomicU64::new(0)),
            sink,
            "fake".to_string(),
        );
        (scope, control_tx, phase_rx)
    }

    #[tokio::test]
    async fn read_error_fails_after_delivered_bytes() {
        let (writer, mut device) = duplex(64);
        let reader = Box::new(AsyncReadExt::chain(&b"PU;"[..], VanishingSnapshot));
        let sink = Arc::new(RecordingSink::default());
        let (scope, _control, phase) = transfer(reader, Box::new(writer), sink.clone());

        scope.run().await;

        let mut received = Vec::new();
        device
            .read_to_end(&mut received)
            .await
            .expect("device closed by teardown");
        assert_eq!(received, b"PU;");
        assert_eq!(
            *sink.released.lock().expect("sink"),
            vec![(Some("read failed".to_string()), 3)]
        );
        assert_eq!(*phase.borrow(), Phase::Finished);
    }

    #[tokio::test]
    async fn exhausted_snapshot_completes() {
        let (writer, mut device) = duplex(64);
        let sink = Arc::new(RecordingSink::default());
        let (scope, _control, phase) =
            transfer(Box::new(&b"PU;PD;"[..]), Box::new(writer), sink.clone());

        scope.run().await;

        let mut received = Vec::new();
        device.read_to_end(&mut received).await.expect("drain");
        assert_eq!(received, b"PU;PD;");
        assert_eq!(
            *sink.released.lock().expect("sink"),
            vec![(Some("Completed".to_string()), 6)]
        );
        assert_eq!(*phase.borrow(), Phase::Finished);
    }
}

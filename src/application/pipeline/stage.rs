use std::{fmt, io};

use thiserror::Error;

use crate::domain::types::ArtifactKind;

/// One invocation of the external renderer.
///
/// Stages always run in [`RenderStage::ALL`] order and each one writes a
/// single instruction artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStage {
    Box,
    DryRun,
    Draw,
}

impl RenderStage {
    pub const ALL: [RenderStage; 3] = [RenderStage::Box, RenderStage::DryRun, RenderStage::Draw];

    /// 1-based position in the pipeline.
    pub fn index(self) -> u8 {
        match self {
            RenderStage::Box => 1,
            RenderStage::DryRun => 2,
            RenderStage::Draw => 3,
        }
    }

    pub fn artifact(self) -> ArtifactKind {
        match self {
            RenderStage::Box => ArtifactKind::Box,
            RenderStage::DryRun => ArtifactKind::DryRun,
            RenderStage::Draw => ArtifactKind::Draw,
        }
    }

    /// Extra renderer flag selecting this stage's mode. The full drawing has none.
    pub fn mode_flag(self) -> Option<&'static str> {
        match self {
            RenderStage::Box => Some("--box"),
            RenderStage::DryRun => Some("--dry_run"),
            RenderStage::Draw => None,
        }
    }

    /// Whether the preview written during this stage replaces `vis.svg`.
    ///
    /// The boundary pass draws only the outline, so its preview is discarded.
    pub fn publishes_preview(self) -> bool {
        !matches!(self, RenderStage::Box)
    }

    pub fn as_str(self) -> &'static str {
        self.artifact().as_str()
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.index(), self.as_str())
    }
}

/// Why a single stage did not produce its artifact.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("renderer could not be started: {0}")]
    Spawn(#[source] io::Error),
    #[error("renderer exited unsuccessfully (exit {exit_code:?}): {stderr}")]
    Exit {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("renderer reported success but `{file}` could not be promoted: {source}")]
    Promote {
        file: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Output of a fully successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    /// Standard output of the final stage; the renderer's JSON summary.
    pub stdout: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render stage {stage} failed")]
    StageFailed {
        stage: RenderStage,
        #[source]
        failure: StageFailure,
    },
}

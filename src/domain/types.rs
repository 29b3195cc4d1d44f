//! Shared domain enumerations for workspace artifacts and device state.

use serde::{Deserialize, Serialize};

/// Instruction files a render produces and the plotter can stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Box,
    DryRun,
    Draw,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Box,
        ArtifactKind::DryRun,
        ArtifactKind::Draw,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Box => "box",
            ArtifactKind::DryRun => "dry_run",
            ArtifactKind::Draw => "draw",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Box => "box.wild",
            ArtifactKind::DryRun => "dry_run.wild",
            ArtifactKind::Draw => "draw.wild",
        }
    }
}

impl TryFrom<&str> for ArtifactKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "box" => Ok(ArtifactKind::Box),
            "dry_run" => Ok(ArtifactKind::DryRun),
            "draw" => Ok(ArtifactKind::Draw),
            _ => Err(()),
        }
    }
}

/// Lifecycle of the single device job.
///
/// `Completed`, `Failed` and `Stopped` are terminal and are released back to
/// `Idle` by the transfer teardown; they are visible only as the last recorded
/// outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Idle,
    Preparing,
    Streaming,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl DeviceState {
    /// A job exists in every state except `Idle`.
    pub fn is_busy(self) -> bool {
        !matches!(self, DeviceState::Idle)
    }
}

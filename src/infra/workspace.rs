//! Per-session workspace directories.
//!
//! Every session owns `<root>/<session id>/`, holding the uploaded drawing,
//! the rendered preview, and the instruction artifacts. Directories are
//! created lazily and never removed here.

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut, stream};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::domain::{session::SessionId, types::ArtifactKind};

pub const SOURCE_FILE: &str = "image.svg";
pub const PREVIEW_FILE: &str = "vis.svg";
const PARTIAL_PREFIX: &str = ".partial.";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid session identifier `{value}`")]
    InvalidIdentifier { value: String },
    #[error("workspace storage failed: {0}")]
    Storage(#[from] std::io::Error),
    #[error("`{file}` does not exist in this workspace")]
    NotFound { file: &'static str },
    #[error("uploaded drawing is empty")]
    EmptyPayload,
    #[error("uploaded drawing stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// Metadata for a stored source drawing.
#[derive(Debug, Clone)]
pub struct StoredDrawing {
    pub size_bytes: u64,
    pub checksum: String,
}

/// Filesystem-backed store mapping session ids to workspace directories.
#[derive(Debug)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Initialise the store rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the workspace for `id`, creating its directory on first use.
    ///
    /// The identifier is re-validated here even when the caller already did,
    /// since it becomes a path component.
    pub async fn ensure(&self, id: &str) -> Result<Workspace, WorkspaceError> {
        let session = SessionId::parse(id).map_err(|_| WorkspaceError::InvalidIdentifier {
            value: id.to_string(),
        })?;
        let workspace = self.locate(&session);
        fs::create_dir_all(workspace.dir()).await?;
        debug!(
            target = "wildplot::workspace",
            op = "workspace::ensure",
            session = %session,
            dir = %workspace.dir().display(),
            "Workspace ready"
        );
        Ok(workspace)
    }

    /// Derive the workspace location without touching the filesystem.
    pub fn locate(&self, session: &SessionId) -> Workspace {
        Workspace {
            session: session.clone(),
            dir: self.root.join(session.as_str()),
        }
    }
}

/// A resolved session workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    session: SessionId,
    dir: PathBuf,
}

impl Workspace {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.join(SOURCE_FILE)
    }

    pub fn preview_path(&self) -> PathBuf {
        self.dir.join(PREVIEW_FILE)
    }

    pub fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Staging location for a file that is only promoted once complete.
    ///
    /// The original extension is kept so tools that infer formats from it
    /// behave the same for staged and final paths.
    pub fn partial_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(format!("{PARTIAL_PREFIX}{file_name}"))
    }

    /// Stream an uploaded drawing into `image.svg`.
    ///
    /// The payload lands in a temporary file first and replaces the previous
    /// drawing only after it has been fully written.
    pub async fn store_source_stream<S, E>(
        &self,
        payload: S,
    ) -> Result<StoredDrawing, WorkspaceError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let staged = tempfile::Builder::new()
            .prefix(".partial.image-")
            .suffix(".svg")
            .tempfile_in(&self.dir)?;
        let (file, staged_path) = staged.into_parts();
        let mut file = fs::File::from_std(file);

        let mut hasher = Sha256::new();
        let mut total_bytes: u64 = 0;

        pin_mut!(payload);
        while let Some(chunk) = payload.next().await {
            let chunk =
                chunk.map_err(|err| WorkspaceError::PayloadStream { source: err.into() })?;
            if chunk.is_empty() {
                continue;
            }
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
        }

        if total_bytes == 0 {
            return Err(WorkspaceError::EmptyPayload);
        }

        file.flush().await?;
        drop(file);
        staged_path
            .persist(self.source_path())
            .map_err(|err| WorkspaceError::Storage(err.error))?;

        Ok(StoredDrawing {
            size_bytes: total_bytes,
            checksum: hex::encode(hasher.finalize()),
        })
    }

    /// Store a fully-buffered drawing.
    pub async fn store_source(&self, data: Bytes) -> Result<StoredDrawing, WorkspaceError> {
        let payload = stream::once(async move { Ok::<_, std::io::Error>(data) });
        self.store_source_stream(payload).await
    }

    pub async fn read_source(&self) -> Result<Bytes, WorkspaceError> {
        read_file(self.source_path(), SOURCE_FILE).await
    }

    pub async fn read_preview(&self) -> Result<Bytes, WorkspaceError> {
        read_file(self.preview_path(), PREVIEW_FILE).await
    }
}

async fn read_file(path: PathBuf, file: &'static str) -> Result<Bytes, WorkspaceError> {
    match fs::read(&path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(WorkspaceError::NotFound { file }),
        Err(err) => Err(WorkspaceError::Storage(err)),
    }
}

//! Best-effort storage of the camera-rig transform as a JSON file.
//!
//! Writes are queued to a single writer task, so two saves never touch the
//! file at the same time; the most recently queued value wins.

use log::{debug, error};
use shared::{Transform, TransformCandidate, TransformError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("transform file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("transform file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("transform file holds an invalid value: {0}")]
    Invalid(#[from] TransformError),
    #[error("transform writer has stopped")]
    WriterClosed,
}

enum WriteRequest {
    Save(Transform),
    Flush(oneshot::Sender<()>),
}

/// Handle to the transform file and its writer task.
#[derive(Clone)]
pub struct PersistenceStore {
    path: PathBuf,
    writer: mpsc::UnboundedSender<WriteRequest>,
}

impl PersistenceStore {
    /// Spawns the writer task. Must be called inside a Tokio runtime.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (writer, requests) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path.clone(), requests));
        Self { path, writer }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted transform. `Ok(None)` means no file exists yet.
    pub async fn load(&self) -> Result<Option<Transform>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let candidate: TransformCandidate = serde_json::from_slice(&bytes)?;
        Ok(Some(Transform::try_from(candidate)?))
    }

    /// Queues a write of `transform` and returns immediately.
    pub fn save(&self, transform: Transform) {
        if self.writer.send(WriteRequest::Save(transform)).is_err() {
            error!("Transform writer stopped; save to {} dropped", self.path.display());
        }
    }

    /// Waits until every previously queued write has finished.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.writer
            .send(WriteRequest::Flush(done_tx))
            .map_err(|_| PersistenceError::WriterClosed)?;
        done_rx.await.map_err(|_| PersistenceError::WriterClosed)
    }
}

async fn run_writer(path: PathBuf, mut requests: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(request) = requests.recv().await {
        match request {
            WriteRequest::Save(transform) => match write_transform(&path, &transform).await {
                Ok(()) => debug!("Saved transform to {}", path.display()),
                Err(e) => error!("Failed to save transform to {}: {}", path.display(), e),
            },
            WriteRequest::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn write_transform(path: &Path, transform: &Transform) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec(transform)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

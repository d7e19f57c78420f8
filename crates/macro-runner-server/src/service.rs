//! Request-level orchestration: upload staging, session admission, and handing
//! each run to a blocking thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use excel_macro_runner::{CellValue, Launcher, MacroError, MacroRunner};
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::JoinError;
use uuid::Uuid;

use crate::config::ServerConfig;

/// Something that can run a macro against a file on disk and return the
/// result cell. Implemented by [`MacroRunner`]; tests substitute their own.
///
/// Called from a blocking thread, and the whole session must stay on it.
pub trait MacroExecutor: Send + Sync + 'static {
    fn run(&self, path: &Path, macro_name: &str) -> Result<CellValue, MacroError>;
}

impl<L: Launcher + 'static> MacroExecutor for MacroRunner<L> {
    fn run(&self, path: &Path, macro_name: &str) -> Result<CellValue, MacroError> {
        MacroRunner::run(self, path, macro_name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Macro(#[from] MacroError),

    #[error("upload storage failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("macro worker failed: {0}")]
    Worker(#[from] JoinError),

    #[error("session limiter closed")]
    Limiter(#[from] AcquireError),
}

pub struct MacroService {
    executor: Arc<dyn MacroExecutor>,
    work_dir: PathBuf,
    keep_uploads: bool,
    sessions: Option<Arc<Semaphore>>,
}

impl MacroService {
    pub fn new(executor: Arc<dyn MacroExecutor>, config: &ServerConfig) -> Self {
        Self {
            executor,
            work_dir: config.work_dir.clone(),
            keep_uploads: config.keep_uploads,
            sessions: config
                .max_sessions
                .map(|n| Arc::new(Semaphore::new(n.get()))),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run a macro against a file already on this host. The file is modified
    /// in place.
    pub async fn run_by_path(
        &self,
        path: PathBuf,
        macro_name: String,
    ) -> Result<CellValue, ServiceError> {
        self.execute(path, macro_name, Ok).await
    }

    /// Stage the uploaded workbook in the work directory, run the macro on it,
    /// and return the processed file's bytes. The result cell is not returned.
    pub async fn run_by_upload(
        &self,
        contents: Bytes,
        macro_name: String,
    ) -> Result<Vec<u8>, ServiceError> {
        let upload = StagedUpload::write(&self.work_dir, &contents, self.keep_uploads).await?;
        let path = upload.path().to_path_buf();

        // Owned by the blocking task: removed after the session, not on cancel
        self.execute(path, macro_name, move |value| {
            tracing::debug!(%value, path = %upload.path().display(), "upload processed");
            Ok(std::fs::read(upload.path())?)
        })
        .await
    }

    /// Run one session on a blocking thread, then `finish` on that same thread.
    ///
    /// The session permit and anything `finish` owns are released when the
    /// blocking task ends, not when the calling future does.
    async fn execute<T, F>(
        &self,
        path: PathBuf,
        macro_name: String,
        finish: F,
    ) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(CellValue) -> Result<T, ServiceError> + Send + 'static,
    {
        let permit = match &self.sessions {
            Some(sessions) => Some(sessions.clone().acquire_owned().await?),
            None => None,
        };

        let executor = self.executor.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let value = executor.run(&path, &macro_name)?;
            finish(value)
        })
        .await?
    }
}

/// An uploaded workbook in the work directory, removed on drop unless kept.
struct StagedUpload {
    path: PathBuf,
    keep: bool,
}

impl StagedUpload {
    async fn write(work_dir: &Path, contents: &[u8], keep: bool) -> std::io::Result<Self> {
        let path = work_dir.join(format!("temp_{}.xlsm", Uuid::new_v4().simple()));
        // Owned before the write so a partial file is cleaned up too
        let upload = Self { path, keep };
        tokio::fs::write(&upload.path, contents).await?;
        Ok(upload)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed staged upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "could not remove staged upload"
            ),
        }
    }
}

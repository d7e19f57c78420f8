//! Run one macro against one workbook and read back its result cell.

use std::path::{Path, PathBuf};

use excel_com_protocol::{CellValue, ErrorKind};

use crate::bridge::{BridgeError, ExcelBridge, ExcelBridgeConfig};
use crate::path::normalize_path;
use crate::workbook::Workbook;

/// Where macros are expected to leave their result: first sheet (0-based), `C2`.
pub const RESULT_SHEET: u32 = 0;
pub const RESULT_CELL: &str = "C2";

/// Why a macro run failed. The variant survives up to the HTTP layer; the
/// message is the underlying failure's own text.
#[derive(Debug, thiserror::Error)]
pub enum MacroError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("{0}")]
    LaunchFailed(String),

    #[error("{0}")]
    MacroNotFound(String),

    #[error("{0}")]
    MacroFailed(String),

    #[error("{0}")]
    SaveFailed(String),

    #[error("{0}")]
    Automation(String),
}

impl MacroError {
    fn launch(err: BridgeError) -> Self {
        MacroError::LaunchFailed(err.to_string())
    }
}

impl From<BridgeError> for MacroError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Remote { kind, message } => match kind {
                ErrorKind::MacroNotFound => MacroError::MacroNotFound(message),
                ErrorKind::MacroFailed => MacroError::MacroFailed(message),
                ErrorKind::Save => MacroError::SaveFailed(message),
                ErrorKind::Open | ErrorKind::Automation => MacroError::Automation(message),
            },
            other => MacroError::Automation(other.to_string()),
        }
    }
}

/// What the runner needs from a live automation session.
pub trait MacroHost {
    fn open_workbook(&mut self, path: &Path) -> Result<Workbook, BridgeError>;
    fn run_macro(&mut self, qualified_name: &str) -> Result<(), BridgeError>;
    fn cell_value(
        &mut self,
        workbook: &Workbook,
        sheet: u32,
        cell: &str,
    ) -> Result<CellValue, BridgeError>;
    fn save_as(&mut self, workbook: &Workbook, path: &Path) -> Result<(), BridgeError>;
    fn close(&mut self, workbook: Workbook, save_changes: bool) -> Result<(), BridgeError>;
    /// Quit the application and release the automation subsystem. Must be
    /// safe to call more than once.
    fn shutdown(&mut self) -> Result<(), BridgeError>;
}

/// Starts a fresh [`MacroHost`] per run.
pub trait Launcher: Send + Sync {
    type Host: MacroHost;

    fn launch(&self) -> Result<Self::Host, BridgeError>;
}

impl MacroHost for ExcelBridge {
    fn open_workbook(&mut self, path: &Path) -> Result<Workbook, BridgeError> {
        ExcelBridge::open_workbook(self, path)
    }

    fn run_macro(&mut self, qualified_name: &str) -> Result<(), BridgeError> {
        ExcelBridge::run_macro(self, qualified_name)
    }

    fn cell_value(
        &mut self,
        workbook: &Workbook,
        sheet: u32,
        cell: &str,
    ) -> Result<CellValue, BridgeError> {
        self.get_cell_value(workbook, sheet, cell)
    }

    fn save_as(&mut self, workbook: &Workbook, path: &Path) -> Result<(), BridgeError> {
        self.save_workbook(workbook, path)
    }

    fn close(&mut self, workbook: Workbook, save_changes: bool) -> Result<(), BridgeError> {
        self.close_workbook(workbook, save_changes)
    }

    fn shutdown(&mut self) -> Result<(), BridgeError> {
        self.terminate()
    }
}

impl Launcher for ExcelBridgeConfig {
    type Host = ExcelBridge;

    fn launch(&self) -> Result<ExcelBridge, BridgeError> {
        ExcelBridge::start(self)
    }
}

/// Owns a host for the length of one run and shuts it down when dropped,
/// whether the run returned normally, bailed out with `?`, or panicked.
struct Session<H: MacroHost> {
    host: H,
}

impl<H: MacroHost> Drop for Session<H> {
    fn drop(&mut self) {
        match self.host.shutdown() {
            Ok(()) => tracing::debug!("automation session closed"),
            Err(e) => tracing::warn!(error = %e, "automation session shutdown failed"),
        }
    }
}

/// Runs macros, one fresh automation session per call.
///
/// `run` blocks for the whole session and keeps every automation call on the
/// calling thread; async callers should use `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct MacroRunner<L> {
    launcher: L,
}

impl<L: Launcher> MacroRunner<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }

    /// Open `path`, run `macro_name`, read the result cell, save over the
    /// original file, and close. The session is torn down on every path out.
    pub fn run(&self, path: &Path, macro_name: &str) -> Result<CellValue, MacroError> {
        let path = normalize_path(path).map_err(|e| MacroError::Automation(e.to_string()))?;
        tracing::info!(path = %path.display(), macro_name, "running macro");

        let host = self.launcher.launch().map_err(MacroError::launch)?;
        let mut session = Session { host };

        let result = run_in_session(&mut session.host, &path, macro_name);
        match &result {
            Ok(value) => tracing::info!(%value, "macro finished"),
            Err(e) => tracing::warn!(error = %e, "macro run failed"),
        }
        result
    }
}

fn run_in_session<H: MacroHost>(
    host: &mut H,
    path: &Path,
    macro_name: &str,
) -> Result<CellValue, MacroError> {
    if !path.exists() {
        return Err(MacroError::FileNotFound(path.to_path_buf()));
    }

    let workbook = host.open_workbook(path)?;
    host.run_macro(&workbook.qualified_macro(macro_name))?;

    let value = host.cell_value(&workbook, RESULT_SHEET, RESULT_CELL)?;

    host.save_as(&workbook, path)?;
    host.close(workbook, true)?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_kinds_map_to_macro_errors() {
        let remote = |kind| BridgeError::Remote {
            kind,
            message: "text".into(),
        };
        assert!(matches!(
            MacroError::from(remote(ErrorKind::MacroNotFound)),
            MacroError::MacroNotFound(_)
        ));
        assert!(matches!(
            MacroError::from(remote(ErrorKind::MacroFailed)),
            MacroError::MacroFailed(_)
        ));
        assert!(matches!(
            MacroError::from(remote(ErrorKind::Save)),
            MacroError::SaveFailed(_)
        ));
        assert!(matches!(
            MacroError::from(remote(ErrorKind::Open)),
            MacroError::Automation(_)
        ));
        assert!(matches!(
            MacroError::from(BridgeError::NotRunning),
            MacroError::Automation(_)
        ));
    }

    #[test]
    fn messages_keep_underlying_text() {
        let err = MacroError::from(BridgeError::Remote {
            kind: ErrorKind::MacroNotFound,
            message: "Cannot run the macro 'Nope'".into(),
        });
        assert_eq!(err.to_string(), "Cannot run the macro 'Nope'");

        let err = MacroError::FileNotFound(PathBuf::from("/srv/missing.xlsm"));
        assert_eq!(err.to_string(), "File not found: /srv/missing.xlsm");
    }
}

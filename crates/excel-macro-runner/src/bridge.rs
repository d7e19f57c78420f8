//! Subprocess management and JSON IPC for the WINE bridge process.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use excel_com_protocol::{
    CellValue, Command as BridgeCommand, ErrorKind, Request, Response, ResponseData,
    ResponseResult,
};
use serde::{Deserialize, Serialize};

use crate::path::linux_to_wine_path;
use crate::workbook::Workbook;

/// Errors from the Excel COM bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn WINE bridge process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Bridge process not running")]
    NotRunning,

    #[error("Failed to send command to bridge: {0}")]
    SendFailed(String),

    #[error("Failed to read response from bridge: {0}")]
    ReadFailed(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Excel (or COM) rejected the command.
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("Unexpected response data")]
    UnexpectedResponse,

    #[error("Response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: u64 },

    #[error("Bridge state lock poisoned")]
    Poisoned,

    #[error("WINE not found. Install WINE and ensure 'wine' is in PATH.")]
    WineNotFound,

    #[error("Bridge executable not found at: {0}")]
    BridgeExeNotFound(String),
}

/// Configuration for launching the Excel COM bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcelBridgeConfig {
    /// Path to the `excel-com-bridge.exe` Windows executable.
    /// If None, will search in common locations relative to the current binary.
    pub bridge_exe_path: Option<PathBuf>,

    /// Path to the WINE executable. Defaults to "wine".
    pub wine_path: PathBuf,

    /// Optional WINEPREFIX to use (the prefix Excel is installed in).
    pub wine_prefix: Option<PathBuf>,
}

impl Default for ExcelBridgeConfig {
    fn default() -> Self {
        Self {
            bridge_exe_path: None,
            wine_path: PathBuf::from("wine"),
            wine_prefix: None,
        }
    }
}

/// One running bridge process, and with it one COM apartment and one
/// `Excel.Application`.
///
/// Dropping the bridge shuts it down: Excel is asked to quit and the process
/// is reaped, or killed if it does not acknowledge.
pub struct ExcelBridge {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
    terminated: AtomicBool,
}

impl ExcelBridge {
    /// Start the bridge process and launch Excel inside it.
    pub fn start(config: &ExcelBridgeConfig) -> Result<Self, BridgeError> {
        let exe_path = config
            .bridge_exe_path
            .clone()
            .unwrap_or_else(find_bridge_exe);

        if !exe_path.exists() {
            return Err(BridgeError::BridgeExeNotFound(
                exe_path.display().to_string(),
            ));
        }

        let mut cmd = std::process::Command::new(&config.wine_path);

        if let Some(prefix) = &config.wine_prefix {
            cmd.env("WINEPREFIX", prefix);
        }

        cmd.arg(&exe_path);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit()); // Bridge diagnostics go to our stderr

        tracing::debug!(
            wine = %config.wine_path.display(),
            exe = %exe_path.display(),
            "spawning Excel COM bridge"
        );
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BridgeError::WineNotFound
            } else {
                BridgeError::SpawnFailed(e)
            }
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BridgeError::NotRunning);
            }
        };

        let bridge = Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
            terminated: AtomicBool::new(false),
        };

        // Initialize COM and Excel. On failure `bridge` is dropped here,
        // which reaps the process.
        bridge.send_command(BridgeCommand::Init)?;
        tracing::debug!("Excel COM bridge ready");

        Ok(bridge)
    }

    /// Send a command to the bridge and wait for the response.
    fn send_command(&self, command: BridgeCommand) -> Result<Option<ResponseData>, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let request = Request { id, command };
        let json = serde_json::to_string(&request)?;

        {
            let mut stdin = lock(&self.stdin)?;
            writeln!(stdin, "{json}").map_err(|e| BridgeError::SendFailed(e.to_string()))?;
            stdin
                .flush()
                .map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        }

        let response: Response = {
            let mut stdout = lock(&self.stdout)?;
            let mut line = String::new();
            stdout
                .read_line(&mut line)
                .map_err(|e| BridgeError::ReadFailed(e.to_string()))?;

            if line.is_empty() {
                return Err(BridgeError::NotRunning);
            }

            serde_json::from_str(&line)?
        };

        response_for(response, id)
    }

    /// Open an existing workbook. Accepts a Linux path; it is converted to the
    /// WINE form before being handed to Excel.
    pub fn open_workbook(&self, path: &Path) -> Result<Workbook, BridgeError> {
        let data = self.send_command(BridgeCommand::OpenWorkbook {
            path: linux_to_wine_path(path),
        })?;
        match data {
            Some(ResponseData::WorkbookOpened { workbook, name }) => {
                Ok(Workbook::new(workbook, name))
            }
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    /// Run a macro via `Application.Run`. Blocks until the macro returns.
    pub fn run_macro(&self, qualified_name: &str) -> Result<(), BridgeError> {
        self.send_command(BridgeCommand::RunMacro {
            name: qualified_name.to_string(),
        })?;
        Ok(())
    }

    pub fn get_cell_value(
        &self,
        workbook: &Workbook,
        sheet: u32,
        cell: &str,
    ) -> Result<CellValue, BridgeError> {
        let data = self.send_command(BridgeCommand::GetCellValue {
            workbook: workbook.handle(),
            sheet,
            cell: cell.to_string(),
        })?;
        match data {
            Some(ResponseData::Value { value }) => Ok(value),
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    /// `SaveAs` to a Linux path; format follows the extension.
    pub fn save_workbook(&self, workbook: &Workbook, path: &Path) -> Result<(), BridgeError> {
        self.send_command(BridgeCommand::SaveWorkbook {
            workbook: workbook.handle(),
            path: linux_to_wine_path(path),
        })?;
        Ok(())
    }

    pub fn close_workbook(
        &self,
        workbook: Workbook,
        save_changes: bool,
    ) -> Result<(), BridgeError> {
        self.send_command(BridgeCommand::CloseWorkbook {
            workbook: workbook.handle(),
            save_changes,
        })?;
        Ok(())
    }

    /// Quit Excel, uninitialize COM, and wait for the process to exit.
    pub fn shutdown(self) -> Result<(), BridgeError> {
        self.terminate()
    }

    /// Idempotent; only the first call does anything.
    pub(crate) fn terminate(&self) -> Result<(), BridgeError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let ack = self.send_command(BridgeCommand::Shutdown);

        let mut child = lock(&self.child)?;
        if let Err(e) = &ack {
            tracing::warn!(error = %e, "bridge did not acknowledge shutdown, killing it");
            let _ = child.kill();
        }
        let status = child.wait()?;
        tracing::debug!(%status, "Excel COM bridge exited");

        ack.map(|_| ())
    }
}

impl Drop for ExcelBridge {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::warn!(error = %e, "Excel COM bridge teardown reported an error");
        }
    }
}

/// Unwrap the reply to request `id`. A reply to any other request, error
/// replies included, means the stream is out of step.
fn response_for(response: Response, id: u64) -> Result<Option<ResponseData>, BridgeError> {
    if response.id != id {
        return Err(BridgeError::IdMismatch {
            expected: id,
            got: response.id,
        });
    }
    match response.result {
        ResponseResult::Error { message, kind } => Err(BridgeError::Remote { kind, message }),
        ResponseResult::Ok { data } => Ok(data),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, BridgeError> {
    mutex.lock().map_err(|_| BridgeError::Poisoned)
}

/// Attempt to locate the bridge exe relative to the current executable or in common paths.
fn find_bridge_exe() -> PathBuf {
    if let Ok(mut exe) = std::env::current_exe() {
        exe.pop();
        let candidate = exe.join("excel-com-bridge.exe");
        if candidate.exists() {
            return candidate;
        }
    }

    // Development builds
    for profile in ["release", "debug"] {
        let candidate = PathBuf::from(format!(
            "target/x86_64-pc-windows-gnu/{profile}/excel-com-bridge.exe"
        ));
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from("excel-com-bridge.exe")
}

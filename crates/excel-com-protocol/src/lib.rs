//! Shared protocol types for communication between the native Linux client
//! and the Windows COM bridge process running under WINE.
//!
//! The protocol is JSON-over-stdio: one JSON object per line in each direction.

use serde::{Deserialize, Serialize};

/// A command sent from the Linux client to the WINE bridge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Monotonically increasing request ID for correlating responses.
    pub id: u64,
    /// The command to execute.
    #[serde(flatten)]
    pub command: Command,
}

/// Commands the client can send to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum Command {
    /// Initialize COM and create a hidden, alert-suppressed Excel.Application instance.
    Init,

    /// Open an existing workbook from a file path (Windows path).
    /// Returns a workbook handle and the workbook's `Name`.
    OpenWorkbook { path: String },

    /// Run a macro through `Application.Run`. The name should already be
    /// qualified with the workbook, e.g. `'Book1.xlsm'!Main`.
    RunMacro { name: String },

    /// Get a cell's computed value.
    GetCellValue {
        workbook: u64,
        /// 0-based worksheet index.
        sheet: u32,
        cell: String,
    },

    /// Save the workbook to a file path (Windows path).
    /// Format is inferred from extension (.xlsm, .xlsx, .xlsb, .xls, .csv).
    SaveWorkbook { workbook: u64, path: String },

    /// Close a workbook, optionally committing pending changes.
    CloseWorkbook { workbook: u64, save_changes: bool },

    /// Shut down the bridge: close all workbooks, quit Excel, uninitialize COM.
    Shutdown,
}

/// A cell value read back from Excel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Error(CellError),
}

/// Excel error values, e.g. `#DIV/0!`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellError {
    pub code: String,
}

impl CellError {
    /// Decode the `SCODE` of a `VT_ERROR` cell value. Excel reports its errors
    /// as `0x800A0000 | xlErr*`; a bare `xlErr*` number is accepted too.
    pub fn from_scode(scode: i32) -> Self {
        let raw = scode as u32;
        let xl_err = if raw >> 16 == 0x800A { raw & 0xFFFF } else { raw };
        let code = match xl_err {
            2000 => "#NULL!",
            2007 => "#DIV/0!",
            2015 => "#VALUE!",
            2023 => "#REF!",
            2029 => "#NAME?",
            2036 => "#NUM!",
            2042 => "#N/A",
            2043 => "#GETTING_DATA",
            2045 => "#SPILL!",
            2046 => "#CONNECT!",
            2047 => "#BLOCKED!",
            2048 => "#UNKNOWN!",
            2049 => "#FIELD!",
            2050 => "#CALC!",
            _ => return Self { code: format!("#ERR({scode})") },
        };
        Self {
            code: code.to_string(),
        }
    }
}

/// A response sent from the WINE bridge back to the Linux client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The request ID this response corresponds to.
    pub id: u64,
    /// The result of the command.
    #[serde(flatten)]
    pub result: ResponseResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResponseResult {
    #[serde(rename = "ok")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        kind: ErrorKind,
    },
}

/// Which stage of the automation a failure came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// `Workbooks.Open` rejected the file.
    Open,
    /// `Application.Run` could not resolve the macro.
    MacroNotFound,
    /// The macro ran and raised inside Excel.
    MacroFailed,
    /// `SaveAs` or `Close` failed.
    Save,
    /// Anything else: COM init, Excel creation, cell access, bad requests.
    #[default]
    Automation,
}

/// Data returned in successful responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Handle and `Name` of a newly opened workbook.
    WorkbookOpened { workbook: u64, name: String },
    /// A cell value.
    Value { value: CellValue },
}

impl ResponseResult {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ResponseResult::Error {
            message: message.into(),
            kind,
        }
    }
}

impl ErrorKind {
    /// Classify a failed `Application.Run`. Excel reports an unresolvable macro
    /// with error 1004 "Cannot run the macro '...'"; anything else came from
    /// the macro body itself.
    pub fn for_run_failure(message: &str) -> Self {
        if message.contains("Cannot run the macro") {
            ErrorKind::MacroNotFound
        } else {
            ErrorKind::MacroFailed
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "<empty>"),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::String(s) => write!(f, "{s}"),
            CellValue::Error(e) => write!(f, "{}", e.code),
        }
    }
}

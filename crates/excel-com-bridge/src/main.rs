//! Excel COM Bridge: a Windows process that runs workbook macros in Excel via
//! COM, controlled by JSON commands over stdin/stdout.
//!
//! Designed to be cross-compiled from Linux and run under WINE. One bridge
//! process owns exactly one COM apartment and one Excel.Application for its
//! whole life; every COM call happens on the main thread.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! - Reads `Request` objects from stdin
//! - Writes `Response` objects to stdout
//! - Diagnostic/log messages go to stderr (never stdout)

#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod excel;

#[cfg(not(windows))]
fn main() {
    eprintln!("excel-com-bridge must be compiled for Windows (--target x86_64-pc-windows-gnu)");
    eprintln!("and run under WINE on Linux.");
    std::process::exit(1);
}

#[cfg(windows)]
fn main() {
    use std::io::{self, BufRead};

    use excel_com_protocol::*;

    eprintln!("[excel-com-bridge] Starting up...");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut state = BridgeState::default();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("[excel-com-bridge] stdin read error: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (response, shutdown) = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                let result = state.handle(&request.command);
                let shutdown = matches!(request.command, Command::Shutdown)
                    && matches!(result, ResponseResult::Ok { .. });
                (
                    Response {
                        id: request.id,
                        result,
                    },
                    shutdown,
                )
            }
            Err(e) => {
                eprintln!("[excel-com-bridge] JSON parse error: {e}; line was: {line}");
                // id=0: the request could not be parsed far enough to correlate
                let result =
                    ResponseResult::error(ErrorKind::Automation, format!("JSON parse error: {e}"));
                (Response { id: 0, result }, false)
            }
        };

        if let Err(e) = write_response(&mut out, &response) {
            eprintln!("[excel-com-bridge] stdout write error: {e}");
            break;
        }

        if shutdown {
            eprintln!("[excel-com-bridge] Shutdown complete, exiting.");
            break;
        }
    }

    // stdin closed (client died or dropped us) or Shutdown already ran;
    // either way nothing may outlive this process.
    state.teardown();
    eprintln!("[excel-com-bridge] Process exiting.");
}

#[cfg(windows)]
fn write_response(
    out: &mut impl std::io::Write,
    response: &excel_com_protocol::Response,
) -> std::io::Result<()> {
    let json = serde_json::to_string(response)?;
    writeln!(out, "{json}")?;
    out.flush()
}

/// COM apartment and Excel instance owned by this process.
#[cfg(windows)]
#[derive(Default)]
struct BridgeState {
    com_initialized: bool,
    excel: Option<excel::ExcelApp>,
}

#[cfg(windows)]
impl BridgeState {
    fn handle(
        &mut self,
        command: &excel_com_protocol::Command,
    ) -> excel_com_protocol::ResponseResult {
        use excel_com_protocol::{Command, ErrorKind, ResponseData, ResponseResult};

        match command {
            Command::Init => self.init(),
            Command::OpenWorkbook { path } => self.with_excel(ErrorKind::Open, |app| {
                let (workbook, name) = app.open_workbook(path)?;
                eprintln!("[excel-com-bridge] Opened {path} as '{name}'");
                Ok(Some(ResponseData::WorkbookOpened { workbook, name }))
            }),
            Command::RunMacro { name } => match self.excel.as_mut() {
                Some(app) => match app.run_macro(name) {
                    Ok(()) => ResponseResult::Ok { data: None },
                    Err(e) => {
                        let message = e.to_string();
                        ResponseResult::error(ErrorKind::for_run_failure(&message), message)
                    }
                },
                None => not_initialized(),
            },
            Command::GetCellValue {
                workbook,
                sheet,
                cell,
            } => self.with_excel(ErrorKind::Automation, |app| {
                let value = app.get_cell_value(*workbook, *sheet, cell)?;
                Ok(Some(ResponseData::Value { value }))
            }),
            Command::SaveWorkbook { workbook, path } => self.with_excel(ErrorKind::Save, |app| {
                app.save_workbook(*workbook, path)?;
                Ok(None)
            }),
            Command::CloseWorkbook {
                workbook,
                save_changes,
            } => self.with_excel(ErrorKind::Save, |app| {
                app.close_workbook(*workbook, *save_changes)?;
                Ok(None)
            }),
            Command::Shutdown => {
                let quit = self.excel.take().map(excel::ExcelApp::shutdown);
                self.uninit_com();
                match quit {
                    Some(Err(e)) => ResponseResult::error(
                        ErrorKind::Automation,
                        format!("Shutdown failed: {e}"),
                    ),
                    _ => ResponseResult::Ok { data: None },
                }
            }
        }
    }

    fn init(&mut self) -> excel_com_protocol::ResponseResult {
        use excel_com_protocol::{ErrorKind, ResponseResult};
        use windows::Win32::System::Com::{CoInitializeEx, COINIT_APARTMENTTHREADED};

        if self.excel.is_some() {
            return ResponseResult::Ok { data: None };
        }

        if !self.com_initialized {
            // Excel requires a single-threaded apartment
            let hr = unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) };
            if let Err(e) = hr.ok() {
                return ResponseResult::error(
                    ErrorKind::Automation,
                    format!("CoInitializeEx failed: {e}"),
                );
            }
            self.com_initialized = true;
            eprintln!("[excel-com-bridge] COM initialized (STA)");
        }

        match excel::ExcelApp::new() {
            Ok(app) => {
                eprintln!("[excel-com-bridge] Excel.Application created");
                self.excel = Some(app);
                ResponseResult::Ok { data: None }
            }
            Err(e) => ResponseResult::error(
                ErrorKind::Automation,
                format!("Failed to create Excel.Application: {e}"),
            ),
        }
    }

    fn with_excel(
        &mut self,
        kind: excel_com_protocol::ErrorKind,
        f: impl FnOnce(
            &mut excel::ExcelApp,
        ) -> dispatch::ComResult<Option<excel_com_protocol::ResponseData>>,
    ) -> excel_com_protocol::ResponseResult {
        use excel_com_protocol::ResponseResult;

        match self.excel.as_mut() {
            Some(app) => match f(app) {
                Ok(data) => ResponseResult::Ok { data },
                Err(e) => ResponseResult::error(kind, e.to_string()),
            },
            None => not_initialized(),
        }
    }

    fn uninit_com(&mut self) {
        if self.com_initialized {
            unsafe { windows::Win32::System::Com::CoUninitialize() };
            self.com_initialized = false;
            eprintln!("[excel-com-bridge] COM uninitialized");
        }
    }

    /// Quit Excel if it is still running and release the apartment.
    fn teardown(&mut self) {
        if let Some(app) = self.excel.take() {
            eprintln!("[excel-com-bridge] Excel still running, quitting...");
            if let Err(e) = app.shutdown() {
                eprintln!("[excel-com-bridge] Quit failed: {e}");
            }
        }
        self.uninit_com();
    }
}

#[cfg(windows)]
fn not_initialized() -> excel_com_protocol::ResponseResult {
    excel_com_protocol::ResponseResult::error(
        excel_com_protocol::ErrorKind::Automation,
        "Excel not initialized. Send 'Init' command first.",
    )
}

//! Run workbook macros in Excel from native Linux, through a WINE bridge process.
//!
//! This crate spawns a Windows `.exe` under WINE that automates Excel through COM,
//! communicating over JSON-over-stdio. [`MacroRunner`] drives one full session
//! per call: launch, open, `Application.Run`, read the result cell, save, close,
//! quit. The session is always torn down, including on error and panic.
//!
//! # Architecture
//!
//! ```text
//! Your Rust code (native Linux)
//!     └── MacroRunner (this crate)
//!           └── ExcelBridge: spawns `wine excel-com-bridge.exe`
//!                 └── COM: Excel.Application
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use excel_macro_runner::{ExcelBridgeConfig, MacroRunner};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = MacroRunner::new(ExcelBridgeConfig::default());
//!     let value = runner.run("/srv/books/report.xlsm".as_ref(), "Module1.Refresh")?;
//!     println!("C2 = {value}");
//!     Ok(())
//! }
//! ```

mod bridge;
mod path;
mod runner;
mod workbook;

pub use bridge::{BridgeError, ExcelBridge, ExcelBridgeConfig};
pub use excel_com_protocol::{CellValue, ErrorKind};
pub use path::{linux_to_wine_path, normalize_path};
pub use runner::{Launcher, MacroError, MacroHost, MacroRunner, RESULT_CELL, RESULT_SHEET};
pub use workbook::Workbook;

//! HTTP front end for running workbook macros in Excel.
//!
//! Two ways in: name a file already on the host (`POST /run-macro/`, JSON) or
//! upload one (`POST /run-macro-upload/`, multipart). Both end in one
//! [`MacroRunner`](excel_macro_runner::MacroRunner) session per request.

pub mod api;
pub mod config;
pub mod logging;
pub mod service;

pub use api::router;
pub use config::{LogFormat, ServerConfig};
pub use service::{MacroExecutor, MacroService, ServiceError};

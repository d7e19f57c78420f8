//! Server configuration.
//!
//! Layered: built-in defaults, then an optional YAML file, then `MACRO_RUNNER_*`
//! environment variables (nested keys joined with `__`, e.g.
//! `MACRO_RUNNER_BRIDGE__WINE_PREFIX`). CLI flags are applied last by `main`.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use excel_macro_runner::ExcelBridgeConfig;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "MACRO_RUNNER_";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,

    /// Drop point for uploaded workbooks. Created at startup.
    pub work_dir: PathBuf,

    /// Leave uploaded workbooks in `work_dir` after the request instead of
    /// deleting them.
    pub keep_uploads: bool,

    /// Cap on concurrent Excel sessions. Unset means one per request, unbounded.
    /// Zero is rejected at load.
    pub max_sessions: Option<NonZeroUsize>,

    /// Request body limit for uploads, in bytes.
    pub max_upload_bytes: usize,

    pub log_format: LogFormat,

    pub bridge: ExcelBridgeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            work_dir: std::env::temp_dir().join("excel-runner").join("work"),
            keep_uploads: false,
            max_sessions: None,
            max_upload_bytes: 50 * 1024 * 1024,
            log_format: LogFormat::Text,
            bridge: ExcelBridgeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Yaml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(file: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(file).extract()
    }

    /// Create `work_dir` if needed.
    pub fn prepare_work_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.work_dir)
    }
}

use excel_macro_runner::CellValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMacroRequest {
    /// Path on the host running Excel.
    pub file_path: String,
    pub macro_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMacroResponse {
    pub status: String,
    pub c2_value: CellValue,
}

impl RunMacroResponse {
    pub fn success(c2_value: CellValue) -> Self {
        Self {
            status: "success".to_string(),
            c2_value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

//! Handle to a workbook opened in the bridge.

/// A workbook open in the bridge's Excel instance.
///
/// Only valid for the [`ExcelBridge`](crate::ExcelBridge) that opened it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workbook {
    handle: u64,
    name: String,
}

impl Workbook {
    pub fn new(handle: u64, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }

    /// The bridge's handle ID.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Excel's `Workbook.Name`, i.e. the file name without directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope a macro name to this workbook, the form `Application.Run` expects:
    /// `'Book 1.xlsm'!Module1.Main`.
    ///
    /// Apostrophes in the workbook name are doubled, as in Excel references.
    pub fn qualified_macro(&self, macro_name: &str) -> String {
        format!("'{}'!{}", self.name.replace('\'', "''"), macro_name)
    }
}

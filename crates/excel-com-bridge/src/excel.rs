//! Excel.Application automation: open, run a macro, read a cell, save, close, quit.

#![cfg(windows)]

use std::collections::HashMap;

use excel_com_protocol::{CellError, CellValue};

use crate::dispatch::{
    read_variant, variant_bool, variant_i32, variant_str, ComError, ComResult, DispatchObject,
    Scalar,
};

// XlFileFormat
const XL_OPEN_XML_WORKBOOK: i32 = 51;
const XL_OPEN_XML_WORKBOOK_MACRO_ENABLED: i32 = 52;
const XL_EXCEL12: i32 = 50;
const XL_WORKBOOK_NORMAL: i32 = -4143;
const XL_CSV: i32 = 6;

/// One Excel.Application instance and the workbooks it has open.
pub struct ExcelApp {
    app: DispatchObject,
    workbooks_collection: DispatchObject,
    workbooks: HashMap<u64, DispatchObject>,
    next_handle: u64,
}

impl ExcelApp {
    /// Launch a new, hidden Excel instance with alerts and screen updates off.
    pub fn new() -> ComResult<Self> {
        let app = DispatchObject::create_from_progid("Excel.Application")?;

        app.set_property("Visible", variant_bool(false))?;
        app.set_property("DisplayAlerts", variant_bool(false))?;
        app.set_property("ScreenUpdating", variant_bool(false))?;

        let workbooks_collection = app.get_child("Workbooks")?;

        Ok(Self {
            app,
            workbooks_collection,
            workbooks: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Open a workbook. Returns its handle and `Workbook.Name`.
    pub fn open_workbook(&mut self, path: &str) -> ComResult<(u64, String)> {
        let wb = self
            .workbooks_collection
            .invoke_child("Open", &[variant_str(path)])?;
        let name = match read_variant(&wb.get_property("Name")?) {
            Scalar::Text(name) => name,
            _ => return Err(ComError::new("Workbook.Name", "expected a string")),
        };
        let handle = self.next_handle;
        self.next_handle += 1;
        self.workbooks.insert(handle, wb);
        Ok((handle, name))
    }

    /// `Application.Run(name)`. Blocks until the macro returns.
    pub fn run_macro(&self, qualified_name: &str) -> ComResult<()> {
        self.app.invoke_method("Run", &[variant_str(qualified_name)])?;
        Ok(())
    }

    fn workbook(&self, handle: u64) -> ComResult<&DispatchObject> {
        self.workbooks.get(&handle).ok_or_else(|| unknown_handle(handle))
    }

    /// `Worksheets(sheet + 1).Range(cell).Value`; `sheet` is 0-based.
    pub fn get_cell_value(&self, handle: u64, sheet: u32, cell: &str) -> ComResult<CellValue> {
        let sheets = self.workbook(handle)?.get_child("Worksheets")?;
        let index = i32::try_from(sheet)
            .ok()
            .and_then(|i| i.checked_add(1))
            .ok_or_else(|| {
                ComError::new("Worksheets", format!("sheet index {sheet} out of range"))
            })?;
        let ws = sheets.get_indexed("Item", variant_i32(index))?;
        let range = ws.get_indexed("Range", variant_str(cell))?;
        let value = range.get_property("Value")?;
        Ok(match read_variant(&value) {
            Scalar::Empty => CellValue::Null,
            Scalar::Bool(b) => CellValue::Bool(b),
            Scalar::Number(n) => CellValue::Number(n),
            Scalar::Text(s) => CellValue::String(s),
            Scalar::Error(scode) => CellValue::Error(CellError::from_scode(scode)),
            Scalar::Other(vt) => {
                return Err(ComError::new(
                    "Range.Value",
                    format!("unsupported VARIANT type {vt}"),
                ))
            }
        })
    }

    /// `Workbook.SaveAs(path, format)`, overwriting any existing file.
    pub fn save_workbook(&self, handle: u64, path: &str) -> ComResult<()> {
        let wb = self.workbook(handle)?;
        wb.invoke_method("SaveAs", &[variant_str(path), variant_i32(file_format(path))])?;
        Ok(())
    }

    /// `Workbook.Close(SaveChanges)`.
    pub fn close_workbook(&mut self, handle: u64, save_changes: bool) -> ComResult<()> {
        let wb = self.workbooks.remove(&handle).ok_or_else(|| unknown_handle(handle))?;
        wb.invoke_method("Close", &[variant_bool(save_changes)])?;
        Ok(())
    }

    /// Close anything still open without saving, then `Application.Quit`.
    pub fn shutdown(mut self) -> ComResult<()> {
        let handles: Vec<u64> = self.workbooks.keys().copied().collect();
        for h in handles {
            if let Err(e) = self.close_workbook(h, false) {
                eprintln!("[excel-com-bridge] closing workbook {h} during shutdown: {e}");
            }
        }
        self.app.invoke_method("Quit", &[])?;
        Ok(())
    }
}

fn unknown_handle(handle: u64) -> ComError {
    ComError::new("Workbooks", format!("Unknown workbook handle: {handle}"))
}

fn file_format(path: &str) -> i32 {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".xlsm") {
        XL_OPEN_XML_WORKBOOK_MACRO_ENABLED
    } else if lower.ends_with(".xlsb") {
        XL_EXCEL12
    } else if lower.ends_with(".xls") {
        XL_WORKBOOK_NORMAL
    } else if lower.ends_with(".csv") {
        XL_CSV
    } else {
        XL_OPEN_XML_WORKBOOK
    }
}

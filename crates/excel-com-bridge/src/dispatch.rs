//! Late-bound COM automation over `IDispatch`.
//!
//! Excel's object model, including `Application.Run` (the only way to reach a
//! VBA macro from outside Excel), is exposed through `IDispatch`. Every property
//! get/put and method call on a [`DispatchObject`] goes through one `invoke`
//! so failures carry the server's `EXCEPINFO` text.

#![cfg(windows)]

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;

use windows::{
    core::{BSTR, GUID, HSTRING, PCWSTR},
    Win32::{
        Foundation::{DISP_E_EXCEPTION, VARIANT_BOOL},
        Globalization::GetSystemDefaultLCID,
        System::{
            Com::{
                CLSIDFromProgID, CoCreateInstance, IDispatch, CLSCTX_LOCAL_SERVER, DISPATCH_FLAGS,
                DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS,
                EXCEPINFO,
            },
            Ole::DISPID_PROPERTYPUT,
            Variant::{
                VariantChangeType, VAR_CHANGE_FLAGS, VARIANT, VT_BOOL, VT_BSTR, VT_CY, VT_DATE,
                VT_DECIMAL, VT_DISPATCH, VT_EMPTY, VT_ERROR, VT_I2, VT_I4, VT_I8, VT_NULL, VT_R4,
                VT_R8,
            },
        },
    },
};

/// A failed COM call against a named member.
#[derive(Debug, Clone)]
pub struct ComError {
    /// Member (or ProgID) that was being accessed.
    pub member: String,
    pub message: String,
    /// True when the automation server raised an exception (`DISP_E_EXCEPTION`),
    /// in which case `message` is the server's own description.
    pub raised: bool,
}

impl ComError {
    pub fn new(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            message: message.into(),
            raised: false,
        }
    }
}

impl fmt::Display for ComError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raised {
            write!(f, "COM exception in '{}': {}", self.member, self.message)
        } else {
            write!(f, "'{}' failed: {}", self.member, self.message)
        }
    }
}

pub type ComResult<T> = Result<T, ComError>;

// -- VARIANT helpers --
// The VARIANT struct wraps inner unions in ManuallyDrop, so we use ptr::write
// to set fields without triggering the DerefMut lint.

pub fn variant_bool(val: bool) -> VARIANT {
    let mut v = VARIANT::default();
    unsafe {
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BOOL);
        ptr::write(
            &mut inner.Anonymous.boolVal,
            VARIANT_BOOL(if val { -1 } else { 0 }),
        );
    }
    v
}

pub fn variant_i32(val: i32) -> VARIANT {
    let mut v = VARIANT::default();
    unsafe {
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_I4);
        ptr::write(&mut inner.Anonymous.lVal, val);
    }
    v
}

pub fn variant_str(val: &str) -> VARIANT {
    let mut v = VARIANT::default();
    unsafe {
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, VT_BSTR);
        ptr::write(&mut inner.Anonymous.bstrVal, ManuallyDrop::new(BSTR::from(val)));
    }
    v
}

/// Decoded scalar contents of a VARIANT returned by Excel.
pub enum Scalar {
    Empty,
    Bool(bool),
    /// Numbers of any width. Dates arrive as their OLE serial number.
    Number(f64),
    Text(String),
    /// `VT_ERROR` with its `SCODE`, e.g. `0x800A07D7` for `#DIV/0!`.
    Error(i32),
    Other(u16),
}

pub fn read_variant(v: &VARIANT) -> Scalar {
    unsafe {
        let vt = v.Anonymous.Anonymous.vt;
        let anon = &v.Anonymous.Anonymous.Anonymous;
        if vt == VT_EMPTY || vt == VT_NULL {
            Scalar::Empty
        } else if vt == VT_BOOL {
            Scalar::Bool(anon.boolVal.0 != 0)
        } else if vt == VT_R8 || vt == VT_DATE {
            Scalar::Number(anon.dblVal)
        } else if vt == VT_R4 {
            Scalar::Number(anon.fltVal as f64)
        } else if vt == VT_I4 {
            Scalar::Number(anon.lVal as f64)
        } else if vt == VT_I2 {
            Scalar::Number(anon.iVal as f64)
        } else if vt == VT_CY {
            // Currency is fixed-point, four decimal places
            Scalar::Number(anon.cyVal.int64 as f64 / 10_000.0)
        } else if vt == VT_DECIMAL || vt == VT_I8 {
            match coerce_f64(v) {
                Some(n) => Scalar::Number(n),
                None => Scalar::Other(vt.0),
            }
        } else if vt == VT_BSTR {
            Scalar::Text(anon.bstrVal.to_string())
        } else if vt == VT_ERROR {
            Scalar::Error(anon.scode)
        } else {
            Scalar::Other(vt.0)
        }
    }
}

/// Let OLE convert a numeric VARIANT (e.g. `VT_DECIMAL`) to a double.
fn coerce_f64(v: &VARIANT) -> Option<f64> {
    let mut out = VARIANT::default();
    unsafe {
        VariantChangeType(&mut out, v, VAR_CHANGE_FLAGS(0), VT_R8).ok()?;
        Some(out.Anonymous.Anonymous.Anonymous.dblVal)
    }
}

fn variant_dispatch(v: &VARIANT) -> Option<IDispatch> {
    unsafe {
        if v.Anonymous.Anonymous.vt == VT_DISPATCH {
            // pdispVal is ManuallyDrop<Option<IDispatch>>
            let disp: &Option<IDispatch> = &v.Anonymous.Anonymous.Anonymous.pdispVal;
            disp.clone()
        } else {
            None
        }
    }
}

// -- DispatchObject --

/// A wrapper around an IDispatch COM object.
#[derive(Clone)]
pub struct DispatchObject {
    inner: IDispatch,
}

impl DispatchObject {
    /// Create an out-of-process COM server from a ProgID (e.g. "Excel.Application").
    pub fn create_from_progid(progid: &str) -> ComResult<Self> {
        unsafe {
            let clsid = CLSIDFromProgID(&HSTRING::from(progid))
                .map_err(|e| ComError::new(progid, format!("CLSIDFromProgID: {e}")))?;
            let inner: IDispatch = CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER)
                .map_err(|e| ComError::new(progid, format!("CoCreateInstance: {e}")))?;
            Ok(Self { inner })
        }
    }

    fn dispid(&self, name: &str) -> ComResult<i32> {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let names = [PCWSTR(wide.as_ptr())];
        let mut dispid = 0i32;
        unsafe {
            self.inner
                .GetIDsOfNames(
                    &GUID::zeroed(),
                    names.as_ptr(),
                    1,
                    GetSystemDefaultLCID(),
                    &mut dispid,
                )
                .map_err(|e| ComError::new(name, format!("GetIDsOfNames: {e}")))?;
        }
        Ok(dispid)
    }

    /// Single entry point for `IDispatch::Invoke`. `args` are in natural order;
    /// DISPPARAMS wants them reversed.
    fn invoke(&self, name: &str, flags: DISPATCH_FLAGS, args: &[VARIANT]) -> ComResult<VARIANT> {
        let dispid = self.dispid(name)?;
        let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
        let mut put_id = [DISPID_PROPERTYPUT];
        let is_put = flags == DISPATCH_PROPERTYPUT;
        let params = DISPPARAMS {
            rgvarg: if reversed.is_empty() {
                ptr::null_mut()
            } else {
                reversed.as_mut_ptr()
            },
            rgdispidNamedArgs: if is_put {
                put_id.as_mut_ptr()
            } else {
                ptr::null_mut()
            },
            cArgs: reversed.len() as u32,
            cNamedArgs: u32::from(is_put),
        };
        let mut result = VARIANT::default();
        let mut except = EXCEPINFO::default();
        unsafe {
            self.inner
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    GetSystemDefaultLCID(),
                    flags,
                    &params,
                    if is_put { None } else { Some(&mut result) },
                    Some(&mut except),
                    None,
                )
                .map_err(|e| invoke_error(e, &except, name))?;
        }
        Ok(result)
    }

    /// `obj.Name`
    pub fn get_property(&self, name: &str) -> ComResult<VARIANT> {
        self.invoke(name, DISPATCH_PROPERTYGET, &[])
    }

    /// `obj.Name = value`
    pub fn set_property(&self, name: &str, value: VARIANT) -> ComResult<()> {
        self.invoke(name, DISPATCH_PROPERTYPUT, &[value]).map(|_| ())
    }

    /// `obj.Name(args...)`
    pub fn invoke_method(&self, name: &str, args: &[VARIANT]) -> ComResult<VARIANT> {
        self.invoke(name, DISPATCH_METHOD, args)
    }

    /// A property that returns an object, e.g. `app.Workbooks`.
    pub fn get_child(&self, name: &str) -> ComResult<DispatchObject> {
        let v = self.get_property(name)?;
        as_object(&v, name)
    }

    /// A method that returns an object, e.g. `Workbooks.Open(path)`.
    pub fn invoke_child(&self, name: &str, args: &[VARIANT]) -> ComResult<DispatchObject> {
        let v = self.invoke_method(name, args)?;
        as_object(&v, name)
    }

    /// An indexed property, e.g. `Worksheets(1)` or `Range("C2")`.
    pub fn get_indexed(&self, name: &str, index: VARIANT) -> ComResult<DispatchObject> {
        let v = self.invoke(name, DISPATCH_PROPERTYGET, &[index])?;
        as_object(&v, name)
    }
}

fn as_object(v: &VARIANT, member: &str) -> ComResult<DispatchObject> {
    match (variant_dispatch(v), read_variant(v)) {
        (Some(inner), _) => Ok(DispatchObject { inner }),
        (None, Scalar::Empty) => Err(ComError::new(member, "returned empty/null")),
        (None, _) => Err(ComError::new(
            member,
            "returned a non-object VARIANT, expected VT_DISPATCH",
        )),
    }
}

fn invoke_error(err: windows::core::Error, except: &EXCEPINFO, member: &str) -> ComError {
    if err.code() != DISP_E_EXCEPTION {
        return ComError::new(member, format!("Invoke: {err}"));
    }
    let mut message = if except.bstrDescription.is_empty() {
        String::from("(no description)")
    } else {
        except.bstrDescription.to_string()
    };
    if !except.bstrSource.is_empty() {
        message.push_str(&format!(" (source: {})", except.bstrSource));
    }
    ComError {
        member: member.to_string(),
        message,
        raised: true,
    }
}

//! Host path normalization and Linux → WINE path translation.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Make `path` absolute (against the current directory) and lexically drop
/// `.` and `..` segments. Symlinks are not resolved and the file need not exist.
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(clean(&absolute))
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `/..` stays `/`
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Convert an absolute Linux filesystem path to a WINE (Windows) path.
///
/// WINE maps `/` to `Z:\`, so `/home/user/file.xlsm` becomes `Z:\home\user\file.xlsm`.
/// Call [`normalize_path`] first for relative input.
pub fn linux_to_wine_path(linux_path: &Path) -> String {
    format!("Z:{}", linux_path.display()).replace('/', "\\")
}

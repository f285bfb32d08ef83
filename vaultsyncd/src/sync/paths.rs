use std::path::{Component, Path, PathBuf};

use thiserror::Error;

pub const PARTIAL_SUFFIX: &str = ".vaultsync-partial";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("file name is empty")]
    Empty,
    #[error("file name contains unsupported component")]
    UnsupportedComponent,
    #[error("path is outside the sync folder")]
    OutsideRoot,
}

/// Maps a catalog name (`a.xml`, `docs/a.xml`) under the sync folder.
pub fn local_path_for(root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    let mut pushed = false;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                pushed = true;
            }
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent);
            }
        }
    }
    if !pushed {
        return Err(PathError::Empty);
    }
    Ok(out)
}

/// Inverse of [`local_path_for`]: the catalog name of a file under `root`,
/// with `/` separators on every platform.
pub fn name_for(root: &Path, path: &Path) -> Result<String, PathError> {
    let relative = path.strip_prefix(root).map_err(|_| PathError::OutsideRoot)?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => continue,
            _ => return Err(PathError::UnsupportedComponent),
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

/// Hidden sibling that a download streams into: `docs/.a.xml.vaultsync-partial`.
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(file_name) = target.file_name() {
        name.push(file_name);
    }
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

pub fn is_partial(path: &Path) -> bool {
    path.file_name().is_some_and(|name| {
        let name = name.to_string_lossy();
        name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
    })
}

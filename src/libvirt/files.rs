//! Capability-scoped file access for work areas and the image directory.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::LibvirtError;

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), LibvirtError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LibvirtError::io(path, "path has no file name"))?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, file_name))
}

fn open_dir(path: &Utf8Path) -> io::Result<Dir> {
    Dir::open_ambient_dir(path, ambient_authority())
}

/// Whether a regular file exists at `path`.
pub(super) fn exists(path: &Utf8Path) -> bool {
    split(path).is_ok_and(|(parent, name)| {
        open_dir(parent).is_ok_and(|dir| dir.metadata(name).is_ok_and(|meta| meta.is_file()))
    })
}

pub(super) fn write(path: &Utf8Path, contents: &str) -> Result<(), LibvirtError> {
    let (parent, name) = split(path)?;
    open_dir(parent)
        .and_then(|dir| dir.write(name, contents))
        .map_err(|err| LibvirtError::io(path, err))
}

/// Reads `path`, returning `None` when it does not exist.
pub(super) fn read_optional(path: &Utf8Path) -> Result<Option<String>, LibvirtError> {
    let (parent, name) = split(path)?;
    match open_dir(parent).and_then(|dir| dir.read_to_string(name)) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(LibvirtError::io(path, err)),
    }
}

/// Deletes `path`; `missing_ok` turns a missing file into success.
pub(super) fn remove(path: &Utf8Path, missing_ok: bool) -> Result<(), LibvirtError> {
    let (parent, name) = split(path)?;
    match open_dir(parent).and_then(|dir| dir.remove_file(name)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound && missing_ok => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(LibvirtError::NotFound {
            kind: "image",
            name: path.to_string(),
        }),
        Err(err) => Err(LibvirtError::io(path, err)),
    }
}

/// Files in `dir` with the given extension, with their sizes in bytes,
/// sorted by name.
pub(super) fn files_with_extension(
    dir: &Utf8Path,
    extension: &str,
) -> Result<Vec<(String, u64)>, LibvirtError> {
    let handle = match open_dir(dir) {
        Ok(handle) => handle,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(LibvirtError::io(dir, err)),
    };
    let entries = handle.entries().map_err(|err| LibvirtError::io(dir, err))?;
    let mut found = Vec::new();
    for entry in entries {
        let item = entry.map_err(|err| LibvirtError::io(dir, err))?;
        let name = item.file_name().map_err(|err| LibvirtError::io(dir, err))?;
        if Utf8Path::new(&name).extension() != Some(extension) {
            continue;
        }
        let meta = item.metadata().map_err(|err| LibvirtError::io(dir, err))?;
        if meta.is_file() {
            found.push((name, meta.len()));
        }
    }
    found.sort();
    Ok(found)
}

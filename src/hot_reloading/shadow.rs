//! Shadow copies of the watched module.
//!
//! The module is never mapped from the watched path directly: on Windows that
//! would lock the file against the next build, elsewhere a rebuild could
//! rewrite pages that are still mapped. Each version is copied next to the
//! original as `<stem>_<YYYYMMDDHHMMSS><.ext>`, keyed on the source's
//! modification time, and that copy is loaded instead.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::{ReloadError, ReloadResult};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Shadow path for `source` as last modified at `modified`.
pub fn shadow_path_at(source: &Path, modified: SystemTime) -> PathBuf {
    let stamp = DateTime::<Utc>::from(modified).format(TIMESTAMP_FORMAT);

    let mut file_name = OsString::new();
    if let Some(stem) = source.file_stem() {
        file_name.push(stem);
    }
    file_name.push(format!("_{stamp}"));
    if let Some(ext) = source.extension() {
        file_name.push(".");
        file_name.push(ext);
    }

    source.with_file_name(file_name)
}

/// Shadow path for the current version of `source`.
pub fn shadow_path(source: &Path) -> io::Result<PathBuf> {
    let modified = fs::metadata(source)?.modified()?;
    Ok(shadow_path_at(source, modified))
}

/// Make sure a shadow copy of the current version of `source` exists and
/// return its path. An existing copy for the same timestamp is reused.
pub fn materialize(source: &Path) -> ReloadResult<PathBuf> {
    let copy_error = |to: &Path, source_err: io::Error| ReloadError::Copy {
        from: source.to_path_buf(),
        to: to.to_path_buf(),
        source: source_err,
    };

    let modified = fs::metadata(source)
        .and_then(|meta| meta.modified())
        .map_err(|err| copy_error(source, err))?;
    let shadow = shadow_path_at(source, modified);

    if shadow.exists() {
        log::debug!("reusing shadow copy {shadow:?}");
        return Ok(shadow);
    }

    log::debug!("copying {source:?} -> {shadow:?}");
    install_copy(source, modified, &shadow).map_err(|err| copy_error(&shadow, err))?;

    Ok(shadow)
}

fn partial_path(shadow: &Path) -> PathBuf {
    let mut partial = shadow.as_os_str().to_owned();
    partial.push(".partial");
    PathBuf::from(partial)
}

/// Copy `source` to `shadow` if it is still the version last modified at
/// `modified`.
///
/// The bytes go to `<shadow>.partial` first and are renamed into place, so a
/// half written file is never picked up as a finished shadow copy.
fn install_copy(source: &Path, modified: SystemTime, shadow: &Path) -> io::Result<()> {
    let partial = partial_path(shadow);

    let copied = fs::copy(source, &partial).and_then(|_| {
        let modified_after = fs::metadata(source)?.modified()?;
        if modified_after != modified {
            return Err(io::Error::other("source was modified while copying"));
        }
        fs::rename(&partial, shadow)
    });

    if copied.is_err() && partial.is_file() {
        if let Err(err) = fs::remove_file(&partial) {
            log::warn!("could not remove {partial:?}: {err}");
        }
    }
    copied
}

//! A stand-in [`NativeModule`] for tests.
//!
//! A fake module file is a text symbol table, one `export=implementation` per
//! line, where the implementation names one of the `extern "C"` functions
//! below. A file containing the line `corrupt` is rejected by `load`. Loads and
//! unloads are written to a process-wide journal that tests filter by their
//! own scratch directory.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::hot_reloading::module::NativeModule;
use crate::{ReloadError, ReloadResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Journal {
    Load,
    Unload,
    Reloaded,
}

fn journal() -> &'static Mutex<Vec<(PathBuf, Journal)>> {
    static JOURNAL: OnceLock<Mutex<Vec<(PathBuf, Journal)>>> = OnceLock::new();
    JOURNAL.get_or_init(Default::default)
}

pub fn record(path: &Path, entry: Journal) {
    journal().lock().push((path.to_path_buf(), entry));
}

pub fn journal_for(dir: &Path) -> Vec<(PathBuf, Journal)> {
    journal()
        .lock()
        .iter()
        .filter(|(path, _)| path.starts_with(dir))
        .cloned()
        .collect()
}

extern "C" fn one() -> i32 {
    1
}

extern "C" fn two() -> i32 {
    2
}

extern "C" fn seven() -> i32 {
    7
}

fn address_of(name: &str) -> Option<NonNull<c_void>> {
    let func: extern "C" fn() -> i32 = match name {
        "one" => one,
        "two" => two,
        "seven" => seven,
        _ => return None,
    };
    NonNull::new(func as *const () as *mut c_void)
}

pub struct FakeModule {
    path: PathBuf,
    exports: HashMap<String, String>,
}

impl NativeModule for FakeModule {
    fn load(path: &Path) -> ReloadResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| ReloadError::load(path, err))?;

        let mut exports = HashMap::new();
        for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            if line == "corrupt" {
                return Err(ReloadError::load(path, "not a module"));
            }
            if let Some((export, implementation)) = line.split_once('=') {
                exports.insert(export.to_string(), implementation.to_string());
            }
        }

        record(path, Journal::Load);
        Ok(FakeModule {
            path: path.to_path_buf(),
            exports,
        })
    }

    fn resolve(&self, name: &str) -> ReloadResult<NonNull<c_void>> {
        self.exports
            .get(name)
            .and_then(|implementation| address_of(implementation))
            .ok_or_else(|| ReloadError::symbol_not_found(name))
    }

    fn unload(self) -> ReloadResult<()> {
        record(&self.path, Journal::Unload);
        Ok(())
    }
}

/// Write a fake module with its modification time pinned to
/// `2000-01-01 + offset_secs`, so shadow names differ per version.
pub fn write_module(dir: &Path, file_name: &str, content: &str, offset_secs: u64) -> PathBuf {
    let path = dir.join(file_name);
    fs::write(&path, content).unwrap();

    let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(946_684_800 + offset_secs);
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
    path
}

/// Files in `dir` other than `except`.
pub fn other_files(dir: &Path, except: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path != except)
        .collect();
    files.sort();
    files
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ReloadResult;

pub mod events;
pub mod hot_fn;
pub mod lib_reloader;
pub mod module;
pub mod shadow;
pub mod symbol;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{ReloadEvents, Subscription};
pub use hot_fn::HotFn;
pub use lib_reloader::{LibReloader, LoaderState, ReloadOutcome};
pub use module::{LibraryModule, ModuleHandle, NativeModule};
pub use symbol::{NativeFn, TypedSymbol};

#[derive(Clone, Debug)]
pub struct HotReloadConfig {
    /// The module file to watch. Relative paths that do not exist below the
    /// working directory are also looked up in its parent directories.
    pub lib_path: PathBuf,
    /// Defaults to 500ms.
    pub file_watch_debounce: Option<Duration>,
    /// Without a watcher, reloads only happen through [`LibReloader::reload`].
    pub watch_changes: bool,
}

impl HotReloadConfig {
    pub fn new(lib_path: impl AsRef<Path>) -> Self {
        Self {
            lib_path: lib_path.as_ref().to_path_buf(),
            file_watch_debounce: None,
            watch_changes: true,
        }
    }

    /// `lib_name` is the name of the library, not(!) the file name, e.g. the
    /// crate name of a `cdylib`. The platform specific prefix and extension
    /// are added here.
    pub fn from_lib_name(lib_dir: impl AsRef<Path>, lib_name: impl AsRef<str>) -> Self {
        let file_name = libloading::library_filename(lib_name.as_ref());
        Self::new(lib_dir.as_ref().join(file_name))
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.file_watch_debounce = Some(debounce);
        self
    }

    pub fn without_watcher(mut self) -> Self {
        self.watch_changes = false;
        self
    }

    pub(crate) fn resolve_lib_path(&self) -> ReloadResult<PathBuf> {
        find_file_or_dir_in_parent_directories(&self.lib_path)
    }
}

/// Try to find that might be a relative path such as `target/debug/` by walking
/// up the directories, starting from cwd. This helps finding the lib when the
/// app was started from a directory that is not the project/workspace root.
fn find_file_or_dir_in_parent_directories(file: impl AsRef<Path>) -> ReloadResult<PathBuf> {
    let mut file = file.as_ref().to_path_buf();
    if !file.exists() && file.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            let mut parent_dir = Some(cwd.as_path());
            while let Some(dir) = parent_dir {
                if dir.join(&file).exists() {
                    file = dir.join(&file);
                    break;
                }
                parent_dir = dir.parent();
            }
        }
    }

    if file.exists() {
        Ok(file)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file {file:?} does not exist"),
        )
        .into())
    }
}

use std::io;
use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can go wrong while loading, resolving or swapping a module.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("failed to load module {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("symbol `{name}` not found")]
    SymbolNotFound { name: String },

    #[error("failed to copy {from:?} -> {to:?}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to unload module {path:?}: {source}")]
    Unload {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("module {path:?} has been unloaded")]
    ModuleUnloaded { path: PathBuf },

    #[error("failed to watch {path:?}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("library reloader has been disposed")]
    Disposed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReloadError {
    pub fn symbol_not_found(name: impl Into<String>) -> Self {
        ReloadError::SymbolNotFound { name: name.into() }
    }

    pub fn load(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        ReloadError::Load {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn unload(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        ReloadError::Unload {
            path: path.into(),
            source: source.into(),
        }
    }
}

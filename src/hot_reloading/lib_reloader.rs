use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use parking_lot::{Mutex, RwLock};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Weak,
};
use std::time::Duration;

use crate::hot_reloading::events::{ReloadEvents, Subscription};
use crate::hot_reloading::hot_fn::HotFn;
use crate::hot_reloading::module::{LibraryModule, ModuleHandle, NativeModule};
use crate::hot_reloading::shadow;
use crate::hot_reloading::symbol::{NativeFn, TypedSymbol};
use crate::hot_reloading::HotReloadConfig;
use crate::{ReloadError, ReloadResult};

type FileDebouncer = Debouncer<RecommendedWatcher, RecommendedCache>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoaderState {
    Active,
    Disposed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new version was loaded and every [`HotFn`] rebound.
    Reloaded,
    /// The shadow copy for the current timestamp is already the active module.
    Unchanged,
}

/// Watches a native module file, keeps a shadow copy of its newest version
/// loaded and hands out [`HotFn`]s that follow every reload.
///
/// A change of the watched file runs [`LibReloader::reload`] on the watcher
/// thread:
///
/// 1. copy the file to its timestamped shadow path
/// 2. load the copy
/// 3. publish it as the active module
/// 4. notify subscribers (every live [`HotFn`] rebinds here)
/// 5. unload the previous module once its in-flight calls returned
/// 6. delete the previous shadow copy
///
/// A failing step before 3 leaves the previous module active. Dropping the
/// reloader stops watching and unloads the active module; its shadow copy
/// stays on disk.
pub struct LibReloader<M: NativeModule = LibraryModule> {
    shared: Arc<Shared<M>>,
    debouncer: Mutex<Option<FileDebouncer>>,
}

struct Shared<M: NativeModule> {
    watched_lib_file: PathBuf,
    active: RwLock<Arc<ModuleHandle<M>>>,
    events: Arc<ReloadEvents>,
    reload_lock: Mutex<()>,
    disposed: AtomicBool,
    reload_count: AtomicUsize,
}

impl LibReloader {
    /// Load the module at `lib_path` with the default configuration.
    pub fn open(lib_path: impl AsRef<Path>) -> ReloadResult<Self> {
        Self::new(HotReloadConfig::new(lib_path.as_ref()))
    }
}

impl<M: NativeModule> LibReloader<M> {
    pub fn new(config: HotReloadConfig) -> ReloadResult<Self> {
        let watched_lib_file = config.resolve_lib_path()?;
        log::debug!("found lib at {watched_lib_file:?}");

        // The watched file itself is never loaded so the next build can replace it.
        let loaded_lib_file = shadow::materialize(&watched_lib_file)?;
        let initial = match ModuleHandle::load(&loaded_lib_file) {
            Ok(handle) => handle,
            Err(err) => {
                remove_shadow(&loaded_lib_file);
                return Err(err);
            }
        };

        let shared = Arc::new(Shared {
            watched_lib_file,
            active: RwLock::new(Arc::new(initial)),
            events: ReloadEvents::new(),
            reload_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
            reload_count: AtomicUsize::new(0),
        });

        let debouncer = if config.watch_changes {
            let debounce = config
                .file_watch_debounce
                .unwrap_or_else(|| Duration::from_millis(500));
            Some(Self::watch(&shared, debounce)?)
        } else {
            None
        };

        Ok(Self {
            shared,
            debouncer: Mutex::new(debouncer),
        })
    }

    /// Watch the directory of the lib file and reload on every change of the
    /// file itself.
    fn watch(shared: &Arc<Shared<M>>, debounce: Duration) -> ReloadResult<FileDebouncer> {
        let lib_file = shared.watched_lib_file.clone();
        let lib_dir = match lib_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let lib_file_name: OsString = lib_file.file_name().map(ToOwned::to_owned).unwrap_or_default();
        log::info!("start watching changes of file {}", lib_file.display());

        let weak: Weak<Shared<M>> = Arc::downgrade(shared);
        let watch_error = |source| ReloadError::Watch {
            path: lib_file.clone(),
            source,
        };

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(errors) => {
                    for err in errors {
                        log::warn!("file watcher error: {err}");
                    }
                    return;
                }
            };

            let lib_changed = events.iter().any(|event| {
                matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                    && event
                        .paths
                        .iter()
                        .any(|path| path.file_name() == Some(lib_file_name.as_os_str()))
            });
            if !lib_changed {
                return;
            }

            let Some(shared) = weak.upgrade() else {
                return;
            };
            match shared.reload() {
                Ok(ReloadOutcome::Reloaded) => {}
                Ok(ReloadOutcome::Unchanged) => log::debug!("lib changed but timestamp did not"),
                Err(ReloadError::Disposed) => {}
                Err(err) => log::error!("reload failed, keeping previous version: {err}"),
            }
        })
        .map_err(watch_error)?;

        debouncer
            .watch(&lib_dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        Ok(debouncer)
    }

    /// Load the current version of the watched file, as if it had just
    /// changed. This is what the file watcher calls.
    pub fn reload(&self) -> ReloadResult<ReloadOutcome> {
        self.shared.reload()
    }

    /// Get a handle to the exported function `name` that follows reloads.
    ///
    /// Fails with [`ReloadError::SymbolNotFound`] if the active module does
    /// not export `name`.
    ///
    /// # Safety
    ///
    /// Every version of the module must export `name` with the signature `F`.
    /// Nothing checks this; a mismatch is undefined behaviour once the handle
    /// is called.
    pub unsafe fn get_fn<F: NativeFn>(&self, name: &str) -> ReloadResult<HotFn<F, M>> {
        // Held until the rebinding listener is registered, so no reload can
        // broadcast between resolving and subscribing.
        let _reloading = self.shared.reload_lock.lock();
        let symbol = unsafe { self.shared.resolve_active::<F>(name) }?;

        let name: Arc<str> = name.into();
        let slot = Arc::new(RwLock::new(Some(symbol)));

        let weak_shared = Arc::downgrade(&self.shared);
        let weak_slot = Arc::downgrade(&slot);
        let rebind_name = name.clone();
        let subscription = self.shared.events.subscribe(move || {
            let (Some(shared), Some(slot)) = (weak_shared.upgrade(), weak_slot.upgrade()) else {
                return;
            };

            let resolved = unsafe { shared.active().resolve::<F>(&rebind_name) };
            *slot.write() = match resolved {
                Ok(symbol) => Some(symbol),
                Err(err) => {
                    log::warn!("{rebind_name} lost on reload: {err}");
                    None
                }
            };
        });

        Ok(HotFn::new(name, slot, subscription))
    }

    /// Resolve `name` once against the active module. Unlike [`get_fn`],
    /// the result keeps pointing at this version and stops working once the
    /// module is replaced.
    ///
    /// # Safety
    ///
    /// The export must have the signature `F`.
    ///
    /// [`get_fn`]: LibReloader::get_fn
    pub unsafe fn get_symbol<F: NativeFn>(&self, name: &str) -> ReloadResult<TypedSymbol<F, M>> {
        let _reloading = self.shared.reload_lock.lock();
        unsafe { self.shared.resolve_active::<F>(name) }
    }

    /// Call `listener` after every completed reload.
    ///
    /// Listeners run on the reloading thread while the reload is still in
    /// progress; calling [`LibReloader::get_fn`] or [`LibReloader::reload`]
    /// from one deadlocks.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.shared.events.subscribe(listener)
    }

    pub fn active_module(&self) -> Arc<ModuleHandle<M>> {
        self.shared.active()
    }

    pub fn watched_path(&self) -> &Path {
        &self.shared.watched_lib_file
    }

    /// Number of completed reloads.
    pub fn reload_count(&self) -> usize {
        self.shared.reload_count.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LoaderState {
        if self.shared.disposed.load(Ordering::Acquire) {
            LoaderState::Disposed
        } else {
            LoaderState::Active
        }
    }

    /// Stop watching and unload the active module. Dropping the reloader does
    /// the same.
    pub fn dispose(self) {
        drop(self);
    }

    fn shutdown(&mut self) {
        // Stop the watcher first so no reload can start behind our back.
        if let Some(debouncer) = self.debouncer.get_mut().take() {
            debouncer.stop();
        }

        let _reloading = self.shared.reload_lock.lock();
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let active = self.shared.active();
        log::debug!("disposing, unloading {:?}", active.path());
        if let Err(err) = active.unload() {
            log::warn!("{err}");
        }
        self.shared.events.clear();
    }
}

impl<M: NativeModule> Drop for LibReloader<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<M: NativeModule> Shared<M> {
    fn active(&self) -> Arc<ModuleHandle<M>> {
        self.active.read().clone()
    }

    /// Resolve `name` against the active module. The caller holds
    /// `reload_lock`, so the module can't be retired underneath.
    unsafe fn resolve_active<F: NativeFn>(&self, name: &str) -> ReloadResult<TypedSymbol<F, M>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ReloadError::Disposed);
        }
        unsafe { self.active().resolve::<F>(name) }
    }

    fn reload(&self) -> ReloadResult<ReloadOutcome> {
        let _reloading = self.reload_lock.lock();
        if self.disposed.load(Ordering::Acquire) {
            return Err(ReloadError::Disposed);
        }

        let previous = self.active();
        let loaded_lib_file = shadow::materialize(&self.watched_lib_file)?;
        if loaded_lib_file == previous.path() {
            return Ok(ReloadOutcome::Unchanged);
        }

        log::info!("reloading lib {:?}", self.watched_lib_file);
        let next = match ModuleHandle::load(&loaded_lib_file) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                // Forget the rejected copy so the next change retries from scratch.
                remove_shadow(&loaded_lib_file);
                return Err(err);
            }
        };

        *self.active.write() = next;
        let notified = self.events.broadcast();
        log::debug!("notified {notified} reload subscribers");

        if let Err(err) = previous.unload() {
            log::warn!("{err}");
        }
        remove_shadow(previous.path());

        self.reload_count.fetch_add(1, Ordering::AcqRel);
        log::info!("reloaded lib from {loaded_lib_file:?}");
        Ok(ReloadOutcome::Reloaded)
    }
}

fn remove_shadow(path: &Path) {
    if !path.exists() {
        return;
    }
    log::trace!("removing {path:?}");
    if let Err(err) = fs::remove_file(path) {
        log::warn!("could not remove shadow copy {path:?}: {err}");
    }
}

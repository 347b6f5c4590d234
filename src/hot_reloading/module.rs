use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use libloading::Library;
use parking_lot::{Condvar, Mutex};

use crate::hot_reloading::symbol::{NativeFn, TypedSymbol};
use crate::{ReloadError, ReloadResult};

/// The capabilities the reloader needs from the platform: map a module file,
/// look up an export, unmap it again.
pub trait NativeModule: Sized + Send + Sync + 'static {
    fn load(path: &Path) -> ReloadResult<Self>;

    /// Address of the export `name`. A null export counts as missing.
    fn resolve(&self, name: &str) -> ReloadResult<NonNull<c_void>>;

    fn unload(self) -> ReloadResult<()>;
}

/// [`NativeModule`] backed by [`libloading::Library`] (`dlopen`/`LoadLibrary`).
#[derive(Debug)]
pub struct LibraryModule {
    path: PathBuf,
    library: Library,
}

impl NativeModule for LibraryModule {
    fn load(path: &Path) -> ReloadResult<Self> {
        let library = unsafe { Library::new(path) }.map_err(|err| ReloadError::load(path, err))?;

        Ok(LibraryModule {
            path: path.to_path_buf(),
            library,
        })
    }

    fn resolve(&self, name: &str) -> ReloadResult<NonNull<c_void>> {
        let address = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }
            .map_err(|err| {
                log::debug!("lookup of {name} in {:?} failed: {err}", self.path);
                ReloadError::symbol_not_found(name)
            })?;

        NonNull::new(*address).ok_or_else(|| ReloadError::symbol_not_found(name))
    }

    fn unload(self) -> ReloadResult<()> {
        let Self { path, library } = self;
        library.close().map_err(|err| ReloadError::unload(path, err))
    }
}

/// One loaded instance of a native module.
///
/// Every call made through a [`TypedSymbol`] holds a [`CallGuard`] on the
/// handle it was resolved from. [`ModuleHandle::unload`] first retires the
/// handle so no new guard can be taken, then waits for the guards still out
/// to be released before the module is unmapped.
pub struct ModuleHandle<M: NativeModule = LibraryModule> {
    path: PathBuf,
    module: Mutex<Option<M>>,
    in_flight: AtomicUsize,
    retired: AtomicBool,
    quiesce: Mutex<()>,
    idle: Condvar,
}

impl<M: NativeModule> ModuleHandle<M> {
    pub fn load(path: impl AsRef<Path>) -> ReloadResult<Self> {
        let path = path.as_ref();
        let module = M::load(path)?;
        log::debug!("loaded module {path:?}");

        Ok(ModuleHandle {
            path: path.to_path_buf(),
            module: Mutex::new(Some(module)),
            in_flight: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            quiesce: Mutex::new(()),
            idle: Condvar::new(),
        })
    }

    /// File the module was mapped from (the shadow copy, not the watched file).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// New calls and resolutions are refused. The module may still be mapped
    /// while [`ModuleHandle::unload`] waits for running calls.
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// The module has been unmapped.
    pub fn is_unloaded(&self) -> bool {
        self.module.lock().is_none()
    }

    /// Number of calls currently executing module code.
    pub fn calls_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn resolve_address(&self, name: &str) -> ReloadResult<NonNull<c_void>> {
        if self.is_retired() {
            return Err(self.unloaded_error());
        }

        match &*self.module.lock() {
            Some(module) => module.resolve(name),
            None => Err(self.unloaded_error()),
        }
    }

    /// Resolve `name` as a function of type `F`.
    ///
    /// # Safety
    ///
    /// The export must really be a function with the signature `F`. Nothing
    /// checks this; a mismatch is undefined behaviour once the symbol is called.
    pub unsafe fn resolve<F: NativeFn>(self: &Arc<Self>, name: &str) -> ReloadResult<TypedSymbol<F, M>> {
        let address = self.resolve_address(name)?;
        let func = unsafe { F::from_address(address) };

        Ok(TypedSymbol::new(name, func, self.clone()))
    }

    /// Unmap the module once every in-flight call has returned.
    ///
    /// Calling this again after the module is gone does nothing.
    pub fn unload(&self) -> ReloadResult<()> {
        self.retired.store(true, Ordering::SeqCst);

        let mut quiesce = self.quiesce.lock();
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            log::debug!("waiting for calls into {:?} to return", self.path);
            while self.in_flight.load(Ordering::SeqCst) > 0 {
                self.idle.wait(&mut quiesce);
            }
        }
        drop(quiesce);

        let Some(module) = self.module.lock().take() else {
            log::trace!("{:?} already unloaded", self.path);
            return Ok(());
        };

        log::debug!("unloading module {:?}", self.path);
        module.unload()
    }

    pub(crate) fn enter(self: &Arc<Self>) -> ReloadResult<CallGuard<M>> {
        // Count first, check second: unload sets the flag before it reads the count.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.retired.load(Ordering::SeqCst) {
            self.leave();
            return Err(self.unloaded_error());
        }

        Ok(CallGuard {
            module: self.clone(),
        })
    }

    fn leave(&self) {
        let last = self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1;
        // The waiter reads the count under `quiesce`, so notifying under it can't be missed.
        if last && self.retired.load(Ordering::SeqCst) {
            let _quiesce = self.quiesce.lock();
            self.idle.notify_all();
        }
    }

    fn unloaded_error(&self) -> ReloadError {
        ReloadError::ModuleUnloaded {
            path: self.path.clone(),
        }
    }
}

impl<M: NativeModule> Drop for ModuleHandle<M> {
    fn drop(&mut self) {
        if let Some(module) = self.module.get_mut().take() {
            log::debug!("unloading dropped module {:?}", self.path);
            if let Err(err) = module.unload() {
                log::warn!("{err}");
            }
        }
    }
}

/// Keeps a module mapped while a call into it is running.
pub struct CallGuard<M: NativeModule> {
    module: Arc<ModuleHandle<M>>,
}

impl<M: NativeModule> Drop for CallGuard<M> {
    fn drop(&mut self) {
        self.module.leave();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::hot_reloading::testing::{Journal, FakeModule, journal_for, write_module};

    type Answer = extern "C" fn() -> i32;

    #[test]
    fn resolves_and_calls_exports() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.fake", "f=one\ng=seven", 0);

        let handle = Arc::new(ModuleHandle::<FakeModule>::load(&path).unwrap());
        let f = unsafe { handle.resolve::<Answer>("f") }.unwrap();
        let g = unsafe { handle.resolve::<Answer>("g") }.unwrap();

        assert_eq!(f.call().unwrap(), 1);
        assert_eq!(g.call().unwrap(), 7);
    }

    #[test]
    fn missing_symbol_names_the_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.fake", "f=one", 0);

        let handle = Arc::new(ModuleHandle::<FakeModule>::load(&path).unwrap());
        let err = unsafe { handle.resolve::<Answer>("nope") }.err().unwrap();

        assert!(matches!(err, ReloadError::SymbolNotFound { ref name } if name == "nope"));
    }

    #[test]
    fn second_unload_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.fake", "f=one", 0);

        let handle = Arc::new(ModuleHandle::<FakeModule>::load(&path).unwrap());
        handle.unload().unwrap();
        handle.unload().unwrap();
        drop(handle);

        let unloads = journal_for(dir.path())
            .into_iter()
            .filter(|(_, entry)| *entry == Journal::Unload)
            .count();
        assert_eq!(unloads, 1);
    }

    #[test]
    fn unloaded_handle_refuses_resolution_and_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.fake", "f=one", 0);

        let handle = Arc::new(ModuleHandle::<FakeModule>::load(&path).unwrap());
        let f = unsafe { handle.resolve::<Answer>("f") }.unwrap();
        assert!(!handle.is_retired());
        assert!(!handle.is_unloaded());
        handle.unload().unwrap();

        assert!(handle.is_retired());
        assert!(handle.is_unloaded());
        assert!(matches!(
            unsafe { handle.resolve::<Answer>("f") },
            Err(ReloadError::ModuleUnloaded { .. })
        ));
        assert!(matches!(f.call(), Err(ReloadError::ModuleUnloaded { .. })));
    }

    #[test]
    fn unload_waits_for_in_flight_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.fake", "f=one", 0);

        let handle = Arc::new(ModuleHandle::<FakeModule>::load(&path).unwrap());
        let f = unsafe { handle.resolve::<Answer>("f") }.unwrap();
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = mpsc::channel();

        let caller = {
            let finished = finished.clone();
            let handle = handle.clone();
            thread::spawn(move || {
                f.invoke(|f| {
                    started_tx.send(()).unwrap();
                    while !handle.is_retired() {
                        thread::yield_now();
                    }
                    thread::sleep(Duration::from_millis(50));
                    // Retired but still mapped while this call runs.
                    assert!(!handle.is_unloaded());
                    finished.store(true, Ordering::SeqCst);
                    f()
                })
            })
        };

        started_rx.recv().unwrap();
        assert_eq!(handle.calls_in_flight(), 1);
        handle.unload().unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert!(handle.is_unloaded());
        assert_eq!(handle.calls_in_flight(), 0);
        assert_eq!(caller.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn unload_wakes_when_the_last_of_several_calls_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_module(dir.path(), "m.fake", "f=one", 0);

        let handle = Arc::new(ModuleHandle::<FakeModule>::load(&path).unwrap());
        let f = unsafe { handle.resolve::<Answer>("f") }.unwrap();
        let (started_tx, started_rx) = mpsc::channel();

        let callers: Vec<_> = [10u64, 40, 80]
            .into_iter()
            .map(|millis| {
                let f = f.clone();
                let started_tx = started_tx.clone();
                thread::spawn(move || {
                    f.invoke(|f| {
                        started_tx.send(()).unwrap();
                        thread::sleep(Duration::from_millis(millis));
                        f()
                    })
                })
            })
            .collect();
        for _ in 0..callers.len() {
            started_rx.recv().unwrap();
        }

        handle.unload().unwrap();
        assert_eq!(handle.calls_in_flight(), 0);
        assert!(handle.is_unloaded());
        for caller in callers {
            assert_eq!(caller.join().unwrap().unwrap(), 1);
        }
    }
}

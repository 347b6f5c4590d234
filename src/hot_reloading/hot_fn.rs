use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::hot_reloading::events::Subscription;
use crate::hot_reloading::module::{CallGuard, NativeModule};
use crate::hot_reloading::symbol::{NativeFn, TypedSymbol};
use crate::{ReloadError, ReloadResult};

/// `None` once a reload dropped the export.
pub(crate) type Slot<F, M> = Arc<RwLock<Option<TypedSymbol<F, M>>>>;

/// A function exported by a hot reloaded module.
///
/// Obtained from [`LibReloader::get_fn`](super::LibReloader::get_fn). The
/// handle re-resolves its export every time the reloader swaps in a new version
/// of the module, so it can be kept for the whole life of the program and
/// always calls the newest code.
///
/// The signature `F` is fixed when the handle is created. Keeping the export's
/// signature stable across rebuilds is up to the module author.
pub struct HotFn<F: NativeFn, M: NativeModule = super::LibraryModule> {
    name: Arc<str>,
    slot: Slot<F, M>,
    _subscription: Subscription,
}

impl<F: NativeFn, M: NativeModule> HotFn<F, M> {
    pub(crate) fn new(name: Arc<str>, slot: Slot<F, M>, subscription: Subscription) -> Self {
        Self {
            name,
            slot,
            _subscription: subscription,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the active module still exports this function.
    pub fn is_bound(&self) -> bool {
        self.slot.read().is_some()
    }

    /// The resolution calls currently go to.
    pub fn current(&self) -> ReloadResult<TypedSymbol<F, M>> {
        self.slot
            .read()
            .clone()
            .ok_or_else(|| ReloadError::symbol_not_found(&*self.name))
    }

    /// Run `call` with the newest function pointer while its module is kept
    /// mapped.
    pub fn invoke<R>(&self, call: impl FnOnce(F) -> R) -> ReloadResult<R> {
        let (func, _guard) = self.enter()?;
        Ok(call(func))
    }

    fn enter(&self) -> ReloadResult<(F, CallGuard<M>)> {
        let mut symbol = self.current()?;
        loop {
            match symbol.enter() {
                Err(err @ ReloadError::ModuleUnloaded { .. }) => {
                    // A reload retired the module between reading the slot and
                    // entering it; the slot has been rebound by then.
                    let latest = self.current()?;
                    if Arc::ptr_eq(latest.module(), symbol.module()) {
                        return Err(err);
                    }
                    symbol = latest;
                }
                entered => return entered,
            }
        }
    }
}

impl<F: NativeFn, M: NativeModule> fmt::Debug for HotFn<F, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotFn")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::hot_reloading::hot_fn::HotFn;
use crate::hot_reloading::module::{CallGuard, ModuleHandle, NativeModule};
use crate::ReloadResult;

/// A native function pointer type that a resolved export can be bound to.
///
/// Implemented for `extern "C" fn` and `unsafe extern "C" fn` with up to six
/// arguments.
///
/// # Safety
///
/// Implementors must be plain function pointers, so that an export address can
/// be reinterpreted as `Self`.
pub unsafe trait NativeFn: Copy + Send + Sync + 'static {
    /// # Safety
    ///
    /// `address` must point to a function with exactly this signature.
    unsafe fn from_address(address: NonNull<c_void>) -> Self;
}

/// A typed export resolved from one particular [`ModuleHandle`].
///
/// It does not follow reloads; once its module is unloaded every call fails
/// with [`ReloadError::ModuleUnloaded`](crate::ReloadError::ModuleUnloaded).
pub struct TypedSymbol<F: NativeFn, M: NativeModule = super::LibraryModule> {
    name: Arc<str>,
    func: F,
    module: Arc<ModuleHandle<M>>,
}

impl<F: NativeFn, M: NativeModule> TypedSymbol<F, M> {
    pub(crate) fn new(name: &str, func: F, module: Arc<ModuleHandle<M>>) -> Self {
        Self {
            name: name.into(),
            func,
            module,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &Arc<ModuleHandle<M>> {
        &self.module
    }

    /// Run `call` with the function pointer while the module is kept mapped.
    pub fn invoke<R>(&self, call: impl FnOnce(F) -> R) -> ReloadResult<R> {
        let (func, _guard) = self.enter()?;
        Ok(call(func))
    }

    pub(crate) fn enter(&self) -> ReloadResult<(F, CallGuard<M>)> {
        let guard = self.module.enter()?;
        Ok((self.func, guard))
    }
}

impl<F: NativeFn, M: NativeModule> Clone for TypedSymbol<F, M> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: self.func,
            module: self.module.clone(),
        }
    }
}

impl<F: NativeFn, M: NativeModule> fmt::Debug for TypedSymbol<F, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSymbol")
            .field("name", &self.name)
            .field("module", &self.module.path())
            .finish()
    }
}

macro_rules! native_signatures {
    ($($arg:ident),*) => {
        unsafe impl<R: 'static $(, $arg: 'static)*> NativeFn for extern "C" fn($($arg),*) -> R {
            unsafe fn from_address(address: NonNull<c_void>) -> Self {
                unsafe { std::mem::transmute_copy::<*mut c_void, Self>(&address.as_ptr()) }
            }
        }

        unsafe impl<R: 'static $(, $arg: 'static)*> NativeFn for unsafe extern "C" fn($($arg),*) -> R {
            unsafe fn from_address(address: NonNull<c_void>) -> Self {
                unsafe { std::mem::transmute_copy::<*mut c_void, Self>(&address.as_ptr()) }
            }
        }

        impl<M: NativeModule, R: 'static $(, $arg: 'static)*> TypedSymbol<extern "C" fn($($arg),*) -> R, M> {
            #[allow(non_snake_case)]
            pub fn call(&self $(, $arg: $arg)*) -> ReloadResult<R> {
                self.invoke(|f| f($($arg),*))
            }
        }

        impl<M: NativeModule, R: 'static $(, $arg: 'static)*> HotFn<extern "C" fn($($arg),*) -> R, M> {
            #[allow(non_snake_case)]
            pub fn call(&self $(, $arg: $arg)*) -> ReloadResult<R> {
                self.invoke(|f| f($($arg),*))
            }
        }
    };
}

native_signatures!();
native_signatures!(A);
native_signatures!(A, B);
native_signatures!(A, B, C);
native_signatures!(A, B, C, D);
native_signatures!(A, B, C, D, E);
native_signatures!(A, B, C, D, E, G);

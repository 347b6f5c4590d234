//! Call into a native module that keeps being rebuilt while the process runs.
//!
//! [`LibReloader`] loads a shadow copy of the module, watches the original file
//! and swaps in every new build. Functions are requested once as [`HotFn`]s and
//! follow each swap on their own; calls already running in the old version
//! finish before it is unloaded.
//!
//! ```no_run
//! use shadow_reload::LibReloader;
//!
//! let lib = LibReloader::open("target/debug/libsample_module.so")?;
//! let answer = unsafe { lib.get_fn::<extern "C" fn() -> i32>("answer")? };
//! println!("{}", answer.call()?);
//! # Ok::<(), shadow_reload::ReloadError>(())
//! ```

pub extern crate anyhow;
pub extern crate glam;
pub extern crate libloading;
pub extern crate log;

pub mod abi;
pub mod error;
pub mod hot_reloading;
pub mod logger;

pub use crate::error::ReloadError;
pub use crate::hot_reloading::{
    HotFn, HotReloadConfig, LibReloader, LibraryModule, LoaderState, ModuleHandle, NativeFn,
    NativeModule, ReloadEvents, ReloadOutcome, Subscription, TypedSymbol,
};

pub type ReloadResult<V> = Result<V, ReloadError>;

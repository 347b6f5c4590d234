//! Values that cross the native call boundary by value.

use std::fmt;
use std::mem::MaybeUninit;

pub use glam::Vec3;

/// An optional value with a fixed C layout: a one byte discriminant
/// (`0` absent, `1` present) followed by the payload at its natural alignment.
///
/// When absent the payload bytes are unspecified and never read.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct NativeOption<T: Copy> {
    is_some: u8,
    value: MaybeUninit<T>,
}

impl<T: Copy> NativeOption<T> {
    pub const fn none() -> Self {
        Self {
            is_some: 0,
            value: MaybeUninit::uninit(),
        }
    }

    pub const fn some(value: T) -> Self {
        Self {
            is_some: 1,
            value: MaybeUninit::new(value),
        }
    }

    pub fn is_some(&self) -> bool {
        self.is_some == 1
    }

    pub fn into_option(self) -> Option<T> {
        if self.is_some() {
            Some(unsafe { self.value.assume_init() })
        } else {
            None
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        self.into_option().unwrap_or(default)
    }
}

impl<T: Copy> Default for NativeOption<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: Copy> From<Option<T>> for NativeOption<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::some(value),
            None => Self::none(),
        }
    }
}

impl<T: Copy> From<NativeOption<T>> for Option<T> {
    fn from(value: NativeOption<T>) -> Self {
        value.into_option()
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for NativeOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.into_option().fmt(f)
    }
}

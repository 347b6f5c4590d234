//! A module to hot reload with the `shadow-reload` demo. Edit, rebuild with
//! `cargo build -p sample-module` and the running demo picks up the change.

use std::ffi::{CStr, c_char};

use shadow_reload::abi::{NativeOption, Vec3};

#[unsafe(no_mangle)]
pub extern "C" fn maybe_parse(s: *const c_char) -> NativeOption<i32> {
    if s.is_null() {
        return NativeOption::none();
    }
    let c_str = unsafe { CStr::from_ptr(s) };

    c_str
        .to_str()
        .ok()
        .and_then(|text| text.parse().ok())
        .into()
}

#[unsafe(no_mangle)]
pub extern "C" fn maybe_pos() -> NativeOption<Vec3> {
    NativeOption::some(Vec3::new(1.0, 2.0, 3.0))
}

#[unsafe(no_mangle)]
pub extern "C" fn magnitude(v: Vec3) -> f32 {
    v.length()
}

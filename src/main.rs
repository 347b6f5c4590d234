use std::ffi::{c_char, CString};
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use shadow_reload::abi::{NativeOption, Vec3};
use shadow_reload::logger::log_init;
use shadow_reload::{HotReloadConfig, LibReloader};

type MaybeParse = extern "C" fn(*const c_char) -> NativeOption<i32>;
type MaybePos = extern "C" fn() -> NativeOption<Vec3>;
type Magnitude = extern "C" fn(Vec3) -> f32;

fn main() -> anyhow::Result<()> {
    let mut once = false;
    let mut lib = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--once" => once = true,
            _ => lib = Some(arg),
        }
    }
    let lib = lib.context("usage: shadow-reload [--once] <path to sample module>")?;

    log_init(Some(Path::new("trace.log")))?;

    let library: LibReloader = LibReloader::new(HotReloadConfig::new(&lib))?;
    let (maybe_parse, maybe_pos, magnitude) = unsafe {
        (
            library.get_fn::<MaybeParse>("maybe_parse")?,
            library.get_fn::<MaybePos>("maybe_pos")?,
            library.get_fn::<Magnitude>("magnitude")?,
        )
    };

    let inputs = [CString::new("123")?, CString::new("abc")?];
    loop {
        for input in &inputs {
            let number = maybe_parse.call(input.as_ptr())?.unwrap_or(-1);
            println!("{:?} -> {number}", input);
        }

        match maybe_pos.call()?.into_option() {
            Some(pos) => println!("{pos} has magnitude {}", magnitude.call(pos)?),
            None => println!("no position"),
        }

        if once {
            break;
        }
        thread::sleep(Duration::from_secs(1));
    }

    library.dispose();
    Ok(())
}

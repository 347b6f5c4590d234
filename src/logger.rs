use std::path::Path;

use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
#[cfg(debug_assertions)]
use simplelog::{CombinedLogger, SharedLogger, WriteLogger};

/// Debug builds log Debug to the terminal and, if `trace_file` is given,
/// everything down to Trace into that file. Release builds log Info to the
/// terminal only.
pub fn log_init(trace_file: Option<&Path>) -> anyhow::Result<()> {
    #[cfg(debug_assertions)]
    {
        let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
        loggers.push(TermLogger::new(
            LevelFilter::Debug,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
        if let Some(trace_file) = trace_file {
            loggers.push(WriteLogger::new(
                LevelFilter::Trace,
                Config::default(),
                std::fs::File::create(trace_file)?,
            ));
        }
        CombinedLogger::init(loggers)?;
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = trace_file;
        TermLogger::init(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )?;
    }

    Ok(())
}

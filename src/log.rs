// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Log setup, reference
//! https://docs.rs/log4rs
//!
//! Plugin diagnostics come in through [`plugin_log`] and are logged with
//! target `readback_plugin`.

use crate::error::{ReadbackError, Result};
use lazy_static::lazy_static;
use log::LevelFilter;
use std::ffi::{c_char, c_int, CStr};
use std::sync::Mutex;

#[cfg(feature = "log4rs")]
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

lazy_static! {
    static ref LOG_READY: Mutex<bool> = Mutex::new(false);
}

/// Init the log system once, later calls are ignored.
pub fn init_log(level: LevelFilter, file_path: &str) -> Result<()> {
    let mut ready = LOG_READY.lock().unwrap_or_else(|e| e.into_inner());
    if *ready {
        return Ok(());
    }
    #[cfg(feature = "log4rs")]
    {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "{d(%Y-%m-%d %H:%M:%S)} {l} {t} {m}{n}",
            )))
            .build(file_path)?;
        let config = Config::builder()
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(level)))
                    .build("logfile", Box::new(logfile)),
            )
            .build(Root::builder().appender("logfile").build(level))
            .map_err(|e| ReadbackError::Config(e.to_string()))?;
        log4rs::init_config(config).map_err(|e| ReadbackError::Config(e.to_string()))?;
    }
    #[cfg(not(feature = "log4rs"))]
    {
        let _ = file_path;
        log::set_max_level(level);
    }
    *ready = true;
    Ok(())
}

/// Sink handed to the plugin's debug log registration.
pub extern "C" fn plugin_log(message: *const c_char, value: c_int) {
    if message.is_null() {
        log::debug!(target: "readback_plugin", "({})", value);
        return;
    }
    // plugin passes a nul terminated string that lives for the call
    let msg = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    log::debug!(target: "readback_plugin", "{} {}", msg, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_log_accepts_null() {
        plugin_log(std::ptr::null(), 3);
        plugin_log(c"copy started".as_ptr(), 1);
    }
}

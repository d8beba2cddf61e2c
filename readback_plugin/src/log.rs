// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Diagnostic messages for the host.
//!
//! The host registers a `(const char*, int)` callback with
//! `__DLL__AddDebugLogMethod`, messages go to the `log` facade until then.
//! With a callback registered, messages are queued and handed over by
//! [`flush`] once the caller has released the plugin lock, so the callback
//! may call back into the plugin.

use lazy_static::lazy_static;
use std::ffi::{c_char, c_int, CString};
use std::mem;
use std::sync::{Mutex, PoisonError};

pub type DebugLogFn = extern "C" fn(message: *const c_char, value: c_int);

lazy_static! {
    static ref DEBUG_LOG: Mutex<Option<DebugLogFn>> = Mutex::new(None);
    static ref QUEUED: Mutex<Vec<(CString, i32)>> = Mutex::new(Vec::new());
}

pub fn set_callback(cb: Option<DebugLogFn>) {
    *DEBUG_LOG.lock().unwrap_or_else(PoisonError::into_inner) = cb;
    if cb.is_none() {
        QUEUED.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
    emit("AddedDebugLog Callback", 1);
    flush();
}

pub fn emit(msg: &str, value: i32) {
    if DEBUG_LOG
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .is_none()
    {
        log::debug!("{}:{}", msg, value);
        return;
    }
    // interior nul never appears in our own messages
    if let Ok(s) = CString::new(msg) {
        QUEUED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((s, value));
    }
}

/// hand queued messages to the callback, call without holding the plugin
pub fn flush() {
    let queued = mem::take(&mut *QUEUED.lock().unwrap_or_else(PoisonError::into_inner));
    if queued.is_empty() {
        return;
    }
    let Some(f) = *DEBUG_LOG.lock().unwrap_or_else(PoisonError::into_inner) else {
        return;
    };
    for (msg, value) in queued {
        f(msg.as_ptr(), value);
    }
}

pub fn queued() -> usize {
    QUEUED.lock().unwrap_or_else(PoisonError::into_inner).len()
}

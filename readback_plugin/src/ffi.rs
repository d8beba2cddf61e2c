// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! C ABI of the plugin.
//!
//! Symbol names follow the AsyncGPUReadbackPlugin interface so existing
//! engine bindings load this library unchanged. Main thread calls and
//! render thread events share one process wide [`Plugin`] behind a mutex,
//! render events carry nothing but the event id. Debug log messages raised
//! under the mutex reach the host callback after it is unlocked.

// the exported names are fixed by the engine side bindings
#![allow(non_snake_case)]

use crate::device::GpuDevice;
use crate::log::{self, DebugLogFn};
use crate::plugin::{EventId, Plugin, TaskKind};
use lazy_static::lazy_static;
use std::ffi::{c_int, c_uint, c_void};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Render thread callback as issued by the host, `void (*)(int)`.
pub type RenderEventFn = extern "C" fn(event_id: c_int);

lazy_static! {
    static ref PLUGIN: Mutex<Plugin> = Mutex::new(Plugin::new());
}

fn plugin() -> MutexGuard<'static, Plugin> {
    PLUGIN.lock().unwrap_or_else(PoisonError::into_inner)
}

/// run `f` against the process wide plugin, then flush its log messages
pub fn with_plugin<R>(f: impl FnOnce(&mut Plugin) -> R) -> R {
    let r = f(&mut plugin());
    log::flush();
    r
}

/// graphics device initialize event, returns the previous device
pub fn install_device(device: Box<dyn GpuDevice>) -> Option<Box<dyn GpuDevice>> {
    with_plugin(|p| p.install_device(device))
}

/// graphics device shutdown event
pub fn uninstall_device() -> Option<Box<dyn GpuDevice>> {
    with_plugin(|p| p.uninstall_device())
}

#[no_mangle]
pub extern "C" fn __DLL__AddDebugLogMethod(callback: Option<DebugLogFn>) {
    log::set_callback(callback);
}

#[no_mangle]
pub extern "C" fn isCompatible() -> bool {
    let (renderer, ok) = {
        let p = plugin();
        (p.renderer(), p.is_compatible())
    };
    log::emit("isCompatible", renderer as i32);
    log::flush();
    ok
}

#[no_mangle]
pub extern "C" fn isSSBOCompatible() -> bool {
    with_plugin(|p| p.is_buffer_compatible())
}

#[no_mangle]
pub extern "C" fn makeTextureRequest_mainThread(texture: c_uint, miplevel: c_int) -> c_int {
    with_plugin(|p| p.make_texture_request(texture, miplevel))
}

#[no_mangle]
pub extern "C" fn makeSSBORequest_mainThread(ssbo: c_uint, size: c_uint, offset: c_uint) -> c_int {
    with_plugin(|p| p.make_buffer_request(ssbo, size as usize, offset as usize))
}

#[no_mangle]
pub extern "C" fn makeTextureRequest_renderThread(event_id: c_int) {
    with_plugin(|p| p.issue_texture_read(event_id));
}

#[no_mangle]
pub extern "C" fn makeSSBORequest_renderThread(event_id: c_int) {
    with_plugin(|p| p.issue_buffer_read(event_id));
}

#[no_mangle]
pub extern "C" fn update_renderThread(event_id: c_int) {
    with_plugin(|p| p.update(event_id));
}

#[no_mangle]
pub extern "C" fn getfunction_makeTextureRequest_renderThread() -> RenderEventFn {
    makeTextureRequest_renderThread
}

#[no_mangle]
pub extern "C" fn getfunction_makeSSBORequest_renderThread() -> RenderEventFn {
    makeSSBORequest_renderThread
}

#[no_mangle]
pub extern "C" fn getfunction_update_renderThread() -> RenderEventFn {
    update_renderThread
}

unsafe fn write_data(
    buffer: *mut *mut c_void,
    length: *mut usize,
    fetch: impl FnOnce(&mut Plugin) -> Option<(*const u8, usize)>,
) {
    if buffer.is_null() || length.is_null() {
        return;
    }
    if let Some((ptr, len)) = with_plugin(fetch) {
        *buffer = ptr as *mut c_void;
        *length = len;
    }
}

/// Writes pointer and length of the finished front transfer, leaves both
/// untouched when nothing is ready.
///
/// # Safety
/// `buffer` and `length` must be null or valid for writes. The memory
/// written to `buffer` lives until `popRequest` or `dispose` for the event.
#[no_mangle]
pub unsafe extern "C" fn getTextureData_mainThread(
    event_id: c_int,
    buffer: *mut *mut c_void,
    length: *mut usize,
) {
    write_data(buffer, length, |p| p.texture_data(event_id));
}

/// Storage buffer counterpart of [`getTextureData_mainThread`].
///
/// # Safety
/// Same contract as [`getTextureData_mainThread`].
#[no_mangle]
pub unsafe extern "C" fn getSSBOData_mainThread(
    event_id: c_int,
    buffer: *mut *mut c_void,
    length: *mut usize,
) {
    write_data(buffer, length, |p| p.buffer_data(event_id));
}

#[no_mangle]
pub extern "C" fn isRequestDone(event_id: c_int) -> bool {
    with_plugin(|p| p.is_request_done(event_id))
}

#[no_mangle]
pub extern "C" fn isRequestError(event_id: c_int) -> bool {
    with_plugin(|p| p.is_request_error(event_id))
}

#[no_mangle]
pub extern "C" fn isRequestReaded(event_id: c_int) -> bool {
    with_plugin(|p| p.is_request_read(event_id))
}

#[no_mangle]
pub extern "C" fn popRequest(event_id: c_int) -> bool {
    with_plugin(|p| p.pop_request(event_id))
}

#[no_mangle]
pub extern "C" fn dispose(event_id: c_int) {
    with_plugin(|p| p.dispose(event_id));
}

/// texture or buffer event, `None` once disposed
pub fn event_kind(event_id: EventId) -> Option<TaskKind> {
    with_plugin(|p| p.task_kind(event_id))
}

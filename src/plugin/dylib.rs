// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Plugin shared library loaded at runtime.
//!
//! Every export is resolved up front, a library missing one of them is
//! rejected at load time. The library is kept open for as long as this
//! value lives.

use super::{EventId, PluginApi, PluginLogFn};
use crate::error::Result;
use crate::host::RenderEventFn;
use libloading::Library;
use log::info;
use std::ffi::{c_int, c_uint, c_void, OsStr};
use std::ptr;

type BoolFn = unsafe extern "C" fn() -> bool;
type EventBoolFn = unsafe extern "C" fn(c_int) -> bool;
type EventFn = unsafe extern "C" fn(c_int);
type GetEventFn = unsafe extern "C" fn() -> RenderEventFn;
type DataFn = unsafe extern "C" fn(c_int, *mut *mut c_void, *mut usize);
type LogFn = unsafe extern "C" fn(Option<PluginLogFn>);

pub struct DylibPlugin {
    is_compatible: BoolFn,
    is_ssbo_compatible: BoolFn,
    make_texture_request: unsafe extern "C" fn(c_uint, c_int) -> c_int,
    make_ssbo_request: unsafe extern "C" fn(c_uint, c_uint, c_uint) -> c_int,
    texture_request_event: GetEventFn,
    ssbo_request_event: GetEventFn,
    update_event: GetEventFn,
    is_request_done: EventBoolFn,
    is_request_error: EventBoolFn,
    is_request_read: EventBoolFn,
    pop_request: EventBoolFn,
    texture_data: DataFn,
    ssbo_data: DataFn,
    dispose: EventFn,
    add_debug_log: LogFn,
    // must outlive every function pointer above
    _lib: Library,
}

unsafe fn sym<T: Copy>(lib: &Library, name: &[u8]) -> Result<T> {
    Ok(*lib.get::<T>(name)?)
}

impl DylibPlugin {
    /// load the library at `path`
    pub fn open<P: AsRef<OsStr>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let lib = unsafe { Library::new(path)? };
        let plugin = unsafe {
            Self {
                is_compatible: sym(&lib, b"isCompatible\0")?,
                is_ssbo_compatible: sym(&lib, b"isSSBOCompatible\0")?,
                make_texture_request: sym(&lib, b"makeTextureRequest_mainThread\0")?,
                make_ssbo_request: sym(&lib, b"makeSSBORequest_mainThread\0")?,
                texture_request_event: sym(
                    &lib,
                    b"getfunction_makeTextureRequest_renderThread\0",
                )?,
                ssbo_request_event: sym(&lib, b"getfunction_makeSSBORequest_renderThread\0")?,
                update_event: sym(&lib, b"getfunction_update_renderThread\0")?,
                is_request_done: sym(&lib, b"isRequestDone\0")?,
                is_request_error: sym(&lib, b"isRequestError\0")?,
                is_request_read: sym(&lib, b"isRequestReaded\0")?,
                pop_request: sym(&lib, b"popRequest\0")?,
                texture_data: sym(&lib, b"getTextureData_mainThread\0")?,
                ssbo_data: sym(&lib, b"getSSBOData_mainThread\0")?,
                dispose: sym(&lib, b"dispose\0")?,
                add_debug_log: sym(&lib, b"__DLL__AddDebugLogMethod\0")?,
                _lib: lib,
            }
        };
        info!("loaded readback plugin {:?}", path);
        Ok(plugin)
    }

    /// load by library name, `readback_plugin` -> `libreadback_plugin.so`
    pub fn open_named(name: &str) -> Result<Self> {
        Self::open(libloading::library_filename(name))
    }

    fn front_data(f: DataFn, event_id: EventId) -> Option<(*const u8, usize)> {
        let mut buf: *mut c_void = ptr::null_mut();
        let mut len = 0usize;
        unsafe { f(event_id, &mut buf, &mut len) };
        if buf.is_null() {
            return None;
        }
        Some((buf as *const u8, len))
    }
}

impl PluginApi for DylibPlugin {
    fn is_compatible(&self) -> bool {
        unsafe { (self.is_compatible)() }
    }

    fn is_ssbo_compatible(&self) -> bool {
        unsafe { (self.is_ssbo_compatible)() }
    }

    fn make_texture_request(&self, texture: u32, mip_level: i32) -> EventId {
        unsafe { (self.make_texture_request)(texture, mip_level) }
    }

    fn make_ssbo_request(&self, buffer: u32, size: u32, offset: u32) -> EventId {
        unsafe { (self.make_ssbo_request)(buffer, size, offset) }
    }

    fn texture_request_event(&self) -> RenderEventFn {
        unsafe { (self.texture_request_event)() }
    }

    fn ssbo_request_event(&self) -> RenderEventFn {
        unsafe { (self.ssbo_request_event)() }
    }

    fn update_event(&self) -> RenderEventFn {
        unsafe { (self.update_event)() }
    }

    fn is_request_done(&self, event_id: EventId) -> bool {
        unsafe { (self.is_request_done)(event_id) }
    }

    fn is_request_error(&self, event_id: EventId) -> bool {
        unsafe { (self.is_request_error)(event_id) }
    }

    fn is_request_read(&self, event_id: EventId) -> bool {
        unsafe { (self.is_request_read)(event_id) }
    }

    fn pop_request(&self, event_id: EventId) -> bool {
        unsafe { (self.pop_request)(event_id) }
    }

    fn texture_data(&self, event_id: EventId) -> Option<(*const u8, usize)> {
        Self::front_data(self.texture_data, event_id)
    }

    fn ssbo_data(&self, event_id: EventId) -> Option<(*const u8, usize)> {
        Self::front_data(self.ssbo_data, event_id)
    }

    fn dispose(&self, event_id: EventId) {
        unsafe { (self.dispose)(event_id) }
    }

    fn set_log_callback(&self, callback: Option<PluginLogFn>) {
        unsafe { (self.add_debug_log)(callback) }
    }
}

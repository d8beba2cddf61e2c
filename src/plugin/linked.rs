// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! readback_plugin linked into the process, calls go through the same
//! exported C functions a dynamic load would use.

use super::{EventId, PluginApi, PluginLogFn};
use crate::host::RenderEventFn;
use readback_plugin::ffi;
use std::ffi::c_void;
use std::ptr;

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedPlugin;

type DataFn = unsafe extern "C" fn(EventId, *mut *mut c_void, *mut usize);

fn front_data(f: DataFn, event_id: EventId) -> Option<(*const u8, usize)> {
    let mut buf: *mut c_void = ptr::null_mut();
    let mut len = 0usize;
    unsafe { f(event_id, &mut buf, &mut len) };
    if buf.is_null() {
        return None;
    }
    Some((buf as *const u8, len))
}

impl PluginApi for LinkedPlugin {
    fn is_compatible(&self) -> bool {
        ffi::isCompatible()
    }

    fn is_ssbo_compatible(&self) -> bool {
        ffi::isSSBOCompatible()
    }

    fn make_texture_request(&self, texture: u32, mip_level: i32) -> EventId {
        ffi::makeTextureRequest_mainThread(texture, mip_level)
    }

    fn make_ssbo_request(&self, buffer: u32, size: u32, offset: u32) -> EventId {
        ffi::makeSSBORequest_mainThread(buffer, size, offset)
    }

    fn texture_request_event(&self) -> RenderEventFn {
        ffi::getfunction_makeTextureRequest_renderThread()
    }

    fn ssbo_request_event(&self) -> RenderEventFn {
        ffi::getfunction_makeSSBORequest_renderThread()
    }

    fn update_event(&self) -> RenderEventFn {
        ffi::getfunction_update_renderThread()
    }

    fn is_request_done(&self, event_id: EventId) -> bool {
        ffi::isRequestDone(event_id)
    }

    fn is_request_error(&self, event_id: EventId) -> bool {
        ffi::isRequestError(event_id)
    }

    fn is_request_read(&self, event_id: EventId) -> bool {
        ffi::isRequestReaded(event_id)
    }

    fn pop_request(&self, event_id: EventId) -> bool {
        ffi::popRequest(event_id)
    }

    fn texture_data(&self, event_id: EventId) -> Option<(*const u8, usize)> {
        front_data(ffi::getTextureData_mainThread, event_id)
    }

    fn ssbo_data(&self, event_id: EventId) -> Option<(*const u8, usize)> {
        front_data(ffi::getSSBOData_mainThread, event_id)
    }

    fn dispose(&self, event_id: EventId) {
        ffi::dispose(event_id);
    }

    fn set_log_callback(&self, callback: Option<PluginLogFn>) {
        ffi::__DLL__AddDebugLogMethod(callback);
    }
}

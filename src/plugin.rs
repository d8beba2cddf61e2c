// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Native plugin boundary.
//!
//! [`PluginApi`] is the fixed table of calls the plugin exports, a
//! [`PluginTicket`] is the capability a plugin backed request holds: its
//! event id plus the table. Dropping the ticket disposes the event, so the
//! plugin releases its side exactly once.
//!
//! Two ways to reach a plugin:
//! - [`LinkedPlugin`] (feature `linked-plugin`), readback_plugin linked in
//! - [`DylibPlugin`] (feature `dylib`), shared library loaded at runtime

use crate::error::{ReadbackError, Result};
use crate::host::RenderEventFn;
use crate::source::{ReadbackSource, SourceKind};
use log::debug;
use std::ffi::{c_char, c_int};
use std::rc::Rc;

#[cfg(feature = "dylib")]
mod dylib;
#[cfg(feature = "linked-plugin")]
mod linked;

#[cfg(feature = "dylib")]
pub use dylib::DylibPlugin;
#[cfg(feature = "linked-plugin")]
pub use linked::LinkedPlugin;

/// Plugin event id, negative means the plugin refused the request.
pub type EventId = i32;

/// Diagnostic sink the plugin calls with a message and a value.
pub type PluginLogFn = extern "C" fn(message: *const c_char, value: c_int);

pub trait PluginApi {
    fn is_compatible(&self) -> bool;
    fn is_ssbo_compatible(&self) -> bool;

    fn make_texture_request(&self, texture: u32, mip_level: i32) -> EventId;
    fn make_ssbo_request(&self, buffer: u32, size: u32, offset: u32) -> EventId;

    /// render callback that starts a texture copy
    fn texture_request_event(&self) -> RenderEventFn;
    /// render callback that fences a storage buffer
    fn ssbo_request_event(&self) -> RenderEventFn;
    /// render callback that polls fences
    fn update_event(&self) -> RenderEventFn;

    fn is_request_done(&self, event_id: EventId) -> bool;
    fn is_request_error(&self, event_id: EventId) -> bool;
    fn is_request_read(&self, event_id: EventId) -> bool;
    fn pop_request(&self, event_id: EventId) -> bool;

    /// Pointer and length of the finished front transfer. The memory is the
    /// plugin's and stays put until `pop_request` or `dispose`.
    fn texture_data(&self, event_id: EventId) -> Option<(*const u8, usize)>;
    fn ssbo_data(&self, event_id: EventId) -> Option<(*const u8, usize)>;

    fn dispose(&self, event_id: EventId);

    fn set_log_callback(&self, callback: Option<PluginLogFn>);
}

/// A registered plugin event. Disposed on drop.
pub struct PluginTicket {
    event_id: EventId,
    kind: SourceKind,
    api: Rc<dyn PluginApi>,
}

impl PluginTicket {
    /// register `source` with the plugin
    pub fn register(api: Rc<dyn PluginApi>, source: &ReadbackSource) -> Result<Self> {
        let event_id = match source {
            ReadbackSource::Texture { texture, mip_level } => {
                let name = gl_name(texture.native)?;
                let mip = i32::try_from(*mip_level)
                    .map_err(|_| ReadbackError::Plugin(format!("mip level {} too large", mip_level)))?;
                api.make_texture_request(name, mip)
            }
            ReadbackSource::Buffer {
                buffer,
                offset,
                size,
            } => {
                let name = gl_name(buffer.native)?;
                let narrow = |v: usize| {
                    u32::try_from(v)
                        .map_err(|_| ReadbackError::Plugin(format!("buffer range {} too large", v)))
                };
                api.make_ssbo_request(name, narrow(*size)?, narrow(*offset)?)
            }
        };
        if event_id < 0 {
            return Err(ReadbackError::Plugin(format!(
                "plugin refused the {} request ({})",
                source.kind(),
                event_id
            )));
        }
        debug!("plugin {} event {}", source.kind(), event_id);
        Ok(Self {
            event_id,
            kind: source.kind(),
            api,
        })
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    /// render callback that starts one copy for this event
    pub fn copy_event(&self) -> RenderEventFn {
        match self.kind {
            SourceKind::Texture => self.api.texture_request_event(),
            SourceKind::Buffer => self.api.ssbo_request_event(),
        }
    }

    pub fn update_event(&self) -> RenderEventFn {
        self.api.update_event()
    }

    pub fn is_done(&self) -> bool {
        self.api.is_request_done(self.event_id)
    }

    pub fn is_error(&self) -> bool {
        self.api.is_request_error(self.event_id)
    }

    pub fn is_read(&self) -> bool {
        self.api.is_request_read(self.event_id)
    }

    /// Drops the front transfer. Takes `&mut self` so no slice from
    /// [`PluginTicket::data`] can be alive across it.
    pub fn pop(&mut self) -> bool {
        self.api.pop_request(self.event_id)
    }

    /// borrowed view of the finished front transfer, marks it read
    pub fn data(&self) -> Option<&[u8]> {
        let (ptr, len) = match self.kind {
            SourceKind::Texture => self.api.texture_data(self.event_id)?,
            SourceKind::Buffer => self.api.ssbo_data(self.event_id)?,
        };
        if ptr.is_null() {
            return None;
        }
        // plugin memory stays valid until pop or dispose, both need this
        // ticket mutably or by value
        Some(unsafe { std::slice::from_raw_parts(ptr, len) })
    }
}

impl Drop for PluginTicket {
    fn drop(&mut self) {
        debug!("dispose plugin event {}", self.event_id);
        self.api.dispose(self.event_id);
    }
}

fn gl_name(native: u64) -> Result<u32> {
    u32::try_from(native)
        .map_err(|_| ReadbackError::Plugin(format!("native handle {:#x} is not a gl name", native)))
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scriptable plugin for unit tests.
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    extern "C" fn nop(_id: c_int) {}

    #[derive(Default)]
    pub struct FakeState {
        pub compatible: bool,
        pub ssbo_compatible: bool,
        pub next_id: EventId,
        pub done: HashMap<EventId, bool>,
        pub error: HashMap<EventId, bool>,
        pub read: HashMap<EventId, bool>,
        pub data: HashMap<EventId, Vec<u8>>,
        pub pops: HashMap<EventId, u32>,
        pub disposed: Vec<EventId>,
        pub log_callback_set: bool,
    }

    #[derive(Default)]
    pub struct FakePlugin {
        pub state: RefCell<FakeState>,
    }

    impl FakePlugin {
        pub fn compatible() -> Rc<Self> {
            let p = Self::default();
            {
                let mut s = p.state.borrow_mut();
                s.compatible = true;
                s.ssbo_compatible = true;
                s.next_id = 1;
            }
            Rc::new(p)
        }

        pub fn finish(&self, id: EventId, data: &[u8]) {
            let mut s = self.state.borrow_mut();
            s.done.insert(id, true);
            s.read.insert(id, false);
            s.data.insert(id, data.to_vec());
        }

        pub fn fail(&self, id: EventId) {
            let mut s = self.state.borrow_mut();
            s.done.insert(id, true);
            s.error.insert(id, true);
        }
    }

    impl PluginApi for FakePlugin {
        fn is_compatible(&self) -> bool {
            self.state.borrow().compatible
        }
        fn is_ssbo_compatible(&self) -> bool {
            self.state.borrow().ssbo_compatible
        }
        fn make_texture_request(&self, _texture: u32, _mip_level: i32) -> EventId {
            let mut s = self.state.borrow_mut();
            let id = s.next_id;
            s.next_id += 1;
            id
        }
        fn make_ssbo_request(&self, _buffer: u32, _size: u32, _offset: u32) -> EventId {
            let mut s = self.state.borrow_mut();
            let id = s.next_id;
            s.next_id += 1;
            id
        }
        fn texture_request_event(&self) -> RenderEventFn {
            nop
        }
        fn ssbo_request_event(&self) -> RenderEventFn {
            nop
        }
        fn update_event(&self) -> RenderEventFn {
            nop
        }
        fn is_request_done(&self, id: EventId) -> bool {
            self.state.borrow().done.get(&id).copied().unwrap_or(false)
        }
        fn is_request_error(&self, id: EventId) -> bool {
            self.state.borrow().error.get(&id).copied().unwrap_or(false)
        }
        fn is_request_read(&self, id: EventId) -> bool {
            self.state.borrow().read.get(&id).copied().unwrap_or(false)
        }
        fn pop_request(&self, id: EventId) -> bool {
            let mut s = self.state.borrow_mut();
            *s.pops.entry(id).or_default() += 1;
            s.done.insert(id, false);
            s.read.insert(id, false);
            true
        }
        fn texture_data(&self, id: EventId) -> Option<(*const u8, usize)> {
            self.ssbo_data(id)
        }
        fn ssbo_data(&self, id: EventId) -> Option<(*const u8, usize)> {
            let mut s = self.state.borrow_mut();
            if !s.done.get(&id).copied().unwrap_or(false) {
                return None;
            }
            s.read.insert(id, true);
            let d = s.data.get(&id)?;
            Some((d.as_ptr(), d.len()))
        }
        fn dispose(&self, id: EventId) {
            self.state.borrow_mut().disposed.push(id);
        }
        fn set_log_callback(&self, callback: Option<PluginLogFn>) {
            self.state.borrow_mut().log_callback_set = callback.is_some();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakePlugin;
    use super::*;
    use crate::source::{BufferHandle, TextureFormat, TextureHandle};

    #[test]
    fn test_ticket_disposes_once() {
        let fake = FakePlugin::compatible();
        let api: Rc<dyn PluginApi> = fake.clone();
        let tex = TextureHandle::new(7, 2, 2, TextureFormat::Rgba32);
        let ticket = PluginTicket::register(api, &ReadbackSource::texture(tex)).unwrap();
        assert_eq!(ticket.event_id(), 1);
        drop(ticket);
        assert_eq!(fake.state.borrow().disposed, vec![1]);
    }

    #[test]
    fn test_ticket_data_view() {
        let fake = FakePlugin::compatible();
        let api: Rc<dyn PluginApi> = fake.clone();
        let buf = BufferHandle::new(3, 2, 4);
        let mut ticket = PluginTicket::register(api, &ReadbackSource::buffer(buf)).unwrap();
        assert!(ticket.data().is_none());
        fake.finish(ticket.event_id(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(ticket.is_done() && !ticket.is_read());
        assert_eq!(ticket.data().map(|d| d.len()), Some(8));
        assert!(ticket.is_read());
        assert!(ticket.pop());
        assert!(!ticket.is_done());
    }

    #[test]
    fn test_handles_must_be_gl_names() {
        let api: Rc<dyn PluginApi> = FakePlugin::compatible();
        let tex = TextureHandle::new(u64::MAX, 2, 2, TextureFormat::Rgba32);
        let r = PluginTicket::register(api, &ReadbackSource::texture(tex));
        assert!(matches!(r, Err(ReadbackError::Plugin(_))));
    }

    #[test]
    fn test_negative_event_id_is_refused() {
        let fake = FakePlugin::compatible();
        fake.state.borrow_mut().next_id = -1;
        let api: Rc<dyn PluginApi> = fake.clone();
        let buf = BufferHandle::new(3, 1, 4);
        let r = PluginTicket::register(api, &ReadbackSource::buffer(buf));
        assert!(matches!(r, Err(ReadbackError::Plugin(_))));
        assert!(fake.state.borrow().disposed.is_empty());
    }
}

// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Host graphics boundary.
//!
//! A host is whatever owns the graphics context: it may offer its own
//! async readback (then requests simply wrap its request objects), and it
//! runs plugin render callbacks on its render thread. Work can also be
//! recorded into a [`CommandList`] which the host executes later, once or
//! every frame, the way an engine runs a camera's command buffer.
//!
//! Implementations:
//! - [`headless::HeadlessHost`], memory backed, drives everything from
//!   `maintain` one frame at a time
//! - `wgpu::WgpuHost` (feature `wgpu`), staging buffers and `map_async`

use crate::error::Result;
use crate::plugin::EventId;
use crate::source::ReadbackSource;
use std::ffi::c_int;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub mod headless;
#[cfg(feature = "wgpu")]
pub mod wgpu;

/// A plugin callback run on the render thread, `void (*)(int)`.
pub type RenderEventFn = extern "C" fn(event_id: c_int);

#[derive(Debug, Clone, Copy)]
pub enum Command {
    /// run a plugin render callback
    PluginEvent { event: RenderEventFn, event_id: EventId },
    /// start the host readback registered under `ticket`
    HostReadback { ticket: u64 },
}

/// Recorded graphics work, executed by the host after recording.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    name: String,
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            commands: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push(&mut self, cmd: Command) {
        self.commands.push(cmd);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

pub trait GraphicsHost {
    /// host has its own async readback
    fn supports_async_readback(&self) -> bool;

    fn supports_compute_shaders(&self) -> bool;

    /// Starts a host readback of `source`. With a command list the copy is
    /// recorded into it and runs each time the list executes.
    fn request_readback(
        &mut self,
        source: &ReadbackSource,
        list: Option<&mut CommandList>,
    ) -> Result<Box<dyn HostRequest>>;

    /// schedule a plugin render callback on the render thread
    fn issue_plugin_event(&mut self, event: RenderEventFn, event_id: EventId);

    /// once per frame, before requests are polled
    fn maintain(&mut self) {}
}

/// A readback owned by the host.
pub trait HostRequest {
    /// pick up progress made by the host since the last call
    fn refresh(&mut self);

    /// ask the host to advance this request now
    fn update(&mut self) {}

    fn done(&self) -> bool;

    fn has_error(&self) -> bool;

    /// bytes of the most recent finished copy
    fn data(&self) -> Option<&[u8]>;
}

#[derive(Default)]
struct SlotState {
    done: bool,
    error: bool,
    data: Option<Vec<u8>>,
}

/// Completion cell shared between a host and its [`SlotRequest`].
#[derive(Clone, Default)]
pub struct ReadbackSlot(Arc<Mutex<SlotState>>);

impl ReadbackSlot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn complete(&self, data: Vec<u8>) {
        let mut s = self.state();
        s.done = true;
        s.data = Some(data);
    }

    pub fn fail(&self) {
        let mut s = self.state();
        s.done = true;
        s.error = true;
    }

    pub fn downgrade(&self) -> WeakSlot {
        WeakSlot(Arc::downgrade(&self.0))
    }
}

/// Host side reference, dead once the request is dropped.
#[derive(Clone)]
pub struct WeakSlot(Weak<Mutex<SlotState>>);

impl WeakSlot {
    pub fn upgrade(&self) -> Option<ReadbackSlot> {
        self.0.upgrade().map(ReadbackSlot)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// [`HostRequest`] over a [`ReadbackSlot`], shared by the hosts here.
pub struct SlotRequest {
    slot: ReadbackSlot,
    done: bool,
    error: bool,
    data: Option<Vec<u8>>,
}

impl SlotRequest {
    pub fn new(slot: ReadbackSlot) -> Self {
        Self {
            slot,
            done: false,
            error: false,
            data: None,
        }
    }
}

impl HostRequest for SlotRequest {
    fn refresh(&mut self) {
        let mut s = self.slot.state();
        self.done |= s.done;
        self.error |= s.error;
        if let Some(d) = s.data.take() {
            self.data = Some(d);
        }
    }

    fn done(&self) -> bool {
        self.done
    }

    fn has_error(&self) -> bool {
        self.error
    }

    fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

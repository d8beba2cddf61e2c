// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Memory backed host without a gpu.
//!
//! Every `maintain` renders one frame: plugin events issued since the last
//! frame run first, in issue order, then submitted command lists run
//! (attached lists every frame, submitted ones once), then host readbacks
//! in flight age by one frame. A host readback copies its source when the
//! copy runs and completes `latency` frames later.

use crate::error::{ReadbackError, Result};
use crate::host::{
    Command, CommandList, GraphicsHost, HostRequest, ReadbackSlot, RenderEventFn, SlotRequest,
    WeakSlot,
};
use crate::plugin::EventId;
use crate::source::{BufferHandle, ReadbackSource, TextureFormat, TextureHandle};
use log::{debug, warn};
use std::collections::HashMap;

struct InFlight {
    slot: WeakSlot,
    data: Option<Vec<u8>>,
    frames_left: u32,
}

struct Ticket {
    source: ReadbackSource,
    slot: WeakSlot,
}

pub struct HeadlessHost {
    native_readback: bool,
    compute: bool,
    latency: u32,
    fail_next: bool,
    frame: u64,
    next_handle: u64,
    next_ticket: u64,
    textures: HashMap<u64, Vec<u8>>,
    buffers: HashMap<u64, Vec<u8>>,
    events: Vec<(RenderEventFn, EventId)>,
    attached: Vec<CommandList>,
    submitted: Vec<CommandList>,
    tickets: HashMap<u64, Ticket>,
    in_flight: Vec<InFlight>,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl HeadlessHost {
    pub fn new(native_readback: bool, compute: bool) -> Self {
        Self {
            native_readback,
            compute,
            latency: 0,
            fail_next: false,
            frame: 0,
            // keep clear of small gl names used by plugin devices
            next_handle: 0x1_0000,
            next_ticket: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            events: vec![],
            attached: vec![],
            submitted: vec![],
            tickets: HashMap::new(),
            in_flight: vec![],
        }
    }

    /// frames between a host copy and its completion
    pub fn set_latency(&mut self, frames: u32) {
        self.latency = frames;
    }

    /// the next host copy completes with an error
    pub fn fail_next_readback(&mut self) {
        self.fail_next = true;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        data: &[u8],
    ) -> TextureHandle {
        let native = self.next_handle;
        self.next_handle += 1;
        self.textures.insert(native, data.to_vec());
        TextureHandle::new(native, width, height, format)
    }

    pub fn create_buffer(&mut self, count: u32, stride: u32, data: &[u8]) -> BufferHandle {
        let native = self.next_handle;
        self.next_handle += 1;
        self.buffers.insert(native, data.to_vec());
        BufferHandle::new(native, count, stride)
    }

    /// register memory under a native handle owned elsewhere
    pub fn insert_texture(&mut self, native: u64, data: &[u8]) {
        self.textures.insert(native, data.to_vec());
    }

    pub fn insert_buffer(&mut self, native: u64, data: &[u8]) {
        self.buffers.insert(native, data.to_vec());
    }

    pub fn write_texture(&mut self, native: u64, data: &[u8]) -> Result<()> {
        let t = self
            .textures
            .get_mut(&native)
            .ok_or_else(|| ReadbackError::Host(format!("unknown texture {:#x}", native)))?;
        t.clear();
        t.extend_from_slice(data);
        Ok(())
    }

    pub fn write_buffer(&mut self, native: u64, offset: usize, data: &[u8]) -> Result<()> {
        let b = self
            .buffers
            .get_mut(&native)
            .ok_or_else(|| ReadbackError::Host(format!("unknown buffer {:#x}", native)))?;
        let dst = b
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| ReadbackError::Host(format!("write past end of buffer {:#x}", native)))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// run `list` on every frame from now on
    pub fn attach(&mut self, list: CommandList) {
        self.attached.push(list);
    }

    pub fn detach(&mut self, name: &str) -> Option<CommandList> {
        let i = self.attached.iter().position(|l| l.name() == name)?;
        Some(self.attached.remove(i))
    }

    /// run `list` once on the next frame
    pub fn submit(&mut self, list: CommandList) {
        self.submitted.push(list);
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn render_frame(&mut self) {
        self.frame += 1;
        for (event, id) in std::mem::take(&mut self.events) {
            event(id);
        }
        let submitted = std::mem::take(&mut self.submitted);
        let attached = std::mem::take(&mut self.attached);
        for list in attached.iter().chain(submitted.iter()) {
            self.execute(list);
        }
        self.attached = attached;
        self.age_in_flight();
    }

    fn execute(&mut self, list: &CommandList) {
        for cmd in list.commands() {
            match *cmd {
                Command::PluginEvent { event, event_id } => event(event_id),
                Command::HostReadback { ticket } => {
                    let Some(t) = self.tickets.get(&ticket) else {
                        continue;
                    };
                    if !t.slot.is_alive() {
                        self.tickets.remove(&ticket);
                        continue;
                    }
                    let (source, slot) = (t.source, t.slot.clone());
                    self.start_copy(&source, slot);
                }
            }
        }
    }

    fn snapshot(&self, source: &ReadbackSource) -> Option<Vec<u8>> {
        match source {
            ReadbackSource::Texture { texture, mip_level } => {
                if *mip_level != 0 {
                    return None;
                }
                let data = self.textures.get(&texture.native)?;
                let mut out = vec![0u8; texture.byte_size(0)];
                let n = out.len().min(data.len());
                out[..n].copy_from_slice(&data[..n]);
                Some(out)
            }
            ReadbackSource::Buffer {
                buffer,
                offset,
                size,
            } => {
                let data = self.buffers.get(&buffer.native)?;
                let end = offset.checked_add(*size)?;
                data.get(*offset..end).map(|s| s.to_vec())
            }
        }
    }

    fn start_copy(&mut self, source: &ReadbackSource, slot: WeakSlot) {
        let data = if std::mem::take(&mut self.fail_next) {
            None
        } else {
            self.snapshot(source)
        };
        if data.is_none() {
            warn!("headless readback of {:?} failed", source);
        }
        self.in_flight.push(InFlight {
            slot,
            data,
            frames_left: self.latency,
        });
    }

    fn age_in_flight(&mut self) {
        let mut waiting = Vec::with_capacity(self.in_flight.len());
        for mut f in self.in_flight.drain(..) {
            if f.frames_left > 0 {
                f.frames_left -= 1;
                waiting.push(f);
                continue;
            }
            let Some(slot) = f.slot.upgrade() else {
                continue;
            };
            match f.data {
                Some(d) => slot.complete(d),
                None => slot.fail(),
            }
        }
        self.in_flight = waiting;
    }
}

impl GraphicsHost for HeadlessHost {
    fn supports_async_readback(&self) -> bool {
        self.native_readback
    }

    fn supports_compute_shaders(&self) -> bool {
        self.compute
    }

    fn request_readback(
        &mut self,
        source: &ReadbackSource,
        list: Option<&mut CommandList>,
    ) -> Result<Box<dyn HostRequest>> {
        if !self.native_readback {
            return Err(ReadbackError::Host("async readback is not available".into()));
        }
        let slot = ReadbackSlot::default();
        match list {
            Some(list) => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                self.tickets.insert(
                    ticket,
                    Ticket {
                        source: *source,
                        slot: slot.downgrade(),
                    },
                );
                list.push(Command::HostReadback { ticket });
                debug!("host readback ticket {} recorded into {}", ticket, list.name());
            }
            None => self.start_copy(source, slot.downgrade()),
        }
        Ok(Box::new(SlotRequest::new(slot)))
    }

    fn issue_plugin_event(&mut self, event: RenderEventFn, event_id: EventId) {
        self.events.push((event, event_id));
    }

    fn maintain(&mut self) {
        self.render_frame();
    }
}

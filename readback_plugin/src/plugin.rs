// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Event table of the readback plugin.
//!
//! The main thread registers a source and gets an event id back. Every time
//! the host runs the copy event for that id on the render thread a new
//! transfer is queued behind the previous ones, so a command list executed
//! each frame keeps one transfer per frame in flight. Update events advance
//! the first unread transfer; status and data queries always look at the
//! front of the queue.
//!
//! Transfer memory is only released by `pop_request` and `dispose`, both
//! main thread calls, so a pointer handed out by `texture_data` or
//! `buffer_data` stays valid until the main thread lets go of it.
//!
//! Device objects are only touched from render thread calls. Reads still in
//! flight when the main thread drops a transfer are parked in `retired` and
//! released by the next render thread call.

use crate::device::{DeviceError, FenceStatus, GpuDevice, ReadToken, Renderer};
use crate::format::layout_for;
use crate::log::emit;
use log::{trace, warn};
use std::collections::{HashMap, VecDeque};

pub type EventId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Texture { texture: u32, mip_level: i32 },
    Buffer { buffer: u32, size: usize, offset: usize },
}

#[derive(Default)]
struct Transfer {
    read: Option<ReadToken>,
    data: Box<[u8]>,
    initialized: bool,
    done: bool,
    error: bool,
    read_back: bool,
}

impl Transfer {
    fn failed() -> Self {
        Self {
            initialized: true,
            done: true,
            error: true,
            ..Default::default()
        }
    }
}

struct Task {
    kind: TaskKind,
    transfers: VecDeque<Transfer>,
}

pub struct Plugin {
    next_event_id: EventId,
    tasks: HashMap<EventId, Task>,
    device: Option<Box<dyn GpuDevice>>,
    retired: Vec<ReadToken>,
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin {
    pub fn new() -> Self {
        Self {
            next_event_id: 1,
            tasks: HashMap::new(),
            device: None,
            retired: Vec::new(),
        }
    }

    /// graphics device initialize event
    pub fn install_device(&mut self, device: Box<dyn GpuDevice>) -> Option<Box<dyn GpuDevice>> {
        let old = self.uninstall_device();
        self.device = Some(device);
        old
    }

    /// graphics device shutdown event, in-flight transfers fail
    pub fn uninstall_device(&mut self) -> Option<Box<dyn GpuDevice>> {
        self.release_retired();
        let mut device = self.device.take()?;
        for task in self.tasks.values_mut() {
            for t in task.transfers.iter_mut() {
                if let Some(tok) = t.read.take() {
                    device.release_read(tok);
                    t.done = true;
                    t.error = true;
                }
            }
        }
        Some(device)
    }

    pub fn renderer(&self) -> Renderer {
        self.device.as_ref().map_or(Renderer::Null, |d| d.renderer())
    }

    pub fn is_compatible(&self) -> bool {
        matches!(
            self.renderer(),
            Renderer::OpenGLES20 | Renderer::OpenGLES30
        )
    }

    pub fn is_buffer_compatible(&self) -> bool {
        self.renderer() == Renderer::OpenGLES30
    }

    fn alloc_event(&mut self, kind: TaskKind) -> EventId {
        let id = self.next_event_id;
        let Some(next) = id.checked_add(1) else {
            emit("event ids exhausted", id);
            return -1;
        };
        self.next_event_id = next;
        self.tasks.insert(
            id,
            Task {
                kind,
                transfers: VecDeque::new(),
            },
        );
        id
    }

    pub fn make_texture_request(&mut self, texture: u32, mip_level: i32) -> EventId {
        let id = self.alloc_event(TaskKind::Texture { texture, mip_level });
        trace!("texture request {} -> event {}", texture, id);
        id
    }

    pub fn make_buffer_request(&mut self, buffer: u32, size: usize, offset: usize) -> EventId {
        let id = self.alloc_event(TaskKind::Buffer {
            buffer,
            size,
            offset,
        });
        trace!("buffer request {} -> event {}", buffer, id);
        id
    }

    pub fn task_kind(&self, event_id: EventId) -> Option<TaskKind> {
        self.tasks.get(&event_id).map(|t| t.kind)
    }

    /// render thread: release reads dropped by the main thread
    fn release_retired(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        match self.device.as_deref_mut() {
            Some(dev) => {
                for tok in self.retired.drain(..) {
                    dev.release_read(tok);
                }
            }
            // tokens of a device that is gone are meaningless
            None => self.retired.clear(),
        }
    }

    /// render thread: queue a texture transfer for `event_id`
    pub fn issue_texture_read(&mut self, event_id: EventId) {
        self.release_retired();
        let Some(task) = self.tasks.get_mut(&event_id) else {
            emit("issue_texture_read: unknown event", event_id);
            return;
        };
        let TaskKind::Texture { texture, mip_level } = task.kind else {
            emit("issue_texture_read: not a texture event", event_id);
            return;
        };
        let transfer = match self.device.as_deref_mut() {
            Some(dev) => start_texture_read(dev, texture, mip_level).unwrap_or_else(|e| {
                emit(&format!("issue_texture_read: {} (texture {})", e, texture), event_id);
                Transfer::failed()
            }),
            None => {
                emit("issue_texture_read: no device", event_id);
                Transfer::failed()
            }
        };
        task.transfers.push_back(transfer);
    }

    /// render thread: fence a storage buffer for `event_id`
    pub fn issue_buffer_read(&mut self, event_id: EventId) {
        self.release_retired();
        let Some(task) = self.tasks.get_mut(&event_id) else {
            emit("issue_buffer_read: unknown event", event_id);
            return;
        };
        let TaskKind::Buffer {
            buffer,
            size,
            offset,
        } = task.kind
        else {
            emit("issue_buffer_read: not a buffer event", event_id);
            return;
        };
        let transfer = match self.device.as_deref_mut() {
            Some(dev) => match dev.begin_buffer_read(buffer, offset, size) {
                Ok(tok) => Transfer {
                    read: Some(tok),
                    data: vec![0u8; size].into_boxed_slice(),
                    initialized: true,
                    ..Default::default()
                },
                Err(e) => {
                    emit(&format!("issue_buffer_read: {}", e), event_id);
                    Transfer::failed()
                }
            },
            None => {
                emit("issue_buffer_read: no device", event_id);
                Transfer::failed()
            }
        };
        task.transfers.push_back(transfer);
    }

    /// render thread: advance the first unread transfer of `event_id`
    pub fn update(&mut self, event_id: EventId) {
        self.release_retired();
        let Plugin { tasks, device, .. } = self;
        let (Some(task), Some(dev)) = (tasks.get_mut(&event_id), device.as_deref_mut()) else {
            return;
        };
        for t in task.transfers.iter_mut() {
            if t.read_back {
                continue;
            }
            if !t.initialized || t.done {
                break;
            }
            let Some(tok) = t.read else {
                t.error = true;
                t.done = true;
                break;
            };
            match dev.poll_read(tok) {
                FenceStatus::Unsignaled => {}
                FenceStatus::Lost => {
                    warn!("readback event {} lost its fence", event_id);
                    dev.release_read(tok);
                    t.read = None;
                    t.error = true;
                    t.done = true;
                }
                FenceStatus::Signaled => {
                    if let Err(e) = dev.finish_read(tok, &mut t.data) {
                        emit(&format!("update: {}", e), event_id);
                        t.error = true;
                    }
                    dev.release_read(tok);
                    t.read = None;
                    t.done = true;
                }
            }
            break;
        }
    }

    fn front(&self, event_id: EventId) -> Option<&Transfer> {
        self.tasks.get(&event_id)?.transfers.front()
    }

    fn front_data(&mut self, event_id: EventId, texture: bool) -> Option<(*const u8, usize)> {
        let task = self.tasks.get_mut(&event_id)?;
        if matches!(task.kind, TaskKind::Texture { .. }) != texture {
            return None;
        }
        let t = task.transfers.front_mut()?;
        if !t.done || t.error {
            return None;
        }
        t.read_back = true;
        Some((t.data.as_ptr(), t.data.len()))
    }

    /// pointer and length of the front texture transfer, marks it read
    pub fn texture_data(&mut self, event_id: EventId) -> Option<(*const u8, usize)> {
        self.front_data(event_id, true)
    }

    /// pointer and length of the front buffer transfer, marks it read
    pub fn buffer_data(&mut self, event_id: EventId) -> Option<(*const u8, usize)> {
        self.front_data(event_id, false)
    }

    pub fn is_request_done(&self, event_id: EventId) -> bool {
        self.front(event_id).is_some_and(|t| t.done)
    }

    pub fn is_request_error(&self, event_id: EventId) -> bool {
        self.front(event_id).is_some_and(|t| t.error)
    }

    pub fn is_request_read(&self, event_id: EventId) -> bool {
        self.front(event_id).is_some_and(|t| t.read_back)
    }

    /// drops the front transfer, true if there was one
    pub fn pop_request(&mut self, event_id: EventId) -> bool {
        let Some(t) = self
            .tasks
            .get_mut(&event_id)
            .and_then(|task| task.transfers.pop_front())
        else {
            return false;
        };
        self.retired.extend(t.read);
        true
    }

    pub fn dispose(&mut self, event_id: EventId) {
        let Some(task) = self.tasks.remove(&event_id) else {
            return;
        };
        self.retired
            .extend(task.transfers.into_iter().filter_map(|t| t.read));
        emit("dispose", event_id);
    }

    /// in-flight reads waiting for a render thread call to release them
    pub fn retired_reads(&self) -> usize {
        self.retired.len()
    }

    pub fn pending_transfers(&self, event_id: EventId) -> usize {
        self.tasks.get(&event_id).map_or(0, |t| t.transfers.len())
    }

    pub fn live_events(&self) -> usize {
        self.tasks.len()
    }
}

fn start_texture_read(
    dev: &mut dyn GpuDevice,
    texture: u32,
    mip_level: i32,
) -> Result<Transfer, DeviceError> {
    let level = dev.texture_level(texture, mip_level)?;
    let size = level.byte_size();
    let layout = match layout_for(level.internal_format) {
        Some(l) if size > 0 => l,
        _ => {
            emit(
                &format!(
                    "unreadable texture {} format {:#x} {}x{}x{}",
                    texture, level.internal_format, level.width, level.height, level.depth
                ),
                1,
            );
            return Ok(Transfer::failed());
        }
    };
    let tok = dev.begin_texture_read(texture, mip_level, &level, layout)?;
    Ok(Transfer {
        read: Some(tok),
        data: vec![0u8; size].into_boxed_slice(),
        initialized: true,
        ..Default::default()
    })
}

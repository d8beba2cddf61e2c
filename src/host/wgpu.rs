// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! wgpu host, native async readback on vulkan / metal / dx12 / gl.
//!
//! A copy goes into a MAP_READ staging buffer, `map_async` is requested
//! right away and `maintain` polls the device without blocking. Mapped
//! texture rows are unpadded from COPY_BYTES_PER_ROW_ALIGNMENT before the
//! bytes are handed to the request.

use crate::error::{ReadbackError, Result};
use crate::host::{
    Command, CommandList, GraphicsHost, HostRequest, ReadbackSlot, RenderEventFn, SlotRequest,
    WeakSlot,
};
use crate::plugin::EventId;
use crate::source::{BufferHandle, ReadbackSource, TextureFormat, TextureHandle};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const MAP_PENDING: u8 = 0;
const MAP_OK: u8 = 1;
const MAP_FAILED: u8 = 2;

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        // argb has no wgpu counterpart, same texel size
        TextureFormat::Rgba32 | TextureFormat::Argb32 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra32 => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::RHalf => wgpu::TextureFormat::R16Float,
        TextureFormat::RgbaHalf => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::RFloat => wgpu::TextureFormat::R32Float,
        TextureFormat::RgFloat => wgpu::TextureFormat::Rg32Float,
        TextureFormat::RgbaFloat => wgpu::TextureFormat::Rgba32Float,
    }
}

struct RowLayout {
    padded: usize,
    unpadded: usize,
    height: usize,
}

struct InFlight {
    staging: wgpu::Buffer,
    status: Arc<AtomicU8>,
    slot: WeakSlot,
    rows: Option<RowLayout>,
}

pub struct WgpuHost {
    device: wgpu::Device,
    queue: wgpu::Queue,
    compute: bool,
    next_handle: u64,
    next_ticket: u64,
    textures: HashMap<u64, (wgpu::Texture, TextureHandle)>,
    buffers: HashMap<u64, wgpu::Buffer>,
    tickets: HashMap<u64, (ReadbackSource, WeakSlot)>,
    events: Vec<(RenderEventFn, EventId)>,
    in_flight: Vec<InFlight>,
}

impl WgpuHost {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, compute: bool) -> Self {
        Self {
            device,
            queue,
            compute,
            next_handle: 1,
            next_ticket: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            tickets: HashMap::new(),
            events: vec![],
            in_flight: vec![],
        }
    }

    /// device without a surface, blocks on adapter and device creation
    pub fn headless() -> Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .map_err(|e| ReadbackError::Host(format!("no adapter: {}", e)))?;
            let compute = adapter
                .get_downlevel_capabilities()
                .flags
                .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);
            info!("wgpu readback host on {:?}", adapter.get_info().backend);
            let (device, queue) = adapter
                .request_device(&wgpu::DeviceDescriptor {
                    label: Some("readback"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: wgpu::MemoryHints::default(),
                    trace: wgpu::Trace::default(),
                })
                .await
                .map_err(|e| ReadbackError::Host(format!("request_device: {}", e)))?;
            Ok(Self::new(device, queue, compute))
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn alloc_handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    /// make an existing texture readable, it needs COPY_SRC usage
    pub fn register_texture(&mut self, texture: wgpu::Texture, format: TextureFormat) -> TextureHandle {
        let native = self.alloc_handle();
        let handle = TextureHandle::new(native, texture.width(), texture.height(), format);
        self.textures.insert(native, (texture, handle));
        handle
    }

    /// make an existing buffer readable, it needs COPY_SRC usage
    pub fn register_buffer(&mut self, buffer: wgpu::Buffer, count: u32, stride: u32) -> BufferHandle {
        let native = self.alloc_handle();
        self.buffers.insert(native, buffer);
        BufferHandle::new(native, count, stride)
    }

    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        data: &[u8],
    ) -> TextureHandle {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("readback texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let handle = self.register_texture(texture, format);
        self.write_texture(&handle, data);
        handle
    }

    pub fn write_texture(&mut self, handle: &TextureHandle, data: &[u8]) {
        let Some((texture, _)) = self.textures.get(&handle.native) else {
            warn!("write to unknown texture {:#x}", handle.native);
            return;
        };
        self.queue.write_texture(
            texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(handle.width * handle.format.bytes_per_pixel() as u32),
                rows_per_image: Some(handle.height),
            },
            texture.size(),
        );
    }

    /// storage buffer, size is rounded up to 4 bytes
    pub fn create_buffer(&mut self, count: u32, stride: u32, data: &[u8]) -> BufferHandle {
        let size = (count as u64 * stride as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let mut padded = data.to_vec();
        padded.resize(size as usize, 0);
        self.queue.write_buffer(&buffer, 0, &padded);
        self.register_buffer(buffer, count, stride)
    }

    /// run a recorded list now
    pub fn execute(&mut self, list: &CommandList) {
        for cmd in list.commands() {
            match *cmd {
                Command::PluginEvent { event, event_id } => event(event_id),
                Command::HostReadback { ticket } => {
                    let Some((source, slot)) = self.tickets.get(&ticket).cloned() else {
                        continue;
                    };
                    if !slot.is_alive() {
                        self.tickets.remove(&ticket);
                        continue;
                    }
                    self.start_copy(&source, slot);
                }
            }
        }
    }

    fn encode_copy(&self, source: &ReadbackSource) -> Result<(wgpu::Buffer, Option<RowLayout>)> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback copy"),
            });
        let staged = match source {
            ReadbackSource::Texture { texture, mip_level } => {
                let (tex, _) = self.textures.get(&texture.native).ok_or_else(|| {
                    ReadbackError::Host(format!("unknown texture {:#x}", texture.native))
                })?;
                if *mip_level >= tex.mip_level_count() {
                    return Err(ReadbackError::Host(format!(
                        "texture {:#x} has {} mip levels, asked for {}",
                        texture.native,
                        tex.mip_level_count(),
                        mip_level
                    )));
                }
                let (w, h) = texture.level_size(*mip_level);
                let unpadded = w * texture.format.bytes_per_pixel() as u32;
                let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
                let padded = unpadded.div_ceil(align) * align;
                let staging = self.staging(padded as u64 * h as u64);
                encoder.copy_texture_to_buffer(
                    wgpu::TexelCopyTextureInfo {
                        texture: tex,
                        mip_level: *mip_level,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::TexelCopyBufferInfo {
                        buffer: &staging,
                        layout: wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(padded),
                            rows_per_image: Some(h),
                        },
                    },
                    wgpu::Extent3d {
                        width: w,
                        height: h,
                        depth_or_array_layers: 1,
                    },
                );
                let rows = RowLayout {
                    padded: padded as usize,
                    unpadded: unpadded as usize,
                    height: h as usize,
                };
                (staging, Some(rows))
            }
            ReadbackSource::Buffer {
                buffer,
                offset,
                size,
            } => {
                let src = self.buffers.get(&buffer.native).ok_or_else(|| {
                    ReadbackError::Host(format!("unknown buffer {:#x}", buffer.native))
                })?;
                let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
                if *size == 0 {
                    return Err(ReadbackError::Host(format!(
                        "empty range of buffer {:#x}",
                        buffer.native
                    )));
                }
                if offset % align != 0 || size % align != 0 {
                    return Err(ReadbackError::Host(format!(
                        "buffer range {}+{} is not {} byte aligned",
                        offset, size, align
                    )));
                }
                let in_bounds = offset
                    .checked_add(*size)
                    .is_some_and(|end| end as u64 <= src.size());
                if !in_bounds {
                    return Err(ReadbackError::Host(format!(
                        "buffer range {}+{} is outside buffer {:#x} of {} bytes",
                        offset,
                        size,
                        buffer.native,
                        src.size()
                    )));
                }
                let staging = self.staging(*size as u64);
                encoder.copy_buffer_to_buffer(src, *offset as u64, &staging, 0, *size as u64);
                (staging, None)
            }
        };
        self.queue.submit(Some(encoder.finish()));
        Ok(staged)
    }

    fn staging(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }

    fn start_copy(&mut self, source: &ReadbackSource, slot: WeakSlot) {
        let (staging, rows) = match self.encode_copy(source) {
            Ok(s) => s,
            Err(e) => {
                warn!("wgpu readback: {}", e);
                if let Some(s) = slot.upgrade() {
                    s.fail();
                }
                return;
            }
        };
        let status = Arc::new(AtomicU8::new(MAP_PENDING));
        let st = status.clone();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |r| {
            st.store(if r.is_ok() { MAP_OK } else { MAP_FAILED }, Ordering::Release);
        });
        self.in_flight.push(InFlight {
            staging,
            status,
            slot,
            rows,
        });
    }

    fn collect(f: &InFlight) -> Vec<u8> {
        let view = f.staging.slice(..).get_mapped_range();
        let out = match &f.rows {
            Some(rows) => {
                let mut out = Vec::with_capacity(rows.unpadded * rows.height);
                for y in 0..rows.height {
                    let start = y * rows.padded;
                    out.extend_from_slice(&view[start..start + rows.unpadded]);
                }
                out
            }
            None => view.to_vec(),
        };
        drop(view);
        f.staging.unmap();
        out
    }
}

impl GraphicsHost for WgpuHost {
    fn supports_async_readback(&self) -> bool {
        true
    }

    fn supports_compute_shaders(&self) -> bool {
        self.compute
    }

    fn request_readback(
        &mut self,
        source: &ReadbackSource,
        list: Option<&mut CommandList>,
    ) -> Result<Box<dyn HostRequest>> {
        let slot = ReadbackSlot::default();
        match list {
            Some(list) => {
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                self.tickets.insert(ticket, (*source, slot.downgrade()));
                list.push(Command::HostReadback { ticket });
                debug!("wgpu readback ticket {} recorded into {}", ticket, list.name());
            }
            None => self.start_copy(source, slot.downgrade()),
        }
        Ok(Box::new(SlotRequest::new(slot)))
    }

    fn issue_plugin_event(&mut self, event: RenderEventFn, event_id: EventId) {
        self.events.push((event, event_id));
    }

    fn maintain(&mut self) {
        for (event, id) in std::mem::take(&mut self.events) {
            event(id);
        }
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            warn!("wgpu poll: {}", e);
        }
        self.in_flight.retain(|f| match f.status.load(Ordering::Acquire) {
            MAP_PENDING => true,
            MAP_OK => {
                let data = Self::collect(f);
                if let Some(slot) = f.slot.upgrade() {
                    slot.complete(data);
                }
                false
            }
            _ => {
                if let Some(slot) = f.slot.upgrade() {
                    slot.fail();
                }
                false
            }
        });
    }
}

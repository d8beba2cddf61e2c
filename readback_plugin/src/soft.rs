// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! In-memory graphics device.
//!
//! Textures and buffers live in host memory, fences signal after a
//! configurable number of polls. Used for headless runs and tests, it
//! behaves like the gl device from the plugin's point of view:
//! texture levels are packed when the read is issued, storage buffers
//! are read when the fence has signaled.

use crate::device::{DeviceError, FenceStatus, GpuDevice, ReadToken, Renderer, TextureLevel};
use crate::format::{pixel_size, PixelLayout};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct SoftTexture {
    internal_format: u32,
    width: i32,
    height: i32,
    data: Vec<u8>,
}

enum SoftPending {
    Texture(Vec<u8>),
    Buffer {
        buffer: u32,
        offset: usize,
        size: usize,
    },
}

struct SoftRead {
    pending: SoftPending,
    polls_left: u32,
    lost: bool,
}

struct SoftState {
    renderer: Renderer,
    next_name: u32,
    next_token: u64,
    latency: u32,
    fail_next: bool,
    textures: HashMap<u32, SoftTexture>,
    buffers: HashMap<u32, Vec<u8>>,
    reads: HashMap<u64, SoftRead>,
}

/// Cloneable handle, clones share the same objects.
#[derive(Clone)]
pub struct SoftDevice {
    inner: Arc<Mutex<SoftState>>,
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new(Renderer::OpenGLES30)
    }
}

impl SoftDevice {
    pub fn new(renderer: Renderer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SoftState {
                renderer,
                next_name: 1,
                next_token: 1,
                latency: 0,
                fail_next: false,
                textures: HashMap::new(),
                buffers: HashMap::new(),
                reads: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SoftState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// number of unsignaled polls before a new fence signals
    pub fn set_latency(&self, polls: u32) {
        self.state().latency = polls;
    }

    /// the next fence created is reported lost
    pub fn fail_next_fence(&self) {
        self.state().fail_next = true;
    }

    /// creates a single level texture, data is tightly packed texels
    pub fn create_texture(&self, internal_format: u32, width: i32, height: i32, data: &[u8]) -> u32 {
        let mut s = self.state();
        let name = s.next_name;
        s.next_name += 1;
        s.textures.insert(
            name,
            SoftTexture {
                internal_format,
                width,
                height,
                data: data.to_vec(),
            },
        );
        name
    }

    pub fn write_texture(&self, texture: u32, data: &[u8]) -> Result<(), DeviceError> {
        let mut s = self.state();
        let t = s
            .textures
            .get_mut(&texture)
            .ok_or(DeviceError::UnknownTexture(texture))?;
        t.data.clear();
        t.data.extend_from_slice(data);
        Ok(())
    }

    pub fn create_buffer(&self, data: &[u8]) -> u32 {
        let mut s = self.state();
        let name = s.next_name;
        s.next_name += 1;
        s.buffers.insert(name, data.to_vec());
        name
    }

    pub fn write_buffer(&self, buffer: u32, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        let mut s = self.state();
        let b = s
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        let end = offset + data.len();
        if end > b.len() {
            return Err(DeviceError::OutOfRange {
                buffer,
                offset,
                size: data.len(),
            });
        }
        b[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// reads not yet released
    pub fn live_reads(&self) -> usize {
        self.state().reads.len()
    }

    fn push_read(s: &mut SoftState, pending: SoftPending) -> ReadToken {
        let token = s.next_token;
        s.next_token += 1;
        let lost = std::mem::take(&mut s.fail_next);
        s.reads.insert(
            token,
            SoftRead {
                pending,
                polls_left: s.latency,
                lost,
            },
        );
        ReadToken(token)
    }
}

impl GpuDevice for SoftDevice {
    fn renderer(&self) -> Renderer {
        self.state().renderer
    }

    fn texture_level(&mut self, texture: u32, mip_level: i32) -> Result<TextureLevel, DeviceError> {
        let s = self.state();
        let t = s
            .textures
            .get(&texture)
            .ok_or(DeviceError::UnknownTexture(texture))?;
        // only level 0 is stored, other levels read back as empty like an
        // incomplete mip chain
        if mip_level != 0 {
            return Ok(TextureLevel {
                internal_format: t.internal_format,
                ..Default::default()
            });
        }
        Ok(TextureLevel {
            internal_format: t.internal_format,
            width: t.width,
            height: t.height,
            depth: 1,
        })
    }

    fn begin_texture_read(
        &mut self,
        texture: u32,
        _mip_level: i32,
        level: &TextureLevel,
        layout: PixelLayout,
    ) -> Result<ReadToken, DeviceError> {
        let mut s = self.state();
        let t = s
            .textures
            .get(&texture)
            .ok_or(DeviceError::UnknownTexture(texture))?;
        debug_assert_eq!(layout.pixel_size, pixel_size(t.internal_format));
        let mut packed = vec![0u8; level.byte_size()];
        let n = packed.len().min(t.data.len());
        packed[..n].copy_from_slice(&t.data[..n]);
        Ok(Self::push_read(&mut s, SoftPending::Texture(packed)))
    }

    fn begin_buffer_read(
        &mut self,
        buffer: u32,
        offset: usize,
        size: usize,
    ) -> Result<ReadToken, DeviceError> {
        let mut s = self.state();
        let len = s
            .buffers
            .get(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?
            .len();
        if offset + size > len {
            return Err(DeviceError::OutOfRange {
                buffer,
                offset,
                size,
            });
        }
        Ok(Self::push_read(
            &mut s,
            SoftPending::Buffer {
                buffer,
                offset,
                size,
            },
        ))
    }

    fn poll_read(&mut self, token: ReadToken) -> FenceStatus {
        let mut s = self.state();
        let Some(r) = s.reads.get_mut(&token.0) else {
            return FenceStatus::Lost;
        };
        if r.lost {
            return FenceStatus::Lost;
        }
        if r.polls_left == 0 {
            return FenceStatus::Signaled;
        }
        r.polls_left -= 1;
        FenceStatus::Unsignaled
    }

    fn finish_read(&mut self, token: ReadToken, dst: &mut [u8]) -> Result<(), DeviceError> {
        let s = self.state();
        let r = s.reads.get(&token.0).ok_or(DeviceError::UnknownRead(token))?;
        let src = match &r.pending {
            SoftPending::Texture(packed) => packed.as_slice(),
            SoftPending::Buffer {
                buffer,
                offset,
                size,
            } => {
                let b = s
                    .buffers
                    .get(buffer)
                    .ok_or(DeviceError::UnknownBuffer(*buffer))?;
                b.get(*offset..*offset + *size)
                    .ok_or(DeviceError::OutOfRange {
                        buffer: *buffer,
                        offset: *offset,
                        size: *size,
                    })?
            }
        };
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    fn release_read(&mut self, token: ReadToken) {
        self.state().reads.remove(&token.0);
    }
}

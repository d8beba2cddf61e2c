// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! GpuDevice is the render thread side of the plugin.
//!
//! A read is started with one of the `begin_*` calls, which puts a fence
//! after the copy and hands back a [`ReadToken`]. The token is polled from
//! later render events until the fence signals, then the bytes are copied
//! out and the gpu objects behind the token are released.
//!
//! Two implementations are provided:
//! - `GlesDevice` (feature `gles`), fbo + pixel pack buffer + fence on a
//!   current OpenGL ES context
//! - `SoftDevice`, an in-memory device with a configurable fence latency

use crate::format::{pixel_size, PixelLayout};
use thiserror::Error;

/// Graphics api the host is running, mirrors the engine renderer enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Renderer {
    #[default]
    Null,
    OpenGLES20,
    OpenGLES30,
    OpenGLCore,
    Other,
}

/// Parameters of one texture mip level as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureLevel {
    pub internal_format: u32,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
}

impl TextureLevel {
    pub fn byte_size(&self) -> usize {
        let dim = |v: i32| usize::try_from(v).unwrap_or(0);
        dim(self.depth) * dim(self.width) * dim(self.height) * pixel_size(self.internal_format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    Unsignaled,
    /// fence can no longer be queried, the read is lost
    Lost,
}

/// Opaque handle to the gpu objects kept alive by one in-flight read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadToken(pub u64);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no graphics device installed")]
    NoDevice,
    #[error("unknown texture {0}")]
    UnknownTexture(u32),
    #[error("unknown buffer {0}")]
    UnknownBuffer(u32),
    #[error("unknown read {0:?}")]
    UnknownRead(ReadToken),
    #[error("range {offset}+{size} is outside buffer {buffer}")]
    OutOfRange {
        buffer: u32,
        offset: usize,
        size: usize,
    },
    #[error("gl: {0}")]
    Gl(String),
}

pub trait GpuDevice: Send {
    fn renderer(&self) -> Renderer;

    /// query internal format and size of a texture level
    fn texture_level(&mut self, texture: u32, mip_level: i32) -> Result<TextureLevel, DeviceError>;

    /// start packing a texture level into a staging buffer and fence it
    fn begin_texture_read(
        &mut self,
        texture: u32,
        mip_level: i32,
        level: &TextureLevel,
        layout: PixelLayout,
    ) -> Result<ReadToken, DeviceError>;

    /// fence a storage buffer, its range is mapped when the fence signals
    fn begin_buffer_read(
        &mut self,
        buffer: u32,
        offset: usize,
        size: usize,
    ) -> Result<ReadToken, DeviceError>;

    fn poll_read(&mut self, token: ReadToken) -> FenceStatus;

    /// copy the bytes of a signaled read into `dst`
    fn finish_read(&mut self, token: ReadToken, dst: &mut [u8]) -> Result<(), DeviceError>;

    /// delete fbo, pbo and fence of a read, finished or not
    fn release_read(&mut self, token: ReadToken);
}

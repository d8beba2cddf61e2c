// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! What a readback reads from: one texture mip level, or a byte range of a
//! gpu buffer. Handles carry the host's native object (a gl name on gles)
//! plus the size information the engine keeps next to it.

use std::fmt;

/// Texel formats readback understands, names follow the engine's
/// texture formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    R8,
    #[default]
    Rgba32,
    Argb32,
    Bgra32,
    RHalf,
    RgbaHalf,
    RFloat,
    RgFloat,
    RgbaFloat,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::RHalf => 2,
            TextureFormat::Rgba32 | TextureFormat::Argb32 | TextureFormat::Bgra32 => 4,
            TextureFormat::RFloat => 4,
            TextureFormat::RgbaHalf | TextureFormat::RgFloat => 8,
            TextureFormat::RgbaFloat => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    /// native texture pointer, the texture name on gl
    pub native: u64,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureHandle {
    pub fn new(native: u64, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            native,
            width,
            height,
            format,
        }
    }

    /// size of one mip level, each level halves and stops at 1
    pub fn level_size(&self, mip_level: u32) -> (u32, u32) {
        let shrink = |v: u32| v.checked_shr(mip_level).unwrap_or(0).max(1);
        (shrink(self.width), shrink(self.height))
    }

    pub fn byte_size(&self, mip_level: u32) -> usize {
        let (w, h) = self.level_size(mip_level);
        w as usize * h as usize * self.format.bytes_per_pixel()
    }
}

/// A structured buffer of `count` elements, `stride` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub native: u64,
    pub count: u32,
    pub stride: u32,
}

impl BufferHandle {
    pub fn new(native: u64, count: u32, stride: u32) -> Self {
        Self {
            native,
            count,
            stride,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.count as usize * self.stride as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Texture,
    Buffer,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Texture => write!(f, "texture"),
            SourceKind::Buffer => write!(f, "buffer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackSource {
    Texture {
        texture: TextureHandle,
        mip_level: u32,
    },
    Buffer {
        buffer: BufferHandle,
        offset: usize,
        size: usize,
    },
}

impl ReadbackSource {
    /// level 0 of `texture`
    pub fn texture(texture: TextureHandle) -> Self {
        ReadbackSource::Texture {
            texture,
            mip_level: 0,
        }
    }

    /// the whole of `buffer`
    pub fn buffer(buffer: BufferHandle) -> Self {
        ReadbackSource::Buffer {
            buffer,
            offset: 0,
            size: buffer.byte_size(),
        }
    }

    pub fn buffer_range(buffer: BufferHandle, offset: usize, size: usize) -> Self {
        ReadbackSource::Buffer {
            buffer,
            offset,
            size,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            ReadbackSource::Texture { .. } => SourceKind::Texture,
            ReadbackSource::Buffer { .. } => SourceKind::Buffer,
        }
    }

    /// bytes a finished readback of this source holds
    pub fn byte_size(&self) -> usize {
        match self {
            ReadbackSource::Texture { texture, mip_level } => texture.byte_size(*mip_level),
            ReadbackSource::Buffer { size, .. } => *size,
        }
    }
}

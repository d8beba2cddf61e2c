// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! OpenGL ES device.
//!
//! A texture level is attached to a throwaway fbo and packed into a
//! pixel pack buffer with `glReadPixels`, a fence placed after it tells
//! when the pbo can be mapped without stalling. Storage buffers only need
//! the fence, their range is mapped directly.
//!
//! glow has no wrapper for `glGetTexLevelParameteriv`, so the entry point is
//! resolved from the loader. Contexts without it (plain GLES 3.0) need the
//! level registered with [`GlesDevice::set_texture_level`].

use crate::device::{DeviceError, FenceStatus, GpuDevice, ReadToken, Renderer, TextureLevel};
use crate::format::PixelLayout;
use glow::HasContext;
use log::info;
use std::collections::HashMap;
use std::ffi::c_void;
use std::num::NonZeroU32;

type Fence = <glow::Context as HasContext>::Fence;

/// `void glGetTexLevelParameteriv(GLenum, GLint, GLenum, GLint*)`
pub type GetTexLevelParameteriv =
    unsafe extern "system" fn(target: u32, level: i32, pname: u32, params: *mut i32);

enum GlRead {
    Texture {
        fbo: glow::Framebuffer,
        pbo: glow::Buffer,
        fence: Fence,
        size: usize,
    },
    Buffer {
        buffer: glow::Buffer,
        offset: usize,
        size: usize,
        fence: Fence,
    },
}

impl GlRead {
    fn fence(&self) -> Fence {
        match self {
            GlRead::Texture { fence, .. } | GlRead::Buffer { fence, .. } => *fence,
        }
    }
}

pub struct GlesDevice {
    gl: glow::Context,
    renderer: Renderer,
    reads: HashMap<u64, GlRead>,
    next_token: u64,
    level_query: Option<GetTexLevelParameteriv>,
    levels: HashMap<(u32, i32), TextureLevel>,
}

// glow::Context is only touched from the render thread callbacks, the
// plugin mutex serializes them
unsafe impl Send for GlesDevice {}

fn texture_name(name: u32) -> Result<glow::Texture, DeviceError> {
    NonZeroU32::new(name)
        .map(glow::NativeTexture)
        .ok_or(DeviceError::UnknownTexture(name))
}

fn buffer_name(name: u32) -> Result<glow::Buffer, DeviceError> {
    NonZeroU32::new(name)
        .map(glow::NativeBuffer)
        .ok_or(DeviceError::UnknownBuffer(name))
}

/// # Safety
/// `loader` must return null or a valid pointer for the current context.
unsafe fn resolve_level_query<F>(loader: &mut F) -> Option<GetTexLevelParameteriv>
where
    F: FnMut(&str) -> *const c_void,
{
    let ptr = loader("glGetTexLevelParameteriv");
    if ptr.is_null() {
        return None;
    }
    Some(std::mem::transmute::<*const c_void, GetTexLevelParameteriv>(ptr))
}

/// # Safety
/// The texture must be bound to `GL_TEXTURE_2D` on a current context.
unsafe fn query_level(query: GetTexLevelParameteriv, mip_level: i32) -> TextureLevel {
    let q = |pname| {
        let mut v = 0;
        query(glow::TEXTURE_2D, mip_level, pname, &mut v);
        v
    };
    TextureLevel {
        internal_format: q(glow::TEXTURE_INTERNAL_FORMAT) as u32,
        width: q(glow::TEXTURE_WIDTH),
        height: q(glow::TEXTURE_HEIGHT),
        depth: q(glow::TEXTURE_DEPTH),
    }
}

fn gl_size(v: usize) -> Result<i32, DeviceError> {
    i32::try_from(v).map_err(|_| DeviceError::Gl(format!("size {} too large", v)))
}

impl GlesDevice {
    pub fn new(gl: glow::Context) -> Self {
        let v = gl.version();
        let renderer = match (v.is_embedded, v.major) {
            (true, 2) => Renderer::OpenGLES20,
            (true, m) if m >= 3 => Renderer::OpenGLES30,
            (false, _) => Renderer::OpenGLCore,
            _ => Renderer::Other,
        };
        info!(
            "gles readback device {}.{} {} -> {:?}",
            v.major, v.minor, v.vendor_info, renderer
        );
        Self {
            gl,
            renderer,
            reads: HashMap::new(),
            next_token: 1,
            level_query: None,
            levels: HashMap::new(),
        }
    }

    /// # Safety
    /// A gl context must be current on the calling thread and `loader` must
    /// return valid function pointers for it.
    pub unsafe fn from_loader<F>(mut loader: F) -> Self
    where
        F: FnMut(&str) -> *const c_void,
    {
        let level_query = resolve_level_query(&mut loader);
        if level_query.is_none() {
            info!("glGetTexLevelParameteriv not available, texture levels must be registered");
        }
        let mut dev = Self::new(glow::Context::from_loader_function(loader));
        dev.level_query = level_query;
        dev
    }

    /// format and size of a texture level, used instead of asking the driver
    pub fn set_texture_level(&mut self, texture: u32, mip_level: i32, level: TextureLevel) {
        self.levels.insert((texture, mip_level), level);
    }

    fn push(&mut self, read: GlRead) -> ReadToken {
        let token = self.next_token;
        self.next_token += 1;
        self.reads.insert(token, read);
        ReadToken(token)
    }
}

impl GpuDevice for GlesDevice {
    fn renderer(&self) -> Renderer {
        self.renderer
    }

    fn texture_level(&mut self, texture: u32, mip_level: i32) -> Result<TextureLevel, DeviceError> {
        let tex = texture_name(texture)?;
        if let Some(level) = self.levels.get(&(texture, mip_level)) {
            return Ok(*level);
        }
        let Some(query) = self.level_query else {
            return Err(DeviceError::Gl(format!(
                "no level info for texture {} level {}",
                texture, mip_level
            )));
        };
        let gl = &self.gl;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            let level = query_level(query, mip_level);
            gl.bind_texture(glow::TEXTURE_2D, None);
            Ok(level)
        }
    }

    fn begin_texture_read(
        &mut self,
        texture: u32,
        mip_level: i32,
        level: &TextureLevel,
        layout: PixelLayout,
    ) -> Result<ReadToken, DeviceError> {
        let tex = texture_name(texture)?;
        let size = level.byte_size();
        let gl = &self.gl;
        let read = unsafe {
            let fbo = gl.create_framebuffer().map_err(DeviceError::Gl)?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(tex),
                mip_level,
            );
            if gl.check_framebuffer_status(glow::FRAMEBUFFER) != glow::FRAMEBUFFER_COMPLETE {
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                gl.delete_framebuffer(fbo);
                return Err(DeviceError::Gl(format!(
                    "texture {} level {} is not color renderable",
                    texture, mip_level
                )));
            }
            let pbo = match gl.create_buffer() {
                Ok(b) => b,
                Err(e) => {
                    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                    gl.delete_framebuffer(fbo);
                    return Err(DeviceError::Gl(e));
                }
            };
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(pbo));
            gl.buffer_data_size(glow::PIXEL_PACK_BUFFER, gl_size(size)?, glow::DYNAMIC_READ);
            gl.read_buffer(glow::COLOR_ATTACHMENT0);
            gl.read_pixels(
                0,
                0,
                level.width,
                level.height,
                layout.format,
                layout.ty,
                glow::PixelPackData::BufferOffset(0),
            );
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            let fence = match gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) {
                Ok(f) => f,
                Err(e) => {
                    gl.delete_buffer(pbo);
                    gl.delete_framebuffer(fbo);
                    return Err(DeviceError::Gl(e));
                }
            };
            GlRead::Texture {
                fbo,
                pbo,
                fence,
                size,
            }
        };
        Ok(self.push(read))
    }

    fn begin_buffer_read(
        &mut self,
        buffer: u32,
        offset: usize,
        size: usize,
    ) -> Result<ReadToken, DeviceError> {
        let buf = buffer_name(buffer)?;
        let fence = unsafe {
            self.gl
                .fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0)
                .map_err(DeviceError::Gl)?
        };
        Ok(self.push(GlRead::Buffer {
            buffer: buf,
            offset,
            size,
            fence,
        }))
    }

    fn poll_read(&mut self, token: ReadToken) -> FenceStatus {
        let Some(read) = self.reads.get(&token.0) else {
            return FenceStatus::Lost;
        };
        match unsafe { self.gl.get_sync_status(read.fence()) } {
            glow::SIGNALED => FenceStatus::Signaled,
            glow::UNSIGNALED => FenceStatus::Unsignaled,
            _ => FenceStatus::Lost,
        }
    }

    fn finish_read(&mut self, token: ReadToken, dst: &mut [u8]) -> Result<(), DeviceError> {
        let read = self
            .reads
            .get(&token.0)
            .ok_or(DeviceError::UnknownRead(token))?;
        let (target, buffer, offset, size) = match read {
            GlRead::Texture { pbo, size, .. } => (glow::PIXEL_PACK_BUFFER, *pbo, 0, *size),
            GlRead::Buffer {
                buffer,
                offset,
                size,
                ..
            } => (glow::SHADER_STORAGE_BUFFER, *buffer, *offset, *size),
        };
        let gl = &self.gl;
        unsafe {
            gl.bind_buffer(target, Some(buffer));
            let ptr = gl.map_buffer_range(target, gl_size(offset)?, gl_size(size)?, glow::MAP_READ_BIT);
            if ptr.is_null() {
                gl.bind_buffer(target, None);
                return Err(DeviceError::Gl(format!("map of {} bytes failed", size)));
            }
            let n = size.min(dst.len());
            std::ptr::copy_nonoverlapping(ptr, dst.as_mut_ptr(), n);
            gl.unmap_buffer(target);
            gl.bind_buffer(target, None);
        }
        Ok(())
    }

    fn release_read(&mut self, token: ReadToken) {
        let Some(read) = self.reads.remove(&token.0) else {
            return;
        };
        let gl = &self.gl;
        unsafe {
            match read {
                GlRead::Texture { fbo, pbo, fence, .. } => {
                    gl.delete_framebuffer(fbo);
                    gl.delete_buffer(pbo);
                    gl.delete_sync(fence);
                }
                // the storage buffer belongs to the host
                GlRead::Buffer { fence, .. } => gl.delete_sync(fence),
            }
        }
    }
}

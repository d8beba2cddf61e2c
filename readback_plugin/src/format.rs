// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! OpenGL internal format tables.
//!
//! A texture level is read back with `glReadPixels`, which wants a client
//! `format` / `type` pair instead of the sized internal format the texture
//! was created with. Formats missing here cannot be read back.

pub const RED: u32 = 0x1903;
pub const RG: u32 = 0x8227;
pub const RGB: u32 = 0x1907;
pub const RGBA: u32 = 0x1908;
pub const RED_INTEGER: u32 = 0x8D94;
pub const RGBA_INTEGER: u32 = 0x8D99;

pub const UNSIGNED_BYTE: u32 = 0x1401;
pub const INT: u32 = 0x1404;
pub const UNSIGNED_INT: u32 = 0x1405;
pub const FLOAT: u32 = 0x1406;
pub const HALF_FLOAT: u32 = 0x140B;
pub const UNSIGNED_SHORT_4_4_4_4: u32 = 0x8033;
pub const UNSIGNED_SHORT_5_5_5_1: u32 = 0x8034;
pub const UNSIGNED_SHORT_5_6_5: u32 = 0x8363;
pub const UNSIGNED_INT_2_10_10_10_REV: u32 = 0x8368;
pub const UNSIGNED_INT_10F_11F_11F_REV: u32 = 0x8C3B;

pub const R8: u32 = 0x8229;
pub const RG8: u32 = 0x822B;
pub const RGB8: u32 = 0x8051;
pub const RGBA4: u32 = 0x8056;
pub const RGB5_A1: u32 = 0x8057;
pub const RGBA8: u32 = 0x8058;
pub const RGB10_A2: u32 = 0x8059;
pub const RGB565: u32 = 0x8D62;
pub const SRGB8_ALPHA8: u32 = 0x8C43;
pub const R16F: u32 = 0x822D;
pub const RG16F: u32 = 0x822F;
pub const RGBA16F: u32 = 0x881A;
pub const R32F: u32 = 0x822E;
pub const RG32F: u32 = 0x8230;
pub const RGBA32F: u32 = 0x8814;
pub const R11F_G11F_B10F: u32 = 0x8C3A;
pub const R32I: u32 = 0x8235;
pub const R32UI: u32 = 0x8236;
pub const RGBA32I: u32 = 0x8D82;
pub const RGBA32UI: u32 = 0x8D70;

/// client side layout used to pack one texel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub format: u32,
    pub ty: u32,
    pub pixel_size: usize,
}

impl PixelLayout {
    const fn new(format: u32, ty: u32, pixel_size: usize) -> Self {
        Self {
            format,
            ty,
            pixel_size,
        }
    }
}

pub fn layout_for(internal_format: u32) -> Option<PixelLayout> {
    let l = match internal_format {
        R8 => PixelLayout::new(RED, UNSIGNED_BYTE, 1),
        RG8 => PixelLayout::new(RG, UNSIGNED_BYTE, 2),
        RGB8 => PixelLayout::new(RGB, UNSIGNED_BYTE, 3),
        RGBA8 | SRGB8_ALPHA8 => PixelLayout::new(RGBA, UNSIGNED_BYTE, 4),
        RGB565 => PixelLayout::new(RGB, UNSIGNED_SHORT_5_6_5, 2),
        RGBA4 => PixelLayout::new(RGBA, UNSIGNED_SHORT_4_4_4_4, 2),
        RGB5_A1 => PixelLayout::new(RGBA, UNSIGNED_SHORT_5_5_5_1, 2),
        RGB10_A2 => PixelLayout::new(RGBA, UNSIGNED_INT_2_10_10_10_REV, 4),
        R11F_G11F_B10F => PixelLayout::new(RGB, UNSIGNED_INT_10F_11F_11F_REV, 4),
        R16F => PixelLayout::new(RED, HALF_FLOAT, 2),
        RG16F => PixelLayout::new(RG, HALF_FLOAT, 4),
        RGBA16F => PixelLayout::new(RGBA, HALF_FLOAT, 8),
        R32F => PixelLayout::new(RED, FLOAT, 4),
        RG32F => PixelLayout::new(RG, FLOAT, 8),
        RGBA32F => PixelLayout::new(RGBA, FLOAT, 16),
        R32I => PixelLayout::new(RED_INTEGER, INT, 4),
        R32UI => PixelLayout::new(RED_INTEGER, UNSIGNED_INT, 4),
        RGBA32I => PixelLayout::new(RGBA_INTEGER, INT, 16),
        RGBA32UI => PixelLayout::new(RGBA_INTEGER, UNSIGNED_INT, 16),
        _ => return None,
    };
    Some(l)
}

pub fn pixel_size(internal_format: u32) -> usize {
    layout_for(internal_format).map_or(0, |l| l.pixel_size)
}

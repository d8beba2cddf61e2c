// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! readback_plugin is the native half of the async gpu readback shim.
//!
//! It keeps a table of readback events: the main thread registers a texture
//! or storage buffer and gets an event id, the host then runs the plugin's
//! render thread callbacks with that id to start copies and to poll their
//! fences. Finished bytes stay in plugin memory and are handed out as a
//! pointer and length, no copy on the way out.
//!
//! The crate builds as a cdylib/staticlib exporting the C functions in
//! [`ffi`], and as an rlib so a Rust host can link it directly.

pub mod device;
pub mod ffi;
pub mod format;
#[cfg(feature = "gles")]
pub mod gles;
pub mod log;
pub mod plugin;
pub mod soft;

pub use device::{DeviceError, FenceStatus, GpuDevice, ReadToken, Renderer, TextureLevel};
pub use ffi::RenderEventFn;
#[cfg(feature = "gles")]
pub use gles::GlesDevice;
pub use plugin::{EventId, Plugin, TaskKind};
pub use soft::SoftDevice;

// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! pixel_readback copies textures and buffers from the gpu back to the cpu
//! without stalling the render thread.
//!
//! A request uses the host's own async readback when the graphics backend
//! has one. Otherwise it goes through `readback_plugin`, a native plugin that
//! copies into pixel pack buffers behind a fence (GLES 2/3). The bytes of a
//! finished request are handed out as a borrowed slice, no copy.
//!
//! Modules:
//! - request: one readback, backend choice, completion callback, data view
//! - dispatcher: per frame polling of all requests
//! - readback: entry point owning host, factory and dispatcher
//! - host: graphics host boundary, headless and wgpu hosts
//! - plugin: plugin C ABI table, linked or loaded at runtime
//! - config, log, error: settings, log setup, error type
//!
//! Single threaded: everything here runs on the thread that owns the
//! graphics context. Render thread work is handed to the host as plugin
//! events.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod log;
pub mod plugin;
pub mod readback;
pub mod request;
pub mod source;

pub use config::{BackendPreference, PluginMode, ReadbackConfig};
pub use dispatcher::{Dispatcher, PollStats};
pub use error::{ReadbackError, Result};
pub use host::headless::HeadlessHost;
pub use host::{Command, CommandList, GraphicsHost, HostRequest, RenderEventFn};
pub use plugin::{EventId, PluginApi, PluginTicket};
pub use readback::Readback;
pub use request::{
    BackendKind, Callback, Dispatch, DispatchMode, PollContext, ReadbackRequest, RequestFactory,
    RequestId, RequestState,
};
pub use source::{BufferHandle, ReadbackSource, SourceKind, TextureFormat, TextureHandle};

#[cfg(feature = "wgpu")]
pub use host::wgpu::WgpuHost;
#[cfg(feature = "dylib")]
pub use plugin::DylibPlugin;
#[cfg(feature = "linked-plugin")]
pub use plugin::LinkedPlugin;

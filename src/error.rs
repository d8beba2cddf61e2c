// RustPixel
// copyright zipxing@hotmail.com 2022～2025

use crate::request::RequestId;
use crate::source::SourceKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadbackError {
    /// neither the host nor the plugin can read this kind of source back
    #[error("async gpu readback of a {0} is not supported on this system")]
    Unsupported(SourceKind),

    #[error("readback is still pending")]
    NotReady,

    #[error("gpu transfer failed")]
    TransferFailed,

    #[error("readback data is no longer available")]
    DataUnavailable,

    #[error("readback bytes do not fit the requested element type: {0:?}")]
    Layout(bytemuck::PodCastError),

    #[error("plugin: {0}")]
    Plugin(String),

    #[error("host: {0}")]
    Host(String),

    #[error("unknown readback request {0}")]
    UnknownRequest(RequestId),

    #[cfg(feature = "dylib")]
    #[error("failed to load readback plugin: {0}")]
    PluginLoad(#[from] libloading::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("config parse: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReadbackError>;

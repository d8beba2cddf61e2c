// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Application facing entry point.
//!
//! Create one [`Readback`] at startup next to the graphics host, call
//! [`Readback::update`] once per frame and [`Readback::shutdown`] at exit.
//!
//! ```no_run
//! use pixel_readback::{HeadlessHost, Readback, ReadbackConfig};
//!
//! let cfg = ReadbackConfig::default();
//! let mut rb = Readback::from_config(HeadlessHost::default(), &cfg).unwrap();
//! let buf = rb.host_mut().create_buffer(4, 4, &[0; 16]);
//! rb.request_buffer(buf, true, |req, _ctx| {
//!     if let Ok(v) = req.get_data::<f32>() {
//!         println!("{:?}", v);
//!     }
//! })
//! .unwrap();
//! rb.update();
//! ```

use crate::config::{PluginMode, ReadbackConfig};
use crate::dispatcher::{Dispatcher, PollStats};
use crate::error::Result;
use crate::host::{CommandList, GraphicsHost};
use crate::log::plugin_log;
use crate::plugin::PluginApi;
use crate::request::{
    Callback, Dispatch, PollContext, ReadbackRequest, RequestFactory, RequestId, RequestState,
};
use crate::source::{BufferHandle, ReadbackSource, TextureHandle};
use log::info;
use std::rc::Rc;

pub struct Readback<H: GraphicsHost> {
    host: H,
    factory: RequestFactory,
    dispatcher: Dispatcher,
}

fn boxed<F>(f: F) -> Callback
where
    F: FnOnce(&ReadbackRequest, &mut PollContext<'_>) + 'static,
{
    Box::new(f)
}

impl<H: GraphicsHost> Readback<H> {
    pub fn new(host: H, plugin: Option<Rc<dyn PluginApi>>, config: &ReadbackConfig) -> Self {
        if let Some(p) = &plugin {
            if config.plugin.forward_logs {
                p.set_log_callback(Some(plugin_log));
            }
        }
        info!(
            "readback init: backend={:?} plugin={} native={}",
            config.backend,
            plugin.is_some(),
            host.supports_async_readback()
        );
        Self {
            host,
            factory: RequestFactory::new(plugin, config.backend),
            dispatcher: Dispatcher::with_trace(config.trace_polls),
        }
    }

    /// Picks the plugin from `config.plugin.mode`.
    pub fn from_config(host: H, config: &ReadbackConfig) -> Result<Self> {
        let plugin: Option<Rc<dyn PluginApi>> = match config.plugin.mode {
            PluginMode::None => None,
            #[cfg(feature = "linked-plugin")]
            PluginMode::Linked => Some(Rc::new(crate::plugin::LinkedPlugin)),
            #[cfg(not(feature = "linked-plugin"))]
            PluginMode::Linked => {
                return Err(crate::error::ReadbackError::Config(
                    "plugin mode linked needs the linked-plugin feature".to_string(),
                ))
            }
            #[cfg(feature = "dylib")]
            PluginMode::Dylib => Some(Rc::new(open_dylib(&config.plugin.library)?)),
            #[cfg(not(feature = "dylib"))]
            PluginMode::Dylib => {
                return Err(crate::error::ReadbackError::Config(
                    "plugin mode dylib needs the dylib feature".to_string(),
                ))
            }
        };
        Ok(Self::new(host, plugin, config))
    }

    pub fn request(
        &mut self,
        source: ReadbackSource,
        dispatch: Dispatch<'_>,
        auto_dispose: bool,
        callback: Option<Callback>,
    ) -> Result<RequestId> {
        let req = self
            .factory
            .create(&mut self.host, source, dispatch, auto_dispose, callback)?;
        Ok(self.dispatcher.submit(req))
    }

    pub fn request_texture<F>(
        &mut self,
        texture: TextureHandle,
        mip_level: u32,
        auto_dispose: bool,
        callback: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(&ReadbackRequest, &mut PollContext<'_>) + 'static,
    {
        let source = ReadbackSource::Texture { texture, mip_level };
        self.request(source, Dispatch::Immediate, auto_dispose, Some(boxed(callback)))
    }

    /// Records the copy into `list`. The copy runs when the host executes
    /// the list, every time it does.
    pub fn request_texture_deferred<F>(
        &mut self,
        list: &mut CommandList,
        texture: TextureHandle,
        mip_level: u32,
        auto_dispose: bool,
        callback: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(&ReadbackRequest, &mut PollContext<'_>) + 'static,
    {
        let source = ReadbackSource::Texture { texture, mip_level };
        self.request(source, Dispatch::Deferred(list), auto_dispose, Some(boxed(callback)))
    }

    pub fn request_buffer<F>(
        &mut self,
        buffer: BufferHandle,
        auto_dispose: bool,
        callback: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(&ReadbackRequest, &mut PollContext<'_>) + 'static,
    {
        let source = ReadbackSource::buffer(buffer);
        self.request(source, Dispatch::Immediate, auto_dispose, Some(boxed(callback)))
    }

    pub fn request_buffer_deferred<F>(
        &mut self,
        list: &mut CommandList,
        buffer: BufferHandle,
        auto_dispose: bool,
        callback: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(&ReadbackRequest, &mut PollContext<'_>) + 'static,
    {
        let source = ReadbackSource::buffer(buffer);
        self.request(source, Dispatch::Deferred(list), auto_dispose, Some(boxed(callback)))
    }

    /// once per frame
    pub fn update(&mut self) -> PollStats {
        self.dispatcher.poll_all(&mut self.host, &self.factory)
    }

    pub fn poll_request(&mut self, id: RequestId, force: bool) -> Result<RequestState> {
        self.dispatcher
            .poll_one(id, &mut self.host, &self.factory, force)
    }

    pub fn dispose(&mut self, id: RequestId) -> bool {
        self.dispatcher.dispose(id)
    }

    pub fn get(&self, id: RequestId) -> Option<&ReadbackRequest> {
        self.dispatcher.get(id)
    }

    pub fn take(&mut self, id: RequestId) -> Option<ReadbackRequest> {
        self.dispatcher.take(id)
    }

    pub fn pending(&self) -> usize {
        self.dispatcher.len()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn factory(&self) -> &RequestFactory {
        &self.factory
    }

    /// Disposes every request, detaches the plugin log and returns the host.
    pub fn shutdown(mut self) -> H {
        self.dispatcher.shutdown();
        if let Some(p) = self.factory.plugin() {
            p.set_log_callback(None);
        }
        info!("readback shutdown");
        self.host
    }
}

#[cfg(feature = "dylib")]
fn open_dylib(library: &str) -> Result<crate::plugin::DylibPlugin> {
    use crate::plugin::DylibPlugin;
    use std::path::Path;
    if Path::new(library).components().count() > 1 {
        DylibPlugin::open(library)
    } else {
        DylibPlugin::open_named(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendPreference;
    use crate::error::ReadbackError;
    use crate::host::headless::HeadlessHost;
    use crate::plugin::fake::FakePlugin;
    use crate::request::BackendKind;
    use crate::source::TextureFormat;
    use std::cell::RefCell;

    fn no_plugin() -> ReadbackConfig {
        let mut cfg = ReadbackConfig::default();
        cfg.plugin.mode = PluginMode::None;
        cfg
    }

    #[test]
    fn test_native_buffer_through_root() {
        let mut rb = Readback::from_config(HeadlessHost::default(), &no_plugin()).unwrap();
        let data: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buf = rb.host_mut().create_buffer(4, 4, &data);
        let got = Rc::new(RefCell::new(vec![]));
        let g = got.clone();
        let id = rb
            .request_buffer(buf, false, move |req, _| {
                assert_eq!(req.backend_kind(), BackendKind::Native);
                *g.borrow_mut() = req.get_data::<f32>().unwrap().to_vec();
            })
            .unwrap();
        rb.update();
        assert_eq!(*got.borrow(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rb.get(id).map(|r| r.state()), Some(RequestState::Done));
        assert!(rb.dispose(id));
        assert_eq!(rb.pending(), 0);
    }

    #[test]
    fn test_log_bridge_follows_config() {
        let fake = FakePlugin::compatible();
        let rb = Readback::new(HeadlessHost::default(), Some(fake.clone()), &ReadbackConfig::default());
        assert!(fake.state.borrow().log_callback_set);
        rb.shutdown();
        assert!(!fake.state.borrow().log_callback_set);

        let mut cfg = ReadbackConfig::default();
        cfg.plugin.forward_logs = false;
        let _rb = Readback::new(HeadlessHost::default(), Some(fake.clone()), &cfg);
        assert!(!fake.state.borrow().log_callback_set);
    }

    #[test]
    fn test_unsupported_is_reported() {
        let mut cfg = no_plugin();
        cfg.backend = BackendPreference::Auto;
        let mut rb = Readback::from_config(HeadlessHost::new(false, false), &cfg).unwrap();
        let tex = TextureHandle::new(1, 4, 4, TextureFormat::Rgba32);
        let r = rb.request_texture(tex, 0, true, |_, _| {});
        assert!(matches!(r, Err(ReadbackError::Unsupported(_))));
        assert_eq!(rb.pending(), 0);
        assert_eq!(rb.update().polled, 0);
    }

    #[test]
    fn test_poll_request_and_take() {
        let fake = FakePlugin::compatible();
        let mut rb = Readback::new(HeadlessHost::new(false, true), Some(fake.clone()), &no_plugin());
        let tex = TextureHandle::new(3, 1, 1, TextureFormat::Rgba32);
        let id = rb.request_texture(tex, 0, false, |_, _| {}).unwrap();
        assert_eq!(rb.poll_request(id, false).unwrap(), RequestState::Pending);
        fake.finish(1, &[9; 4]);
        assert_eq!(rb.poll_request(id, true).unwrap(), RequestState::Done);
        let req = rb.take(id).unwrap();
        assert_eq!(req.get_data::<u8>().unwrap(), &[9; 4]);
        drop(req);
        assert_eq!(fake.state.borrow().disposed, vec![1]);
    }
}

// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Readback requests.
//!
//! A request is created by [`RequestFactory::create`], which picks the
//! backend once:
//! 1. the host's own async readback, when it has one
//! 2. the native plugin, when it can read this kind of source
//!    (storage buffers also need compute shader support)
//! 3. otherwise `ReadbackError::Unsupported`, logged, never retried
//!
//! Requests move `Pending -> Done | Errored`. Each [`ReadbackRequest::poll`]
//! is one non-blocking step, the completion callback runs on the step that
//! first sees a terminal state and never again.

use crate::config::BackendPreference;
use crate::error::{ReadbackError, Result};
use crate::host::{Command, CommandList, GraphicsHost, HostRequest};
use crate::plugin::{EventId, PluginApi, PluginTicket};
use crate::source::{ReadbackSource, SourceKind};
use bytemuck::Pod;
use log::{debug, error};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// copy issued on the host right away
    Immediate,
    /// copy recorded into a command list the host runs later
    Deferred,
}

/// Where the copy of a new request goes.
pub enum Dispatch<'a> {
    Immediate,
    Deferred(&'a mut CommandList),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Native,
    Plugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Done,
    Errored,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestState::Pending)
    }
}

enum Backend {
    Native(Box<dyn HostRequest>),
    Plugin(PluginTicket),
}

/// Completion callback, runs once with the finished request.
pub type Callback = Box<dyn FnOnce(&ReadbackRequest, &mut PollContext<'_>)>;

/// What a callback may touch while requests are being polled.
pub struct PollContext<'a> {
    host: &'a mut dyn GraphicsHost,
    factory: &'a RequestFactory,
    followups: &'a mut Vec<ReadbackRequest>,
}

impl<'a> PollContext<'a> {
    pub fn new(
        host: &'a mut dyn GraphicsHost,
        factory: &'a RequestFactory,
        followups: &'a mut Vec<ReadbackRequest>,
    ) -> Self {
        Self {
            host,
            factory,
            followups,
        }
    }

    pub fn host(&mut self) -> &mut dyn GraphicsHost {
        &mut *self.host
    }

    /// Creates a request from inside a callback. It is queued after the
    /// current pass and polled from the next one on.
    pub fn submit(
        &mut self,
        source: ReadbackSource,
        dispatch: Dispatch<'_>,
        auto_dispose: bool,
        callback: Option<Callback>,
    ) -> Result<RequestId> {
        let req = self
            .factory
            .create(&mut *self.host, source, dispatch, auto_dispose, callback)?;
        let id = req.id();
        self.followups.push(req);
        Ok(id)
    }
}

pub struct ReadbackRequest {
    id: RequestId,
    source: ReadbackSource,
    dispatch: DispatchMode,
    backend: Backend,
    auto_dispose: bool,
    state: RequestState,
    delivered: bool,
    callback: Option<Callback>,
}

impl fmt::Debug for ReadbackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadbackRequest")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("dispatch", &self.dispatch)
            .field("backend", &self.backend_kind())
            .field("event_id", &self.event_id())
            .field("auto_dispose", &self.auto_dispose)
            .field("state", &self.state)
            .finish()
    }
}

impl ReadbackRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn source(&self) -> &ReadbackSource {
        &self.source
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            Backend::Native(_) => BackendKind::Native,
            Backend::Plugin(_) => BackendKind::Plugin,
        }
    }

    /// plugin event id, plugin backed requests only
    pub fn event_id(&self) -> Option<EventId> {
        match &self.backend {
            Backend::Plugin(t) => Some(t.event_id()),
            Backend::Native(_) => None,
        }
    }

    pub fn auto_dispose(&self) -> bool {
        self.auto_dispose
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn done(&self) -> bool {
        self.state == RequestState::Done
    }

    pub fn has_error(&self) -> bool {
        self.state == RequestState::Errored
    }

    /// One step: advance the backend, then run the callback if this is the
    /// first step that sees the request finished. `force` asks a native
    /// backend to update now instead of waiting for the host.
    pub fn poll(&mut self, ctx: &mut PollContext<'_>, force: bool) {
        match &mut self.backend {
            Backend::Native(req) => {
                if force {
                    req.update();
                }
                req.refresh();
                if !self.state.is_terminal() {
                    if req.has_error() {
                        self.state = RequestState::Errored;
                    } else if req.done() {
                        self.state = RequestState::Done;
                    }
                }
            }
            Backend::Plugin(ticket) => {
                let deferred = self.dispatch == DispatchMode::Deferred;
                // a list that keeps executing queues one transfer per run,
                // the one the callback saw goes now
                if self.delivered
                    && deferred
                    && (ticket.is_done() || ticket.is_error() || ticket.is_read())
                {
                    ticket.pop();
                }
                if !self.delivered || deferred {
                    ctx.host.issue_plugin_event(ticket.update_event(), ticket.event_id());
                }
                if !self.state.is_terminal() {
                    if ticket.is_error() {
                        self.state = RequestState::Errored;
                    } else if ticket.is_done() {
                        self.state = RequestState::Done;
                    }
                }
            }
        }
        if self.state.is_terminal() && !self.delivered {
            self.delivered = true;
            debug!("readback {} finished: {:?}", self.id, self.state);
            if let Some(cb) = self.callback.take() {
                cb(self, ctx);
            }
        }
    }

    /// Typed view of the finished bytes, borrowed from the backend without
    /// a copy. Trailing bytes that do not fill a whole `T` are left out.
    pub fn get_data<T: Pod>(&self) -> Result<&[T]> {
        match self.state {
            RequestState::Pending => return Err(ReadbackError::NotReady),
            RequestState::Errored => return Err(ReadbackError::TransferFailed),
            RequestState::Done => {}
        }
        let bytes = match &self.backend {
            Backend::Native(req) => req.data(),
            Backend::Plugin(ticket) => ticket.data(),
        }
        .ok_or(ReadbackError::DataUnavailable)?;
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Ok(&[]);
        }
        let whole = bytes.len() / size * size;
        bytemuck::try_cast_slice(&bytes[..whole]).map_err(ReadbackError::Layout)
    }

    /// Releases the backend, for plugin requests this disposes the event.
    pub fn dispose(self) {
        debug!("dispose readback {}", self.id);
    }
}

/// Builds requests, owns the backend choice and the plugin table.
pub struct RequestFactory {
    plugin: Option<Rc<dyn PluginApi>>,
    preference: BackendPreference,
    next_id: Cell<u64>,
}

impl RequestFactory {
    pub fn new(plugin: Option<Rc<dyn PluginApi>>, preference: BackendPreference) -> Self {
        Self {
            plugin,
            preference,
            next_id: Cell::new(1),
        }
    }

    pub fn plugin(&self) -> Option<&Rc<dyn PluginApi>> {
        self.plugin.as_ref()
    }

    pub fn preference(&self) -> BackendPreference {
        self.preference
    }

    fn alloc_id(&self) -> RequestId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        RequestId(id)
    }

    fn plugin_compatible(&self, api: &dyn PluginApi, host: &dyn GraphicsHost, kind: SourceKind) -> bool {
        let ok = match kind {
            SourceKind::Texture => api.is_compatible(),
            SourceKind::Buffer => api.is_ssbo_compatible() && host.supports_compute_shaders(),
        };
        debug!("plugin {} compatible: {}", kind, ok);
        ok
    }

    pub fn create(
        &self,
        host: &mut dyn GraphicsHost,
        source: ReadbackSource,
        dispatch: Dispatch<'_>,
        auto_dispose: bool,
        callback: Option<Callback>,
    ) -> Result<ReadbackRequest> {
        let kind = source.kind();
        let (mode, list) = match dispatch {
            Dispatch::Immediate => (DispatchMode::Immediate, None),
            Dispatch::Deferred(l) => (DispatchMode::Deferred, Some(l)),
        };
        let native = host.supports_async_readback();
        debug!("host async readback: {}", native);

        let backend = if self.preference.allows_native() && native {
            Backend::Native(host.request_readback(&source, list)?)
        } else {
            let api = match &self.plugin {
                Some(api)
                    if self.preference.allows_plugin()
                        && self.plugin_compatible(&**api, &*host, kind) =>
                {
                    api.clone()
                }
                _ => {
                    error!("async gpu readback of a {} is not supported on this system", kind);
                    return Err(ReadbackError::Unsupported(kind));
                }
            };
            let ticket = PluginTicket::register(api, &source)?;
            let event = ticket.copy_event();
            match list {
                Some(l) => l.push(Command::PluginEvent {
                    event,
                    event_id: ticket.event_id(),
                }),
                None => host.issue_plugin_event(event, ticket.event_id()),
            }
            Backend::Plugin(ticket)
        };

        let req = ReadbackRequest {
            id: self.alloc_id(),
            source,
            dispatch: mode,
            backend,
            auto_dispose,
            state: RequestState::Pending,
            delivered: false,
            callback,
        };
        debug!("new readback {:?}", req);
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::headless::HeadlessHost;
    use crate::plugin::fake::FakePlugin;
    use crate::source::{BufferHandle, TextureFormat, TextureHandle};
    use std::cell::RefCell;

    fn poll(req: &mut ReadbackRequest, host: &mut HeadlessHost, factory: &RequestFactory) {
        let mut followups = vec![];
        host.maintain();
        let mut ctx = PollContext::new(host, factory, &mut followups);
        req.poll(&mut ctx, false);
    }

    fn counter() -> (Rc<RefCell<u32>>, Callback) {
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        let cb: Callback = Box::new(move |_req: &ReadbackRequest, _ctx: &mut PollContext<'_>| {
            *h.borrow_mut() += 1
        });
        (hits, cb)
    }

    #[test]
    fn test_prefers_native() {
        let mut host = HeadlessHost::new(true, true);
        let fake = FakePlugin::compatible();
        let factory = RequestFactory::new(Some(fake.clone()), BackendPreference::Auto);
        let b = host.create_buffer(4, 4, &[0; 16]);
        let req = factory
            .create(&mut host, ReadbackSource::buffer(b), Dispatch::Immediate, true, None)
            .unwrap();
        assert_eq!(req.backend_kind(), BackendKind::Native);
        assert_eq!(req.event_id(), None);
        assert!(fake.state.borrow().next_id == 1);
    }

    #[test]
    fn test_preference_forces_plugin() {
        let mut host = HeadlessHost::new(true, true);
        let factory = RequestFactory::new(Some(FakePlugin::compatible()), BackendPreference::Plugin);
        let t = TextureHandle::new(5, 2, 2, TextureFormat::Rgba32);
        let req = factory
            .create(&mut host, ReadbackSource::texture(t), Dispatch::Immediate, false, None)
            .unwrap();
        assert_eq!(req.backend_kind(), BackendKind::Plugin);
        assert_eq!(req.event_id(), Some(1));
        // copy event goes out with the request
        assert_eq!(host.pending_events(), 1);
    }

    #[test]
    fn test_buffer_plugin_needs_compute() {
        let mut host = HeadlessHost::new(false, false);
        let factory = RequestFactory::new(Some(FakePlugin::compatible()), BackendPreference::Auto);
        let b = BufferHandle::new(3, 1, 4);
        let r = factory.create(&mut host, ReadbackSource::buffer(b), Dispatch::Immediate, true, None);
        assert!(matches!(r, Err(ReadbackError::Unsupported(SourceKind::Buffer))));
    }

    #[test]
    fn test_native_preference_without_host_support() {
        let mut host = HeadlessHost::new(false, true);
        let factory = RequestFactory::new(Some(FakePlugin::compatible()), BackendPreference::Native);
        let t = TextureHandle::new(5, 2, 2, TextureFormat::Rgba32);
        let r = factory.create(&mut host, ReadbackSource::texture(t), Dispatch::Immediate, true, None);
        assert!(matches!(r, Err(ReadbackError::Unsupported(SourceKind::Texture))));
    }

    #[test]
    fn test_deferred_plugin_records_copy() {
        let mut host = HeadlessHost::new(false, true);
        let factory = RequestFactory::new(Some(FakePlugin::compatible()), BackendPreference::Auto);
        let mut list = CommandList::new("cam");
        let t = TextureHandle::new(5, 2, 2, TextureFormat::Rgba32);
        let req = factory
            .create(&mut host, ReadbackSource::texture(t), Dispatch::Deferred(&mut list), false, None)
            .unwrap();
        assert_eq!(req.dispatch_mode(), DispatchMode::Deferred);
        assert_eq!(host.pending_events(), 0);
        assert!(matches!(
            list.commands()[0],
            Command::PluginEvent { event_id: 1, .. }
        ));
    }

    #[test]
    fn test_callback_fires_once() {
        let mut host = HeadlessHost::new(false, true);
        let fake = FakePlugin::compatible();
        let factory = RequestFactory::new(Some(fake.clone()), BackendPreference::Auto);
        let t = TextureHandle::new(5, 1, 1, TextureFormat::Rgba32);
        let (hits, cb) = counter();
        let mut req = factory
            .create(&mut host, ReadbackSource::texture(t), Dispatch::Immediate, false, Some(cb))
            .unwrap();
        poll(&mut req, &mut host, &factory);
        assert_eq!(*hits.borrow(), 0);
        assert!(matches!(req.get_data::<u8>(), Err(ReadbackError::NotReady)));
        fake.finish(1, &[1, 2, 3, 4]);
        for _ in 0..3 {
            poll(&mut req, &mut host, &factory);
        }
        assert_eq!(*hits.borrow(), 1);
        assert!(req.done());
        assert_eq!(req.get_data::<u8>().unwrap(), &[1, 2, 3, 4]);
        // immediate transfers are kept until dispose
        assert!(fake.state.borrow().pops.is_empty());
        req.dispose();
        assert_eq!(fake.state.borrow().disposed, vec![1]);
    }

    #[test]
    fn test_error_is_delivered_like_completion() {
        let mut host = HeadlessHost::new(false, true);
        let fake = FakePlugin::compatible();
        let factory = RequestFactory::new(Some(fake.clone()), BackendPreference::Auto);
        let b = BufferHandle::new(3, 1, 4);
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        let mut req = factory
            .create(
                &mut host,
                ReadbackSource::buffer(b),
                Dispatch::Immediate,
                false,
                Some(Box::new(move |r: &ReadbackRequest, _: &mut PollContext<'_>| {
                    *s.borrow_mut() = Some(r.state())
                })),
            )
            .unwrap();
        fake.fail(1);
        poll(&mut req, &mut host, &factory);
        assert_eq!(*seen.borrow(), Some(RequestState::Errored));
        assert!(req.has_error());
        assert!(matches!(req.get_data::<f32>(), Err(ReadbackError::TransferFailed)));
    }

    #[test]
    fn test_deferred_plugin_pops_delivered_transfers() {
        let mut host = HeadlessHost::new(false, true);
        let fake = FakePlugin::compatible();
        let factory = RequestFactory::new(Some(fake.clone()), BackendPreference::Auto);
        let mut list = CommandList::new("cam");
        let b = BufferHandle::new(3, 1, 4);
        let (hits, cb) = counter();
        let mut req = factory
            .create(&mut host, ReadbackSource::buffer(b), Dispatch::Deferred(&mut list), false, Some(cb))
            .unwrap();
        fake.finish(1, &[0, 0, 128, 63]);
        poll(&mut req, &mut host, &factory);
        assert_eq!(req.get_data::<f32>().unwrap(), &[1.0]);
        poll(&mut req, &mut host, &factory);
        assert_eq!(fake.state.borrow().pops.get(&1), Some(&1));
        // front not done again yet, nothing more to pop
        poll(&mut req, &mut host, &factory);
        assert_eq!(fake.state.borrow().pops.get(&1), Some(&1));
        fake.finish(1, &[0, 0, 0, 64]);
        assert_eq!(req.get_data::<f32>().unwrap(), &[2.0]);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn test_native_data_truncates_to_whole_elements() {
        let mut host = HeadlessHost::new(true, true);
        let factory = RequestFactory::new(None, BackendPreference::Auto);
        let b = host.create_buffer(6, 1, &[0, 0, 128, 63, 7, 7]);
        let mut req = factory
            .create(&mut host, ReadbackSource::buffer(b), Dispatch::Immediate, true, None)
            .unwrap();
        poll(&mut req, &mut host, &factory);
        assert!(req.done());
        assert_eq!(req.get_data::<f32>().unwrap(), &[1.0]);
        assert_eq!(req.get_data::<u8>().unwrap().len(), 6);
    }

    #[test]
    fn test_native_error() {
        let mut host = HeadlessHost::new(true, true);
        let factory = RequestFactory::new(None, BackendPreference::Auto);
        let b = host.create_buffer(1, 4, &[0; 4]);
        host.fail_next_readback();
        let (hits, cb) = counter();
        let mut req = factory
            .create(&mut host, ReadbackSource::buffer(b), Dispatch::Immediate, true, Some(cb))
            .unwrap();
        poll(&mut req, &mut host, &factory);
        poll(&mut req, &mut host, &factory);
        assert!(req.has_error());
        assert_eq!(*hits.borrow(), 1);
    }
}

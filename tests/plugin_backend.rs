#![cfg(feature = "linked-plugin")]

use pixel_readback::{
    BackendKind, BufferHandle, CommandList, HeadlessHost, Readback, ReadbackConfig, ReadbackError,
    RequestState, SourceKind, TextureFormat, TextureHandle,
};
use readback_plugin::ffi::{event_kind, install_device, with_plugin};
use readback_plugin::format::RGBA8;
use readback_plugin::{Renderer, SoftDevice};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Mutex;

// the linked plugin is process wide
static SERIAL: Mutex<()> = Mutex::new(());

fn setup(renderer: Renderer, compute: bool) -> (SoftDevice, Readback<HeadlessHost>) {
    let dev = SoftDevice::new(renderer);
    install_device(Box::new(dev.clone()));
    let rb = Readback::from_config(HeadlessHost::new(false, compute), &ReadbackConfig::default())
        .unwrap();
    (dev, rb)
}

#[test]
fn test_texture_through_plugin() {
    let _g = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (dev, mut rb) = setup(Renderer::OpenGLES30, false);
    dev.set_latency(2);
    let (w, h) = (8, 4);
    let pixels: Vec<u8> = (0..w * h * 4).map(|i| (i * 7) as u8).collect();
    let name = dev.create_texture(RGBA8, w as i32, h as i32, &pixels);
    let tex = TextureHandle::new(name as u64, w, h, TextureFormat::Rgba32);

    let got = Rc::new(RefCell::new(None));
    let g = got.clone();
    let id = rb
        .request_texture(tex, 0, false, move |req, _| {
            *g.borrow_mut() = Some(req.get_data::<u8>().map(|d| d.to_vec()));
        })
        .unwrap();
    let req = rb.get(id).unwrap();
    assert_eq!(req.backend_kind(), BackendKind::Plugin);
    let event_id = req.event_id().unwrap();
    assert!(event_id >= 1);

    // copy, then one update per frame until the fence signals
    let mut frames = 0;
    while rb.get(id).unwrap().state() == RequestState::Pending {
        rb.update();
        frames += 1;
        assert!(frames < 10);
    }
    assert_eq!(frames, 4);
    let data = got.borrow_mut().take().unwrap().unwrap();
    assert_eq!(data.len(), (w * h * 4) as usize);
    assert_eq!(data, pixels);
    // view is still there until dispose
    assert_eq!(rb.get(id).unwrap().get_data::<[u8; 4]>().unwrap().len(), (w * h) as usize);

    assert!(rb.dispose(id));
    assert!(event_kind(event_id).is_none());
    assert_eq!(dev.live_reads(), 0);
}

#[test]
fn test_buffer_through_plugin_auto_dispose() {
    let _g = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (dev, mut rb) = setup(Renderer::OpenGLES30, true);
    let floats = [0.5f32, 1.5, 2.5, 3.5];
    let bytes: Vec<u8> = floats.iter().flat_map(|f| f.to_ne_bytes()).collect();
    let name = dev.create_buffer(&bytes);
    let buf = BufferHandle::new(name as u64, 4, 4);

    let got = Rc::new(RefCell::new((None, vec![])));
    let g = got.clone();
    rb.request_buffer(buf, true, move |req, _| {
        let mut g = g.borrow_mut();
        g.0 = req.event_id();
        g.1 = req.get_data::<f32>().unwrap().to_vec();
    })
    .unwrap();
    rb.update();
    rb.update();
    let (event_id, values) = got.borrow().clone();
    assert_eq!(values, floats);
    assert_eq!(rb.pending(), 0);
    assert!(event_kind(event_id.unwrap()).is_none());
}

#[test]
fn test_gles2_buffer_is_unsupported() {
    let _g = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (dev, mut rb) = setup(Renderer::OpenGLES20, true);
    let name = dev.create_buffer(&[0; 16]);
    let r = rb.request_buffer(BufferHandle::new(name as u64, 4, 4), true, |_, _| {});
    assert!(matches!(r, Err(ReadbackError::Unsupported(SourceKind::Buffer))));
    assert_eq!(rb.pending(), 0);

    // textures still work on gles2
    let tex = dev.create_texture(RGBA8, 1, 1, &[1, 2, 3, 4]);
    let id = rb
        .request_texture(TextureHandle::new(tex as u64, 1, 1, TextureFormat::Rgba32), 0, true, |_, _| {})
        .unwrap();
    rb.update();
    rb.update();
    assert!(rb.get(id).is_none());
}

#[test]
fn test_lost_fence_is_an_error() {
    let _g = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (dev, mut rb) = setup(Renderer::OpenGLES30, false);
    dev.fail_next_fence();
    let name = dev.create_texture(RGBA8, 2, 2, &[0; 16]);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    let id = rb
        .request_texture(TextureHandle::new(name as u64, 2, 2, TextureFormat::Rgba32), 0, false, move |req, _| {
            *s.borrow_mut() = Some(req.state());
        })
        .unwrap();
    rb.update();
    rb.update();
    assert_eq!(*seen.borrow(), Some(RequestState::Errored));
    assert!(matches!(
        rb.get(id).unwrap().get_data::<u8>(),
        Err(ReadbackError::TransferFailed)
    ));
    rb.shutdown();
}

#[test]
fn test_deferred_capture_stays_bounded() {
    let _g = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let (dev, mut rb) = setup(Renderer::OpenGLES30, false);
    let name = dev.create_texture(RGBA8, 4, 4, &[5; 64]);
    let tex = TextureHandle::new(name as u64, 4, 4, TextureFormat::Rgba32);
    let hits = Rc::new(RefCell::new(0));
    let h = hits.clone();
    let mut list = CommandList::new("camera");
    let id = rb
        .request_texture_deferred(&mut list, tex, 0, false, move |req, _| {
            assert_eq!(req.get_data::<u8>().unwrap(), &[5; 64][..]);
            *h.borrow_mut() += 1;
        })
        .unwrap();
    assert_eq!(list.len(), 1);
    rb.host_mut().attach(list);

    for _ in 0..20 {
        rb.update();
    }
    assert_eq!(*hits.borrow(), 1);
    let event_id = rb.get(id).unwrap().event_id().unwrap();
    // the list copies every frame, delivered transfers are popped
    let queued = with_plugin(|p| p.pending_transfers(event_id));
    assert!(queued > 0 && queued <= 3, "{} transfers queued", queued);

    rb.host_mut().detach("camera");
    rb.dispose(id);
    // in-flight copies wait for the next render thread call
    with_plugin(|p| p.update(event_id));
    assert_eq!(dev.live_reads(), 0);
}

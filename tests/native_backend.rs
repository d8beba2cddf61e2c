use pixel_readback::{
    BackendKind, BufferHandle, CommandList, Dispatch, HeadlessHost, PluginMode, Readback,
    ReadbackConfig, ReadbackError, ReadbackSource, RequestState, TextureFormat,
};
use std::cell::RefCell;
use std::rc::Rc;

fn readback(host: HeadlessHost) -> Readback<HeadlessHost> {
    let mut cfg = ReadbackConfig::default();
    cfg.plugin.mode = PluginMode::None;
    Readback::from_config(host, &cfg).unwrap()
}

fn f32_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

#[test]
fn test_four_floats() {
    let mut rb = readback(HeadlessHost::default());
    let buf = rb.host_mut().create_buffer(4, 4, &f32_bytes(&[1.0, 2.0, 3.0, 4.0]));
    let got = Rc::new(RefCell::new(vec![]));
    let g = got.clone();
    let id = rb
        .request_buffer(buf, false, move |req, _| {
            assert_eq!(req.backend_kind(), BackendKind::Native);
            assert!(req.event_id().is_none());
            g.borrow_mut().extend_from_slice(req.get_data::<f32>().unwrap());
        })
        .unwrap();
    assert!(matches!(
        rb.get(id).unwrap().get_data::<f32>(),
        Err(ReadbackError::NotReady)
    ));
    rb.update();
    assert_eq!(*got.borrow(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(rb.get(id).unwrap().get_data::<f32>().unwrap().len(), 4);
}

#[test]
fn test_latency_and_forced_poll() {
    let mut host = HeadlessHost::default();
    host.set_latency(2);
    let mut rb = readback(host);
    let buf = rb.host_mut().create_buffer(1, 4, &f32_bytes(&[7.0]));
    let id = rb.request_buffer(buf, false, |_, _| {}).unwrap();
    rb.update();
    rb.update();
    assert_eq!(rb.poll_request(id, true).unwrap(), RequestState::Pending);
    rb.update();
    assert_eq!(rb.get(id).unwrap().state(), RequestState::Done);
}

#[test]
fn test_texture_snapshot_at_copy_time() {
    let mut rb = readback(HeadlessHost::default());
    let tex = rb
        .host_mut()
        .create_texture(2, 2, TextureFormat::R8, &[1, 2, 3, 4]);
    let id = rb.request_texture(tex, 0, false, |_, _| {}).unwrap();
    rb.host_mut().write_texture(tex.native, &[9, 9, 9, 9]).unwrap();
    rb.update();
    assert_eq!(rb.get(id).unwrap().get_data::<u8>().unwrap(), &[1, 2, 3, 4]);
}

#[test]
fn test_buffer_range() {
    let mut rb = readback(HeadlessHost::default());
    let buf = rb.host_mut().create_buffer(4, 4, &f32_bytes(&[1.0, 2.0, 3.0, 4.0]));
    let source = ReadbackSource::buffer_range(buf, 8, 8);
    let id = rb.request(source, Dispatch::Immediate, false, None).unwrap();
    rb.update();
    assert_eq!(rb.get(id).unwrap().get_data::<f32>().unwrap(), &[3.0, 4.0]);
}

#[test]
fn test_deferred_runs_with_the_list() {
    let mut rb = readback(HeadlessHost::default());
    let buf = rb.host_mut().create_buffer(2, 4, &f32_bytes(&[5.0, 6.0]));
    let mut list = CommandList::new("compute");
    let id = rb
        .request_buffer_deferred(&mut list, buf, false, |_, _| {})
        .unwrap();
    rb.update();
    rb.update();
    assert_eq!(rb.get(id).unwrap().state(), RequestState::Pending);

    rb.host_mut().submit(list);
    rb.update();
    assert_eq!(rb.get(id).unwrap().get_data::<f32>().unwrap(), &[5.0, 6.0]);
}

#[test]
fn test_native_failure_reaches_callback() {
    let mut rb = readback(HeadlessHost::default());
    let buf = BufferHandle::new(0xdead, 4, 4);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    rb.request_buffer(buf, true, move |req, _| *s.borrow_mut() = Some(req.state()))
        .unwrap();
    rb.update();
    assert_eq!(*seen.borrow(), Some(RequestState::Errored));
    assert_eq!(rb.pending(), 0);
}

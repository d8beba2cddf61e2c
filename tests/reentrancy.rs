use pixel_readback::{
    Dispatch, HeadlessHost, PluginMode, PollContext, Readback, ReadbackConfig, ReadbackRequest,
    ReadbackSource, RequestState,
};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_callback_chains_a_new_request() {
    let mut cfg = ReadbackConfig::default();
    cfg.plugin.mode = PluginMode::None;
    let mut rb = Readback::from_config(HeadlessHost::default(), &cfg).unwrap();
    let buf = rb.host_mut().create_buffer(1, 4, &3.0f32.to_le_bytes());

    let log = Rc::new(RefCell::new(vec![]));
    let l = log.clone();
    rb.request_buffer(buf, true, move |req: &ReadbackRequest, ctx: &mut PollContext<'_>| {
        l.borrow_mut().push(req.get_data::<f32>().unwrap()[0]);
        let l2 = l.clone();
        ctx.submit(
            ReadbackSource::buffer(buf),
            Dispatch::Immediate,
            true,
            Some(Box::new(move |req: &ReadbackRequest, _: &mut PollContext<'_>| {
                l2.borrow_mut().push(req.get_data::<f32>().unwrap()[0] * 10.0);
            })),
        )
        .unwrap();
    })
    .unwrap();

    let stats = rb.update();
    assert_eq!((stats.polled, stats.completed, stats.submitted), (1, 1, 1));
    assert_eq!(*log.borrow(), vec![3.0]);
    // the follow up was not polled in the pass that created it
    assert_eq!(rb.pending(), 1);

    let stats = rb.update();
    assert_eq!((stats.polled, stats.completed, stats.disposed), (1, 1, 1));
    assert_eq!(*log.borrow(), vec![3.0, 30.0]);
    assert_eq!(rb.pending(), 0);
}

#[test]
fn test_state_is_stable_after_completion() {
    let mut cfg = ReadbackConfig::default();
    cfg.plugin.mode = PluginMode::None;
    let mut rb = Readback::from_config(HeadlessHost::default(), &cfg).unwrap();
    let buf = rb.host_mut().create_buffer(1, 4, &[0; 4]);
    let hits = Rc::new(RefCell::new(0));
    let h = hits.clone();
    let id = rb
        .request_buffer(buf, false, move |_, _| *h.borrow_mut() += 1)
        .unwrap();
    for _ in 0..5 {
        rb.update();
        assert_eq!(*hits.borrow(), 1);
    }
    assert_eq!(rb.poll_request(id, true).unwrap(), RequestState::Done);
    assert_eq!(*hits.borrow(), 1);
}

// RustPixel
// copyright zipxing@hotmail.com 2022～2025

//! Per frame driver for readback requests.
//!
//! Requests wait in a double buffered queue. [`Dispatcher::poll_all`] runs
//! once per frame on the thread that owns the graphics context: it polls
//! every request that was queued when the pass began, once each, in order.
//! Finished requests with `auto_dispose` are released, the rest move to the
//! back queue and the queues swap. Requests made by callbacks during the pass
//! join after it.

use crate::error::{ReadbackError, Result};
use crate::host::GraphicsHost;
use crate::request::{PollContext, ReadbackRequest, RequestFactory, RequestId, RequestState};
use log::{debug, info, trace};
use std::collections::VecDeque;
use std::mem;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub polled: usize,
    /// requests that finished in this pass
    pub completed: usize,
    pub disposed: usize,
    pub requeued: usize,
    /// requests created by callbacks, queued for the next pass
    pub submitted: usize,
}

#[derive(Default)]
pub struct Dispatcher {
    queue: VecDeque<ReadbackRequest>,
    back: VecDeque<ReadbackRequest>,
    trace: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// log every request on every pass
    pub fn with_trace(trace: bool) -> Self {
        let mut d = Self::default();
        d.trace = trace;
        d
    }

    pub fn submit(&mut self, req: ReadbackRequest) -> RequestId {
        let id = req.id();
        self.queue.push_back(req);
        id
    }

    pub fn poll_all(&mut self, host: &mut dyn GraphicsHost, factory: &RequestFactory) -> PollStats {
        let mut stats = PollStats::default();
        let mut followups = Vec::new();
        host.maintain();
        while let Some(mut req) = self.queue.pop_front() {
            let was_terminal = req.is_terminal();
            {
                let mut ctx = PollContext::new(&mut *host, factory, &mut followups);
                req.poll(&mut ctx, false);
            }
            stats.polled += 1;
            if self.trace {
                trace!("poll {:?}", req);
            }
            if req.is_terminal() {
                if !was_terminal {
                    stats.completed += 1;
                }
                if req.auto_dispose() {
                    req.dispose();
                    stats.disposed += 1;
                    continue;
                }
            }
            self.back.push_back(req);
            stats.requeued += 1;
        }
        mem::swap(&mut self.queue, &mut self.back);
        stats.submitted = followups.len();
        self.queue.extend(followups);
        if self.trace {
            debug!("poll_all {:?}", stats);
        }
        stats
    }

    /// Polls a single request out of turn. `force` asks a native backend to
    /// update now. Requests made by its callback join the queue.
    pub fn poll_one(
        &mut self,
        id: RequestId,
        host: &mut dyn GraphicsHost,
        factory: &RequestFactory,
        force: bool,
    ) -> Result<RequestState> {
        let mut followups = Vec::new();
        let req = self
            .queue
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(ReadbackError::UnknownRequest(id))?;
        let mut ctx = PollContext::new(host, factory, &mut followups);
        req.poll(&mut ctx, force);
        let state = req.state();
        self.queue.extend(followups);
        Ok(state)
    }

    fn position(&self, id: RequestId) -> Option<usize> {
        self.queue.iter().position(|r| r.id() == id)
    }

    pub fn dispose(&mut self, id: RequestId) -> bool {
        match self.take(id) {
            Some(req) => {
                req.dispose();
                true
            }
            None => false,
        }
    }

    /// removes a request from the queue, dropping it disposes it
    pub fn take(&mut self, id: RequestId) -> Option<ReadbackRequest> {
        let idx = self.position(id)?;
        self.queue.remove(idx)
    }

    pub fn get(&self, id: RequestId) -> Option<&ReadbackRequest> {
        self.queue.iter().find(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn shutdown(&mut self) {
        let n = self.queue.len() + self.back.len();
        for req in self.queue.drain(..).chain(self.back.drain(..)) {
            req.dispose();
        }
        if n > 0 {
            info!("readback shutdown, disposed {} requests", n);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

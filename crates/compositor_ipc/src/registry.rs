use std::{
    fmt::Debug,
    panic::{catch_unwind, AssertUnwindSafe},
};

use crate::event::StreamStatus;

/// Items that can be routed by a key, e.g. a frame by its message type.
pub trait Routable {
    type Key: Copy + Eq + Debug;
    fn route_key(&self) -> Self::Key;
}

/// Which events a handler wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest<K> {
    All,
    Only(K),
}

impl<K: PartialEq> Interest<K> {
    pub fn matches(&self, key: &K) -> bool {
        match self {
            Interest::All => true,
            Interest::Only(wanted) => wanted == key,
        }
    }
}

pub type Handler<E, C> = Box<dyn FnMut(&mut C, &E) -> anyhow::Result<()>>;
pub type StatusHandler<C> = Box<dyn FnMut(&mut C, StreamStatus) -> anyhow::Result<()>>;

/// Consumer callbacks for one client. `C` is the context handed to every callback, which lets
/// callbacks issue requests of their own while being dispatched.
///
/// Handlers run in registration order. A handler that errors or panics is logged and skipped;
/// the remaining handlers still run.
pub struct Registry<E: Routable, C> {
    events: Vec<(Interest<E::Key>, Handler<E, C>)>,
    replies: Vec<(E::Key, Handler<E, C>)>,
    status: Vec<StatusHandler<C>>,
}

impl<E: Routable, C> Default for Registry<E, C> {
    fn default() -> Self {
        Registry { events: Vec::new(), replies: Vec::new(), status: Vec::new() }
    }
}

impl<E: Routable, C> Registry<E, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, interest: Interest<E::Key>, handler: impl FnMut(&mut C, &E) -> anyhow::Result<()> + 'static) {
        self.events.push((interest, Box::new(handler)));
    }

    pub fn on_reply(&mut self, key: E::Key, handler: impl FnMut(&mut C, &E) -> anyhow::Result<()> + 'static) {
        self.replies.push((key, Box::new(handler)));
    }

    pub fn on_status(&mut self, handler: impl FnMut(&mut C, StreamStatus) -> anyhow::Result<()> + 'static) {
        self.status.push(Box::new(handler));
    }

    /// Returns how many handlers ran successfully.
    pub fn dispatch_event(&mut self, ctx: &mut C, event: &E) -> usize {
        let key = event.route_key();
        let mut ran = 0;
        for (interest, handler) in &mut self.events {
            if interest.matches(&key) && run_isolated("event", &key, || handler(ctx, event)) {
                ran += 1;
            }
        }
        ran
    }

    pub fn dispatch_reply(&mut self, ctx: &mut C, reply: &E) -> usize {
        let key = reply.route_key();
        let mut ran = 0;
        for (wanted, handler) in &mut self.replies {
            if *wanted == key && run_isolated("reply", &key, || handler(ctx, reply)) {
                ran += 1;
            }
        }
        ran
    }

    pub fn dispatch_status(&mut self, ctx: &mut C, status: StreamStatus) -> usize {
        let mut ran = 0;
        for handler in &mut self.status {
            if run_isolated("status", &status, || handler(ctx, status)) {
                ran += 1;
            }
        }
        ran
    }
}

fn run_isolated(kind: &str, key: &dyn Debug, f: impl FnOnce() -> anyhow::Result<()>) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            log::error!("Error in IPC {} handler for {:?}: {:?}", kind, key, err);
            false
        }
        Err(_) => {
            log::error!("IPC {} handler for {:?} panicked", kind, key);
            false
        }
    }
}

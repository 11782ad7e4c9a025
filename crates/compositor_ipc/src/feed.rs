//! Glue between an [`EventChannel`], a [`Registry`] and a [`UiContext`].

use std::{
    cell::{OnceCell, RefCell},
    rc::Rc,
};

use crate::{
    config::ReconnectPolicy,
    error::Result,
    event::{ChannelState, Delivery, EventChannel, EventSource, Handoff, StreamStatus},
    registry::{Interest, Registry, Routable},
    ui::{DispatchGuard, UiContext},
};

/// Upper bound on reply rounds after one delivery, in case reply handlers keep sending commands.
pub const MAX_REPLY_ROUNDS: usize = 64;

/// The value handed to every handler of a [`Feed`].
pub trait HandlerContext<E> {
    /// Replies to commands sent during dispatch, to be routed to the reply handlers.
    fn take_replies(&mut self) -> Vec<E> {
        Vec::new()
    }
}

struct FeedState<E: Routable, C> {
    ctx: C,
    registry: Registry<E, C>,
}

impl<E: Routable, C: HandlerContext<E>> FeedState<E, C> {
    fn dispatch(&mut self, delivery: Delivery<E>) {
        match delivery {
            Delivery::Event(event) => {
                self.registry.dispatch_event(&mut self.ctx, &event);
            }
            Delivery::Status(status) => {
                log::info!("IPC event stream status: {:?}", status);
                self.registry.dispatch_status(&mut self.ctx, status);
            }
        }
        self.drain_replies();
    }

    fn drain_replies(&mut self) {
        for _ in 0..MAX_REPLY_ROUNDS {
            let replies = self.ctx.take_replies();
            if replies.is_empty() {
                return;
            }
            for reply in &replies {
                self.registry.dispatch_reply(&mut self.ctx, reply);
            }
        }
        let dropped = self.ctx.take_replies().len();
        if dropped > 0 {
            log::warn!("Dropping {} IPC replies, reply handlers kept sending commands", dropped);
        }
    }
}

/// A running event stream whose deliveries are dispatched on the UI thread.
///
/// Handlers must not call back into the `Feed` (or the client owning it) while being
/// dispatched. They get the context `C` instead.
pub struct Feed<E: Routable, C> {
    // the reader has to be stopped before the UI callback goes away
    channel: EventChannel<E>,
    _guard: DispatchGuard,
    state: Rc<RefCell<FeedState<E, C>>>,
}

impl<E, C> Feed<E, C>
where
    E: Routable + Send + 'static,
    C: HandlerContext<E> + 'static,
{
    pub fn connect<S>(source: S, ctx: C, reconnect: Option<ReconnectPolicy>, ui: &dyn UiContext) -> Result<Self>
    where
        S: EventSource<Event = E>,
    {
        let state = Rc::new(RefCell::new(FeedState { ctx, registry: Registry::new() }));
        let handoff: Rc<OnceCell<Handoff<E>>> = Rc::default();
        let (waker, guard) = ui.attach(Box::new({
            let state = state.clone();
            let handoff = handoff.clone();
            move || {
                if let Some(handoff) = handoff.get() {
                    handoff.deliver(|delivery| state.borrow_mut().dispatch(delivery));
                }
            }
        }));
        let channel = EventChannel::spawn(source, waker, reconnect)?;
        // the first wakeup can't be processed before this, both run on the UI thread
        let _ = handoff.set(channel.handoff());
        Ok(Feed { channel, _guard: guard, state })
    }
}

impl<E: Routable, C: HandlerContext<E>> Feed<E, C> {
    pub fn on_event(&self, interest: Interest<E::Key>, handler: impl FnMut(&mut C, &E) -> anyhow::Result<()> + 'static) {
        self.state.borrow_mut().registry.on_event(interest, handler);
    }

    pub fn on_reply(&self, key: E::Key, handler: impl FnMut(&mut C, &E) -> anyhow::Result<()> + 'static) {
        self.state.borrow_mut().registry.on_reply(key, handler);
    }

    pub fn on_status(&self, handler: impl FnMut(&mut C, StreamStatus) -> anyhow::Result<()> + 'static) {
        self.state.borrow_mut().registry.on_status(handler);
    }

    /// Run `f` with the handler context, then route any replies it queued.
    pub fn with_ctx<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut state = self.state.borrow_mut();
        let result = f(&mut state.ctx);
        state.drain_replies();
        result
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn shutdown(&mut self) {
        self.channel.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{transport::Closer, ui::UiLoop};
    use pretty_assertions::assert_eq;
    use std::{cell::Cell, time::Duration};

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Num(u32);

    impl Routable for Num {
        type Key = bool;
        fn route_key(&self) -> bool {
            self.0 % 2 == 0
        }
    }

    struct Counting(std::vec::IntoIter<u32>);

    impl EventSource for Counting {
        type Event = Num;

        fn connect(&mut self) -> Result<Closer> {
            Ok(Closer::none())
        }

        fn next_event(&mut self) -> Result<Option<Num>> {
            Ok(self.0.next().map(Num))
        }
    }

    /// Queues a reply for every even number it is asked about, and keeps replying to its own
    /// replies forever.
    #[derive(Default)]
    struct Echo {
        pending: Vec<Num>,
        log: Vec<String>,
    }

    impl HandlerContext<Num> for Echo {
        fn take_replies(&mut self) -> Vec<Num> {
            std::mem::take(&mut self.pending)
        }
    }

    #[test]
    fn test_events_then_replies_then_status() {
        let ui = UiLoop::new();
        let feed = Feed::connect(Counting(vec![1, 2, 3].into_iter()), Echo::default(), None, &ui).unwrap();
        feed.on_event(Interest::All, |echo, num| {
            echo.log.push(format!("event {}", num.0));
            if num.0 == 2 {
                echo.pending.push(Num(20));
            }
            Ok(())
        });
        feed.on_reply(true, |echo, num| {
            echo.log.push(format!("reply {}", num.0));
            Ok(())
        });
        let closed = Rc::new(Cell::new(false));
        feed.on_status({
            let closed = closed.clone();
            move |echo, status| {
                echo.log.push(format!("{:?}", status));
                closed.set(status == StreamStatus::Closed);
                Ok(())
            }
        });

        assert!(ui.run_until(|| closed.get(), Duration::from_secs(5)));
        let log = feed.with_ctx(|echo| echo.log.clone());
        assert_eq!(log, vec!["event 1", "event 2", "reply 20", "event 3", "Disconnected", "Closed"]);
    }

    #[test]
    fn test_reply_rounds_are_bounded() {
        let ui = UiLoop::new();
        let feed = Feed::connect(Counting(vec![].into_iter()), Echo::default(), None, &ui).unwrap();
        let rounds = Rc::new(Cell::new(0));
        feed.on_reply(true, {
            let rounds = rounds.clone();
            move |echo, num| {
                rounds.set(rounds.get() + 1);
                echo.pending.push(*num);
                Ok(())
            }
        });
        feed.with_ctx(|echo| echo.pending.push(Num(0)));
        assert_eq!(rounds.get(), MAX_REPLY_ROUNDS);
        assert!(feed.with_ctx(|echo| std::mem::take(&mut echo.pending)).is_empty());
    }
}

//! Getting from the reader thread back onto the UI thread.
//!
//! The reader only ever holds a [`Wake`]; everything that touches consumer state runs in a
//! callback registered through [`UiContext::attach`], on whatever thread drives that context.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    sync::mpsc,
    time::{Duration, Instant},
};

/// Cross-thread wakeup for a callback living on the UI thread.
pub trait Wake: Send + 'static {
    fn wake(&self);
}

impl<F: Fn() + Send + 'static> Wake for F {
    fn wake(&self) {
        self()
    }
}

/// Detaches a callback from its [`UiContext`] when dropped.
#[must_use = "dropping the guard detaches the callback"]
pub struct DispatchGuard(Option<Box<dyn FnOnce()>>);

impl DispatchGuard {
    pub fn new(detach: impl FnOnce() + 'static) -> Self {
        DispatchGuard(Some(Box::new(detach)))
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if let Some(detach) = self.0.take() {
            detach();
        }
    }
}

/// Something that runs callbacks on the UI thread when woken from another thread.
pub trait UiContext {
    fn attach(&self, callback: Box<dyn FnMut()>) -> (Box<dyn Wake>, DispatchGuard);
}

type Callbacks = RefCell<HashMap<usize, Option<Box<dyn FnMut()>>>>;

/// A minimal UI-thread task queue, for consumers that don't run a toolkit main loop.
/// Call [`UiLoop::iteration`] from the thread that owns the consumers.
pub struct UiLoop {
    sender: mpsc::Sender<usize>,
    receiver: mpsc::Receiver<usize>,
    callbacks: Rc<Callbacks>,
    next_id: Cell<usize>,
}

impl Default for UiLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl UiLoop {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        UiLoop { sender, receiver, callbacks: Rc::default(), next_id: Cell::new(0) }
    }

    /// Run the callbacks of all pending wakeups. With a timeout, waits up to that long for the
    /// first wakeup. Returns how many callbacks ran.
    pub fn iteration(&self, timeout: Option<Duration>) -> usize {
        let mut next = match timeout {
            Some(timeout) => self.receiver.recv_timeout(timeout).ok(),
            None => self.receiver.try_recv().ok(),
        };
        let mut ran = 0;
        while let Some(id) = next {
            if self.run_callback(id) {
                ran += 1;
            }
            next = self.receiver.try_recv().ok();
        }
        ran
    }

    /// Iterate until `done` returns true or `timeout` passes. Returns the final `done()`.
    pub fn run_until(&self, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.iteration(Some((deadline - now).min(Duration::from_millis(50))));
        }
        true
    }

    fn run_callback(&self, id: usize) -> bool {
        // taken out for the duration of the call, so the callback may attach or detach others
        let callback = self.callbacks.borrow_mut().get_mut(&id).and_then(Option::take);
        let Some(mut callback) = callback else {
            return false;
        };
        callback();
        if let Some(slot) = self.callbacks.borrow_mut().get_mut(&id) {
            *slot = Some(callback);
        }
        true
    }
}

impl UiContext for UiLoop {
    fn attach(&self, callback: Box<dyn FnMut()>) -> (Box<dyn Wake>, DispatchGuard) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.callbacks.borrow_mut().insert(id, Some(callback));

        let sender = self.sender.clone();
        let waker = move || {
            // the loop is gone, nobody is left to wake
            let _ = sender.send(id);
        };
        let callbacks = Rc::downgrade(&self.callbacks);
        let guard = DispatchGuard::new(move || {
            if let Some(callbacks) = callbacks.upgrade() {
                callbacks.borrow_mut().remove(&id);
            }
        });
        (Box::new(waker), guard)
    }
}

#[cfg(feature = "glib")]
pub use self::glib_context::GlibContext;

#[cfg(feature = "glib")]
mod glib_context {
    use super::{DispatchGuard, UiContext, Wake};

    /// Runs callbacks inside a glib main context, i.e. the GTK main loop.
    pub struct GlibContext(glib::MainContext);

    impl GlibContext {
        pub fn new(context: glib::MainContext) -> Self {
            GlibContext(context)
        }
    }

    impl Default for GlibContext {
        fn default() -> Self {
            GlibContext(glib::MainContext::default())
        }
    }

    struct GlibWaker(glib::Sender<()>);

    impl Wake for GlibWaker {
        fn wake(&self) {
            let _ = self.0.send(());
        }
    }

    impl UiContext for GlibContext {
        #[allow(deprecated)]
        fn attach(&self, mut callback: Box<dyn FnMut()>) -> (Box<dyn Wake>, DispatchGuard) {
            let (sender, receiver) = glib::MainContext::channel::<()>(glib::Priority::DEFAULT);
            let source_id = receiver.attach(Some(&self.0), move |()| {
                callback();
                glib::ControlFlow::Continue
            });
            (Box::new(GlibWaker(sender)), DispatchGuard::new(move || source_id.remove()))
        }
    }

}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wake_from_other_thread() {
        let ui = UiLoop::new();
        let hits = Rc::new(Cell::new(0));
        let (waker, _guard) = ui.attach(Box::new({
            let hits = hits.clone();
            move || hits.set(hits.get() + 1)
        }));
        std::thread::spawn(move || {
            waker.wake();
            waker.wake();
        })
        .join()
        .unwrap();
        assert_eq!(ui.iteration(Some(Duration::from_secs(1))), 2);
        assert_eq!(hits.get(), 2);
        assert_eq!(ui.iteration(None), 0);
    }

    #[test]
    fn test_detached_callback_is_skipped() {
        let ui = UiLoop::new();
        let hits = Rc::new(Cell::new(0));
        let (waker, guard) = ui.attach(Box::new({
            let hits = hits.clone();
            move || hits.set(hits.get() + 1)
        }));
        waker.wake();
        drop(guard);
        assert_eq!(ui.iteration(None), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_callback_can_detach_itself() {
        let ui = UiLoop::new();
        let guard_cell: Rc<RefCell<Option<DispatchGuard>>> = Rc::default();
        let (waker, guard) = ui.attach(Box::new({
            let guard_cell = guard_cell.clone();
            move || drop(guard_cell.borrow_mut().take())
        }));
        *guard_cell.borrow_mut() = Some(guard);
        waker.wake();
        waker.wake();
        assert_eq!(ui.iteration(None), 1);
    }

    #[test]
    fn test_run_until_times_out() {
        let ui = UiLoop::new();
        assert!(!ui.run_until(|| false, Duration::from_millis(20)));
        assert!(ui.run_until(|| true, Duration::ZERO));
    }
}

//! Background reader for compositor event streams.
//!
//! The reader thread and the UI thread take turns: the reader blocks on a permit, reads one
//! item, parks it in a single slot and wakes the UI. The UI takes the item, dispatches it and
//! hands the permit back. The reader therefore never reads item N+1 before item N has been
//! dispatched, which bounds memory without dropping events.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crate::{config::ReconnectPolicy, error::Result, transport::Closer, ui::Wake};

/// A blocking stream of events, e.g. a subscribed i3 event connection.
pub trait EventSource: Send + 'static {
    type Event: Send + 'static;

    /// Open (or reopen) the stream, including any handshake. The returned [`Closer`] must be able
    /// to wake a call to [`EventSource::next_event`] blocked on this stream.
    fn connect(&mut self) -> Result<Closer>;

    /// Block until the next event arrives. `Ok(None)` means the stream ended.
    fn next_event(&mut self) -> Result<Option<Self::Event>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for the UI to hand back the permit.
    Idle,
    WaitingForFrame,
    Delivering,
    Reconnecting,
    Closed,
}

/// Connection changes, delivered through the same slot as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Disconnected,
    Reconnected,
    /// The reader gave up. No more deliveries follow.
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery<E> {
    Event(E),
    Status(StreamStatus),
}

#[derive(Debug)]
struct Gate {
    permits: usize,
    cancelled: bool,
}

struct Shared<E> {
    slot: Mutex<Option<Delivery<E>>>,
    gate: Mutex<Gate>,
    gate_changed: Condvar,
    state: Mutex<ChannelState>,
    closer: Mutex<Closer>,
}

// mutex poisoning only happens if a holder panicked, and none of the critical sections can.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<E> Shared<E> {
    fn set_state(&self, state: ChannelState) {
        *lock(&self.state) = state;
    }

    fn is_cancelled(&self) -> bool {
        lock(&self.gate).cancelled
    }

    /// Take a permit. Returns false once cancelled.
    fn acquire(&self) -> bool {
        let mut gate = lock(&self.gate);
        loop {
            if gate.cancelled {
                return false;
            }
            if gate.permits > 0 {
                gate.permits -= 1;
                return true;
            }
            gate = self.gate_changed.wait(gate).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn release(&self) {
        lock(&self.gate).permits += 1;
        self.gate_changed.notify_all();
    }

    /// Sleep for `duration` unless cancelled first. Returns true if cancelled.
    fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut gate = lock(&self.gate);
        while !gate.cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            gate = self.gate_changed.wait_timeout(gate, deadline - now).unwrap_or_else(|poisoned| poisoned.into_inner()).0;
        }
        true
    }

    fn cancel(&self) {
        lock(&self.gate).cancelled = true;
        self.gate_changed.notify_all();
        lock(&self.closer).close();
    }

    fn post(&self, delivery: Delivery<E>) {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            log::error!("IPC event slot was overwritten before it was delivered");
        }
        *slot = Some(delivery);
    }
}

/// UI-thread side of the handoff.
pub struct Handoff<E>(Arc<Shared<E>>);

impl<E> Clone for Handoff<E> {
    fn clone(&self) -> Self {
        Handoff(self.0.clone())
    }
}

impl<E> Handoff<E> {
    /// Take the pending delivery, if any, pass it to `f` and then let the reader continue.
    /// Returns whether something was delivered.
    pub fn deliver(&self, f: impl FnOnce(Delivery<E>)) -> bool {
        let Some(delivery) = lock(&self.0.slot).take() else {
            return false;
        };
        f(delivery);
        self.0.release();
        true
    }

    pub fn state(&self) -> ChannelState {
        *lock(&self.0.state)
    }
}

/// Owns the reader thread of one event stream. Dropping it stops and joins the thread.
pub struct EventChannel<E> {
    shared: Arc<Shared<E>>,
    worker: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> EventChannel<E> {
    /// Connect `source` on the calling thread, then start reading it in the background.
    /// Connection or handshake errors are returned here rather than delivered.
    pub fn spawn<S>(mut source: S, waker: Box<dyn Wake>, reconnect: Option<ReconnectPolicy>) -> Result<Self>
    where
        S: EventSource<Event = E>,
    {
        let closer = source.connect()?;
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            // the successful handshake grants the first read
            gate: Mutex::new(Gate { permits: 1, cancelled: false }),
            gate_changed: Condvar::new(),
            state: Mutex::new(ChannelState::Idle),
            closer: Mutex::new(closer),
        });
        let worker = std::thread::Builder::new()
            .name("ipc-event-reader".to_string())
            .spawn({
                let shared = shared.clone();
                move || run_reader(source, &shared, waker, reconnect)
            })
            .expect("Failed to start IPC event reader thread");
        Ok(EventChannel { shared, worker: Some(worker) })
    }
}

impl<E> EventChannel<E> {
    pub fn handoff(&self) -> Handoff<E> {
        Handoff(self.shared.clone())
    }

    pub fn state(&self) -> ChannelState {
        *lock(&self.shared.state)
    }

    /// Stop the reader: cancel, shut the socket down to wake a pending read, and join.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        log::debug!("Shutting down IPC event reader");
        self.shared.cancel();
        if worker.join().is_err() {
            log::error!("IPC event reader thread panicked");
        }
        self.shared.set_state(ChannelState::Closed);
    }
}

impl<E> Drop for EventChannel<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_reader<S: EventSource>(mut source: S, shared: &Shared<S::Event>, waker: Box<dyn Wake>, reconnect: Option<ReconnectPolicy>) {
    let mut connected = true;
    loop {
        shared.set_state(ChannelState::Idle);
        if !shared.acquire() {
            break;
        }
        let delivery = if connected {
            shared.set_state(ChannelState::WaitingForFrame);
            match source.next_event() {
                Ok(Some(event)) => Delivery::Event(event),
                Ok(None) | Err(_) if shared.is_cancelled() => break,
                Ok(None) => {
                    log::warn!("Compositor closed the IPC event stream");
                    connected = false;
                    Delivery::Status(StreamStatus::Disconnected)
                }
                Err(err) => {
                    log::error!("Lost IPC event stream: {:?}", err);
                    connected = false;
                    Delivery::Status(StreamStatus::Disconnected)
                }
            }
        } else {
            match &reconnect {
                Some(policy) => {
                    shared.set_state(ChannelState::Reconnecting);
                    match reconnect_with_backoff(&mut source, shared, policy) {
                        Some(true) => {
                            connected = true;
                            Delivery::Status(StreamStatus::Reconnected)
                        }
                        Some(false) => Delivery::Status(StreamStatus::Closed),
                        None => break,
                    }
                }
                None => Delivery::Status(StreamStatus::Closed),
            }
        };
        let is_final = matches!(delivery, Delivery::Status(StreamStatus::Closed));
        shared.set_state(ChannelState::Delivering);
        shared.post(delivery);
        waker.wake();
        if is_final {
            break;
        }
    }
    shared.set_state(ChannelState::Closed);
    log::debug!("IPC event reader finished");
}

/// Returns `Some(true)` when reconnected, `Some(false)` when all attempts failed and `None` when cancelled.
fn reconnect_with_backoff<S: EventSource>(source: &mut S, shared: &Shared<S::Event>, policy: &ReconnectPolicy) -> Option<bool> {
    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_for(attempt);
        log::info!("Reconnecting IPC event stream in {:?} (attempt {}/{})", delay, attempt + 1, policy.max_attempts);
        if shared.sleep_unless_cancelled(delay) {
            return None;
        }
        match source.connect() {
            Ok(closer) => {
                *lock(&shared.closer) = closer;
                // cancel() may have closed the previous closer while we were connecting
                if shared.is_cancelled() {
                    lock(&shared.closer).close();
                    return None;
                }
                log::info!("Reconnected IPC event stream");
                return Some(true);
            }
            Err(err) => log::warn!("Failed to reconnect IPC event stream: {}", err),
        }
    }
    log::error!("Giving up on the IPC event stream after {} attempts", policy.max_attempts);
    Some(false)
}

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::state::QueryState;

pub(crate) type Listener<T, E> = Box<dyn Fn(&QueryState<T, E>) + Send + Sync + 'static>;

/// One registered listener.
///
/// No lock is held while the callback runs, so a listener may call back
/// into the client (refetch on error, read state, unsubscribe itself).
/// The callback runs on one thread at a time: a delivery arriving while
/// another thread is inside the callback is queued and run by that thread
/// once the callback returns. A delivery nested inside the callback on the
/// same thread runs inline.
pub(crate) struct ListenerSlot<T, E> {
    pub(crate) id: u64,
    callback: Listener<T, E>,
    state: Mutex<SlotState<T, E>>,
    idle: Condvar,
}

struct SlotState<T, E> {
    detached: bool,
    /// Highest state version handed to the callback.
    seen: u64,
    /// Thread currently running the callback.
    delivering_on: Option<ThreadId>,
    queued: VecDeque<(u64, QueryState<T, E>)>,
    /// Published but not yet delivered notifications, by publishing thread.
    pending: Vec<ThreadId>,
}

impl<T, E> SlotState<T, E> {
    fn take_pending(&mut self, thread: ThreadId) {
        if let Some(i) = self.pending.iter().position(|t| *t == thread) {
            self.pending.swap_remove(i);
        }
    }

    fn busy_elsewhere(&self, thread: ThreadId) -> bool {
        self.delivering_on.is_some_and(|t| t != thread)
            || self.pending.iter().any(|t| *t != thread)
    }
}

impl<T: Clone, E: Clone> ListenerSlot<T, E> {
    pub(crate) fn new(id: u64, callback: Listener<T, E>) -> Self {
        Self {
            id,
            callback,
            state: Mutex::new(SlotState {
                detached: false,
                seen: 0,
                delivering_on: None,
                queued: VecDeque::new(),
                pending: Vec::new(),
            }),
            idle: Condvar::new(),
        }
    }

    /// Announce a delivery that the current thread is about to make.
    ///
    /// Called while the cache lock is held, so detaching can wait for
    /// transitions that were already visible before it started.
    pub(crate) fn publish(&self) {
        self.lock().pending.push(thread::current().id());
    }

    /// Deliver `state` unless the slot is detached or already saw a newer version.
    pub(crate) fn deliver(&self, version: u64, state: &QueryState<T, E>) {
        let current = thread::current().id();
        let mut slot = self.lock();
        slot.take_pending(current);

        if slot.detached || version <= slot.seen {
            drop(slot);
            self.idle.notify_all();
            return;
        }
        match slot.delivering_on {
            Some(thread) if thread == current => {
                slot.seen = version;
                drop(slot);
                (self.callback)(state);
                return;
            }
            Some(_) => {
                slot.queued.push_back((version, state.clone()));
                return;
            }
            None => {}
        }

        slot.seen = version;
        slot.delivering_on = Some(current);
        drop(slot);

        let mut delivery = Delivery {
            slot: self,
            finished: false,
        };
        (self.callback)(state);
        while let Some(queued) = delivery.next_queued() {
            (self.callback)(&queued);
        }
    }

    /// Stop all further deliveries.
    ///
    /// Waits until no other thread is running the callback and until
    /// transitions other threads already published have been delivered.
    /// From inside the slot's own callback it returns immediately.
    pub(crate) fn detach(&self) {
        let current = thread::current().id();
        let slot = self.lock();
        let mut slot = self
            .idle
            .wait_while(slot, |s| s.busy_elsewhere(current))
            .unwrap_or_else(PoisonError::into_inner);
        slot.detached = true;
        slot.queued.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The current thread's turn at running a slot's callback.
struct Delivery<'a, T: Clone, E: Clone> {
    slot: &'a ListenerSlot<T, E>,
    finished: bool,
}

impl<T: Clone, E: Clone> Delivery<'_, T, E> {
    /// Next queued state newer than anything delivered, or `None` after
    /// handing the slot back.
    fn next_queued(&mut self) -> Option<QueryState<T, E>> {
        let mut slot = self.slot.lock();
        while let Some((version, state)) = slot.queued.pop_front() {
            if !slot.detached && version > slot.seen {
                slot.seen = version;
                return Some(state);
            }
        }
        slot.delivering_on = None;
        self.finished = true;
        drop(slot);
        self.slot.idle.notify_all();
        None
    }
}

impl<T: Clone, E: Clone> Drop for Delivery<'_, T, E> {
    // Reached without `finished` only when the callback panicked.
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut slot = self.slot.lock();
        slot.delivering_on = None;
        slot.queued.clear();
        drop(slot);
        self.slot.idle.notify_all();
    }
}

/// Handle returned by [`QueryClient::subscribe`](crate::QueryClient::subscribe).
///
/// The listener stays attached until [`unsubscribe`](Self::unsubscribe) is
/// called or the handle is dropped. Transitions that were already visible
/// when unsubscribing started still reach the listener; once it returns,
/// the listener is never invoked again. Unsubscribing from inside the
/// listener's own callback takes effect immediately.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

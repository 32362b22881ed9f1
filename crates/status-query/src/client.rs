use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace, warn};

use crate::state::{QueryState, RenderState};
use crate::subscription::{Listener, ListenerSlot, Subscription};

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Client-wide behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Keep serving `Success` data while a refetch is underway.
    pub stale_while_revalidate: bool,
}

/// Keyed async state machine with in-flight deduplication.
///
/// For each key at most one operation is in flight. Callers asking for a
/// key that is already loading attach to the running operation instead of
/// starting another. When a manual [`refetch`](Self::refetch) supersedes a
/// running operation, the older result is discarded whenever it lands, so
/// the visible state always reflects the most recently started request.
///
/// Cloning is cheap; clones share the same cache.
pub struct QueryClient<T, E> {
    inner: Arc<Inner<T, E>>,
}

struct Inner<T, E> {
    entries: Mutex<HashMap<String, Entry<T, E>>>,
    options: QueryOptions,
    next_listener_id: AtomicU64,
}

struct Entry<T, E> {
    state: QueryState<T, E>,
    /// Bumped on every transition; listeners never see versions go backwards.
    version: u64,
    /// Id of the most recently started operation.
    generation: u64,
    in_flight: Option<InFlight<T, E>>,
    listeners: Vec<Arc<ListenerSlot<T, E>>>,
}

struct InFlight<T, E> {
    generation: u64,
    outcome: SharedOutcome<T, E>,
}

/// What a caller of [`QueryClient::fetch`] waits on.
enum Observed<T, E> {
    Pending {
        generation: u64,
        outcome: SharedOutcome<T, E>,
    },
    Settled(Result<T, E>),
}

/// State change waiting to be delivered once the cache lock is released.
struct Notification<T, E> {
    version: u64,
    state: QueryState<T, E>,
    listeners: Vec<Arc<ListenerSlot<T, E>>>,
}

impl<T: Clone, E: Clone> Notification<T, E> {
    fn deliver(self) {
        for listener in &self.listeners {
            listener.deliver(self.version, &self.state);
        }
    }
}

impl<T, E> Default for Entry<T, E> {
    fn default() -> Self {
        Self {
            state: QueryState::Idle,
            version: 0,
            generation: 0,
            in_flight: None,
            listeners: Vec::new(),
        }
    }
}

impl<T: Clone, E: Clone> Entry<T, E> {
    fn transition(&mut self, state: QueryState<T, E>) -> Notification<T, E> {
        self.state = state;
        self.version += 1;
        for listener in &self.listeners {
            listener.publish();
        }
        Notification {
            version: self.version,
            state: self.state.clone(),
            listeners: self.listeners.clone(),
        }
    }

    /// Record the result of operation `generation` if it is still the one in
    /// flight. Returns `None` when it was superseded or already recorded.
    fn settle(
        &mut self,
        key: &str,
        generation: u64,
        result: Result<T, E>,
    ) -> Option<Notification<T, E>> {
        if self
            .in_flight
            .as_ref()
            .is_none_or(|in_flight| in_flight.generation != generation)
        {
            return None;
        }
        self.in_flight = None;
        let next = match result {
            Ok(data) => {
                debug!(key, generation, "query succeeded");
                QueryState::Success {
                    data,
                    refreshing: false,
                }
            }
            Err(error) => {
                warn!(key, generation, "query failed");
                QueryState::Error(error)
            }
        };
        Some(self.transition(next))
    }
}

impl<T, E> Clone for QueryClient<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for QueryClient<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(QueryOptions::default())
    }
}

impl<T, E> QueryClient<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(options: QueryOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                options,
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn options(&self) -> QueryOptions {
        self.inner.options
    }

    /// Current state of `key`; `Idle` if nothing has touched it yet.
    pub fn get_state(&self, key: &str) -> QueryState<T, E> {
        self.inner
            .lock()
            .get(key)
            .map(|entry| entry.state.clone())
            .unwrap_or(QueryState::Idle)
    }

    pub fn render(&self, key: &str) -> RenderState<T, E> {
        RenderState::from(&self.get_state(key))
    }

    /// True while an operation for `key` has started but not settled.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner
            .lock()
            .get(key)
            .is_some_and(|entry| entry.in_flight.is_some())
    }

    /// Observe `key`, starting `operation` if the key has neither a result
    /// nor an operation in flight.
    ///
    /// A loading key keeps its in-flight operation; a settled key is
    /// returned as is and `operation` is not called. Use
    /// [`refetch`](Self::refetch) to request fresh data explicitly.
    ///
    /// Must be called from within a tokio runtime.
    pub fn get_or_start<F, Fut>(&self, key: &str, operation: F) -> QueryState<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.observe_or_start(key, operation).0
    }

    /// Start `operation` for `key` unconditionally.
    ///
    /// Any operation already in flight for the key is superseded: it runs to
    /// completion but its result is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refetch<F, Fut>(&self, key: &str, operation: F) -> QueryState<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut entries = self.inner.lock();
        let entry = entries.entry(key.to_string()).or_default();
        if let Some(in_flight) = &entry.in_flight {
            debug!(
                key,
                superseded = in_flight.generation,
                "superseding in-flight query"
            );
        }
        let (_, notification) = self.start(entry, key, operation);
        drop(entries);
        let state = notification.state.clone();
        notification.deliver();
        state
    }

    /// Resolve `key` to a result, starting `operation` only when
    /// [`get_or_start`](Self::get_or_start) would.
    ///
    /// Attaches to an in-flight operation when there is one. If that
    /// operation is superseded while waiting, follows the newer one, so the
    /// returned result matches the state the cache settles on. Settled keys
    /// return their cached outcome.
    ///
    /// By the time this returns, the result is recorded in the cache and the
    /// transition has been published to every listener of `key`.
    pub async fn fetch<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (mut generation, mut outcome) = match self.observe_or_start(key, operation).1 {
            Observed::Settled(result) => return result,
            Observed::Pending {
                generation,
                outcome,
            } => (generation, outcome),
        };

        loop {
            let result = outcome.await;
            let (newer, notification) = {
                let mut entries = self.inner.lock();
                match entries.get_mut(key) {
                    Some(entry) if entry.generation > generation => {
                        let newer = match (&entry.in_flight, settled_outcome(&entry.state)) {
                            (Some(in_flight), _) => Some(Observed::Pending {
                                generation: in_flight.generation,
                                outcome: in_flight.outcome.clone(),
                            }),
                            (None, Some(settled)) => Some(Observed::Settled(settled)),
                            (None, None) => None,
                        };
                        (newer, None)
                    }
                    // The driver task may not have run yet; record the result here.
                    Some(entry) => (None, entry.settle(key, generation, result.clone())),
                    None => (None, None),
                }
            };
            if let Some(notification) = notification {
                notification.deliver();
            }
            match newer {
                Some(Observed::Pending {
                    generation: next,
                    outcome: next_outcome,
                }) => {
                    trace!(key, from = generation, to = next, "following superseding query");
                    generation = next;
                    outcome = next_outcome;
                }
                Some(Observed::Settled(settled)) => return settled,
                None => return result,
            }
        }
    }

    /// Register `listener` for every state transition of `key`.
    ///
    /// Subscribing never starts an operation. The listener runs without any
    /// cache lock held and may call back into the client.
    pub fn subscribe<L>(&self, key: &str, listener: L) -> Subscription
    where
        L: Fn(&QueryState<T, E>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<T, E> = Box::new(listener);
        let slot = Arc::new(ListenerSlot::new(id, listener));

        self.inner
            .lock()
            .entry(key.to_string())
            .or_default()
            .listeners
            .push(Arc::clone(&slot));
        trace!(key, listener = id, "listener subscribed");

        let inner = Arc::downgrade(&self.inner);
        let key = key.to_string();
        Subscription::new(move || {
            slot.detach();
            if let Some(inner) = inner.upgrade() {
                if let Some(entry) = inner.lock().get_mut(&key) {
                    entry.listeners.retain(|l| l.id != id);
                }
            }
            trace!(key = %key, listener = id, "listener unsubscribed");
        })
    }

    fn observe_or_start<F, Fut>(&self, key: &str, operation: F) -> (QueryState<T, E>, Observed<T, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut entries = self.inner.lock();
        let entry = entries.entry(key.to_string()).or_default();
        if let Some(in_flight) = &entry.in_flight {
            trace!(key, generation = in_flight.generation, "attaching to in-flight query");
            let observed = Observed::Pending {
                generation: in_flight.generation,
                outcome: in_flight.outcome.clone(),
            };
            return (entry.state.clone(), observed);
        }
        if let Some(settled) = settled_outcome(&entry.state) {
            return (entry.state.clone(), Observed::Settled(settled));
        }

        let (observed, notification) = self.start(entry, key, operation);
        drop(entries);
        let state = notification.state.clone();
        notification.deliver();
        (state, observed)
    }

    fn start<F, Fut>(
        &self,
        entry: &mut Entry<T, E>,
        key: &str,
        operation: F,
    ) -> (Observed<T, E>, Notification<T, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        entry.generation += 1;
        let generation = entry.generation;
        let outcome = operation().boxed().shared();
        entry.in_flight = Some(InFlight {
            generation,
            outcome: outcome.clone(),
        });

        let guard = SettleGuard {
            inner: Arc::downgrade(&self.inner),
            key: key.to_string(),
            generation,
            settled: false,
        };
        let driver = outcome.clone();
        tokio::spawn(async move {
            let result = driver.await;
            guard.settle(result);
        });

        let next = match (&entry.state, self.inner.options.stale_while_revalidate) {
            (QueryState::Success { data, .. }, true) => QueryState::Success {
                data: data.clone(),
                refreshing: true,
            },
            _ => QueryState::Loading,
        };
        let notification = entry.transition(next);
        debug!(key, generation, "query started");

        (
            Observed::Pending {
                generation,
                outcome,
            },
            notification,
        )
    }
}

impl<T, E> Inner<T, E> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<T, E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles exactly one started operation.
///
/// If the driving task goes away without a result (runtime shutdown, a
/// panicking operation), dropping the guard still clears the in-flight
/// marker so the key does not stay loading forever.
struct SettleGuard<T: Clone, E: Clone> {
    inner: Weak<Inner<T, E>>,
    key: String,
    generation: u64,
    settled: bool,
}

impl<T: Clone, E: Clone> SettleGuard<T, E> {
    fn settle(mut self, result: Result<T, E>) {
        self.settled = true;
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut entries = inner.lock();
        let Some(entry) = entries.get_mut(&self.key) else {
            return;
        };
        if entry.generation != self.generation {
            debug!(
                key = %self.key,
                generation = self.generation,
                current = entry.generation,
                "discarding superseded query result"
            );
            return;
        }
        let notification = entry.settle(&self.key, self.generation, result);
        drop(entries);
        if let Some(notification) = notification {
            notification.deliver();
        }
    }
}

impl<T: Clone, E: Clone> Drop for SettleGuard<T, E> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut entries = inner.lock();
        let Some(entry) = entries.get_mut(&self.key) else {
            return;
        };
        if entry
            .in_flight
            .as_ref()
            .is_none_or(|in_flight| in_flight.generation != self.generation)
        {
            return;
        }
        warn!(key = %self.key, generation = self.generation, "query abandoned before settling");
        entry.in_flight = None;
        let reverted = match &entry.state {
            QueryState::Success { data, .. } => QueryState::Success {
                data: data.clone(),
                refreshing: false,
            },
            _ => QueryState::Idle,
        };
        let notification = entry.transition(reverted);
        drop(entries);
        notification.deliver();
    }
}

fn settled_outcome<T: Clone, E: Clone>(state: &QueryState<T, E>) -> Option<Result<T, E>> {
    match state {
        QueryState::Success { data, .. } => Some(Ok(data.clone())),
        QueryState::Error(error) => Some(Err(error.clone())),
        QueryState::Idle | QueryState::Loading => None,
    }
}

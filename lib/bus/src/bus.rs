//! The event bus.
//!
//! # Dispatch
//!
//! ```text
//! emit(E) ──► snapshot handlers[TypeId(E)] ──► spawn one task per handler
//!                                                 │
//!                                   catch_unwind ─┤─ Ok      → done
//!                                                 └─ Err/panic → HandlerFailed
//! ```
//!
//! The subscriber registry is guarded by a `std::sync::Mutex` that is never
//! held across an `.await`. Handler bodies always run outside the lock.
//!
//! # Correlation
//!
//! `wait` registers a one-shot resolver for the response type *before*
//! emitting the request, so a fast responder cannot race past it. The
//! resolver fires at most once. A guard removes it when the waiting future
//! completes, times out or is dropped.

use crate::error::BusError;
use crate::event::{Event, HandlerFailed};
use crate::handler::{HandlerId, HandlerResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

/// Type-erased form of a handler for events of type `E`.
type BoxedHandler<E> = Arc<dyn Fn(Arc<E>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

struct Subscriber {
    id: HandlerId,
    /// Holds a `BoxedHandler<E>` for the `E` this subscriber is keyed under.
    handler: Arc<dyn Any + Send + Sync>,
}

struct Inner {
    subscribers: Mutex<HashMap<TypeId, Vec<Subscriber>>>,
    tasks: Mutex<JoinSet<()>>,
    next_handler: AtomicU64,
    closed: AtomicBool,
    runtime: Handle,
}

impl Inner {
    fn remove(&self, kind: TypeId, id: HandlerId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let Some(list) = subscribers.get_mut(&kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            subscribers.remove(&kind);
        }
        removed
    }
}

/// In-process publish/subscribe router.
///
/// Cloning is cheap and every clone addresses the same bus. Pass a clone to
/// each collaborator that publishes or subscribes.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &lock(&self.inner.subscribers).len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EventBus {
    /// Creates a bus that spawns handler tasks on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime. Use
    /// [`EventBus::with_runtime`] to supply a handle explicitly.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(Handle::current())
    }

    /// Creates a bus that spawns handler tasks on the given runtime.
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                tasks: Mutex::new(JoinSet::new()),
                next_handler: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                runtime,
            }),
        }
    }

    /// Subscribes `handler` to events of type `E`.
    ///
    /// Registering the same closure twice subscribes it twice; each
    /// registration gets its own [`HandlerId`] and its own invocation.
    pub fn register<E, F, Fut>(&self, handler: F) -> HandlerId
    where
        E: Event,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = self.next_handler_id();
        let boxed: BoxedHandler<E> = Arc::new(move |event: Arc<E>| handler(event).boxed());
        if self.insert::<E>(id, boxed).is_ok() {
            debug!(event = E::kind_name(), handler = %id, "handler registered");
        } else {
            debug!(event = E::kind_name(), handler = %id, "bus closed, handler dropped");
        }
        id
    }

    /// Removes a subscription. Returns false if it was not registered.
    ///
    /// The registry entry for `E` is dropped once its last handler is gone.
    pub fn unregister<E: Event>(&self, id: HandlerId) -> bool {
        let removed = self.inner.remove(TypeId::of::<E>(), id);
        if removed {
            debug!(event = E::kind_name(), handler = %id, "handler unregistered");
        }
        removed
    }

    /// Number of handlers currently subscribed to `E`.
    #[must_use]
    pub fn handler_count<E: Event>(&self) -> usize {
        lock(&self.inner.subscribers)
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    /// Number of event kinds with at least one subscriber.
    #[must_use]
    pub fn kind_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Returns true once [`EventBus::shutdown`] has started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Publishes `event` to every handler subscribed to its type.
    ///
    /// Handlers are snapshotted at the moment of the call. Each runs as an
    /// independent task; the caller never waits for them and never sees
    /// their failures. Returns the event, now shared with the handlers.
    pub async fn emit<E: Event>(&self, event: E) -> Arc<E> {
        let event = Arc::new(event);
        self.dispatch(&event);
        event
    }

    /// Schedules an [`emit`](EventBus::emit) from code that cannot await.
    ///
    /// Returns immediately; the emission happens on the bus runtime.
    pub fn emit_sync<E: Event>(&self, event: E) {
        let bus = self.clone();
        self.spawn(async move {
            bus.emit(event).await;
        });
    }

    /// Emits `request` and waits for the response of type `Resp` that
    /// carries the same correlation identifier.
    ///
    /// Responses of the right type but with another correlation identifier
    /// are ignored. With `timeout` set to `None` this waits indefinitely.
    ///
    /// # Errors
    ///
    /// - [`BusError::WaitTimeout`] if the deadline passes first
    /// - [`BusError::Closed`] if the bus is or becomes closed
    pub async fn wait<Req, Resp>(
        &self,
        request: Req,
        timeout: Option<Duration>,
    ) -> Result<Arc<Resp>, BusError>
    where
        Req: Event,
        Resp: Event,
    {
        let expected = request.correlation_id();
        let (tx, rx) = oneshot::channel::<Arc<Resp>>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let id = self.next_handler_id();
        let weak = Arc::downgrade(&self.inner);

        let resolver: BoxedHandler<Resp> = Arc::new(move |response: Arc<Resp>| {
            let slot = Arc::clone(&slot);
            let weak = weak.clone();
            async move {
                if response.correlation_id() != expected {
                    return Ok(());
                }
                let sender = lock(&slot).take();
                match sender {
                    Some(sender) => {
                        // The waiter may already have given up.
                        let _ = sender.send(response);
                        if let Some(inner) = weak.upgrade() {
                            inner.remove(TypeId::of::<Resp>(), id);
                        }
                    }
                    None => {
                        trace!(
                            event = Resp::kind_name(),
                            correlation_id = %expected,
                            "duplicate response dropped"
                        );
                    }
                }
                Ok(())
            }
            .boxed()
        });

        self.insert::<Resp>(id, resolver)?;
        let _guard = ResolverGuard {
            inner: Arc::downgrade(&self.inner),
            kind: TypeId::of::<Resp>(),
            id,
        };

        self.emit(request).await;

        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                debug!(
                    event = Resp::kind_name(),
                    correlation_id = %expected,
                    ?limit,
                    "wait timed out"
                );
                BusError::WaitTimeout {
                    kind: Resp::kind_name(),
                    correlation_id: expected,
                    timeout: limit,
                }
            })?,
            None => rx.await,
        };

        received.map_err(|_| BusError::Closed)
    }

    /// Closes the bus and cancels every task it spawned.
    ///
    /// After this returns, emissions are dropped and pending or new
    /// [`wait`](EventBus::wait) calls fail with [`BusError::Closed`].
    /// Cancellation is cooperative: a task stops at its next suspension
    /// point.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut tasks = lock(&self.inner.tasks);
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *tasks)
        };

        // Dropping the subscribers drops any pending resolver's sender.
        lock(&self.inner.subscribers).clear();

        tasks.abort_all();
        let mut cancelled = 0_usize;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => cancelled += 1,
                Err(e) => warn!(error = %e, "bus task failed during shutdown"),
            }
        }

        info!(cancelled, "event bus closed");
    }

    fn next_handler_id(&self) -> HandlerId {
        HandlerId(self.inner.next_handler.fetch_add(1, Ordering::Relaxed))
    }

    /// Adds a subscriber unless the bus is closed.
    ///
    /// `closed` is checked under the registry lock. `shutdown` sets it before
    /// taking the same lock to clear, so nothing lands in a cleared registry.
    fn insert<E: Event>(
        &self,
        id: HandlerId,
        handler: BoxedHandler<E>,
    ) -> Result<(), BusError> {
        let mut subscribers = lock(&self.inner.subscribers);
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        subscribers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscriber {
                id,
                handler: Arc::new(handler),
            });
        Ok(())
    }

    fn dispatch<E: Event>(&self, event: &Arc<E>) {
        if self.is_closed() {
            debug!(
                event = E::kind_name(),
                correlation_id = %event.correlation_id(),
                "bus closed, emission dropped"
            );
            return;
        }

        let handlers: Vec<(HandlerId, BoxedHandler<E>)> = lock(&self.inner.subscribers)
            .get(&TypeId::of::<E>())
            .map(|list| {
                list.iter()
                    .filter_map(|s| {
                        s.handler
                            .downcast_ref::<BoxedHandler<E>>()
                            .map(|h| (s.id, Arc::clone(h)))
                    })
                    .collect()
            })
            .unwrap_or_default();

        trace!(
            event = E::kind_name(),
            correlation_id = %event.correlation_id(),
            handlers = handlers.len(),
            "dispatching"
        );

        for (id, handler) in handlers {
            let bus = Arc::downgrade(&self.inner);
            self.spawn(supervise(bus, id, Arc::clone(event), handler));
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock(&self.inner.tasks);
        if self.is_closed() {
            return;
        }

        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                if e.is_panic() {
                    warn!(error = %e, "bus task panicked");
                }
            }
        }

        tasks.spawn_on(task, &self.inner.runtime);
    }
}

/// Runs one handler invocation and reports its failure on the bus.
async fn supervise<E: Event>(
    bus: Weak<Inner>,
    handler_id: HandlerId,
    event: Arc<E>,
    handler: BoxedHandler<E>,
) {
    let invocation = {
        let event = Arc::clone(&event);
        async move { handler(event).await }
    };

    let (error, panicked) = match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(Ok(())) => return,
        Ok(Err(e)) => (e.to_string(), false),
        Err(payload) => (panic_message(payload.as_ref()), true),
    };

    warn!(
        event = E::kind_name(),
        handler = %handler_id,
        correlation_id = %event.correlation_id(),
        panicked,
        error = %error,
        "event handler failed"
    );

    if TypeId::of::<E>() == TypeId::of::<HandlerFailed>() {
        return;
    }

    if let Some(inner) = bus.upgrade() {
        let failure = Arc::new(HandlerFailed {
            correlation_id: event.correlation_id(),
            kind: E::kind_name(),
            chat_id: event.chat_id().cloned(),
            error,
            panicked,
        });
        EventBus { inner }.dispatch(&failure);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Removes a `wait` resolver however the waiting future ends.
struct ResolverGuard {
    inner: Weak<Inner>,
    kind: TypeId,
    id: HandlerId,
}

impl Drop for ResolverGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(self.kind, self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use crate::{ChatId, EventId};
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping {
        id: EventId,
        label: &'static str,
    }

    impl Ping {
        fn new(label: &'static str) -> Self {
            Self {
                id: EventId::new(),
                label,
            }
        }
    }

    crate::impl_event!(Ping);

    #[derive(Debug, Clone, PartialEq)]
    struct Pong {
        id: EventId,
    }

    crate::impl_event!(Pong);

    #[derive(Debug, Clone, PartialEq)]
    struct Lookup {
        id: EventId,
        chat_id: ChatId,
        key: u32,
    }

    crate::impl_event!(Lookup, chat);

    #[derive(Debug, Clone, PartialEq)]
    struct LookupReply {
        id: EventId,
        value: u32,
    }

    impl LookupReply {
        fn reply_to(request: &Lookup, value: u32) -> Self {
            Self {
                id: request.id,
                value,
            }
        }
    }

    crate::impl_event!(LookupReply);

    fn recorder<E: Event>(
        bus: &EventBus,
        tag: &'static str,
    ) -> (HandlerId, mpsc::UnboundedReceiver<&'static str>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = bus.register(move |_event: Arc<E>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(tag);
                Ok(())
            }
        });
        (id, rx)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn answer_lookups(bus: &EventBus) -> HandlerId {
        let responder = bus.clone();
        bus.register(move |request: Arc<Lookup>| {
            let bus = responder.clone();
            async move {
                // A same-kind reply for an unrelated request arrives first.
                bus.emit(LookupReply {
                    id: EventId::new(),
                    value: 0,
                })
                .await;
                bus.emit(LookupReply::reply_to(&request, request.key * 10))
                    .await;
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn emit_invokes_each_registered_handler_once() {
        let bus = EventBus::new();
        let (_, mut first) = recorder::<Ping>(&bus, "first");
        let (_, mut second) = recorder::<Ping>(&bus, "second");

        let event = Ping::new("hello");
        let returned = bus.emit(event.clone()).await;
        assert_eq!(*returned, event);

        assert_eq!(first.recv().await, Some("first"));
        assert_eq!(second.recv().await, Some("second"));
        settle().await;
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_err());
    }

    #[tokio::test]
    async fn handlers_start_in_registration_order() {
        let bus = EventBus::new();
        let started = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let started = Arc::clone(&started);
            bus.register(move |_event: Arc<Ping>| {
                let started = Arc::clone(&started);
                async move {
                    lock(&started).push(tag);
                    Ok(())
                }
            });
        }

        bus.emit(Ping::new("ordered")).await;
        settle().await;

        assert_eq!(*lock(&started), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn handlers_only_see_their_own_kind() {
        let bus = EventBus::new();
        let (_, mut pongs) = recorder::<Pong>(&bus, "pong");

        bus.emit(Ping::new("not for pong")).await;
        settle().await;

        assert!(pongs.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_closure_registered_twice_runs_twice() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = move |_event: Arc<Ping>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
                Ok(())
            }
        };
        let a = bus.register(handler.clone());
        let b = bus.register(handler);
        assert_ne!(a, b);
        assert_eq!(bus.handler_count::<Ping>(), 2);

        bus.emit(Ping::new("twice")).await;
        settle().await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_handler_and_empty_entry() {
        let bus = EventBus::new();
        let (id, mut rx) = recorder::<Ping>(&bus, "ping");
        assert_eq!(bus.kind_count(), 1);

        assert!(bus.unregister::<Ping>(id));
        assert_eq!(bus.handler_count::<Ping>(), 0);
        assert_eq!(bus.kind_count(), 0);

        bus.emit(Ping::new("nobody listens")).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_absent_handler_is_noop() {
        let bus = EventBus::new();
        let (id, _rx) = recorder::<Ping>(&bus, "ping");

        assert!(!bus.unregister::<Pong>(id));
        assert!(bus.unregister::<Ping>(id));
        assert!(!bus.unregister::<Ping>(id));
    }

    #[tokio::test]
    async fn late_registration_misses_earlier_emission() {
        let bus = EventBus::new();
        bus.emit(Ping::new("early")).await;

        let (_, mut rx) = recorder::<Ping>(&bus, "late");
        settle().await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failing_handlers_are_isolated_and_reported() {
        let bus = EventBus::new();
        let (failures_tx, mut failures) = mpsc::unbounded_channel();
        bus.register(move |failure: Arc<HandlerFailed>| {
            let tx = failures_tx.clone();
            async move {
                let _ = tx.send((*failure).clone());
                Ok(())
            }
        });

        bus.register(|_event: Arc<Ping>| async { Err(HandlerError::new("boom")) });
        bus.register(|_event: Arc<Ping>| async {
            if true {
                panic!("handler exploded");
            }
            Ok(())
        });
        let (_, mut healthy) = recorder::<Ping>(&bus, "healthy");

        let event = Ping::new("trouble");
        let returned = bus.emit(event.clone()).await;
        assert_eq!(returned.label, "trouble");

        assert_eq!(healthy.recv().await, Some("healthy"));

        let mut reported = vec![
            failures.recv().await.expect("first failure"),
            failures.recv().await.expect("second failure"),
        ];
        reported.sort_by_key(|f| f.panicked);

        assert_eq!(reported[0].correlation_id, event.id);
        assert_eq!(reported[0].kind, "Ping");
        assert_eq!(reported[0].error, "boom");
        assert!(!reported[0].panicked);
        assert!(reported[1].panicked);
        assert!(reported[1].error.contains("handler exploded"));
    }

    #[tokio::test]
    async fn failing_failure_handler_is_not_republished() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.register(move |_failure: Arc<HandlerFailed>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(());
                Err(HandlerError::new("still broken"))
            }
        });
        bus.register(|_event: Arc<Ping>| async { Err(HandlerError::new("boom")) });

        bus.emit(Ping::new("once")).await;
        assert!(rx.recv().await.is_some());
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_returns_correlated_response() {
        let bus = EventBus::new();
        answer_lookups(&bus);

        let request = Lookup {
            id: EventId::new(),
            chat_id: ChatId::from("chat"),
            key: 4,
        };
        let expected = request.id;
        let reply: Arc<LookupReply> = bus
            .wait(request, Some(Duration::from_secs(1)))
            .await
            .expect("reply");

        assert_eq!(reply.id, expected);
        assert_eq!(reply.value, 40);
        settle().await;
        assert_eq!(bus.handler_count::<LookupReply>(), 0);
    }

    #[tokio::test]
    async fn concurrent_waits_do_not_cross_resolve() {
        let bus = EventBus::new();
        answer_lookups(&bus);

        let one = Lookup {
            id: EventId::new(),
            chat_id: ChatId::from("a"),
            key: 1,
        };
        let two = Lookup {
            id: EventId::new(),
            chat_id: ChatId::from("b"),
            key: 2,
        };
        let (one_id, two_id) = (one.id, two.id);

        let (first, second) = tokio::join!(
            bus.wait::<Lookup, LookupReply>(one, Some(Duration::from_secs(1))),
            bus.wait::<Lookup, LookupReply>(two, Some(Duration::from_secs(1))),
        );

        let first = first.expect("first reply");
        let second = second.expect("second reply");
        assert_eq!((first.id, first.value), (one_id, 10));
        assert_eq!((second.id, second.value), (two_id, 20));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_cleans_up() {
        let bus = EventBus::new();
        let request = Lookup {
            id: EventId::new(),
            chat_id: ChatId::from("silent"),
            key: 1,
        };
        let expected = request.id;

        let started = tokio::time::Instant::now();
        let err = bus
            .wait::<Lookup, LookupReply>(request, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(
            err,
            BusError::WaitTimeout {
                kind: "LookupReply",
                correlation_id: expected,
                timeout: Duration::from_millis(10),
            }
        );
        assert_eq!(bus.handler_count::<LookupReply>(), 0);

        // A late reply finds no stale resolver.
        let (_, mut rx) = recorder::<LookupReply>(&bus, "observer");
        bus.emit(LookupReply {
            id: expected,
            value: 1,
        })
        .await;
        assert_eq!(rx.recv().await, Some("observer"));
        assert_eq!(bus.handler_count::<LookupReply>(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_unregisters_resolver() {
        let bus = EventBus::new();
        let request = Lookup {
            id: EventId::new(),
            chat_id: ChatId::from("cancel"),
            key: 1,
        };

        let outer = tokio::time::timeout(
            Duration::from_millis(5),
            bus.wait::<Lookup, LookupReply>(request, None),
        )
        .await;

        assert!(outer.is_err());
        assert_eq!(bus.handler_count::<LookupReply>(), 0);
    }

    #[tokio::test]
    async fn duplicate_responses_resolve_once() {
        let bus = EventBus::new();
        let responder = bus.clone();
        bus.register(move |request: Arc<Lookup>| {
            let bus = responder.clone();
            async move {
                bus.emit(LookupReply::reply_to(&request, 1)).await;
                bus.emit(LookupReply::reply_to(&request, 2)).await;
                Ok(())
            }
        });

        let request = Lookup {
            id: EventId::new(),
            chat_id: ChatId::from("dup"),
            key: 0,
        };
        let reply: Arc<LookupReply> = bus
            .wait(request, Some(Duration::from_secs(1)))
            .await
            .expect("reply");

        assert_eq!(reply.value, 1);
        settle().await;
        assert_eq!(bus.handler_count::<LookupReply>(), 0);
    }

    #[tokio::test]
    async fn emit_sync_works_from_plain_threads() {
        let bus = EventBus::new();
        let (_, mut rx) = recorder::<Ping>(&bus, "sync");

        let remote = bus.clone();
        std::thread::spawn(move || remote.emit_sync(Ping::new("from a thread")))
            .join()
            .expect("thread");

        assert_eq!(rx.recv().await, Some("sync"));
    }

    struct DropSignal(Option<oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_outstanding_handlers() {
        let bus = EventBus::new();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(dropped_tx)));
        bus.register(move |_event: Arc<Ping>| {
            let signal = DropSignal(lock(&slot).take());
            async move {
                let _signal = signal;
                std::future::pending::<()>().await;
                Ok(())
            }
        });

        bus.emit(Ping::new("forever")).await;
        settle().await;

        bus.shutdown().await;

        assert!(bus.is_closed());
        assert!(dropped_rx.await.is_ok());
        assert_eq!(bus.kind_count(), 0);

        let err = bus
            .wait::<Lookup, LookupReply>(
                Lookup {
                    id: EventId::new(),
                    chat_id: ChatId::from("closed"),
                    key: 0,
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err, BusError::Closed);
    }

    #[tokio::test]
    async fn shutdown_fails_pending_waits() {
        let bus = EventBus::new();
        let waiter = bus.clone();
        let pending = tokio::spawn(async move {
            waiter
                .wait::<Lookup, LookupReply>(
                    Lookup {
                        id: EventId::new(),
                        chat_id: ChatId::from("pending"),
                        key: 0,
                    },
                    None,
                )
                .await
        });
        settle().await;
        assert_eq!(bus.handler_count::<LookupReply>(), 1);

        bus.shutdown().await;

        let result = pending.await.expect("join");
        assert_eq!(result.unwrap_err(), BusError::Closed);
    }

    #[tokio::test]
    async fn resolver_is_not_inserted_once_closed() {
        let bus = EventBus::new();
        // Closed but not yet cleared, as in the middle of `shutdown`.
        bus.inner.closed.store(true, Ordering::Release);

        let resolver: BoxedHandler<LookupReply> =
            Arc::new(|_reply: Arc<LookupReply>| async { Ok::<(), HandlerError>(()) }.boxed());
        let id = bus.next_handler_id();
        assert_eq!(bus.insert::<LookupReply>(id, resolver), Err(BusError::Closed));
        assert_eq!(bus.kind_count(), 0);

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            bus.wait::<Lookup, LookupReply>(
                Lookup {
                    id: EventId::new(),
                    chat_id: ChatId::from("closing"),
                    key: 0,
                },
                None,
            ),
        )
        .await
        .expect("wait returns instead of hanging")
        .unwrap_err();
        assert_eq!(err, BusError::Closed);
        assert_eq!(bus.handler_count::<LookupReply>(), 0);
    }

    #[tokio::test]
    async fn emissions_after_shutdown_are_dropped() {
        let bus = EventBus::new();
        bus.shutdown().await;

        let (_, mut rx) = recorder::<Ping>(&bus, "after");
        bus.emit(Ping::new("late")).await;
        settle().await;

        assert!(rx.try_recv().is_err());
    }
}

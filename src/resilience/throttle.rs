//! Bounded-concurrency throttle with a FIFO wait queue.
//!
//! # Responsibilities
//! - Bound the number of outstanding calls of an operation (or a set of them)
//! - Queue excess calls and start them in submission order
//! - Stay transparent: the caller sees exactly the wrapped operation's result
//!
//! # Design Decisions
//! - Admission happens when the call is made, not when its future is first
//!   polled, so submission order is call order
//! - A finishing call hands its slot straight to the oldest queued call; the
//!   running count never dips and no newcomer can overtake the queue
//! - The handed-off call is woken, never run re-entrantly from the releaser
//! - Slots are RAII guards; a panicking or dropped call still frees its slot
//! - The queue is unbounded and callers get no signal that they were queued

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::observability::metrics;
use crate::resilience::function_set::{Operation, Policy};

struct SlotState {
    running: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

struct Shared {
    name: Arc<str>,
    max: usize,
    state: Mutex<SlotState>,
}

impl Shared {
    fn admit(self: &Arc<Self>) -> Ticket {
        let mut state = self.state.lock().expect("throttle mutex poisoned");
        if state.running < self.max {
            state.running += 1;
            let running = state.running;
            drop(state);

            metrics::record_throttle_call(&self.name, false);
            metrics::record_throttle_running(&self.name, running);
            Ticket {
                shared: Arc::clone(self),
                wait: Wait::Ready,
            }
        } else {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            let queued = state.queue.len();
            drop(state);

            tracing::trace!(throttle = %self.name, queued, "Call queued");
            metrics::record_throttle_call(&self.name, true);
            Ticket {
                shared: Arc::clone(self),
                wait: Wait::Queued(rx),
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("throttle mutex poisoned");
        // Hand the slot to the oldest waiter still interested in it.
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.running -= 1;
        let running = state.running;
        drop(state);

        metrics::record_throttle_running(&self.name, running);
    }
}

enum Wait {
    Ready,
    Queued(oneshot::Receiver<()>),
    Claimed,
}

/// A claim on a throttle slot, granted now or once a queued turn comes up.
struct Ticket {
    shared: Arc<Shared>,
    wait: Wait,
}

impl Future for Ticket {
    type Output = Slot;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Slot> {
        let this = &mut *self;
        match &mut this.wait {
            Wait::Ready => {}
            Wait::Queued(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(())) => {}
                // Senders live in the queue, which outlives every ticket.
                Poll::Ready(Err(_)) => unreachable!("throttle queue dropped a waiting call"),
            },
            Wait::Claimed => panic!("throttle ticket polled after completion"),
        }
        this.wait = Wait::Claimed;
        Poll::Ready(Slot {
            shared: Arc::clone(&this.shared),
        })
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        match &mut self.wait {
            Wait::Ready => self.shared.release(),
            Wait::Queued(rx) => {
                rx.close();
                // A slot may have been handed over after the caller gave up.
                if rx.try_recv().is_ok() {
                    self.shared.release();
                }
            }
            Wait::Claimed => {}
        }
    }
}

/// An occupied slot; dropping it frees the slot or passes it on.
struct Slot {
    shared: Arc<Shared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// Shared concurrency limit. Clones share the running count and the queue.
#[derive(Clone)]
pub struct Throttle {
    shared: Arc<Shared>,
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("name", &self.shared.name)
            .field("max", &self.shared.max)
            .field("running", &self.running())
            .field("queued", &self.queued())
            .finish()
    }
}

impl Throttle {
    /// Create a throttle allowing `max` outstanding calls. Zero is treated as one.
    pub fn new(name: impl Into<Arc<str>>, max: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                max: max.max(1),
                state: Mutex::new(SlotState {
                    running: 0,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn max(&self) -> usize {
        self.shared.max
    }

    /// Calls currently holding a slot.
    pub fn running(&self) -> usize {
        self.shared.state.lock().expect("throttle mutex poisoned").running
    }

    /// Calls waiting for a slot.
    pub fn queued(&self) -> usize {
        self.shared
            .state
            .lock()
            .expect("throttle mutex poisoned")
            .queue
            .len()
    }

    /// Run `fut` under this throttle.
    ///
    /// The slot is claimed (or the call queued) before this returns.
    pub fn run<Fut>(&self, fut: Fut) -> impl Future<Output = Fut::Output> + Send + 'static
    where
        Fut: Future + Send + 'static,
    {
        let ticket = self.shared.admit();
        async move {
            let _slot = ticket.await;
            fut.await
        }
    }
}

impl Policy for Throttle {
    fn wrap<A, T, E>(&self, op: Operation<A, T, E>) -> Operation<A, T, E>
    where
        A: Clone + Send + Sync + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let throttle = self.clone();
        let inner = op.clone();
        Operation::new(op.name(), move |args: A| {
            // The inner operation is only invoked once the slot is held.
            let inner = inner.clone();
            throttle.run(async move { inner.call(args).await }).boxed()
        })
    }
}

/// A function wrapped by a [`Throttle`].
pub struct Throttled<F> {
    f: Arc<F>,
    throttle: Throttle,
}

impl<F> Clone for Throttled<F> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
            throttle: self.throttle.clone(),
        }
    }
}

impl<F> Throttled<F> {
    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    /// Call the wrapped function; queues when the limit is reached.
    pub fn call<A, Fut>(&self, args: A) -> impl Future<Output = Fut::Output> + Send + 'static
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: Send + 'static,
        Fut: Future + Send + 'static,
    {
        let ticket = self.throttle.shared.admit();
        let f = Arc::clone(&self.f);
        async move {
            let _slot = ticket.await;
            f(args).await
        }
    }
}

/// Wrap `f` so at most `max` calls are outstanding at once.
pub fn throttle<F>(f: F, max: usize) -> Throttled<F> {
    Throttled {
        f: Arc::new(f),
        throttle: Throttle::new("throttled", max),
    }
}

/// Wrap `f` under an existing (possibly shared) throttle.
pub fn throttle_with<F>(f: F, throttle: &Throttle) -> Throttled<F> {
    Throttled {
        f: Arc::new(f),
        throttle: throttle.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_queued_calls_start_in_submission_order() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let log = started.clone();
        let throttled = throttle(
            move |i: usize| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, String>(i)
                }
            },
            2,
        );

        let calls: Vec<_> = (0..6).map(|i| throttled.call(i)).collect();
        assert_eq!(throttled.throttle().running(), 2);
        assert_eq!(throttled.throttle().queued(), 4);

        let handles: Vec<_> = calls.into_iter().map(tokio::spawn).collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Ok(i));
        }

        let order = started.lock().unwrap().clone();
        assert_eq!(&order[2..], &[2, 3, 4, 5]);
        assert_eq!(throttled.throttle().running(), 0);
    }

    #[tokio::test]
    async fn test_errors_pass_through_and_free_slot() {
        let throttled = throttle(|fail: bool| async move {
            if fail {
                Err("boom".to_string())
            } else {
                Ok(1)
            }
        }, 1);

        assert_eq!(throttled.call(true).await, Err("boom".to_string()));
        assert_eq!(throttled.call(false).await, Ok(1));
        assert_eq!(throttled.throttle().running(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let throttle = Throttle::new("skip", 1);
        let first = throttle.run(async { 1 });
        let abandoned = throttle.run(async { 2 });
        let third = throttle.run(async { 3 });
        assert_eq!(throttle.queued(), 2);

        drop(abandoned);
        assert_eq!(first.await, 1);
        assert_eq!(third.await, 3);
        assert_eq!(throttle.running(), 0);
        assert_eq!(throttle.queued(), 0);
    }

    #[tokio::test]
    async fn test_panicking_call_frees_slot() {
        let throttle = Throttle::new("panic", 1);
        let handle = tokio::spawn(throttle.run(async { panic!("handler bug") }));
        assert!(handle.await.is_err());
        assert_eq!(throttle.running(), 0);
        assert_eq!(throttle.run(async { 7 }).await, 7);
    }

    #[tokio::test]
    async fn test_shared_limit_across_policy_wraps() {
        let throttle = Throttle::new("shared", 1);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let make = |peak: Arc<AtomicUsize>, current: Arc<AtomicUsize>| {
            Operation::new("op", move |_: ()| {
                let peak = peak.clone();
                let current = current.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            })
        };
        let a = throttle.wrap(make(peak.clone(), current.clone()));
        let b = throttle.wrap(make(peak.clone(), current.clone()));

        let calls = vec![a.call(()), b.call(()), a.call(()), b.call(())];
        for result in futures_util::future::join_all(calls).await {
            assert!(result.is_ok());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrapped_operation_is_invoked_only_inside_a_slot() {
        let throttle = Throttle::new("deferred", 1);
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let invoked = Arc::new(AtomicUsize::new(0));

        let op = {
            let gate = gate.clone();
            let invoked = invoked.clone();
            throttle.wrap(Operation::new("slow", move |id: usize| {
                invoked.fetch_add(1, Ordering::SeqCst);
                let gate = gate.clone();
                async move {
                    gate.acquire().await.map_err(|e| e.to_string())?.forget();
                    Ok::<_, String>(id)
                }
            }))
        };

        let calls: Vec<_> = (0..3).map(|id| op.call(id)).collect();
        assert_eq!(throttle.running(), 1);
        assert_eq!(throttle.queued(), 2);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        let handles: Vec<_> = calls.into_iter().map(tokio::spawn).collect();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 1);

        gate.add_permits(1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 2);
        assert_eq!(throttle.running(), 1);
        assert_eq!(throttle.queued(), 0);

        gate.add_permits(2);
        for (id, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Ok(id));
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 3);
        assert_eq!(throttle.running(), 0);
    }
}

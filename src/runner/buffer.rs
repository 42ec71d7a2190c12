//! Bounded look-ahead buffer between background production and the consumer.
//!
//! The producer side comes in two disciplines: a blocking push for sources
//! iterated on a dedicated blocking thread (condvar wait while full), and an
//! awaitable push for async production (waker slot). The consumer side never
//! blocks: pulls drain whatever is ready, and a suspending pull waits on
//! [`LookaheadBuffer::ready`], a hand-built awaitable with a single
//! continuation slot that completes synchronously if readiness already holds.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use super::lock;

struct BufferState<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// No more items will ever arrive; remaining items stay drainable.
    closed: bool,
    /// Torn down: remaining items are discarded and every waiter wakes.
    aborted: bool,
    consumer: Option<Waker>,
    producer: Option<Waker>,
}

pub(crate) struct LookaheadBuffer<T> {
    state: Mutex<BufferState<T>>,
    space: Condvar,
}

impl<T> LookaheadBuffer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
                aborted: false,
                consumer: None,
                producer: None,
            }),
            space: Condvar::new(),
        }
    }

    /// Place one item, blocking the calling thread while the buffer is full.
    ///
    /// Returns false once the buffer is closed or aborted; the item is
    /// dropped in that case and production should stop.
    pub(crate) fn push_blocking(&self, item: T) -> bool {
        let mut state = lock(&self.state);
        while state.items.len() >= state.capacity && !state.closed && !state.aborted {
            state = match self.space.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if state.closed || state.aborted {
            return false;
        }
        state.items.push_back(item);
        let waker = state.consumer.take();
        drop(state);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Place one item, waiting cooperatively while the buffer is full.
    ///
    /// Resolves to `Err(item)` once the buffer is closed or aborted.
    pub(crate) fn push(&self, item: T) -> Push<'_, T> {
        Push {
            buffer: self,
            item: Some(item),
        }
    }

    /// Move up to `max` items into `out`, waking the producer side.
    pub(crate) fn drain_into(&self, out: &mut Vec<T>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let mut state = lock(&self.state);
        let mut taken = 0;
        while taken < max {
            match state.items.pop_front() {
                Some(item) => {
                    out.push(item);
                    taken += 1;
                }
                None => break,
            }
        }
        if taken == 0 {
            return 0;
        }
        let waker = state.producer.take();
        drop(state);
        self.space.notify_one();
        if let Some(waker) = waker {
            waker.wake();
        }
        taken
    }

    /// Mark that no more items will ever arrive. Remaining items stay
    /// drainable; waiters on both sides are woken.
    pub(crate) fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        let consumer = state.consumer.take();
        let producer = state.producer.take();
        drop(state);
        self.space.notify_all();
        if let Some(waker) = consumer {
            waker.wake();
        }
        if let Some(waker) = producer {
            waker.wake();
        }
    }

    /// Tear the buffer down: discard remaining items and wake every waiter.
    pub(crate) fn abort(&self) {
        let mut state = lock(&self.state);
        state.aborted = true;
        state.closed = true;
        state.items.clear();
        let consumer = state.consumer.take();
        let producer = state.producer.take();
        drop(state);
        self.space.notify_all();
        if let Some(waker) = consumer {
            waker.wake();
        }
        if let Some(waker) = producer {
            waker.wake();
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        lock(&self.state).items.is_empty()
    }

    /// Closed and fully drained: nothing is buffered and nothing will arrive.
    pub(crate) fn is_drained(&self) -> bool {
        let state = lock(&self.state);
        state.closed && state.items.is_empty()
    }

    /// Resolves when an item is available, or when no item will ever arrive.
    pub(crate) fn ready(&self) -> Ready<'_, T> {
        Ready { buffer: self }
    }
}

/// Awaitable backpressured push for async producers.
pub(crate) struct Push<'a, T> {
    buffer: &'a LookaheadBuffer<T>,
    item: Option<T>,
}

impl<T> Unpin for Push<'_, T> {}

impl<T> Future for Push<'_, T> {
    type Output = Result<(), T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = lock(&this.buffer.state);
        if state.closed || state.aborted {
            let item = this.item.take().expect("push polled after completion");
            return Poll::Ready(Err(item));
        }
        if state.items.len() < state.capacity {
            let item = this.item.take().expect("push polled after completion");
            state.items.push_back(item);
            let waker = state.consumer.take();
            drop(state);
            if let Some(waker) = waker {
                waker.wake();
            }
            return Poll::Ready(Ok(()));
        }
        state.producer = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// The consumer-side awaitable: a single continuation slot plus the buffer's
/// readiness flags. Registration and the readiness check happen under one
/// lock, and wakes fire after the lock is released, so a continuation
/// registered against an already-ready buffer completes synchronously and a
/// wakeup racing with registration is never lost.
pub(crate) struct Ready<'a, T> {
    buffer: &'a LookaheadBuffer<T>,
}

impl<T> Unpin for Ready<'_, T> {}

impl<T> Future for Ready<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.buffer.state);
        if !state.items.is_empty() || state.closed || state.aborted {
            return Poll::Ready(());
        }
        state.consumer = Some(cx.waker().clone());
        Poll::Pending
    }
}

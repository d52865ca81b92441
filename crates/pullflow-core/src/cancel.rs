//! Cooperative cancellation shared between an engine and its iterators.
//!
//! Blocking pulls check `is_cancelled` before doing work; asynchronous waits
//! race their future against `cancelled()`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

/// Pending wakers are keyed by the `Cancelled` future that registered them,
/// so a dropped future takes its waker with it.
#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_waiter: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Inner {
    fn wakers(&self) -> MutexGuard<'_, HashMap<u64, Waker>> {
        self.wakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle; all clones observe the same cancellation.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let wakers = std::mem::take(&mut *self.inner.wakers());
        for w in wakers.into_values() {
            w.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Future that resolves once `cancel` has been called.
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            id: self.inner.next_waiter.fetch_add(1, Ordering::Relaxed),
            inner: Arc::clone(&self.inner),
        }
    }

    #[cfg(test)]
    fn pending_wakers(&self) -> usize {
        self.inner.wakers().len()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

pub struct Cancelled {
    id: u64,
    inner: Arc<Inner>,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        let mut wakers = self.inner.wakers();
        // Re-check under the lock so a concurrent `cancel` cannot be missed.
        if self.inner.cancelled.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        match wakers.get_mut(&self.id) {
            Some(w) if w.will_wake(cx.waker()) => {}
            Some(w) => *w = cx.waker().clone(),
            None => {
                wakers.insert(self.id, cx.waker().clone());
            }
        }
        Poll::Pending
    }
}

impl Drop for Cancelled {
    fn drop(&mut self) {
        self.inner.wakers().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn cancelled_future_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            // Minimal park-based executor for one future.
            struct ThreadWaker(std::thread::Thread);
            impl std::task::Wake for ThreadWaker {
                fn wake(self: Arc<Self>) {
                    self.0.unpark();
                }
            }
            let waker = Waker::from(Arc::new(ThreadWaker(std::thread::current())));
            let mut cx = Context::from_waker(&waker);
            let mut fut = Box::pin(waiter.cancelled());
            loop {
                if fut.as_mut().poll(&mut cx).is_ready() {
                    return true;
                }
                std::thread::park();
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn dropped_waiters_leave_no_wakers_behind() {
        let token = CancellationToken::new();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        for _ in 0..50 {
            let mut fut = Box::pin(token.cancelled());
            assert!(fut.as_mut().poll(&mut cx).is_pending());
            assert!(fut.as_mut().poll(&mut cx).is_pending());
            assert_eq!(token.pending_wakers(), 1);
        }
        assert_eq!(token.pending_wakers(), 0);

        let mut kept = Box::pin(token.cancelled());
        assert!(kept.as_mut().poll(&mut cx).is_pending());
        token.cancel();
        assert_eq!(token.pending_wakers(), 0);
        assert!(kept.as_mut().poll(&mut cx).is_ready());
    }

    fn noop_waker() -> Waker {
        struct Noop;
        impl std::task::Wake for Noop {
            fn wake(self: Arc<Self>) {}
        }
        Waker::from(Arc::new(Noop))
    }
}

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use event_listener::Event;
use futures_util::task::AtomicWaker;


// Adapted from https://github.com/laizy/waitgroup-rs
#[derive(Default)]
struct WaitGroupInner {
    /// The task to wake when the last TaskToken is dropped.
    waker: AtomicWaker,
}

impl Drop for WaitGroupInner {
    #[inline]
    fn drop(&mut self) {
        self.waker.wake();
    }
}

/// A token held by each connection task of a [`WaitGroup`].
///
/// The `Arc` is only held for its drop, which counts the task as finished.
#[derive(Clone)]
#[must_use = "TaskToken must be kept alive until the end of the task"]
pub(crate) struct TaskToken(#[allow(dead_code)] Arc<WaitGroupInner>);

/// A future that waits for all connection tasks of a [`WaitGroup`] to
/// finish.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub(crate) struct WaitGroupFuture(Weak<WaitGroupInner>);

impl Future for WaitGroupFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        // Weak::upgrade returns None iff all TaskTokens have been dropped
        match self.0.upgrade() {
            None => Poll::Ready(()),
            Some(wg) => {
                wg.waker.register(cx.waker());
                Poll::Pending
            },
        }
    }
}


/// Tracks the connection tasks spawned by a running server.
#[derive(Default)]
pub(crate) struct WaitGroup(Arc<WaitGroupInner>);

impl WaitGroup {
    #[inline]
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a new task. Dropping the returned [`TaskToken`] marks the
    /// task as finished.
    #[inline]
    pub(crate) fn add_task(&self) -> TaskToken {
        TaskToken(self.0.clone())
    }

    /// Returns the number of active tasks.
    #[inline]
    #[must_use]
    pub(crate) fn tasks(&self) -> usize {
        Arc::strong_count(&self.0) - 1
    }
}

impl std::future::IntoFuture for WaitGroup {
    type Output = ();
    type IntoFuture = WaitGroupFuture;

    fn into_future(self) -> Self::IntoFuture {
        WaitGroupFuture(Arc::downgrade(&self.0))
    }
}


struct ShutdownInner {
    triggered: AtomicBool,
    event: Event,
}

/// A one-shot broadcast signal telling the accept loop, connections and
/// handlers that the server is stopping.
#[derive(Clone)]
pub(crate) struct ShutdownSignal(Arc<ShutdownInner>);

impl ShutdownSignal {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self(Arc::new(ShutdownInner { triggered: AtomicBool::new(false), event: Event::new() }))
    }

    /// Fires the signal. Only the first call wakes any waiters.
    pub(crate) fn trigger(&self) {
        if !self.0.triggered.swap(true, Ordering::SeqCst) {
            self.0.event.notify(usize::MAX);
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn is_triggered(&self) -> bool {
        self.0.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once the signal has fired.
    pub(crate) async fn wait(&self) {
        loop {
            if self.is_triggered() {
                return;
            }
            let listener = self.0.event.listen();
            // Fired between the check above and registering the listener
            if self.is_triggered() {
                return;
            }
            listener.await;
        }
    }
}

impl Default for ShutdownSignal {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}


impl fmt::Debug for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TaskToken")
    }
}

impl fmt::Debug for WaitGroupFuture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tasks = self.0.strong_count();
        f.debug_struct("WaitGroupFuture")
            .field("tasks", &tasks)
            .finish()
    }
}

impl fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaitGroup")
            .field("tasks", &self.tasks())
            .finish()
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct Inner {
    cancelled: AtomicBool,
    // dropped on cancellation, which disconnects every receiver
    tx: Mutex<Option<Sender<()>>>,
}

/// Cancellation signal of a job, shared by the flood loop, its gate and the traffic
/// monitor. Sleeping threads are woken up as soon as the token is cancelled.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
    rx: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, rx) = bounded(0);
        CancelToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
        self.inner
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`. Returns false if the sleep was cut short by a cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        matches!(self.rx.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
    }

    /// A receiver that becomes disconnected on cancellation, for use in `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

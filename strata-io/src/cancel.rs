use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use strata_error::{StrataResult, strata_bail};

/// A top-level cancellation signal shared by every operator and reader of one query.
///
/// Cancelling drops the token's channel sender, so anything blocked on [`CancelToken::receiver`]
/// inside a `flume::Selector` wakes up with a disconnect instead of spinning on a flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    sender: Mutex<Option<flume::Sender<()>>>,
    receiver: flume::Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = flume::bounded(1);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with a cancelled error if the token has fired.
    pub fn check(&self) -> StrataResult<()> {
        if self.is_cancelled() {
            strata_bail!(Cancelled: "query cancelled");
        }
        Ok(())
    }

    /// A receiver that never yields a message and disconnects on cancellation.
    pub fn receiver(&self) -> &flume::Receiver<()> {
        &self.inner.receiver
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn cancel_wakes_selector() {
        let token = CancelToken::new();
        let (_tx, rx) = flume::bounded::<u32>(1);
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let woke_by_cancel = flume::Selector::new()
            .recv(&rx, |_| false)
            .recv(token.receiver(), |_| true)
            .wait();
        handle.join().unwrap();
        assert!(woke_by_cancel);
        assert!(token.check().unwrap_err().is_cancelled());
    }
}

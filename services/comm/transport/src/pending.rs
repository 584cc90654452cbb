//! One-shot pending send operations.
//!
//! A [`PendingSend`] is handed back by every `TransportSession::send` call and
//! is resolved exactly once through its paired [`SendCompleter`], either
//! inline before `send` returns or later on the session's I/O task.
//!
//! Acknowledgment callbacks are keyed by the operation itself rather than by a
//! shared per-session slot, so concurrent senders on one session can each
//! register their own callback without overwriting one another.

use crate::error::TransportError;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

/// Outcome of a resolved send
pub type SendResult = Result<(), Arc<TransportError>>;

/// Callback invoked once with the outcome of an in-flight send
pub type AckCallback = Box<dyn FnOnce(SendResult) + Send + 'static>;

struct State {
    result: Option<SendResult>,
    callback: Option<AckCallback>,
}

struct Shared {
    state: Mutex<State>,
    done: Condvar,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Callbacks run outside the lock, so a poisoned guard still holds consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Observable result of a single send request
#[derive(Clone)]
pub struct PendingSend {
    shared: Arc<Shared>,
}

/// Resolving half of a [`PendingSend`]
///
/// Dropping an unresolved completer resolves the operation with
/// [`TransportError::Canceled`].
pub struct SendCompleter {
    shared: Option<Arc<Shared>>,
}

impl PendingSend {
    /// Create an unresolved operation and its completer
    pub fn new() -> (PendingSend, SendCompleter) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                result: None,
                callback: None,
            }),
            done: Condvar::new(),
            notify: Notify::new(),
        });
        (
            PendingSend {
                shared: shared.clone(),
            },
            SendCompleter {
                shared: Some(shared),
            },
        )
    }

    /// Create an operation that is already resolved
    pub fn resolved(result: SendResult) -> PendingSend {
        let (pending, completer) = PendingSend::new();
        completer.complete(result);
        pending
    }

    /// Create an operation already resolved with a failure
    pub fn failed(err: TransportError) -> PendingSend {
        PendingSend::resolved(Err(Arc::new(err)))
    }

    /// Whether the operation has resolved
    pub fn is_done(&self) -> bool {
        self.shared.lock().result.is_some()
    }

    /// Non-blocking observation of the outcome
    pub fn try_result(&self) -> Option<SendResult> {
        self.shared.lock().result.clone()
    }

    /// Block the calling thread until resolved
    ///
    /// Must not be called from inside an async runtime worker while the
    /// operation is still pending; use [`PendingSend::wait`] there.
    pub fn get(&self) -> SendResult {
        let mut state = self.shared.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Wait asynchronously until resolved
    pub async fn wait(&self) -> SendResult {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }

    /// Register a callback for the eventual outcome.
    ///
    /// Returns `Err(callback)` without registering when the operation has
    /// already resolved or already carries a callback; the caller then owns
    /// reporting the outcome. A registered callback fires exactly once on the
    /// resolving thread.
    pub fn on_complete(&self, callback: AckCallback) -> Result<(), AckCallback> {
        let mut state = self.shared.lock();
        if state.result.is_some() || state.callback.is_some() {
            return Err(callback);
        }
        state.callback = Some(callback);
        Ok(())
    }

    /// Remove a registered callback without invoking it
    pub fn take_callback(&self) -> Option<AckCallback> {
        self.shared.lock().callback.take()
    }

    /// Whether a callback is currently registered
    pub fn has_callback(&self) -> bool {
        self.shared.lock().callback.is_some()
    }
}

impl fmt::Debug for PendingSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("PendingSend")
            .field("result", &state.result)
            .field("has_callback", &state.callback.is_some())
            .finish()
    }
}

impl SendCompleter {
    /// Resolve the operation, firing a registered callback.
    ///
    /// Returns `false` if the operation had already been resolved.
    pub fn complete(mut self, result: SendResult) -> bool {
        match self.shared.take() {
            Some(shared) => resolve(&shared, result),
            None => false,
        }
    }

    /// Resolve successfully
    pub fn succeed(self) -> bool {
        self.complete(Ok(()))
    }

    /// Resolve with a failure
    pub fn fail(self, err: TransportError) -> bool {
        self.complete(Err(Arc::new(err)))
    }
}

impl Drop for SendCompleter {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            trace!("Pending send dropped unresolved; canceling");
            resolve(&shared, Err(Arc::new(TransportError::Canceled)));
        }
    }
}

impl fmt::Debug for SendCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendCompleter")
            .field("resolved", &self.shared.is_none())
            .finish()
    }
}

fn resolve(shared: &Shared, result: SendResult) -> bool {
    let callback = {
        let mut state = shared.lock();
        if state.result.is_some() {
            return false;
        }
        state.result = Some(result.clone());
        state.callback.take()
    };

    shared.done.notify_all();
    shared.notify.notify_waiters();

    if let Some(callback) = callback {
        callback(result);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_callback(counter: Arc<AtomicUsize>) -> AckCallback {
        Box::new(move |_res| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_pending_then_resolved() {
        let (pending, completer) = PendingSend::new();
        assert!(!pending.is_done());
        assert!(pending.try_result().is_none());

        assert!(completer.succeed());
        assert!(pending.is_done());
        assert!(pending.try_result().unwrap().is_ok());
        assert!(pending.get().is_ok());
    }

    #[test]
    fn test_failed_outcome_is_observed() {
        let pending = PendingSend::failed(TransportError::SessionClosed);
        assert!(pending.is_done());
        let err = pending.get().unwrap_err();
        assert!(matches!(*err, TransportError::SessionClosed));
    }

    #[test]
    fn test_callback_fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let (pending, completer) = PendingSend::new();

        assert!(pending.on_complete(counting_callback(fired.clone())).is_ok());
        assert!(pending.has_callback());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        completer.succeed();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!pending.has_callback());
    }

    #[test]
    fn test_callback_refused_after_resolution() {
        let fired = Arc::new(AtomicUsize::new(0));
        let pending = PendingSend::resolved(Ok(()));

        let refused = pending.on_complete(counting_callback(fired.clone()));
        assert!(refused.is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_callback_refused_while_pending() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (pending, completer) = PendingSend::new();

        assert!(pending.on_complete(counting_callback(first.clone())).is_ok());
        let refused = pending.on_complete(counting_callback(second.clone()));
        assert!(refused.is_err());

        completer.succeed();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        // The refused callback is handed back intact.
        if let Err(cb) = refused {
            cb(Ok(()));
        }
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_completer_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(Mutex::new(None));
        let (pending, completer) = PendingSend::new();

        let observed_cb = observed.clone();
        let fired_cb = fired.clone();
        pending
            .on_complete(Box::new(move |res| {
                fired_cb.fetch_add(1, Ordering::SeqCst);
                *observed_cb.lock().unwrap() = Some(res);
            }))
            .ok()
            .unwrap();

        drop(completer);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let res = observed.lock().unwrap().take().unwrap();
        assert!(matches!(*res.unwrap_err(), TransportError::Canceled));
    }

    #[test]
    fn test_take_callback_prevents_notification() {
        let fired = Arc::new(AtomicUsize::new(0));
        let (pending, completer) = PendingSend::new();
        pending.on_complete(counting_callback(fired.clone())).ok().unwrap();

        assert!(pending.take_callback().is_some());
        completer.fail(TransportError::Canceled);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_blocks_until_resolved() {
        let (pending, completer) = PendingSend::new();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completer.fail(TransportError::Encode("boom".into()));
        });

        let err = pending.get().unwrap_err();
        assert!(matches!(*err, TransportError::Encode(_)));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_async_wait() {
        let (pending, completer) = PendingSend::new();
        let waiter = pending.clone();
        let task = tokio::spawn(async move { waiter.wait().await });

        tokio::task::yield_now().await;
        completer.succeed();

        let res = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok());
    }
}

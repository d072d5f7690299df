//! Turns callback-completed operations into blocking calls.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{BridgeError, Result};

/// Terminal result of an asynchronous operation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Ready(T),
    /// The platform cancelled the operation. Not an error: there is simply no
    /// data.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ready(value) => Outcome::Ready(f(value)),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }
}

/// One-shot completion handed to the asynchronous side.
///
/// Every method consumes the completion, so it can fire at most once. Dropping
/// it without firing wakes the waiter with [`BridgeError::Abandoned`].
pub struct Completion<T> {
    sender: Sender<Result<Outcome<T>>>,
}

impl<T> Completion<T> {
    /// Creates a detached completion and the receiving end that observes it.
    pub fn channel() -> (Self, crossbeam_channel::Receiver<Result<Outcome<T>>>) {
        let (sender, receiver) = bounded(1);
        (Self { sender }, receiver)
    }

    pub fn complete(self, value: T) {
        self.finish(Ok(Outcome::Ready(value)));
    }

    pub fn cancel(self) {
        self.finish(Ok(Outcome::Cancelled));
    }

    pub fn fail(self, error: BridgeError) {
        self.finish(Err(error));
    }

    pub fn finish(self, result: Result<Outcome<T>>) {
        // The waiter may have given up already; a late result is discarded.
        if self.sender.try_send(result).is_err() {
            debug!("completion fired after its waiter went away");
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Runs `job` on a new thread named `name` and hands its result to
/// `callback`.
///
/// `callback` fires exactly once: with the job's result, or on the calling
/// thread with [`BridgeError::WorkerSpawn`] when the thread cannot be started.
pub(crate) fn deliver_on_worker<T, J, F>(name: &'static str, job: J, callback: F)
where
    T: Send + 'static,
    J: FnOnce() -> Result<T> + Send + 'static,
    F: FnOnce(Result<T>) + Send + 'static,
{
    deliver_with(thread::Builder::new().name(name.into()), name, job, callback);
}

fn deliver_with<T, J, F>(builder: thread::Builder, name: &'static str, job: J, callback: F)
where
    T: Send + 'static,
    J: FnOnce() -> Result<T> + Send + 'static,
    F: FnOnce(Result<T>) + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(callback)));
    let worker_slot = Arc::clone(&slot);
    let spawned = builder.spawn(move || {
        let result = job();
        let callback = worker_slot.lock().take();
        if let Some(callback) = callback {
            callback(result);
        }
    });
    if let Err(source) = spawned {
        warn!("failed to spawn {name}: {source}");
        let callback = slot.lock().take();
        if let Some(callback) = callback {
            callback(Err(BridgeError::WorkerSpawn { name, source }));
        }
    }
}

/// Starts an asynchronous operation and blocks until it completes or
/// `timeout` elapses.
///
/// `start` receives the [`Completion`] and must arrange for it to fire
/// exactly once, from any thread. The caller must not be the thread that is
/// responsible for firing it, otherwise the wait can only end in a timeout.
pub fn run_blocking<T, F>(timeout: Duration, start: F) -> Result<Outcome<T>>
where
    F: FnOnce(Completion<T>),
{
    let (completion, receiver) = Completion::channel();
    start(completion);
    match receiver.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(BridgeError::Timeout { after: timeout }),
        Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn synchronous_completion_returns_immediately() {
        let started = Instant::now();
        let outcome = run_blocking(Duration::from_secs(5), |done| done.complete(42)).unwrap();
        assert_eq!(outcome, Outcome::Ready(42));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn delayed_completion_from_another_thread() {
        let outcome = run_blocking(Duration::from_secs(5), |done| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                done.complete("payload".to_string());
            });
        })
        .unwrap();
        assert_eq!(outcome.ready().as_deref(), Some("payload"));
    }

    #[test]
    fn never_completing_operation_times_out_near_the_bound() {
        let timeout = Duration::from_millis(150);
        let started = Instant::now();
        let mut parked = None;
        let result = run_blocking::<(), _>(timeout, |done| parked = Some(done));
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(BridgeError::Timeout { after }) if after == timeout));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_secs(1));

        // firing after the waiter left must not panic
        parked.unwrap().complete(());
    }

    #[test]
    fn cancellation_is_not_an_error() {
        let outcome = run_blocking::<u8, _>(Duration::from_secs(1), |done| done.cancel()).unwrap();
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn failure_is_propagated() {
        let result = run_blocking::<u8, _>(Duration::from_secs(1), |done| {
            done.fail(BridgeError::Network {
                url: "http://example.invalid".into(),
                message: "connection refused".into(),
            })
        });
        assert!(matches!(result, Err(BridgeError::Network { .. })));
    }

    #[test]
    fn worker_result_reaches_the_callback() {
        let (sender, receiver) = bounded(1);
        deliver_on_worker("bridge-test", || Ok(7u8), move |result| {
            sender.send(result.unwrap()).unwrap();
        });
        assert_eq!(receiver.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn unstartable_worker_still_calls_back() {
        let (sender, receiver) = bounded(1);
        // no address space can hold this stack, so the spawn itself fails
        let builder = thread::Builder::new().stack_size(usize::MAX / 4);
        deliver_with(builder, "bridge-test", || Ok(7u8), move |result| {
            sender.send(result).unwrap();
        });
        let result = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::WorkerSpawn { name: "bridge-test", .. })
        ));
    }

    #[test]
    fn dropped_completion_is_abandoned() {
        let result = run_blocking::<u8, _>(Duration::from_secs(5), |done| drop(done));
        assert!(matches!(result, Err(BridgeError::Abandoned)));
    }
}

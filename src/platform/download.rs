use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::blocking::Outcome;
use crate::error::{BridgeError, Result};

/// File written by a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    /// Temporary files are owned by the caller, who deletes them with
    /// `delete_file` once done.
    pub temporary: bool,
}

/// `Ready` carries the file; `Cancelled` means the transport dropped the
/// request and there is no file.
pub type DownloadOutcome = Outcome<DownloadedFile>;

/// Lifecycle of a download request.
///
/// `Created -> InFlight -> {Completed | Cancelled | Failed | TimedOut}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    Created,
    InFlight,
    Completed(DownloadedFile),
    Cancelled,
    Failed(String),
    TimedOut,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadState::Created | DownloadState::InFlight)
    }
}

/// Completion handle for a download started without blocking.
#[derive(Debug)]
pub struct PendingDownload {
    url: String,
    state: DownloadState,
    error: Option<BridgeError>,
    receiver: Receiver<Result<DownloadOutcome>>,
    /// `None` when the timeout reaches past what `Instant` can represent.
    deadline: Option<Instant>,
    timeout: Duration,
}

impl PendingDownload {
    pub(crate) fn new(
        url: String,
        receiver: Receiver<Result<DownloadOutcome>>,
        timeout: Duration,
    ) -> Self {
        Self {
            url,
            state: DownloadState::Created,
            error: None,
            receiver,
            deadline: Instant::now().checked_add(timeout),
            timeout,
        }
    }

    pub(crate) fn mark_in_flight(&mut self) {
        if self.state == DownloadState::Created {
            self.state = DownloadState::InFlight;
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Checks for completion without blocking and returns the current state.
    pub fn poll(&mut self) -> &DownloadState {
        if !self.state.is_terminal() {
            match self.receiver.try_recv() {
                Ok(result) => self.settle(result),
                Err(TryRecvError::Empty) if self.past_deadline() => {
                    self.settle(Err(BridgeError::Timeout {
                        after: self.timeout,
                    }))
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => self.settle(Err(BridgeError::Abandoned)),
            }
        }
        &self.state
    }

    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    /// Blocks until the download reaches a terminal state.
    pub fn wait(mut self) -> Result<DownloadOutcome> {
        if !self.state.is_terminal() {
            let received = match self.deadline {
                Some(deadline) => self.receiver.recv_deadline(deadline),
                None => self.receiver.recv().map_err(RecvTimeoutError::from),
            };
            let result = match received {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(BridgeError::Timeout {
                    after: self.timeout,
                }),
                Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Abandoned),
            };
            self.settle(result);
        }
        self.into_outcome()
    }

    fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn settle(&mut self, result: Result<DownloadOutcome>) {
        self.state = match result {
            Ok(Outcome::Ready(file)) => DownloadState::Completed(file),
            Ok(Outcome::Cancelled) => DownloadState::Cancelled,
            Err(err @ BridgeError::Timeout { .. }) => {
                self.error = Some(err);
                DownloadState::TimedOut
            }
            Err(err) => {
                let message = err.to_string();
                self.error = Some(err);
                DownloadState::Failed(message)
            }
        };
    }

    fn into_outcome(self) -> Result<DownloadOutcome> {
        match self.state {
            DownloadState::Completed(file) => Ok(Outcome::Ready(file)),
            DownloadState::Cancelled => Ok(Outcome::Cancelled),
            DownloadState::Failed(_) | DownloadState::TimedOut => {
                Err(self.error.unwrap_or(BridgeError::Abandoned))
            }
            DownloadState::Created | DownloadState::InFlight => Err(BridgeError::Abandoned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::Completion;

    fn pending(timeout: Duration) -> (Completion<DownloadedFile>, PendingDownload) {
        let (completion, receiver) = Completion::channel();
        let mut download = PendingDownload::new("https://cdn.test/a.png".into(), receiver, timeout);
        download.mark_in_flight();
        (completion, download)
    }

    #[test]
    fn poll_reports_in_flight_then_completed() {
        let (completion, mut download) = pending(Duration::from_secs(5));
        assert_eq!(download.poll(), &DownloadState::InFlight);
        completion.complete(DownloadedFile {
            path: PathBuf::from("/tmp/x.tmp"),
            temporary: true,
        });
        assert!(matches!(download.poll(), DownloadState::Completed(_)));
        let outcome = download.wait().unwrap();
        assert_eq!(outcome.ready().unwrap().path, PathBuf::from("/tmp/x.tmp"));
    }

    #[test]
    fn cancellation_is_distinct_from_failure() {
        let (completion, mut download) = pending(Duration::from_secs(5));
        completion.cancel();
        assert_eq!(download.poll(), &DownloadState::Cancelled);
        assert!(download.wait().unwrap().is_cancelled());

        let (completion, mut download) = pending(Duration::from_secs(5));
        completion.fail(BridgeError::Network {
            url: "https://cdn.test/a.png".into(),
            message: "reset".into(),
        });
        assert!(matches!(download.poll(), DownloadState::Failed(_)));
        assert!(matches!(download.wait(), Err(BridgeError::Network { .. })));
    }

    #[test]
    fn silent_transport_times_out() {
        let (_completion, download) = pending(Duration::from_millis(50));
        assert!(matches!(download.wait(), Err(BridgeError::Timeout { .. })));
    }

    #[test]
    fn unrepresentable_deadline_waits_without_one() {
        let (completion, mut download) = pending(Duration::from_secs(u64::MAX));
        assert_eq!(download.poll(), &DownloadState::InFlight);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            completion.cancel();
        });
        assert!(download.wait().unwrap().is_cancelled());
    }

    #[test]
    fn poll_after_deadline_is_timed_out() {
        let (_completion, mut download) = pending(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(download.poll(), &DownloadState::TimedOut);
    }
}

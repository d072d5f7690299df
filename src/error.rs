use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::handles::Handle;

/// Recoverable failures surfaced by the bridge.
///
/// Programmer errors (an unsupported pixel format coming out of a decoder, use
/// of the attacher after teardown) are not represented here: they panic.
/// Cancellation is not an error either, see [`crate::Outcome`].
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The handle was never issued or has already been released.
    #[error("unknown handle {0}")]
    UnknownHandle(Handle),

    /// The handle is live but refers to an object of another type.
    #[error("handle {handle} does not refer to a {expected}")]
    HandleTypeMismatch {
        handle: Handle,
        expected: &'static str,
    },

    /// A bundled resource or asset is absent.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure while fetching a URL.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("operation timed out after {after:?}")]
    Timeout { after: Duration },

    /// The completion of an asynchronous operation was dropped without firing.
    #[error("asynchronous operation was abandoned before completing")]
    Abandoned,

    /// The operation has no implementation on this backend. Not retryable.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    /// The host runtime or one of its service objects reported a failure.
    #[error("host call {call} failed: {message}")]
    Host { call: &'static str, message: String },

    #[error("failed to decode image {locator}: {message}")]
    Decode { locator: String, message: String },

    /// A video sink is already bound to this texture id.
    #[error("video sink already exists for texture {0}")]
    VideoSinkExists(i32),

    #[error("no video sink bound to texture {0}")]
    UnknownVideoSink(i32),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A worker thread for an asynchronous operation could not be started.
    #[error("failed to start worker thread {name}: {source}")]
    WorkerSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn host(call: &'static str, message: impl Into<String>) -> Self {
        Self::Host {
            call,
            message: message.into(),
        }
    }

    /// Returns true for failures that reflect a platform mismatch rather than
    /// a transient condition.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

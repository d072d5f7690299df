use std::fmt;
use std::path::PathBuf;

use crate::bitmap::DecodedImage;

use super::download::DownloadedFile;

/// Where a resource comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceLocator {
    /// A resource shipped with the application, addressed as `name.kind`.
    Bundled { name: String, kind: String },
    File(PathBuf),
    Url(String),
}

impl ResourceLocator {
    pub fn bundled(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::Bundled {
            name: name.into(),
            kind: kind.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLocator::Bundled { name, kind } => write!(f, "bundle:{name}.{kind}"),
            ResourceLocator::File(path) => write!(f, "file:{}", path.display()),
            ResourceLocator::Url(url) => f.write_str(url),
        }
    }
}

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Bytes,
    Text,
    Image,
    /// Side effect only: the resource is materialised on disk and its path
    /// returned, nothing is read into memory.
    None,
}

/// How the caller wants to be told about the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// The result is produced inside the call that submitted the request.
    #[default]
    Blocking,
    /// The result is delivered once, later, from a worker thread.
    Callback,
}

/// A single resource fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub locator: ResourceLocator,
    pub shape: ResultShape,
    pub mode: CompletionMode,
}

impl ResourceRequest {
    pub fn new(locator: ResourceLocator, shape: ResultShape) -> Self {
        Self {
            locator,
            shape,
            mode: CompletionMode::Blocking,
        }
    }

    pub fn with_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Data produced by a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePayload {
    Bytes(Vec<u8>),
    Text(String),
    Image(DecodedImage),
    File(DownloadedFile),
    Nothing,
}

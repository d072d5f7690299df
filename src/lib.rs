//! Native side of the boundary between the engine and its managed host.
//!
//! The crate provides the pieces the host-facing layer is built from: a
//! registry that hands out opaque handles to native objects, per-thread
//! attachment to the host runtime, a blocking adapter for callback-driven
//! platform APIs, and a resource gateway that hides whether files, assets and
//! downloads come from the filesystem or from services living in the host.
//! Scene, material and GPU code consume what the gateway produces and are not
//! part of this crate.

pub mod attach;
pub mod bitmap;
pub mod blocking;
pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod handles;
pub mod platform;

pub use attach::{Attachment, ExecutionContext, GlobalRef, HostObject, HostRuntime, ThreadAttacher};
pub use bitmap::{DecodedImage, PixelFormat};
pub use blocking::{run_blocking, Completion, Outcome};
pub use config::BridgeConfig;
pub use context::PlatformContext;
pub use error::{BridgeError, Result};
pub use handles::{Handle, HandleTable};
pub use platform::{
    AudioParameters, CompletionMode, DownloadOutcome, DownloadState, DownloadedFile,
    FilesystemBackend, HostBitmap, HostedBackend, HttpTransport, ImageLocator, PendingDownload,
    PlatformBackend, PlatformServices, ResourceGateway, ResourceLocator, ResourcePayload,
    ResourceRequest, ResultShape, Transport, TransportCallback, VideoSink,
};

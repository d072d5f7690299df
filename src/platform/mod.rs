//! Uniform resource I/O over the platform backends.
//!
//! The [`ResourceGateway`] is what engine code talks to. It owns no platform
//! knowledge itself: a [`PlatformBackend`] performs the actual work, either
//! directly against the filesystem or by delegating to services living in the
//! managed host. The gateway adds what must hold on every platform: pixel
//! format integrity, best-effort cleanup, download state tracking and video
//! sink bookkeeping.

mod download;
pub mod filesystem;
pub mod hosted;
pub mod http;
mod request;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::attach::GlobalRef;
use crate::bitmap::{self, DecodedImage};
use crate::blocking::{deliver_on_worker, run_blocking, Completion, Outcome};
use crate::error::{BridgeError, Result};
use crate::handles::{Handle, HandleTable};

pub use download::{DownloadOutcome, DownloadState, DownloadedFile, PendingDownload};
pub use filesystem::{FilesystemBackend, Transport, TransportCallback};
pub use hosted::{HostBitmap, HostedBackend, PlatformServices};
pub use http::HttpTransport;
pub use request::{CompletionMode, ResourceLocator, ResourcePayload, ResourceRequest, ResultShape};

/// Which image decoder input to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocator {
    /// Bundled asset, addressed by its full file name (`logo.png`).
    Asset(String),
    File(PathBuf),
}

impl fmt::Display for ImageLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageLocator::Asset(name) => write!(f, "asset:{name}"),
            ImageLocator::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParameters {
    pub sample_rate: u32,
    pub buffer_size: u32,
}

type SinkRelease = Box<dyn FnOnce(i32) + Send>;

/// Decode target bound to a GPU texture id, backed by a host surface.
///
/// Once registered with a gateway, dropping the last reference unbinds the
/// sink from the platform, whichever path released it.
pub struct VideoSink {
    texture_id: i32,
    surface: GlobalRef,
    on_release: Mutex<Option<SinkRelease>>,
}

impl VideoSink {
    pub fn new(texture_id: i32, surface: GlobalRef) -> Self {
        Self {
            texture_id,
            surface,
            on_release: Mutex::new(None),
        }
    }

    fn arm(&self, release: SinkRelease) {
        *self.on_release.lock() = Some(release);
    }

    fn disarm(&self) {
        self.on_release.lock().take();
    }

    pub fn texture_id(&self) -> i32 {
        self.texture_id
    }

    pub fn surface(&self) -> &GlobalRef {
        &self.surface
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.get_mut().take() {
            release(self.texture_id);
        }
    }
}

impl fmt::Debug for VideoSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoSink")
            .field("texture_id", &self.texture_id)
            .field("surface", &self.surface)
            .finish()
    }
}

type SinkRegistry = Mutex<HashMap<i32, Handle>>;

/// Platform-specific half of the gateway.
pub trait PlatformBackend: Send + Sync {
    /// Short name used in logs and `Unsupported` errors.
    fn name(&self) -> &'static str;

    fn load_bundled_resource(&self, name: &str, kind: &str) -> Result<Vec<u8>>;

    fn load_file_as_string(&self, path: &Path) -> Result<String>;

    fn load_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Succeeds when `path` names an existing file.
    fn check_file_exists(&self, path: &Path) -> Result<()>;

    /// Starts fetching `url` into a temporary file. `completion` fires exactly
    /// once, possibly from another thread.
    fn start_download(&self, url: &str, timeout: Duration, completion: Completion<DownloadedFile>);

    fn delete_file(&self, path: &Path) -> Result<()>;

    fn copy_asset_to_file(&self, asset: &str) -> Result<PathBuf>;

    fn decode_image(&self, locator: &ImageLocator) -> Result<DecodedImage>;

    fn audio_parameters(&self) -> Result<AudioParameters>;

    fn create_video_sink(&self, texture_id: i32) -> Result<VideoSink>;

    fn destroy_video_sink(&self, texture_id: i32) -> Result<()>;
}

/// Entry point for resource I/O from engine code.
pub struct ResourceGateway {
    backend: Arc<dyn PlatformBackend>,
    handles: Arc<HandleTable>,
    video_sinks: Arc<SinkRegistry>,
    network_timeout: Duration,
}

impl ResourceGateway {
    pub fn new(
        backend: Arc<dyn PlatformBackend>,
        handles: Arc<HandleTable>,
        network_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            handles,
            video_sinks: Arc::new(Mutex::new(HashMap::new())),
            network_timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn network_timeout(&self) -> Duration {
        self.network_timeout
    }

    pub fn load_bundled_resource(&self, name: &str, kind: &str) -> Result<Vec<u8>> {
        self.backend.load_bundled_resource(name, kind)
    }

    pub fn load_bundled_resource_as_string(&self, name: &str, kind: &str) -> Result<String> {
        let bytes = self.load_bundled_resource(name, kind)?;
        String::from_utf8(bytes).map_err(|err| BridgeError::Decode {
            locator: format!("{name}.{kind}"),
            message: err.to_string(),
        })
    }

    pub fn load_file_as_string(&self, path: impl AsRef<Path>) -> Result<String> {
        self.backend.load_file_as_string(path.as_ref())
    }

    /// Downloads `url` into a uniquely named temporary file, blocking until
    /// the transport finishes or the network timeout elapses.
    ///
    /// Must not be called from the thread that delivers the transport's
    /// completion.
    pub fn download_url_to_temp_file(&self, url: &str) -> Result<DownloadOutcome> {
        debug!("downloading {url} (timeout {:?})", self.network_timeout);
        let outcome = run_blocking(self.network_timeout, |completion| {
            self.backend
                .start_download(url, self.network_timeout, completion)
        })?;
        match &outcome {
            Outcome::Ready(file) => info!("downloaded {url} to {}", file.path.display()),
            Outcome::Cancelled => info!("download of {url} was cancelled"),
        }
        Ok(outcome)
    }

    /// Starts a download and returns a handle to poll or wait on.
    pub fn download_url_async(&self, url: &str) -> PendingDownload {
        let (completion, receiver) = Completion::channel();
        let mut pending = PendingDownload::new(url.to_string(), receiver, self.network_timeout);
        self.backend
            .start_download(url, self.network_timeout, completion);
        pending.mark_in_flight();
        pending
    }

    /// Removes `path`. Failures are logged and otherwise ignored.
    pub fn delete_file(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Err(err) = self.backend.delete_file(path) {
            warn!("failed to delete {}: {err}", path.display());
        }
    }

    pub fn copy_asset_to_file(&self, asset: &str) -> Result<PathBuf> {
        let path = self.backend.copy_asset_to_file(asset)?;
        debug!("asset {asset} materialised at {}", path.display());
        Ok(path)
    }

    /// Decodes an image with the platform decoder.
    ///
    /// # Panics
    ///
    /// Panics if the decoder yields anything but 8-bit RGBA.
    pub fn load_image(&self, locator: &ImageLocator) -> Result<DecodedImage> {
        let image = self.backend.decode_image(locator)?;
        bitmap::assert_supported(&image, &locator.to_string());
        Ok(image)
    }

    pub fn query_audio_parameters(&self) -> Result<AudioParameters> {
        self.backend.audio_parameters()
    }

    /// Binds a video sink to `texture_id` and registers it in the handle
    /// table.
    ///
    /// A texture id can hold one sink at a time: a second create without an
    /// intervening destroy fails with `VideoSinkExists`. Releasing the handle
    /// directly through the table unbinds the sink as well.
    pub fn create_video_sink(&self, texture_id: i32) -> Result<Handle> {
        let mut sinks = self.video_sinks.lock();
        if sinks.contains_key(&texture_id) {
            return Err(BridgeError::VideoSinkExists(texture_id));
        }
        let sink = Arc::new(self.backend.create_video_sink(texture_id)?);
        let handle = self.handles.create(Arc::clone(&sink));
        sink.arm(self.sink_release(handle));
        sinks.insert(texture_id, handle);
        debug!("video sink for texture {texture_id} registered as {handle}");
        Ok(handle)
    }

    /// Unbinds the sink for `texture_id` and releases its handle.
    ///
    /// The platform is asked first; if it refuses, the sink stays registered
    /// and the call can be retried.
    pub fn destroy_video_sink(&self, texture_id: i32) -> Result<()> {
        let handle = self
            .video_sink(texture_id)
            .ok_or(BridgeError::UnknownVideoSink(texture_id))?;
        // holding the sink keeps a concurrent release from unbinding it twice
        let sink = self
            .handles
            .resolve::<VideoSink>(handle)
            .map_err(|_| BridgeError::UnknownVideoSink(texture_id))?;
        self.backend.destroy_video_sink(texture_id)?;
        sink.disarm();
        self.video_sinks.lock().remove(&texture_id);
        if let Err(err) = self.handles.release(handle) {
            debug!("video sink {handle} was already released: {err}");
        }
        Ok(())
    }

    pub fn video_sink(&self, texture_id: i32) -> Option<Handle> {
        self.video_sinks.lock().get(&texture_id).copied()
    }

    /// Unbinds every registered sink. Returns how many were registered.
    pub(crate) fn destroy_video_sinks(&self) -> usize {
        let texture_ids: Vec<i32> = self.video_sinks.lock().keys().copied().collect();
        for &texture_id in &texture_ids {
            if let Err(err) = self.destroy_video_sink(texture_id) {
                warn!("failed to destroy video sink for texture {texture_id}: {err}");
            }
        }
        self.video_sinks.lock().clear();
        texture_ids.len()
    }

    /// Hook run when the last reference to a registered sink goes away
    /// without `destroy_video_sink`.
    fn sink_release(&self, handle: Handle) -> SinkRelease {
        let backend = Arc::clone(&self.backend);
        let registry = Arc::downgrade(&self.video_sinks);
        Box::new(move |texture_id| {
            if let Some(registry) = registry.upgrade() {
                let mut sinks = registry.lock();
                if sinks.get(&texture_id) == Some(&handle) {
                    sinks.remove(&texture_id);
                }
            }
            match backend.destroy_video_sink(texture_id) {
                Ok(()) => debug!("video sink {handle} unbound on release"),
                Err(err) => warn!("failed to unbind released video sink {handle}: {err}"),
            }
        })
    }

    /// Executes `request` on the calling thread, whatever its mode.
    pub fn fetch(&self, request: &ResourceRequest) -> Result<Outcome<ResourcePayload>> {
        match &request.locator {
            ResourceLocator::Bundled { name, kind } => {
                self.fetch_bundled(name, kind, request.shape).map(Outcome::Ready)
            }
            ResourceLocator::File(path) => self.fetch_file(path, request.shape).map(Outcome::Ready),
            ResourceLocator::Url(url) => self.fetch_url(url, request.shape),
        }
    }

    /// Executes `request` and hands the result to `callback` exactly once.
    ///
    /// Blocking requests run and call back before this returns; callback
    /// requests run on a worker thread.
    pub fn fetch_with<F>(self: &Arc<Self>, request: ResourceRequest, callback: F)
    where
        F: FnOnce(Result<Outcome<ResourcePayload>>) + Send + 'static,
    {
        match request.mode {
            CompletionMode::Blocking => callback(self.fetch(&request)),
            CompletionMode::Callback => {
                let gateway = Arc::clone(self);
                deliver_on_worker("bridge-fetch", move || gateway.fetch(&request), callback);
            }
        }
    }

    fn fetch_bundled(&self, name: &str, kind: &str, shape: ResultShape) -> Result<ResourcePayload> {
        let asset = format!("{name}.{kind}");
        match shape {
            ResultShape::Bytes => self.load_bundled_resource(name, kind).map(ResourcePayload::Bytes),
            ResultShape::Text => self
                .load_bundled_resource_as_string(name, kind)
                .map(ResourcePayload::Text),
            ResultShape::Image => self
                .load_image(&ImageLocator::Asset(asset))
                .map(ResourcePayload::Image),
            ResultShape::None => self.copy_asset_to_file(&asset).map(|path| {
                ResourcePayload::File(DownloadedFile {
                    path,
                    temporary: false,
                })
            }),
        }
    }

    fn fetch_file(&self, path: &Path, shape: ResultShape) -> Result<ResourcePayload> {
        match shape {
            ResultShape::Bytes => self.backend.load_file(path).map(ResourcePayload::Bytes),
            ResultShape::Text => self.load_file_as_string(path).map(ResourcePayload::Text),
            ResultShape::Image => self
                .load_image(&ImageLocator::File(path.to_path_buf()))
                .map(ResourcePayload::Image),
            ResultShape::None => {
                self.backend.check_file_exists(path)?;
                Ok(ResourcePayload::Nothing)
            }
        }
    }

    fn fetch_url(&self, url: &str, shape: ResultShape) -> Result<Outcome<ResourcePayload>> {
        let file = match self.download_url_to_temp_file(url)? {
            Outcome::Ready(file) => file,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
        };
        let payload = match shape {
            ResultShape::None => return Ok(Outcome::Ready(ResourcePayload::File(file))),
            ResultShape::Bytes => fs::read(&file.path)
                .map(ResourcePayload::Bytes)
                .map_err(|err| BridgeError::io(&file.path, err)),
            ResultShape::Text => fs::read_to_string(&file.path)
                .map(ResourcePayload::Text)
                .map_err(|err| BridgeError::io(&file.path, err)),
            ResultShape::Image => self
                .load_image(&ImageLocator::File(file.path.clone()))
                .map(ResourcePayload::Image),
        };
        if file.temporary {
            self.delete_file(&file.path);
        }
        payload.map(Outcome::Ready)
    }
}

impl fmt::Debug for ResourceGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGateway")
            .field("backend", &self.backend.name())
            .field("video_sinks", &self.video_sinks.lock().len())
            .field("network_timeout", &self.network_timeout)
            .finish()
    }
}

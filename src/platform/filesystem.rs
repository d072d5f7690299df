//! Backend for platforms where the engine reaches the filesystem directly.
//!
//! Bundled resources are plain files under a bundle directory, downloads go
//! through a callback-driven [`Transport`], and images are decoded natively.
//! There is no host object to ask for audio or video services.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::bitmap::DecodedImage;
use crate::blocking::{Completion, Outcome};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

use super::download::DownloadedFile;
use super::http::HttpTransport;
use super::{AudioParameters, ImageLocator, PlatformBackend, VideoSink};

const BACKEND: &str = "filesystem";

/// Invoked exactly once with the response body, a cancellation, or an error.
pub type TransportCallback = Box<dyn FnOnce(Result<Outcome<Vec<u8>>>) + Send + 'static>;

/// Network transport that reports completion through a callback.
pub trait Transport: Send + Sync {
    fn fetch(&self, url: &str, timeout: Duration, callback: TransportCallback);
}

pub struct FilesystemBackend {
    bundle_dir: PathBuf,
    temp_dir: PathBuf,
    audio: AudioParameters,
    transport: Arc<dyn Transport>,
}

impl FilesystemBackend {
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Ok(Self::with_transport(config, Arc::new(HttpTransport::new()?)))
    }

    pub fn with_transport(config: &BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            bundle_dir: config.bundle_dir.clone(),
            temp_dir: config.temp_dir(),
            audio: AudioParameters {
                sample_rate: config.audio_sample_rate,
                buffer_size: config.audio_buffer_size,
            },
            transport,
        }
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    /// Path of `name.kind` inside the bundle, if it exists.
    pub fn path_for_resource(&self, name: &str, kind: &str) -> Option<PathBuf> {
        self.asset_path(&format!("{name}.{kind}")).ok()
    }

    /// Resolves `asset` inside the bundle. Absolute names and names that
    /// climb out of the bundle with `..` are never found.
    fn asset_path(&self, asset: &str) -> Result<PathBuf> {
        let relative = Path::new(asset);
        let confined = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        let path = self.bundle_dir.join(relative);
        if confined && path.is_file() {
            Ok(path)
        } else {
            Err(BridgeError::ResourceNotFound(asset.to_string()))
        }
    }
}

impl PlatformBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn load_bundled_resource(&self, name: &str, kind: &str) -> Result<Vec<u8>> {
        let asset = format!("{name}.{kind}");
        let path = self.asset_path(&asset)?;
        fs::read(&path).map_err(|err| BridgeError::io(path, err))
    }

    fn load_file_as_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|err| BridgeError::io(path, err))
    }

    fn load_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|err| BridgeError::io(path, err))
    }

    fn check_file_exists(&self, path: &Path) -> Result<()> {
        fs::metadata(path).map_err(|err| BridgeError::io(path, err))?;
        Ok(())
    }

    fn start_download(&self, url: &str, timeout: Duration, completion: Completion<DownloadedFile>) {
        let temp_dir = self.temp_dir.clone();
        self.transport.fetch(
            url,
            timeout,
            Box::new(move |result| match result {
                Ok(Outcome::Ready(body)) => match write_temp_file(&temp_dir, &body) {
                    Ok(path) => completion.complete(DownloadedFile {
                        path,
                        temporary: true,
                    }),
                    Err(err) => completion.fail(err),
                },
                Ok(Outcome::Cancelled) => completion.cancel(),
                Err(err) => completion.fail(err),
            }),
        );
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|err| BridgeError::io(path, err))
    }

    fn copy_asset_to_file(&self, asset: &str) -> Result<PathBuf> {
        // bundle entries already live on disk
        self.asset_path(asset)
    }

    fn decode_image(&self, locator: &ImageLocator) -> Result<DecodedImage> {
        let path = match locator {
            ImageLocator::Asset(name) => self.asset_path(name)?,
            ImageLocator::File(path) => path.clone(),
        };
        let bytes = fs::read(&path).map_err(|err| BridgeError::io(&path, err))?;
        let decoded = ::image::load_from_memory(&bytes).map_err(|err| BridgeError::Decode {
            locator: locator.to_string(),
            message: err.to_string(),
        })?;
        let rgba = decoded.into_rgba8();
        let (width, height) = rgba.dimensions();
        debug!("decoded {locator} ({width}x{height})");
        Ok(DecodedImage::rgba8(width, height, rgba.into_raw()))
    }

    fn audio_parameters(&self) -> Result<AudioParameters> {
        Ok(self.audio)
    }

    fn create_video_sink(&self, _texture_id: i32) -> Result<VideoSink> {
        Err(BridgeError::Unsupported {
            operation: "create_video_sink",
            backend: BACKEND,
        })
    }

    fn destroy_video_sink(&self, _texture_id: i32) -> Result<()> {
        Err(BridgeError::Unsupported {
            operation: "destroy_video_sink",
            backend: BACKEND,
        })
    }
}

fn write_temp_file(dir: &Path, body: &[u8]) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("download-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|err| BridgeError::io(dir, err))?;
    file.write_all(body)
        .map_err(|err| BridgeError::io(file.path(), err))?;
    let (_, path) = file
        .keep()
        .map_err(|err| BridgeError::io(dir, io::Error::from(err)))?;
    Ok(path)
}

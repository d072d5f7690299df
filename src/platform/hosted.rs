//! Backend for platforms where resource services live in the managed host.
//!
//! Every call goes through a [`PlatformServices`] object owned by the host.
//! The calling thread is attached on demand, so these operations may be
//! issued from render threads, decode workers or network callbacks alike.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::attach::{ExecutionContext, GlobalRef, HostObject, ThreadAttacher};
use crate::bitmap::{DecodedImage, PixelFormat};
use crate::blocking::{deliver_on_worker, Completion, Outcome};
use crate::error::{BridgeError, Result};

use super::download::DownloadedFile;
use super::{AudioParameters, ImageLocator, PlatformBackend, VideoSink};

const BACKEND: &str = "hosted";

/// Pixels of a host bitmap, copied out while the host had them locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBitmap {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

/// Methods the host-side platform services object exposes to native code.
///
/// Names follow the host's method names; every call carries the caller's
/// execution context.
pub trait PlatformServices: Send + Sync {
    /// Reads a bundled asset. `None` when the asset does not exist.
    fn open_asset(&self, context: &ExecutionContext, name: &str) -> Result<Option<Vec<u8>>>;

    /// Blocks inside the host until the download finishes. `None` or an empty
    /// path means the transfer was cancelled.
    fn download_url_to_temp_file(
        &self,
        context: &ExecutionContext,
        url: &str,
    ) -> Result<Option<String>>;

    fn delete_file(&self, context: &ExecutionContext, path: &str) -> Result<()>;

    fn copy_asset_to_file(&self, context: &ExecutionContext, asset: &str) -> Result<String>;

    fn load_bitmap_from_asset(&self, context: &ExecutionContext, asset: &str)
        -> Result<HostBitmap>;

    fn load_bitmap_from_file(&self, context: &ExecutionContext, path: &str) -> Result<HostBitmap>;

    fn get_audio_sample_rate(&self, context: &ExecutionContext) -> Result<i32>;

    fn get_audio_buffer_size(&self, context: &ExecutionContext) -> Result<i32>;

    /// Returns the host surface video frames for `texture_id` are decoded
    /// into.
    fn create_video_sink(&self, context: &ExecutionContext, texture_id: i32)
        -> Result<HostObject>;

    fn destroy_video_sink(&self, context: &ExecutionContext, texture_id: i32) -> Result<()>;
}

pub struct HostedBackend {
    attacher: Arc<ThreadAttacher>,
    services: Arc<dyn PlatformServices>,
    services_ref: HostObject,
}

impl HostedBackend {
    /// Wraps the host's services object, pinning it for the lifetime of the
    /// process state.
    pub fn new(
        attacher: Arc<ThreadAttacher>,
        services_object: HostObject,
        services: Arc<dyn PlatformServices>,
    ) -> Result<Self> {
        let context = attacher.current_context()?;
        let services_ref = attacher.pin_global(&context, services_object)?;
        info!("hosted backend bound to services object {services_ref:?}");
        Ok(Self {
            attacher,
            services,
            services_ref,
        })
    }

    pub fn services_ref(&self) -> HostObject {
        self.services_ref
    }

    fn context(&self) -> Result<ExecutionContext> {
        self.attacher.current_context()
    }

    fn unsupported(operation: &'static str) -> BridgeError {
        BridgeError::Unsupported {
            operation,
            backend: BACKEND,
        }
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| BridgeError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path is not UTF-8"),
    })
}

fn audio_value(call: &'static str, value: i32) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| BridgeError::host(call, format!("host reported {value}")))
}

/// Copies a host bitmap into engine-owned storage.
fn convert_bitmap(bitmap: HostBitmap) -> DecodedImage {
    let length = bitmap.stride as usize * bitmap.height as usize;
    let mut pixels = bitmap.pixels;
    pixels.truncate(length);
    DecodedImage {
        width: bitmap.width,
        height: bitmap.height,
        stride: bitmap.stride,
        format: bitmap.format,
        pixels,
    }
}

impl PlatformBackend for HostedBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn load_bundled_resource(&self, name: &str, kind: &str) -> Result<Vec<u8>> {
        let asset = format!("{name}.{kind}");
        let context = self.context()?;
        self.services
            .open_asset(&context, &asset)?
            .ok_or(BridgeError::ResourceNotFound(asset))
    }

    fn load_file_as_string(&self, _path: &Path) -> Result<String> {
        Err(Self::unsupported("load_file_as_string"))
    }

    fn load_file(&self, _path: &Path) -> Result<Vec<u8>> {
        Err(Self::unsupported("load_file"))
    }

    fn check_file_exists(&self, _path: &Path) -> Result<()> {
        Err(Self::unsupported("check_file_exists"))
    }

    fn start_download(&self, url: &str, _timeout: Duration, completion: Completion<DownloadedFile>) {
        // The host call blocks for the whole transfer, so it runs on a worker
        // thread that attaches itself.
        let attacher = Arc::clone(&self.attacher);
        let services = Arc::clone(&self.services);
        let url = url.to_string();
        deliver_on_worker(
            "bridge-host-download",
            move || {
                if attacher.is_torn_down() {
                    return Err(BridgeError::host(
                        "downloadURLToTempFile",
                        "process state already released",
                    ));
                }
                let context = attacher.current_context()?;
                match services.download_url_to_temp_file(&context, &url)? {
                    Some(path) if !path.is_empty() => {
                        debug!("path to file is {path}");
                        Ok(Outcome::Ready(DownloadedFile {
                            path: PathBuf::from(path),
                            temporary: true,
                        }))
                    }
                    _ => Ok(Outcome::Cancelled),
                }
            },
            move |result| completion.finish(result),
        );
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        let context = self.context()?;
        self.services.delete_file(&context, path_arg(path)?)
    }

    fn copy_asset_to_file(&self, asset: &str) -> Result<PathBuf> {
        let context = self.context()?;
        let path = self.services.copy_asset_to_file(&context, asset)?;
        if path.is_empty() {
            return Err(BridgeError::ResourceNotFound(asset.to_string()));
        }
        Ok(PathBuf::from(path))
    }

    fn decode_image(&self, locator: &ImageLocator) -> Result<DecodedImage> {
        let context = self.context()?;
        let bitmap = match locator {
            ImageLocator::Asset(asset) => self.services.load_bitmap_from_asset(&context, asset)?,
            ImageLocator::File(path) => self
                .services
                .load_bitmap_from_file(&context, path_arg(path)?)?,
        };
        Ok(convert_bitmap(bitmap))
    }

    fn audio_parameters(&self) -> Result<AudioParameters> {
        let context = self.context()?;
        let sample_rate = self.services.get_audio_sample_rate(&context)?;
        let buffer_size = self.services.get_audio_buffer_size(&context)?;
        Ok(AudioParameters {
            sample_rate: audio_value("getAudioSampleRate", sample_rate)?,
            buffer_size: audio_value("getAudioBufferSize", buffer_size)?,
        })
    }

    fn create_video_sink(&self, texture_id: i32) -> Result<VideoSink> {
        let context = self.context()?;
        let surface = self.services.create_video_sink(&context, texture_id)?;
        Ok(VideoSink::new(texture_id, GlobalRef::new(&context, surface)?))
    }

    fn destroy_video_sink(&self, texture_id: i32) -> Result<()> {
        // sinks outliving the context can no longer reach the host
        if self.attacher.is_torn_down() {
            return Err(BridgeError::host(
                "destroyVideoSink",
                "process state already released",
            ));
        }
        let context = self.context()?;
        self.services.destroy_video_sink(&context, texture_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_audio_values_are_host_errors() {
        assert_eq!(audio_value("getAudioSampleRate", 44_100).unwrap(), 44_100);
        assert!(matches!(
            audio_value("getAudioBufferSize", -1),
            Err(BridgeError::Host { call: "getAudioBufferSize", .. })
        ));
        assert!(audio_value("getAudioBufferSize", 0).is_err());
    }

    #[test]
    fn bitmap_conversion_drops_trailing_bytes() {
        let image = convert_bitmap(HostBitmap {
            width: 1,
            height: 2,
            stride: 4,
            format: PixelFormat::Rgba8,
            pixels: vec![1; 12],
        });
        assert_eq!(image.pixels.len(), 8);
        assert_eq!(image.byte_len(), 8);
    }
}

use std::fmt;

/// Pixel layouts a platform decoder can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Rgb565,
    Rgba4444,
    Alpha8,
    RgbaF16,
    /// A format code the bridge does not know about.
    Other(i32),
}

impl PixelFormat {
    /// The only layout the engine accepts.
    pub const SUPPORTED: PixelFormat = PixelFormat::Rgba8;

    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgba8 => Some(4),
            PixelFormat::Rgb565 | PixelFormat::Rgba4444 => Some(2),
            PixelFormat::Alpha8 => Some(1),
            PixelFormat::RgbaF16 => Some(8),
            PixelFormat::Other(_) => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Other(code) => write!(f, "unknown format {code}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Decoded pixels owned by the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including any padding.
    pub stride: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Builds a tightly packed RGBA image.
    pub fn rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width * 4,
            format: PixelFormat::Rgba8,
            pixels,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Checks that a decoder produced the one supported layout.
///
/// # Panics
///
/// Any other format means the asset pipeline shipped something the engine
/// cannot sample; there is no recovery path.
pub fn assert_supported(image: &DecodedImage, locator: &str) {
    assert!(
        image.format == PixelFormat::SUPPORTED,
        "decoded image {locator} has pixel format {}, expected {}",
        image.format,
        PixelFormat::SUPPORTED
    );
    assert!(
        image.pixels.len() >= image.byte_len(),
        "decoded image {locator} holds {} bytes, expected {}",
        image.pixels.len(),
        image.byte_len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_image_passes() {
        let image = DecodedImage::rgba8(2, 2, vec![0; 16]);
        assert_supported(&image, "ok.png");
        assert_eq!(image.byte_len(), 16);
    }

    #[test]
    #[should_panic(expected = "pixel format Rgb565")]
    fn other_format_is_fatal() {
        let image = DecodedImage {
            width: 1,
            height: 1,
            stride: 2,
            format: PixelFormat::Rgb565,
            pixels: vec![0; 2],
        };
        assert_supported(&image, "bad.png");
    }

    #[test]
    #[should_panic(expected = "holds 3 bytes")]
    fn short_pixel_buffer_is_fatal() {
        assert_supported(&DecodedImage::rgba8(1, 1, vec![0; 3]), "short.png");
    }
}

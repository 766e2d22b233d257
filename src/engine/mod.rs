mod format;
mod operations;
mod tools;

use thiserror::Error;

pub use self::format::{mimetype_by_extension, Format};
pub use self::operations::{FlipDirection, Operation};

pub const DEFAULT_QUALITY: u8 = 95;

/// Largest output, in pixels, a single transformation may allocate.
pub const DEFAULT_MAX_PIXELS: u64 = 40_000_000;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Image decoding error: {0}")]
    DecodeError(String),

    #[error("Image conversion error: {0}")]
    ConversionError(String),

    #[error("Image encoding error: {0}")]
    EncodeError(String),

    #[error("Output of {width}x{height} exceeds {max_pixels} pixels")]
    TooLarge { width: u32, height: u32, max_pixels: u64 },
}

/// Options for a single transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// 0 keeps the aspect ratio from the other dimension.
    pub width: u32,
    pub height: u32,
    pub upscale: bool,
    pub format: Format,
    pub quality: u8,
    pub flip: Option<FlipDirection>,
    pub degree: Option<u32>,
    /// Upper bound on `width * height` of the output.
    pub max_pixels: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            upscale: true,
            format: Format::Jpeg,
            quality: DEFAULT_QUALITY,
            flip: None,
            degree: None,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Turns source image bytes into encoded output bytes.
///
/// Implementations are CPU bound and called from a blocking thread.
pub trait Transformer: Send + Sync {
    fn transform(&self, source: &[u8], operation: Operation, options: &Options) -> Result<Vec<u8>, EngineError>;
}

/// Transformer backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEngine;

impl Transformer for ImageEngine {
    fn transform(&self, source: &[u8], operation: Operation, options: &Options) -> Result<Vec<u8>, EngineError> {
        let img = image::load_from_memory(source)
            .map_err(|e| EngineError::DecodeError(format!("Failed to load image: {}", e)))?;

        let processed = tools::apply(img, operation, options)?;

        tools::encode_image(processed, options.format, options.quality)
    }
}

/// Detects the format of encoded image bytes.
pub fn guess_format(data: &[u8]) -> Option<Format> {
    image::guess_format(data).ok().and_then(Format::from_image_format)
}

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use super::{EngineError, FlipDirection, Format, Operation, Options};

pub(super) fn apply(img: DynamicImage, operation: Operation, options: &Options) -> Result<DynamicImage, EngineError> {
    match operation {
        Operation::Resize => resize_image(img, options),
        Operation::Thumbnail => thumbnail_image(img, options),
        Operation::Fit => fit_image(img, options),
        Operation::Flip => flip_image(img, options),
        Operation::Rotate => rotate_image(img, options),
        Operation::Noop => Ok(img),
    }
}

/// Computes the output size, filling a zero dimension from the aspect ratio.
fn target_dimensions(img: &DynamicImage, options: &Options) -> Result<Option<(u32, u32)>, EngineError> {
    let (current_width, current_height) = img.dimensions();

    let (target_width, target_height) = match (options.width, options.height) {
        (0, 0) => return Ok(None),
        (w, 0) => {
            let aspect_ratio = current_height as f64 / current_width as f64;
            (w, ((w as f64 * aspect_ratio).round() as u32).max(1))
        }
        (0, h) => {
            let aspect_ratio = current_width as f64 / current_height as f64;
            (((h as f64 * aspect_ratio).round() as u32).max(1), h)
        }
        (w, h) => (w, h),
    };

    // Without upscale, an image is never enlarged
    if !options.upscale && (target_width > current_width || target_height > current_height) {
        return Ok(None);
    }

    // Checked before the image crate allocates the target buffer
    if u64::from(target_width) * u64::from(target_height) > options.max_pixels {
        return Err(EngineError::TooLarge {
            width: target_width,
            height: target_height,
            max_pixels: options.max_pixels,
        });
    }

    Ok(Some((target_width, target_height)))
}

fn resize_image(img: DynamicImage, options: &Options) -> Result<DynamicImage, EngineError> {
    Ok(match target_dimensions(&img, options)? {
        Some((width, height)) => img.resize_exact(width, height, FilterType::Lanczos3),
        None => img,
    })
}

fn thumbnail_image(img: DynamicImage, options: &Options) -> Result<DynamicImage, EngineError> {
    Ok(match target_dimensions(&img, options)? {
        // Scale to fill the target dimensions, then crop from the center
        Some((width, height)) => img.resize_to_fill(width, height, FilterType::Lanczos3),
        None => img,
    })
}

fn fit_image(img: DynamicImage, options: &Options) -> Result<DynamicImage, EngineError> {
    Ok(match target_dimensions(&img, options)? {
        Some((width, height)) => img.resize(width, height, FilterType::Lanczos3),
        None => img,
    })
}

fn flip_image(img: DynamicImage, options: &Options) -> Result<DynamicImage, EngineError> {
    match options.flip {
        Some(FlipDirection::Horizontal) => Ok(img.fliph()),
        Some(FlipDirection::Vertical) => Ok(img.flipv()),
        None => Err(EngineError::ConversionError("Flip requires a position".to_string())),
    }
}

fn rotate_image(img: DynamicImage, options: &Options) -> Result<DynamicImage, EngineError> {
    match options.degree {
        Some(90) => Ok(img.rotate90()),
        Some(180) => Ok(img.rotate180()),
        Some(270) => Ok(img.rotate270()),
        Some(other) => Err(EngineError::ConversionError(format!("Unsupported rotation: {}", other))),
        None => Err(EngineError::ConversionError("Rotate requires a degree".to_string())),
    }
}

pub(super) fn encode_image(img: DynamicImage, format: Format, quality: u8) -> Result<Vec<u8>, EngineError> {
    let mut output = Vec::new();

    match format {
        Format::Jpeg => {
            let quality = quality.clamp(1, 100);
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            encoder
                .encode_image(&rgb)
                .map_err(|e| EngineError::EncodeError(format!("JPEG encoding failed: {}", e)))?;
        }
        other => {
            img.write_to(&mut std::io::Cursor::new(&mut output), other.image_format())
                .map_err(|e| EngineError::EncodeError(format!("{:?} encoding failed: {}", other, e)))?;
        }
    }

    Ok(output)
}

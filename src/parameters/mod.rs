use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::engine::{
    mimetype_by_extension, FlipDirection, Format, Operation, Options, DEFAULT_MAX_PIXELS, DEFAULT_QUALITY,
};

lazy_static! {
    // [<sig>/]<op>/[<w>]x[<h>]/<path>
    static ref PATH_PARAMETERS: Regex =
        Regex::new(r"^(?:(?P<sig>\w+)/)?(?P<op>\w+)/(?P<w>\d+)?x(?P<h>\d+)?/(?P<path>[\w\-/.]+)$").unwrap();
}

const PATH_PARAMETER_NAMES: [&str; 5] = ["sig", "op", "w", "h", "path"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParametersError {
    #[error("Quality should be <= 100")]
    InvalidQuality,

    #[error("Unprocessable request: {0}")]
    Unprocessable(String),
}

/// Where the image to transform comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Url(url::Url),
    Path(String),
}

/// Validated request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub operation: Operation,
    pub options: Options,
    /// Requested output format, `None` keeps the source format.
    pub format: Option<Format>,
    pub source: Source,
}

/// Output dimensions a deployment agrees to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Bounds on requested dimensions, checked before any I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeLimits {
    /// Empty allows every size.
    pub allowed_sizes: Vec<Size>,
    pub max_pixels: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            allowed_sizes: Vec::new(),
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl SizeLimits {
    fn check(&self, operation: Operation, width: u32, height: u32) -> Result<(), ParametersError> {
        if !operation.is_sized() {
            return Ok(());
        }

        if !self.allowed_sizes.is_empty() && !self.allowed_sizes.contains(&Size { width, height }) {
            return Err(unprocessable(format!("Size {}x{} is not allowed", width, height)));
        }

        // A zero dimension is derived from the source, so it counts as at least one pixel
        if u64::from(width.max(1)) * u64::from(height.max(1)) > self.max_pixels {
            return Err(unprocessable(format!(
                "Size {}x{} exceeds {} pixels",
                width, height, self.max_pixels
            )));
        }

        Ok(())
    }
}

/// Extracts the parameters of a path-style request such as
/// `abc123/resize/100x50/photos/a.jpg`. Absent dimensions are left out.
pub fn parse_path_parameters(path: &str) -> Option<HashMap<String, String>> {
    let captures = PATH_PARAMETERS.captures(path)?;

    Some(
        PATH_PARAMETER_NAMES
            .iter()
            .filter_map(|name| captures.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect(),
    )
}

fn parse_quality(value: &str) -> Result<u8, ParametersError> {
    match value.parse::<u32>() {
        Ok(quality) if quality <= 100 => Ok(quality as u8),
        Ok(_) => Err(ParametersError::InvalidQuality),
        // Too many digits for a u32 is still a number above 100
        Err(_) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
            Err(ParametersError::InvalidQuality)
        }
        Err(_) => Err(unprocessable(format!("Invalid quality: {}", value))),
    }
}

fn unprocessable(message: impl Into<String>) -> ParametersError {
    ParametersError::Unprocessable(message.into())
}

fn parse_dimension(params: &HashMap<String, String>, name: &str) -> Result<u32, ParametersError> {
    match params.get(name) {
        Some(value) if !value.is_empty() => value
            .parse()
            .map_err(|_| unprocessable(format!("Invalid {} parameter: {}", name, value))),
        _ => Ok(0),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "True" | "TRUE" => Some(true),
        "0" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

impl Parameters {
    /// Validates a raw parameter map. No I/O happens here.
    pub fn from_map(
        params: &HashMap<String, String>,
        default_quality: Option<u8>,
        allowed_mimetypes: &[String],
        limits: &SizeLimits,
    ) -> Result<Self, ParametersError> {
        let quality = match params.get("q").or_else(|| params.get("quality")) {
            Some(q) => parse_quality(q)?,
            None => default_quality.unwrap_or(DEFAULT_QUALITY),
        };

        let name = params
            .get("op")
            .filter(|op| !op.is_empty())
            .ok_or_else(|| unprocessable("`op` parameter or query string cannot be empty"))?;

        let operation =
            Operation::from_name(name).ok_or_else(|| unprocessable(format!("Invalid method {}", name)))?;

        let missing: Vec<&str> = operation
            .required_params()
            .iter()
            .copied()
            .filter(|param| params.get(*param).map_or(true, |v| v.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(unprocessable(format!(
                "Missing parameters for {}: {}",
                operation.name(),
                missing.join(", ")
            )));
        }

        let format = match params.get("fmt") {
            Some(fmt) => Some(Format::from_name(fmt).ok_or_else(|| unprocessable(format!("Unknown format {}", fmt)))?),
            None => None,
        };

        let upscale = match params.get("upscale") {
            Some(value) => parse_bool(value).ok_or_else(|| unprocessable(format!("Invalid upscale: {}", value)))?,
            None => true,
        };

        let flip = match params.get("pos") {
            Some(pos) => Some(FlipDirection::from_name(pos).ok_or_else(|| unprocessable(format!("Invalid position {}", pos)))?),
            None => None,
        };

        let degree = match params.get("deg") {
            Some(deg) => Some(deg.parse().map_err(|_| unprocessable(format!("Invalid degree {}", deg)))?),
            None => None,
        };

        let width = parse_dimension(params, "w")?;
        let height = parse_dimension(params, "h")?;
        limits.check(operation, width, height)?;

        let options = Options {
            width,
            height,
            upscale,
            format: format.unwrap_or(Format::Jpeg),
            quality,
            flip,
            degree,
            max_pixels: limits.max_pixels,
        };

        let source = Self::source(params, allowed_mimetypes)?;

        Ok(Self {
            operation,
            options,
            format,
            source,
        })
    }

    fn source(params: &HashMap<String, String>, allowed_mimetypes: &[String]) -> Result<Source, ParametersError> {
        if let Some(value) = params.get("url").filter(|v| !v.is_empty()) {
            let u = url::Url::parse(value).map_err(|_| unprocessable(format!("URL {} is not valid", value)))?;

            if !matches!(u.scheme(), "http" | "https") {
                return Err(unprocessable(format!("URL {} is not valid", value)));
            }

            let mimetype = mimetype_by_extension(u.path()).unwrap_or_default();
            if !allowed_mimetypes.iter().any(|allowed| allowed == mimetype) {
                return Err(unprocessable(format!("Mimetype {} is not supported", mimetype)));
            }

            return Ok(Source::Url(u));
        }

        if let Some(path) = params.get("path").filter(|v| !v.is_empty()) {
            return Ok(Source::Path(path.clone()));
        }

        Err(unprocessable("Request should contain a url or a path"))
    }
}

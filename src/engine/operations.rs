use serde::{Deserialize, Serialize};

/// Transformations the engine knows how to apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Resize,
    Thumbnail,
    Fit,
    Flip,
    Rotate,
    /// Re-encodes the source without touching its pixels.
    Noop,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Resize,
        Operation::Thumbnail,
        Operation::Fit,
        Operation::Flip,
        Operation::Rotate,
        Operation::Noop,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Resize => "resize",
            Operation::Thumbnail => "thumbnail",
            Operation::Fit => "fit",
            Operation::Flip => "flip",
            Operation::Rotate => "rotate",
            Operation::Noop => "noop",
        }
    }

    /// Query parameters that must be present for this operation.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Operation::Resize | Operation::Thumbnail | Operation::Fit => &["w", "h"],
            Operation::Flip => &["pos"],
            Operation::Rotate => &["deg"],
            Operation::Noop => &[],
        }
    }

    /// Whether the operation produces an image of the requested `w`/`h`.
    pub fn is_sized(&self) -> bool {
        matches!(self, Operation::Resize | Operation::Thumbnail | Operation::Fit)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlipDirection {
    Horizontal,
    Vertical,
}

impl FlipDirection {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "h" | "horizontal" => Some(FlipDirection::Horizontal),
            "v" | "vertical" => Some(FlipDirection::Vertical),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trip() {
        for op in Operation::ALL {
            assert_eq!(Operation::from_name(op.name()), Some(op));
        }
        assert_eq!(Operation::from_name("crop"), None);
        assert_eq!(Operation::from_name("Resize"), None);
    }

    #[test]
    fn required_params() {
        assert_eq!(Operation::Resize.required_params(), &["w", "h"]);
        assert_eq!(Operation::Flip.required_params(), &["pos"]);
        assert_eq!(Operation::Rotate.required_params(), &["deg"]);
        assert!(Operation::Noop.required_params().is_empty());
        assert!(Operation::Fit.is_sized());
        assert!(!Operation::Noop.is_sized());
    }

    #[test]
    fn flip_directions() {
        assert_eq!(FlipDirection::from_name("h"), Some(FlipDirection::Horizontal));
        assert_eq!(FlipDirection::from_name("vertical"), Some(FlipDirection::Vertical));
        assert_eq!(FlipDirection::from_name("diagonal"), None);
    }
}

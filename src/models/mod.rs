pub mod image;

pub use self::image::ImageDescriptor;

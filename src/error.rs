//! Error types for the PDF optimizer

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the optimizer
#[derive(Error, Debug)]
pub enum Error {
    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A stream uses a filter this crate cannot invert
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Stream data could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Image codec rejected the data
    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// JPEG encoder failure
    #[error("Image encode error: {0}")]
    ImageEncode(#[from] jpeg_encoder::EncodingError),

    /// General error
    #[error("{0}")]
    General(String),
}

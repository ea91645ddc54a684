//! PDF Shrink Library
//!
//! Structural optimizer for an already-parsed PDF object graph.
//! This library provides passes to:
//! - Remove objects unreachable from the trailer
//! - Deduplicate identical streams and dictionaries
//! - Recompress generic streams at the strongest deflate level
//! - Re-encode raster images as JPEG, optionally downsampled to a DPI ceiling
//! - Replace embedded copies of the 14 standard fonts with references
//! - Collect the character codes each font is shown with
//!
//! # Example
//!
//! ```no_run
//! use pdf_shrink::pdf::{optimize_file, OptimizeOptions};
//! use std::path::Path;
//!
//! let mut options = OptimizeOptions::default();
//! options.images.enabled = true;
//! options.images.max_dpi = Some(150.0);
//!
//! let report = optimize_file(Path::new("in.pdf"), Path::new("out.pdf"), &options)
//!     .expect("Failed to optimize PDF");
//! println!("{} images converted", report.images.converted);
//! ```

pub mod error;
pub mod pdf;

// Re-export commonly used items
pub use error::{Error, Result};

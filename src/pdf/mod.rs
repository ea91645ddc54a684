//! PDF optimization passes

pub mod graph;
pub mod filters;
pub mod reachability;
pub mod dedup;
pub mod content;
pub mod resample;
pub mod images;
pub mod streams;
pub mod fonts;
pub mod traits;
pub mod optimize;

// Re-export commonly used items
pub use reachability::{reachable, remove_unreferenced, CollectReport};
pub use dedup::{deduplicate, DedupReport};
pub use content::{extract_used_char_codes, tokenize, FontUsage, FontUsageMap, Operand, Operation};
pub use images::{recompress_images, ImageOptions, ImageReport, SkipReason};
pub use streams::{recompress_streams, StreamReport};
pub use fonts::{unembed_fonts, FontOptions, FontReport};
pub use traits::{inspect, inspect_file, DocumentInfo, DocumentTraits};
pub use optimize::{optimize_bytes, optimize_document, optimize_file, OptimizeOptions, OptimizeReport};

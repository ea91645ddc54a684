//! The optimization driver
//!
//! Runs the passes in a fixed order over one document:
//!
//! 1. unreferenced-object removal (so later passes skip dead objects)
//! 2. font unembedding
//! 3. image recompression
//! 4. generic stream recompression (sees the images' new native filters)
//! 5. deduplication (over the final byte content)
//! 6. unreferenced-object removal again, reclaiming what 2 and 5 orphaned

use std::path::Path;
use lopdf::Document;
use serde::Serialize;
use crate::error::{Error, Result};
use crate::pdf::dedup::{deduplicate, DedupReport};
use crate::pdf::fonts::{unembed_fonts, FontOptions, FontReport};
use crate::pdf::images::{recompress_images, ImageOptions, ImageReport};
use crate::pdf::reachability::{remove_unreferenced, CollectReport};
use crate::pdf::streams::{recompress_streams, StreamReport};
use crate::pdf::traits::DocumentTraits;

/// Options for a full optimization run
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub images: ImageOptions,
    /// Unembed standard fonts
    pub unembed_fonts: bool,
    /// Recompress general-purpose streams
    pub recompress_streams: bool,
    /// Merge identical objects
    pub deduplicate: bool,
    /// Conformance traits; detected from the document when `None`
    pub traits: Option<DocumentTraits>,
    /// Keep per-object decision logs in the report
    pub debug: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            images: ImageOptions::default(),
            unembed_fonts: false,
            recompress_streams: true,
            deduplicate: true,
            traits: None,
            debug: false,
        }
    }
}

/// Statistics from every pass of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizeReport {
    pub traits: DocumentTraits,
    pub initial_collect: CollectReport,
    pub fonts: FontReport,
    pub images: ImageReport,
    pub streams: StreamReport,
    pub dedup: DedupReport,
    pub final_collect: CollectReport,
    /// Serialized sizes, when the run went through bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<usize>,
}

impl OptimizeReport {
    /// Objects removed by both collection passes
    pub fn removed(&self) -> usize {
        self.initial_collect.removed + self.final_collect.removed
    }
}

/// Run every enabled pass over a loaded document
pub fn optimize_document(doc: &mut Document, options: &OptimizeOptions) -> OptimizeReport {
    let traits = options.traits.unwrap_or_else(|| DocumentTraits::detect(doc));
    let mut report = OptimizeReport {
        traits,
        ..Default::default()
    };

    report.initial_collect = remove_unreferenced(doc);

    let font_options = FontOptions {
        enabled: options.unembed_fonts,
        traits,
    };
    report.fonts = unembed_fonts(doc, &font_options);

    let image_options = ImageOptions {
        debug: options.images.debug || options.debug,
        ..options.images.clone()
    };
    report.images = recompress_images(doc, &image_options);

    if options.recompress_streams {
        report.streams = recompress_streams(doc);
    }
    if options.deduplicate {
        report.dedup = deduplicate(doc);
    }

    report.final_collect = remove_unreferenced(doc);
    report
}

/// Optimize a serialized document, returning the new bytes
pub fn optimize_bytes(input: &[u8], options: &OptimizeOptions) -> Result<(Vec<u8>, OptimizeReport)> {
    let mut doc = Document::load_mem(input)?;
    let mut report = optimize_document(&mut doc, options);

    let mut output = Vec::new();
    doc.save_to(&mut output)?;
    report.input_bytes = Some(input.len());
    report.output_bytes = Some(output.len());
    Ok((output, report))
}

/// Optimize a file on disk, writing the result to `output_path`
///
/// # Arguments
///
/// * `input_path` - PDF to optimize
/// * `output_path` - Where the optimized PDF is written (may equal the input)
/// * `options` - Which passes to run
pub fn optimize_file(input_path: &Path, output_path: &Path, options: &OptimizeOptions) -> Result<OptimizeReport> {
    if !input_path.exists() {
        return Err(Error::FileNotFound(input_path.to_path_buf()));
    }
    let input = std::fs::read(input_path)?;
    let (output, report) = optimize_bytes(&input, options)?;
    std::fs::write(output_path, output)?;

    log::info!(
        "{}: {} -> {} bytes",
        input_path.display(),
        input.len(),
        report.output_bytes.unwrap_or_default()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};

    /// One page showing text with an embedded Arial, plus an orphan and a
    /// duplicated stream pair
    fn sample_document() -> Document {
        let mut doc = Document::with_version("1.5");
        let file = doc.add_object(Stream::new(lopdf::Dictionary::new(), vec![7u8; 300]));
        let descriptor = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => "ArialMT",
            "FontFile2" => file,
        });
        let font = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "BaseFont" => "ArialMT",
            "FontDescriptor" => descriptor,
        });
        let text = b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET\n".repeat(20);
        let first = doc.add_object(Stream::new(lopdf::Dictionary::new(), text.clone()));
        let second = doc.add_object(Stream::new(lopdf::Dictionary::new(), text));
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => vec![first.into(), second.into()],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        doc.add_object(Object::string_literal("orphan"));
        doc
    }

    #[test]
    fn test_default_run() {
        let mut doc = sample_document();
        let report = optimize_document(&mut doc, &OptimizeOptions::default());

        assert_eq!(report.initial_collect.removed, 1);
        assert_eq!(report.fonts, FontReport::default());
        assert_eq!(report.images.converted + report.images.skipped, 0);
        assert!(report.streams.recompressed >= 2);
        assert_eq!(report.dedup.deduplicated, 1);
        assert_eq!(report.final_collect.removed, 0);
    }

    #[test]
    fn test_font_unembedding_orphans_are_collected() {
        let mut doc = sample_document();
        let options = OptimizeOptions {
            unembed_fonts: true,
            ..Default::default()
        };
        let report = optimize_document(&mut doc, &options);
        assert_eq!(report.fonts.unembedded, 1);
        assert!(!doc
            .objects
            .values()
            .any(|o| o.as_dict().is_ok_and(|d| d.has(b"FontFile2"))));
    }

    #[test]
    fn test_traits_override_blocks_unembedding() {
        let mut doc = sample_document();
        let options = OptimizeOptions {
            unembed_fonts: true,
            traits: Some(DocumentTraits { pdfa: true }),
            ..Default::default()
        };
        let report = optimize_document(&mut doc, &options);
        assert!(report.fonts.pdfa_skipped);
        assert_eq!(report.fonts.unembedded, 0);
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut doc = sample_document();
        let mut input = Vec::new();
        doc.save_to(&mut input).unwrap();

        let (output, report) = optimize_bytes(&input, &OptimizeOptions::default()).unwrap();
        assert_eq!(report.input_bytes, Some(input.len()));
        assert!(output.len() < input.len());

        let reloaded = Document::load_mem(&output).unwrap();
        assert_eq!(reloaded.get_pages().len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let result = optimize_file(Path::new("/nonexistent/in.pdf"), Path::new("/tmp/out.pdf"), &OptimizeOptions::default());
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }
}

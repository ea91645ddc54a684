//! Document traits and summary information

use std::path::Path;
use lopdf::{Document, Object};
use serde::Serialize;
use crate::error::{Error, Result};
use crate::pdf::{filters, graph};

/// Conformance properties that constrain what the optimizer may change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DocumentTraits {
    /// The document claims PDF/A conformance, which requires embedded fonts
    pub pdfa: bool,
}

impl DocumentTraits {
    /// Detect conformance claims from the catalog.
    ///
    /// A document counts as PDF/A if its XMP metadata carries a
    /// `pdfaid:part` entry or one of its output intents has a `GTS_PDFA`
    /// subtype.
    pub fn detect(doc: &Document) -> Self {
        let Some(catalog) = graph::catalog(doc) else {
            return Self::default();
        };
        let pdfa = xmp_claims_pdfa(doc, catalog) || output_intent_claims_pdfa(doc, catalog);
        if pdfa {
            log::debug!("Detected PDF/A conformance claim");
        }
        Self { pdfa }
    }
}

fn xmp_claims_pdfa(doc: &Document, catalog: &lopdf::Dictionary) -> bool {
    let Some(stream) = catalog.get(b"Metadata").ok().and_then(|m| graph::resolve_stream(doc, m)) else {
        return false;
    };
    let xmp = match filters::decode_stream(doc, stream) {
        Ok(xmp) => xmp,
        Err(e) => {
            log::debug!("Unreadable XMP metadata: {}", e);
            return false;
        }
    };
    xmp.windows(b"pdfaid:part".len()).any(|w| w == b"pdfaid:part")
}

fn output_intent_claims_pdfa(doc: &Document, catalog: &lopdf::Dictionary) -> bool {
    let Some(Object::Array(intents)) = graph::get(doc, catalog, b"OutputIntents") else {
        return false;
    };
    intents.iter().any(|intent| {
        graph::resolve_dict(doc, intent)
            .and_then(|dict| graph::get_name(doc, dict, b"S"))
            .is_some_and(|s| s.starts_with(b"GTS_PDFA"))
    })
}

/// Count pages by reading the Count field from the Pages dictionary.
///
/// More reliable than walking the tree for documents with nested page trees.
pub fn count_pages(doc: &Document) -> Result<usize> {
    let catalog = graph::catalog(doc).ok_or_else(|| Error::General("No Root in trailer".to_string()))?;
    let pages = catalog
        .get(b"Pages")
        .ok()
        .and_then(|p| graph::resolve_dict(doc, p))
        .ok_or_else(|| Error::General("No Pages in catalog".to_string()))?;

    match graph::get_integer(doc, pages, b"Count") {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(Error::General("Count is not a valid integer".to_string())),
    }
}

/// Summary of a document's structure
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub version: String,
    pub page_count: usize,
    pub object_count: usize,
    pub stream_count: usize,
    pub image_count: usize,
    pub font_count: usize,
    pub embedded_font_files: usize,
    pub traits: DocumentTraits,
}

/// Summarize a loaded document
pub fn inspect(doc: &Document) -> Result<DocumentInfo> {
    let mut info = DocumentInfo {
        version: doc.version.clone(),
        page_count: count_pages(doc)?,
        object_count: doc.objects.len(),
        stream_count: 0,
        image_count: 0,
        font_count: 0,
        embedded_font_files: 0,
        traits: DocumentTraits::detect(doc),
    };

    for object in doc.objects.values() {
        match object {
            Object::Stream(stream) => {
                info.stream_count += 1;
                if graph::has_name(doc, &stream.dict, b"Subtype", b"Image") {
                    info.image_count += 1;
                }
            }
            Object::Dictionary(dict) => {
                if graph::has_name(doc, dict, b"Type", b"Font") {
                    info.font_count += 1;
                } else if graph::has_name(doc, dict, b"Type", b"FontDescriptor") {
                    info.embedded_font_files += [&b"FontFile"[..], b"FontFile2", b"FontFile3"]
                        .iter()
                        .filter(|key| dict.has(key))
                        .count();
                }
            }
            _ => {}
        }
    }
    Ok(info)
}

/// Load a file and summarize it
pub fn inspect_file(path: &Path) -> Result<DocumentInfo> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let doc = Document::load(path)?;
    inspect(&doc)
}

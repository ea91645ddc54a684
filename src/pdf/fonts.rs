//! Font unembedding
//!
//! Simple fonts whose name maps to one of the 14 standard fonts are
//! replaced by a reference-only Type1 dictionary, dropping the embedded
//! font program. Documents claiming archival conformance are never touched.

use std::collections::HashSet;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use crate::pdf::graph;
use crate::pdf::traits::DocumentTraits;

/// The 14 fonts every conforming reader provides
pub const STANDARD_14: &[&str] = &[
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
    "Symbol",
    "ZapfDingbats",
];

/// Common names of metric-compatible substitutes for the standard fonts
const ALIASES: &[(&str, &str)] = &[
    ("Arial", "Helvetica"),
    ("ArialMT", "Helvetica"),
    ("Arial,Bold", "Helvetica-Bold"),
    ("Arial-Bold", "Helvetica-Bold"),
    ("Arial-BoldMT", "Helvetica-Bold"),
    ("Arial,Italic", "Helvetica-Oblique"),
    ("Arial-Italic", "Helvetica-Oblique"),
    ("Arial-ItalicMT", "Helvetica-Oblique"),
    ("Arial,BoldItalic", "Helvetica-BoldOblique"),
    ("Arial-BoldItalic", "Helvetica-BoldOblique"),
    ("Arial-BoldItalicMT", "Helvetica-BoldOblique"),
    ("Helvetica,Bold", "Helvetica-Bold"),
    ("Helvetica,Italic", "Helvetica-Oblique"),
    ("Helvetica-Italic", "Helvetica-Oblique"),
    ("Helvetica,BoldItalic", "Helvetica-BoldOblique"),
    ("Helvetica-BoldItalic", "Helvetica-BoldOblique"),
    ("TimesNewRoman", "Times-Roman"),
    ("TimesNewRomanPSMT", "Times-Roman"),
    ("Times", "Times-Roman"),
    ("TimesNewRoman,Bold", "Times-Bold"),
    ("TimesNewRoman-Bold", "Times-Bold"),
    ("TimesNewRomanPS-BoldMT", "Times-Bold"),
    ("TimesNewRoman,Italic", "Times-Italic"),
    ("TimesNewRoman-Italic", "Times-Italic"),
    ("TimesNewRomanPS-ItalicMT", "Times-Italic"),
    ("TimesNewRoman,BoldItalic", "Times-BoldItalic"),
    ("TimesNewRoman-BoldItalic", "Times-BoldItalic"),
    ("TimesNewRomanPS-BoldItalicMT", "Times-BoldItalic"),
    ("CourierNew", "Courier"),
    ("CourierNewPSMT", "Courier"),
    ("CourierNew,Bold", "Courier-Bold"),
    ("CourierNew-Bold", "Courier-Bold"),
    ("CourierNewPS-BoldMT", "Courier-Bold"),
    ("CourierNew,Italic", "Courier-Oblique"),
    ("CourierNew-Italic", "Courier-Oblique"),
    ("CourierNewPS-ItalicMT", "Courier-Oblique"),
    ("CourierNew,BoldItalic", "Courier-BoldOblique"),
    ("CourierNew-BoldItalic", "Courier-BoldOblique"),
    ("CourierNewPS-BoldItalicMT", "Courier-BoldOblique"),
    ("SymbolMT", "Symbol"),
    ("ZapfDingbatsITC", "ZapfDingbats"),
];

/// Encodings a reader can apply to a standard font without a font program
const STANDARD_ENCODINGS: &[&[u8]] = &[b"WinAnsiEncoding", b"MacRomanEncoding", b"StandardEncoding"];

/// Descriptor keys holding an embedded font program
const FONT_FILE_KEYS: &[&[u8]] = &[b"FontFile", b"FontFile2", b"FontFile3"];

/// Options for the font pass
#[derive(Debug, Clone, Default)]
pub struct FontOptions {
    /// Unembedding is only performed when enabled
    pub enabled: bool,
    /// Conformance hints; archival documents are left alone
    pub traits: DocumentTraits,
}

/// Result of the font pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FontReport {
    pub unembedded: usize,
    pub skipped: usize,
    /// Set when the whole pass was skipped for an archival document
    pub pdfa_skipped: bool,
}

/// Remove subset tags such as `ABCDEF+` from a base font name
pub fn strip_subset_prefix(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => rest,
        _ => name,
    }
}

/// Standard font name for a (possibly subset-tagged) base font name
pub fn standard_font_name(base_font: &str) -> Option<&'static str> {
    let name = strip_subset_prefix(base_font);
    if let Some(standard) = STANDARD_14.iter().find(|s| **s == name) {
        return Some(*standard);
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, standard)| *standard)
}

/// Replace embedded simple fonts that map to a standard font by
/// reference-only dictionaries, then delete descriptors and font programs
/// that nothing references any more.
pub fn unembed_fonts(doc: &mut Document, options: &FontOptions) -> FontReport {
    let mut report = FontReport::default();
    if !options.enabled {
        return report;
    }
    if options.traits.pdfa {
        log::info!("Document claims PDF/A conformance; fonts left embedded");
        report.pdfa_skipped = true;
        return report;
    }

    let font_ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter_map(|(id, object)| match object {
            Object::Dictionary(dict) if is_simple_font(doc, dict) => Some(*id),
            _ => None,
        })
        .collect();

    let mut orphans = Vec::new();
    for id in font_ids {
        let Some(Object::Dictionary(font)) = doc.objects.get(&id) else {
            continue;
        };
        match plan_unembed(doc, font) {
            Some((replacement, released)) => {
                log::debug!("Font {:?} replaced by reference to standard font", id);
                doc.objects.insert(id, Object::Dictionary(replacement));
                orphans.extend(released);
                report.unembedded += 1;
            }
            None => report.skipped += 1,
        }
    }

    let removed = delete_unreferenced(doc, orphans);
    log::info!(
        "Fonts: {} unembedded, {} skipped, {} font objects removed",
        report.unembedded,
        report.skipped,
        removed
    );
    report
}

/// Type1, MMType1 and TrueType fonts; Type0 and Type3 are never candidates
fn is_simple_font(doc: &Document, dict: &Dictionary) -> bool {
    graph::has_name(doc, dict, b"Type", b"Font")
        && matches!(
            graph::get_name(doc, dict, b"Subtype"),
            Some(b"Type1" | b"MMType1" | b"TrueType")
        )
}

/// The replacement dictionary and the identities it releases, or `None`
/// if the font must stay as it is
fn plan_unembed(doc: &Document, font: &Dictionary) -> Option<(Dictionary, Vec<ObjectId>)> {
    let base_font = String::from_utf8_lossy(graph::get_name(doc, font, b"BaseFont")?).into_owned();
    let standard = standard_font_name(&base_font)?;

    let encoding = match graph::get(doc, font, b"Encoding") {
        None => None,
        Some(Object::Name(name)) if STANDARD_ENCODINGS.contains(&name.as_slice()) => Some(name.clone()),
        Some(Object::Dictionary(encoding)) => {
            if encoding.has(b"Differences") {
                return None;
            }
            match graph::get_name(doc, encoding, b"BaseEncoding") {
                Some(name) if STANDARD_ENCODINGS.contains(&name) => Some(name.to_vec()),
                _ => None,
            }
        }
        // Identity-H and friends on a simple font are custom mappings
        Some(_) => return None,
    };

    let descriptor_ref = font.get(b"FontDescriptor").ok()?;
    let descriptor = graph::resolve_dict(doc, descriptor_ref)?;
    let mut released = Vec::new();
    for key in FONT_FILE_KEYS {
        if let Ok(Object::Reference(file_id)) = descriptor.get(key) {
            released.push(*file_id);
        }
    }
    if released.is_empty() {
        return None;
    }
    if let Object::Reference(descriptor_id) = descriptor_ref {
        released.push(*descriptor_id);
    }

    let mut replacement = Dictionary::new();
    replacement.set("Type", Object::Name(b"Font".to_vec()));
    replacement.set("Subtype", Object::Name(b"Type1".to_vec()));
    replacement.set("BaseFont", Object::Name(standard.as_bytes().to_vec()));
    if !matches!(standard, "Symbol" | "ZapfDingbats") {
        let encoding = encoding.unwrap_or_else(|| b"WinAnsiEncoding".to_vec());
        replacement.set("Encoding", Object::Name(encoding));
    }
    if let Ok(to_unicode) = font.get(b"ToUnicode") {
        replacement.set("ToUnicode", to_unicode.clone());
    }
    Some((replacement, released))
}

/// Delete candidates nothing references any more, repeating so a file
/// released by a deleted descriptor is also collected. Candidates still
/// shared with another font stay.
fn delete_unreferenced(doc: &mut Document, candidates: Vec<ObjectId>) -> usize {
    let mut pending: HashSet<ObjectId> = candidates.into_iter().collect();
    let mut removed = 0;
    loop {
        let referenced = graph::referenced_ids(doc);
        let dead: Vec<ObjectId> = pending.iter().filter(|id| !referenced.contains(id)).copied().collect();
        if dead.is_empty() {
            return removed;
        }
        for id in dead {
            pending.remove(&id);
            if graph::delete_object(doc, id) {
                removed += 1;
            }
        }
    }
}

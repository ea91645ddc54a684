//! Lossy image recompression
//!
//! For every image XObject: classify it, decode it to RGBA samples,
//! optionally downsample it to a DPI ceiling, re-encode it as JPEG and keep
//! the result only if it is strictly smaller than the stream it replaces.
//! A failure on one image is recorded as a skip and never stops the pass.

use std::collections::{BTreeMap, HashMap, HashSet};
use image::ImageFormat;
use jpeg_encoder::{ColorType, Encoder};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use serde::Serialize;
use crate::error::{Error, Result};
use crate::pdf::filters::{self, Filter, Predictor};
use crate::pdf::{graph, resample};

/// Default JPEG quality on the 0-1 scale
pub const DEFAULT_QUALITY: f32 = 0.75;

/// Decoded sample buffers smaller than this are left alone: JPEG header
/// overhead would eat any savings
pub const DEFAULT_MIN_DECODED_BYTES: usize = 2048;

/// Options for image recompression
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Lossy conversion is only performed when enabled
    pub enabled: bool,
    /// JPEG quality on a 0-1 scale, mapped to 1-100
    pub quality: f32,
    /// Downsample images whose effective DPI exceeds this
    pub max_dpi: Option<f32>,
    /// Minimum decoded sample bytes for an image to be considered
    pub min_decoded_bytes: usize,
    /// Keep a per-image decision log in the report
    pub debug: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: DEFAULT_QUALITY,
            max_dpi: None,
            min_decoded_bytes: DEFAULT_MIN_DECODED_BYTES,
            debug: false,
        }
    }
}

/// Why an image was left unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotImage,
    ImageMask,
    SoftMask,
    ColorKeyMask,
    Jpx,
    UnsupportedFilter,
    BitDepth,
    ColorSpace,
    TooSmall,
    NoGain,
    Error,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotImage => "not_image",
            SkipReason::ImageMask => "image_mask",
            SkipReason::SoftMask => "soft_mask",
            SkipReason::ColorKeyMask => "color_key_mask",
            SkipReason::Jpx => "jpx",
            SkipReason::UnsupportedFilter => "unsupported_filter",
            SkipReason::BitDepth => "bit_depth",
            SkipReason::ColorSpace => "color_space",
            SkipReason::TooSmall => "too_small",
            SkipReason::NoGain => "no_gain",
            SkipReason::Error => "error",
        }
    }
}

/// What happened to one image
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ImageAction {
    Converted { downsampled: bool },
    Skipped { reason: SkipReason },
}

/// Per-image entry of the debug log
#[derive(Debug, Clone, Serialize)]
pub struct ImageDecision {
    pub id: ObjectId,
    #[serde(flatten)]
    pub action: ImageAction,
    pub original_bytes: usize,
    pub new_bytes: Option<usize>,
    pub dimensions: Option<(u32, u32)>,
    pub new_dimensions: Option<(u32, u32)>,
    pub effective_dpi: Option<f32>,
    pub message: Option<String>,
}

impl ImageDecision {
    fn skipped(id: ObjectId, original_bytes: usize, reason: SkipReason) -> Self {
        Self {
            id,
            action: ImageAction::Skipped { reason },
            original_bytes,
            new_bytes: None,
            dimensions: None,
            new_dimensions: None,
            effective_dpi: None,
            message: None,
        }
    }
}

/// Result of the image pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageReport {
    pub converted: usize,
    pub skipped: usize,
    pub downsampled: usize,
    /// Skip counts by reason
    pub skip_reasons: BTreeMap<SkipReason, usize>,
    /// Per-image decisions, only filled in debug mode
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<ImageDecision>,
}

impl ImageReport {
    fn record(&mut self, decision: ImageDecision, debug: bool) {
        match &decision.action {
            ImageAction::Converted { downsampled } => {
                self.converted += 1;
                if *downsampled {
                    self.downsampled += 1;
                }
            }
            ImageAction::Skipped { reason } => {
                self.skipped += 1;
                *self.skip_reasons.entry(*reason).or_default() += 1;
            }
        }
        if debug {
            self.decisions.push(decision);
        }
    }
}

/// Where an eligible image's samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Already JPEG; decoded with the image codec
    Jpeg,
    /// Raw 8-bit samples behind invertible filters
    Samples,
}

/// Outcome of the eligibility gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Eligible {
    source: Source,
    components: u8,
}

/// An image being processed: decoded RGBA samples plus what is known about them
#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub width: u32,
    pub height: u32,
    /// Components of the source color space (1 or 3)
    pub components: u8,
    /// RGBA samples, alpha always 255
    pub rgba: Vec<u8>,
    pub effective_dpi: Option<f32>,
}

/// Re-encode eligible images as JPEG, downsampling above `max_dpi`.
///
/// A no-op returning an empty report unless `options.enabled` is set.
pub fn recompress_images(doc: &mut Document, options: &ImageOptions) -> ImageReport {
    let mut report = ImageReport::default();
    if !options.enabled {
        return report;
    }

    let placements = match options.max_dpi {
        Some(_) => placement_sizes(doc),
        None => HashMap::new(),
    };

    let image_ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter_map(|(id, object)| match object {
            Object::Stream(stream) if graph::has_name(doc, &stream.dict, b"Subtype", b"Image") => Some(*id),
            _ => None,
        })
        .collect();

    let masks = mask_targets(doc);
    for id in image_ids {
        let decision = if masks.contains(&id) {
            let original_bytes = doc
                .objects
                .get(&id)
                .and_then(|o| o.as_stream().ok())
                .map_or(0, |s| s.content.len());
            ImageDecision::skipped(id, original_bytes, SkipReason::SoftMask)
        } else {
            process_image(doc, id, options, placements.get(&id).copied())
        };
        log::debug!("Image {:?}: {:?}", id, decision.action);
        report.record(decision, options.debug);
    }

    log::info!(
        "Images: {} converted ({} downsampled), {} skipped",
        report.converted,
        report.downsampled,
        report.skipped
    );
    report
}

/// Images serving as another image's `/SMask` or explicit `/Mask`
fn mask_targets(doc: &Document) -> HashSet<ObjectId> {
    let mut targets = HashSet::new();
    for object in doc.objects.values() {
        let Object::Stream(stream) = object else {
            continue;
        };
        for key in [b"SMask".as_slice(), b"Mask".as_slice()] {
            if let Ok(Object::Reference(id)) = stream.dict.get(key) {
                targets.insert(*id);
            }
        }
    }
    targets
}

fn process_image(
    doc: &mut Document,
    id: ObjectId,
    options: &ImageOptions,
    placement: Option<(f32, f32)>,
) -> ImageDecision {
    let original_bytes = match doc.objects.get(&id) {
        Some(Object::Stream(stream)) => stream.content.len(),
        _ => return ImageDecision::skipped(id, 0, SkipReason::NotImage),
    };

    match try_process_image(doc, id, options, placement) {
        Ok(decision) => decision,
        Err(e) => {
            log::warn!("Image {:?} skipped after error: {}", id, e);
            let mut decision = ImageDecision::skipped(id, original_bytes, SkipReason::Error);
            decision.message = Some(e.to_string());
            decision
        }
    }
}

fn try_process_image(
    doc: &mut Document,
    id: ObjectId,
    options: &ImageOptions,
    placement: Option<(f32, f32)>,
) -> Result<ImageDecision> {
    let Some(Object::Stream(stream)) = doc.objects.get(&id) else {
        return Ok(ImageDecision::skipped(id, 0, SkipReason::NotImage));
    };
    let original_bytes = stream.content.len();

    let eligible = match classify(doc, stream) {
        Ok(eligible) => eligible,
        Err(reason) => return Ok(ImageDecision::skipped(id, original_bytes, reason)),
    };

    let mut candidate = decode_candidate(doc, stream, eligible)?;
    let mut decision = ImageDecision::skipped(id, original_bytes, SkipReason::TooSmall);
    decision.dimensions = Some((candidate.width, candidate.height));

    let sample_bytes = candidate.width as usize * candidate.height as usize * candidate.components as usize;
    if sample_bytes < options.min_decoded_bytes {
        return Ok(decision);
    }

    let mut downsampled = false;
    if let (Some(max_dpi), Some(placement)) = (options.max_dpi, placement) {
        let dpi = resample::effective_dpi(candidate.width, candidate.height, placement);
        candidate.effective_dpi = Some(dpi);
        decision.effective_dpi = Some(dpi);
        if let Some((w, h)) = resample::target_dimensions(candidate.width, candidate.height, dpi, max_dpi) {
            candidate.rgba = resample::downsample_area(&candidate.rgba, candidate.width, candidate.height, w, h);
            candidate.width = w;
            candidate.height = h;
            downsampled = true;
        }
    }

    let encoded = encode_jpeg(
        &candidate.rgba,
        candidate.width,
        candidate.height,
        candidate.components,
        quality_to_scale(options.quality),
    )?;
    decision.new_bytes = Some(encoded.len());

    if encoded.len() >= original_bytes {
        decision.action = ImageAction::Skipped { reason: SkipReason::NoGain };
        return Ok(decision);
    }

    if let Some(Object::Stream(stream)) = doc.objects.get_mut(&id) {
        commit(stream, encoded, candidate.width, candidate.height);
    }
    decision.action = ImageAction::Converted { downsampled };
    if downsampled {
        decision.new_dimensions = Some((candidate.width, candidate.height));
    }
    Ok(decision)
}

/// Eligibility gate; the first failing check decides the skip reason
fn classify(doc: &Document, stream: &Stream) -> std::result::Result<Eligible, SkipReason> {
    let dict = &stream.dict;
    if !graph::has_name(doc, dict, b"Subtype", b"Image") {
        return Err(SkipReason::NotImage);
    }
    if matches!(graph::get(doc, dict, b"ImageMask"), Some(Object::Boolean(true))) {
        return Err(SkipReason::ImageMask);
    }
    let smask_in_data = graph::get_integer(doc, dict, b"SMaskInData").unwrap_or(0) > 0;
    if is_present(dict, b"SMask") || smask_in_data {
        return Err(SkipReason::SoftMask);
    }
    if is_present(dict, b"Mask") {
        return Err(SkipReason::ColorKeyMask);
    }

    let chain = filters::filter_chain(doc, dict);
    if chain.contains(&Filter::Jpx) {
        return Err(SkipReason::Jpx);
    }

    if chain.last() == Some(&Filter::Dct) {
        if !chain[..chain.len() - 1].iter().all(Filter::is_invertible) {
            return Err(SkipReason::UnsupportedFilter);
        }
        // Re-encoding keeps the sample space, so calibrated and ICC spaces are fine here
        return match color_components(doc, dict, true) {
            Some(components) => Ok(Eligible { source: Source::Jpeg, components }),
            None => Err(SkipReason::ColorSpace),
        };
    }

    if !chain.iter().all(Filter::is_invertible) {
        return Err(SkipReason::UnsupportedFilter);
    }
    if graph::get_integer(doc, dict, b"BitsPerComponent") != Some(8) {
        return Err(SkipReason::BitDepth);
    }
    match color_components(doc, dict, false) {
        Some(components) => Ok(Eligible { source: Source::Samples, components }),
        None => Err(SkipReason::ColorSpace),
    }
}

/// A declared mask counts even when its reference dangles
fn is_present(dict: &Dictionary, key: &[u8]) -> bool {
    !matches!(dict.get(key), Err(_) | Ok(Object::Null))
}

/// Components of a gray or RGB color space.
///
/// Strict mode accepts only DeviceGray and DeviceRGB; lenient mode also
/// accepts calibrated and ICC-based spaces with 1 or 3 components.
fn color_components(doc: &Document, dict: &Dictionary, lenient: bool) -> Option<u8> {
    match graph::get(doc, dict, b"ColorSpace")? {
        Object::Name(name) => match name.as_slice() {
            b"DeviceRGB" => Some(3),
            b"DeviceGray" => Some(1),
            _ => None,
        },
        Object::Array(items) if lenient => {
            let family = match graph::resolve(doc, items.first()?)? {
                Object::Name(name) => name.as_slice(),
                _ => return None,
            };
            match family {
                b"CalRGB" => Some(3),
                b"CalGray" => Some(1),
                b"ICCBased" => {
                    let profile = graph::resolve_dict(doc, items.get(1)?)?;
                    match graph::get_integer(doc, profile, b"N")? {
                        1 => Some(1),
                        3 => Some(3),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn decode_candidate(doc: &Document, stream: &Stream, eligible: Eligible) -> Result<ImageCandidate> {
    match eligible.source {
        Source::Jpeg => {
            // Any filters ahead of DCTDecode are generic and decoded first
            let chain = filters::filter_chain(doc, &stream.dict);
            let params = filters::decode_params(doc, &stream.dict, chain.len());
            let mut data = stream.content.clone();
            for (filter, param) in chain.iter().zip(params.iter()).take(chain.len().saturating_sub(1)) {
                data = filters::decode_filter(filter, &data, param.as_ref())?;
            }

            // Trust the codec's dimensions over the dictionary's
            let decoded = image::load_from_memory_with_format(&data, ImageFormat::Jpeg)?;
            let components = match decoded.color().channel_count() {
                1 | 2 => 1,
                _ => 3,
            };
            if components != eligible.components {
                return Err(Error::Decode(format!(
                    "JPEG has {} components but color space declares {}",
                    components, eligible.components
                )));
            }
            Ok(ImageCandidate {
                width: decoded.width(),
                height: decoded.height(),
                components,
                rgba: decoded.to_rgba8().into_raw(),
                effective_dpi: None,
            })
        }
        Source::Samples => {
            let width = dimension(doc, &stream.dict, b"Width")?;
            let height = dimension(doc, &stream.dict, b"Height")?;
            let (mut data, params) = filters::decode_stream_raw(doc, stream)?;
            if let Some(predictor) = params.as_ref().and_then(|p| Predictor::from_params(doc, p)) {
                data = filters::undo_predictor(&data, &predictor)?;
            }

            let expected = width as usize * height as usize * eligible.components as usize;
            if data.len() < expected {
                return Err(Error::Decode(format!(
                    "image data truncated: {} bytes, expected {}",
                    data.len(),
                    expected
                )));
            }
            Ok(ImageCandidate {
                width,
                height,
                components: eligible.components,
                rgba: expand_to_rgba(&data[..expected], eligible.components),
                effective_dpi: None,
            })
        }
    }
}

fn dimension(doc: &Document, dict: &Dictionary, key: &[u8]) -> Result<u32> {
    match graph::get_integer(doc, dict, key) {
        Some(n) if n > 0 && n <= i64::from(u32::MAX) => Ok(n as u32),
        _ => Err(Error::Decode(format!(
            "missing or invalid /{}",
            String::from_utf8_lossy(key)
        ))),
    }
}

/// Expand gray or RGB samples to RGBA with full opacity
fn expand_to_rgba(samples: &[u8], components: u8) -> Vec<u8> {
    match components {
        1 => samples.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        _ => samples
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
    }
}

/// Map 0-1 quality onto the encoder's 1-100 scale
pub fn quality_to_scale(quality: f32) -> u8 {
    let quality = if quality.is_finite() { quality } else { DEFAULT_QUALITY };
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encode RGBA samples as a baseline JPEG.
///
/// Single-component images are encoded from the red channel as grayscale
/// so the stream still matches a DeviceGray color space.
pub fn encode_jpeg(rgba: &[u8], width: u32, height: u32, components: u8, quality: u8) -> Result<Vec<u8>> {
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(Error::General(format!(
            "{}x{} exceeds the JPEG size limit",
            width, height
        )));
    };
    let mut out = Vec::new();
    let encoder = Encoder::new(&mut out, quality);
    if components == 1 {
        let luma: Vec<u8> = rgba.chunks_exact(4).map(|p| p[0]).collect();
        encoder.encode(&luma, w, h, ColorType::Luma)?;
    } else {
        encoder.encode(rgba, w, h, ColorType::Rgba)?;
    }
    Ok(out)
}

/// Replace the stream's data with JPEG bytes and make its dictionary match
fn commit(stream: &mut Stream, encoded: Vec<u8>, width: u32, height: u32) {
    let length = encoded.len() as i64;
    stream.content = encoded;
    stream.dict.set("Length", length);
    stream.dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    stream.dict.remove(b"DecodeParms");
    stream.dict.remove(b"DP");
    stream.dict.set("BitsPerComponent", 8);
    stream.dict.set("Width", i64::from(width));
    stream.dict.set("Height", i64::from(height));
    // Already compressed; keep the writer from deflating it again
    stream.allows_compression = false;
}

/// Smallest page size each image is placed on, keyed by image identity.
///
/// Scans every page's resources, descending into form XObjects. The
/// smallest page implies the highest DPI, so it gives the most
/// conservative downsampling decision.
pub fn placement_sizes(doc: &Document) -> HashMap<ObjectId, (f32, f32)> {
    let mut placements = HashMap::new();
    for page_id in graph::page_ids(doc) {
        let (Some(size), Some(resources)) = (graph::page_size(doc, page_id), graph::page_resources(doc, page_id)) else {
            continue;
        };
        let mut visited_forms = HashSet::new();
        collect_placements(doc, resources, size, &mut placements, &mut visited_forms);
    }
    placements
}

fn collect_placements(
    doc: &Document,
    resources: &Dictionary,
    size: (f32, f32),
    placements: &mut HashMap<ObjectId, (f32, f32)>,
    visited_forms: &mut HashSet<ObjectId>,
) {
    for (_, entry) in graph::resource_entries(doc, resources, b"XObject") {
        let Object::Reference(id) = entry else {
            continue;
        };
        let Some(Object::Stream(xobject)) = doc.objects.get(id) else {
            continue;
        };
        if graph::has_name(doc, &xobject.dict, b"Subtype", b"Image") {
            placements
                .entry(*id)
                .and_modify(|(w, h): &mut (f32, f32)| {
                    *w = w.min(size.0);
                    *h = h.min(size.1);
                })
                .or_insert(size);
        } else if graph::has_name(doc, &xobject.dict, b"Subtype", b"Form") && visited_forms.insert(*id) {
            if let Some(Object::Dictionary(form_resources)) = graph::get(doc, &xobject.dict, b"Resources") {
                collect_placements(doc, form_resources, size, placements, visited_forms);
            }
        }
    }
}

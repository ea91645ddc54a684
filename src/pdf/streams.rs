//! Lossless recompression of general-purpose streams

use lopdf::{Document, Object, ObjectId, Stream};
use serde::Serialize;
use crate::error::Result;
use crate::pdf::filters::{self, Filter, BEST_COMPRESSION};
use crate::pdf::graph;

/// Stream types that must keep their exact encoding
const PROTECTED_TYPES: &[&[u8]] = &[b"Metadata", b"XRef", b"ObjStm"];

/// Result of the stream pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamReport {
    pub recompressed: usize,
    pub skipped: usize,
}

/// Re-deflate every stream that is not image-native at the strongest level,
/// keeping the new encoding only when it is strictly smaller.
pub fn recompress_streams(doc: &mut Document) -> StreamReport {
    let mut report = StreamReport::default();
    let ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, object)| matches!(object, Object::Stream(_)))
        .map(|(id, _)| *id)
        .collect();

    for id in ids {
        let Some(Object::Stream(stream)) = doc.objects.get(&id) else {
            continue;
        };
        let candidate = match recompress_candidate(doc, stream) {
            Ok(Some(bytes)) if bytes.len() < stream.content.len() => bytes,
            Ok(_) => {
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                log::debug!("Stream {:?} left as is: {}", id, e);
                report.skipped += 1;
                continue;
            }
        };

        if let Some(Object::Stream(stream)) = doc.objects.get_mut(&id) {
            log::debug!(
                "Stream {:?}: {} -> {} bytes",
                id,
                stream.content.len(),
                candidate.len()
            );
            commit(stream, candidate);
            report.recompressed += 1;
        }
    }

    log::info!(
        "Streams: {} recompressed, {} skipped",
        report.recompressed,
        report.skipped
    );
    report
}

/// Deflated form of the stream's decoded data, or `None` if it must be left alone
fn recompress_candidate(doc: &Document, stream: &Stream) -> Result<Option<Vec<u8>>> {
    if let Some(kind) = graph::get_name(doc, &stream.dict, b"Type") {
        if PROTECTED_TYPES.contains(&kind) {
            return Ok(None);
        }
    }
    let chain = filters::filter_chain(doc, &stream.dict);
    if chain.iter().any(Filter::is_image_native) {
        return Ok(None);
    }
    let decoded = filters::decode_stream(doc, stream)?;
    filters::deflate(&decoded, BEST_COMPRESSION).map(Some)
}

fn commit(stream: &mut Stream, encoded: Vec<u8>) {
    let length = encoded.len() as i64;
    stream.content = encoded;
    stream.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    stream.dict.remove(b"DecodeParms");
    stream.dict.remove(b"DP");
    stream.dict.set("Length", length);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Dictionary};

    fn repetitive(n: usize) -> Vec<u8> {
        b"0 0 m 100 100 l S\n".iter().copied().cycle().take(n).collect()
    }

    fn content(doc: &Document, id: ObjectId) -> &Stream {
        doc.get_object(id).unwrap().as_stream().unwrap()
    }

    #[test]
    fn test_uncompressed_stream_is_deflated() {
        let mut doc = Document::with_version("1.5");
        let raw = repetitive(4000);
        let id = doc.add_object(Stream::new(Dictionary::new(), raw.clone()));

        let report = recompress_streams(&mut doc);
        assert_eq!(report, StreamReport { recompressed: 1, skipped: 0 });

        let stream = content(&doc, id);
        assert!(stream.content.len() < raw.len());
        assert_eq!(stream.dict.get(b"Filter").unwrap().as_name().unwrap(), b"FlateDecode");
        assert_eq!(filters::decode_stream(&doc, stream).unwrap(), raw);
    }

    #[test]
    fn test_weak_flate_is_improved() {
        let mut doc = Document::with_version("1.5");
        let raw = repetitive(4000);
        let stored = filters::deflate(&raw, 0).unwrap();
        let id = doc.add_object(Stream::new(dictionary! { "Filter" => "FlateDecode" }, stored.clone()));

        assert_eq!(recompress_streams(&mut doc).recompressed, 1);
        assert!(content(&doc, id).content.len() < stored.len());
    }

    #[test]
    fn test_predictor_is_undone_and_params_dropped() {
        let mut doc = Document::with_version("1.5");
        // Two 4-byte rows with PNG "None" tags
        let rows: Vec<u8> = [0u8, 1, 2, 3, 4].iter().chain([0u8, 1, 2, 3, 4].iter()).copied().collect();
        let padded: Vec<u8> = rows.iter().copied().cycle().take(rows.len() * 200).collect();
        let id = doc.add_object(Stream::new(
            dictionary! {
                "Filter" => "FlateDecode",
                "DecodeParms" => dictionary! { "Predictor" => 12, "Columns" => 4 },
            },
            filters::deflate(&padded, 0).unwrap(),
        ));

        assert_eq!(recompress_streams(&mut doc).recompressed, 1);
        let stream = content(&doc, id);
        assert!(!stream.dict.has(b"DecodeParms"));
        let decoded = filters::decode_stream(&doc, stream).unwrap();
        assert_eq!(decoded.len(), 400 * 4);
        assert_eq!(&decoded[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_image_native_and_protected_streams_skipped() {
        let mut doc = Document::with_version("1.5");
        let filler = vec![0u8; 2000];
        let jpeg = doc.add_object(Stream::new(dictionary! { "Filter" => "DCTDecode" }, filler.clone()));
        let xmp = doc.add_object(Stream::new(
            dictionary! { "Type" => "Metadata", "Subtype" => "XML" },
            filler.clone(),
        ));

        let report = recompress_streams(&mut doc);
        assert_eq!(report, StreamReport { recompressed: 0, skipped: 2 });
        assert_eq!(content(&doc, jpeg).content, filler);
        assert_eq!(content(&doc, xmp).content, filler);
    }

    #[test]
    fn test_incompressible_and_undecodable_streams_skipped() {
        let mut doc = Document::with_version("1.5");
        let tiny = doc.add_object(Stream::new(Dictionary::new(), b"q".to_vec()));
        let corrupt = doc.add_object(Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            b"definitely not zlib".to_vec(),
        ));

        let report = recompress_streams(&mut doc);
        assert_eq!(report, StreamReport { recompressed: 0, skipped: 2 });
        assert_eq!(content(&doc, tiny).content, b"q".to_vec());
        assert_eq!(content(&doc, corrupt).content, b"definitely not zlib".to_vec());
    }
}

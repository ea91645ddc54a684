//! Content-addressed deduplication of streams and dictionaries
//!
//! Objects are grouped by a SHA-256 fingerprint of their contents. Within a
//! group the lowest identity is kept; every reference to another member is
//! rewritten to point at it and the redundant members are deleted.
//!
//! The fingerprint covers raw stream bytes and every dictionary entry except
//! the keys in [`FINGERPRINT_EXCLUDED_KEYS`]. Raw bytes plus the full filter
//! chain and decode parameters are hashed, so equal fingerprints always
//! decode to equal data.

use std::collections::HashMap;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;
use sha2::{Digest, Sha256};
use crate::pdf::graph;

/// Top-level dictionary keys ignored when fingerprinting.
///
/// `Length` is derived from the stream bytes; the others are producer
/// bookkeeping that does not affect rendering.
pub const FINGERPRINT_EXCLUDED_KEYS: &[&[u8]] = &[
    b"Length",
    b"LastModified",
    b"PieceInfo",
    b"PTEX.FileName",
    b"PTEX.PageNumber",
    b"PTEX.InfoDict",
];

/// Object types whose identity is structural and must never be merged
const IDENTITY_TYPES: &[&[u8]] = &[
    b"Catalog",
    b"Pages",
    b"Page",
    b"Annot",
    b"StructTreeRoot",
    b"StructElem",
    b"OBJR",
    b"Outlines",
    b"Sig",
];

type Fingerprint = [u8; 32];

/// Result of a deduplication pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    /// Number of redundant objects merged into a canonical copy
    pub deduplicated: usize,
}

/// Merge identical streams and dictionaries until nothing more merges.
///
/// Each round can make parents identical (two fonts pointing at what are
/// now the same font file), so rounds repeat until one merges nothing.
/// Every round that merges deletes at least one object, so this terminates.
pub fn deduplicate(doc: &mut Document) -> DedupReport {
    let mut deduplicated = 0;
    loop {
        let merged = dedup_round(doc);
        if merged == 0 {
            break;
        }
        log::debug!("Dedup round merged {} objects", merged);
        deduplicated += merged;
    }
    log::info!("Deduplicated {} objects", deduplicated);
    DedupReport { deduplicated }
}

fn dedup_round(doc: &mut Document) -> usize {
    let mut groups: HashMap<Fingerprint, Vec<ObjectId>> = HashMap::new();
    // objects is ordered, so each group lists identities ascending
    for (id, object) in &doc.objects {
        if let Some(fp) = fingerprint(doc, object) {
            groups.entry(fp).or_default().push(*id);
        }
    }

    let mut replacements: HashMap<ObjectId, ObjectId> = HashMap::new();
    for ids in groups.values().filter(|ids| ids.len() > 1) {
        let canonical = ids[0];
        for duplicate in &ids[1..] {
            replacements.insert(*duplicate, canonical);
        }
    }
    if replacements.is_empty() {
        return 0;
    }

    for object in doc.objects.values_mut() {
        graph::rewrite_references(object, &replacements);
    }
    graph::rewrite_dict_references(&mut doc.trailer, &replacements);

    for duplicate in replacements.keys() {
        graph::delete_object(doc, *duplicate);
    }
    replacements.len()
}

/// Fingerprint an indirect object, or `None` if it must not be merged
fn fingerprint(doc: &Document, object: &Object) -> Option<Fingerprint> {
    let mut hasher = Sha256::new();
    match object {
        Object::Stream(stream) => {
            if !is_mergeable(doc, &stream.dict) {
                return None;
            }
            hasher.update(b"S");
            hash_dict(&mut hasher, &stream.dict, FINGERPRINT_EXCLUDED_KEYS);
            hasher.update((stream.content.len() as u64).to_le_bytes());
            hasher.update(&stream.content);
        }
        Object::Dictionary(dict) => {
            if !is_mergeable(doc, dict) {
                return None;
            }
            hasher.update(b"D");
            hash_dict(&mut hasher, dict, FINGERPRINT_EXCLUDED_KEYS);
        }
        _ => return None,
    }
    Some(hasher.finalize().into())
}

fn is_mergeable(doc: &Document, dict: &Dictionary) -> bool {
    if dict.has(b"Parent") {
        return false;
    }
    match graph::get_name(doc, dict, b"Type") {
        Some(kind) => !IDENTITY_TYPES.contains(&kind),
        None => true,
    }
}

fn hash_dict(hasher: &mut Sha256, dict: &Dictionary, excluded: &[&[u8]]) {
    // Key order in the file is not meaningful
    let mut entries: Vec<(&Vec<u8>, &Object)> = dict
        .iter()
        .filter(|(key, _)| !excluded.contains(&key.as_slice()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    hasher.update((entries.len() as u64).to_le_bytes());
    for (key, value) in entries {
        hash_bytes(hasher, key);
        hash_object(hasher, value);
    }
}

fn hash_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn hash_object(hasher: &mut Sha256, object: &Object) {
    match object {
        Object::Null => hasher.update(b"n"),
        Object::Boolean(b) => hasher.update(if *b { b"t" } else { b"f" }),
        Object::Integer(n) => {
            hasher.update(b"i");
            hasher.update(n.to_le_bytes());
        }
        Object::Real(r) => {
            hasher.update(b"r");
            hasher.update(r.to_bits().to_le_bytes());
        }
        Object::Name(name) => {
            hasher.update(b"N");
            hash_bytes(hasher, name);
        }
        Object::String(bytes, _) => {
            hasher.update(b"s");
            hash_bytes(hasher, bytes);
        }
        Object::Array(items) => {
            hasher.update(b"A");
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                hash_object(hasher, item);
            }
        }
        Object::Dictionary(dict) => {
            hasher.update(b"D");
            hash_dict(hasher, dict, &[]);
        }
        Object::Stream(stream) => {
            hasher.update(b"S");
            hash_dict(hasher, &stream.dict, &[]);
            hash_bytes(hasher, &stream.content);
        }
        Object::Reference((number, generation)) => {
            hasher.update(b"R");
            hasher.update(number.to_le_bytes());
            hasher.update(generation.to_le_bytes());
        }
    }
}

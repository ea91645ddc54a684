//! Object graph queries over a lopdf document
//!
//! Every pass goes through these helpers to resolve references, walk the
//! children of a dictionary or array, and find pages and their inherited
//! attributes. All walks that follow references keep a visited set so a
//! cyclic graph cannot trap them.

use std::collections::{HashMap, HashSet};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

/// Longest chain of reference-to-reference hops `resolve` will follow
const MAX_REFERENCE_CHAIN: usize = 32;

/// Follow references until a direct object is reached.
///
/// Returns `None` for dangling references and for chains that loop.
pub fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_REFERENCE_CHAIN {
        match current {
            Object::Reference(id) => current = doc.objects.get(id)?,
            direct => return Some(direct),
        }
    }
    None
}

/// Resolve an object to a dictionary, accepting a stream's dictionary too
pub fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Resolve an object to a stream
pub fn resolve_stream<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Stream> {
    match resolve(doc, object)? {
        Object::Stream(stream) => Some(stream),
        _ => None,
    }
}

/// Look up `key` in `dict` and resolve the value
pub fn get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    resolve(doc, dict.get(key).ok()?)
}

/// Look up a name value, resolving an indirect value
pub fn get_name<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match get(doc, dict, key)? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

/// Look up a numeric value (integer or real)
pub fn get_number(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<f32> {
    number(get(doc, dict, key)?)
}

/// Look up an integer value
pub fn get_integer(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match get(doc, dict, key)? {
        Object::Integer(n) => Some(*n),
        Object::Real(r) => Some(*r as i64),
        _ => None,
    }
}

/// Check whether `dict[key]` is the name `value`
pub fn has_name(doc: &Document, dict: &Dictionary, key: &[u8], value: &[u8]) -> bool {
    get_name(doc, dict, key) == Some(value)
}

/// Numeric value of a direct object
pub fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(n) => Some(*n as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Append every reference nested anywhere inside `object`.
///
/// Descends into arrays, dictionaries and stream dictionaries, but not
/// through the references themselves.
pub fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        Object::Dictionary(dict) => collect_dict_references(dict, out),
        Object::Stream(stream) => collect_dict_references(&stream.dict, out),
        Object::Null
        | Object::Boolean(_)
        | Object::Integer(_)
        | Object::Real(_)
        | Object::Name(_)
        | Object::String(_, _) => {}
    }
}

/// Append every reference nested inside a dictionary
pub fn collect_dict_references(dict: &Dictionary, out: &mut Vec<ObjectId>) {
    for (_, value) in dict.iter() {
        collect_references(value, out);
    }
}

/// Rewrite references in place according to `map`.
///
/// Returns the number of references rewritten.
pub fn rewrite_references(object: &mut Object, map: &HashMap<ObjectId, ObjectId>) -> usize {
    match object {
        Object::Reference(id) => match map.get(id) {
            Some(new_id) => {
                *id = *new_id;
                1
            }
            None => 0,
        },
        Object::Array(items) => items
            .iter_mut()
            .map(|item| rewrite_references(item, map))
            .sum(),
        Object::Dictionary(dict) => rewrite_dict_references(dict, map),
        Object::Stream(stream) => rewrite_dict_references(&mut stream.dict, map),
        Object::Null
        | Object::Boolean(_)
        | Object::Integer(_)
        | Object::Real(_)
        | Object::Name(_)
        | Object::String(_, _) => 0,
    }
}

/// Rewrite references inside a dictionary according to `map`
pub fn rewrite_dict_references(dict: &mut Dictionary, map: &HashMap<ObjectId, ObjectId>) -> usize {
    dict.iter_mut()
        .map(|(_, value)| rewrite_references(value, map))
        .sum()
}

/// Identities referenced from the trailer (Root, Info, Encrypt, ...)
pub fn trailer_roots(doc: &Document) -> Vec<ObjectId> {
    let mut roots = Vec::new();
    collect_dict_references(&doc.trailer, &mut roots);
    roots
}

/// Identity of the document catalog, if the trailer names one
pub fn catalog_id(doc: &Document) -> Option<ObjectId> {
    match doc.trailer.get(b"Root").ok()? {
        Object::Reference(id) => Some(*id),
        _ => None,
    }
}

/// The document catalog dictionary
pub fn catalog(doc: &Document) -> Option<&Dictionary> {
    resolve_dict(doc, doc.trailer.get(b"Root").ok()?)
}

/// Every identity referenced by some object or by the trailer
pub fn referenced_ids(doc: &Document) -> HashSet<ObjectId> {
    let mut refs = trailer_roots(doc);
    for object in doc.objects.values() {
        collect_references(object, &mut refs);
    }
    refs.into_iter().collect()
}

/// Delete an indirect object. Deleting a missing identity is a no-op.
///
/// Returns whether an object was actually removed.
pub fn delete_object(doc: &mut Document, id: ObjectId) -> bool {
    doc.objects.remove(&id).is_some()
}

/// Page object identities in document order.
///
/// Walks the page tree from the catalog's `/Pages` with a visited set, so
/// malformed trees with repeated or cyclic `/Kids` still terminate.
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    let mut pages = Vec::new();
    let Some(root) = catalog(doc).and_then(|cat| cat.get(b"Pages").ok()) else {
        return pages;
    };
    let Object::Reference(root_id) = root else {
        return pages;
    };

    let mut visited = HashSet::new();
    let mut stack = vec![*root_id];
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(dict) = doc.objects.get(&id).and_then(|obj| obj.as_dict().ok()) else {
            continue;
        };
        if has_name(doc, dict, b"Type", b"Page") {
            pages.push(id);
            continue;
        }
        if let Some(Object::Array(kids)) = get(doc, dict, b"Kids") {
            // Reverse so the stack pops kids in order
            for kid in kids.iter().rev() {
                if let Object::Reference(kid_id) = kid {
                    stack.push(*kid_id);
                }
            }
        }
    }
    pages
}

/// Look up a page attribute, following `/Parent` for inheritable keys
pub fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut visited = HashSet::new();
    let mut current = Some(page_id);
    while let Some(id) = current {
        if !visited.insert(id) {
            return None;
        }
        let dict = doc.objects.get(&id)?.as_dict().ok()?;
        if let Some(value) = get(doc, dict, key) {
            return Some(value);
        }
        current = match dict.get(b"Parent").ok() {
            Some(Object::Reference(parent)) => Some(*parent),
            _ => None,
        };
    }
    None
}

/// A page's (possibly inherited) resource dictionary
pub fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    match inherited(doc, page_id, b"Resources")? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// Page width and height in points, from the (possibly inherited) `/MediaBox`
pub fn page_size(doc: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let Object::Array(rect) = inherited(doc, page_id, b"MediaBox")? else {
        return None;
    };
    if rect.len() != 4 {
        return None;
    }
    let coords: Vec<f32> = rect
        .iter()
        .filter_map(|v| resolve(doc, v).and_then(number))
        .collect();
    if coords.len() != 4 {
        return None;
    }
    let width = (coords[2] - coords[0]).abs();
    let height = (coords[3] - coords[1]).abs();
    (width > 0.0 && height > 0.0).then_some((width, height))
}

/// Entries of a named sub-dictionary of a resource dictionary (e.g. `/Font`)
pub fn resource_entries<'a>(
    doc: &'a Document,
    resources: &'a Dictionary,
    category: &[u8],
) -> Vec<(&'a [u8], &'a Object)> {
    match get(doc, resources, category) {
        Some(Object::Dictionary(sub)) => sub.iter().map(|(k, v)| (k.as_slice(), v)).collect(),
        _ => Vec::new(),
    }
}

/// Look up one named resource in a category, returning the raw (unresolved) value
pub fn resource_entry<'a>(
    doc: &'a Document,
    resources: &'a Dictionary,
    category: &[u8],
    name: &[u8],
) -> Option<&'a Object> {
    match get(doc, resources, category)? {
        Object::Dictionary(sub) => sub.get(name).ok(),
        _ => None,
    }
}

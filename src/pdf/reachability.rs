//! Unreferenced-object removal
//!
//! Mark phase: walk every reference reachable from the trailer. Sweep
//! phase: delete every indirect object the walk never reached.

use std::collections::HashSet;
use lopdf::{Document, ObjectId};
use serde::Serialize;
use crate::pdf::graph;

/// Result of an unreferenced-object sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectReport {
    /// Number of indirect objects deleted
    pub removed: usize,
}

/// Identities transitively reachable from the trailer.
///
/// The visited set only grows and is bounded by the object count, so the
/// walk terminates on cyclic graphs. References to missing objects are
/// recorded as visited but contribute no children.
pub fn reachable(doc: &Document) -> HashSet<ObjectId> {
    let mut visited = HashSet::new();
    let mut stack = graph::trailer_roots(doc);
    let mut children = Vec::new();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(object) = doc.objects.get(&id) else {
            continue;
        };
        children.clear();
        graph::collect_references(object, &mut children);
        stack.extend(children.iter().filter(|child| !visited.contains(*child)));
    }

    visited
}

/// Delete every indirect object that is not reachable from the trailer.
///
/// A document whose trailer has no usable `/Root` (absent, or pointing at a
/// missing catalog) is left untouched: with no root everything would be
/// "unreachable".
pub fn remove_unreferenced(doc: &mut Document) -> CollectReport {
    if graph::catalog(doc).is_none() {
        log::warn!("Trailer has no resolvable /Root; skipping unreferenced-object removal");
        return CollectReport::default();
    }

    let live = reachable(doc);
    let dead: Vec<ObjectId> = doc
        .objects
        .keys()
        .filter(|id| !live.contains(id))
        .copied()
        .collect();

    let removed = dead
        .into_iter()
        .filter(|id| graph::delete_object(doc, *id))
        .count();

    log::info!("Removed {} unreferenced objects", removed);
    CollectReport { removed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object};

    fn doc_with_root() -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        (doc, catalog_id)
    }

    #[test]
    fn test_orphans_removed_and_live_objects_kept() {
        let (mut doc, catalog_id) = doc_with_root();
        let kept = doc.add_object(Object::Integer(1));
        let orphan = doc.add_object(Object::Integer(2));
        let orphan_child = doc.add_object(Object::Integer(3));
        doc.objects.insert(orphan, Object::Array(vec![Object::Reference(orphan_child)]));
        if let Ok(Object::Dictionary(cat)) = doc.get_object_mut(catalog_id) {
            cat.set("Extra", kept);
        }

        let report = remove_unreferenced(&mut doc);
        assert_eq!(report.removed, 2);
        assert!(doc.objects.contains_key(&kept));
        assert!(!doc.objects.contains_key(&orphan));
        assert!(!doc.objects.contains_key(&orphan_child));
    }

    #[test]
    fn test_cycle_reachable_through_one_member_is_kept() {
        let (mut doc, catalog_id) = doc_with_root();
        let a = doc.new_object_id();
        let b = doc.new_object_id();
        doc.objects.insert(a, Object::Dictionary(dictionary! { "Next" => b }));
        doc.objects.insert(b, Object::Dictionary(dictionary! { "Next" => a }));
        if let Ok(Object::Dictionary(cat)) = doc.get_object_mut(catalog_id) {
            cat.set("Loop", a);
        }

        let live = reachable(&doc);
        assert!(live.contains(&a) && live.contains(&b));
        assert_eq!(remove_unreferenced(&mut doc).removed, 0);
    }

    #[test]
    fn test_unreachable_cycle_is_removed() {
        let (mut doc, _) = doc_with_root();
        let a = doc.new_object_id();
        let b = doc.new_object_id();
        doc.objects.insert(a, Object::Dictionary(dictionary! { "Next" => b }));
        doc.objects.insert(b, Object::Dictionary(dictionary! { "Next" => a }));

        assert_eq!(remove_unreferenced(&mut doc).removed, 2);
    }

    #[test]
    fn test_second_sweep_removes_nothing() {
        let (mut doc, _) = doc_with_root();
        doc.add_object(Object::Integer(7));

        assert_eq!(remove_unreferenced(&mut doc).removed, 1);
        assert_eq!(remove_unreferenced(&mut doc).removed, 0);

        // Everything left is reachable
        let live = reachable(&doc);
        assert!(doc.objects.keys().all(|id| live.contains(id)));
    }

    #[test]
    fn test_info_dictionary_survives() {
        let (mut doc, _) = doc_with_root();
        let info = doc.add_object(dictionary! { "Producer" => Object::string_literal("test") });
        doc.trailer.set("Info", info);

        remove_unreferenced(&mut doc);
        assert!(doc.objects.contains_key(&info));
    }

    #[test]
    fn test_missing_root_is_left_alone() {
        let mut doc = Document::with_version("1.5");
        doc.add_object(Object::Integer(1));
        assert_eq!(remove_unreferenced(&mut doc).removed, 0);
        assert_eq!(doc.objects.len(), 1);
    }

    #[test]
    fn test_dangling_root_is_left_alone() {
        let mut doc = Document::with_version("1.5");
        doc.add_object(Object::Integer(1));
        doc.add_object(dictionary! { "Type" => "Pages", "Count" => 0 });
        doc.trailer.set("Root", Object::Reference((99, 0)));

        assert_eq!(remove_unreferenced(&mut doc).removed, 0);
        assert_eq!(doc.objects.len(), 2);
    }
}

//! Page reordering by copying pages into a fresh document
//!
//! Objects reachable from a page's `/Contents` and `/Annots` are copied once per
//! page copy, so a page listed twice yields two independent pages. Everything
//! else (fonts, images, shared resources) is copied once and shared.

use std::collections::{HashMap, HashSet};

use lopdf::{dictionary, Document, Object, ObjectId};

use super::{PdfDocument, INHERITABLE_KEYS};
use crate::error::OperationError;

/// Keys whose objects belong to a single page copy
const PER_COPY_KEYS: [&[u8]; 2] = [b"Contents", b"Annots"];

struct Copier<'a> {
    source: &'a PdfDocument,
    dest: Document,
    /// Page and page-tree node objects of the source; never copied through references
    page_tree: HashSet<ObjectId>,
}

impl Copier<'_> {
    fn copy_reference(&mut self, id: ObjectId, map: &mut HashMap<ObjectId, ObjectId>) -> Object {
        if let Some(new_id) = map.get(&id) {
            return Object::Reference(*new_id);
        }
        if self.page_tree.contains(&id) {
            return Object::Null;
        }
        let Ok(object) = self.source.doc.get_object(id) else {
            return Object::Null;
        };

        let new_id = self.dest.new_object_id();
        map.insert(id, new_id);
        let copied = self.copy_object(object.clone(), map);
        self.dest.objects.insert(new_id, copied);
        Object::Reference(new_id)
    }

    fn copy_object(&mut self, object: Object, map: &mut HashMap<ObjectId, ObjectId>) -> Object {
        match object {
            Object::Reference(id) => self.copy_reference(id, map),
            Object::Array(items) => Object::Array(
                items
                    .into_iter()
                    .map(|item| self.copy_object(item, map))
                    .collect(),
            ),
            Object::Dictionary(mut dict) => {
                for (_, value) in dict.iter_mut() {
                    *value = self.copy_object(std::mem::replace(value, Object::Null), map);
                }
                Object::Dictionary(dict)
            }
            Object::Stream(mut stream) => {
                for (_, value) in stream.dict.iter_mut() {
                    *value = self.copy_object(std::mem::replace(value, Object::Null), map);
                }
                Object::Stream(stream)
            }
            other => other,
        }
    }
}

fn page_tree_nodes(doc: &Document) -> HashSet<ObjectId> {
    doc.objects
        .iter()
        .filter(|(_, object)| {
            object
                .as_dict()
                .ok()
                .and_then(|dict| dict.get(b"Type").ok())
                .and_then(|kind| kind.as_name().ok())
                .map(|kind| kind == b"Page" || kind == b"Pages")
                .unwrap_or(false)
        })
        .map(|(id, _)| *id)
        .collect()
}

/// Build a document containing the pages at `order` (zero-based), in that order
pub(crate) fn copy_pages(source: &PdfDocument, order: &[usize]) -> Result<Document, OperationError> {
    if order.is_empty() {
        return Err(OperationError::Validation(
            "reorder must list at least one page".into(),
        ));
    }

    let page_ids = order
        .iter()
        .map(|&index| {
            source.page_id(index).map_err(|_| OperationError::PageOutOfRange {
                field: "reorder".into(),
                page: index,
                page_count: source.doc.get_pages().len(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut copier = Copier {
        source,
        dest: Document::with_version(source.doc.version.clone()),
        page_tree: page_tree_nodes(&source.doc),
    };
    let pages_id = copier.dest.new_object_id();
    let mut shared = HashMap::new();
    let mut kids = Vec::with_capacity(page_ids.len());

    for old_id in page_ids {
        let mut page = source.page_dict(old_id)?.clone();
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Some(value) = source.inherited(old_id, key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        page.remove(b"Parent");

        let new_id = copier.dest.new_object_id();
        let mut local = HashMap::from([(old_id, new_id)]);
        for (key, value) in page.iter_mut() {
            let map = if PER_COPY_KEYS.contains(&key.as_slice()) {
                &mut local
            } else {
                &mut shared
            };
            *value = copier.copy_object(std::mem::replace(value, Object::Null), map);
        }
        page.set("Parent", pages_id);

        copier.dest.objects.insert(new_id, Object::Dictionary(page));
        kids.push(Object::Reference(new_id));
    }

    let info = source
        .doc
        .trailer
        .get(b"Info")
        .ok()
        .cloned()
        .map(|info| copier.copy_object(info, &mut shared));

    let mut dest = copier.dest;
    dest.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = dest.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    dest.trailer.set("Root", catalog_id);
    if let Some(info) = info {
        dest.trailer.set("Info", info);
    }

    Ok(dest)
}

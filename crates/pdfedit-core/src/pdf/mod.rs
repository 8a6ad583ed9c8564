//! lopdf-backed implementation of [`PageDocument`]
//!
//! Edits are appended to each page as extra content streams. The first time a
//! page is touched its existing content is wrapped in `q ... Q` so graphics
//! state left behind by the original content cannot shift new drawings.

mod content;
mod fonts;
mod reorder;
mod redact;

use std::collections::HashSet;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::color::Rgb;
use crate::document::{Overlay, PageDocument, SaveOptions};
use crate::error::OperationError;
use crate::geometry::{PageBox, Point, Rect};

/// Letter size, used when a page carries no usable MediaBox
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Reference chains longer than this are treated as broken
const MAX_REFERENCE_DEPTH: usize = 32;

/// Nesting limit when descending into Form XObjects
pub(crate) const MAX_FORM_DEPTH: usize = 12;

/// Attributes a page may inherit from its ancestors in the page tree
pub(crate) const INHERITABLE_KEYS: [&[u8]; 4] =
    [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

pub struct PdfDocument {
    doc: Document,
    /// Shared Helvetica font dictionary, created on first text insertion
    font_id: Option<ObjectId>,
    /// Pages whose original content has already been wrapped in q/Q
    wrapped: HashSet<ObjectId>,
}

impl PdfDocument {
    /// Parse PDF bytes into an editable document
    pub fn open(bytes: &[u8]) -> Result<Self, OperationError> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| OperationError::Codec(format!("Failed to parse PDF: {}", e)))?;

        if doc.get_pages().is_empty() {
            return Err(OperationError::Codec("PDF contains no pages".into()));
        }

        Ok(Self::from_document(doc))
    }

    pub(crate) fn from_document(doc: Document) -> Self {
        Self {
            doc,
            font_id: None,
            wrapped: HashSet::new(),
        }
    }

    /// Absolute rotation of a page, normalized to 0, 90, 180 or 270
    pub fn rotation(&self, index: usize) -> Result<i64, OperationError> {
        let page_id = self.page_id(index)?;
        Ok(self.page_rotation(page_id))
    }

    /// Text shown by a page, including the Form XObjects it draws, one line
    /// per text object
    pub fn page_text(&self, index: usize) -> Result<String, OperationError> {
        let page_id = self.page_id(index)?;
        let content = self.decoded_content(page_id)?;
        let resources = self.page_resources(page_id);
        Ok(self.content_text(&content.operations, &resources, 0))
    }

    fn content_text(
        &self,
        operations: &[Operation],
        resources: &Dictionary,
        depth: usize,
    ) -> String {
        let fonts = fonts::resource_fonts(self, resources);
        content::extract_text(operations, &fonts, &mut |name| {
            if depth >= MAX_FORM_DEPTH {
                return None;
            }
            let form = self.form_xobject(resources, name)?;
            let operations = stream_operations(form).ok()?;
            let form_resources = self
                .form_resources(form)
                .unwrap_or_else(|| resources.clone());
            Some(self.content_text(&operations, &form_resources, depth + 1))
        })
    }

    /// Text of every page, separated by newlines
    pub fn text(&self) -> Result<String, OperationError> {
        let mut text = String::new();
        for index in 0..self.page_count() {
            text.push_str(&self.page_text(index)?);
            text.push('\n');
        }
        Ok(text)
    }

    pub(crate) fn page_id(&self, index: usize) -> Result<ObjectId, OperationError> {
        let pages = self.doc.get_pages();
        u32::try_from(index + 1)
            .ok()
            .and_then(|number| pages.get(&number).copied())
            .ok_or_else(|| OperationError::PageOutOfRange {
                field: "page".into(),
                page: index,
                page_count: pages.len(),
            })
    }

    /// Follow references until a direct object is reached
    pub(crate) fn resolve<'a>(&'a self, mut object: &'a Object) -> Option<&'a Object> {
        for _ in 0..MAX_REFERENCE_DEPTH {
            match object {
                Object::Reference(id) => object = self.doc.get_object(*id).ok()?,
                direct => return Some(direct),
            }
        }
        None
    }

    pub(crate) fn resolve_dict<'a>(&'a self, object: &'a Object) -> Option<&'a Dictionary> {
        self.resolve(object).and_then(|o| o.as_dict().ok())
    }

    fn page_dict(&self, page_id: ObjectId) -> Result<&Dictionary, OperationError> {
        self.doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| OperationError::Codec(format!("Invalid page object: {}", e)))
    }

    fn page_dict_mut(&mut self, page_id: ObjectId) -> Result<&mut Dictionary, OperationError> {
        self.doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| OperationError::Codec(format!("Invalid page object: {}", e)))
    }

    /// Look up a page attribute, walking up the page tree for inherited keys
    pub(crate) fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut node = self.doc.get_object(page_id).ok()?.as_dict().ok()?;
        for _ in 0..MAX_REFERENCE_DEPTH {
            if let Ok(value) = node.get(key) {
                return self.resolve(value);
            }
            let parent = node.get(b"Parent").ok()?;
            node = self.resolve_dict(parent)?;
        }
        None
    }

    /// Unrotated visible box: CropBox when present, else MediaBox
    pub(crate) fn page_box(&self, page_id: ObjectId) -> PageBox {
        let read_box = |key: &[u8]| -> Option<[f64; 4]> {
            let values = self.inherited(page_id, key)?.as_array().ok()?;
            if values.len() != 4 {
                return None;
            }
            let mut out = [0.0; 4];
            for (slot, value) in out.iter_mut().zip(values) {
                *slot = number(self.resolve(value)?)?;
            }
            Some(out)
        };

        let values = read_box(b"CropBox")
            .or_else(|| read_box(b"MediaBox"))
            .unwrap_or(DEFAULT_MEDIA_BOX);
        PageBox::from_array(values)
    }

    fn page_rotation(&self, page_id: ObjectId) -> i64 {
        self.inherited(page_id, b"Rotate")
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0)
            .rem_euclid(360)
    }

    /// Effective resource dictionary of a page, with inherited values resolved
    pub(crate) fn page_resources(&self, page_id: ObjectId) -> Dictionary {
        self.inherited(page_id, b"Resources")
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default()
    }

    /// The Form XObject registered under `name` in a resource dictionary
    pub(crate) fn form_xobject(&self, resources: &Dictionary, name: &[u8]) -> Option<&Stream> {
        let xobjects = resources
            .get(b"XObject")
            .ok()
            .and_then(|o| self.resolve_dict(o))?;
        let Ok(Object::Reference(id)) = xobjects.get(name) else {
            return None;
        };
        let stream = self
            .resolve(self.doc.get_object(*id).ok()?)?
            .as_stream()
            .ok()?;
        match stream.dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Form") => Some(stream),
            _ => None,
        }
    }

    /// A form's own /Resources, if it has any
    pub(crate) fn form_resources(&self, form: &Stream) -> Option<Dictionary> {
        form.dict
            .get(b"Resources")
            .ok()
            .and_then(|o| self.resolve_dict(o))
            .cloned()
    }

    pub(crate) fn decoded_content(&self, page_id: ObjectId) -> Result<Content, OperationError> {
        let data = self
            .doc
            .get_page_content(page_id)
            .map_err(|e| OperationError::Codec(format!("Failed to read page content: {}", e)))?;
        Content::decode(&data)
            .map_err(|e| OperationError::Codec(format!("Failed to parse page content: {}", e)))
    }

    /// Register `object_id` under a resource category of the page and return its name.
    ///
    /// The page gets its own direct /Resources dictionary so pages that shared
    /// an inherited one are unaffected.
    fn add_page_resource(
        &mut self,
        page_id: ObjectId,
        category: &[u8],
        prefix: &str,
        object_id: ObjectId,
    ) -> Result<Vec<u8>, OperationError> {
        let mut resources = self.page_resources(page_id);
        let mut entries = resources
            .get(category)
            .ok()
            .and_then(|o| self.resolve_dict(o))
            .cloned()
            .unwrap_or_default();

        let existing = entries.iter().find_map(|(name, value)| match value {
            Object::Reference(id) if *id == object_id => Some(name.clone()),
            _ => None,
        });

        let name = match existing {
            Some(name) => name,
            None => {
                let name = (0..)
                    .map(|n| format!("{}{}", prefix, n).into_bytes())
                    .find(|candidate| !entries.has(candidate))
                    .unwrap_or_else(|| prefix.as_bytes().to_vec());
                entries.set(name.clone(), Object::Reference(object_id));
                name
            }
        };

        resources.set(category.to_vec(), Object::Dictionary(entries));
        self.page_dict_mut(page_id)?
            .set("Resources", Object::Dictionary(resources));
        Ok(name)
    }

    /// Name of the shared Helvetica font in the page's resources
    fn text_font(&mut self, page_id: ObjectId) -> Result<Vec<u8>, OperationError> {
        let font_id = match self.font_id {
            Some(id) => id,
            None => {
                let id = self.doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                });
                self.font_id = Some(id);
                id
            }
        };
        self.add_page_resource(page_id, b"Font", "Helv", font_id)
    }

    /// Append operations as a new content stream drawn on top of the page
    fn append_content(
        &mut self,
        page_id: ObjectId,
        operations: Vec<Operation>,
    ) -> Result<(), OperationError> {
        let data = Content { operations }
            .encode()
            .map_err(|e| OperationError::Codec(format!("Failed to encode content: {}", e)))?;
        let stream_id = self.doc.add_object(Stream::new(Dictionary::new(), data));

        let mut contents = self.content_refs(page_id)?;
        if !contents.is_empty() && self.wrapped.insert(page_id) {
            let save = self.doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
            let restore = self.doc.add_object(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));
            contents.insert(0, Object::Reference(save));
            contents.push(Object::Reference(restore));
        }
        self.wrapped.insert(page_id);
        contents.push(Object::Reference(stream_id));

        self.page_dict_mut(page_id)?
            .set("Contents", Object::Array(contents));
        Ok(())
    }

    /// Replace a page's content with a single stream
    fn replace_content(
        &mut self,
        page_id: ObjectId,
        operations: Vec<Operation>,
    ) -> Result<(), OperationError> {
        let data = Content { operations }
            .encode()
            .map_err(|e| OperationError::Codec(format!("Failed to encode content: {}", e)))?;
        let stream_id = self.doc.add_object(Stream::new(Dictionary::new(), data));
        self.page_dict_mut(page_id)?
            .set("Contents", Object::Reference(stream_id));
        Ok(())
    }

    /// Current /Contents of a page as a list of stream references
    fn content_refs(&self, page_id: ObjectId) -> Result<Vec<Object>, OperationError> {
        let page = self.page_dict(page_id)?;
        let refs = match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        Ok(refs)
    }

    /// Attach an annotation dictionary to a page's /Annots array
    fn add_annotation(
        &mut self,
        page_id: ObjectId,
        annotation: Dictionary,
    ) -> Result<ObjectId, OperationError> {
        let mut annots = self.page_annotations(page_id);
        let annot_id = self.doc.add_object(Object::Dictionary(annotation));
        annots.push(Object::Reference(annot_id));
        self.page_dict_mut(page_id)?
            .set("Annots", Object::Array(annots));
        Ok(annot_id)
    }

    fn page_annotations(&self, page_id: ObjectId) -> Vec<Object> {
        self.page_dict(page_id)
            .ok()
            .and_then(|page| page.get(b"Annots").ok())
            .and_then(|annots| self.resolve(annots))
            .and_then(|annots| annots.as_array().ok())
            .cloned()
            .unwrap_or_default()
    }
}

impl PageDocument for PdfDocument {
    fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    fn page_size(&self, index: usize) -> Result<(f64, f64), OperationError> {
        let page_id = self.page_id(index)?;
        let page_box = self.page_box(page_id);
        match self.page_rotation(page_id) {
            90 | 270 => Ok((page_box.height(), page_box.width())),
            _ => Ok((page_box.width(), page_box.height())),
        }
    }

    fn delete_page(&mut self, index: usize) -> Result<(), OperationError> {
        let page_id = self.page_id(index)?;
        self.doc.delete_pages(&[index as u32 + 1]);
        self.wrapped.remove(&page_id);
        Ok(())
    }

    fn reorder(self, order: &[usize]) -> Result<Self, OperationError> {
        let copied = reorder::copy_pages(&self, order)?;
        Ok(Self::from_document(copied))
    }

    fn set_rotation(&mut self, index: usize, degrees: i64) -> Result<(), OperationError> {
        let degrees = degrees.rem_euclid(360);
        if degrees % 90 != 0 {
            return Err(OperationError::Validation(format!(
                "rotation must be a multiple of 90, got {}",
                degrees
            )));
        }
        let page_id = self.page_id(index)?;
        self.page_dict_mut(page_id)?
            .set("Rotate", Object::Integer(degrees));
        Ok(())
    }

    fn insert_text(
        &mut self,
        index: usize,
        origin: Point,
        text: &str,
        font_size: f64,
        color: Rgb,
    ) -> Result<(), OperationError> {
        let page_id = self.page_id(index)?;
        let font = self.text_font(page_id)?;
        let (x, y) = self.page_box(page_id).to_pdf(origin);
        let operations = content::text_run(&font, text, (x, y), font_size, color);
        self.append_content(page_id, operations)
    }

    fn insert_image(
        &mut self,
        index: usize,
        rect: Rect,
        image: &[u8],
    ) -> Result<(), OperationError> {
        let page_id = self.page_id(index)?;
        let embedded = content::embed_image(&mut self.doc, image)?;
        let name = self.add_page_resource(page_id, b"XObject", "Im", embedded.id)?;
        let target = self.page_box(page_id).rect_to_pdf(&rect);
        let operations = content::image_placement(&name, embedded.width, embedded.height, &target);
        self.append_content(page_id, operations)
    }

    fn draw_line(
        &mut self,
        index: usize,
        from: Point,
        to: Point,
        color: Rgb,
        width: f64,
    ) -> Result<(), OperationError> {
        let page_id = self.page_id(index)?;
        let page_box = self.page_box(page_id);
        let operations = content::line(page_box.to_pdf(from), page_box.to_pdf(to), color, width);
        self.append_content(page_id, operations)
    }

    fn draw_rect(
        &mut self,
        index: usize,
        rect: Rect,
        color: Rgb,
        width: f64,
        fill: Option<Rgb>,
    ) -> Result<(), OperationError> {
        let page_id = self.page_id(index)?;
        let target = self.page_box(page_id).rect_to_pdf(&rect);
        let operations = content::rectangle(&target, color, width, fill);
        self.append_content(page_id, operations)
    }

    fn insert_overlay_text(
        &mut self,
        index: usize,
        overlay: &Overlay,
    ) -> Result<(), OperationError> {
        let page_id = self.page_id(index)?;
        let font = self.text_font(page_id)?;
        let center = self.page_box(page_id).center();
        let operations = content::overlay_text(&font, overlay, center);
        self.append_content(page_id, operations)
    }

    fn mark_redaction(
        &mut self,
        index: usize,
        rect: Rect,
        fill: Rgb,
    ) -> Result<(), OperationError> {
        let page_id = self.page_id(index)?;
        let area = self.page_box(page_id).rect_to_pdf(&rect);
        self.add_annotation(page_id, redact::annotation(page_id, &area, fill))?;
        Ok(())
    }

    fn commit_redactions(&mut self) -> Result<(), OperationError> {
        let pages: Vec<ObjectId> = self.doc.get_pages().into_values().collect();
        for page_id in pages {
            redact::commit_page(self, page_id)?;
        }
        Ok(())
    }

    fn serialize(mut self, options: SaveOptions) -> Result<Vec<u8>, OperationError> {
        if options.compact {
            self.doc.prune_objects();
            self.doc.delete_zero_length_streams();
            self.doc.compress();
        }

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| OperationError::Codec(format!("Save failed: {}", e)))?;
        Ok(buffer)
    }
}

/// Normalize serialized PDF bytes into their delivery form.
///
/// The document is re-parsed (which proves the output is readable), objects
/// are renumbered densely in page order, and the file is rewritten with a
/// fresh cross-reference table.
pub fn finalize(bytes: &[u8]) -> Result<Vec<u8>, OperationError> {
    let mut doc = Document::load_mem(bytes)
        .map_err(|e| OperationError::Codec(format!("Serialized PDF is unreadable: {}", e)))?;

    if doc.get_pages().is_empty() {
        return Err(OperationError::Codec("Serialized PDF has no pages".into()));
    }

    doc.trailer.remove(b"Prev");
    doc.renumber_objects();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| OperationError::Codec(format!("Save failed: {}", e)))?;
    Ok(buffer)
}

/// Decode the operations of a content stream such as a Form XObject
pub(crate) fn stream_operations(stream: &Stream) -> Result<Vec<Operation>, OperationError> {
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    Content::decode(&data)
        .map(|content| content.operations)
        .map_err(|e| OperationError::Codec(format!("Failed to parse form content: {}", e)))
}

/// Numeric value of an Integer or Real object
pub(crate) fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(v) => Some(*v as f64),
        Object::Real(v) => Some(*v as f64),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing;

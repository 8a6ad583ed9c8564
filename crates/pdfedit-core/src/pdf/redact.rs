//! Redaction: mark regions with `/Redact` annotations, then apply them
//!
//! Applying a page's marks rewrites its content stream. Glyphs whose boxes
//! intersect a marked region are cut out of their text-showing operators and
//! replaced by positioning adjustments, so surrounding text does not move.
//! Image XObjects and painted paths touching a region are dropped.
//!
//! Form XObjects are filtered the same way with their own resources and
//! matrix. A form that loses content is written out as a new XObject under a
//! new name, so other pages drawing the original are unaffected. Forms nested
//! deeper than [`MAX_FORM_DEPTH`] are dropped whole when their bounding box
//! reaches a region.

use std::collections::{BTreeMap, HashSet};

use lopdf::content::Operation;
use lopdf::content::Content;
use lopdf::{dictionary, Dictionary, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

use super::content::filled_area;
use super::fonts::{resource_fonts, FontMetrics};
use super::{number, stream_operations, PdfDocument, MAX_FORM_DEPTH};
use crate::color::Rgb;
use crate::error::OperationError;
use crate::geometry::{BBox, Matrix};

/// Glyph box in text space, relative to the font size: descender to ascender
const GLYPH_BOTTOM: f64 = -0.2;
const GLYPH_TOP: f64 = 0.8;

pub(crate) fn annotation(page_id: ObjectId, area: &BBox, fill: Rgb) -> Dictionary {
    let real = |v: f64| Object::Real(v as f32);
    dictionary! {
        "Type" => "Annot",
        "Subtype" => "Redact",
        "Rect" => vec![real(area.x0), real(area.y0), real(area.x1), real(area.y1)],
        "IC" => vec![real(fill.r), real(fill.g), real(fill.b)],
        "P" => page_id,
    }
}

struct Mark {
    area: BBox,
    fill: Rgb,
}

fn read_mark(doc: &PdfDocument, annot: &Dictionary) -> Option<Mark> {
    let subtype = annot.get(b"Subtype").and_then(Object::as_name).ok()?;
    if subtype != b"Redact" {
        return None;
    }

    let rect = numbers(doc, annot, b"Rect").filter(|r| r.len() == 4)?;
    let fill = match numbers(doc, annot, b"IC").as_deref() {
        Some([r, g, b]) => Rgb::new(*r, *g, *b),
        _ => Rgb::BLACK,
    };
    Some(Mark {
        area: BBox::from_corners((rect[0], rect[1]), (rect[2], rect[3])),
        fill,
    })
}

/// Apply every `/Redact` mark of a page and drop the marks
pub(crate) fn commit_page(doc: &mut PdfDocument, page_id: ObjectId) -> Result<(), OperationError> {
    let mut marks = Vec::new();
    let mut remaining = Vec::new();
    for annot in doc.page_annotations(page_id) {
        match doc.resolve_dict(&annot).and_then(|dict| read_mark(doc, dict)) {
            Some(mark) => marks.push(mark),
            None => remaining.push(annot),
        }
    }
    if marks.is_empty() {
        return Ok(());
    }

    let content = doc.decoded_content(page_id)?;
    let areas: Vec<BBox> = marks.iter().map(|mark| mark.area).collect();
    let mut rewrites = Rewrites::new(doc);

    let mut filter = ContentFilter::new(doc, &areas, doc.page_resources(page_id), 0);
    let filtered = filter.run(content.operations, &mut rewrites)?;
    debug!(
        "Redacted {} glyphs, {} images, {} paths, {} forms in {} regions of page {:?}",
        filter.removed_glyphs,
        filter.removed_images,
        filter.removed_paths,
        filter.removed_forms,
        marks.len(),
        page_id
    );
    let resources =
        (!filter.replaced_forms.is_empty()).then(|| filter.resources_with_forms());

    let mut operations = Vec::with_capacity(filtered.len() + 2 + marks.len() * 5);
    operations.push(Operation::new("q", vec![]));
    operations.extend(filtered);
    operations.push(Operation::new("Q", vec![]));
    for mark in &marks {
        operations.extend(filled_area(&mark.area, mark.fill));
    }

    rewrites.insert_into(doc);
    doc.replace_content(page_id, operations)?;

    let page = doc.page_dict_mut(page_id)?;
    if let Some(resources) = resources {
        page.set("Resources", Object::Dictionary(resources));
    }
    if remaining.is_empty() {
        page.remove(b"Annots");
    } else {
        page.set("Annots", Object::Array(remaining));
    }
    Ok(())
}

/// Objects created while filtering, added to the document once filtering ends
struct Rewrites {
    next_id: u32,
    objects: Vec<(ObjectId, Object)>,
}

impl Rewrites {
    fn new(doc: &PdfDocument) -> Self {
        Self {
            next_id: doc.doc.max_id + 1,
            objects: Vec::new(),
        }
    }

    fn add(&mut self, object: Object) -> ObjectId {
        let id = (self.next_id, 0);
        self.next_id += 1;
        self.objects.push((id, object));
        id
    }

    fn insert_into(self, doc: &mut PdfDocument) {
        for (id, object) in self.objects {
            doc.doc.max_id = doc.doc.max_id.max(id.0);
            doc.doc.objects.insert(id, object);
        }
    }
}

fn numbers(doc: &PdfDocument, dict: &Dictionary, key: &[u8]) -> Option<Vec<f64>> {
    doc.resolve(dict.get(key).ok()?)?
        .as_array()
        .ok()?
        .iter()
        .map(|v| doc.resolve(v).and_then(number))
        .collect()
}

/// The form's /Matrix, identity when absent
fn form_matrix(doc: &PdfDocument, form: &Stream) -> Matrix {
    match numbers(doc, &form.dict, b"Matrix").as_deref() {
        Some(&[a, b, c, d, e, f]) => Matrix::new(a, b, c, d, e, f),
        _ => Matrix::IDENTITY,
    }
}

fn form_bbox(doc: &PdfDocument, form: &Stream) -> Option<(f64, f64, f64, f64)> {
    match numbers(doc, &form.dict, b"BBox").as_deref() {
        Some(&[x0, y0, x1, y1]) => Some((x0, y0, x1, y1)),
        _ => None,
    }
}

/// Resource names of the image XObjects in a resource dictionary
fn image_names(doc: &PdfDocument, resources: &Dictionary) -> HashSet<Vec<u8>> {
    let Some(xobjects) = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| doc.resolve_dict(o))
    else {
        return HashSet::new();
    };

    xobjects
        .iter()
        .filter(|(_, xobject)| {
            let dict = match doc.resolve(xobject) {
                Some(Object::Stream(stream)) => &stream.dict,
                Some(Object::Dictionary(dict)) => dict,
                _ => return false,
            };
            matches!(dict.get(b"Subtype").and_then(Object::as_name), Ok(b"Image"))
        })
        .map(|(name, _)| name.clone())
        .collect()
}

#[derive(Debug, Clone)]
struct TextState {
    font: FontMetrics,
    size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scale: f64,
    leading: f64,
    rise: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: FontMetrics::helvetica(),
            size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    text: TextState,
}

/// One element of a rewritten `TJ` array
enum Piece {
    Glyphs(Vec<u8>),
    Shift(f64),
}

struct ContentFilter<'a> {
    doc: &'a PdfDocument,
    areas: &'a [BBox],
    /// Resources the filtered content is drawn with
    resources: Dictionary,
    fonts: BTreeMap<Vec<u8>, FontMetrics>,
    images: HashSet<Vec<u8>>,
    /// Form nesting level, 0 for page content
    depth: usize,
    state: GraphicsState,
    saved: Vec<GraphicsState>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    /// Path construction operators waiting for their painting operator
    path: Vec<Operation>,
    path_points: Vec<(f64, f64)>,
    clip_pending: bool,
    /// Filtered copies of forms, drawn under these new resource names
    renamed_forms: Vec<(Vec<u8>, ObjectId)>,
    /// Names of forms replaced by a filtered copy at least once
    replaced_forms: HashSet<Vec<u8>>,
    /// Names of forms still drawn as they are
    kept_forms: HashSet<Vec<u8>>,
    removed_glyphs: usize,
    removed_images: usize,
    removed_paths: usize,
    removed_forms: usize,
}

impl<'a> ContentFilter<'a> {
    fn new(doc: &'a PdfDocument, areas: &'a [BBox], resources: Dictionary, depth: usize) -> Self {
        Self {
            doc,
            areas,
            fonts: resource_fonts(doc, &resources),
            images: image_names(doc, &resources),
            resources,
            depth,
            state: GraphicsState {
                ctm: Matrix::IDENTITY,
                text: TextState::default(),
            },
            saved: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            path: Vec::new(),
            path_points: Vec::new(),
            clip_pending: false,
            renamed_forms: Vec::new(),
            replaced_forms: HashSet::new(),
            kept_forms: HashSet::new(),
            removed_glyphs: 0,
            removed_images: 0,
            removed_paths: 0,
            removed_forms: 0,
        }
    }

    fn hits(&self, bbox: &BBox) -> bool {
        self.areas.iter().any(|area| area.intersects(bbox))
    }

    fn changed(&self) -> bool {
        self.removed_glyphs + self.removed_images + self.removed_paths + self.removed_forms > 0
    }

    fn run(
        &mut self,
        operations: Vec<Operation>,
        rewrites: &mut Rewrites,
    ) -> Result<Vec<Operation>, OperationError> {
        let mut out = Vec::with_capacity(operations.len());
        for op in operations {
            self.step(op, rewrites, &mut out)?;
        }
        out.append(&mut self.path);
        Ok(out)
    }

    fn step(
        &mut self,
        op: Operation,
        rewrites: &mut Rewrites,
        out: &mut Vec<Operation>,
    ) -> Result<(), OperationError> {
        let nums: Vec<f64> = op.operands.iter().filter_map(number).collect();

        match op.operator.as_str() {
            "q" => self.saved.push(self.state.clone()),
            "Q" => {
                if let Some(state) = self.saved.pop() {
                    self.state = state;
                }
            }
            "cm" => {
                if let [a, b, c, d, e, f] = nums[..] {
                    self.state.ctm = Matrix::new(a, b, c, d, e, f).then(&self.state.ctm);
                }
            }

            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                self.state.text.font = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| self.fonts.get(name))
                    .cloned()
                    .unwrap_or_else(FontMetrics::helvetica);
                self.state.text.size = nums.last().copied().unwrap_or(0.0);
            }
            "Tc" => self.state.text.char_spacing = nums.first().copied().unwrap_or(0.0),
            "Tw" => self.state.text.word_spacing = nums.first().copied().unwrap_or(0.0),
            "Tz" => {
                self.state.text.horizontal_scale = nums.first().copied().unwrap_or(100.0) / 100.0
            }
            "TL" => self.state.text.leading = nums.first().copied().unwrap_or(0.0),
            "Ts" => self.state.text.rise = nums.first().copied().unwrap_or(0.0),
            "Td" | "TD" => {
                if let [tx, ty] = nums[..] {
                    if op.operator == "TD" {
                        self.state.text.leading = -ty;
                    }
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let [a, b, c, d, e, f] = nums[..] {
                    self.line_matrix = Matrix::new(a, b, c, d, e, f);
                    self.text_matrix = self.line_matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" | "TJ" | "'" | "\"" => {
                self.show_text(op, out);
                return Ok(());
            }

            "Do" => return self.draw_xobject(op, rewrites, out),
            "BI" => {
                if self.hits(&self.state.ctm.transform_bbox(0.0, 0.0, 1.0, 1.0)) {
                    self.removed_images += 1;
                    return Ok(());
                }
            }

            "m" | "l" => {
                if let [x, y] = nums[..] {
                    self.path_points.push(self.state.ctm.apply(x, y));
                }
                self.path.push(op);
                return Ok(());
            }
            "c" | "v" | "y" => {
                for pair in nums.chunks_exact(2) {
                    self.path_points.push(self.state.ctm.apply(pair[0], pair[1]));
                }
                self.path.push(op);
                return Ok(());
            }
            "re" => {
                if let [x, y, w, h] = nums[..] {
                    let corners = [(x, y), (x + w, y), (x, y + h), (x + w, y + h)];
                    for (cx, cy) in corners {
                        self.path_points.push(self.state.ctm.apply(cx, cy));
                    }
                }
                self.path.push(op);
                return Ok(());
            }
            "h" => {
                self.path.push(op);
                return Ok(());
            }
            "W" | "W*" => {
                self.clip_pending = true;
                self.path.push(op);
                return Ok(());
            }
            "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" | "n" => {
                self.paint_path(op, out);
                return Ok(());
            }
            _ => {}
        }

        out.push(op);
        Ok(())
    }

    fn draw_xobject(
        &mut self,
        op: Operation,
        rewrites: &mut Rewrites,
        out: &mut Vec<Operation>,
    ) -> Result<(), OperationError> {
        let Some(name) = op.operands.first().and_then(|name| name.as_name().ok()) else {
            out.push(op);
            return Ok(());
        };
        let name = name.to_vec();

        if self.images.contains(&name) {
            if self.hits(&self.state.ctm.transform_bbox(0.0, 0.0, 1.0, 1.0)) {
                self.removed_images += 1;
            } else {
                out.push(op);
            }
            return Ok(());
        }

        let doc = self.doc;
        let Some(form) = doc.form_xobject(&self.resources, &name) else {
            out.push(op);
            return Ok(());
        };
        let ctm = form_matrix(doc, form).then(&self.state.ctm);

        let operations = if self.depth < MAX_FORM_DEPTH {
            stream_operations(form).ok()
        } else {
            None
        };
        let Some(operations) = operations else {
            // contents cannot be inspected: keep the form only when it is clear of every mark
            let reaches = form_bbox(doc, form)
                .map(|(x0, y0, x1, y1)| self.hits(&ctm.transform_bbox(x0, y0, x1, y1)))
                .unwrap_or(true);
            if reaches {
                self.removed_forms += 1;
                self.replaced_forms.insert(name);
            } else {
                self.kept_forms.insert(name);
                out.push(op);
            }
            return Ok(());
        };

        let resources = doc
            .form_resources(form)
            .unwrap_or_else(|| self.resources.clone());
        let mut inner = ContentFilter::new(doc, self.areas, resources, self.depth + 1);
        inner.state = GraphicsState {
            ctm,
            text: self.state.text.clone(),
        };
        let filtered = inner.run(operations, rewrites)?;

        self.removed_glyphs += inner.removed_glyphs;
        self.removed_images += inner.removed_images;
        self.removed_paths += inner.removed_paths;
        self.removed_forms += inner.removed_forms;
        if !inner.changed() {
            self.kept_forms.insert(name);
            out.push(op);
            return Ok(());
        }

        let mut dict = form.dict.clone();
        dict.remove(b"Filter");
        dict.remove(b"DecodeParms");
        dict.set("Resources", Object::Dictionary(inner.resources_with_forms()));
        let data = Content {
            operations: filtered,
        }
        .encode()
        .map_err(|e| OperationError::Codec(format!("Failed to encode form content: {}", e)))?;

        let id = rewrites.add(Object::Stream(Stream::new(dict, data)));
        let renamed = self.fresh_name(&name);
        debug!(
            "Form {} rewritten as {}",
            String::from_utf8_lossy(&name),
            String::from_utf8_lossy(&renamed)
        );
        self.renamed_forms.push((renamed.clone(), id));
        self.replaced_forms.insert(name);
        out.push(Operation::new("Do", vec![Object::Name(renamed)]));
        Ok(())
    }

    /// An XObject name not yet used by these resources
    fn fresh_name(&self, base: &[u8]) -> Vec<u8> {
        let existing = self
            .resources
            .get(b"XObject")
            .ok()
            .and_then(|o| self.doc.resolve_dict(o));
        (0..)
            .map(|n| [base, format!("R{}", n).as_bytes()].concat())
            .find(|candidate| {
                !existing.map(|dict| dict.has(candidate)).unwrap_or(false)
                    && !self.renamed_forms.iter().any(|(name, _)| name == candidate)
            })
            .unwrap_or_else(|| base.to_vec())
    }

    /// The filtered content's resources, with the rewritten forms registered
    /// and forms that are no longer drawn unlisted
    fn resources_with_forms(&self) -> Dictionary {
        let mut resources = self.resources.clone();
        let mut xobjects = resources
            .get(b"XObject")
            .ok()
            .and_then(|o| self.doc.resolve_dict(o))
            .cloned()
            .unwrap_or_default();
        for name in self.replaced_forms.difference(&self.kept_forms) {
            xobjects.remove(name);
        }
        for (name, id) in &self.renamed_forms {
            xobjects.set(name.clone(), Object::Reference(*id));
        }
        resources.set("XObject", Object::Dictionary(xobjects));
        resources
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.state.text.leading;
        self.move_line(0.0, -leading);
    }

    fn paint_path(&mut self, op: Operation, out: &mut Vec<Operation>) {
        let path = std::mem::take(&mut self.path);
        let bbox = BBox::enclosing(self.path_points.drain(..));
        let clip = std::mem::replace(&mut self.clip_pending, false);
        let touched = op.operator != "n" && bbox.map(|b| self.hits(&b)).unwrap_or(false);

        if !touched {
            out.extend(path);
            out.push(op);
            return;
        }

        self.removed_paths += 1;
        if clip {
            // keep the clipping effect, skip the paint
            out.extend(path);
            out.push(Operation::new("n", vec![]));
        }
    }

    fn show_text(&mut self, op: Operation, out: &mut Vec<Operation>) {
        let mut prefix = Vec::new();
        let items: Vec<Object> = match op.operator.as_str() {
            "Tj" => op.operands.first().cloned().into_iter().collect(),
            "TJ" => match op.operands.first() {
                Some(Object::Array(items)) => items.clone(),
                _ => Vec::new(),
            },
            "'" => {
                self.next_line();
                prefix.push(Operation::new("T*", vec![]));
                op.operands.last().cloned().into_iter().collect()
            }
            _ => {
                // `aw ac string "`
                if let [aw, ac, ..] = op.operands.as_slice() {
                    self.state.text.word_spacing = number(aw).unwrap_or(0.0);
                    self.state.text.char_spacing = number(ac).unwrap_or(0.0);
                    prefix.push(Operation::new("Tw", vec![aw.clone()]));
                    prefix.push(Operation::new("Tc", vec![ac.clone()]));
                }
                self.next_line();
                prefix.push(Operation::new("T*", vec![]));
                op.operands.last().cloned().into_iter().collect()
            }
        };

        let mut pieces = Vec::new();
        let mut removed = 0;
        for item in &items {
            match item {
                Object::String(bytes, _) => removed += self.filter_glyphs(bytes, &mut pieces),
                other => {
                    if let Some(n) = number(other) {
                        self.advance(-n / 1000.0 * self.state.text.size);
                        push_shift(&mut pieces, n);
                    }
                }
            }
        }

        if removed == 0 {
            out.push(op);
            return;
        }

        self.removed_glyphs += removed;
        let array = pieces
            .into_iter()
            .map(|piece| match piece {
                Piece::Glyphs(bytes) => Object::String(bytes, StringFormat::Literal),
                Piece::Shift(n) => Object::Real(n as f32),
            })
            .collect();
        out.extend(prefix);
        out.push(Operation::new("TJ", vec![Object::Array(array)]));
    }

    /// Move the text matrix right by `tx` unscaled text space units
    fn advance(&mut self, tx: f64) {
        let scaled = tx * self.state.text.horizontal_scale;
        self.text_matrix = Matrix::translate(scaled, 0.0).then(&self.text_matrix);
    }

    /// Walk the glyphs of one string, returning how many were cut
    fn filter_glyphs(&mut self, bytes: &[u8], pieces: &mut Vec<Piece>) -> usize {
        let text = self.state.text.clone();
        let scale = text.size * text.horizontal_scale;
        let glyph_space = Matrix::new(scale, 0.0, 0.0, text.size, 0.0, text.rise);
        let mut removed = 0;

        for code in text.font.codes(bytes) {
            let w0 = text.font.width(code) / 1000.0;
            let render = glyph_space.then(&self.text_matrix).then(&self.state.ctm);
            let bbox = render.transform_bbox(0.0, GLYPH_BOTTOM, w0, GLYPH_TOP);

            let mut tx = w0 * text.size + text.char_spacing;
            if !text.font.two_byte && code == 32 {
                tx += text.word_spacing;
            }

            if self.hits(&bbox) {
                removed += 1;
                if scale != 0.0 {
                    push_shift(pieces, -tx * text.horizontal_scale * 1000.0 / scale);
                }
            } else {
                let glyph = text.font.code_bytes(code);
                match pieces.last_mut() {
                    Some(Piece::Glyphs(run)) => run.extend(glyph),
                    _ => pieces.push(Piece::Glyphs(glyph)),
                }
            }
            self.advance(tx);
        }
        removed
    }
}

fn push_shift(pieces: &mut Vec<Piece>, n: f64) {
    match pieces.last_mut() {
        Some(Piece::Shift(total)) => *total += n,
        _ => pieces.push(Piece::Shift(n)),
    }
}

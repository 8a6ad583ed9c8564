//! Content stream builders for inserted text, images and drawings

use std::collections::BTreeMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::Operation;
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};

use super::fonts::{decode_win_ansi, encode_win_ansi, helvetica_text_width, FontMetrics};
use crate::color::Rgb;
use crate::document::Overlay;
use crate::error::OperationError;
use crate::geometry::{BBox, Matrix};

/// Distance between baselines, as a multiple of the font size
const LINE_HEIGHT: f64 = 1.2;

/// Cap height of Helvetica relative to the font size, used for vertical centering
const CAP_HEIGHT: f64 = 0.7;

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn fill_color(color: Rgb) -> Operation {
    Operation::new("rg", vec![real(color.r), real(color.g), real(color.b)])
}

fn stroke_color(color: Rgb) -> Operation {
    Operation::new("RG", vec![real(color.r), real(color.g), real(color.b)])
}

fn matrix_operands(m: &Matrix) -> Vec<Object> {
    vec![real(m.a), real(m.b), real(m.c), real(m.d), real(m.e), real(m.f)]
}

fn text_string(encoded: Vec<u8>) -> Object {
    Object::String(encoded, StringFormat::Literal)
}

/// Left-aligned text; `origin` is the first baseline in PDF user space
pub(crate) fn text_run(
    font: &[u8],
    text: &str,
    origin: (f64, f64),
    font_size: f64,
    color: Rgb,
) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("q", vec![]),
        fill_color(color),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font.to_vec()), real(font_size)]),
        Operation::new("Tm", matrix_operands(&Matrix::translate(origin.0, origin.1))),
    ];

    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            ops.push(Operation::new(
                "Td",
                vec![real(0.0), real(-font_size * LINE_HEIGHT)],
            ));
        }
        ops.push(Operation::new("Tj", vec![text_string(encode_win_ansi(line))]));
    }

    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Centered, rotated, fill-only text around `center`
pub(crate) fn overlay_text(font: &[u8], overlay: &Overlay, center: (f64, f64)) -> Vec<Operation> {
    let size = overlay.font_size;
    let leading = size * LINE_HEIGHT;
    let lines: Vec<Vec<u8>> = overlay.text.split('\n').map(encode_win_ansi).collect();
    let placement = Matrix::rotate(overlay.rotation).then(&Matrix::translate(center.0, center.1));

    let mut ops = vec![
        Operation::new("q", vec![]),
        fill_color(overlay.color),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font.to_vec()), real(size)]),
        // fill only, no stroke
        Operation::new("Tr", vec![Object::Integer(0)]),
    ];

    let block_offset = (lines.len() as f64 - 1.0) * leading / 2.0;
    for (i, line) in lines.into_iter().enumerate() {
        let width = helvetica_text_width(&line, size);
        let baseline = block_offset - i as f64 * leading - size * CAP_HEIGHT / 2.0;
        let tm = Matrix::translate(-width / 2.0, baseline).then(&placement);
        ops.push(Operation::new("Tm", matrix_operands(&tm)));
        ops.push(Operation::new("Tj", vec![text_string(line)]));
    }

    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
    ops
}

pub(crate) fn line(
    from: (f64, f64),
    to: (f64, f64),
    color: Rgb,
    width: f64,
) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        stroke_color(color),
        Operation::new("w", vec![real(width)]),
        Operation::new("m", vec![real(from.0), real(from.1)]),
        Operation::new("l", vec![real(to.0), real(to.1)]),
        Operation::new("S", vec![]),
        Operation::new("Q", vec![]),
    ]
}

pub(crate) fn rectangle(
    area: &BBox,
    color: Rgb,
    width: f64,
    fill: Option<Rgb>,
) -> Vec<Operation> {
    let mut ops = vec![
        Operation::new("q", vec![]),
        stroke_color(color),
        Operation::new("w", vec![real(width)]),
    ];
    if let Some(fill) = fill {
        ops.push(fill_color(fill));
    }
    ops.push(rect_path(area));
    ops.push(Operation::new(if fill.is_some() { "B" } else { "S" }, vec![]));
    ops.push(Operation::new("Q", vec![]));
    ops
}

/// Solid fill with no stroke, used to paint redacted areas
pub(crate) fn filled_area(area: &BBox, color: Rgb) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        fill_color(color),
        rect_path(area),
        Operation::new("f", vec![]),
        Operation::new("Q", vec![]),
    ]
}

fn rect_path(area: &BBox) -> Operation {
    Operation::new(
        "re",
        vec![
            real(area.x0),
            real(area.y0),
            real(area.width()),
            real(area.height()),
        ],
    )
}

pub(crate) struct EmbeddedImage {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
}

/// Decode an image file and add it to the document as an image XObject.
///
/// Pixels are stored as deflated DeviceRGB; an alpha channel becomes a soft mask.
pub(crate) fn embed_image(doc: &mut Document, bytes: &[u8]) -> Result<EmbeddedImage, OperationError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| OperationError::Content(format!("Failed to decode image: {}", e)))?;
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(OperationError::Content("Image has no pixels".into()));
    }

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };

    if decoded.color().has_alpha() {
        let alpha: Vec<u8> = decoded.to_rgba8().pixels().map(|p| p.0[3]).collect();
        let mask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        );
        let mask_id = doc.add_object(mask);
        dict.set("SMask", Object::Reference(mask_id));
    }

    let pixels = deflate(rgb.as_raw())?;
    let id = doc.add_object(Stream::new(dict, pixels));
    Ok(EmbeddedImage { id, width, height })
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, OperationError> {
    let compress_err = |e: std::io::Error| OperationError::Codec(format!("Failed to compress image: {}", e));
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(compress_err)?;
    encoder.finish().map_err(compress_err)
}

/// Draw an image XObject inside `target`, keeping its aspect ratio and centering it
pub(crate) fn image_placement(name: &[u8], width: u32, height: u32, target: &BBox) -> Vec<Operation> {
    let scale = (target.width() / width as f64).min(target.height() / height as f64);
    let (w, h) = (width as f64 * scale, height as f64 * scale);
    let x = target.x0 + (target.width() - w) / 2.0;
    let y = target.y0 + (target.height() - h) / 2.0;

    vec![
        Operation::new("q", vec![]),
        Operation::new("cm", matrix_operands(&Matrix::new(w, 0.0, 0.0, h, x, y))),
        Operation::new("Do", vec![Object::Name(name.to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

/// Text shown by a sequence of content operations.
///
/// Strings in single-byte fonts are decoded as WinAnsi; composite-font strings
/// are skipped. Large negative `TJ` adjustments become spaces. `form_text`
/// supplies the text of a Form XObject drawn with `Do`.
pub(crate) fn extract_text(
    ops: &[Operation],
    fonts: &BTreeMap<Vec<u8>, FontMetrics>,
    form_text: &mut dyn FnMut(&[u8]) -> Option<String>,
) -> String {
    fn push_string(text: &mut String, object: &Object, two_byte: bool) {
        if let Object::String(bytes, _) = object {
            if !two_byte {
                text.push_str(&decode_win_ansi(bytes));
            }
        }
    }

    let mut text = String::new();
    let mut two_byte = false;

    for op in ops {
        match op.operator.as_str() {
            "Tf" => {
                two_byte = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| fonts.get(name))
                    .map(|metrics| metrics.two_byte)
                    .unwrap_or(false);
            }
            "Tj" | "'" | "\"" => {
                if let Some(string) = op.operands.last() {
                    push_string(&mut text, string, two_byte);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    for item in items {
                        match item {
                            Object::Integer(n) if *n < -200 => text.push(' '),
                            Object::Real(n) if *n < -200.0 => text.push(' '),
                            other => push_string(&mut text, other, two_byte),
                        }
                    }
                }
            }
            "ET" if !text.is_empty() && !text.ends_with('\n') => text.push('\n'),
            "Do" => {
                let form = op
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| form_text(name));
                if let Some(form) = form {
                    text.push_str(&form);
                }
            }
            _ => {}
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_text_run_places_baseline() {
        let ops = text_run(b"Helv0", "Hi", (72.0, 770.0), 16.0, Rgb::BLACK);
        let tm = ops.iter().find(|op| op.operator == "Tm").unwrap();
        assert_eq!(tm.operands[4], Object::Real(72.0));
        assert_eq!(tm.operands[5], Object::Real(770.0));
        assert_eq!(ops.first().unwrap().operator, "q");
        assert_eq!(ops.last().unwrap().operator, "Q");
    }

    #[test]
    fn test_multiline_text_moves_down() {
        let ops = text_run(b"Helv0", "one\ntwo", (0.0, 100.0), 10.0, Rgb::BLACK);
        let shows = ops.iter().filter(|op| op.operator == "Tj").count();
        let moves: Vec<_> = ops.iter().filter(|op| op.operator == "Td").collect();
        assert_eq!(shows, 2);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].operands[1], Object::Real(-12.0));
    }

    #[test]
    fn test_overlay_is_fill_only_and_centered() {
        let overlay = Overlay {
            text: "CONFIDENTIAL".into(),
            font_size: 24.0,
            rotation: 0.0,
            color: Rgb::grey(0.85),
        };
        let ops = overlay_text(b"Helv0", &overlay, (300.0, 400.0));
        let tr = ops.iter().find(|op| op.operator == "Tr").unwrap();
        assert_eq!(tr.operands, vec![Object::Integer(0)]);

        let tm = ops.iter().find(|op| op.operator == "Tm").unwrap();
        let width = helvetica_text_width(b"CONFIDENTIAL", 24.0);
        let x = match tm.operands[4] {
            Object::Real(v) => v as f64,
            _ => panic!("expected real"),
        };
        assert!((x - (300.0 - width / 2.0)).abs() < 0.01);
    }

    #[test]
    fn test_rectangle_with_fill_uses_fill_and_stroke() {
        let area = BBox::from_corners((0.0, 0.0), (10.0, 10.0));
        let ops = rectangle(&area, Rgb::BLACK, 1.0, Some(Rgb::WHITE));
        assert!(ops.iter().any(|op| op.operator == "B"));
        let ops = rectangle(&area, Rgb::BLACK, 1.0, None);
        assert!(ops.iter().any(|op| op.operator == "S"));
        assert!(!ops.iter().any(|op| op.operator == "rg"));
    }

    #[test]
    fn test_image_placement_keeps_aspect_ratio() {
        let target = BBox::from_corners((0.0, 0.0), (100.0, 50.0));
        let ops = image_placement(b"Im0", 20, 20, &target);
        let cm = ops.iter().find(|op| op.operator == "cm").unwrap();
        // square image fits the 50pt height and is centered horizontally
        assert_eq!(cm.operands[0], Object::Real(50.0));
        assert_eq!(cm.operands[3], Object::Real(50.0));
        assert_eq!(cm.operands[4], Object::Real(25.0));
        assert_eq!(cm.operands[5], Object::Real(0.0));
    }

    #[test]
    fn test_extract_text_handles_tj_arrays() {
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::String(b"Hello".to_vec(), StringFormat::Literal),
                    Object::Integer(-300),
                    Object::String(b"World".to_vec(), StringFormat::Literal),
                ])],
            ),
            Operation::new("ET", vec![]),
        ];
        assert_eq!(
            extract_text(&ops, &BTreeMap::new(), &mut |_| None),
            "Hello World\n"
        );
    }
}

//! Fixture documents for unit tests

use std::collections::BTreeMap;
use std::io::Cursor;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// Baseline of fixture text, measured down from the top of the page
pub(crate) const TEXT_TOP: f64 = 100.0;
pub(crate) const TEXT_LEFT: f64 = 72.0;
pub(crate) const TEXT_SIZE: i64 = 12;

/// Placement of the fixture image: `(left, top, size)` in top-left coordinates
pub(crate) const IMAGE_AREA: (f64, f64, f64) = (72.0, 242.0, 100.0);

pub(crate) struct TestPage {
    text: String,
    /// Left end and top-down baseline of the text
    origin: (f64, f64),
    size: i64,
    media_box: [i64; 4],
    rotate: Option<i64>,
    image: bool,
    in_form: bool,
}

impl TestPage {
    pub fn a4(text: &str) -> Self {
        Self {
            text: text.into(),
            origin: (TEXT_LEFT, TEXT_TOP),
            size: TEXT_SIZE,
            media_box: [0, 0, 595, 842],
            rotate: None,
            image: false,
            in_form: false,
        }
    }

    pub fn letter(text: &str) -> Self {
        Self {
            media_box: [0, 0, 612, 792],
            ..Self::a4(text)
        }
    }

    pub fn rotated(mut self, degrees: i64) -> Self {
        self.rotate = Some(degrees);
        self
    }

    /// Move the text to a top-down baseline `(left, top)` at `size` points
    pub fn placed(mut self, left: f64, top: f64, size: i64) -> Self {
        self.origin = (left, top);
        self.size = size;
        self
    }

    /// Draw the text through a Form XObject `/Fx0` instead of the page content.
    /// Pages with the same text share one form.
    pub fn in_form(mut self) -> Self {
        self.in_form = true;
        self
    }

    /// Also paint a small image XObject at [`IMAGE_AREA`]
    pub fn with_image(mut self) -> Self {
        self.image = true;
        self
    }

    fn text_operations(&self) -> Vec<Operation> {
        let top = self.media_box[3] as f64;
        let (left, baseline) = self.origin;
        vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(self.size)],
            ),
            Operation::new(
                "Td",
                vec![Object::Real(left as f32), Object::Real((top - baseline) as f32)],
            ),
            Operation::new(
                "Tj",
                vec![Object::String(
                    self.text.clone().into_bytes(),
                    StringFormat::Literal,
                )],
            ),
            Operation::new("ET", vec![]),
        ]
    }

    fn operations(&self) -> Vec<Operation> {
        let top = self.media_box[3] as f64;
        let mut ops = if self.in_form {
            vec![Operation::new("Do", vec![Object::Name(b"Fx0".to_vec())])]
        } else {
            self.text_operations()
        };

        if self.image {
            let (left, image_top, size) = IMAGE_AREA;
            ops.extend([
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(size as f32),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(size as f32),
                        Object::Real(left as f32),
                        Object::Real((top - image_top - size) as f32),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Img1".to_vec())]),
                Operation::new("Q", vec![]),
            ]);
        }
        ops
    }
}

/// Build a PDF whose pages share a Helvetica `/F1` through the page tree root
pub(crate) fn sample_pdf(pages: &[TestPage]) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1,
            "Height" => 1,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![0x80],
    ));

    let mut forms: BTreeMap<String, ObjectId> = BTreeMap::new();
    let mut page_ids = Vec::new();
    for page in pages {
        let content = Content {
            operations: page.operations(),
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => page.media_box.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
            "Contents" => content_id,
        };
        if let Some(rotate) = page.rotate {
            page_dict.set("Rotate", rotate);
        }
        let mut xobjects = Dictionary::new();
        if page.image {
            xobjects.set("Img1", image_id);
        }
        if page.in_form {
            let form_id = *forms.entry(page.text.clone()).or_insert_with(|| {
                let content = Content {
                    operations: page.text_operations(),
                };
                doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Form",
                        "BBox" => page.media_box.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
                        "Resources" => dictionary! {
                            "Font" => dictionary! { "F1" => font_id },
                        },
                    },
                    content.encode().unwrap(),
                ))
            });
            xobjects.set("Fx0", form_id);
        }
        if !xobjects.is_empty() {
            page_dict.set(
                "Resources",
                dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                    "XObject" => xobjects,
                },
            );
        }
        page_ids.push(doc.add_object(page_dict));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => pages.len() as i64,
            "Kids" => page_ids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// A small RGBA PNG with a transparent column
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let pixels = image::RgbaImage::from_fn(width, height, |x, _| {
        if x == 0 {
            image::Rgba([0, 0, 0, 0])
        } else {
            image::Rgba([200, 30, 30, 255])
        }
    });
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(pixels)
        .write_to(&mut buffer, image::ImageOutputFormat::Png)
        .unwrap();
    buffer.into_inner()
}

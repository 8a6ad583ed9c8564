//! Glyph metrics and text encoding
//!
//! Only enough font knowledge to place glyphs: advance widths from the font
//! dictionary, falling back to standard-14 metrics when a font has none.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Object};

use super::{number, PdfDocument};

/// Helvetica advance widths for codes 32..=126, in 1/1000 em
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

const HELVETICA_DEFAULT_WIDTH: f64 = 556.0;
const COURIER_WIDTH: f64 = 600.0;
const CID_DEFAULT_WIDTH: f64 = 1000.0;
const MAX_CID_RANGE: u32 = 0xFFFF;

/// WinAnsiEncoding codes 0x80..=0x9F that differ from Latin-1
const WIN_ANSI_HIGH: [(u8, char); 27] = [
    (0x80, '€'),
    (0x82, '‚'),
    (0x83, 'ƒ'),
    (0x84, '„'),
    (0x85, '…'),
    (0x86, '†'),
    (0x87, '‡'),
    (0x88, 'ˆ'),
    (0x89, '‰'),
    (0x8A, 'Š'),
    (0x8B, '‹'),
    (0x8C, 'Œ'),
    (0x8E, 'Ž'),
    (0x91, '‘'),
    (0x92, '’'),
    (0x93, '“'),
    (0x94, '”'),
    (0x95, '•'),
    (0x96, '–'),
    (0x97, '—'),
    (0x98, '˜'),
    (0x99, '™'),
    (0x9A, 'š'),
    (0x9B, '›'),
    (0x9C, 'œ'),
    (0x9E, 'ž'),
    (0x9F, 'Ÿ'),
];

/// Encode text for a WinAnsiEncoding simple font; unmappable characters become `?`
pub(crate) fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => WIN_ANSI_HIGH
                .iter()
                .find(|(_, mapped)| *mapped == c)
                .map(|(code, _)| *code)
                .unwrap_or(b'?'),
        })
        .collect()
}

/// Decode a single-byte string, treating it as WinAnsiEncoding
pub(crate) fn decode_win_ansi(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => WIN_ANSI_HIGH
                .iter()
                .find(|(code, _)| *code == b)
                .map(|(_, c)| *c)
                .unwrap_or('\u{FFFD}'),
            _ => b as char,
        })
        .collect()
}

/// Helvetica width of a string at the given size, in points
pub(crate) fn helvetica_text_width(encoded: &[u8], font_size: f64) -> f64 {
    encoded
        .iter()
        .map(|&code| helvetica_width(code as u32))
        .sum::<f64>()
        * font_size
        / 1000.0
}

fn helvetica_width(code: u32) -> f64 {
    match code {
        32..=126 => HELVETICA_WIDTHS[(code - 32) as usize] as f64,
        _ => HELVETICA_DEFAULT_WIDTH,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WidthSource {
    /// Simple font with an explicit /Widths array
    Table { first_char: u32, widths: Vec<f64>, missing: f64 },
    /// Composite font: /W ranges of the descendant CIDFont
    Cid { ranges: BTreeMap<u32, f64>, default: f64 },
    Helvetica,
    Monospace,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FontMetrics {
    /// Composite (Type0) fonts use two-byte codes
    pub two_byte: bool,
    source: WidthSource,
}

impl FontMetrics {
    pub fn helvetica() -> Self {
        Self {
            two_byte: false,
            source: WidthSource::Helvetica,
        }
    }

    /// Advance width of a character code, in 1/1000 em
    pub fn width(&self, code: u32) -> f64 {
        match &self.source {
            WidthSource::Table {
                first_char,
                widths,
                missing,
            } => code
                .checked_sub(*first_char)
                .and_then(|offset| widths.get(offset as usize))
                .copied()
                .unwrap_or(*missing),
            WidthSource::Cid { ranges, default } => {
                ranges.get(&code).copied().unwrap_or(*default)
            }
            WidthSource::Helvetica => helvetica_width(code),
            WidthSource::Monospace => COURIER_WIDTH,
        }
    }

    /// Split a shown string into character codes
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        if self.two_byte {
            bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => (*hi as u32) << 8 | *lo as u32,
                    [single] => *single as u32,
                    _ => 0,
                })
                .collect()
        } else {
            bytes.iter().map(|&b| b as u32).collect()
        }
    }

    pub fn code_bytes(&self, code: u32) -> Vec<u8> {
        if self.two_byte {
            vec![(code >> 8) as u8, code as u8]
        } else {
            vec![code as u8]
        }
    }

    fn from_dict(doc: &PdfDocument, font: &Dictionary) -> Self {
        let subtype = font.get(b"Subtype").and_then(Object::as_name).unwrap_or(b"");

        if subtype == b"Type0" {
            return Self {
                two_byte: true,
                source: cid_widths(doc, font),
            };
        }

        let widths = font
            .get(b"Widths")
            .ok()
            .and_then(|o| doc.resolve(o))
            .and_then(|o| o.as_array().ok());

        if let Some(widths) = widths {
            let first_char = font
                .get(b"FirstChar")
                .ok()
                .and_then(|o| doc.resolve(o))
                .and_then(|o| o.as_i64().ok())
                .unwrap_or(0)
                .max(0) as u32;
            let missing = font
                .get(b"FontDescriptor")
                .ok()
                .and_then(|o| doc.resolve_dict(o))
                .and_then(|d| d.get(b"MissingWidth").ok())
                .and_then(number)
                .unwrap_or(0.0);
            let widths = widths
                .iter()
                .map(|w| doc.resolve(w).and_then(number).unwrap_or(missing))
                .collect();
            return Self {
                two_byte: false,
                source: WidthSource::Table {
                    first_char,
                    widths,
                    missing,
                },
            };
        }

        let base_font = font.get(b"BaseFont").and_then(Object::as_name).unwrap_or(b"");
        let source = if String::from_utf8_lossy(base_font).contains("Courier") {
            WidthSource::Monospace
        } else {
            WidthSource::Helvetica
        };
        Self {
            two_byte: false,
            source,
        }
    }
}

fn cid_widths(doc: &PdfDocument, font: &Dictionary) -> WidthSource {
    let descendant = font
        .get(b"DescendantFonts")
        .ok()
        .and_then(|o| doc.resolve(o))
        .and_then(|o| o.as_array().ok())
        .and_then(|fonts| fonts.first())
        .and_then(|o| doc.resolve_dict(o));

    let Some(descendant) = descendant else {
        return WidthSource::Cid {
            ranges: BTreeMap::new(),
            default: CID_DEFAULT_WIDTH,
        };
    };

    let default = descendant
        .get(b"DW")
        .ok()
        .and_then(number)
        .unwrap_or(CID_DEFAULT_WIDTH);

    let mut ranges = BTreeMap::new();
    let entries: Vec<&Object> = descendant
        .get(b"W")
        .ok()
        .and_then(|o| doc.resolve(o))
        .and_then(|o| o.as_array().ok())
        .map(|items| items.iter().filter_map(|item| doc.resolve(item)).collect())
        .unwrap_or_default();

    // /W is a sequence of `c [w1 w2 ...]` and `c_first c_last w` groups
    let mut i = 0;
    while i < entries.len() {
        let Some(first) = number(entries[i]).and_then(cid) else {
            break;
        };
        match entries.get(i + 1) {
            Some(Object::Array(widths)) => {
                for (offset, width) in widths.iter().enumerate() {
                    let Some(code) = u32::try_from(offset)
                        .ok()
                        .and_then(|offset| first.checked_add(offset))
                    else {
                        break;
                    };
                    if let Some(width) = doc.resolve(width).and_then(number) {
                        ranges.insert(code, width);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(width)) = (
                    number(last).and_then(cid),
                    entries.get(i + 2).and_then(|w| number(w)),
                ) else {
                    break;
                };
                let last = last.min(first.saturating_add(MAX_CID_RANGE));
                for code in first..=last {
                    ranges.insert(code, width);
                }
                i += 3;
            }
            None => break,
        }
    }

    WidthSource::Cid { ranges, default }
}

/// A character code from /W; negative, fractional or oversized values are rejected
fn cid(value: f64) -> Option<u32> {
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64)
        .then(|| value as u32)
}

/// Metrics for every font in a resource dictionary, keyed by resource name
pub(crate) fn resource_fonts(
    doc: &PdfDocument,
    resources: &Dictionary,
) -> BTreeMap<Vec<u8>, FontMetrics> {
    let Some(fonts) = resources.get(b"Font").ok().and_then(|o| doc.resolve_dict(o)) else {
        return BTreeMap::new();
    };

    fonts
        .iter()
        .filter_map(|(name, font)| {
            let font = doc.resolve_dict(font)?;
            Some((name.clone(), FontMetrics::from_dict(doc, font)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Document};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_win_ansi_round_trip_for_latin_text() {
        let encoded = encode_win_ansi("Café – “quoted”");
        assert_eq!(decode_win_ansi(&encoded), "Café – “quoted”");
    }

    #[test]
    fn test_unmappable_characters_become_question_marks() {
        assert_eq!(encode_win_ansi("a✓b"), b"a?b".to_vec());
    }

    #[test]
    fn test_helvetica_width_of_hello_world() {
        let width = helvetica_text_width(b"Hello World", 1000.0);
        assert_eq!(width, 5167.0);
    }

    #[test]
    fn test_two_byte_codes() {
        let metrics = FontMetrics {
            two_byte: true,
            source: WidthSource::Cid {
                ranges: BTreeMap::from([(0x0102, 500.0)]),
                default: 1000.0,
            },
        };
        assert_eq!(metrics.codes(&[0x01, 0x02, 0x00, 0x41]), vec![0x0102, 0x0041]);
        assert_eq!(metrics.width(0x0102), 500.0);
        assert_eq!(metrics.width(0x0041), 1000.0);
        assert_eq!(metrics.code_bytes(0x0102), vec![0x01, 0x02]);
    }

    #[test]
    fn test_width_table_lookup() {
        let metrics = FontMetrics {
            two_byte: false,
            source: WidthSource::Table {
                first_char: 65,
                widths: vec![600.0, 700.0],
                missing: 250.0,
            },
        };
        assert_eq!(metrics.width(65), 600.0);
        assert_eq!(metrics.width(66), 700.0);
        assert_eq!(metrics.width(67), 250.0);
        assert_eq!(metrics.width(10), 250.0);
    }

    fn type0_with_widths(w: Vec<Object>) -> Dictionary {
        dictionary! {
            "Subtype" => "Type0",
            "DescendantFonts" => vec![Object::Dictionary(dictionary! {
                "Subtype" => "CIDFontType2",
                "W" => w,
            })],
        }
    }

    fn cid_ranges(w: Vec<Object>) -> BTreeMap<u32, f64> {
        let doc = PdfDocument::from_document(Document::with_version("1.7"));
        match cid_widths(&doc, &type0_with_widths(w)) {
            WidthSource::Cid { ranges, .. } => ranges,
            _ => panic!("expected CID widths"),
        }
    }

    #[test]
    fn test_cid_widths_from_both_group_forms() {
        let ranges = cid_ranges(vec![
            Object::Integer(10),
            Object::Array(vec![Object::Integer(500), Object::Integer(600)]),
            Object::Integer(20),
            Object::Integer(22),
            Object::Integer(250),
        ]);
        assert_eq!(
            ranges,
            BTreeMap::from([(10, 500.0), (11, 600.0), (20, 250.0), (21, 250.0), (22, 250.0)])
        );
    }

    #[test]
    fn test_cid_widths_stop_at_the_largest_code() {
        let ranges = cid_ranges(vec![
            Object::Integer(i64::from(u32::MAX)),
            Object::Array(vec![Object::Integer(500), Object::Integer(600)]),
        ]);
        assert_eq!(ranges, BTreeMap::from([(u32::MAX, 500.0)]));
    }

    #[test]
    fn test_cid_widths_reject_negative_first_code() {
        let ranges = cid_ranges(vec![
            Object::Integer(-5),
            Object::Array(vec![Object::Integer(500)]),
        ]);
        assert!(ranges.is_empty());
    }
}

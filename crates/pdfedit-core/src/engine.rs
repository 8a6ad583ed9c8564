//! Manifest application
//!
//! Runs the phases of a manifest against one document, in a fixed order:
//!
//! 1. delete pages
//! 2. reorder
//! 3. rotate
//! 4. add text
//! 5. add images
//! 6. drawings
//! 7. watermark
//! 8. redactions
//!
//! Each phase indexes pages as they stand when the phase starts, so every
//! index after the reorder refers to the reordered document. The first error
//! aborts the whole application.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info};

use crate::color::{resolve_color, Rgb};
use crate::document::{Overlay, PageDocument, SaveOptions};
use crate::error::OperationError;
use crate::geometry::{Point, Rect};
use crate::manifest::{non_empty, AddImageOp, Drawing, Manifest};
use crate::pdf::finalize;

/// Apply a manifest and return the finalized PDF bytes
pub fn apply<D: PageDocument>(mut doc: D, manifest: &Manifest) -> Result<Vec<u8>, OperationError> {
    manifest.validate()?;
    info!(
        "Applying manifest to {} page document: {:?}",
        doc.page_count(),
        phase_names(manifest)
    );
    if manifest.is_empty() {
        debug!("Manifest is empty; output is only normalized");
    }

    if let Some(pages) = non_empty(&manifest.delete_pages) {
        delete_pages(&mut doc, pages)?;
    }

    if let Some(order) = non_empty(&manifest.reorder) {
        for (i, &page) in order.iter().enumerate() {
            check_page(&doc, format!("reorder[{}]", i), page)?;
        }
        doc = doc.reorder(order)?;
        debug!("Reordered into {} pages", doc.page_count());
    }

    for (i, op) in manifest.rotate.iter().flatten().enumerate() {
        check_page(&doc, format!("rotate[{}].page", i), op.page)?;
        doc.set_rotation(op.page, op.normalized_degrees())?;
    }

    for (i, op) in manifest.add_text.iter().flatten().enumerate() {
        check_page(&doc, format!("add_text[{}].page", i), op.page)?;
        doc.insert_text(
            op.page,
            op.origin(),
            &op.text,
            op.font_size,
            resolve_color(&op.color),
        )?;
    }

    for (i, op) in manifest.images.iter().flatten().enumerate() {
        check_page(&doc, format!("images[{}].page", i), op.page)?;
        let bytes = decode_image_data(i, op)?;
        doc.insert_image(op.page, op.rect(), &bytes)?;
    }

    for (i, drawing) in manifest.drawings.iter().flatten().enumerate() {
        check_page(&doc, format!("drawings[{}].page", i), drawing.page())?;
        draw(&mut doc, drawing)?;
    }

    if let Some(watermark) = &manifest.watermark {
        let overlay = Overlay {
            text: watermark.text.clone(),
            font_size: watermark.size,
            rotation: watermark.rotation,
            color: Rgb::grey(watermark.grey_level()),
        };
        for index in 0..doc.page_count() {
            doc.insert_overlay_text(index, &overlay)?;
        }
    }

    if let Some(redactions) = non_empty(&manifest.redactions) {
        for (i, op) in redactions.iter().enumerate() {
            check_page(&doc, format!("redactions[{}].page", i), op.page)?;
            doc.mark_redaction(op.page, op.rect(), resolve_color(&op.fill))?;
        }
        doc.commit_redactions()?;
        debug!("Committed {} redactions", redactions.len());
    }

    let page_count = doc.page_count();
    let serialized = doc.serialize(SaveOptions { compact: true })?;
    let output = finalize(&serialized)?;
    info!("Produced {} bytes across {} pages", output.len(), page_count);
    Ok(output)
}

fn delete_pages<D: PageDocument>(doc: &mut D, pages: &[usize]) -> Result<(), OperationError> {
    for (i, &page) in pages.iter().enumerate() {
        check_page(doc, format!("delete_pages[{}]", i), page)?;
    }

    let unique: BTreeSet<usize> = pages.iter().copied().collect();
    if unique.len() >= doc.page_count() {
        return Err(OperationError::Validation(
            "delete_pages would remove every page".into(),
        ));
    }

    // highest first so the remaining indices stay valid
    for &page in unique.iter().rev() {
        doc.delete_page(page)?;
    }
    debug!("Deleted {} pages, {} remain", unique.len(), doc.page_count());
    Ok(())
}

fn check_page<D: PageDocument>(doc: &D, field: String, page: usize) -> Result<(), OperationError> {
    let page_count = doc.page_count();
    if page < page_count {
        Ok(())
    } else {
        Err(OperationError::PageOutOfRange {
            field,
            page,
            page_count,
        })
    }
}

fn decode_image_data(index: usize, op: &AddImageOp) -> Result<Vec<u8>, OperationError> {
    let payload = op.image_data.trim();
    // tolerate data URLs as produced by browsers
    let payload = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    STANDARD.decode(payload).map_err(|e| {
        OperationError::Content(format!("images[{}].image_data is not valid base64: {}", index, e))
    })
}

fn draw<D: PageDocument>(doc: &mut D, drawing: &Drawing) -> Result<(), OperationError> {
    match drawing {
        Drawing::Line {
            page,
            x1,
            y1,
            x2,
            y2,
            width,
            color,
        } => doc.draw_line(
            *page,
            Point::new(*x1, *y1),
            Point::new(*x2, *y2),
            resolve_color(color),
            *width,
        ),
        Drawing::Rectangle {
            page,
            x,
            y,
            width,
            height,
            border_width,
            color,
            fill_color,
        } => doc.draw_rect(
            *page,
            Rect::new(*x, *y, *width, *height),
            resolve_color(color),
            *border_width,
            fill_color.as_deref().map(resolve_color),
        ),
    }
}

fn phase_names(manifest: &Manifest) -> Vec<&'static str> {
    let mut names = Vec::new();
    if non_empty(&manifest.delete_pages).is_some() {
        names.push("delete_pages");
    }
    if non_empty(&manifest.reorder).is_some() {
        names.push("reorder");
    }
    if non_empty(&manifest.rotate).is_some() {
        names.push("rotate");
    }
    if non_empty(&manifest.add_text).is_some() {
        names.push("add_text");
    }
    if non_empty(&manifest.images).is_some() {
        names.push("images");
    }
    if non_empty(&manifest.drawings).is_some() {
        names.push("drawings");
    }
    if manifest.watermark.is_some() {
        names.push("watermark");
    }
    if non_empty(&manifest.redactions).is_some() {
        names.push("redactions");
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AddTextOp, RedactionOp, RotateOp, WatermarkOp};
    use crate::pdf::testing::{png_bytes, sample_pdf, TestPage};
    use crate::pdf::PdfDocument;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn pages(count: usize) -> Vec<TestPage> {
        (0..count)
            .map(|i| TestPage::a4(&format!("Page {}", (b'A' + i as u8) as char)))
            .collect()
    }

    fn run(pages: &[TestPage], manifest: &Manifest) -> Result<PdfDocument, OperationError> {
        let doc = PdfDocument::open(&sample_pdf(pages))?;
        let output = apply(doc, manifest)?;
        PdfDocument::open(&output)
    }

    fn page_labels(doc: &PdfDocument) -> Vec<char> {
        (0..doc.page_count())
            .map(|i| {
                let text = doc.page_text(i).unwrap();
                let at = text.find("Page ").expect("fixture label") + 5;
                text[at..].chars().next().unwrap()
            })
            .collect()
    }

    fn add_text(page: usize, text: &str) -> AddTextOp {
        AddTextOp {
            page,
            text: text.into(),
            x: 72.0,
            y: 400.0,
            font_size: 12.0,
            color: "black".into(),
        }
    }

    fn watermark(opacity: f64) -> WatermarkOp {
        WatermarkOp {
            text: "CONFIDENTIAL".into(),
            size: 48.0,
            opacity,
            rotation: 45.0,
        }
    }

    #[test]
    fn test_empty_manifest_keeps_document() {
        let doc = run(&pages(2), &Manifest::default()).unwrap();
        assert_eq!(page_labels(&doc), vec!['A', 'B']);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let manifest = Manifest {
            rotate: Some(vec![RotateOp { page: 0, degrees: 90 }]),
            add_text: Some(vec![AddTextOp {
                page: 0,
                text: "Added Note".into(),
                x: 100.0,
                y: 300.0,
                font_size: 14.0,
                color: "blue".into(),
            }]),
            watermark: Some(watermark(0.3)),
            redactions: Some(vec![RedactionOp {
                page: 0,
                x: 60.0,
                y: 80.0,
                width: 400.0,
                height: 30.0,
                fill: "black".into(),
            }]),
            ..Default::default()
        };

        let doc = run(&[TestPage::a4("Hello World")], &manifest).unwrap();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.rotation(0).unwrap(), 90);
        let text = doc.text().unwrap();
        assert!(text.contains("Added Note"));
        assert!(text.contains("CONFIDENTIAL"));
        assert!(!text.contains("Hello World"));
    }

    #[test]
    fn test_end_to_end_scenario_with_default_watermark() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "rotate": [{"page": 0, "degrees": 90}],
                "addText": [{"page": 0, "text": "Added Note", "x": 200, "y": 200}],
                "watermark": {"text": "CONFIDENTIAL"},
                "redactions": [{"page": 0, "x": 60, "y": 60, "width": 150, "height": 30, "fill": "white"}]
            }"#,
        )
        .unwrap();

        for page in [
            TestPage::a4("Hello World").placed(72.0, 72.0, 16),
            TestPage::a4("Hello World").placed(72.0, 72.0, 16).in_form(),
        ] {
            let doc = run(&[page], &manifest).unwrap();
            assert_eq!(doc.page_count(), 1);
            assert_eq!(doc.rotation(0).unwrap(), 90);
            let text = doc.text().unwrap();
            assert!(text.contains("Added Note"), "text was {:?}", text);
            assert!(text.contains("CONFIDENTIAL"));
            assert!(!text.contains("Hello World"));
        }
    }

    #[test]
    fn test_add_text_uses_post_reorder_index() {
        let manifest = Manifest {
            delete_pages: Some(vec![1]),
            reorder: Some(vec![2, 0, 1]),
            add_text: Some(vec![add_text(0, "Marker")]),
            ..Default::default()
        };
        // A B C D -> delete B -> A C D -> reorder [2, 0, 1] -> D A C
        let doc = run(&pages(4), &manifest).unwrap();
        assert_eq!(page_labels(&doc), vec!['D', 'A', 'C']);
        assert!(doc.page_text(0).unwrap().contains("Marker"));
        assert!(!doc.page_text(1).unwrap().contains("Marker"));
    }

    #[test]
    fn test_reorder_can_duplicate_pages() {
        let manifest = Manifest {
            reorder: Some(vec![0, 0, 1]),
            ..Default::default()
        };
        let doc = run(&pages(2), &manifest).unwrap();
        assert_eq!(page_labels(&doc), vec!['A', 'A', 'B']);
    }

    #[test]
    fn test_delete_rejects_out_of_range_page() {
        let manifest = Manifest {
            delete_pages: Some(vec![0, 7]),
            ..Default::default()
        };
        let err = run(&pages(3), &manifest).err().unwrap();
        assert_eq!(
            err,
            OperationError::PageOutOfRange {
                field: "delete_pages[1]".into(),
                page: 7,
                page_count: 3,
            }
        );
    }

    #[test]
    fn test_deleting_every_page_is_rejected() {
        let manifest = Manifest {
            delete_pages: Some(vec![1, 0, 1]),
            ..Default::default()
        };
        let err = run(&pages(2), &manifest).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_add_text_index_checked_against_reordered_document() {
        let manifest = Manifest {
            reorder: Some(vec![0]),
            add_text: Some(vec![add_text(1, "Nowhere")]),
            ..Default::default()
        };
        let err = run(&pages(3), &manifest).err().unwrap();
        assert_eq!(
            err,
            OperationError::PageOutOfRange {
                field: "add_text[0].page".into(),
                page: 1,
                page_count: 1,
            }
        );
    }

    #[test]
    fn test_invalid_base64_is_content_error() {
        let manifest = Manifest {
            images: Some(vec![AddImageOp {
                page: 0,
                image_data: "%%% not base64 %%%".into(),
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            }]),
            ..Default::default()
        };
        let err = run(&pages(1), &manifest).err().unwrap();
        assert!(matches!(err, OperationError::Content(_)));
    }

    #[test]
    fn test_image_from_data_url() {
        let data = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes(3, 3)));
        let manifest = Manifest {
            images: Some(vec![AddImageOp {
                page: 0,
                image_data: data,
                x: 20.0,
                y: 20.0,
                width: 60.0,
                height: 60.0,
            }]),
            ..Default::default()
        };
        let doc = run(&pages(1), &manifest).unwrap();
        assert_eq!(doc.page_count(), 1);
    }

    #[test]
    fn test_drawings_dispatch_each_variant() {
        let manifest: Manifest = serde_json::from_str(
            r##"{
                "drawings": [
                    {"type": "line", "page": 0, "x1": 10, "y1": 10, "x2": 100, "y2": 10, "color": "red"},
                    {"type": "rectangle", "page": 1, "x": 20, "y": 20, "width": 50, "height": 30,
                     "color": "#000", "fillColor": "#ff0000"}
                ]
            }"##,
        )
        .unwrap();
        let doc = run(&pages(2), &manifest).unwrap();
        assert_eq!(page_labels(&doc), vec!['A', 'B']);
    }

    #[test]
    fn test_watermark_on_every_page() {
        let manifest = Manifest {
            watermark: Some(watermark(0.2)),
            ..Default::default()
        };
        let doc = run(&pages(3), &manifest).unwrap();
        for i in 0..3 {
            assert!(doc.page_text(i).unwrap().contains("CONFIDENTIAL"));
        }
    }

    #[test]
    fn test_higher_opacity_watermark_is_darker() {
        let dark = Manifest {
            watermark: Some(watermark(1.0)),
            ..Default::default()
        };
        let light = Manifest {
            watermark: Some(watermark(0.1)),
            ..Default::default()
        };
        let grey = |manifest: &Manifest| manifest.watermark.as_ref().unwrap().grey_level();
        assert!(grey(&dark) < grey(&light));

        // both render and keep the page text
        for manifest in [dark, light] {
            let doc = run(&pages(1), &manifest).unwrap();
            assert!(doc.page_text(0).unwrap().contains("Page A"));
        }
    }

    #[test]
    fn test_redaction_error_aborts_without_output() {
        let manifest = Manifest {
            add_text: Some(vec![add_text(0, "Fine")]),
            redactions: Some(vec![RedactionOp {
                page: 5,
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                fill: "black".into(),
            }]),
            ..Default::default()
        };
        let err = run(&pages(1), &manifest).err().unwrap();
        assert!(err.is_validation());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_rotate_preserves_page_count(
            count in 1usize..5,
            quarter_turns in proptest::collection::vec(0i64..8, 1..4),
        ) {
            let rotate = quarter_turns
                .iter()
                .enumerate()
                .map(|(i, turns)| RotateOp { page: i % count, degrees: turns * 90 - 360 })
                .collect();
            let manifest = Manifest { rotate: Some(rotate), ..Default::default() };
            let doc = run(&pages(count), &manifest).unwrap();
            prop_assert_eq!(doc.page_count(), count);
        }

        #[test]
        fn prop_delete_keeps_remaining_order(
            count in 2usize..6,
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 1..4),
        ) {
            let delete: Vec<usize> = picks.iter().map(|p| p.index(count)).collect();
            let unique: BTreeSet<usize> = delete.iter().copied().collect();
            prop_assume!(unique.len() < count);

            let manifest = Manifest { delete_pages: Some(delete), ..Default::default() };
            let doc = run(&pages(count), &manifest).unwrap();

            let expected: Vec<char> = (0..count)
                .filter(|i| !unique.contains(i))
                .map(|i| (b'A' + i as u8) as char)
                .collect();
            prop_assert_eq!(page_labels(&doc), expected);
        }

        #[test]
        fn prop_reorder_picks_pages_in_list_order(
            count in 1usize..5,
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 1..6),
        ) {
            let order: Vec<usize> = picks.iter().map(|p| p.index(count)).collect();
            let manifest = Manifest { reorder: Some(order.clone()), ..Default::default() };
            let doc = run(&pages(count), &manifest).unwrap();

            let expected: Vec<char> = order.iter().map(|&i| (b'A' + i as u8) as char).collect();
            prop_assert_eq!(page_labels(&doc), expected);
        }
    }
}

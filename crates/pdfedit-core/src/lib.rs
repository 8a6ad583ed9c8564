//! Manifest-driven PDF editing
//!
//! A [`Manifest`] lists edits (page deletion, reordering, rotation, text,
//! images, drawings, a watermark and redactions). [`apply`] runs them against
//! any [`PageDocument`] in a fixed phase order and returns the finished PDF.
//! [`pdf::PdfDocument`] is the lopdf-backed document used in production.
//!
//! [`JobRegistry`] tracks the lifecycle of asynchronous edit jobs.

pub mod color;
pub mod document;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod jobs;
pub mod manifest;
pub mod pdf;

pub use color::{resolve_color, Rgb};
pub use document::{Overlay, PageDocument, SaveOptions};
pub use engine::apply;
pub use error::OperationError;
pub use jobs::{Job, JobRegistry, JobStatus};
pub use manifest::{
    AddImageOp, AddTextOp, Drawing, Manifest, RedactionOp, RotateOp, WatermarkOp,
};
pub use pdf::{finalize, PdfDocument};

/// Parse PDF bytes and return the page count
pub fn get_page_count(bytes: &[u8]) -> Result<usize, OperationError> {
    Ok(PdfDocument::open(bytes)?.page_count())
}

/// Displayed `(width, height)` of every page, in points
pub fn get_page_sizes(bytes: &[u8]) -> Result<Vec<(f64, f64)>, OperationError> {
    let doc = PdfDocument::open(bytes)?;
    (0..doc.page_count()).map(|i| doc.page_size(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testing::{sample_pdf, TestPage};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_get_page_count() {
        let pdf = sample_pdf(&[TestPage::a4("One"), TestPage::a4("Two")]);
        assert_eq!(get_page_count(&pdf).unwrap(), 2);
    }

    #[test]
    fn test_get_page_sizes_reports_rotation() {
        let pdf = sample_pdf(&[TestPage::letter("One"), TestPage::a4("Two").rotated(270)]);
        assert_eq!(
            get_page_sizes(&pdf).unwrap(),
            vec![(612.0, 792.0), (842.0, 595.0)]
        );
    }

    #[test]
    fn test_get_page_count_rejects_garbage() {
        assert!(matches!(
            get_page_count(b"garbage"),
            Err(OperationError::Codec(_))
        ));
    }
}

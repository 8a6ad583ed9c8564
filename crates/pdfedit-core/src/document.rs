//! Capabilities the engine needs from a paginated document
//!
//! Page indices are zero-based and refer to the document's current page order.
//! Positions and rectangles use the top-left-origin convention described in
//! [`crate::geometry`]; each implementation maps them into its own space.

use crate::color::Rgb;
use crate::error::OperationError;
use crate::geometry::{Point, Rect};

/// Full-page overlay text, centered on the page
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub text: String,
    pub font_size: f64,
    /// Counter-clockwise, in degrees
    pub rotation: f64,
    pub color: Rgb,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Drop unreferenced objects and deflate streams before writing
    pub compact: bool,
}

pub trait PageDocument: Sized {
    fn page_count(&self) -> usize;

    /// Displayed `(width, height)` of a page, accounting for its rotation
    fn page_size(&self, index: usize) -> Result<(f64, f64), OperationError>;

    fn delete_page(&mut self, index: usize) -> Result<(), OperationError>;

    /// Build a new document from the listed pages, in list order.
    ///
    /// Unlisted pages are dropped and repeated indices produce independent
    /// copies. The old handle is consumed.
    fn reorder(self, order: &[usize]) -> Result<Self, OperationError>;

    /// Set the absolute rotation of a page (a multiple of 90)
    fn set_rotation(&mut self, index: usize, degrees: i64) -> Result<(), OperationError>;

    /// Insert a text run whose baseline starts at `origin`
    fn insert_text(
        &mut self,
        index: usize,
        origin: Point,
        text: &str,
        font_size: f64,
        color: Rgb,
    ) -> Result<(), OperationError>;

    /// Decode an image file and scale it into `rect`
    fn insert_image(
        &mut self,
        index: usize,
        rect: Rect,
        image: &[u8],
    ) -> Result<(), OperationError>;

    fn draw_line(
        &mut self,
        index: usize,
        from: Point,
        to: Point,
        color: Rgb,
        width: f64,
    ) -> Result<(), OperationError>;

    fn draw_rect(
        &mut self,
        index: usize,
        rect: Rect,
        color: Rgb,
        width: f64,
        fill: Option<Rgb>,
    ) -> Result<(), OperationError>;

    /// Overlay centered, fill-only text covering the page
    fn insert_overlay_text(&mut self, index: usize, overlay: &Overlay)
        -> Result<(), OperationError>;

    /// Flag a region for redaction; nothing is removed until [`commit_redactions`]
    ///
    /// [`commit_redactions`]: PageDocument::commit_redactions
    fn mark_redaction(&mut self, index: usize, rect: Rect, fill: Rgb)
        -> Result<(), OperationError>;

    /// Remove content under every marked region of every page, then paint the fills
    fn commit_redactions(&mut self) -> Result<(), OperationError>;

    fn serialize(self, options: SaveOptions) -> Result<Vec<u8>, OperationError>;
}

//! Manifest of edit operations
//!
//! A manifest is a set of optional operation groups. The engine applies them
//! in a fixed phase order (see [`crate::engine`]), and that order decides which
//! page numbering each group is written against:
//!
//! - `delete_pages` uses indices of the **original** document.
//! - `reorder` uses indices of the document **after deletion**.
//! - every other group (`rotate`, `add_text`, `images`, `drawings`,
//!   `redactions`) uses indices of the document **after reorder**.
//!
//! A caller that computes `add_text` indices against the original document
//! will edit the wrong pages whenever pages were deleted or reordered.
//!
//! Field names accept both snake_case (`delete_pages`, `font_size`) and
//! camelCase (`deletePages`, `fontSize`).

use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::geometry::{Point, Rect};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder: Option<Vec<usize>>,
    #[serde(
        default,
        alias = "deletePages",
        skip_serializing_if = "Option::is_none"
    )]
    pub delete_pages: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate: Option<Vec<RotateOp>>,
    #[serde(default, alias = "addText", skip_serializing_if = "Option::is_none")]
    pub add_text: Option<Vec<AddTextOp>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<AddImageOp>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawings: Option<Vec<Drawing>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<WatermarkOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redactions: Option<Vec<RedactionOp>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RotateOp {
    pub page: usize,
    /// Absolute rotation; normalized modulo 360 and must land on a multiple of 90
    pub degrees: i64,
}

impl RotateOp {
    pub fn normalized_degrees(&self) -> i64 {
        self.degrees.rem_euclid(360)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddTextOp {
    pub page: usize,
    pub text: String,
    pub x: f64,
    /// Baseline of the text run, measured from the top of the page
    pub y: f64,
    #[serde(default = "default_font_size", alias = "fontSize")]
    pub font_size: f64,
    #[serde(default = "default_color")]
    pub color: String,
}

impl AddTextOp {
    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddImageOp {
    pub page: usize,
    /// Base64-encoded image file (PNG, JPEG)
    #[serde(alias = "imageData")]
    pub image_data: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl AddImageOp {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Vector drawing primitives, tagged by `"type"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Drawing {
    Line {
        page: usize,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[serde(default = "default_stroke_width")]
        width: f64,
        #[serde(default = "default_color")]
        color: String,
    },
    Rectangle {
        page: usize,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        #[serde(default = "default_stroke_width", alias = "borderWidth")]
        border_width: f64,
        #[serde(default = "default_color")]
        color: String,
        #[serde(default, alias = "fillColor")]
        fill_color: Option<String>,
    },
}

impl Drawing {
    pub fn page(&self) -> usize {
        match self {
            Drawing::Line { page, .. } => *page,
            Drawing::Rectangle { page, .. } => *page,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatermarkOp {
    pub text: String,
    #[serde(default = "default_watermark_size")]
    pub size: f64,
    /// In (0, 1]; higher is darker
    #[serde(default = "default_watermark_opacity")]
    pub opacity: f64,
    /// Counter-clockwise, in degrees
    #[serde(default = "default_watermark_rotation")]
    pub rotation: f64,
}

impl WatermarkOp {
    /// Grey level of the overlay text: opacity 0 is white, opacity 1 is mid-grey
    pub fn grey_level(&self) -> f64 {
        1.0 - self.opacity * 0.5
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedactionOp {
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_color")]
    pub fill: String,
}

impl RedactionOp {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

fn default_font_size() -> f64 {
    12.0
}

fn default_color() -> String {
    "black".to_string()
}

fn default_stroke_width() -> f64 {
    1.0
}

fn default_watermark_size() -> f64 {
    36.0
}

fn default_watermark_opacity() -> f64 {
    0.2
}

fn default_watermark_rotation() -> f64 {
    45.0
}

/// Treat an empty group the same as an absent one
pub(crate) fn non_empty<T>(group: &Option<Vec<T>>) -> Option<&[T]> {
    group.as_deref().filter(|items| !items.is_empty())
}

impl Manifest {
    pub fn is_empty(&self) -> bool {
        non_empty(&self.reorder).is_none()
            && non_empty(&self.delete_pages).is_none()
            && non_empty(&self.rotate).is_none()
            && non_empty(&self.add_text).is_none()
            && non_empty(&self.images).is_none()
            && non_empty(&self.drawings).is_none()
            && self.watermark.is_none()
            && non_empty(&self.redactions).is_none()
    }

    /// Structural validation, independent of any document.
    ///
    /// Page indices are checked later, against the page count each phase
    /// actually sees.
    pub fn validate(&self) -> Result<(), OperationError> {
        for (i, op) in self.rotate.iter().flatten().enumerate() {
            if op.normalized_degrees() % 90 != 0 {
                return Err(invalid(
                    format!("rotate[{}].degrees", i),
                    format!("{} is not a multiple of 90", op.degrees),
                ));
            }
        }

        for (i, op) in self.add_text.iter().flatten().enumerate() {
            let field = format!("add_text[{}]", i);
            if op.text.is_empty() {
                return Err(invalid(format!("{}.text", field), "is empty"));
            }
            finite(&field, "x", op.x)?;
            finite(&field, "y", op.y)?;
            positive(&field, "font_size", op.font_size)?;
        }

        for (i, op) in self.images.iter().flatten().enumerate() {
            let field = format!("images[{}]", i);
            finite(&field, "x", op.x)?;
            finite(&field, "y", op.y)?;
            positive(&field, "width", op.width)?;
            positive(&field, "height", op.height)?;
            if op.image_data.trim().is_empty() {
                return Err(invalid(format!("{}.image_data", field), "is empty"));
            }
        }

        for (i, drawing) in self.drawings.iter().flatten().enumerate() {
            let field = format!("drawings[{}]", i);
            match drawing {
                Drawing::Line {
                    x1, y1, x2, y2, width, ..
                } => {
                    finite(&field, "x1", *x1)?;
                    finite(&field, "y1", *y1)?;
                    finite(&field, "x2", *x2)?;
                    finite(&field, "y2", *y2)?;
                    positive(&field, "width", *width)?;
                }
                Drawing::Rectangle {
                    x,
                    y,
                    width,
                    height,
                    border_width,
                    ..
                } => {
                    finite(&field, "x", *x)?;
                    finite(&field, "y", *y)?;
                    positive(&field, "width", *width)?;
                    positive(&field, "height", *height)?;
                    positive(&field, "border_width", *border_width)?;
                }
            }
        }

        if let Some(watermark) = &self.watermark {
            if watermark.text.is_empty() {
                return Err(invalid("watermark.text", "is empty"));
            }
            positive("watermark", "size", watermark.size)?;
            finite("watermark", "rotation", watermark.rotation)?;
            if !(watermark.opacity > 0.0 && watermark.opacity <= 1.0) {
                return Err(invalid(
                    "watermark.opacity",
                    format!("{} is outside (0, 1]", watermark.opacity),
                ));
            }
        }

        for (i, op) in self.redactions.iter().flatten().enumerate() {
            let field = format!("redactions[{}]", i);
            finite(&field, "x", op.x)?;
            finite(&field, "y", op.y)?;
            positive(&field, "width", op.width)?;
            positive(&field, "height", op.height)?;
        }

        Ok(())
    }
}

fn invalid(field: impl AsRef<str>, reason: impl AsRef<str>) -> OperationError {
    OperationError::Validation(format!("{}: {}", field.as_ref(), reason.as_ref()))
}

fn finite(field: &str, name: &str, value: f64) -> Result<(), OperationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{}.{}", field, name), "must be a finite number"))
    }
}

fn positive(field: &str, name: &str, value: f64) -> Result<(), OperationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(
            format!("{}.{}", field, name),
            format!("{} must be greater than 0", value),
        ))
    }
}

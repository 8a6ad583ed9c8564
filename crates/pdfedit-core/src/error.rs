use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    /// Malformed manifest field or an edit the document cannot accept
    #[error("Invalid manifest: {0}")]
    Validation(String),

    #[error("{field}: page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange {
        field: String,
        page: usize,
        page_count: usize,
    },

    /// Input cannot be parsed as a PDF, or output cannot be serialized
    #[error("PDF codec error: {0}")]
    Codec(String),

    /// Embedded content (e.g. an image payload) is malformed
    #[error("Invalid content: {0}")]
    Content(String),
}

impl OperationError {
    /// True for malformed manifests and out-of-range page indices
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OperationError::Validation(_) | OperationError::PageOutOfRange { .. }
        )
    }
}

impl From<lopdf::Error> for OperationError {
    fn from(err: lopdf::Error) -> Self {
        OperationError::Codec(err.to_string())
    }
}

use thiserror::Error;

/// Errors produced while turning attachments into image payloads.
#[derive(Error, Debug)]
pub enum AttachmentError {
    /// No PDF renderer is configured, or its binaries cannot be run.
    #[error("PDF renderer unavailable: {0}")]
    RendererUnavailable(String),

    /// The renderer could not read the document.
    #[error("Could not inspect PDF: {0}")]
    Inspect(String),

    /// A single page failed to rasterize.
    #[error("Page {page} failed to render: {reason}")]
    PageRender { page: usize, reason: String },

    /// Every page failed, or the document has none.
    #[error("PDF produced no page images")]
    NoPages,

    #[error("Malformed data URL")]
    InvalidDataUrl,

    /// Bytes are not in an image format the chat backends accept.
    #[error("Unsupported image content")]
    UnsupportedImage,

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AttachmentError>;

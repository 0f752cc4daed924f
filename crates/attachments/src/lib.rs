//! Attachment handling for Sidechat
//!
//! Turns screenshots, image files and PDFs into base64 image payloads and
//! assembles them, together with the prompt text, into the entries of the
//! next outgoing turn.

pub mod builder;
pub mod encoder;
pub mod error;
pub mod pdf;
pub mod poppler;
pub mod source;

pub use builder::{AttachmentFailure, Turn, TurnBuilder};
pub use encoder::{AttachmentEncoder, EncodedImage};
pub use error::{AttachmentError, Result};
pub use pdf::{PageRasterizer, PdfEncoder, RasterDocument};
pub use poppler::PopplerRasterizer;
pub use source::AttachmentSource;

//! Attachment encoder: sources in, base64 image payloads out.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;
use shared::conversation::AttachmentKind;

use crate::error::{AttachmentError, Result};
use crate::pdf::PdfEncoder;
use crate::source::{split_data_url, AttachmentSource};

/// A base64 image ready to be embedded in a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime: String,
    pub base64: String,
}

impl EncodedImage {
    /// Encodes raw image bytes, keeping `mime_hint` when it names an image
    /// type and sniffing the format otherwise.
    pub fn from_bytes(bytes: &[u8], mime_hint: Option<&str>) -> Result<Self> {
        let mime = match mime_hint.filter(|m| m.starts_with("image/")) {
            Some(m) => m.to_string(),
            None => sniff_mime(bytes)
                .ok_or(AttachmentError::UnsupportedImage)?
                .to_string(),
        };
        Ok(Self {
            mime,
            base64: STANDARD.encode(bytes),
        })
    }

    pub fn png(bytes: &[u8]) -> Self {
        Self {
            mime: "image/png".to_string(),
            base64: STANDARD.encode(bytes),
        }
    }

    /// Accepts an existing image data URL after validating its payload.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let (mime, payload) = split_data_url(url)?;
        if !mime.starts_with("image/") {
            return Err(AttachmentError::UnsupportedImage);
        }
        STANDARD.decode(payload)?;
        Ok(Self {
            mime: mime.to_string(),
            base64: payload.to_string(),
        })
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(&self.base64)?)
    }
}

/// MIME type from magic bytes, limited to formats vision models accept
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

pub struct AttachmentEncoder {
    pdf: PdfEncoder,
}

impl Default for AttachmentEncoder {
    fn default() -> Self {
        Self::images_only()
    }
}

impl AttachmentEncoder {
    pub fn new(pdf: PdfEncoder) -> Self {
        Self { pdf }
    }

    /// An encoder without a PDF renderer; PDFs fail with `RendererUnavailable`
    pub fn images_only() -> Self {
        Self::new(PdfEncoder::unavailable())
    }

    /// One image for image sources, one per page for PDFs.
    pub fn encode(&self, source: &AttachmentSource) -> Result<Vec<EncodedImage>> {
        match source.kind() {
            AttachmentKind::Image => self.encode_image(source).map(|img| vec![img]),
            AttachmentKind::Pdf => self.encode_pdf(source),
        }
    }

    pub fn encode_image(&self, source: &AttachmentSource) -> Result<EncodedImage> {
        match source {
            AttachmentSource::DataUrl { data_url, .. } => EncodedImage::from_data_url(data_url),
            _ => {
                let (bytes, mime) = source.load()?;
                EncodedImage::from_bytes(&bytes, mime.as_deref())
            }
        }
    }

    pub fn encode_pdf(&self, source: &AttachmentSource) -> Result<Vec<EncodedImage>> {
        // Checked before the document is even read
        self.pdf.ensure_available()?;
        let (bytes, _) = source.load()?;
        self.pdf.encode(&bytes)
    }
}

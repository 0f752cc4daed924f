//! Where an attachment's bytes come from.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use shared::conversation::{AttachmentKind, AttachmentMeta};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{AttachmentError, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// A `data:` URL, e.g. a captured screenshot
    DataUrl { name: String, data_url: String },
    /// In-memory bytes from an upload
    Bytes {
        name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
    File(PathBuf),
}

impl AttachmentSource {
    pub fn screenshot(data_url: impl Into<String>) -> Self {
        AttachmentSource::DataUrl {
            name: "screenshot".to_string(),
            data_url: data_url.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        AttachmentSource::File(path.into())
    }

    pub fn bytes(name: impl Into<String>, mime: Option<&str>, bytes: Vec<u8>) -> Self {
        AttachmentSource::Bytes {
            name: name.into(),
            mime: mime.map(str::to_string),
            bytes,
        }
    }

    pub fn name(&self) -> String {
        match self {
            AttachmentSource::DataUrl { name, .. } | AttachmentSource::Bytes { name, .. } => {
                name.clone()
            }
            AttachmentSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }

    /// PDF when the MIME type, the extension or the magic bytes say so
    pub fn kind(&self) -> AttachmentKind {
        let is_pdf = match self {
            AttachmentSource::DataUrl { data_url, .. } => {
                data_url_mime(data_url) == Some("application/pdf")
            }
            AttachmentSource::Bytes { mime, bytes, .. } => {
                mime.as_deref() == Some("application/pdf") || bytes.starts_with(PDF_MAGIC)
            }
            AttachmentSource::File(path) => has_pdf_extension(path) || file_has_pdf_magic(path),
        };
        if is_pdf {
            AttachmentKind::Pdf
        } else {
            AttachmentKind::Image
        }
    }

    /// Raw bytes plus the declared MIME type, if any
    pub fn load(&self) -> Result<(Vec<u8>, Option<String>)> {
        match self {
            AttachmentSource::DataUrl { data_url, .. } => {
                let (mime, payload) = split_data_url(data_url)?;
                Ok((STANDARD.decode(payload)?, Some(mime.to_string())))
            }
            AttachmentSource::Bytes { mime, bytes, .. } => Ok((bytes.clone(), mime.clone())),
            AttachmentSource::File(path) => Ok((fs::read(path)?, None)),
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            AttachmentSource::DataUrl { data_url, .. } => split_data_url(data_url)
                .ok()
                .map(|(_, payload)| decoded_len(payload)),
            AttachmentSource::Bytes { bytes, .. } => Some(bytes.len() as u64),
            AttachmentSource::File(path) => fs::metadata(path).ok().map(|m| m.len()),
        }
    }

    /// Metadata recorded on the persisted message
    pub fn meta(&self) -> AttachmentMeta {
        let mut meta = AttachmentMeta::new(self.name(), self.kind());
        meta.size = self.size();
        if let AttachmentSource::DataUrl { data_url, .. } = self {
            meta.url = Some(data_url.clone());
        }
        meta
    }
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and payload.
pub(crate) fn split_data_url(url: &str) -> Result<(&str, &str)> {
    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or(AttachmentError::InvalidDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(AttachmentError::InvalidDataUrl)?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or(AttachmentError::InvalidDataUrl)?;
    Ok((mime, payload.trim()))
}

fn data_url_mime(url: &str) -> Option<&str> {
    split_data_url(url).ok().map(|(mime, _)| mime)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn file_has_pdf_magic(path: &Path) -> bool {
    let mut head = [0u8; 5];
    fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut head))
        .map(|_| head == PDF_MAGIC)
        .unwrap_or(false)
}

/// Byte length of a base64 payload once decoded, padded or not.
fn decoded_len(payload: &str) -> u64 {
    let significant = payload.trim_end().trim_end_matches('=').len() as u64;
    significant * 3 / 4
}

//! [`PageRasterizer`] backed by the poppler command-line tools.
//!
//! `pdfinfo` reports the page count and `pdftoppm` renders one page per call
//! into a temporary directory that lives as long as the opened document.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use crate::error::{AttachmentError, Result};
use crate::pdf::{PageRasterizer, RasterDocument};

/// Points per inch of a PDF page at zoom 1.0
const BASE_DPI: f32 = 72.0;

pub struct PopplerRasterizer {
    pdfinfo: PathBuf,
    pdftoppm: PathBuf,
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self {
            pdfinfo: PathBuf::from("pdfinfo"),
            pdftoppm: PathBuf::from("pdftoppm"),
        }
    }
}

impl PopplerRasterizer {
    /// Uses the binaries found in `bin_dir` instead of `$PATH`
    pub fn in_dir(bin_dir: impl Into<PathBuf>) -> Self {
        let dir = bin_dir.into();
        Self {
            pdfinfo: dir.join("pdfinfo"),
            pdftoppm: dir.join("pdftoppm"),
        }
    }

    fn unavailable(&self, tool: &Path, e: std::io::Error) -> AttachmentError {
        AttachmentError::RendererUnavailable(format!("cannot run {}: {}", tool.display(), e))
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn name(&self) -> &str {
        "poppler"
    }

    fn check_available(&self) -> Result<()> {
        // `-v` prints the version and exits; only a spawn failure matters here
        Command::new(&self.pdftoppm)
            .arg("-v")
            .output()
            .map_err(|e| self.unavailable(&self.pdftoppm, e))?;
        Ok(())
    }

    fn open(&self, pdf: &[u8]) -> Result<Box<dyn RasterDocument>> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.pdf");
        fs::write(&input, pdf)?;

        let output = Command::new(&self.pdfinfo)
            .arg(&input)
            .output()
            .map_err(|e| self.unavailable(&self.pdfinfo, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AttachmentError::Inspect(stderr.trim().to_string()));
        }

        let info = String::from_utf8_lossy(&output.stdout);
        let pages = parse_page_count(&info).ok_or_else(|| {
            AttachmentError::Inspect("pdfinfo did not report a page count".to_string())
        })?;

        Ok(Box::new(PopplerDocument {
            dir,
            input,
            pages,
            pdftoppm: self.pdftoppm.clone(),
        }))
    }
}

struct PopplerDocument {
    dir: TempDir,
    input: PathBuf,
    pages: usize,
    pdftoppm: PathBuf,
}

impl RasterDocument for PopplerDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn render_page(&self, page: usize, zoom: f32) -> Result<Vec<u8>> {
        let dpi = (BASE_DPI * zoom).round().max(1.0) as u32;
        let prefix = self.dir.path().join(format!("page-{}", page));

        let output = Command::new(&self.pdftoppm)
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-png")
            .arg("-singlefile")
            .arg(&self.input)
            .arg(&prefix)
            .output()?;
        if !output.status.success() {
            return Err(AttachmentError::PageRender {
                page,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let path = prefix.with_extension("png");
        let bytes = fs::read(&path)?;
        let _ = fs::remove_file(&path);
        Ok(bytes)
    }
}

/// Reads the `Pages:` line of `pdfinfo` output
pub fn parse_page_count(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_count() {
        let info = "Title:          Quarterly report\n\
                    Producer:       LibreOffice 7.5\n\
                    Pages:          12\n\
                    Encrypted:      no\n";
        assert_eq!(parse_page_count(info), Some(12));
        assert_eq!(parse_page_count("Title: x\n"), None);
        assert_eq!(parse_page_count("Pages: many\n"), None);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let rasterizer = PopplerRasterizer::in_dir("/nonexistent/poppler/bin");
        assert!(matches!(
            rasterizer.check_available(),
            Err(AttachmentError::RendererUnavailable(_))
        ));
        assert!(matches!(
            rasterizer.open(b"%PDF-1.4"),
            Err(AttachmentError::RendererUnavailable(_))
        ));
    }
}

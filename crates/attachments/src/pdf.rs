//! PDF to page images.
//!
//! Rendering sits behind [`PageRasterizer`] so the encoder does not care which
//! library draws the pages. Pages are rendered one at a time and a page that
//! fails is logged and skipped.

use image::imageops::FilterType;
use image::{ImageFormat, ImageOutputFormat};
use shared::settings::AttachmentSettings;
use std::io::Cursor;
use std::sync::Arc;

use crate::encoder::EncodedImage;
use crate::error::{AttachmentError, Result};

pub const DEFAULT_ZOOM: f32 = 2.0;

/// A PDF rendering backend.
pub trait PageRasterizer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// `RendererUnavailable` when the backend cannot be used at all
    fn check_available(&self) -> Result<()>;

    fn open(&self, pdf: &[u8]) -> Result<Box<dyn RasterDocument>>;
}

/// An opened document.
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Renders a 1-based page at `zoom` and returns PNG bytes.
    fn render_page(&self, page: usize, zoom: f32) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct PdfEncoder {
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    zoom: f32,
    max_dimension: Option<u32>,
}

impl PdfEncoder {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            rasterizer: Some(rasterizer),
            zoom: DEFAULT_ZOOM,
            max_dimension: None,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            rasterizer: None,
            zoom: DEFAULT_ZOOM,
            max_dimension: None,
        }
    }

    pub fn from_settings(
        rasterizer: Option<Arc<dyn PageRasterizer>>,
        settings: &AttachmentSettings,
    ) -> Self {
        Self {
            rasterizer,
            zoom: settings.pdf_zoom,
            max_dimension: settings.max_page_dimension,
        }
    }

    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = Some(max_dimension);
        self
    }

    pub fn ensure_available(&self) -> Result<&dyn PageRasterizer> {
        let rasterizer = self.rasterizer.as_deref().ok_or_else(|| {
            AttachmentError::RendererUnavailable("no PDF renderer configured".to_string())
        })?;
        rasterizer.check_available()?;
        Ok(rasterizer)
    }

    /// Rasterizes every page in order. Fails with `NoPages` only when no page
    /// could be rendered.
    pub fn encode(&self, pdf: &[u8]) -> Result<Vec<EncodedImage>> {
        let rasterizer = self.ensure_available()?;
        let document = rasterizer.open(pdf)?;
        let total = document.page_count();
        tracing::debug!(renderer = rasterizer.name(), pages = total, "rasterizing PDF");

        let mut images = Vec::with_capacity(total);
        for page in 1..=total {
            let rendered = document
                .render_page(page, self.zoom)
                .and_then(|png| self.fit(png));
            match rendered {
                Ok(png) => images.push(EncodedImage::png(&png)),
                Err(e) => {
                    tracing::warn!(page, error = %e, "skipping PDF page that failed to render");
                }
            }
        }

        if images.is_empty() {
            return Err(AttachmentError::NoPages);
        }
        if images.len() < total {
            tracing::info!(rendered = images.len(), total, "PDF partially rasterized");
        }
        Ok(images)
    }

    fn fit(&self, png: Vec<u8>) -> Result<Vec<u8>> {
        match self.max_dimension {
            Some(max) => fit_within(png, max),
            None => Ok(png),
        }
    }
}

/// Downscales a PNG so its longest side is at most `max` pixels.
fn fit_within(png: Vec<u8>, max: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory_with_format(&png, ImageFormat::Png)?;
    if img.width().max(img.height()) <= max {
        return Ok(png);
    }
    let resized = img.resize(max, max, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    resized.write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, RgbaImage};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    /// Renders `pages` blank pages; pages listed in `broken` fail.
    pub(crate) struct FakeRasterizer {
        pub pages: usize,
        pub broken: HashSet<usize>,
        pub available: bool,
        pub opened: AtomicUsize,
    }

    impl FakeRasterizer {
        pub(crate) fn with_pages(pages: usize) -> Self {
            Self {
                pages,
                broken: HashSet::new(),
                available: true,
                opened: AtomicUsize::new(0),
            }
        }
    }

    struct FakeDocument {
        pages: usize,
        broken: HashSet<usize>,
    }

    impl PageRasterizer for FakeRasterizer {
        fn name(&self) -> &str {
            "fake"
        }

        fn check_available(&self) -> Result<()> {
            if self.available {
                Ok(())
            } else {
                Err(AttachmentError::RendererUnavailable("fake renderer offline".into()))
            }
        }

        fn open(&self, _pdf: &[u8]) -> Result<Box<dyn RasterDocument>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeDocument {
                pages: self.pages,
                broken: self.broken.clone(),
            }))
        }
    }

    impl RasterDocument for FakeDocument {
        fn page_count(&self) -> usize {
            self.pages
        }

        fn render_page(&self, page: usize, zoom: f32) -> Result<Vec<u8>> {
            if self.broken.contains(&page) {
                return Err(AttachmentError::PageRender {
                    page,
                    reason: "corrupt content stream".into(),
                });
            }
            // Page number encoded in the width so order is observable
            Ok(png(page as u32 * zoom as u32, 4))
        }
    }

    fn width_of(img: &EncodedImage) -> u32 {
        image::load_from_memory(&img.decode().unwrap()).unwrap().width()
    }

    #[test]
    fn test_pages_rendered_in_order() {
        let encoder = PdfEncoder::new(Arc::new(FakeRasterizer::with_pages(3)));
        let images = encoder.encode(b"%PDF-").unwrap();
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|i| i.mime == "image/png"));
        let widths: Vec<u32> = images.iter().map(width_of).collect();
        assert_eq!(widths, vec![2, 4, 6]);
    }

    #[test]
    fn test_bad_page_is_skipped() {
        let mut fake = FakeRasterizer::with_pages(3);
        fake.broken.insert(2);
        let encoder = PdfEncoder::new(Arc::new(fake));
        let images = encoder.encode(b"%PDF-").unwrap();
        let widths: Vec<u32> = images.iter().map(width_of).collect();
        assert_eq!(widths, vec![2, 6]);
    }

    #[test]
    fn test_all_pages_failing_is_an_error() {
        let mut fake = FakeRasterizer::with_pages(2);
        fake.broken.extend([1, 2]);
        let encoder = PdfEncoder::new(Arc::new(fake));
        assert!(matches!(
            encoder.encode(b"%PDF-"),
            Err(AttachmentError::NoPages)
        ));
    }

    #[test]
    fn test_unavailable_renderer_fails_before_opening() {
        let mut fake = FakeRasterizer::with_pages(2);
        fake.available = false;
        let fake = Arc::new(fake);
        let encoder = PdfEncoder::new(fake.clone());
        assert!(matches!(
            encoder.encode(b"%PDF-"),
            Err(AttachmentError::RendererUnavailable(_))
        ));
        assert_eq!(fake.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zoom_is_passed_through() {
        let encoder = PdfEncoder::new(Arc::new(FakeRasterizer::with_pages(1))).with_zoom(3.0);
        let images = encoder.encode(b"%PDF-").unwrap();
        assert_eq!(width_of(&images[0]), 3);
    }

    #[test]
    fn test_large_pages_are_downscaled() {
        let big = png(400, 100);
        let fitted = fit_within(big, 200).unwrap();
        let img = image::load_from_memory(&fitted).unwrap();
        assert_eq!((img.width(), img.height()), (200, 50));

        let small = png(50, 20);
        assert_eq!(fit_within(small.clone(), 200).unwrap(), small);
    }

    #[test]
    fn test_max_dimension_applies_per_page() {
        let encoder =
            PdfEncoder::new(Arc::new(FakeRasterizer::with_pages(3))).with_max_dimension(4);
        let images = encoder.encode(b"%PDF-").unwrap();
        let widths: Vec<u32> = images.iter().map(width_of).collect();
        assert_eq!(widths, vec![2, 4, 4]);
    }
}

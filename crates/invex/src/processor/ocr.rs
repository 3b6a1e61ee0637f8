use std::io::Cursor;
use std::sync::Arc;

use crate::error::ProcessError;

/// Tesseract-backed optical recognition.
#[derive(Clone)]
pub struct OcrProcessor {
    inner: Arc<OcrProcessorInner>,
}

struct OcrProcessorInner {
    languages: String,
    dpi: u32,
}

impl OcrProcessor {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        let lang_str = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };

        Self {
            inner: Arc::new(OcrProcessorInner {
                languages: lang_str,
                dpi,
            }),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }

    /// Recognizes text in an image payload.
    pub fn process_image_bytes(&self, image_data: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.ocr").entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to load image: {}", e)))?;

        // Convert to PNG in memory for leptess.
        let mut png_data = Vec::new();
        let mut cursor = Cursor::new(&mut png_data);
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.inner.languages).map_err(|e| {
            ProcessError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))?;

        Ok(text)
    }
}

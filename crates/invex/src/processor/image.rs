use crate::error::ProcessError;
use crate::processor::ocr::OcrProcessor;
use crate::processor::DocumentProcessor;

/// Image attachments have no digital text layer; everything goes
/// through optical recognition.
pub struct ImageProcessor {
    ocr: OcrProcessor,
}

impl ImageProcessor {
    pub fn new(ocr: OcrProcessor) -> Self {
        Self { ocr }
    }
}

impl DocumentProcessor for ImageProcessor {
    fn extract_text(&self, data: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.image").entered();
        self.ocr.process_image_bytes(data)
    }

    fn supports(&self, mime_type: &str) -> bool {
        matches!(
            mime_type,
            "image/png" | "image/jpeg" | "image/gif" | "image/bmp" | "image/tiff" | "image/webp"
        )
    }
}

pub mod image;
pub mod ocr;
pub mod pdf;
pub mod text;

use crate::error::ProcessError;

/// Extracts plain text from one document payload.
pub trait DocumentProcessor: Send + Sync {
    fn extract_text(&self, data: &[u8]) -> Result<String, ProcessError>;
    fn supports(&self, mime_type: &str) -> bool;
}

/// Routes document bytes to a processor by MIME type.
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn DocumentProcessor>>,
}

impl ProcessorRegistry {
    pub fn new(ocr_enabled: bool, ocr_languages: &[String], ocr_dpi: u32) -> Self {
        let mut processors: Vec<Box<dyn DocumentProcessor>> =
            vec![Box::new(text::TextProcessor::new())];

        if ocr_enabled {
            let ocr = ocr::OcrProcessor::new(ocr_languages, ocr_dpi);
            processors.push(Box::new(image::ImageProcessor::new(ocr.clone())));
            processors.push(Box::new(pdf::PdfProcessor::new(Some(ocr))));
        } else {
            processors.push(Box::new(pdf::PdfProcessor::new(None)));
        }

        Self { processors }
    }

    /// Whether any processor handles this MIME type. Unsupported
    /// attachments are skipped upstream rather than failing the job.
    pub fn supports(&self, mime_type: &str) -> bool {
        self.processors.iter().any(|p| p.supports(mime_type))
    }

    /// Extracts text from `data`, routed by `mime_type`.
    pub fn extract_text(&self, data: &[u8], mime_type: &str) -> Result<String, ProcessError> {
        for processor in &self.processors {
            if processor.supports(mime_type) {
                return processor.extract_text(data);
            }
        }
        Err(ProcessError::UnsupportedType(mime_type.to_string()))
    }
}

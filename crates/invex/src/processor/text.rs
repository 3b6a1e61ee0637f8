use crate::error::ProcessError;
use crate::processor::DocumentProcessor;

pub struct TextProcessor;

impl TextProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for TextProcessor {
    fn extract_text(&self, data: &[u8]) -> Result<String, ProcessError> {
        Ok(String::from_utf8_lossy(data).into_owned())
    }

    fn supports(&self, mime_type: &str) -> bool {
        matches!(mime_type, "text/plain" | "text/csv" | "text/markdown")
    }
}

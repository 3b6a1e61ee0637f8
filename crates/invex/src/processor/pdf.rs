use std::process::Command;

use crate::error::ProcessError;
use crate::processor::ocr::OcrProcessor;
use crate::processor::DocumentProcessor;

/// PDF text extraction: digital text layer first, optical recognition
/// when the document has no usable text (scans, CID-font garbage).
pub struct PdfProcessor {
    ocr: Option<OcrProcessor>,
}

impl PdfProcessor {
    pub fn new(ocr: Option<OcrProcessor>) -> Self {
        Self { ocr }
    }
}

impl DocumentProcessor for PdfProcessor {
    fn extract_text(&self, data: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.pdf").entered();

        match lopdf::Document::load_mem(data) {
            Ok(doc) => {
                let mut text = extract_text_from_pdf(&doc);

                if should_use_ocr(&text) {
                    if let Some(ref ocr) = self.ocr {
                        let _ocr_span =
                            tracing::info_span!("processor.ocr_fallback", reason = "text_quality")
                                .entered();
                        text = self.ocr_pages(data, doc.get_pages().len(), ocr)?;
                    }
                }
                Ok(text)
            }
            Err(e) => {
                // lopdf can't parse this PDF (e.g. invalid cross-reference
                // table). Poppler handles more PDF variants, so OCR the
                // rendered pages instead.
                tracing::warn!("lopdf failed to parse PDF: {}. Falling back to OCR.", e);
                if let Some(ref ocr) = self.ocr {
                    let _ocr_span =
                        tracing::info_span!("processor.ocr_fallback", reason = "lopdf_parse_failed")
                            .entered();
                    let page_count = count_pdf_pages(data)?;
                    self.ocr_pages(data, page_count, ocr)
                } else {
                    Err(ProcessError::PdfProcessing(format!(
                        "Failed to load PDF: {}. OCR fallback unavailable.",
                        e
                    )))
                }
            }
        }
    }

    fn supports(&self, mime_type: &str) -> bool {
        mime_type == "application/pdf"
    }
}

impl PdfProcessor {
    fn ocr_pages(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
        ocr: &OcrProcessor,
    ) -> Result<String, ProcessError> {
        let mut all_text = String::new();

        for page_num in 1..=page_count {
            if let Ok(image_data) = render_pdf_page_to_image(pdf_bytes, page_num as u32, ocr.dpi())
            {
                if let Ok(page_text) = ocr.process_image_bytes(&image_data) {
                    all_text.push_str(&page_text);
                    all_text.push('\n');
                }
            }
        }

        Ok(all_text)
    }
}

fn extract_text_from_pdf(doc: &lopdf::Document) -> String {
    let mut text = String::new();

    for (page_num, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }

    text
}

/// Pattern for Identity-H Unimplemented errors (common with CID fonts).
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Minimum number of characters required before applying the
/// alphanumeric ratio check.
const MIN_TOTAL_CHARS: usize = 50;

/// Minimum percentage of alphanumeric characters required for extracted
/// text to be considered usable.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// Determines whether optical recognition should replace the extracted
/// text: empty output, font-encoding error markers only, or a very high
/// ratio of non-alphanumeric garbage.
fn should_use_ocr(text: &str) -> bool {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return true;
    }

    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");
    if cleaned.is_empty() {
        return true;
    }

    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();

    total_chars > MIN_TOTAL_CHARS
        && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
}

/// Gets the page count of a PDF using pdfinfo (poppler-utils). Used when
/// lopdf can't parse the PDF structure.
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<usize, ProcessError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("invex_pagecount_{}.pdf", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdfinfo").arg(&pdf_path).output().map_err(|e| {
        let _ = std::fs::remove_file(&pdf_path);
        ProcessError::PdfProcessing(format!(
            "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;

    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(count_str) = line.strip_prefix("Pages:") {
            if let Ok(count) = count_str.trim().parse::<usize>() {
                return Ok(count);
            }
        }
    }

    Ok(1)
}

/// Renders one PDF page to a PNG using pdftoppm (poppler-utils).
fn render_pdf_page_to_image(
    pdf_bytes: &[u8],
    page_num: u32,
    dpi: u32,
) -> Result<Vec<u8>, ProcessError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("invex_temp_{}.pdf", uuid::Uuid::new_v4()));
    let output_prefix = temp_dir.join(format!("invex_page_{}", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdftoppm")
        .args([
            "-png",
            "-r",
            &dpi.to_string(),
            "-f",
            &page_num.to_string(),
            "-l",
            &page_num.to_string(),
            &pdf_path.to_string_lossy(),
            &output_prefix.to_string_lossy(),
        ])
        .output()
        .map_err(|e| {
            ProcessError::PdfProcessing(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ProcessError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm suffixes the page number with varying zero-padding.
    let candidates = [
        format!("{}-{}.png", output_prefix.display(), page_num),
        format!("{}-{:02}.png", output_prefix.display(), page_num),
        format!("{}-{:03}.png", output_prefix.display(), page_num),
    ];
    let image_path = candidates
        .iter()
        .find(|p| std::path::Path::new(p).exists())
        .ok_or_else(|| {
            ProcessError::PdfProcessing("Failed to find rendered page image".to_string())
        })?;

    let image_data = std::fs::read(image_path).map_err(|e| {
        ProcessError::PdfProcessing(format!("Failed to read rendered image: {}", e))
    })?;

    let _ = std::fs::remove_file(image_path);

    Ok(image_data)
}

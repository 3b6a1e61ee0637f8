//! Field extractors.
//!
//! A fixed, ordered set of extractor variants, one per field. Each is a
//! pure function `text -> Option<FieldValue>`. When more than one
//! extractor proposes a value for the same field name, the highest
//! confidence wins and earlier build-time order breaks ties, so the
//! outcome never depends on iteration randomness.

use regex::Regex;
use serde_json::json;

use crate::model::{ExtractedFields, FieldValue, Provenance};

/// Characters of context kept around a match for provenance.
const SNIPPET_CONTEXT: usize = 50;

/// The build-time extractor order. Also the tie-break order.
pub struct FieldExtractorSet {
    extractors: Vec<FieldExtractor>,
}

impl FieldExtractorSet {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                FieldExtractor::Pattern(invoice_number_extractor()),
                FieldExtractor::Pattern(date_extractor()),
                FieldExtractor::Vendor(VendorNameExtractor::new()),
                FieldExtractor::Total(TotalAmountExtractor::new()),
                FieldExtractor::Pattern(subtotal_extractor()),
                FieldExtractor::Pattern(tax_extractor()),
                FieldExtractor::Currency(CurrencyExtractor::new()),
                FieldExtractor::LineItems(LineItemExtractor::new()),
            ],
        }
    }

    /// Runs every extractor over `text` and assembles the field map.
    pub fn extract_all(&self, text: &str) -> ExtractedFields {
        let mut out = ExtractedFields::new();
        for extractor in &self.extractors {
            if let Some(value) = extractor.extract(text) {
                match out.get(extractor.field()) {
                    // First-in-order wins ties, so only strictly higher
                    // confidence replaces an existing proposal.
                    Some(existing) if existing.confidence >= value.confidence => {}
                    _ => {
                        out.insert(extractor.field().to_string(), value);
                    }
                }
            }
        }
        out
    }

    /// Runs only the extractor(s) for one field name.
    pub fn extract_named(&self, field: &str, text: &str) -> Option<FieldValue> {
        let mut best: Option<FieldValue> = None;
        for extractor in &self.extractors {
            if extractor.field() != field {
                continue;
            }
            if let Some(value) = extractor.extract(text) {
                match &best {
                    Some(existing) if existing.confidence >= value.confidence => {}
                    _ => best = Some(value),
                }
            }
        }
        best
    }
}

impl Default for FieldExtractorSet {
    fn default() -> Self {
        Self::new()
    }
}

enum FieldExtractor {
    Pattern(PatternExtractor),
    Vendor(VendorNameExtractor),
    Total(TotalAmountExtractor),
    Currency(CurrencyExtractor),
    LineItems(LineItemExtractor),
}

impl FieldExtractor {
    fn field(&self) -> &'static str {
        match self {
            FieldExtractor::Pattern(e) => e.field,
            FieldExtractor::Vendor(_) => "vendor_name",
            FieldExtractor::Total(_) => "total_amount",
            FieldExtractor::Currency(_) => "currency",
            FieldExtractor::LineItems(_) => "line_items",
        }
    }

    fn extract(&self, text: &str) -> Option<FieldValue> {
        match self {
            FieldExtractor::Pattern(e) => e.extract(text),
            FieldExtractor::Vendor(e) => e.extract(text),
            FieldExtractor::Total(e) => e.extract(text),
            FieldExtractor::Currency(e) => e.extract(text),
            FieldExtractor::LineItems(e) => e.extract(text),
        }
    }
}

// ─── Shared helpers ─────────────────────────────────────────────────────────

/// Context window around a match, clamped to char boundaries.
fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let mut s = start.saturating_sub(SNIPPET_CONTEXT);
    while s > 0 && !text.is_char_boundary(s) {
        s -= 1;
    }
    let mut e = (end + SNIPPET_CONTEXT).min(text.len());
    while e < text.len() && !text.is_char_boundary(e) {
        e += 1;
    }
    text[s..e].trim().to_string()
}

/// Parses "11,210.00" style amounts.
fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

fn regex_provenance(pattern: &Regex, snippet: String) -> Provenance {
    Provenance {
        method: "regex".to_string(),
        pattern: Some(pattern.as_str().to_string()),
        snippet,
    }
}

// ─── Pattern ladder (invoice number, date, subtotal, tax) ───────────────────

struct LadderRung {
    regex: Regex,
    confidence: f64,
}

struct PatternExtractor {
    field: &'static str,
    numeric: bool,
    rungs: Vec<LadderRung>,
}

impl PatternExtractor {
    fn extract(&self, text: &str) -> Option<FieldValue> {
        for rung in &self.rungs {
            for caps in rung.regex.captures_iter(text) {
                let m = match caps.get(1) {
                    Some(m) => m,
                    None => continue,
                };

                let value = if self.numeric {
                    match parse_amount(m.as_str()) {
                        Some(v) => json!(v),
                        None => continue,
                    }
                } else {
                    json!(m.as_str())
                };

                return Some(FieldValue {
                    value,
                    confidence: rung.confidence,
                    provenance: regex_provenance(
                        &rung.regex,
                        snippet_around(text, m.start(), m.end()),
                    ),
                });
            }
        }
        None
    }
}

fn rung(pattern: &str, confidence: f64) -> LadderRung {
    LadderRung {
        // Patterns are compile-time constants; a failure here is a bug.
        regex: Regex::new(pattern).unwrap_or_else(|e| panic!("bad pattern '{}': {}", pattern, e)),
        confidence,
    }
}

fn invoice_number_extractor() -> PatternExtractor {
    PatternExtractor {
        field: "invoice_number",
        numeric: false,
        rungs: vec![
            rung(
                r"(?i)\binvoice\s*(?:no\.?|number)?(?:\s*[:#]\s*|\s+)([A-Za-z]{0,5}-?\d[A-Za-z0-9/-]*)",
                0.95,
            ),
            rung(
                r"(?i)\b(?:inv|bill|receipt)\s*(?:no\.?|number)?(?:\s*[:#]\s*|\s+)([A-Za-z]{0,5}-?\d[A-Za-z0-9/-]*)",
                0.9,
            ),
            rung(
                r"(?i)\border\s*(?:no\.?|number)?(?:\s*[:#]\s*|\s+)([A-Za-z]{0,5}-?\d[A-Za-z0-9/-]*)",
                0.85,
            ),
        ],
    }
}

fn date_extractor() -> PatternExtractor {
    PatternExtractor {
        field: "date",
        numeric: false,
        rungs: vec![
            rung(
                r"(?i)(?:invoice\s+)?date\s*:?\s*(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})",
                0.9,
            ),
            rung(r"\b(\d{4}-\d{2}-\d{2})\b", 0.8),
            rung(r"\b(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})\b", 0.7),
        ],
    }
}

fn subtotal_extractor() -> PatternExtractor {
    PatternExtractor {
        field: "subtotal",
        numeric: true,
        rungs: vec![rung(
            r"(?i)\bsub\s*total\s*:?\s*\$?\s*([\d,]+\.?\d*)",
            0.85,
        )],
    }
}

fn tax_extractor() -> PatternExtractor {
    PatternExtractor {
        field: "tax",
        numeric: true,
        rungs: vec![
            rung(r"(?i)\bsales\s+tax\s*:?\s*\$?\s*([\d,]+\.?\d*)", 0.85),
            rung(r"(?i)\btax(?:\s+amount)?\s*:?\s*\$?\s*([\d,]+\.?\d*)", 0.85),
        ],
    }
}

// ─── Total amount ───────────────────────────────────────────────────────────

/// Total-amount extraction with a priority ladder. A receipt usually
/// carries several totals; "Order Total" beats "Grand Total" beats
/// "Amount Due" beats the generic "Total" that may be a subtotal.
struct TotalAmountExtractor {
    rungs: Vec<(Regex, u32)>,
}

impl TotalAmountExtractor {
    fn new() -> Self {
        let ladder: [(&str, u32); 7] = [
            (r"(?i)order\s+total\s*:?\s*\$?\s*([\d,]+\.?\d*)", 100),
            (r"(?i)grand\s+total\s*:?\s*\$?\s*([\d,]+\.?\d*)", 90),
            (
                r"(?i)(?:amount|balance)\s+due\s*:?\s*\$?\s*([\d,]+\.?\d*)",
                85,
            ),
            (r"(?i)\bcharged\s*:?\s*\$?\s*([\d,]+\.?\d*)", 80),
            (r"(?i)\bpaid\s*\$?\s*([\d,]+\.\d{2})", 80),
            (r"(?i)invoice\s+total\s*:?\s*\$?\s*([\d,]+\.?\d*)", 60),
            (r"(?i)\btotal\s*(?:amount|due)?\s*:?\s*\$?\s*([\d,]+\.?\d*)", 50),
        ];
        Self {
            rungs: ladder
                .iter()
                .map(|(p, priority)| {
                    (
                        Regex::new(p).unwrap_or_else(|e| panic!("bad pattern '{}': {}", p, e)),
                        *priority,
                    )
                })
                .collect(),
        }
    }

    fn extract(&self, text: &str) -> Option<FieldValue> {
        // (priority desc, ladder rank asc, match position asc).
        let mut best: Option<(u32, usize, usize, f64, &Regex, (usize, usize))> = None;

        for (rank, (regex, priority)) in self.rungs.iter().enumerate() {
            for caps in regex.captures_iter(text) {
                let m = match caps.get(1) {
                    Some(m) => m,
                    None => continue,
                };
                let value = match parse_amount(m.as_str()) {
                    Some(v) => v,
                    None => continue,
                };

                let candidate = (*priority, rank, m.start(), value, regex, (m.start(), m.end()));
                let better = match &best {
                    None => true,
                    Some((bp, br, bs, ..)) => {
                        (*priority, std::cmp::Reverse(rank), std::cmp::Reverse(m.start()))
                            > (*bp, std::cmp::Reverse(*br), std::cmp::Reverse(*bs))
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
        }

        best.map(|(priority, _, _, value, regex, (start, end))| FieldValue {
            value: json!(value),
            confidence: if priority >= 80 { 0.95 } else { 0.85 },
            provenance: regex_provenance(regex, snippet_around(text, start, end)),
        })
    }
}

// ─── Vendor name ────────────────────────────────────────────────────────────

/// Vendor extraction scans the leading lines of the document for a
/// company-looking header, skipping greetings and message metadata so an
/// email opener like "Hi Pradeep" never becomes a vendor.
struct VendorNameExtractor {
    skip_starts: Vec<Regex>,
    caps_suffixed: Regex,
    mixed_suffixed: Regex,
    before_keyword: Regex,
    caps_lead: Regex,
    leading_article: Regex,
    greeting_value: Regex,
}

/// Lines to scan from the top of the document.
const VENDOR_SCAN_LINES: usize = 30;

const SKIP_PHRASES: [&str; 10] = [
    "good afternoon",
    "good morning",
    "good evening",
    "thank you for",
    "please find",
    "attached is",
    "hi ",
    "hello ",
    "dear ",
    "greetings",
];

impl VendorNameExtractor {
    fn new() -> Self {
        let compile = |p: &str| {
            Regex::new(p).unwrap_or_else(|e| panic!("bad pattern '{}': {}", p, e))
        };
        Self {
            skip_starts: vec![
                compile(r"(?i)^(?:good|hello|hi|dear|greetings|thank you|thanks|please find|attached)"),
                compile(r"(?i)^(?:from|to|subject|date|sent|received)\b"),
                compile(r"^[a-z]"),
            ],
            caps_suffixed: compile(
                r"^([A-Z][A-Z\s&.,'-]{3,60}(?:DEPOT|CONSTRUCTION|RECYCLING|SUPPLIES|SERVICES|STORE|LLC|INC|CORP))\b",
            ),
            mixed_suffixed: compile(
                r"^([A-Z][A-Za-z\s&.,'-]{3,60}(?:Pvt|Ltd|Inc|LLC|Corp|Corporation|Company))\b",
            ),
            before_keyword: compile(r"^([A-Z][A-Za-z\s&.,'-]{4,50})\s+(?:Customer|Receipt|Invoice)\b"),
            caps_lead: compile(r"^([A-Z][A-Z\s&.,'-]{4,50})"),
            leading_article: compile(r"(?i)^(?:the|an|a)\s+"),
            greeting_value: compile(r"(?i)^(?:good|hello|hi|dear)"),
        }
    }

    fn extract(&self, text: &str) -> Option<FieldValue> {
        for line in text.lines().take(VENDOR_SCAN_LINES) {
            let line = line.trim();
            if line.len() < 3 {
                continue;
            }

            let lower = line.to_lowercase();
            if SKIP_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
                continue;
            }
            if self.skip_starts.iter().any(|r| r.is_match(line)) {
                continue;
            }
            // A colon early in the line marks metadata ("Page: 1"),
            // unless the line itself names an invoice or receipt.
            let head: String = line.chars().take(15).collect();
            if head.contains(':')
                && !["customer", "receipt", "invoice", "order"]
                    .iter()
                    .any(|k| lower.contains(k))
            {
                continue;
            }

            let matched = self
                .caps_suffixed
                .captures(line)
                .or_else(|| self.mixed_suffixed.captures(line))
                .or_else(|| self.before_keyword.captures(line))
                .or_else(|| {
                    // Standalone mostly-uppercase multi-word line.
                    let words: Vec<&str> = line.split_whitespace().collect();
                    if words.len() >= 2 && line.len() >= 5 {
                        let upper_words = words
                            .iter()
                            .take(3)
                            .filter(|w| w.len() > 1 && w.chars().all(|c| !c.is_lowercase()))
                            .count();
                        if upper_words >= 2 {
                            return self.caps_lead.captures(line);
                        }
                    }
                    None
                });

            if let Some(caps) = matched {
                let raw = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                let vendor = self.leading_article.replace(raw, "").trim().to_string();

                if vendor.len() >= 3 && !self.greeting_value.is_match(&vendor) {
                    return Some(FieldValue {
                        value: json!(vendor),
                        confidence: 0.9,
                        provenance: Provenance {
                            method: "header_pattern".to_string(),
                            pattern: None,
                            snippet: line.to_string(),
                        },
                    });
                }
            }
        }
        None
    }
}

// ─── Currency ───────────────────────────────────────────────────────────────

struct CurrencyExtractor {
    code: Regex,
}

const SYMBOL_MAP: [(char, &str); 4] = [('$', "USD"), ('\u{20ac}', "EUR"), ('\u{a3}', "GBP"), ('\u{20b9}', "INR")];

impl CurrencyExtractor {
    fn new() -> Self {
        Self {
            code: Regex::new(r"\b(USD|EUR|GBP|INR|PLN|CAD|AUD|JPY|CHF)\b")
                .unwrap_or_else(|e| panic!("bad currency pattern: {}", e)),
        }
    }

    fn extract(&self, text: &str) -> Option<FieldValue> {
        if let Some(caps) = self.code.captures(text) {
            let m = caps.get(1)?;
            return Some(FieldValue {
                value: json!(m.as_str()),
                confidence: 0.8,
                provenance: regex_provenance(&self.code, snippet_around(text, m.start(), m.end())),
            });
        }

        for (offset, c) in text.char_indices() {
            if let Some((_, code)) = SYMBOL_MAP.iter().find(|(symbol, _)| *symbol == c) {
                return Some(FieldValue {
                    value: json!(code),
                    confidence: 0.6,
                    provenance: Provenance {
                        method: "symbol".to_string(),
                        pattern: None,
                        snippet: snippet_around(text, offset, offset + c.len_utf8()),
                    },
                });
            }
        }
        None
    }
}

// ─── Line items ─────────────────────────────────────────────────────────────

/// Line-item rows: "2  Widget bracket  $18.50" or "Consulting   450.00".
struct LineItemExtractor {
    qty_row: Regex,
    desc_row: Regex,
    summary_words: Regex,
}

impl LineItemExtractor {
    fn new() -> Self {
        let compile = |p: &str| {
            Regex::new(p).unwrap_or_else(|e| panic!("bad pattern '{}': {}", p, e))
        };
        Self {
            qty_row: compile(r"^\s*(\d{1,4})\s+(.{3,80}?)\s+\$?([\d,]+\.\d{2})\s*$"),
            desc_row: compile(r"^\s*([A-Za-z].{2,80}?)\s{2,}\$?([\d,]+\.\d{2})\s*$"),
            summary_words: compile(r"(?i)\b(?:sub\s*total|total|tax|amount\s+due|balance)\b"),
        }
    }

    fn extract(&self, text: &str) -> Option<FieldValue> {
        let mut items = Vec::new();

        for line in text.lines() {
            if self.summary_words.is_match(line) {
                continue;
            }

            if let Some(caps) = self.qty_row.captures(line) {
                let quantity = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
                let description = caps.get(2).map(|m| m.as_str().trim().to_string());
                let amount = caps.get(3).and_then(|m| parse_amount(m.as_str()));
                if let (Some(quantity), Some(description), Some(amount)) =
                    (quantity, description, amount)
                {
                    items.push(json!({
                        "description": description,
                        "quantity": quantity,
                        "amount": amount,
                    }));
                    continue;
                }
            }

            if let Some(caps) = self.desc_row.captures(line) {
                let description = caps.get(1).map(|m| m.as_str().trim().to_string());
                let amount = caps.get(2).and_then(|m| parse_amount(m.as_str()));
                if let (Some(description), Some(amount)) = (description, amount) {
                    items.push(json!({
                        "description": description,
                        "quantity": 1.0,
                        "amount": amount,
                    }));
                }
            }
        }

        if items.is_empty() {
            return None;
        }
        Some(FieldValue {
            value: json!(items),
            confidence: 0.85,
            provenance: Provenance {
                method: "table_extraction".to_string(),
                pattern: None,
                snippet: String::new(),
            },
        })
    }
}

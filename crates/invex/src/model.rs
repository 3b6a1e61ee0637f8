//! Domain types shared across the pipeline.
//!
//! The `extracted` map and suggestion lists are stored as JSON columns,
//! so everything here derives Serialize/Deserialize.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an extracted value came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Extraction method, e.g. "regex" or "header_pattern".
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Text fragment surrounding the match.
    pub snippet: String,
}

/// A single extracted field: value, confidence and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: serde_json::Value,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub provenance: Provenance,
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

/// Field name → extracted value. BTreeMap keeps serialization order stable.
pub type ExtractedFields = BTreeMap<String, FieldValue>;

/// Resolved/canonical values, populated incrementally by reconciliation
/// and later by manual correction (external).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizedFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    NeedsReview,
    AutoMatched,
    Manual,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::NeedsReview => "needs_review",
            ReconciliationStatus::AutoMatched => "auto_matched",
            ReconciliationStatus::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "needs_review" => Some(ReconciliationStatus::NeedsReview),
            "auto_matched" => Some(ReconciliationStatus::AutoMatched),
            "manual" => Some(ReconciliationStatus::Manual),
            _ => None,
        }
    }
}

/// A reconciliation candidate that scored in the suggestion band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub entry_id: i64,
    pub name: String,
    /// Similarity score, 0-100.
    pub score: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionSet {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vendors: Vec<Suggestion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<Suggestion>,
}

impl SuggestionSet {
    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty() && self.projects.is_empty()
    }
}

/// One extracted invoice, created exactly once per successful extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: String,
    pub source_message_id: String,
    pub raw_text: String,
    pub extracted: ExtractedFields,
    pub normalized: NormalizedFields,
    pub reconciliation_status: ReconciliationStatus,
    pub tags: Vec<String>,
    pub suggestions: SuggestionSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// Builds a fresh record for a first write.
    pub fn new(source_message_id: &str, raw_text: String, extracted: ExtractedFields) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_message_id: source_message_id.to_string(),
            raw_text,
            extracted,
            normalized: NormalizedFields::default(),
            reconciliation_status: ReconciliationStatus::NeedsReview,
            tags: vec![],
            suggestions: SuggestionSet::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Mean confidence of all extracted fields; 0.5 when nothing was
    /// extracted.
    pub fn mean_confidence(&self) -> f64 {
        if self.extracted.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.extracted.values().map(|f| f.confidence).sum();
        sum / self.extracted.len() as f64
    }

    /// Flattens the record into the shape returned to pollers.
    pub fn summary(&self) -> InvoiceSummary {
        let field_str = |name: &str| {
            self.extracted
                .get(name)
                .and_then(|f| f.as_str().map(|s| s.to_string()))
        };
        InvoiceSummary {
            vendor: self
                .normalized
                .vendor_name
                .clone()
                .or_else(|| field_str("vendor_name")),
            date: self.normalized.date.clone().or_else(|| field_str("date")),
            total_amount: self
                .normalized
                .total_amount
                .or_else(|| self.extracted.get("total_amount").and_then(|f| f.as_f64())),
            currency: self
                .normalized
                .currency
                .clone()
                .or_else(|| field_str("currency")),
            confidence: self.mean_confidence(),
        }
    }
}

/// The per-invoice slice of a successful job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub vendor: Option<String>,
    pub date: Option<String>,
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub confidence: f64,
}

/// Result payload attached to a job on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultPayload {
    pub invoice_records: Vec<InvoiceSummary>,
    pub summary_text: String,
    pub confidence: f64,
}

impl JobResultPayload {
    /// Builds the payload for a single reconciled invoice.
    pub fn for_invoice(invoice: &InvoiceRecord) -> Self {
        let summary = invoice.summary();

        let mut parts = Vec::new();
        if let Some(ref vendor) = summary.vendor {
            parts.push(format!("Vendor: {}", vendor));
        }
        if let Some(ref date) = summary.date {
            parts.push(format!("Date: {}", date));
        }
        if let Some(total) = summary.total_amount {
            let currency = summary.currency.as_deref().unwrap_or("");
            parts.push(format!("Total: {} {}", currency, total).trim().to_string());
        }
        let summary_text = if parts.is_empty() {
            "Invoice extracted with low confidence".to_string()
        } else {
            parts.join(" | ")
        };

        let confidence = summary.confidence;
        Self {
            invoice_records: vec![summary],
            summary_text,
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Vendor,
    Project,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::Vendor => "vendor",
            RegistryKind::Project => "project",
        }
    }
}

/// Canonical vendor or project, owned externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: i64,
    pub kind: RegistryKind,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub metadata: serde_json::Value,
}

impl RegistryEntry {
    /// Canonical name plus all aliases.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(|a| a.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: serde_json::Value, confidence: f64) -> FieldValue {
        FieldValue {
            value,
            confidence,
            provenance: Provenance {
                method: "regex".to_string(),
                pattern: None,
                snippet: String::new(),
            },
        }
    }

    #[test]
    fn test_mean_confidence_empty() {
        let invoice = InvoiceRecord::new("m1", String::new(), BTreeMap::new());
        assert_eq!(invoice.mean_confidence(), 0.5);
    }

    #[test]
    fn test_mean_confidence() {
        let mut extracted = BTreeMap::new();
        extracted.insert("a".to_string(), field(json!("x"), 0.9));
        extracted.insert("b".to_string(), field(json!("y"), 0.7));
        let invoice = InvoiceRecord::new("m1", String::new(), extracted);
        assert!((invoice.mean_confidence() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_summary_prefers_normalized() {
        let mut extracted = BTreeMap::new();
        extracted.insert("vendor_name".to_string(), field(json!("ACME SUPPLIES"), 0.9));
        extracted.insert("total_amount".to_string(), field(json!(10.0), 0.85));

        let mut invoice = InvoiceRecord::new("m1", String::new(), extracted);
        invoice.normalized.vendor_name = Some("ACME Supplies Pvt Ltd".to_string());

        let summary = invoice.summary();
        assert_eq!(summary.vendor.as_deref(), Some("ACME Supplies Pvt Ltd"));
        assert_eq!(summary.total_amount, Some(10.0));
    }

    #[test]
    fn test_result_payload_summary_text() {
        let mut extracted = BTreeMap::new();
        extracted.insert("vendor_name".to_string(), field(json!("ACME"), 0.9));
        extracted.insert("total_amount".to_string(), field(json!(42.5), 0.85));
        extracted.insert("currency".to_string(), field(json!("USD"), 0.8));

        let invoice = InvoiceRecord::new("m1", String::new(), extracted);
        let payload = JobResultPayload::for_invoice(&invoice);

        assert_eq!(payload.invoice_records.len(), 1);
        assert!(payload.summary_text.contains("Vendor: ACME"));
        assert!(payload.summary_text.contains("Total: USD 42.5"));
    }

    #[test]
    fn test_result_payload_fallback_text() {
        let invoice = InvoiceRecord::new("m1", String::new(), BTreeMap::new());
        let payload = JobResultPayload::for_invoice(&invoice);
        assert_eq!(payload.summary_text, "Invoice extracted with low confidence");
        assert_eq!(payload.confidence, 0.5);
    }

    #[test]
    fn test_reconciliation_status_round_trip() {
        for status in [
            ReconciliationStatus::NeedsReview,
            ReconciliationStatus::AutoMatched,
            ReconciliationStatus::Manual,
        ] {
            assert_eq!(ReconciliationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ReconciliationStatus::parse("bogus"), None);
    }

    #[test]
    fn test_registry_entry_all_names() {
        let entry = RegistryEntry {
            id: 1,
            kind: RegistryKind::Vendor,
            canonical_name: "ACME Supplies Pvt Ltd".to_string(),
            aliases: vec!["ACME Supplies".to_string(), "ACME".to_string()],
            metadata: json!({}),
        };
        let names: Vec<&str> = entry.all_names().collect();
        assert_eq!(
            names,
            vec!["ACME Supplies Pvt Ltd", "ACME Supplies", "ACME"]
        );
    }

    #[test]
    fn test_suggestion_set_serialization_skips_empty() {
        let set = SuggestionSet::default();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "{}");
        assert!(set.is_empty());
    }
}

//! Reconciliation engine.
//!
//! Matches extracted vendor/project names against the registry and
//! updates the invoice's normalized fields, status and suggestions.
//! Reads only: the registry is owned externally and may change between
//! jobs, so entries are loaded fresh per reconcile call.

use crate::config::ReconcileConfig;
use crate::db::{registry_repo, Database, DatabaseError};
use crate::model::{
    InvoiceRecord, ReconciliationStatus, RegistryEntry, RegistryKind, Suggestion,
};

use super::similarity::ratio;

pub struct ReconcileEngine {
    db: Database,
    config: ReconcileConfig,
}

/// Best-entry outcome for one extracted name.
struct MatchOutcome {
    best: Option<(i64, String, u8)>,
    suggestions: Vec<Suggestion>,
}

impl ReconcileEngine {
    pub fn new(db: Database, config: ReconcileConfig) -> Self {
        Self { db, config }
    }

    /// Reconciles one invoice in place. Returns whether anything changed.
    /// An absent or empty vendor/project name is not an error; the
    /// status simply stays as it was.
    pub fn reconcile(&self, invoice: &mut InvoiceRecord) -> Result<bool, DatabaseError> {
        let mut updated = false;

        let vendor_name = extracted_string(invoice, "vendor_name");
        if let Some(vendor_name) = vendor_name {
            let entries = registry_repo::list(&self.db, RegistryKind::Vendor)?;
            let outcome = self.match_name(&vendor_name, &entries);

            if let Some((entry_id, canonical_name, score)) = outcome.best {
                if score >= self.config.auto_match_threshold {
                    log::info!(
                        "Invoice {}: auto-matched vendor {} (score {})",
                        invoice.id,
                        entry_id,
                        score
                    );
                    invoice.normalized.vendor_id = Some(entry_id);
                    invoice.normalized.vendor_name = Some(canonical_name);
                    invoice.reconciliation_status = ReconciliationStatus::AutoMatched;
                    updated = true;
                } else if !outcome.suggestions.is_empty() {
                    invoice.suggestions.vendors = outcome.suggestions;
                    updated = true;
                }
            }
        }

        let project_name =
            extracted_string(invoice, "project_name").or_else(|| extracted_string(invoice, "project_code"));
        if let Some(project_name) = project_name {
            let entries = registry_repo::list(&self.db, RegistryKind::Project)?;
            let outcome = self.match_name(&project_name, &entries);

            if let Some((entry_id, canonical_name, score)) = outcome.best {
                if score >= self.config.auto_match_threshold {
                    log::info!(
                        "Invoice {}: auto-matched project {} (score {})",
                        invoice.id,
                        entry_id,
                        score
                    );
                    invoice.normalized.project_id = Some(entry_id);
                    invoice.normalized.project_name = Some(canonical_name);
                    invoice.reconciliation_status = ReconciliationStatus::AutoMatched;
                    updated = true;
                } else if !outcome.suggestions.is_empty() {
                    invoice.suggestions.projects = outcome.suggestions;
                    updated = true;
                }
            }
        }

        // Copy extracted totals into the normalized view.
        if let Some(total) = invoice.extracted.get("total_amount").and_then(|f| f.as_f64()) {
            if invoice.normalized.total_amount != Some(total) {
                invoice.normalized.total_amount = Some(total);
                updated = true;
            }
        }
        if let Some(currency) = extracted_string(invoice, "currency") {
            if invoice.normalized.currency.as_deref() != Some(currency.as_str()) {
                invoice.normalized.currency = Some(currency);
                updated = true;
            }
        }
        if let Some(date) = extracted_string(invoice, "date") {
            if invoice.normalized.date.as_deref() != Some(date.as_str()) {
                invoice.normalized.date = Some(date);
                updated = true;
            }
        }

        Ok(updated)
    }

    /// Scores `name` against every entry (canonical name and aliases,
    /// max per entry). The winner is the highest-scoring entry; equal
    /// scores resolve to the lowest registry id, which is fixed because
    /// `registry_repo::list` returns ascending ids and only a strictly
    /// higher score replaces the current best.
    fn match_name(&self, name: &str, entries: &[RegistryEntry]) -> MatchOutcome {
        let mut best: Option<(i64, String, u8)> = None;
        let mut suggestions: Vec<Suggestion> = Vec::new();

        for entry in entries {
            let score = entry
                .all_names()
                .map(|candidate| ratio(name, candidate))
                .max()
                .unwrap_or(0);

            if best.as_ref().map(|(_, _, s)| score > *s).unwrap_or(true) {
                best = Some((entry.id, entry.canonical_name.clone(), score));
            }

            if score >= self.config.suggest_threshold && score < self.config.auto_match_threshold
            {
                suggestions.push(Suggestion {
                    entry_id: entry.id,
                    name: entry.canonical_name.clone(),
                    score,
                });
            }
        }

        suggestions.sort_by(|a, b| b.score.cmp(&a.score).then(a.entry_id.cmp(&b.entry_id)));
        suggestions.truncate(self.config.max_suggestions);

        // Below the suggestion band nothing is recorded at all.
        if let Some((_, _, score)) = &best {
            if *score < self.config.suggest_threshold {
                return MatchOutcome {
                    best: None,
                    suggestions: vec![],
                };
            }
        }

        MatchOutcome { best, suggestions }
    }
}

fn extracted_string(invoice: &InvoiceRecord, field: &str) -> Option<String> {
    invoice
        .extracted
        .get(field)
        .and_then(|f| f.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

//! Candidate selector.
//!
//! Lists message previews an operator can pick from. Metadata only:
//! the selector never fetches bodies or attachments and never mutates
//! source state.

use std::sync::Arc;

use crate::error::{InvexError, Result};
use crate::source::{MessagePreview, MessageSource};

pub struct CandidateSelector {
    source: Arc<dyn MessageSource>,
}

impl CandidateSelector {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self { source }
    }

    /// Returns up to `max_count` previews matching `filter_expression`,
    /// preserving the source's return order.
    pub fn query(&self, filter_expression: &str, max_count: usize) -> Result<Vec<MessagePreview>> {
        if max_count == 0 {
            return Err(InvexError::Validation(
                "max_count must be at least 1".to_string(),
            ));
        }

        let mut previews = self.source.search(filter_expression, max_count)?;
        // Defensive truncation in case the source over-returns.
        previews.truncate(max_count);

        log::debug!(
            "Candidate query '{}' returned {} previews",
            filter_expression,
            previews.len()
        );
        Ok(previews)
    }
}

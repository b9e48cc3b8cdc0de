//! Import context
//!
//! Carries the identifiers of one import run so every log line, checkpoint
//! and audit record can be tied back to it.

use tracing::Span;

use crate::models::StatementImport;

/// Correlation-scoped context for one import run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportContext {
    pub correlation_id: String,
    pub import_id: i64,
    pub user_id: String,
    pub account_id: i64,
}

impl ImportContext {
    pub fn for_import(import: &StatementImport) -> Self {
        Self {
            correlation_id: import.correlation_id.clone(),
            import_id: import.id,
            user_id: import.user_id.clone(),
            account_id: import.account_id,
        }
    }

    /// Span that tags every event with the run's identifiers
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "import",
            correlation_id = %self.correlation_id,
            import_id = self.import_id,
            user_id = %self.user_id,
            account_id = self.account_id,
        )
    }

    /// Audit detail string carrying the correlation id
    pub fn audit_details(&self, details: serde_json::Value) -> String {
        let mut details = details;
        if let Some(obj) = details.as_object_mut() {
            obj.insert(
                "correlationId".into(),
                serde_json::Value::String(self.correlation_id.clone()),
            );
        }
        details.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ImportContext {
        ImportContext {
            correlation_id: "c-1".into(),
            import_id: 4,
            user_id: "user-1".into(),
            account_id: 2,
        }
    }

    #[test]
    fn test_audit_details_include_correlation_id() {
        let details = context().audit_details(json!({"rowIndex": 3}));
        let parsed: serde_json::Value = serde_json::from_str(&details).unwrap();
        assert_eq!(parsed["rowIndex"], 3);
        assert_eq!(parsed["correlationId"], "c-1");
    }

    #[test]
    fn test_span_is_named_import() {
        let span = context().span();
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "import");
        }
    }
}

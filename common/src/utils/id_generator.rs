//! Unique ID generator.

use uuid::Uuid;

/// Generates unique identifiers for the persisted entities.
pub struct IdGenerator;

impl IdGenerator {
    /// Generates a query ID.
    pub fn query_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates a materialized result ID.
    pub fn result_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates a query history entry ID.
    pub fn history_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates an approval request or review ID.
    pub fn approval_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Generates a preview transaction ID.
    pub fn transaction_id() -> String {
        format!("tx-{}", Uuid::new_v4().simple())
    }

    /// Generates a request ID.
    pub fn request_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_is_unique() {
        assert_ne!(IdGenerator::query_id(), IdGenerator::query_id());
    }

    #[test]
    fn test_transaction_id_prefix() {
        let id = IdGenerator::transaction_id();
        assert!(id.starts_with("tx-"));
        assert_eq!(id.len(), 35);
    }
}

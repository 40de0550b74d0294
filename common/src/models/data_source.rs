//! Data source models.
//!
//! A data source describes an external relational engine that queries run
//! against. Records are owned by the administration service; this crate only
//! reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Database engine enumeration. Fixed when the data source is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// MySQL and wire-compatible engines.
    MySQL,
    /// PostgreSQL and wire-compatible engines.
    Postgres,
}

impl DbType {
    /// Returns the default port for this database type.
    pub fn default_port(&self) -> u16 {
        match self {
            DbType::MySQL => 3306,
            DbType::Postgres => 5432,
        }
    }

    /// Parses the stored engine name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Some(DbType::MySQL),
            "postgres" | "postgresql" => Some(DbType::Postgres),
            _ => None,
        }
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::MySQL => write!(f, "mysql"),
            DbType::Postgres => write!(f, "postgres"),
        }
    }
}

/// A registered external database.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DataSource {
    /// Unique data source identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Database engine.
    pub db_type: DbType,
    pub host: String,
    pub port: u16,
    /// Database (schema) name.
    pub database: String,
    pub username: String,
    /// Encrypted password blob (never serialized in responses).
    #[serde(skip_serializing, default)]
    pub password_encrypted: String,
    /// Inactive data sources refuse new queries.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_db_type() {
        assert_eq!(DbType::parse("PostgreSQL"), Some(DbType::Postgres));
        assert_eq!(DbType::parse("mysql"), Some(DbType::MySQL));
        assert_eq!(DbType::parse("oracle"), None);
    }

    #[test]
    fn test_password_not_serialized() {
        let ds = DataSource {
            id: "ds-1".into(),
            name: "orders".into(),
            db_type: DbType::Postgres,
            host: "localhost".into(),
            port: 5432,
            database: "shop".into(),
            username: "app".into(),
            password_encrypted: "c2VjcmV0".into(),
            is_active: true,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&ds).unwrap();
        assert!(!json.contains("c2VjcmV0"));
        assert!(json.contains("\"db_type\":\"postgres\""));
    }
}

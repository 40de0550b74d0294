//! Utility functions and helpers.

pub mod crypto;
pub mod id_generator;
pub mod sql_classifier;

// Re-export commonly used types
pub use crypto::CredentialCipher;
pub use id_generator::IdGenerator;
pub use sql_classifier::{LexicalClassifier, StatementClassifier};

//! Error types for llmc_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for llmc_core operations.
#[derive(Error, Debug)]
pub enum LlmcError {
    /// Underlying SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database file is corrupted and could not be recovered.
    #[error("corrupted database at {}: {}", path.display(), reason)]
    CorruptedDatabase {
        /// Path to the corrupted database file.
        path: PathBuf,
        /// Description of the corruption.
        reason: String,
    },

    /// A worker attempted to modify a work item it does not own.
    #[error("worker '{worker_id}' does not own item {item_id} or item does not exist")]
    OwnershipError {
        /// Worker that attempted the operation.
        worker_id: String,
        /// Item it tried to operate on.
        item_id: i64,
    },

    /// I/O error during file or pipe operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error.
    #[error("configuration error: {0}")]
    Config(String),

    /// All backends in a cascade were exhausted without success.
    #[error("no backend reachable, attempts: {attempts:?}")]
    BackendExhausted {
        /// Description of every attempt made, in order.
        attempts: Vec<String>,
    },

    /// Enrichment payload failed schema or semantic validation.
    #[error("enrichment validation failed: {0}")]
    EnrichmentInvalid(String),

    /// Source file disappeared while it was being enriched or indexed.
    #[error("file vanished mid-operation: {}", .0.display())]
    FileVanished(PathBuf),

    /// A required value was missing from a typed config or environment.
    #[error("missing required setting: {0}")]
    MissingConfig(String),

    /// The schema/graph artifact could not be parsed.
    #[error("invalid graph artifact at {}: {}", path.display(), reason)]
    InvalidGraph {
        /// Path to the graph JSON file.
        path: PathBuf,
        /// Description of what's invalid.
        reason: String,
    },

    /// Graph store artifact not present and JSON fallback missing too.
    #[error("graph not found: {}", .0.display())]
    GraphNotFound(PathBuf),
}

impl LlmcError {
    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::CorruptedDatabase { .. } => {
                Some("The database was quarantined; run 'llmc doctor' then reindex to rebuild it.")
            }
            Self::BackendExhausted { .. } => {
                Some("Check that at least one configured LLM backend is reachable.")
            }
            Self::EnrichmentInvalid(_) => {
                Some("The backend's response did not satisfy the enrichment schema; it will be retried or escalated.")
            }
            Self::FileVanished(_) => {
                Some("The source file was deleted or moved during processing; rerun the indexer to pick up the deletion.")
            }
            Self::MissingConfig(_) => {
                Some("Set the missing value in llmc.toml or the corresponding environment variable.")
            }
            Self::GraphNotFound(_) => {
                Some("Run the schema/graph builder before querying graph-backed features.")
            }
            _ => None,
        }
    }
}

/// Convenience Result type for llmc_core operations.
pub type Result<T> = std::result::Result<T, LlmcError>;

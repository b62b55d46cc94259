//! The identity registry: one durable record per author.

use crate::AuthorRecord;
use crate::error::StorageError;
use std::collections::HashSet;

/// All access to author records goes through this interface.
///
/// Implementations must make `upsert_score` atomic per author and safe to call
/// concurrently for different authors.
pub trait Registry: Sync {
    /// Create an author if it does not exist. Creating an existing author is a no-op.
    fn create_author(&self, name: &str, verification_key: Option<&str>) -> Result<(), StorageError>;

    fn get_author(&self, name: &str) -> Result<Option<AuthorRecord>, StorageError>;

    fn author_names(&self) -> Result<HashSet<String>, StorageError>;

    /// Apply a reduced score: overwrite the current score, raise the max score if
    /// exceeded, and stamp `last_updated`. Creates the author if absent.
    fn upsert_score(
        &self,
        name: &str,
        score: f64,
        timestamp: i64,
    ) -> Result<AuthorRecord, StorageError>;

    /// Every record, highest current score first, ties by name.
    fn all_authors(&self) -> Result<Vec<AuthorRecord>, StorageError>;
}

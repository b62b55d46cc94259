//! Interfaces between the application code and database.

mod authors;
pub mod conversions;

pub use authors::*;

use crate::AuthorRecord;
use crate::error::StorageError;
use crate::registry::Registry;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use log::debug;
use std::collections::HashSet;

const POOL_SIZE: u32 = 8;
const BUSY_TIMEOUT_MS: u32 = 5000;
const IN_MEMORY_URL: &str = ":memory:";

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Applied to every pooled connection so concurrent writers wait instead of failing.
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Build a connection pool for a SQLite database path.
/// An in-memory database gets a single connection so every caller sees the same data.
///
/// # Errors
/// Returns an error if the pool cannot open its first connection.
pub fn get_connection_pool(database_url: &str) -> Result<DbPool, StorageError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let max_size = if database_url == IN_MEMORY_URL {
        1
    } else {
        POOL_SIZE
    };
    Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout_ms: BUSY_TIMEOUT_MS,
        }))
        .build(manager)
        .map_err(|e| StorageError::Connection(e.to_string()))
}

/// The registry backed by a SQLite `users` table.
pub struct DbRegistry {
    pool: DbPool,
}

impl DbRegistry {
    /// Open the database and make sure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the schema cannot be created.
    pub fn open(database_url: &str) -> Result<Self, StorageError> {
        debug!("Opening registry at {database_url}");
        let registry = Self {
            pool: get_connection_pool(database_url)?,
        };
        registry.init_schema()?;
        Ok(registry)
    }

    /// Create the `users` table if it does not exist.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub fn init_schema(&self) -> Result<(), StorageError> {
        let mut conn = self.connection()?;
        create_schema(&mut conn).map_err(StorageError::Query)
    }

    fn connection(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<ConnectionManager<SqliteConnection>>, StorageError>
    {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

impl Registry for DbRegistry {
    fn create_author(&self, name: &str, verification_key: Option<&str>) -> Result<(), StorageError> {
        let mut conn = self.connection()?;
        insert_author(&mut conn, name, verification_key).map_err(StorageError::Query)
    }

    fn get_author(&self, name: &str) -> Result<Option<AuthorRecord>, StorageError> {
        let mut conn = self.connection()?;
        get_author_by_name(&mut conn, name).map_err(StorageError::Query)
    }

    fn author_names(&self) -> Result<HashSet<String>, StorageError> {
        let mut conn = self.connection()?;
        get_all_author_names(&mut conn)
            .map(|names| names.into_iter().collect())
            .map_err(StorageError::Query)
    }

    fn upsert_score(
        &self,
        name: &str,
        score: f64,
        timestamp: i64,
    ) -> Result<AuthorRecord, StorageError> {
        let mut conn = self.connection()?;
        upsert_author_score(&mut conn, name, score, timestamp).map_err(StorageError::Query)
    }

    fn all_authors(&self) -> Result<Vec<AuthorRecord>, StorageError> {
        let mut conn = self.connection()?;
        get_all_authors_ranked(&mut conn).map_err(StorageError::Query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn registry() -> DbRegistry {
        DbRegistry::open(IN_MEMORY_URL).unwrap()
    }

    #[test_log::test]
    fn test_create_is_idempotent() {
        let registry = registry();
        registry.create_author("alice", Some("key-a")).unwrap();
        registry.create_author("alice", Some("key-b")).unwrap();

        let alice = registry.get_author("alice").unwrap().unwrap();
        assert_eq!(alice, AuthorRecord::new("alice", Some("key-a")));
        assert_eq!(registry.author_names().unwrap().len(), 1);
    }

    #[test_log::test]
    fn test_get_missing_author() {
        assert_eq!(registry().get_author("nobody").unwrap(), None);
    }

    #[test_log::test]
    fn test_schema_init_twice() {
        let registry = registry();
        registry.create_author("alice", None).unwrap();
        registry.init_schema().unwrap();
        assert!(registry.get_author("alice").unwrap().is_some());
    }

    #[test_log::test]
    fn test_upsert_tracks_max() {
        let registry = registry();
        registry.create_author("alice", Some("key")).unwrap();

        let scores = [10.0, 3.0, 12.5, -4.0, 12.0];
        let mut running_max = f64::NEG_INFINITY;
        for (i, score) in scores.iter().enumerate() {
            running_max = running_max.max(*score);
            let timestamp = 1000 * (i64::try_from(i).unwrap() + 1);
            let record = registry.upsert_score("alice", *score, timestamp).unwrap();
            assert_eq!(record.current_score, *score);
            assert_eq!(record.max_score, running_max.max(0.0));
            assert_eq!(record.last_updated, timestamp);
            assert_eq!(record.verification_key.as_deref(), Some("key"));
        }
    }

    #[test_log::test]
    fn test_upsert_creates_missing_author() {
        let registry = registry();
        let record = registry.upsert_score("bob", 7.0, 1000).unwrap();
        assert_eq!(record.current_score, 7.0);
        assert_eq!(record.max_score, 7.0);
        assert_eq!(record.verification_key, None);
    }

    #[test_log::test]
    fn test_upsert_is_idempotent() {
        let registry = registry();
        let first = registry.upsert_score("alice", 10.0, 1000).unwrap();
        let second = registry.upsert_score("alice", 10.0, 1000).unwrap();
        assert_eq!(first, second);
    }

    #[test_log::test]
    fn test_upsert_rejects_non_finite() {
        let registry = registry();
        assert!(registry.upsert_score("alice", f64::NAN, 1000).is_err());
        assert!(registry.upsert_score("alice", f64::INFINITY, 1000).is_err());
        assert_eq!(registry.get_author("alice").unwrap(), None);
    }

    #[test_log::test]
    fn test_all_authors_ranked() {
        let registry = registry();
        registry.upsert_score("a", 5.0, 1).unwrap();
        registry.upsert_score("c", 9.0, 1).unwrap();
        registry.upsert_score("b", 9.0, 1).unwrap();
        registry.create_author("d", None).unwrap();

        let names: Vec<String> = registry
            .all_authors()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["b", "c", "a", "d"]);
    }

    #[test_log::test]
    fn test_concurrent_upserts_for_distinct_authors() {
        let registry = registry();
        let names: Vec<String> = (0..32).map(|i| format!("student{i}")).collect();
        names.par_iter().for_each(|n| {
            registry.create_author(n, None).unwrap();
            registry.upsert_score(n, 1.0, 100).unwrap();
            registry.upsert_score(n, 2.0, 200).unwrap();
        });

        let all = registry.all_authors().unwrap();
        assert_eq!(all.len(), 32);
        assert!(all.iter().all(|r| r.current_score == 2.0 && r.last_updated == 200));
    }
}

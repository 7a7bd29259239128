//! Key-value store seam for presence data.
//!
//! Presence only needs a narrow slice of a TTL key-value store:
//!
//! - [`KvStore`]: the async contract (point reads, atomic batches, cursor
//!   scans, compare-and-delete).
//! - [`Command`] / [`Reply`]: the commands an atomic batch may contain.
//! - [`scan_pages`]: turns cursor scanning into a paged stream.
//! - [`MemoryStore`]: an in-process implementation with real TTL semantics,
//!   used by the node binary and throughout the test suites.

pub mod command;
pub mod error;
pub mod glob;
pub mod memory;
pub mod scan;

use async_trait::async_trait;

pub use command::{Command, Reply};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use scan::scan_pages;

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next [`KvStore::scan`] call; `None` once the
    /// keyspace has been fully traversed.
    pub next: Option<String>,
    /// Keys on this page that matched the pattern. May be empty even when
    /// `next` is `Some`.
    pub keys: Vec<String>,
}

/// Async contract of the external TTL key-value store.
///
/// Every method is a single network round trip in a remote implementation.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Whether a live (unexpired) value exists at `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Run `batch` atomically. Either every command is applied and one reply
    /// per command is returned in order, or none is applied and an error is
    /// returned.
    async fn exec(&self, batch: Vec<Command>) -> Result<Vec<Reply>, StoreError>;

    /// Examine up to `count` keys after `cursor` (`None` starts a new scan)
    /// and return those matching the glob `pattern`.
    ///
    /// Keys that exist for the whole duration of a scan are returned at least
    /// once.
    async fn scan(
        &self,
        cursor: Option<String>,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError>;

    /// Delete `key` only if its current value equals `expected`. Returns
    /// whether a key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;
}

//! Snapshot storage — trait + SQLite-backed implementation.
//!
//! Every completed scan is persisted as an immutable snapshot row: one
//! host, one point in time, the canonical JSON body plus its BLAKE3
//! content hash. Profiles (named scanner argument sets) live alongside
//! them. The store is the single serialization point for writes; each
//! snapshot row is written atomically.

pub mod hash;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use netdrift_core::HostResult;

pub use sqlite::SqliteStore;

/// Errors that can occur during snapshot storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Batch save stopped at index {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row in store: {0}")]
    Corrupt(String),
}

/// A named, reusable set of scanner arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub arguments: String,
    pub created_at: DateTime<Utc>,
}

/// One persisted scan result for one host at one point in time.
///
/// Immutable once created. The body is the canonical JSON serialization
/// of a [`HostResult`], stored as opaque text; `content_hash` is the
/// BLAKE3 hex digest of that body and detects whether a later scan is
/// byte-identical to this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Surrogate id (SQLite rowid).
    pub id: i64,
    /// Stable external identifier, assigned at creation.
    pub uuid: Uuid,
    /// Host address this snapshot describes.
    pub host: String,
    /// Host plus scanned-target qualifier, collision-free across range
    /// scans (`{host}@{target}`).
    pub host_subnet: String,
    /// Owning profile name.
    pub profile: String,
    /// Serialized result body.
    pub body: String,
    /// BLAKE3 hex hash of the body.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Parse the stored body back into a JSON value.
    pub fn body_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Query parameters for filtered snapshot retrieval.
#[derive(Debug, Default, Clone)]
pub struct SnapshotQuery {
    /// Match a single snapshot by UUID.
    pub uuid: Option<Uuid>,
    /// Filter by host address.
    pub host: Option<String>,
    /// Filter by owning profile name.
    pub profile: Option<String>,
    /// Only include snapshots created at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include snapshots created at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// Only include snapshots whose body contains at least one port in
    /// this state ("open", "closed", "filtered").
    pub port_state: Option<String>,
    /// Cap the number of returned snapshots.
    pub limit: Option<usize>,
    /// Chronologically ascending instead of the default newest-first.
    /// Diff pairing requires ascending order.
    pub ascending: bool,
}

/// Trait for snapshot persistence backends.
pub trait SnapshotStore: Send + Sync {
    /// Persist one snapshot row per host result, all under the given
    /// profile and scanned target expression.
    ///
    /// Each row is written atomically. The batch stops at the first
    /// failing row and reports its index via [`StoreError::Batch`];
    /// rows written before the failure remain.
    fn save(
        &self,
        profile: &str,
        target: &str,
        results: &[HostResult],
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<Snapshot>, StoreError>;

    /// Retrieve snapshots matching the query, newest-first unless
    /// `query.ascending` is set.
    fn get_filtered(&self, query: &SnapshotQuery) -> Result<Vec<Snapshot>, StoreError>;

    /// Look up a profile by name.
    fn get_profile(&self, name: &str) -> Result<Profile, StoreError>;

    /// Create or update a profile (upsert keyed by name). The original
    /// creation time is kept on re-save.
    fn save_profile(&self, name: &str, arguments: &str) -> Result<Profile, StoreError>;

    /// All stored profiles, ordered by name.
    fn list_profiles(&self) -> Result<Vec<Profile>, StoreError>;
}

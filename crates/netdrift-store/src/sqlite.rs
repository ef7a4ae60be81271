//! SQLite-backed snapshot store.
//!
//! One `rusqlite::Connection` behind a mutex serializes all writes.
//! Filtered queries build their `WHERE` clause dynamically; the
//! port-state filter inspects the JSON body and is therefore applied in
//! Rust after the SQL filters.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use netdrift_core::HostResult;

use crate::hash::canonical_body;
use crate::{Profile, Snapshot, SnapshotQuery, SnapshotStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    name        TEXT PRIMARY KEY,
    arguments   TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS snapshots (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid         TEXT NOT NULL UNIQUE,
    host         TEXT NOT NULL,
    host_subnet  TEXT NOT NULL,
    profile      TEXT NOT NULL,
    body         TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_host ON snapshots (host, created_at);
CREATE INDEX IF NOT EXISTS idx_snapshots_created ON snapshots (created_at);
";

/// Snapshot store backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_one(
        conn: &Connection,
        profile: &str,
        target: &str,
        result: &HostResult,
        created_at: DateTime<Utc>,
    ) -> Result<Snapshot, StoreError> {
        let (body, content_hash) = canonical_body(result)?;
        let uuid = Uuid::new_v4();
        let host_subnet = format!("{}@{}", result.host, target);

        conn.execute(
            "INSERT INTO snapshots (uuid, host, host_subnet, profile, body, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid.to_string(),
                result.host,
                host_subnet,
                profile,
                body,
                content_hash,
                encode_ts(created_at),
            ],
        )?;

        Ok(Snapshot {
            id: conn.last_insert_rowid(),
            uuid,
            host: result.host.clone(),
            host_subnet,
            profile: profile.to_string(),
            body,
            content_hash,
            created_at,
        })
    }
}

impl SnapshotStore for SqliteStore {
    fn save(
        &self,
        profile: &str,
        target: &str,
        results: &[HostResult],
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<Snapshot>, StoreError> {
        let conn = self.conn();
        let created = created_at.unwrap_or_else(Utc::now);
        let mut saved = Vec::with_capacity(results.len());

        for (index, result) in results.iter().enumerate() {
            match Self::insert_one(&conn, profile, target, result, created) {
                Ok(snapshot) => saved.push(snapshot),
                Err(e) => {
                    return Err(StoreError::Batch {
                        index,
                        source: Box::new(e),
                    })
                }
            }
        }

        tracing::debug!(
            profile = %profile,
            target = %target,
            count = saved.len(),
            "Snapshots saved"
        );

        Ok(saved)
    }

    fn get_filtered(&self, query: &SnapshotQuery) -> Result<Vec<Snapshot>, StoreError> {
        let conn = self.conn();

        let mut sql = String::from(
            "SELECT id, uuid, host, host_subnet, profile, body, content_hash, created_at \
             FROM snapshots",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(uuid) = &query.uuid {
            clauses.push("uuid = ?");
            args.push(uuid.to_string());
        }
        if let Some(host) = &query.host {
            clauses.push("host = ?");
            args.push(host.clone());
        }
        if let Some(profile) = &query.profile {
            clauses.push("profile = ?");
            args.push(profile.clone());
        }
        if let Some(from) = &query.from {
            clauses.push("created_at >= ?");
            args.push(encode_ts(*from));
        }
        if let Some(to) = &query.to {
            clauses.push("created_at <= ?");
            args.push(encode_ts(*to));
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(if query.ascending {
            " ORDER BY created_at ASC, id ASC"
        } else {
            " ORDER BY created_at DESC, id DESC"
        });
        // The port-state filter runs after the query, so the SQL limit
        // can only be applied when that filter is absent.
        if let (Some(limit), None) = (query.limit, &query.port_state) {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (id, uuid, host, host_subnet, profile, body, content_hash, created_at) = row?;
            snapshots.push(Snapshot {
                id,
                uuid: Uuid::parse_str(&uuid)
                    .map_err(|e| StoreError::Corrupt(format!("uuid {uuid}: {e}")))?,
                host,
                host_subnet,
                profile,
                body,
                content_hash,
                created_at: decode_ts(&created_at)?,
            });
        }

        if let Some(state) = &query.port_state {
            snapshots.retain(|s| has_port_state(s, state));
            if let Some(limit) = query.limit {
                snapshots.truncate(limit);
            }
        }

        Ok(snapshots)
    }

    fn get_profile(&self, name: &str) -> Result<Profile, StoreError> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT name, arguments, created_at FROM profiles WHERE name = ?1",
                params![name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((name, arguments, created_at)) => Ok(Profile {
                name,
                arguments,
                created_at: decode_ts(&created_at)?,
            }),
            None => Err(StoreError::ProfileNotFound(name.to_string())),
        }
    }

    fn save_profile(&self, name: &str, arguments: &str) -> Result<Profile, StoreError> {
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO profiles (name, arguments, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET arguments = excluded.arguments",
                params![name, arguments, encode_ts(Utc::now())],
            )?;
        }

        tracing::debug!(profile = %name, "Profile saved");
        self.get_profile(name)
    }

    fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT name, arguments, created_at FROM profiles ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut profiles = Vec::new();
        for row in rows {
            let (name, arguments, created_at) = row?;
            profiles.push(Profile {
                name,
                arguments,
                created_at: decode_ts(&created_at)?,
            });
        }
        Ok(profiles)
    }
}

/// Fixed-width RFC 3339 so lexicographic SQL comparisons match
/// chronological order.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {raw}: {e}")))
}

/// Whether any port in the snapshot body has the given state.
fn has_port_state(snapshot: &Snapshot, state: &str) -> bool {
    let Ok(body) = snapshot.body_value() else {
        return false;
    };
    body.get("ports")
        .and_then(|p| p.as_array())
        .is_some_and(|ports| {
            ports
                .iter()
                .any(|p| p.get("state").and_then(|s| s.as_str()) == Some(state))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use netdrift_core::PortRecord;

    fn host_result(host: &str, port: u16, state: &str) -> HostResult {
        HostResult {
            host: host.into(),
            status: "up".into(),
            ports: vec![PortRecord {
                portid: port,
                proto: "tcp".into(),
                state: state.into(),
                service: Some("ssh".into()),
                servicefp: None,
                service_product: None,
            }],
            os: vec![],
            osfingerprint: None,
            last_boot: None,
            hops: vec![],
        }
    }

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn save_assigns_identity_and_hash() {
        let store = SqliteStore::open_in_memory().unwrap();
        let saved = store
            .save(
                "standard",
                "10.0.1.0/24",
                &[host_result("10.0.1.1", 22, "open")],
                None,
            )
            .unwrap();

        assert_eq!(saved.len(), 1);
        let snap = &saved[0];
        assert_eq!(snap.host, "10.0.1.1");
        assert_eq!(snap.host_subnet, "10.0.1.1@10.0.1.0/24");
        assert_eq!(snap.profile, "standard");
        assert_eq!(snap.content_hash.len(), 64);
    }

    #[test]
    fn identical_bodies_share_hash_but_not_uuid() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = host_result("10.0.1.1", 22, "open");
        let first = store.save("p", "10.0.1.1", &[result.clone()], None).unwrap();
        let second = store.save("p", "10.0.1.1", &[result], None).unwrap();

        assert_eq!(first[0].content_hash, second[0].content_hash);
        assert_ne!(first[0].uuid, second[0].uuid);
        assert_ne!(first[0].id, second[0].id);
    }

    #[test]
    fn filters_and_ordering() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save("a", "t", &[host_result("10.0.1.1", 22, "open")], Some(ts(1)))
            .unwrap();
        store
            .save("b", "t", &[host_result("10.0.1.2", 80, "open")], Some(ts(2)))
            .unwrap();
        store
            .save("a", "t", &[host_result("10.0.1.1", 22, "closed")], Some(ts(3)))
            .unwrap();

        // Newest-first by default.
        let all = store.get_filtered(&SnapshotQuery::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].created_at > all[2].created_at);

        // Ascending for diff pairing.
        let asc = store
            .get_filtered(&SnapshotQuery {
                ascending: true,
                ..Default::default()
            })
            .unwrap();
        assert!(asc[0].created_at < asc[2].created_at);

        let by_host = store
            .get_filtered(&SnapshotQuery {
                host: Some("10.0.1.1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_host.len(), 2);

        let by_profile = store
            .get_filtered(&SnapshotQuery {
                profile: Some("b".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_profile.len(), 1);
        assert_eq!(by_profile[0].host, "10.0.1.2");

        let windowed = store
            .get_filtered(&SnapshotQuery {
                from: Some(ts(2)),
                to: Some(ts(2)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(windowed.len(), 1);

        let limited = store
            .get_filtered(&SnapshotQuery {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn filter_by_uuid() {
        let store = SqliteStore::open_in_memory().unwrap();
        let saved = store
            .save("p", "t", &[host_result("10.0.1.1", 22, "open")], None)
            .unwrap();

        let hit = store
            .get_filtered(&SnapshotQuery {
                uuid: Some(saved[0].uuid),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].uuid, saved[0].uuid);

        let miss = store
            .get_filtered(&SnapshotQuery {
                uuid: Some(Uuid::new_v4()),
                ..Default::default()
            })
            .unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn filter_by_port_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save("p", "t", &[host_result("10.0.1.1", 22, "open")], Some(ts(1)))
            .unwrap();
        store
            .save("p", "t", &[host_result("10.0.1.2", 22, "closed")], Some(ts(2)))
            .unwrap();

        let open = store
            .get_filtered(&SnapshotQuery {
                port_state: Some("open".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].host, "10.0.1.1");
    }

    #[test]
    fn batch_save_reports_stop_index() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.conn().execute("DROP TABLE snapshots", []).unwrap();

        let err = store
            .save(
                "p",
                "t",
                &[
                    host_result("10.0.1.1", 22, "open"),
                    host_result("10.0.1.2", 22, "open"),
                ],
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Batch { index: 0, .. }));
    }

    #[test]
    fn profile_upsert_and_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();

        let missing = store.get_profile("fast");
        assert!(matches!(missing, Err(StoreError::ProfileNotFound(_))));

        let first = store.save_profile("fast", "-T4 -F").unwrap();
        assert_eq!(first.arguments, "-T4 -F");

        let updated = store.save_profile("fast", "-T4 -F --open").unwrap();
        assert_eq!(updated.arguments, "-T4 -F --open");
        assert_eq!(updated.created_at, first.created_at);

        store.save_profile("deep", "-sS -sV -O -p-").unwrap();
        let names: Vec<String> = store
            .list_profiles()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["deep", "fast"]);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .save("p", "t", &[host_result("10.0.1.1", 22, "open")], None)
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let all = store.get_filtered(&SnapshotQuery::default()).unwrap();
        assert_eq!(all.len(), 1);
        let body = all[0].body_value().unwrap();
        assert_eq!(body["host"], "10.0.1.1");
    }
}

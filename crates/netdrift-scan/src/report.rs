//! Drift reporting: compose the snapshot store with the tree-diff
//! engine.
//!
//! Stored snapshots are fetched chronologically, grouped by host, and
//! diffed pairwise against their immediate predecessor. Imported result
//! sets (never persisted) go through the same normalization and diffing
//! but carry empty identity fields.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use netdrift_core::HostResult;
use netdrift_diff::{diff, port_dictionary, validate_body, DiffOptions, DiffTree};
use netdrift_store::hash::body_hash;
use netdrift_store::{Snapshot, SnapshotQuery, SnapshotStore};

use crate::error::{Result, ScanError};

/// Identity and generic metadata for one side of a diff.
///
/// The identity fields are `None` for imported result sets, which were
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotMeta {
    pub id: Option<i64>,
    pub uuid: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub host: String,
    pub profile: Option<String>,
    pub arguments: Option<String>,
}

impl SnapshotMeta {
    fn from_snapshot(snapshot: &Snapshot, arguments: Option<String>) -> Self {
        Self {
            id: Some(snapshot.id),
            uuid: Some(snapshot.uuid),
            created_at: Some(snapshot.created_at),
            host: snapshot.host.clone(),
            profile: Some(snapshot.profile.clone()),
            arguments,
        }
    }
}

/// The structured difference between two snapshots of the same host.
#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    pub newer: SnapshotMeta,
    pub older: SnapshotMeta,
    pub tree: DiffTree,
}

/// Parameters for a stored-snapshot diff request.
#[derive(Debug, Default, Clone)]
pub struct DiffRequest {
    /// Cap on the number of snapshots fetched from the store.
    pub limit: Option<usize>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub host: Option<String>,
    pub profile: Option<String>,
    /// Restrict the window to an explicit set of snapshot UUIDs.
    pub uuids: Option<Vec<Uuid>>,
    /// Cap on the number of diffs produced; falls back to the
    /// configured default.
    pub max_diffs: Option<usize>,
}

/// An externally supplied result set (e.g. one parsed nmap XML file).
#[derive(Debug, Clone)]
pub struct ImportedRun {
    /// Scanner argument string recorded in the file, if any.
    pub arguments: Option<String>,
    pub hosts: Vec<HostResult>,
}

/// Diff stored snapshots over a window.
///
/// Snapshots are grouped by host; within each host's chronologically
/// ascending history, each snapshot is compared to its immediate
/// predecessor. Byte-identical pairs (same content hash and same body)
/// and pairs that differ only in ignored fields are skipped and do not
/// count against the cap. At most `max_diffs` results are produced,
/// earliest qualifying pairs first. Hosts with fewer than two snapshots
/// yield nothing.
pub fn diff_stored(
    store: &dyn SnapshotStore,
    options: &DiffOptions,
    request: &DiffRequest,
    default_max_diffs: usize,
) -> Result<Vec<DiffResult>> {
    let mut snapshots = fetch_window(store, request)?;
    snapshots.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

    let max_diffs = request.max_diffs.unwrap_or(default_max_diffs);
    let mut results = Vec::new();

    // Group by host, preserving chronological order within each group.
    let mut by_host: std::collections::BTreeMap<&str, Vec<&Snapshot>> = Default::default();
    for snapshot in &snapshots {
        by_host.entry(snapshot.host.as_str()).or_default().push(snapshot);
    }

    'outer: for (host, history) in &by_host {
        if history.len() < 2 {
            tracing::debug!(host = %host, "Fewer than two snapshots, skipping");
            continue;
        }
        for pair in history.windows(2) {
            if results.len() >= max_diffs {
                break 'outer;
            }
            let (older, newer) = (pair[0], pair[1]);
            if identical(newer, older) {
                continue;
            }
            let result = diff_snapshot_pair(store, options, newer, older)?;
            // A pair that differs only in ignored fields diffs to an
            // empty tree; it is not drift and must not consume the cap.
            if result.tree.is_empty() {
                continue;
            }
            results.push(result);
        }
    }

    Ok(results)
}

/// Diff two explicitly chosen snapshots.
///
/// The pair must describe the same host; creation time decides which
/// side is newer. An identical pair yields `None`.
pub fn diff_pair(
    store: &dyn SnapshotStore,
    options: &DiffOptions,
    a: Uuid,
    b: Uuid,
) -> Result<Option<DiffResult>> {
    let first = fetch_by_uuid(store, a)?;
    let second = fetch_by_uuid(store, b)?;

    if first.host != second.host {
        return Err(ScanError::HostMismatch(
            first.host.clone(),
            second.host.clone(),
        ));
    }

    let (older, newer) = if (first.created_at, first.id) <= (second.created_at, second.id) {
        (&first, &second)
    } else {
        (&second, &first)
    };

    if identical(newer, older) {
        return Ok(None);
    }
    Ok(Some(diff_snapshot_pair(store, options, newer, older)?))
}

/// Diff two or more externally supplied result sets pairwise.
///
/// Consecutive runs are compared per host; the resulting `DiffResult`s
/// carry no identity fields, only the generic host/argument metadata
/// from each run.
pub fn diff_imported(options: &DiffOptions, runs: &[ImportedRun]) -> Result<Vec<DiffResult>> {
    if runs.len() < 2 {
        return Err(ScanError::NotEnoughInputs);
    }

    let mut results = Vec::new();
    for pair in runs.windows(2) {
        let (older_run, newer_run) = (&pair[0], &pair[1]);
        for newer_host in &newer_run.hosts {
            let Some(older_host) = older_run.hosts.iter().find(|h| h.host == newer_host.host)
            else {
                continue;
            };

            let newer_body = newer_host.to_body()?;
            let older_body = older_host.to_body()?;
            if newer_body == older_body && body_hash(&newer_body)? == body_hash(&older_body)? {
                continue;
            }
            validate_body(&newer_body)?;
            validate_body(&older_body)?;

            let tree = diff(
                &port_dictionary(&newer_body),
                &port_dictionary(&older_body),
                options,
            )?;
            if tree.is_empty() {
                continue;
            }
            results.push(DiffResult {
                newer: imported_meta(&newer_host.host, newer_run),
                older: imported_meta(&older_host.host, older_run),
                tree,
            });
        }
    }
    Ok(results)
}

fn imported_meta(host: &str, run: &ImportedRun) -> SnapshotMeta {
    SnapshotMeta {
        id: None,
        uuid: None,
        created_at: None,
        host: host.to_string(),
        profile: None,
        arguments: run.arguments.clone(),
    }
}

fn fetch_window(store: &dyn SnapshotStore, request: &DiffRequest) -> Result<Vec<Snapshot>> {
    if let Some(uuids) = &request.uuids {
        let mut snapshots = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            snapshots.push(fetch_by_uuid(store, *uuid)?);
        }
        return Ok(snapshots);
    }

    Ok(store.get_filtered(&SnapshotQuery {
        host: request.host.clone(),
        profile: request.profile.clone(),
        from: request.from,
        to: request.to,
        limit: request.limit,
        ascending: true,
        ..Default::default()
    })?)
}

fn fetch_by_uuid(store: &dyn SnapshotStore, uuid: Uuid) -> Result<Snapshot> {
    store
        .get_filtered(&SnapshotQuery {
            uuid: Some(uuid),
            ..Default::default()
        })?
        .into_iter()
        .next()
        .ok_or(ScanError::SnapshotNotFound(uuid))
}

/// Identical-pair check: both the content hash and the serialized body
/// must match (defensive — neither alone is authoritative).
fn identical(a: &Snapshot, b: &Snapshot) -> bool {
    a.content_hash == b.content_hash && a.body == b.body
}

fn diff_snapshot_pair(
    store: &dyn SnapshotStore,
    options: &DiffOptions,
    newer: &Snapshot,
    older: &Snapshot,
) -> Result<DiffResult> {
    let newer_body = newer.body_value()?;
    let older_body = older.body_value()?;
    validate_body(&newer_body)?;
    validate_body(&older_body)?;

    let tree = diff(
        &port_dictionary(&newer_body),
        &port_dictionary(&older_body),
        options,
    )?;

    Ok(DiffResult {
        newer: SnapshotMeta::from_snapshot(newer, profile_arguments(store, &newer.profile)),
        older: SnapshotMeta::from_snapshot(older, profile_arguments(store, &older.profile)),
        tree,
    })
}

fn profile_arguments(store: &dyn SnapshotStore, name: &str) -> Option<String> {
    store.get_profile(name).ok().map(|p| p.arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use netdrift_core::PortRecord;
    use netdrift_store::SqliteStore;

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

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_profile("standard", "-sS -sV").unwrap();
        store
    }

    #[test]
    fn adjacent_pairs_diffed_chronologically() {
        let store = seeded_store();
        store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "open")], Some(ts(1)))
            .unwrap();
        store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "closed")], Some(ts(2)))
            .unwrap();
        store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "filtered")], Some(ts(3)))
            .unwrap();

        let results = diff_stored(&store, &DiffOptions::default(), &DiffRequest::default(), 10)
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].older.created_at < results[0].newer.created_at);
        assert_eq!(results[0].newer.arguments.as_deref(), Some("-sS -sV"));
        assert_eq!(results[0].tree.leaf_count(), 1);
    }

    #[test]
    fn max_diffs_caps_at_earliest_pairs() {
        let store = seeded_store();
        for (i, state) in ["open", "closed", "filtered"].iter().enumerate() {
            store
                .save(
                    "standard",
                    "h",
                    &[host_result("10.0.1.1", 22, state)],
                    Some(ts(i as u32)),
                )
                .unwrap();
        }

        let request = DiffRequest {
            max_diffs: Some(1),
            ..Default::default()
        };
        let results = diff_stored(&store, &DiffOptions::default(), &request, 10).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].older.created_at, Some(ts(0)));
    }

    #[test]
    fn zero_max_diffs_returns_nothing() {
        let store = seeded_store();
        store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "open")], Some(ts(1)))
            .unwrap();
        store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "closed")], Some(ts(2)))
            .unwrap();

        let request = DiffRequest {
            max_diffs: Some(0),
            ..Default::default()
        };
        let results = diff_stored(&store, &DiffOptions::default(), &request, 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn ignored_only_drift_neither_reported_nor_counted() {
        let with_fp = |state: &str, fp: &str| {
            let mut result = host_result("10.0.1.1", 22, state);
            result.ports[0].servicefp = Some(fp.into());
            result
        };

        let store = seeded_store();
        store
            .save("standard", "h", &[with_fp("open", "SF-A")], Some(ts(1)))
            .unwrap();
        store
            .save("standard", "h", &[with_fp("open", "SF-B")], Some(ts(2)))
            .unwrap();
        store
            .save("standard", "h", &[with_fp("closed", "SF-B")], Some(ts(3)))
            .unwrap();

        // The (ts1, ts2) pair differs only in servicefp; even with the
        // cap at one it must not shadow the real (ts2, ts3) change.
        let request = DiffRequest {
            max_diffs: Some(1),
            ..Default::default()
        };
        let results = diff_stored(&store, &DiffOptions::default(), &request, 10).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].older.created_at, Some(ts(2)));
        assert_eq!(results[0].tree.leaf_count(), 1);
    }

    #[test]
    fn identical_consecutive_snapshots_skipped() {
        let store = seeded_store();
        let same = host_result("10.0.1.1", 22, "open");
        store.save("standard", "h", &[same.clone()], Some(ts(1))).unwrap();
        store.save("standard", "h", &[same], Some(ts(2))).unwrap();
        store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "closed")], Some(ts(3)))
            .unwrap();

        let results = diff_stored(&store, &DiffOptions::default(), &DiffRequest::default(), 10)
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].older.created_at, Some(ts(2)));
    }

    #[test]
    fn hosts_never_compared_across() {
        let store = seeded_store();
        store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "open")], Some(ts(1)))
            .unwrap();
        store
            .save("standard", "h", &[host_result("10.0.1.2", 22, "closed")], Some(ts(2)))
            .unwrap();

        let results = diff_stored(&store, &DiffOptions::default(), &DiffRequest::default(), 10)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn explicit_pair_by_uuid() {
        let store = seeded_store();
        let first = store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "open")], Some(ts(1)))
            .unwrap();
        let second = store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "closed")], Some(ts(2)))
            .unwrap();

        let result = diff_pair(
            &store,
            &DiffOptions::default(),
            second[0].uuid,
            first[0].uuid,
        )
        .unwrap()
        .unwrap();

        // Creation time decides sides regardless of argument order.
        assert_eq!(result.older.uuid, Some(first[0].uuid));
        assert_eq!(result.newer.uuid, Some(second[0].uuid));
    }

    #[test]
    fn pair_host_mismatch_rejected() {
        let store = seeded_store();
        let a = store
            .save("standard", "h", &[host_result("10.0.1.1", 22, "open")], Some(ts(1)))
            .unwrap();
        let b = store
            .save("standard", "h", &[host_result("10.0.1.2", 22, "open")], Some(ts(2)))
            .unwrap();

        let err = diff_pair(&store, &DiffOptions::default(), a[0].uuid, b[0].uuid).unwrap_err();
        assert!(matches!(err, ScanError::HostMismatch(_, _)));
    }

    #[test]
    fn identical_pair_yields_none() {
        let store = seeded_store();
        let same = host_result("10.0.1.1", 22, "open");
        let a = store.save("standard", "h", &[same.clone()], Some(ts(1))).unwrap();
        let b = store.save("standard", "h", &[same], Some(ts(2))).unwrap();

        let result = diff_pair(&store, &DiffOptions::default(), a[0].uuid, b[0].uuid).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn missing_uuid_is_an_error() {
        let store = seeded_store();
        let err = diff_pair(&store, &DiffOptions::default(), Uuid::new_v4(), Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, ScanError::SnapshotNotFound(_)));
    }

    #[test]
    fn imported_runs_carry_no_identity() {
        let runs = vec![
            ImportedRun {
                arguments: Some("nmap -sS old".into()),
                hosts: vec![host_result("10.0.1.1", 22, "open")],
            },
            ImportedRun {
                arguments: Some("nmap -sS new".into()),
                hosts: vec![host_result("10.0.1.1", 22, "closed")],
            },
        ];

        let results = diff_imported(&DiffOptions::default(), &runs).unwrap();
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert!(result.newer.id.is_none());
        assert!(result.newer.uuid.is_none());
        assert_eq!(result.newer.host, "10.0.1.1");
        assert_eq!(result.newer.arguments.as_deref(), Some("nmap -sS new"));
        assert_eq!(result.older.arguments.as_deref(), Some("nmap -sS old"));
        assert_eq!(result.tree.leaf_count(), 1);
    }

    #[test]
    fn import_requires_two_runs() {
        let runs = vec![ImportedRun {
            arguments: None,
            hosts: vec![host_result("10.0.1.1", 22, "open")],
        }];
        let err = diff_imported(&DiffOptions::default(), &runs).unwrap_err();
        assert!(matches!(err, ScanError::NotEnoughInputs));
    }

    #[test]
    fn invalid_stored_body_is_a_schema_error() {
        let store = seeded_store();
        let snapshot = |body: &str, secs: u32| Snapshot {
            id: secs as i64,
            uuid: Uuid::new_v4(),
            host: "10.0.1.1".into(),
            host_subnet: "10.0.1.1@t".into(),
            profile: "standard".into(),
            body: body.to_string(),
            content_hash: format!("h{secs}"),
            created_at: ts(secs),
        };

        let older = snapshot(r#"{"host":"10.0.1.1","status":"up"}"#, 1);
        let newer = snapshot(r#"{"host":"10.0.1.1","status":"up","ports":[]}"#, 2);

        let err =
            diff_snapshot_pair(&store, &DiffOptions::default(), &newer, &older).unwrap_err();
        assert!(matches!(err, ScanError::Diff(_)));
    }
}

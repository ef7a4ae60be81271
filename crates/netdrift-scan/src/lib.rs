//! netdrift-scan: Scan orchestration and drift reporting.
//!
//! Runs nmap scans as cancellable jobs, persists results as immutable
//! snapshots, and composes the snapshot store with the tree-diff engine
//! to answer "what changed since last time".

pub mod error;
pub mod executor;
pub mod nmap_xml;
pub mod orchestrator;
pub mod report;
pub mod target;

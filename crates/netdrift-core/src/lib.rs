//! netdrift-core: Shared types and configuration for the netdrift
//! differential scanner.
//!
//! This crate provides the foundational pieces used across all netdrift
//! components:
//! - The snapshot body schema (`HostResult`, `PortRecord`, `TraceHop`)
//! - Progress events emitted by scan workers
//! - Configuration management

pub mod config;
pub mod types;

pub use config::DriftConfig;
pub use types::{HostResult, PortRecord, ProgressEvent, TraceHop};

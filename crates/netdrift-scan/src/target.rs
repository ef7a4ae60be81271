//! Scan target validation.
//!
//! A target must be an IP address, a CIDR range, or a plausible
//! hostname. Rejected targets never reach the job queue.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::{Result, ScanError};

/// Validate a host/subnet expression before queueing a scan.
pub fn validate_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(ScanError::InvalidTarget(target.to_string()));
    }
    if target.parse::<IpAddr>().is_ok() || target.parse::<IpNet>().is_ok() {
        return Ok(());
    }
    if is_hostname(target) {
        return Ok(());
    }
    Err(ScanError::InvalidTarget(target.to_string()))
}

/// RFC 952/1123-ish hostname check: dot-separated labels of
/// alphanumerics and hyphens, no label starting or ending with a hyphen.
fn is_hostname(s: &str) -> bool {
    if s.len() > 253 {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

//! Core domain types for netdrift.
//!
//! `HostResult` is the normalized snapshot body: whatever the external
//! scan executor returns is converted into this shape before it is
//! hashed, stored, or diffed.

use serde::{Deserialize, Serialize};

/// One scanned host, normalized from raw scanner output.
///
/// The canonical JSON serialization of this struct is what the snapshot
/// store hashes and persists as the snapshot body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    /// Host address (IPv4/IPv6 or resolved name).
    pub host: String,
    /// Host status as reported by the scanner ("up", "down", ...).
    pub status: String,
    /// Discovered ports with their service metadata.
    #[serde(default)]
    pub ports: Vec<PortRecord>,
    /// OS guesses, best match first.
    #[serde(default)]
    pub os: Vec<String>,
    /// Raw OS fingerprint, if the scanner produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osfingerprint: Option<String>,
    /// Last boot time string from uptime detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_boot: Option<String>,
    /// Traceroute hops toward the host.
    #[serde(default)]
    pub hops: Vec<TraceHop>,
}

/// A single port observation on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub portid: u16,
    pub proto: String,
    /// Port state: "open", "closed", "filtered", ...
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Raw service fingerprint (varies between otherwise identical scans).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servicefp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_product: Option<String>,
}

/// One hop from a traceroute toward a scanned host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHop {
    pub ipaddr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Live progress events a scan worker forwards to whoever holds the
/// job's progress handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressEvent {
    /// The worker picked the job up and invoked the executor.
    Started { target: String },
    /// The executor returned; `hosts` is the number of host results.
    Finished { hosts: usize },
    /// The worker observed its cancellation token and exited.
    Cancelled,
    /// The executor call failed.
    Failed { error: String },
}

impl HostResult {
    /// Canonical JSON body for this host result.
    ///
    /// serde_json's object maps are key-sorted, so two structurally
    /// equal bodies always serialize identically.
    pub fn to_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HostResult {
        HostResult {
            host: "10.0.1.1".into(),
            status: "up".into(),
            ports: vec![PortRecord {
                portid: 22,
                proto: "tcp".into(),
                state: "open".into(),
                service: Some("ssh".into()),
                servicefp: None,
                service_product: Some("OpenSSH".into()),
            }],
            os: vec!["Linux 5.15".into()],
            osfingerprint: None,
            last_boot: None,
            hops: vec![],
        }
    }

    #[test]
    fn body_serialization_is_stable() {
        let a = sample().to_body().unwrap();
        let b = sample().to_body().unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn body_round_trips() {
        let body = sample().to_body().unwrap();
        let back: HostResult = serde_json::from_value(body).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn absent_options_are_omitted() {
        let body = sample().to_body().unwrap();
        assert!(body.get("osfingerprint").is_none());
        assert!(body["ports"][0].get("servicefp").is_none());
    }
}

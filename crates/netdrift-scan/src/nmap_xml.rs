//! Nmap XML output deserialization.
//!
//! Nmap's `-oX -` flag outputs structured XML to stdout. This module
//! provides typed Rust structs that deserialize from that XML using
//! `quick-xml` with serde, covering everything the snapshot body needs:
//! ports and services, OS matches and raw fingerprint, uptime, and
//! traceroute hops.

use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "@scanner")]
    pub scanner: Option<String>,
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub ports: Option<Ports>,
    pub os: Option<Os>,
    pub uptime: Option<Uptime>,
    pub trace: Option<Trace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type")]
    pub hostname_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<NmapPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapPort {
    #[serde(rename = "@protocol")]
    pub protocol: String,
    #[serde(rename = "@portid")]
    pub port_id: u16,
    pub state: PortState,
    pub service: Option<NmapService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapService {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
    #[serde(rename = "@servicefp")]
    pub servicefp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Os {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
    pub osfingerprint: Option<OsFingerprint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy")]
    pub accuracy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsFingerprint {
    #[serde(rename = "@fingerprint")]
    pub fingerprint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Uptime {
    #[serde(rename = "@seconds")]
    pub seconds: Option<u64>,
    #[serde(rename = "@lastboot")]
    pub lastboot: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trace {
    #[serde(rename = "hop", default)]
    pub hops: Vec<Hop>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hop {
    #[serde(rename = "@ipaddr")]
    pub ipaddr: String,
    #[serde(rename = "@host")]
    pub host: Option<String>,
}

impl NmapHost {
    /// The host address: IPv4 preferred, any other address type as a
    /// fallback.
    pub fn address(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "ipv4")
            .or_else(|| self.addresses.first())
            .map(|a| a.addr.as_str())
    }

    /// Check if the host is up.
    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| ScanError::XmlParse(format!("{e}")))
}

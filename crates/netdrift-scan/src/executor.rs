//! External scan executor boundary.
//!
//! The orchestrator only sees the [`ScanExecutor`] trait; the shipped
//! implementation wraps the nmap binary via `tokio::process::Command`
//! and normalizes its XML output into the snapshot body schema.

use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;

use netdrift_core::{HostResult, PortRecord, ProgressEvent, TraceHop};

use crate::error::{Result, ScanError};
use crate::nmap_xml::{self, NmapHost, NmapRun};

/// The external scan executor the orchestrator's workers block on.
///
/// Implementations report coarse progress through the provided channel;
/// the receiver end is handed to whoever submitted the job.
#[async_trait]
pub trait ScanExecutor: Send + Sync {
    async fn scan(
        &self,
        target: &str,
        arguments: &str,
        progress: &mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<Vec<HostResult>>;
}

/// Wrapper around the nmap binary.
pub struct NmapExecutor {
    nmap_path: String,
}

impl NmapExecutor {
    pub fn new(nmap_path: &str) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| ScanError::ScannerNotFound {
                path: self.nmap_path.clone(),
            })?;

        String::from_utf8(output.stdout).map_err(|e| ScanError::XmlParse(e.to_string()))
    }
}

#[async_trait]
impl ScanExecutor for NmapExecutor {
    /// Execute an nmap scan against the given target with the profile's
    /// argument string.
    ///
    /// Nmap is invoked with `-oX -` to write XML to stdout. The process
    /// runs under `tokio::process::Command` so it does not block the
    /// async runtime.
    async fn scan(
        &self,
        target: &str,
        arguments: &str,
        progress: &mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<Vec<HostResult>> {
        let start = Instant::now();

        tracing::info!(target = %target, arguments = %arguments, "Starting nmap scan");
        let _ = progress.send(ProgressEvent::Started {
            target: target.to_string(),
        });

        let output = Command::new(&self.nmap_path)
            .args(arguments.split_whitespace())
            .arg("-oX")
            .arg("-")
            .arg("--noninteractive")
            .arg(target)
            .output()
            .await
            .map_err(|e| ScanError::ScannerNotFound {
                path: format!("{}: {e}", self.nmap_path),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let err = ScanError::ScannerFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            };
            let _ = progress.send(ProgressEvent::Failed {
                error: err.to_string(),
            });
            return Err(err);
        }

        let run = nmap_xml::parse_nmap_xml(&output.stdout)?;
        let results = normalize_run(&run);

        tracing::info!(
            target = %target,
            hosts_up = results.len(),
            duration_ms = start.elapsed().as_millis(),
            "Nmap scan complete"
        );
        let _ = progress.send(ProgressEvent::Finished {
            hosts: results.len(),
        });

        Ok(results)
    }
}

/// Normalize parsed nmap output into snapshot bodies.
///
/// Down hosts and hosts without an address are dropped.
pub fn normalize_run(run: &NmapRun) -> Vec<HostResult> {
    run.hosts
        .iter()
        .filter(|h| h.is_up())
        .filter_map(normalize_host)
        .collect()
}

fn normalize_host(host: &NmapHost) -> Option<HostResult> {
    let address = host.address()?;

    let ports = host
        .ports
        .as_ref()
        .map(|ports| {
            ports
                .ports
                .iter()
                .map(|p| PortRecord {
                    portid: p.port_id,
                    proto: p.protocol.clone(),
                    state: p.state.state.clone(),
                    service: p.service.as_ref().map(|s| s.name.clone()),
                    servicefp: p.service.as_ref().and_then(|s| s.servicefp.clone()),
                    service_product: p.service.as_ref().and_then(|s| s.product.clone()),
                })
                .collect()
        })
        .unwrap_or_default();

    let os = host
        .os
        .as_ref()
        .map(|os| os.matches.iter().map(|m| m.name.clone()).collect())
        .unwrap_or_default();

    Some(HostResult {
        host: address.to_string(),
        status: host
            .status
            .as_ref()
            .map(|s| s.state.clone())
            .unwrap_or_else(|| "up".to_string()),
        ports,
        os,
        osfingerprint: host
            .os
            .as_ref()
            .and_then(|os| os.osfingerprint.as_ref())
            .map(|f| f.fingerprint.clone()),
        last_boot: host.uptime.as_ref().and_then(|u| u.lastboot.clone()),
        hops: host
            .trace
            .as_ref()
            .map(|t| {
                t.hops
                    .iter()
                    .map(|h| TraceHop {
                        ipaddr: h.ipaddr.clone(),
                        host: h.host.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    })
}

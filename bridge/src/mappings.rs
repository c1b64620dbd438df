// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The forwarder mapping table.
//!
//! One table describes every route across the bridge. Both the enclave and
//! the parent load the same table and resolve it into the half that runs on
//! their side, so the two halves always agree on port numbers:
//!
//! | direction | enclave listens | enclave dials | parent listens | parent dials |
//! |---|---|---|---|---|
//! | guest-to-host | `tcp:127.0.0.1:<guest_port>` | `vsock:3:<channel_port>` | `vsock:any:<channel_port>` | `tcp:<upstream>` |
//! | host-to-guest | `vsock:any:<channel_port>` | `tcp:127.0.0.1:<guest_port>` | `tcp:0.0.0.0:<guest_port>` | `vsock:<cid>:<channel_port>` |

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{MAPPING_TABLE_VERSION, PARENT_CID, SECRET_PORT};
use crate::endpoint::Endpoint;
use crate::errors::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    /// Outbound traffic originating inside the enclave.
    GuestToHost,
    /// Inbound traffic to a server running inside the enclave.
    HostToGuest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub id: String,
    pub label: String,
    pub direction: Direction,
    /// TCP port seen by the enclave application.
    pub guest_port: u16,
    /// vsock port carrying this route across the bridge.
    pub channel_port: u32,
    /// `host:port` the parent dials for outbound routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTable {
    pub version: u32,
    #[serde(default = "default_secret_port")]
    pub secret_port: u32,
    pub entries: Vec<MappingEntry>,
}

fn default_secret_port() -> u32 {
    SECRET_PORT
}

/// One side's resolved half of a mapping entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: String,
    pub direction: Direction,
    pub local: Endpoint,
    pub remote: Endpoint,
    pub label: String,
}

impl Mapping {
    pub fn signature(&self) -> String {
        self.local.signature()
    }
}

fn entry(
    id: &str,
    label: &str,
    direction: Direction,
    guest_port: u16,
    channel_port: u32,
) -> MappingEntry {
    MappingEntry {
        id: id.to_string(),
        label: label.to_string(),
        direction,
        guest_port,
        channel_port,
        upstream: None,
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        use Direction::{GuestToHost, HostToGuest};

        Self {
            version: MAPPING_TABLE_VERSION,
            secret_port: SECRET_PORT,
            entries: vec![
                entry("http", "HTTP passthrough", GuestToHost, 80, 8001),
                entry("https", "HTTPS passthrough", GuestToHost, 443, 8002),
                entry("http-alt", "Alt HTTP", GuestToHost, 8080, 8003),
                entry("https-alt", "Alt HTTPS", GuestToHost, 8443, 8004),
                entry("custom", "Custom app", GuestToHost, 9000, 8005),
                entry("api", "API exposure", HostToGuest, 3000, 3000),
            ],
        }
    }
}

impl MappingTable {
    /// Loads a table from a JSON file, or the built-in table when `path` is
    /// `None`. The result is always validated.
    pub fn load(path: Option<&Path>) -> Result<Self, BridgeError> {
        let table = match path {
            Some(path) => {
                let contents = std::fs::read(path).map_err(|err| {
                    BridgeError::InvalidMapping(format!("{}: {}", path.display(), err))
                })?;
                serde_json::from_slice(&contents).map_err(|err| {
                    BridgeError::InvalidMapping(format!("{}: {}", path.display(), err))
                })?
            }
            None => Self::default(),
        };

        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.version != MAPPING_TABLE_VERSION {
            return Err(BridgeError::InvalidMapping(format!(
                "unsupported version {} (expected {})",
                self.version, MAPPING_TABLE_VERSION
            )));
        }

        let mut ids = HashSet::new();
        let mut guest_ports = HashSet::new();
        let mut channel_ports = HashSet::new();

        for entry in &self.entries {
            if entry.id.is_empty() || entry.id.contains(char::is_whitespace) {
                return Err(BridgeError::InvalidMapping(format!(
                    "invalid mapping id {:?}",
                    entry.id
                )));
            }
            if !ids.insert(entry.id.as_str()) {
                return Err(BridgeError::InvalidMapping(format!(
                    "duplicate mapping id {}",
                    entry.id
                )));
            }
            if entry.guest_port == 0 || !guest_ports.insert(entry.guest_port) {
                return Err(BridgeError::InvalidMapping(format!(
                    "{}: guest port {} is zero or already mapped",
                    entry.id, entry.guest_port
                )));
            }
            if entry.channel_port == self.secret_port || !channel_ports.insert(entry.channel_port) {
                return Err(BridgeError::InvalidMapping(format!(
                    "{}: channel port {} collides with another route or the secret port",
                    entry.id, entry.channel_port
                )));
            }
            if let Some(upstream) = &entry.upstream {
                format!("tcp:{upstream}").parse::<Endpoint>().map_err(|_| {
                    BridgeError::InvalidMapping(format!(
                        "{}: upstream {:?} is not host:port",
                        entry.id, upstream
                    ))
                })?;
            }
        }

        Ok(())
    }

    pub fn secret_endpoint(&self) -> Endpoint {
        Endpoint::vsock_any(self.secret_port)
    }

    /// Resolves the enclave's half of every entry.
    pub fn guest_mappings(&self) -> Vec<Mapping> {
        self.entries
            .iter()
            .map(|entry| {
                let (local, remote) = match entry.direction {
                    Direction::GuestToHost => (
                        Endpoint::tcp("127.0.0.1", entry.guest_port),
                        Endpoint::vsock(PARENT_CID, entry.channel_port),
                    ),
                    Direction::HostToGuest => (
                        Endpoint::vsock_any(entry.channel_port),
                        Endpoint::tcp("127.0.0.1", entry.guest_port),
                    ),
                };
                entry.resolve(local, remote)
            })
            .collect()
    }

    /// Resolves the parent's half of every entry for the enclave at `cid`.
    /// Outbound routes without an explicit upstream dial
    /// `<egress_host>:<guest_port>`.
    pub fn host_mappings(&self, cid: u32, egress_host: &str) -> Vec<Mapping> {
        self.entries
            .iter()
            .map(|entry| {
                let (local, remote) = match entry.direction {
                    Direction::GuestToHost => {
                        let remote = match &entry.upstream {
                            Some(upstream) => Endpoint::Tcp(upstream.clone()),
                            None => Endpoint::tcp(egress_host, entry.guest_port),
                        };
                        (Endpoint::vsock_any(entry.channel_port), remote)
                    }
                    Direction::HostToGuest => (
                        Endpoint::tcp("0.0.0.0", entry.guest_port),
                        Endpoint::vsock(cid, entry.channel_port),
                    ),
                };
                entry.resolve(local, remote)
            })
            .collect()
    }

    /// Guest ports of outbound routes, i.e. the ports the redirector captures.
    pub fn outbound_ports(&self) -> Vec<u16> {
        self.entries
            .iter()
            .filter(|entry| entry.direction == Direction::GuestToHost)
            .map(|entry| entry.guest_port)
            .collect()
    }
}

impl MappingEntry {
    fn resolve(&self, local: Endpoint, remote: Endpoint) -> Mapping {
        Mapping {
            id: self.id.clone(),
            direction: self.direction,
            local,
            remote,
            label: self.label.clone(),
        }
    }
}

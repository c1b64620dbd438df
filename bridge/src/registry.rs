// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Forwarder handles and their on-disk registry.
//!
//! The supervisor writes every handle it created to `handles.json` once it
//! has verified them. Teardown reads the file back and stops each recorded
//! process. The file is replaced as a whole on every write (temp file +
//! rename), never appended to.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{REGISTRY_FILE_NAME, REGISTRY_VERSION};
use crate::errors::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleStatus {
    Starting,
    Live,
    Failed,
    Stopped,
}

impl fmt::Display for HandleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Starting => "starting",
            Self::Live => "live",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwarderHandle {
    pub mapping_id: String,
    pub process_id: Option<u32>,
    pub status: HandleStatus,
    /// Command-line argument identifying the forwarder process.
    pub signature: String,
    pub log_path: PathBuf,
}

impl ForwarderHandle {
    /// Moves the handle along its lifecycle. Only
    /// starting→live, starting→failed and live→stopped are allowed; any
    /// other request leaves the status untouched and returns `false`.
    pub fn transition(&mut self, next: HandleStatus) -> bool {
        let allowed = matches!(
            (self.status, next),
            (HandleStatus::Starting, HandleStatus::Live)
                | (HandleStatus::Starting, HandleStatus::Failed)
                | (HandleStatus::Live, HandleStatus::Stopped)
        );
        if allowed {
            self.status = next;
        }
        allowed
    }
}

/// What teardown needs to find a recorded forwarder process again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRef {
    pub mapping_id: String,
    pub process_id: u32,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    handles: Vec<ForwarderHandle>,
}

pub struct HandleRegistry {
    path: PathBuf,
}

impl HandleRegistry {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(REGISTRY_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the registry contents with `handles`.
    #[tracing::instrument(skip(self, handles), fields(path = %self.path.display()))]
    pub fn persist(&self, handles: &[ForwarderHandle]) -> Result<(), BridgeError> {
        let registry_err = |err: std::io::Error| {
            BridgeError::Registry(format!("{}: {}", self.path.display(), err))
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(registry_err)?;
        }

        let file = RegistryFile {
            version: REGISTRY_VERSION,
            handles: handles.to_vec(),
        };
        let contents = serde_json::to_vec_pretty(&file)
            .map_err(|err| BridgeError::Registry(err.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, contents).map_err(registry_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(registry_err)?;

        tracing::debug!("[bridge] persisted {} handles", handles.len());

        Ok(())
    }

    /// Reads every recorded handle. A missing registry is an empty one.
    pub fn load_handles(&self) -> Result<Vec<ForwarderHandle>, BridgeError> {
        let contents = match std::fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(BridgeError::Registry(format!(
                    "{}: {}",
                    self.path.display(),
                    err
                )));
            }
        };

        let file: RegistryFile = serde_json::from_slice(&contents)
            .map_err(|err| BridgeError::Registry(format!("{}: {}", self.path.display(), err)))?;

        if file.version != REGISTRY_VERSION {
            return Err(BridgeError::Registry(format!(
                "unsupported registry version {}",
                file.version
            )));
        }

        Ok(file.handles)
    }

    /// Process references of every recorded handle that has a PID, in
    /// registry order. Whether the processes still exist is not checked.
    pub fn load(&self) -> Result<Vec<ProcessRef>, BridgeError> {
        Ok(self
            .load_handles()?
            .into_iter()
            .filter_map(|handle| {
                handle.process_id.map(|process_id| ProcessRef {
                    mapping_id: handle.mapping_id,
                    process_id,
                    signature: handle.signature,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: &str, pid: Option<u32>, status: HandleStatus) -> ForwarderHandle {
        ForwarderHandle {
            mapping_id: id.to_string(),
            process_id: pid,
            status,
            signature: format!("--listen=tcp:127.0.0.1:{}", 1000 + pid.unwrap_or(0)),
            log_path: PathBuf::from(format!("/tmp/{id}.log")),
        }
    }

    #[test]
    fn test_transitions() {
        let mut h = handle("a", Some(1), HandleStatus::Starting);
        assert!(!h.transition(HandleStatus::Stopped));
        assert!(h.transition(HandleStatus::Live));
        assert!(!h.transition(HandleStatus::Failed));
        assert!(h.transition(HandleStatus::Stopped));
        assert_eq!(h.status, HandleStatus::Stopped);

        let mut h = handle("b", Some(2), HandleStatus::Starting);
        assert!(h.transition(HandleStatus::Failed));
        assert!(!h.transition(HandleStatus::Live));
        assert_eq!(h.status, HandleStatus::Failed);
    }

    #[test]
    fn test_load_missing_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path());
        assert!(registry.load().unwrap().is_empty());
    }

    #[test]
    fn test_persist_then_load_keeps_order_and_skips_missing_pids() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(&dir.path().join("nested"));

        let handles = vec![
            handle("http", Some(101), HandleStatus::Live),
            handle("https", None, HandleStatus::Failed),
            handle("api", Some(103), HandleStatus::Live),
        ];
        registry.persist(&handles).unwrap();

        assert_eq!(registry.load_handles().unwrap(), handles);

        let refs = registry.load().unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].mapping_id, "http");
        assert_eq!(refs[0].process_id, 101);
        assert_eq!(refs[1].mapping_id, "api");
        assert_eq!(refs[1].signature, "--listen=tcp:127.0.0.1:1103");
    }

    #[test]
    fn test_persist_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path());

        registry
            .persist(&[handle("old", Some(1), HandleStatus::Live)])
            .unwrap();
        registry
            .persist(&[handle("new", Some(2), HandleStatus::Live)])
            .unwrap();

        let refs = registry.load().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].mapping_id, "new");
        assert!(!registry.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&HandleStatus::Live).unwrap();
        assert_eq!(json, r#""live""#);
        assert_eq!(HandleStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_corrupt_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path());
        std::fs::write(registry.path(), b"garbage").unwrap();
        assert!(matches!(registry.load(), Err(BridgeError::Registry(_))));
    }
}

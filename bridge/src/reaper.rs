// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Conflict reaping and teardown of forwarder processes.
//!
//! Every forwarder is started as `<program> forward ... --listen=<endpoint>`.
//! That exact `--listen=` token is the forwarder's signature: the reaper
//! terminates any process whose command line carries both the `forward`
//! subcommand and the signature of a mapping about to be (re)started.
//! Arguments are compared whole, so `tcp:127.0.0.1:80` never matches
//! `tcp:127.0.0.1:8080`.
//!
//! After signalling, the reaper waits (with backoff) for each process to
//! disappear and for the local endpoint to become bindable again, instead of
//! sleeping for a fixed time.

use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::backoff::Backoff;
use crate::constants::{
    BIND_RETRY_INITIAL_DELAY, BIND_RETRY_MAX_DELAY, FORWARD_SUBCOMMAND, REAP_EXIT_ATTEMPTS,
    REAP_RELEASE_ATTEMPTS,
};
use crate::endpoint::{Endpoint, bind_with_backoff};
use crate::errors::BridgeError;
use crate::mappings::Mapping;
use crate::registry::{HandleRegistry, HandleStatus, ProcessRef};

const PROC_ROOT: &str = "/proc";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapSummary {
    /// PIDs that were signalled.
    pub terminated: Vec<u32>,
    /// Endpoints still unavailable after the release wait.
    pub busy: Vec<Endpoint>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownSummary {
    /// Mapping ids whose process was signalled.
    pub stopped: Vec<String>,
    /// Mapping ids whose process had already exited or whose PID was reused.
    pub skipped: Vec<String>,
}

/// Terminates stale forwarders for `mappings` and waits for their local
/// endpoints to be released. A no-op when nothing matches.
#[tracing::instrument(skip(mappings), fields(mappings = mappings.len()))]
pub async fn reap(mappings: &[Mapping]) -> ReapSummary {
    let mut summary = ReapSummary::default();
    let mut contested = Vec::new();

    for mapping in mappings {
        let signature = mapping.signature();
        let pids = find_matching(&signature);
        if pids.is_empty() {
            continue;
        }

        for pid in pids {
            if terminate(pid) {
                tracing::info!(
                    "[bridge] terminated stale forwarder {} (pid {})",
                    mapping.id,
                    pid
                );
                summary.terminated.push(pid);
            }
        }
        contested.push(mapping.local.clone());
    }

    for pid in &summary.terminated {
        if !wait_for_exit(*pid).await {
            tracing::warn!("[bridge] pid {} still running after SIGTERM", pid);
        }
    }

    for endpoint in contested {
        match bind_with_backoff(&endpoint, REAP_RELEASE_ATTEMPTS).await {
            Ok(listener) => drop(listener),
            Err(BridgeError::PortInUse(_)) => {
                tracing::warn!("[bridge] {} is still in use after reaping", endpoint);
                summary.busy.push(endpoint);
            }
            // not a contention problem; the forwarder will report it
            Err(err) => tracing::debug!("[bridge] unable to check {}: {}", endpoint, err),
        }
    }

    summary
}

/// Stops every recorded process that still carries its signature.
#[tracing::instrument(skip(refs), fields(refs = refs.len()))]
pub async fn stop_recorded(refs: &[ProcessRef]) -> TeardownSummary {
    let mut summary = TeardownSummary::default();
    let mut signalled = Vec::new();

    for process in refs {
        let owned = read_cmdline(process.process_id)
            .is_some_and(|args| cmdline_matches(&args, &process.signature));

        if owned && terminate(process.process_id) {
            tracing::info!(
                "[bridge] stopped forwarder {} (pid {})",
                process.mapping_id,
                process.process_id
            );
            summary.stopped.push(process.mapping_id.clone());
            signalled.push(process.process_id);
        } else {
            tracing::debug!(
                "[bridge] forwarder {} (pid {}) already gone",
                process.mapping_id,
                process.process_id
            );
            summary.skipped.push(process.mapping_id.clone());
        }
    }

    for pid in signalled {
        wait_for_exit(pid).await;
    }

    summary
}

/// Stops everything the registry recorded and marks those handles stopped.
pub async fn teardown(registry: &HandleRegistry) -> Result<TeardownSummary, BridgeError> {
    let refs = registry.load()?;
    let summary = stop_recorded(&refs).await;

    let mut handles = registry.load_handles()?;
    if !handles.is_empty() {
        for handle in handles.iter_mut() {
            handle.transition(HandleStatus::Stopped);
        }
        registry.persist(&handles)?;
    }

    Ok(summary)
}

pub fn cmdline_matches(args: &[String], signature: &str) -> bool {
    args.iter().any(|arg| arg == FORWARD_SUBCOMMAND) && args.iter().any(|arg| arg == signature)
}

/// PIDs of every other process whose command line carries `signature`.
pub fn find_matching(signature: &str) -> Vec<u32> {
    let own_pid = std::process::id();

    let entries = match std::fs::read_dir(PROC_ROOT) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("[bridge] cannot read {}: {}", PROC_ROOT, err);
            return Vec::new();
        }
    };

    let mut pids: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| *pid != own_pid)
        .filter(|pid| {
            read_cmdline(*pid).is_some_and(|args| cmdline_matches(&args, signature))
        })
        .collect();
    pids.sort_unstable();
    pids
}

fn read_cmdline(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(Path::new(PROC_ROOT).join(pid.to_string()).join("cmdline")).ok()?;
    Some(
        raw.split(|byte| *byte == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect(),
    )
}

/// A process counts as alive until it is gone or a zombie.
fn process_alive(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(Path::new(PROC_ROOT).join(pid.to_string()).join("stat"))
    else {
        return false;
    };

    // the state follows the parenthesised command name, which may contain spaces
    match stat.rsplit_once(')') {
        Some((_, rest)) => !matches!(rest.trim_start().chars().next(), Some('Z' | 'X')),
        None => true,
    }
}

/// Sends SIGTERM. Returns `false` when the process no longer exists.
fn terminate(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(err) => {
            tracing::warn!("[bridge] unable to signal pid {}: {}", pid, err);
            false
        }
    }
}

async fn wait_for_exit(pid: u32) -> bool {
    let mut backoff = Backoff::new(REAP_EXIT_ATTEMPTS, BIND_RETRY_INITIAL_DELAY, BIND_RETRY_MAX_DELAY);
    loop {
        if !process_alive(pid) {
            return true;
        }
        match backoff.next_delay() {
            Some(delay) => tokio::time::sleep(delay).await,
            None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::Direction;
    use std::process::{Child, Command};

    fn mapping(local: Endpoint) -> Mapping {
        Mapping {
            id: "test".to_string(),
            direction: Direction::GuestToHost,
            local,
            remote: Endpoint::vsock(3, 8001),
            label: "test".to_string(),
        }
    }

    /// Spawns a process whose command line looks like a forwarder's.
    fn fake_forwarder(signature: &str) -> Child {
        Command::new("sh")
            .args(["-c", "sleep 30; true", FORWARD_SUBCOMMAND, signature])
            .spawn()
            .unwrap()
    }

    fn unused_endpoint() -> Endpoint {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        Endpoint::Tcp(listener.local_addr().unwrap().to_string())
    }

    // ==================== Matching Tests ====================

    #[test]
    fn test_cmdline_matches_exact_arguments_only() {
        let args: Vec<String> = ["parent-bridge", "forward", "--listen=tcp:127.0.0.1:8080"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert!(cmdline_matches(&args, "--listen=tcp:127.0.0.1:8080"));
        assert!(!cmdline_matches(&args, "--listen=tcp:127.0.0.1:80"));
        assert!(!cmdline_matches(&args, "--listen=tcp:127.0.0.1:808"));
    }

    #[test]
    fn test_cmdline_requires_forward_subcommand() {
        let args: Vec<String> = ["vim", "--listen=tcp:127.0.0.1:80"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(!cmdline_matches(&args, "--listen=tcp:127.0.0.1:80"));
    }

    #[test]
    fn test_own_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(u32::MAX));
    }

    // ==================== Reaping Tests ====================

    #[tokio::test]
    async fn test_reap_with_nothing_running_is_noop() {
        let summary = reap(&[mapping(unused_endpoint())]).await;
        assert_eq!(summary, ReapSummary::default());
    }

    #[tokio::test]
    async fn test_reap_terminates_matching_process() {
        let local = unused_endpoint();
        let mut child = fake_forwarder(&local.signature());
        let pid = child.id();

        // wait until the child's command line is visible
        for _ in 0..50 {
            if find_matching(&local.signature()).contains(&pid) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let summary = reap(&[mapping(local.clone())]).await;
        assert_eq!(summary.terminated, vec![pid]);
        assert!(summary.busy.is_empty());

        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(find_matching(&local.signature()).is_empty());
    }

    #[tokio::test]
    async fn test_reap_reports_port_still_held() {
        // the endpoint stays bound by a process that is not a forwarder
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let local = Endpoint::Tcp(held.local_addr().unwrap().to_string());
        let mut child = fake_forwarder(&local.signature());
        let pid = child.id();

        for _ in 0..50 {
            if find_matching(&local.signature()).contains(&pid) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let summary = reap(&[mapping(local.clone())]).await;
        assert_eq!(summary.terminated, vec![pid]);
        assert_eq!(summary.busy, vec![local]);

        assert!(!child.wait().unwrap().success());
        drop(held);
    }

    #[tokio::test]
    async fn test_reap_leaves_other_ports_alone() {
        let local = unused_endpoint();
        let other = unused_endpoint();
        let mut child = fake_forwarder(&other.signature());

        let summary = reap(&[mapping(local)]).await;
        assert!(!summary.terminated.contains(&child.id()));
        assert!(matches!(child.try_wait(), Ok(None)));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    // ==================== Teardown Tests ====================

    #[tokio::test]
    async fn test_stop_recorded_skips_foreign_and_dead_processes() {
        let refs = vec![
            // our own PID never carries a forwarder signature
            ProcessRef {
                mapping_id: "reused".to_string(),
                process_id: std::process::id(),
                signature: "--listen=tcp:127.0.0.1:1".to_string(),
            },
            ProcessRef {
                mapping_id: "gone".to_string(),
                process_id: u32::MAX,
                signature: "--listen=tcp:127.0.0.1:2".to_string(),
            },
        ];

        let summary = stop_recorded(&refs).await;
        assert!(summary.stopped.is_empty());
        assert_eq!(summary.skipped, vec!["reused".to_string(), "gone".to_string()]);
    }

    #[tokio::test]
    async fn test_teardown_stops_recorded_process_and_marks_stopped() {
        use crate::registry::ForwarderHandle;

        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path());

        let local = unused_endpoint();
        let mut child = fake_forwarder(&local.signature());
        registry
            .persist(&[ForwarderHandle {
                mapping_id: "api".to_string(),
                process_id: Some(child.id()),
                status: HandleStatus::Live,
                signature: local.signature(),
                log_path: dir.path().join("api.log"),
            }])
            .unwrap();

        for _ in 0..50 {
            if find_matching(&local.signature()).contains(&child.id()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let summary = teardown(&registry).await.unwrap();
        assert_eq!(summary.stopped, vec!["api".to_string()]);
        assert!(!child.wait().unwrap().success());

        let handles = registry.load_handles().unwrap();
        assert_eq!(handles[0].status, HandleStatus::Stopped);

        // a second teardown finds nothing left to stop
        let summary = teardown(&registry).await.unwrap();
        assert!(summary.stopped.is_empty());
        assert_eq!(summary.skipped, vec!["api".to_string()]);
    }

    #[tokio::test]
    async fn test_teardown_without_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = HandleRegistry::new(dir.path());
        let summary = teardown(&registry).await.unwrap();
        assert_eq!(summary, TeardownSummary::default());
        assert!(!registry.path().exists());
    }
}

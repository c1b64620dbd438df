// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Starting and verifying forwarder processes.
//!
//! The [`Supervisor`] starts one forwarder process per mapping by re-running
//! a program (normally the current executable) with the hidden `forward`
//! subcommand. Each start yields a [`SupervisedForwarder`] whose handle begins
//! in [`HandleStatus::Starting`].
//!
//! [`Supervisor::verify`] waits a fixed settle delay and then asks every child
//! whether it has exited. A child that is still running is `live`; one that
//! exited (typically because its port was taken) is `failed`. Liveness means
//! "did not die on startup", not "has relayed traffic".
//!
//! A failing mapping never stops the others from being started. The
//! resulting [`Report`] lists exactly which mappings failed and where to look.

use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::configuration::{ForwardArgs, ForwardOptions};
use crate::constants::{EXIT_DEGRADED, FORWARD_SUBCOMMAND, SETTLE_DELAY};
use crate::endpoint::Endpoint;
use crate::errors::BridgeError;
use crate::mappings::Mapping;
use crate::registry::{ForwarderHandle, HandleStatus};

pub struct Supervisor {
    program: PathBuf,
    log_dir: PathBuf,
    settle: Duration,
    options: ForwardOptions,
}

/// A started forwarder: its handle plus, while we own it, the child process.
pub struct SupervisedForwarder {
    pub handle: ForwarderHandle,
    local: Endpoint,
    child: Option<Child>,
    failure: Option<String>,
}

impl SupervisedForwarder {
    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

impl Supervisor {
    pub fn new(program: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            log_dir: log_dir.into(),
            settle: SETTLE_DELAY,
            options: ForwardOptions::default(),
        }
    }

    /// A supervisor that re-runs the current executable.
    pub fn for_current_exe(log_dir: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        Ok(Self::new(std::env::current_exe()?, log_dir))
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_options(mut self, options: ForwardOptions) -> Self {
        self.options = options;
        self
    }

    pub fn log_path(&self, mapping_id: &str) -> PathBuf {
        self.log_dir.join(format!("{mapping_id}.log"))
    }

    /// Starts one forwarder per mapping. Never stops early: a mapping whose
    /// process cannot be spawned is recorded as failed and the rest proceed.
    #[tracing::instrument(skip(self, mappings), fields(mappings = mappings.len()))]
    pub fn start(&self, mappings: &[Mapping]) -> Vec<SupervisedForwarder> {
        mappings
            .iter()
            .map(|mapping| {
                let log_path = self.log_path(&mapping.id);
                let mut handle = ForwarderHandle {
                    mapping_id: mapping.id.clone(),
                    process_id: None,
                    status: HandleStatus::Starting,
                    signature: mapping.signature(),
                    log_path: log_path.clone(),
                };

                match self.spawn(mapping, &log_path) {
                    Ok(child) => {
                        handle.process_id = child.id();
                        tracing::info!(
                            "[bridge] started forwarder {} ({} -> {}) pid {:?}",
                            mapping.id,
                            mapping.local,
                            mapping.remote,
                            handle.process_id
                        );
                        SupervisedForwarder {
                            handle,
                            local: mapping.local.clone(),
                            child: Some(child),
                            failure: None,
                        }
                    }
                    Err(err) => {
                        tracing::error!("[bridge] unable to start forwarder {}: {}", mapping.id, err);
                        handle.transition(HandleStatus::Failed);
                        SupervisedForwarder {
                            handle,
                            local: mapping.local.clone(),
                            child: None,
                            failure: Some(format!("spawn failed: {err}")),
                        }
                    }
                }
            })
            .collect()
    }

    fn spawn(&self, mapping: &Mapping, log_path: &Path) -> std::io::Result<Child> {
        std::fs::create_dir_all(&self.log_dir)?;
        let stdout = OpenOptions::new().create(true).append(true).open(log_path)?;
        let stderr = stdout.try_clone()?;

        Command::new(&self.program)
            .arg(FORWARD_SUBCOMMAND)
            .args(ForwardArgs::from((mapping, self.options)).to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            // keep forwarders out of the caller's terminal signals
            .process_group(0)
            .spawn()
    }

    /// Waits the settle delay, then classifies every still-starting
    /// forwarder as live or failed.
    #[tracing::instrument(skip(self, forwarders), fields(forwarders = forwarders.len()))]
    pub async fn verify(&self, forwarders: &mut [SupervisedForwarder]) -> Report {
        tokio::time::sleep(self.settle).await;

        for forwarder in forwarders.iter_mut() {
            if forwarder.handle.status != HandleStatus::Starting {
                continue;
            }
            let Some(child) = forwarder.child.as_mut() else {
                forwarder.handle.transition(HandleStatus::Failed);
                continue;
            };

            match child.try_wait() {
                Ok(None) => {
                    forwarder.handle.transition(HandleStatus::Live);
                }
                Ok(Some(status)) => {
                    forwarder.handle.transition(HandleStatus::Failed);
                    forwarder.failure = Some(format!("exited during startup ({status})"));
                }
                Err(err) => {
                    forwarder.handle.transition(HandleStatus::Failed);
                    forwarder.failure = Some(format!("unable to query process: {err}"));
                }
            }
        }

        Report::new(forwarders)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedForwarder {
    pub mapping_id: String,
    pub reason: String,
    pub process_id: Option<u32>,
    pub local: Endpoint,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub expected: usize,
    pub live: usize,
    pub failed: Vec<FailedForwarder>,
    pub handles: Vec<ForwarderHandle>,
}

impl Report {
    pub fn new(forwarders: &[SupervisedForwarder]) -> Self {
        let handles: Vec<ForwarderHandle> =
            forwarders.iter().map(|forwarder| forwarder.handle.clone()).collect();

        let failed = forwarders
            .iter()
            .filter(|forwarder| forwarder.handle.status == HandleStatus::Failed)
            .map(|forwarder| FailedForwarder {
                mapping_id: forwarder.handle.mapping_id.clone(),
                reason: forwarder
                    .failure
                    .clone()
                    .unwrap_or_else(|| "not running".to_string()),
                process_id: forwarder.handle.process_id,
                local: forwarder.local.clone(),
                log_path: forwarder.handle.log_path.clone(),
            })
            .collect();

        Self {
            expected: forwarders.len(),
            live: handles
                .iter()
                .filter(|handle| handle.status == HandleStatus::Live)
                .count(),
            failed,
            handles,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.live == self.expected
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failed| failed.mapping_id.as_str())
            .collect()
    }

    /// 0 when every forwarder is live, otherwise the degraded exit code.
    pub fn exit_code(&self) -> u8 {
        if self.is_complete() { 0 } else { EXIT_DEGRADED }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "forwarders live: {}/{}", self.live, self.expected)?;
        for handle in &self.handles {
            let pid = handle
                .process_id
                .map_or_else(|| "-".to_string(), |pid| pid.to_string());
            writeln!(f, "  {:<12} {:<8} pid {}", handle.mapping_id, handle.status, pid)?;
        }

        if !self.failed.is_empty() {
            writeln!(f, "degraded: {} forwarder(s) failed", self.failed.len())?;
            for failed in &self.failed {
                writeln!(f, "  {}: {}", failed.mapping_id, failed.reason)?;
                writeln!(f, "    log:   {}", failed.log_path.display())?;
                if let Some(pid) = failed.process_id {
                    writeln!(f, "    pid:   {pid}")?;
                }
                writeln!(
                    f,
                    "    check: is another process bound to {}? stop it or run teardown, then re-run",
                    failed.local
                )?;
            }
        }

        Ok(())
    }
}

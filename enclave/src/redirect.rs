// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Redirecting the enclave's outbound TCP traffic into local forwarders.
//!
//! An enclave has no network interface besides loopback. Outbound connections
//! to the mapped ports are rewritten by a nat rule to `127.0.0.1:<port>`,
//! where the guest forwarder for that port listens and relays over vsock.
//!
//! Rules live in a dedicated chain hooked from `OUTPUT`:
//!
//! ```text
//! OUTPUT ─► BRIDGE_REDIRECT
//!             -d 127.0.0.0/8 -j RETURN            (loopback exemption, first)
//!             -p tcp --dport 443 -j REDIRECT --to-ports 443
//!             ...
//! ```
//!
//! [`install`] flushes and rebuilds the chain, and adds the `OUTPUT` hook only
//! when it is missing, so running it repeatedly leaves the same rule set.

use std::future::Future;

use bridge_core::errors::BridgeError;
use tokio::process::Command;

use crate::constants::{
    HOOK_CHAIN, IP, IPTABLES, LOOPBACK_ADDRESS, LOOPBACK_INTERFACE, LOOPBACK_NETWORK, NAT_TABLE,
    REDIRECT_CHAIN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectRule {
    pub protocol: Protocol,
    pub dest_port: u16,
    /// Leave traffic to loopback addresses alone.
    pub exempt_loopback: bool,
}

impl RedirectRule {
    pub fn tcp(dest_port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            dest_port,
            exempt_loopback: true,
        }
    }

    fn rule_args(&self) -> Vec<String> {
        let port = self.dest_port.to_string();
        vec![
            "-p".to_string(),
            self.protocol.as_str().to_string(),
            "--dport".to_string(),
            port.clone(),
            "-j".to_string(),
            "REDIRECT".to_string(),
            "--to-ports".to_string(),
            port,
        ]
    }
}

/// Result of one `iptables` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

/// Runs `iptables` with the given arguments.
pub trait Iptables {
    fn run(&self, args: &[String]) -> impl Future<Output = Result<CommandStatus, BridgeError>> + Send;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIptables;

impl Iptables for SystemIptables {
    async fn run(&self, args: &[String]) -> Result<CommandStatus, BridgeError> {
        run_command(IPTABLES, args).await
    }
}

async fn run_command(program: &str, args: &[String]) -> Result<CommandStatus, BridgeError> {
    tracing::debug!("[enclave] {} {}", program, args.join(" "));

    let output = Command::new(program).args(args).output().await?;

    Ok(CommandStatus {
        success: output.status.success(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(output.stderr.as_slice()).trim().to_string(),
    })
}

fn nat(args: &[&str]) -> Vec<String> {
    ["-t", NAT_TABLE]
        .iter()
        .chain(args.iter())
        .map(|arg| arg.to_string())
        .collect()
}

async fn checked<I: Iptables>(iptables: &I, args: Vec<String>) -> Result<(), BridgeError> {
    let status = iptables.run(&args).await?;
    if !status.success {
        return Err(BridgeError::RunError(
            status.code,
            format!("iptables {}: {}", args.join(" "), status.stderr),
        ));
    }
    Ok(())
}

/// Replaces the redirect chain with `rules` and hooks it into `OUTPUT`.
///
/// # Errors
///
/// Returns [`BridgeError::RunError`] when a mutating `iptables` call fails.
#[tracing::instrument(skip(iptables, rules), fields(rules = rules.len()))]
pub async fn install<I: Iptables>(iptables: &I, rules: &[RedirectRule]) -> Result<(), BridgeError> {
    let exists = iptables.run(&nat(&["-L", REDIRECT_CHAIN, "-n"])).await?.success;
    if !exists {
        checked(iptables, nat(&["-N", REDIRECT_CHAIN])).await?;
    }

    checked(iptables, nat(&["-F", REDIRECT_CHAIN])).await?;

    if rules.iter().any(|rule| rule.exempt_loopback) {
        checked(
            iptables,
            nat(&["-A", REDIRECT_CHAIN, "-d", LOOPBACK_NETWORK, "-j", "RETURN"]),
        )
        .await?;
    }

    for rule in rules {
        let mut args = nat(&["-A", REDIRECT_CHAIN]);
        args.extend(rule.rule_args());
        checked(iptables, args).await?;
    }

    let hook = ["-p", "tcp", "-j", REDIRECT_CHAIN];
    let mut check = nat(&["-C", HOOK_CHAIN]);
    check.extend(hook.iter().map(|arg| arg.to_string()));
    if !iptables.run(&check).await?.success {
        let mut append = nat(&["-A", HOOK_CHAIN]);
        append.extend(hook.iter().map(|arg| arg.to_string()));
        checked(iptables, append).await?;
    }

    tracing::info!(
        "[enclave] redirecting {} ports through {}",
        rules.len(),
        REDIRECT_CHAIN
    );

    Ok(())
}

/// Brings up the loopback interface, which starts down inside an enclave.
/// An already assigned address is not an error.
pub async fn bring_up_loopback() -> Result<(), BridgeError> {
    let args = |list: &[&str]| list.iter().map(|arg| arg.to_string()).collect::<Vec<_>>();

    let added = run_command(
        IP,
        &args(&["addr", "add", LOOPBACK_ADDRESS, "dev", LOOPBACK_INTERFACE]),
    )
    .await?;
    if !added.success && !added.stderr.contains("File exists") {
        return Err(BridgeError::RunError(added.code, added.stderr));
    }

    let up = run_command(IP, &args(&["link", "set", "dev", LOOPBACK_INTERFACE, "up"])).await?;
    if !up.success {
        return Err(BridgeError::RunError(up.code, up.stderr));
    }

    tracing::info!("[enclave] loopback interface is up");

    Ok(())
}

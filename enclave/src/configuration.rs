// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;

use bridge_core::configuration::{ForwardArgs, ForwardOptions};
use bridge_core::constants::LOG_DIR_NAME;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::constants::DEFAULT_STATE_DIR;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct EnclaveOptions {
    /// Mapping table JSON file; the built-in table is used when absent.
    #[arg(long, global = true, env("ENCLAVE_MAPPINGS"))]
    pub mappings: Option<PathBuf>,
    /// Directory holding the handle registry and forwarder logs.
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR, env("ENCLAVE_STATE_DIR"))]
    pub state_dir: PathBuf,
    #[command(subcommand)]
    pub command: EnclaveCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum EnclaveCommand {
    /// Set up the bridge, then replace this process with the application.
    Boot(BootArgs),
    /// Install the outbound redirect rules only.
    Redirect,
    #[command(hide = true)]
    Forward(ForwardArgs),
}

#[derive(Debug, Clone, Args)]
pub struct BootArgs {
    /// Do not start the application unless every forwarder is live.
    #[arg(long, default_value = "false", env("ENCLAVE_STRICT"), action = ArgAction::SetTrue)]
    pub strict: bool,
    /// Leave loopback and iptables untouched.
    #[arg(long, default_value = "false", env("ENCLAVE_SKIP_REDIRECT"), action = ArgAction::SetTrue)]
    pub skip_redirect: bool,
    /// Start without waiting for a secret bundle.
    #[arg(long, default_value = "false", env("ENCLAVE_SKIP_SECRETS"), action = ArgAction::SetTrue)]
    pub skip_secrets: bool,
    /// Seconds to wait for the parent to deliver secrets.
    #[arg(long, default_value = "120", env("ENCLAVE_SECRET_TIMEOUT_SECS"))]
    pub secret_timeout: u64,
    /// Exported to the application as `CONFIG_PATH`.
    #[arg(long, env("ENCLAVE_APP_CONFIG"))]
    pub app_config: Option<PathBuf>,
    #[command(flatten)]
    pub forward: ForwardOptions,
    /// The application and its arguments.
    #[arg(last = true, required = true)]
    pub app: Vec<String>,
}

impl EnclaveOptions {
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join(LOG_DIR_NAME)
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::path::PathBuf;

use bridge_core::configuration::{ForwardArgs, ForwardOptions};
use bridge_core::constants::LOG_DIR_NAME;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::constants::DEFAULT_STATE_DIR;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct ParentOptions {
    /// Mapping table JSON file; the built-in table is used when absent.
    #[arg(long, global = true, env("PARENT_MAPPINGS"))]
    pub mappings: Option<PathBuf>,
    /// Directory holding the handle registry and forwarder logs.
    #[arg(long, global = true, default_value = DEFAULT_STATE_DIR, env("PARENT_STATE_DIR"))]
    pub state_dir: PathBuf,
    #[command(subcommand)]
    pub command: ParentCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ParentCommand {
    /// Print the running enclave as JSON.
    Discover(DiscoverArgs),
    /// Start the parent half of every mapping.
    Expose(ExposeArgs),
    /// Stop every forwarder recorded by the last `expose`.
    Teardown,
    /// Deliver a JSON secret file to the enclave.
    SendSecrets(SendSecretsArgs),
    #[command(hide = true)]
    Forward(ForwardArgs),
}

#[derive(Debug, Clone, Args)]
pub struct DiscoverArgs {
    /// Only consider enclaves whose name starts with this prefix.
    #[arg(long, env("PARENT_ENCLAVE_NAME"))]
    pub enclave_name: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ExposeArgs {
    #[command(flatten)]
    pub discover: DiscoverArgs,
    /// Host dialled by outbound routes without an explicit upstream.
    #[arg(long, default_value = crate::constants::DEFAULT_EGRESS_HOST, env("PARENT_EGRESS_HOST"))]
    pub egress_host: String,
    /// Use this CID instead of discovering the enclave.
    #[arg(long, env("PARENT_ENCLAVE_CID"))]
    pub cid: Option<u32>,
    /// Treat a partially started bridge as a fatal error.
    #[arg(long, default_value = "false", env("PARENT_STRICT"), action = ArgAction::SetTrue)]
    pub strict: bool,
    #[command(flatten)]
    pub forward: ForwardOptions,
}

#[derive(Debug, Clone, Args)]
pub struct SendSecretsArgs {
    #[command(flatten)]
    pub discover: DiscoverArgs,
    /// JSON object of secret names to values.
    #[arg(long, env("PARENT_SECRETS_FILE"))]
    pub file: PathBuf,
    /// Use this CID instead of discovering the enclave.
    #[arg(long, env("PARENT_ENCLAVE_CID"))]
    pub cid: Option<u32>,
    /// Seconds to keep retrying while the enclave is not listening yet.
    #[arg(long, default_value = "60", env("PARENT_SECRET_TIMEOUT_SECS"))]
    pub connect_timeout: u64,
}

impl ParentOptions {
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join(LOG_DIR_NAME)
    }
}

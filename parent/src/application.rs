// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Parent-side commands.
//!
//! `expose` runs the full host sequence:
//!
//! ```text
//! discover → resolve host mappings → reap stale forwarders
//!          → start forwarders → verify → persist handles → report
//! ```
//!
//! Every command returns the process exit code; fatal errors are returned as
//! `Err` and mapped to an exit code by `main`.

use std::time::Duration;

use anyhow::{Context, Result};
use bridge_core::endpoint::Endpoint;
use bridge_core::forwarder::run_forward;
use bridge_core::mappings::MappingTable;
use bridge_core::reaper;
use bridge_core::registry::HandleRegistry;
use bridge_core::supervisor::Supervisor;

use crate::configuration::{
    DiscoverArgs, ExposeArgs, ParentCommand, ParentOptions, SendSecretsArgs,
};
use crate::discovery::{NitroCli, discover};
use crate::secrets;

pub struct Application {
    options: ParentOptions,
}

impl Application {
    pub fn build(options: ParentOptions) -> Self {
        Self { options }
    }

    pub async fn run(self) -> Result<u8> {
        match &self.options.command {
            ParentCommand::Discover(args) => self.discover(args).await,
            ParentCommand::Expose(args) => self.expose(args).await,
            ParentCommand::Teardown => self.teardown().await,
            ParentCommand::SendSecrets(args) => self.send_secrets(args).await,
            ParentCommand::Forward(args) => {
                run_forward(args.clone())
                    .await
                    .with_context(|| format!("forwarder {} stopped", args.id))?;
                Ok(0)
            }
        }
    }

    fn load_table(&self) -> Result<MappingTable> {
        Ok(MappingTable::load(self.options.mappings.as_deref())?)
    }

    async fn resolve_cid(&self, cid: Option<u32>, args: &DiscoverArgs) -> Result<u32> {
        if let Some(cid) = cid {
            tracing::info!("[parent] using configured CID {}", cid);
            return Ok(cid);
        }
        let descriptor = discover(&NitroCli, args.enclave_name.as_deref())
            .await
            .context("enclave discovery failed")?;
        Ok(descriptor.cid)
    }

    async fn discover(&self, args: &DiscoverArgs) -> Result<u8> {
        let descriptor = discover(&NitroCli, args.enclave_name.as_deref())
            .await
            .context("enclave discovery failed")?;
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        Ok(0)
    }

    #[tracing::instrument(skip(self, args))]
    async fn expose(&self, args: &ExposeArgs) -> Result<u8> {
        let table = self.load_table()?;
        let cid = self.resolve_cid(args.cid, &args.discover).await?;
        let mappings = table.host_mappings(cid, &args.egress_host);

        let reaped = reaper::reap(&mappings).await;
        if !reaped.terminated.is_empty() {
            tracing::info!("[parent] reaped {} stale forwarders", reaped.terminated.len());
        }

        let supervisor = Supervisor::for_current_exe(self.options.log_dir())?.with_options(args.forward);
        let mut forwarders = supervisor.start(&mappings);
        let report = supervisor.verify(&mut forwarders).await;

        let registry = HandleRegistry::new(&self.options.state_dir);
        registry
            .persist(&report.handles)
            .context("unable to record forwarder handles")?;

        print!("{report}");

        if !report.is_complete() {
            tracing::warn!(
                "[parent] degraded: {}/{} forwarders live, failed: {:?}",
                report.live,
                report.expected,
                report.failed_ids()
            );
            if args.strict {
                let summary = reaper::teardown(&registry).await?;
                tracing::warn!(
                    "[parent] strict mode, stopped {} live forwarders",
                    summary.stopped.len()
                );
            }
        }

        Ok(report.exit_code())
    }

    async fn teardown(&self) -> Result<u8> {
        let registry = HandleRegistry::new(&self.options.state_dir);
        let summary = reaper::teardown(&registry)
            .await
            .context("teardown failed")?;

        println!(
            "stopped: {}, already gone: {}",
            summary.stopped.len(),
            summary.skipped.len()
        );
        Ok(0)
    }

    async fn send_secrets(&self, args: &SendSecretsArgs) -> Result<u8> {
        let table = self.load_table()?;
        let payload = secrets::read_payload(&args.file)
            .with_context(|| format!("unable to load {}", args.file.display()))?;
        let cid = self.resolve_cid(args.cid, &args.discover).await?;

        secrets::send(
            &Endpoint::vsock(cid, table.secret_port),
            &payload,
            Duration::from_secs(args.connect_timeout),
        )
        .await
        .context("unable to deliver secrets")?;

        Ok(0)
    }
}

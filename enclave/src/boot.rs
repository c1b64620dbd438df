// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The enclave boot sequence.
//!
//! ```text
//! loopback up → redirect rules → receive secrets → reap → start forwarders
//!            → verify → persist handles → exec application
//! ```
//!
//! Each step runs only after the previous one finished. The application
//! replaces this process and receives the secrets as environment variables.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bridge_core::constants::EXIT_DEGRADED;
use bridge_core::mappings::MappingTable;
use bridge_core::reaper;
use bridge_core::registry::HandleRegistry;
use bridge_core::secrets::SecretBundle;
use bridge_core::supervisor::Supervisor;

use crate::configuration::{BootArgs, EnclaveOptions};
use crate::constants::APP_CONFIG_ENV;
use crate::redirect::{self, RedirectRule, SystemIptables};
use crate::secrets::SecretChannel;

/// Installs redirect rules for every outbound route of `table`.
pub async fn setup_network(table: &MappingTable) -> Result<()> {
    redirect::bring_up_loopback()
        .await
        .context("unable to bring up loopback")?;

    let rules: Vec<RedirectRule> = table
        .outbound_ports()
        .into_iter()
        .map(RedirectRule::tcp)
        .collect();
    redirect::install(&SystemIptables, &rules)
        .await
        .context("unable to install redirect rules")?;

    Ok(())
}

/// Runs the boot sequence. Only returns on failure or when a degraded
/// bridge stops a strict boot.
pub async fn boot(options: &EnclaveOptions, args: &BootArgs) -> Result<u8> {
    let table = MappingTable::load(options.mappings.as_deref())?;

    if args.skip_redirect {
        tracing::warn!("[enclave] skipping network setup");
    } else {
        setup_network(&table).await?;
    }

    let bundle = if args.skip_secrets {
        tracing::warn!("[enclave] skipping secret delivery");
        SecretBundle::default()
    } else {
        let channel = SecretChannel::bind(&table.secret_endpoint()).await?;
        channel
            .receive_once(Duration::from_secs(args.secret_timeout))
            .await
            .context("secret delivery failed")?
    };

    let mappings = table.guest_mappings();
    reaper::reap(&mappings).await;

    let supervisor = Supervisor::for_current_exe(options.log_dir())?.with_options(args.forward);
    let mut forwarders = supervisor.start(&mappings);
    let report = supervisor.verify(&mut forwarders).await;

    let registry = HandleRegistry::new(&options.state_dir);
    registry
        .persist(&report.handles)
        .context("unable to record forwarder handles")?;

    eprint!("{report}");

    if !report.is_complete() {
        if args.strict {
            tracing::error!(
                "[enclave] {}/{} forwarders live, not starting the application",
                report.live,
                report.expected
            );
            reaper::teardown(&registry).await?;
            return Ok(EXIT_DEGRADED);
        }
        tracing::warn!(
            "[enclave] degraded: continuing with failed forwarders {:?}",
            report.failed_ids()
        );
    }

    let mut command = app_command(&args.app, &bundle, args.app_config.as_deref())?;
    drop(bundle);

    let program = command.get_program().to_string_lossy().into_owned();
    tracing::info!("[enclave] starting {}", program);

    let err = command.exec();
    bail!("unable to exec {}: {}", program, err)
}

/// Builds the application command with the secrets in its environment.
pub fn app_command(app: &[String], bundle: &SecretBundle, app_config: Option<&Path>) -> Result<Command> {
    let Some((program, app_args)) = app.split_first() else {
        bail!("no application given");
    };

    let mut command = Command::new(program);
    command.args(app_args).envs(bundle.iter());
    if let Some(path) = app_config {
        command.env(APP_CONFIG_ENV, path);
    }
    Ok(command)
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::process::ExitCode;

use anyhow::{Context, Result};
use bridge_core::constants::EXIT_FATAL;
use bridge_core::errors::BridgeError;
use bridge_core::forwarder::run_forward;
use bridge_core::mappings::MappingTable;
use bridge_core::telemetry;
use clap::Parser;
use enclave_bridge::boot;
use enclave_bridge::configuration::{EnclaveCommand, EnclaveOptions};

// Avoid musl's default allocator due to terrible performance
#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

async fn run(options: EnclaveOptions) -> Result<u8> {
    match &options.command {
        EnclaveCommand::Boot(args) => boot::boot(&options, args).await,
        EnclaveCommand::Redirect => {
            let table = MappingTable::load(options.mappings.as_deref())?;
            boot::setup_network(&table).await?;
            Ok(0)
        }
        EnclaveCommand::Forward(args) => {
            run_forward(args.clone())
                .await
                .with_context(|| format!("forwarder {} stopped", args.id))?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init();

    let options = EnclaveOptions::parse();

    tracing::debug!("[enclave] {:?}", &options);

    match run(options).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!("[enclave] {:#}", err);
            let code = err
                .downcast_ref::<BridgeError>()
                .map_or(EXIT_FATAL, BridgeError::exit_code);
            ExitCode::from(code)
        }
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::process::ExitCode;

use bridge_core::constants::EXIT_FATAL;
use bridge_core::errors::BridgeError;
use bridge_core::telemetry;
use clap::Parser;
use parent_bridge::application::Application;
use parent_bridge::configuration::ParentOptions;

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init();

    // get configuration options from arguments and environment variables
    let options = ParentOptions::parse();

    tracing::debug!("[parent] {:?}", &options);

    match Application::build(options).run().await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!("[parent] {:#}", err);
            let code = err
                .downcast_ref::<BridgeError>()
                .map_or(EXIT_FATAL, BridgeError::exit_code);
            ExitCode::from(code)
        }
    }
}

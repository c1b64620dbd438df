// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use tracing_subscriber::EnvFilter;

/// Installs the JSON log subscriber shared by every bridge binary.
///
/// `RUST_LOG` selects the filter and defaults to `info`. Logs go to stderr so
/// command output on stdout stays machine readable. Calling this more than
/// once keeps the first subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // this needs to be set to false, otherwise ANSI color codes will
        // show up in a confusing manner in CloudWatch logs.
        .with_ansi(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

pub const NITRO_CLI: &str = "nitro-cli";
pub const ENCLAVE_STATE_RUNNING: &str = "RUNNING";

pub const DEFAULT_STATE_DIR: &str = "/run/enclave-bridge/parent";
/// Outbound routes without an explicit upstream dial this host.
pub const DEFAULT_EGRESS_HOST: &str = "127.0.0.1";

pub const SECRET_CONNECT_INITIAL_DELAY: Duration = Duration::from_millis(250);
pub const SECRET_CONNECT_MAX_DELAY: Duration = Duration::from_secs(5);

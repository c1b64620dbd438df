// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// The parent instance is always reachable from inside an enclave at CID 3.
pub const PARENT_CID: u32 = 3;
/// CIDs below this value are reserved (hypervisor, local, host).
pub const MIN_ENCLAVE_CID: u64 = 3;

pub const MAPPING_TABLE_VERSION: u32 = 1;
pub const SECRET_PORT: u32 = 7777;
pub const MAX_SECRET_PAYLOAD_SIZE: u64 = 64 * 1024; // 64 KiB

pub const FORWARD_SUBCOMMAND: &str = "forward";
pub const LISTEN_ARG: &str = "--listen";

pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_BIND_ATTEMPTS: u32 = 5;
pub const BIND_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const BIND_RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// After the client half-closes, how long the response direction may drain.
pub const RELAY_LINGER: Duration = Duration::from_secs(2);
pub const ACCEPT_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(10);
pub const ACCEPT_RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// Must exceed the worst-case bind retry budget of a forwarder.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);
pub const REAP_EXIT_ATTEMPTS: u32 = 8;
pub const REAP_RELEASE_ATTEMPTS: u32 = 6;

pub const REGISTRY_FILE_NAME: &str = "handles.json";
pub const REGISTRY_VERSION: u32 = 1;
pub const LOG_DIR_NAME: &str = "logs";

pub const EXIT_FATAL: u8 = 1;
pub const EXIT_DEGRADED: u8 = 2;
pub const EXIT_BIND_FAILED: u8 = 3;

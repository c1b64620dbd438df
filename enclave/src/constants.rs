// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

pub const DEFAULT_STATE_DIR: &str = "/run/enclave-bridge/enclave";

pub const IPTABLES: &str = "iptables";
pub const IP: &str = "ip";
pub const NAT_TABLE: &str = "nat";
pub const REDIRECT_CHAIN: &str = "BRIDGE_REDIRECT";
pub const HOOK_CHAIN: &str = "OUTPUT";
pub const LOOPBACK_INTERFACE: &str = "lo";
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1/32";
pub const LOOPBACK_NETWORK: &str = "127.0.0.0/8";

/// Environment variable pointing the application at its configuration file.
pub const APP_CONFIG_ENV: &str = "CONFIG_PATH";

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Parent Bridge
//!
//! The parent-instance half of the enclave bridge.
//!
//! ```text
//! internet ◄─tcp─ parent forwarder ◄─vsock─ enclave   (outbound routes)
//! client ─tcp─► parent forwarder ─vsock─► enclave     (inbound routes)
//!                      |
//!                      +-> nitro-cli (enclave discovery)
//! ```
//!
//! ## Modules
//!
//! - [`application`]: the `discover`, `expose`, `teardown` and `send-secrets` commands
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: Configuration constants for the application
//! - [`discovery`]: locating the single running enclave via `nitro-cli`
//! - [`models`]: `nitro-cli` output and the discovered instance
//! - [`secrets`]: delivering the secret bundle over vsock
//!
//! ## Usage
//!
//! ```bash
//! parent-bridge expose --egress-host 10.0.0.10
//! parent-bridge send-secrets --file secrets.json
//! parent-bridge teardown
//! ```

pub mod application;
pub mod configuration;
pub mod constants;
pub mod discovery;
pub mod models;
pub mod secrets;

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Bridge Core
//!
//! Shared building blocks of the vsock/TCP bridge between a Nitro Enclave and
//! its parent instance. Both the `parent-bridge` and `enclave-bridge`
//! binaries are thin layers over this crate.
//!
//! ```text
//! enclave app ─tcp─► enclave forwarder ─vsock─► parent forwarder ─tcp─► internet
//! client ─tcp─► parent forwarder ─vsock─► enclave forwarder ─tcp─► enclave app
//! ```
//!
//! ## Modules
//!
//! - [`endpoint`]: `tcp:` / `vsock:` endpoints, listeners and connections
//! - [`mappings`]: the versioned mapping table and its per-side resolution
//! - [`forwarder`]: the relay worker run by the hidden `forward` subcommand
//! - [`supervisor`]: starts forwarder processes and verifies they stay up
//! - [`reaper`]: terminates stale forwarders and tears down recorded ones
//! - [`registry`]: forwarder handles persisted for teardown
//! - [`secrets`]: the secret bundle delivered at enclave boot
//! - [`errors`]: the [`errors::BridgeError`] type
//! - [`telemetry`]: JSON log setup

pub mod backoff;
pub mod configuration;
pub mod constants;
pub mod endpoint;
pub mod errors;
pub mod forwarder;
pub mod mappings;
pub mod reaper;
pub mod registry;
pub mod secrets;
pub mod supervisor;
pub mod telemetry;

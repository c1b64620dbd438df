// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The enclave half of the bridge: network redirection, secret reception
//! and the boot sequence that starts the guest forwarders.

pub mod boot;
pub mod configuration;
pub mod constants;
pub mod redirect;
pub mod secrets;

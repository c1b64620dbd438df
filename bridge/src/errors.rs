// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

use crate::constants::{EXIT_BIND_FAILED, EXIT_FATAL};
use crate::endpoint::Endpoint;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("no running enclave found")]
    NoInstance,
    #[error("found {0} running enclaves, expected exactly one")]
    AmbiguousInstance(usize),
    #[error("error running command: {0:?} {1}")]
    RunError(Option<i32>, String),
    #[error("port already in use: {0}")]
    PortInUse(Endpoint),
    #[error("unable to bind {endpoint}: {reason}")]
    BindFailed { endpoint: Endpoint, reason: String },
    #[error("malformed secret payload: {0}")]
    MalformedSecretPayload(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid mapping table: {0}")]
    InvalidMapping(String),
    #[error("handle registry error: {0}")]
    Registry(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl BridgeError {
    /// Process exit code for errors that halt a command.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::PortInUse(_) | Self::BindFailed { .. } => EXIT_BIND_FAILED,
            _ => EXIT_FATAL,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(source: std::io::Error) -> Self {
        tracing::error!("{:?}", source);
        BridgeError::Io(source.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(source: serde_json::Error) -> Self {
        tracing::error!("{:?}", source);
        BridgeError::Io(source.to_string())
    }
}

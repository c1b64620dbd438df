// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use serde::{Deserialize, Serialize};

/// One entry of `nitro-cli describe-enclaves` output. Fields the bridge does
/// not use are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveDescribeInfo {
    /// Enclave name assigned by the user
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "EnclaveName")]
    pub enclave_name: Option<String>,
    #[serde(rename = "EnclaveID")]
    /// The full ID of the enclave.
    pub enclave_id: String,
    #[serde(rename = "ProcessID")]
    /// The PID of the enclave process which manages the enclave.
    pub process_id: u32,
    #[serde(default)]
    #[serde(rename = "EnclaveCID")]
    /// The enclave's CID.
    pub enclave_cid: u64,
    #[serde(rename = "State")]
    /// The current state of the enclave.
    pub state: String,
}

/// The single running enclave the parent bridges to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub cid: u32,
    pub enclave_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclave_name: Option<String>,
}

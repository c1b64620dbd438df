// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Nitro Enclave discovery.
//!
//! The parent bridges to exactly one enclave. [`discover`] asks the control
//! plane for the enclaves on this instance and keeps those in the `RUNNING`
//! state (optionally narrowed by a name prefix):
//!
//! - none left → [`BridgeError::NoInstance`]
//! - more than one → [`BridgeError::AmbiguousInstance`]; the first is never
//!   picked silently
//! - exactly one → its [`InstanceDescriptor`]
//!
//! Discovery is read-only and runs at the start of every operation that needs
//! the enclave CID. The result is never cached.

use std::future::Future;

use bridge_core::constants::MIN_ENCLAVE_CID;
use bridge_core::errors::BridgeError;
use tokio::process::Command;

use crate::constants::{ENCLAVE_STATE_RUNNING, NITRO_CLI};
use crate::models::{EnclaveDescribeInfo, InstanceDescriptor};

/// Source of the enclave list.
pub trait ControlPlane {
    fn describe(&self) -> impl Future<Output = Result<Vec<EnclaveDescribeInfo>, BridgeError>> + Send;
}

/// Queries `nitro-cli describe-enclaves`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NitroCli;

impl ControlPlane for NitroCli {
    async fn describe(&self) -> Result<Vec<EnclaveDescribeInfo>, BridgeError> {
        let output = Command::new(NITRO_CLI)
            .arg("describe-enclaves")
            .output()
            .await?;

        if !output.status.success() {
            return Err(BridgeError::RunError(
                output.status.code(),
                String::from_utf8_lossy(output.stderr.as_slice()).to_string(),
            ));
        }

        let enclaves: Vec<EnclaveDescribeInfo> = serde_json::from_slice(output.stdout.as_slice())?;

        tracing::trace!("[parent] enclaves: {:?}", enclaves);

        Ok(enclaves)
    }
}

/// Finds the single running enclave.
///
/// # Errors
///
/// - [`BridgeError::NoInstance`] if no running enclave (with a usable CID)
///   matches
/// - [`BridgeError::AmbiguousInstance`] if more than one matches
/// - [`BridgeError::RunError`] if the control plane query fails
#[tracing::instrument(skip(plane))]
pub async fn discover<P: ControlPlane>(
    plane: &P,
    name_prefix: Option<&str>,
) -> Result<InstanceDescriptor, BridgeError> {
    let enclaves = plane.describe().await?;

    let mut running: Vec<EnclaveDescribeInfo> = enclaves
        .into_iter()
        .filter(|e| e.state == ENCLAVE_STATE_RUNNING)
        .filter(|e| match name_prefix {
            Some(prefix) => e
                .enclave_name
                .as_ref()
                .is_some_and(|name| name.starts_with(prefix)),
            None => true,
        })
        .collect();

    if running.len() > 1 {
        return Err(BridgeError::AmbiguousInstance(running.len()));
    }

    let enclave = running.pop().ok_or(BridgeError::NoInstance)?;

    if enclave.enclave_cid < MIN_ENCLAVE_CID {
        tracing::warn!(
            "[parent] enclave {} has unusable CID {}",
            enclave.enclave_id,
            enclave.enclave_cid
        );
        return Err(BridgeError::NoInstance);
    }
    let cid = u32::try_from(enclave.enclave_cid).map_err(|_| BridgeError::NoInstance)?;

    tracing::info!("[parent] found enclave {} at CID {}", enclave.enclave_id, cid);

    Ok(InstanceDescriptor {
        cid,
        enclave_id: enclave.enclave_id,
        enclave_name: enclave.enclave_name,
    })
}

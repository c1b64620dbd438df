// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The secret bundle delivered to the enclave at boot.
//!
//! The payload is a single flat JSON object:
//!
//! ```json
//! {"API_KEY": "abc", "REGION": "us-east-1", "RETRIES": 3}
//! ```
//!
//! Strings are taken verbatim; numbers and booleans use their JSON text.
//! Nested objects, arrays and `null` are rejected, as are names that cannot
//! be environment variable names (empty, containing `=` or NUL).
//!
//! A [`SecretBundle`] zeroizes its contents on drop and never prints them.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::MAX_SECRET_PAYLOAD_SIZE;
use crate::errors::BridgeError;

#[derive(Deserialize)]
#[serde(untagged)]
enum SecretScalar {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

#[derive(Clone, PartialEq, Eq, Zeroize)]
struct SecretEntry {
    name: String,
    value: String,
}

#[derive(Clone, Default, PartialEq, Eq, ZeroizeOnDrop)]
pub struct SecretBundle {
    entries: Vec<SecretEntry>,
}

// Custom Debug implementation to prevent accidental logging of sensitive data
impl fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBundle")
            .field("entries", &self.entries.len())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl SecretBundle {
    /// Parses a secret payload.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedSecretPayload`] when the payload is too
    /// large, is not a flat JSON object, or carries an unusable name/value.
    pub fn from_json(payload: &[u8]) -> Result<Self, BridgeError> {
        if payload.len() as u64 > MAX_SECRET_PAYLOAD_SIZE {
            return Err(BridgeError::MalformedSecretPayload(format!(
                "payload of {} bytes exceeds {} bytes",
                payload.len(),
                MAX_SECRET_PAYLOAD_SIZE
            )));
        }

        // serde_json errors carry only positions, never payload content
        let parsed: BTreeMap<String, SecretScalar> = serde_json::from_slice(payload)
            .map_err(|err| BridgeError::MalformedSecretPayload(err.to_string()))?;

        let mut entries = Vec::with_capacity(parsed.len());
        for (name, scalar) in parsed {
            if name.is_empty() || name.contains('=') || name.contains('\0') {
                return Err(BridgeError::MalformedSecretPayload(
                    "secret names must be non-empty and contain neither '=' nor NUL".to_string(),
                ));
            }

            let value = match scalar {
                SecretScalar::Text(text) => text,
                SecretScalar::Number(number) => number.to_string(),
                SecretScalar::Flag(flag) => flag.to_string(),
            };
            if value.contains('\0') {
                return Err(BridgeError::MalformedSecretPayload(format!(
                    "value of {name} contains NUL"
                )));
            }

            entries.push(SecretEntry { name, value });
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Name/value pairs, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.value.as_str()))
    }
}

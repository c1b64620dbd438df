// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Sending the boot-time secret bundle to the enclave.

use std::path::Path;
use std::time::Duration;

use bridge_core::backoff::Backoff;
use bridge_core::endpoint::{self, BoxedStream, Endpoint};
use bridge_core::errors::BridgeError;
use bridge_core::secrets::SecretBundle;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use zeroize::Zeroizing;

use crate::constants::{SECRET_CONNECT_INITIAL_DELAY, SECRET_CONNECT_MAX_DELAY};

/// Reads and validates a secret file. The raw bytes are erased on drop.
pub fn read_payload(path: &Path) -> Result<Zeroizing<Vec<u8>>, BridgeError> {
    let payload = Zeroizing::new(std::fs::read(path)?);
    let bundle = SecretBundle::from_json(&payload)?;
    tracing::info!("[parent] loaded {} secrets from {}", bundle.len(), path.display());
    Ok(payload)
}

/// Delivers `payload` to the enclave's secret channel.
///
/// The enclave may still be booting, so connection attempts are retried with
/// backoff until `timeout` has passed.
///
/// # Errors
///
/// - [`BridgeError::Timeout`] if no connection could be made in time
/// - [`BridgeError::Io`] if the write fails once connected
#[tracing::instrument(skip(payload), fields(bytes = payload.len()))]
pub async fn send(target: &Endpoint, payload: &[u8], timeout: Duration) -> Result<(), BridgeError> {
    let mut stream = connect_with_retry(target, timeout).await?;

    stream.write_all(payload).await?;
    stream.shutdown().await?;

    tracing::info!("[parent] delivered secret payload to {}", target);

    Ok(())
}

async fn connect_with_retry(target: &Endpoint, timeout: Duration) -> Result<BoxedStream, BridgeError> {
    let deadline = Instant::now() + timeout;
    let mut backoff = Backoff::new(u32::MAX, SECRET_CONNECT_INITIAL_DELAY, SECRET_CONNECT_MAX_DELAY);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, endpoint::connect(target)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => {
                tracing::debug!("[parent] {} not reachable yet: {}", target, err);
            }
            Err(_) => return Err(BridgeError::Timeout(timeout)),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match backoff.next_delay() {
            Some(delay) if delay < remaining => tokio::time::sleep(delay).await,
            _ => return Err(BridgeError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    const PAYLOAD: &[u8] = br#"{"API_KEY":"abc","REGION":"us-east-1"}"#;

    #[test]
    fn test_read_payload_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PAYLOAD).unwrap();
        assert_eq!(read_payload(file.path()).unwrap().as_slice(), PAYLOAD);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(br#"{"API_KEY":"#).unwrap();
        assert!(matches!(
            read_payload(bad.path()),
            Err(BridgeError::MalformedSecretPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_send_delivers_payload_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Endpoint::Tcp(listener.local_addr().unwrap().to_string());

        let receiver = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        send(&target, PAYLOAD, Duration::from_secs(5)).await.unwrap();
        assert_eq!(receiver.await.unwrap(), PAYLOAD);
    }

    #[tokio::test]
    async fn test_send_retries_until_listener_appears() {
        let scratch = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = scratch.local_addr().unwrap();
        drop(scratch);

        let receiver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        send(&Endpoint::Tcp(addr.to_string()), PAYLOAD, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(receiver.await.unwrap(), PAYLOAD);
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let scratch = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = scratch.local_addr().unwrap();
        drop(scratch);

        let result = send(
            &Endpoint::Tcp(addr.to_string()),
            PAYLOAD,
            Duration::from_millis(300),
        )
        .await;
        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_millis(300))));
    }
}

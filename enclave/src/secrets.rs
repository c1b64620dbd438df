// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Receiving the secret bundle at boot.
//!
//! The parent connects once to the secret port, writes a JSON object and
//! closes its write half. The channel accepts exactly one connection and
//! reads until EOF; accepting and reading share a single deadline.

use std::time::Duration;

use bridge_core::constants::MAX_SECRET_PAYLOAD_SIZE;
use bridge_core::endpoint::{BridgeListener, Endpoint};
use bridge_core::errors::BridgeError;
use bridge_core::secrets::SecretBundle;
use tokio::io::AsyncReadExt;
use zeroize::Zeroizing;

pub struct SecretChannel {
    listener: BridgeListener,
}

impl SecretChannel {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, BridgeError> {
        let listener = BridgeListener::bind(endpoint)
            .await
            .map_err(|err| BridgeError::BindFailed {
                endpoint: endpoint.clone(),
                reason: err.to_string(),
            })?;

        tracing::info!("[enclave] waiting for secrets on {}", listener.local_endpoint());

        Ok(Self { listener })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.listener.local_endpoint()
    }

    /// Accepts one sender and parses its payload. The channel is consumed.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Timeout`] if no complete payload arrived in time
    /// - [`BridgeError::MalformedSecretPayload`] if the payload is too large
    ///   or not a flat JSON object
    #[tracing::instrument(skip(self))]
    pub async fn receive_once(mut self, timeout: Duration) -> Result<SecretBundle, BridgeError> {
        let payload = tokio::time::timeout(timeout, self.read_payload())
            .await
            .map_err(|_| BridgeError::Timeout(timeout))??;

        let bundle = SecretBundle::from_json(&payload)?;

        tracing::info!("[enclave] received {} secrets", bundle.len());

        Ok(bundle)
    }

    async fn read_payload(&mut self) -> Result<Zeroizing<Vec<u8>>, BridgeError> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!("[enclave] secret sender connected from {}", peer);

        // one byte past the limit is enough to detect an oversized payload;
        // reserving it up front keeps the buffer from being reallocated
        let limit = MAX_SECRET_PAYLOAD_SIZE + 1;
        let mut payload = Zeroizing::new(Vec::with_capacity(limit as usize));
        stream
            .take(limit)
            .read_to_end(&mut payload)
            .await?;

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn channel() -> (SecretChannel, String) {
        let channel = SecretChannel::bind(&Endpoint::tcp("127.0.0.1", 0)).await.unwrap();
        let addr = match channel.local_endpoint() {
            Endpoint::Tcp(addr) => addr,
            other => panic!("unexpected endpoint {other}"),
        };
        (channel, addr)
    }

    async fn send(addr: String, payload: Vec<u8>) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&payload).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_bundle() {
        let (channel, addr) = channel().await;
        let sender = tokio::spawn(send(
            addr,
            br#"{"API_KEY":"abc","REGION":"us-east-1"}"#.to_vec(),
        ));

        let bundle = channel.receive_once(Duration::from_secs(5)).await.unwrap();
        sender.await.unwrap();

        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.get("API_KEY"), Some("abc"));
        assert_eq!(bundle.get("REGION"), Some("us-east-1"));
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let (channel, addr) = channel().await;
        let sender = tokio::spawn(send(addr, br#"{"API_KEY":"abc""#.to_vec()));

        let result = channel.receive_once(Duration::from_secs(5)).await;
        sender.await.unwrap();

        assert!(matches!(result, Err(BridgeError::MalformedSecretPayload(_))));
    }

    #[tokio::test]
    async fn test_oversized_payload() {
        let (channel, addr) = channel().await;
        let mut payload = b"{\"BIG\":\"".to_vec();
        payload.extend(std::iter::repeat_n(b'a', MAX_SECRET_PAYLOAD_SIZE as usize));
        payload.extend(b"\"}");

        let sender = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            // the receiver stops reading at the limit, so the tail may be refused
            let _ = stream.write_all(&payload).await;
            let _ = stream.shutdown().await;
        });

        let result = channel.receive_once(Duration::from_secs(5)).await;
        sender.await.unwrap();

        assert!(matches!(
            result,
            Err(BridgeError::MalformedSecretPayload(msg)) if msg.contains("exceeds")
        ));
    }

    #[tokio::test]
    async fn test_no_sender_times_out() {
        let (channel, _addr) = channel().await;
        let result = channel.receive_once(Duration::from_millis(200)).await;
        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_millis(200))));
    }

    #[tokio::test]
    async fn test_sender_that_never_closes_times_out() {
        let (channel, addr) = channel().await;
        let sender = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(br#"{"API_KEY":"#).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let result = channel.receive_once(Duration::from_millis(300)).await;
        assert_eq!(result, Err(BridgeError::Timeout(Duration::from_millis(300))));
        sender.abort();
    }
}

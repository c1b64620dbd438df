// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! The relay worker behind one mapping.
//!
//! A [`Forwarder`] owns the accept loop on a mapping's local endpoint. Every
//! accepted connection is relayed to the remote endpoint on its own task:
//!
//! ```text
//! client ──► local endpoint ──► Forwarder ──► remote endpoint
//!                                  │
//!                                  └─ one task per connection,
//!                                     capped by a semaphore
//! ```
//!
//! Bytes are copied verbatim in both directions. When the remote side closes
//! or either side fails, both halves are torn down and the connection's slot
//! is released. When the client half-closes, its EOF is passed on and the
//! response may drain for at most [`RELAY_LINGER`]. A failed connection only
//! ends its own task; the listener and sibling connections keep running.
//!
//! Accept errors (typically running out of file descriptors) pause the accept
//! loop with a growing delay until an accept succeeds again.
//!
//! When the connection cap is reached, newly accepted connections are closed
//! immediately instead of queueing.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::configuration::{ForwardArgs, ForwardOptions};
use crate::constants::{ACCEPT_RETRY_INITIAL_DELAY, ACCEPT_RETRY_MAX_DELAY, RELAY_LINGER};
use crate::endpoint::{self, BoxedStream, BridgeListener, Endpoint, bind_with_backoff};
use crate::errors::BridgeError;

pub struct Forwarder {
    id: String,
    listener: BridgeListener,
    target: Endpoint,
    permits: Arc<Semaphore>,
}

impl Forwarder {
    /// Binds the local endpoint, retrying while it is still held by a
    /// process that is shutting down.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::PortInUse`] when the endpoint stays busy
    /// - [`BridgeError::BindFailed`] for any other bind failure
    pub async fn bind(
        id: &str,
        listen: &Endpoint,
        target: &Endpoint,
        options: ForwardOptions,
    ) -> Result<Self, BridgeError> {
        let listener = bind_with_backoff(listen, options.bind_attempts).await?;

        Ok(Self {
            id: id.to_string(),
            listener,
            target: target.clone(),
            permits: Arc::new(Semaphore::new(options.max_connections.max(1))),
        })
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.listener.local_endpoint()
    }

    /// Runs the accept loop forever. Only cancellation (task abort or
    /// process termination) stops it.
    pub async fn run(mut self) {
        tracing::info!(
            "[bridge] forwarder {} relaying {} -> {}",
            self.id,
            self.listener.local_endpoint(),
            self.target
        );

        let mut accept_failures = 0u32;

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => {
                    accept_failures = 0;
                    accepted
                }
                Err(err) => {
                    let delay = accept_retry_delay(accept_failures);
                    accept_failures = accept_failures.saturating_add(1);
                    tracing::warn!(
                        "[bridge] forwarder {} accept failed, pausing {:?}: {:?}",
                        self.id,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(
                        "[bridge] forwarder {} at connection limit, rejecting {}",
                        self.id,
                        peer
                    );
                    drop(stream);
                    continue;
                }
            };

            tracing::debug!("[bridge] forwarder {} accepted {}", self.id, peer);

            let target = self.target.clone();
            let id = self.id.clone();
            tokio::spawn(async move {
                relay_connection(&id, stream, &target, &peer).await;
                drop(permit);
            });
        }
    }
}

/// Pause before the next accept after `failures` consecutive accept errors.
fn accept_retry_delay(failures: u32) -> Duration {
    ACCEPT_RETRY_INITIAL_DELAY
        .saturating_mul(2u32.saturating_pow(failures.min(16)))
        .min(ACCEPT_RETRY_MAX_DELAY)
}

/// Relays one accepted connection. Returns once the remote side has closed,
/// either side has failed, or the client has half-closed and the response
/// has drained (or [`RELAY_LINGER`] ran out). Both streams are closed on
/// return.
async fn relay_connection(id: &str, client: BoxedStream, target: &Endpoint, peer: &str) {
    let upstream = match endpoint::connect(target).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::debug!("[bridge] forwarder {} failed to connect {}: {}", id, target, err);
            return;
        }
    };

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let outbound = async {
        let sent = tokio::io::copy(&mut client_read, &mut upstream_write).await?;
        // pass the client's EOF on to the remote
        upstream_write.shutdown().await?;
        Ok::<u64, std::io::Error>(sent)
    };
    let inbound = tokio::io::copy(&mut upstream_read, &mut client_write);
    tokio::pin!(outbound, inbound);

    tokio::select! {
        received = &mut inbound => match received {
            Ok(received) => tracing::debug!(
                "[bridge] forwarder {} remote closed for {} ({} bytes in)",
                id,
                peer,
                received
            ),
            Err(err) => tracing::debug!("[bridge] forwarder {} relay for {} ended: {}", id, peer, err),
        },
        sent = &mut outbound => match sent {
            Ok(sent) => match tokio::time::timeout(RELAY_LINGER, &mut inbound).await {
                Ok(Ok(received)) => tracing::debug!(
                    "[bridge] forwarder {} closed {} ({} bytes out, {} bytes in)",
                    id,
                    peer,
                    sent,
                    received
                ),
                Ok(Err(err)) => {
                    tracing::debug!("[bridge] forwarder {} relay for {} ended: {}", id, peer, err)
                }
                Err(_) => tracing::debug!(
                    "[bridge] forwarder {} gave up on response for {} after {:?}",
                    id,
                    peer,
                    RELAY_LINGER
                ),
            },
            Err(err) => tracing::debug!("[bridge] forwarder {} relay for {} ended: {}", id, peer, err),
        },
    }
}

/// Entry point of the `forward` subcommand.
///
/// # Errors
///
/// Returns the bind error when the local endpoint cannot be bound; the
/// caller exits non-zero so the supervisor's liveness check sees it.
pub async fn run_forward(args: ForwardArgs) -> Result<(), BridgeError> {
    let forwarder = Forwarder::bind(&args.id, &args.listen, &args.target, args.options).await?;
    forwarder.run().await;
    Ok(())
}

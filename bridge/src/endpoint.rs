// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Bridge endpoints and the transport plumbing behind them.
//!
//! An [`Endpoint`] is either a TCP address or a vsock address. Its textual
//! form is stable and is what the forwarder receives on its command line:
//!
//! ```text
//! tcp:<host>:<port>        tcp:127.0.0.1:80, tcp:api.example.com:443
//! vsock:<cid|any>:<port>   vsock:3:8001, vsock:any:3000
//! ```
//!
//! Because the reaper matches forwarder processes by this text, `Display`
//! and `FromStr` must round-trip.

use std::fmt;
use std::io::ErrorKind;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_vsock::{VsockAddr, VsockListener, VsockStream};
use vsock::VMADDR_CID_ANY;

use crate::backoff::Backoff;
use crate::constants::{BIND_RETRY_INITIAL_DELAY, BIND_RETRY_MAX_DELAY, LISTEN_ARG};
use crate::errors::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `host:port`, resolved when connecting.
    Tcp(String),
    Vsock { cid: u32, port: u32 },
}

impl Endpoint {
    /// A TCP endpoint. IPv6 literals are bracketed so the port stays
    /// separable: `tcp("::1", 80)` is `tcp:[::1]:80`.
    pub fn tcp(host: &str, port: u16) -> Self {
        if host.contains(':') && !host.starts_with('[') {
            Self::Tcp(format!("[{host}]:{port}"))
        } else {
            Self::Tcp(format!("{host}:{port}"))
        }
    }

    pub fn vsock(cid: u32, port: u32) -> Self {
        Self::Vsock { cid, port }
    }

    pub fn vsock_any(port: u32) -> Self {
        Self::Vsock {
            cid: VMADDR_CID_ANY,
            port,
        }
    }

    pub fn port(&self) -> u32 {
        match self {
            // validated on construction through FromStr; tcp() always appends a port
            Self::Tcp(addr) => addr
                .rsplit_once(':')
                .and_then(|(_, port)| port.parse::<u32>().ok())
                .unwrap_or_default(),
            Self::Vsock { port, .. } => *port,
        }
    }

    pub fn protocol(&self) -> &'static str {
        match self {
            Self::Tcp(_) => "tcp",
            Self::Vsock { .. } => "vsock",
        }
    }

    /// The exact command-line argument that identifies a forwarder listening
    /// on this endpoint.
    pub fn signature(&self) -> String {
        format!("{LISTEN_ARG}={self}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
            Self::Vsock { cid, port } if *cid == VMADDR_CID_ANY => write!(f, "vsock:any:{port}"),
            Self::Vsock { cid, port } => write!(f, "vsock:{cid}:{port}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BridgeError::InvalidEndpoint(s.to_string());

        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        match scheme {
            "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                let bracketed = host.starts_with('[') && host.ends_with(']');
                if host.is_empty() || (host.contains(':') && !bracketed) {
                    return Err(invalid());
                }
                port.parse::<u16>().map_err(|_| invalid())?;
                Ok(Self::Tcp(rest.to_string()))
            }
            "vsock" => {
                let (cid, port) = rest.split_once(':').ok_or_else(invalid)?;
                let cid = match cid {
                    "any" => VMADDR_CID_ANY,
                    cid => cid.parse::<u32>().map_err(|_| invalid())?,
                };
                let port = port.parse::<u32>().map_err(|_| invalid())?;
                Ok(Self::Vsock { cid, port })
            }
            _ => Err(invalid()),
        }
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// A bidirectional byte stream from either transport.
pub trait BridgeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BridgeStream for T {}

pub type BoxedStream = Box<dyn BridgeStream>;

enum ListenerKind {
    Tcp(TcpListener),
    Vsock(VsockListener),
}

/// A bound listener on either transport.
pub struct BridgeListener {
    endpoint: Endpoint,
    inner: ListenerKind,
}

impl BridgeListener {
    pub async fn bind(endpoint: &Endpoint) -> std::io::Result<Self> {
        let inner = match endpoint {
            Endpoint::Tcp(addr) => ListenerKind::Tcp(TcpListener::bind(addr.as_str()).await?),
            Endpoint::Vsock { cid, port } => {
                ListenerKind::Vsock(VsockListener::bind(VsockAddr::new(*cid, *port))?)
            }
        };

        Ok(Self {
            endpoint: endpoint.clone(),
            inner,
        })
    }

    /// The endpoint actually bound. For TCP this resolves an ephemeral port.
    pub fn local_endpoint(&self) -> Endpoint {
        match &self.inner {
            ListenerKind::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => Endpoint::Tcp(addr.to_string()),
                Err(_) => self.endpoint.clone(),
            },
            ListenerKind::Vsock(_) => self.endpoint.clone(),
        }
    }

    /// Accepts one connection, returning the stream and a printable peer.
    pub async fn accept(&mut self) -> std::io::Result<(BoxedStream, String)> {
        match &mut self.inner {
            ListenerKind::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Box::new(stream), peer.to_string()))
            }
            ListenerKind::Vsock(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Box::new(stream), format!("vsock:{}:{}", peer.cid(), peer.port())))
            }
        }
    }
}

/// Opens a connection to `endpoint`.
pub async fn connect(endpoint: &Endpoint) -> std::io::Result<BoxedStream> {
    match endpoint {
        Endpoint::Tcp(addr) => Ok(Box::new(TcpStream::connect(addr.as_str()).await?)),
        Endpoint::Vsock { cid, port } => Ok(Box::new(
            VsockStream::connect(VsockAddr::new(*cid, *port)).await?,
        )),
    }
}

/// Binds `endpoint`, retrying with backoff while the address is still in use.
///
/// # Errors
///
/// - [`BridgeError::PortInUse`] when the address stays busy for every attempt
/// - [`BridgeError::BindFailed`] for any other bind error (no retry)
#[tracing::instrument]
pub async fn bind_with_backoff(
    endpoint: &Endpoint,
    attempts: u32,
) -> Result<BridgeListener, BridgeError> {
    let mut backoff = Backoff::new(attempts, BIND_RETRY_INITIAL_DELAY, BIND_RETRY_MAX_DELAY);

    loop {
        match BridgeListener::bind(endpoint).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == ErrorKind::AddrInUse => match backoff.next_delay() {
                Some(delay) => {
                    tracing::debug!("[bridge] {} in use, retrying in {:?}", endpoint, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(BridgeError::PortInUse(endpoint.clone())),
            },
            Err(err) => {
                return Err(BridgeError::BindFailed {
                    endpoint: endpoint.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_tcp() {
        let endpoint: Endpoint = "tcp:127.0.0.1:80".parse().unwrap();
        assert_eq!(endpoint, Endpoint::tcp("127.0.0.1", 80));
        assert_eq!(endpoint.port(), 80);
        assert_eq!(endpoint.protocol(), "tcp");
    }

    #[test]
    fn test_parse_tcp_hostname_and_ipv6() {
        let endpoint: Endpoint = "tcp:api.example.com:443".parse().unwrap();
        assert_eq!(endpoint.port(), 443);

        let endpoint: Endpoint = "tcp:[::1]:8080".parse().unwrap();
        assert_eq!(endpoint.port(), 8080);
        assert_eq!(endpoint.to_string(), "tcp:[::1]:8080");
    }

    #[test]
    fn test_tcp_brackets_ipv6_hosts() {
        let endpoint = Endpoint::tcp("::1", 80);
        assert_eq!(endpoint.to_string(), "tcp:[::1]:80");
        assert_eq!(endpoint.port(), 80);
        assert_eq!("tcp:[::1]:80".parse::<Endpoint>().unwrap(), endpoint);

        // already bracketed hosts are kept as given
        assert_eq!(Endpoint::tcp("[::1]", 80), endpoint);
        assert_eq!(Endpoint::tcp("10.0.0.1", 80).to_string(), "tcp:10.0.0.1:80");
    }

    #[test]
    fn test_parse_vsock() {
        let endpoint: Endpoint = "vsock:16:3000".parse().unwrap();
        assert_eq!(endpoint, Endpoint::vsock(16, 3000));
        assert_eq!(endpoint.protocol(), "vsock");
    }

    #[test]
    fn test_parse_vsock_any() {
        let endpoint: Endpoint = "vsock:any:8001".parse().unwrap();
        assert_eq!(endpoint, Endpoint::vsock_any(8001));
        assert_eq!(endpoint.to_string(), "vsock:any:8001");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in [
            "",
            "tcp",
            "tcp:80",
            "tcp::80",
            "tcp:::1:80",
            "tcp:[::1:80",
            "tcp:localhost:99999",
            "udp:127.0.0.1:53",
            "vsock:3",
            "vsock:x:1",
            "vsock:3:-1",
        ] {
            let result = text.parse::<Endpoint>();
            assert_eq!(
                result,
                Err(BridgeError::InvalidEndpoint(text.to_string())),
                "{text}"
            );
        }
    }

    #[test]
    fn test_signature_is_exact_listen_argument() {
        let endpoint = Endpoint::tcp("127.0.0.1", 80);
        assert_eq!(endpoint.signature(), "--listen=tcp:127.0.0.1:80");
        assert_ne!(
            endpoint.signature(),
            Endpoint::tcp("127.0.0.1", 8080).signature()
        );
    }

    #[test]
    fn test_serde_as_string() {
        let endpoint = Endpoint::vsock(3, 8002);
        let json = serde_json::to_string(&endpoint).unwrap();
        assert_eq!(json, r#""vsock:3:8002""#);

        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, endpoint);

        assert!(serde_json::from_str::<Endpoint>(r#""nope""#).is_err());
    }

    // ==================== Transport Tests ====================

    #[tokio::test]
    async fn test_tcp_listener_resolves_ephemeral_port() {
        let listener = BridgeListener::bind(&Endpoint::tcp("127.0.0.1", 0))
            .await
            .unwrap();
        let local = listener.local_endpoint();
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_tcp_connect_and_accept() {
        let mut listener = BridgeListener::bind(&Endpoint::tcp("127.0.0.1", 0))
            .await
            .unwrap();
        let local = listener.local_endpoint();

        let client = tokio::spawn(async move {
            let mut stream = connect(&local).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let (mut stream, peer) = listener.accept().await.unwrap();
        assert!(peer.starts_with("127.0.0.1:"));

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_with_backoff_reports_port_in_use() {
        let held = BridgeListener::bind(&Endpoint::tcp("127.0.0.1", 0))
            .await
            .unwrap();
        let busy = held.local_endpoint();

        let result = bind_with_backoff(&busy, 2).await;
        assert!(matches!(result, Err(BridgeError::PortInUse(ref e)) if *e == busy));
    }

    #[tokio::test]
    async fn test_bind_with_backoff_succeeds_once_released() {
        let held = BridgeListener::bind(&Endpoint::tcp("127.0.0.1", 0))
            .await
            .unwrap();
        let endpoint = held.local_endpoint();

        let release = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            drop(held);
        });

        let listener = bind_with_backoff(&endpoint, 6).await;
        assert!(listener.is_ok());
        release.await.unwrap();
    }
}

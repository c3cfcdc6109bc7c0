//! Socket link implementations (TCP and UDP).
//!
//! Both follow the same [`Link`] contract as the serial variant: failures to
//! establish the connection are configuration errors, failures on an open
//! connection are communication errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use super::Link;
use crate::codec::FramingConfig;
use crate::error::{CmdLinkError, Result};

fn default_timeout_secs() -> f64 {
    0.01
}

/// Transport-layer protocol selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketProtocol {
    Tcp,
    Udp,
}

impl Default for SocketProtocol {
    fn default() -> Self {
        SocketProtocol::Tcp
    }
}

/// Socket link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketLinkConfig {
    /// Remote host address or name.
    pub address: String,
    /// Remote port.
    pub port: u16,
    /// TCP or UDP.
    #[serde(default)]
    pub protocol: SocketProtocol,
    /// Read timeout in seconds; bounds the read loop's stop latency.
    #[serde(default = "default_timeout_secs")]
    pub timeout: f64,
    /// Framing parameters for this link.
    #[serde(flatten)]
    pub framing: FramingConfig,
}

impl SocketLinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(CmdLinkError::config("socket address cannot be empty"));
        }
        if self.port == 0 {
            return Err(CmdLinkError::config("socket port cannot be zero"));
        }
        if self.timeout <= 0.0 {
            return Err(CmdLinkError::config("read timeout must be positive"));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    fn peer(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Open the link variant selected by the configuration.
pub async fn open(config: &SocketLinkConfig) -> Result<Arc<dyn Link>> {
    config.validate()?;
    match config.protocol {
        SocketProtocol::Tcp => Ok(Arc::new(TcpLink::connect(config).await?)),
        SocketProtocol::Udp => Ok(Arc::new(UdpLink::connect(config).await?)),
    }
}

/// TCP stream link.
#[derive(Debug)]
pub struct TcpLink {
    name: String,
    rd: Mutex<Option<OwnedReadHalf>>,
    wr: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpLink {
    pub async fn connect(config: &SocketLinkConfig) -> Result<Self> {
        config.validate()?;
        let peer = config.peer();

        debug!(peer = %peer, "opening TCP connection");
        let stream = TcpStream::connect(&peer)
            .await
            .map_err(|e| CmdLinkError::config(format!("cannot connect to {peer}: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (rd, wr) = stream.into_split();
        Ok(Self {
            name: peer,
            rd: Mutex::new(Some(rd)),
            wr: Mutex::new(Some(wr)),
        })
    }
}

#[async_trait]
impl Link for TcpLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.wr.lock().await;
        let wr = guard
            .as_mut()
            .ok_or_else(|| CmdLinkError::communication(format!("{} is closed", self.name)))?;
        wr.write_all(data)
            .await
            .map_err(|e| CmdLinkError::communication(format!("write to {} failed: {e}", self.name)))?;
        Ok(data.len())
    }

    async fn receive(&self, buf: &mut [u8], read_timeout: Duration) -> Result<usize> {
        let mut guard = self.rd.lock().await;
        let rd = guard
            .as_mut()
            .ok_or_else(|| CmdLinkError::communication(format!("{} is closed", self.name)))?;
        match timeout(read_timeout, rd.read(buf)).await {
            Err(_) => Ok(0),
            // a zero-byte read on TCP means the peer closed the stream
            Ok(Ok(0)) => Err(CmdLinkError::communication(format!(
                "{} closed by peer",
                self.name
            ))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(CmdLinkError::communication(format!(
                "read from {} failed: {e}",
                self.name
            ))),
        }
    }

    async fn close(&self) {
        self.rd.lock().await.take();
        self.wr.lock().await.take();
        debug!(peer = %self.name, "TCP connection closed");
    }
}

/// Connected-UDP datagram link. Each received datagram is fed through the
/// same byte decoder as a stream, so frames may span datagrams.
#[derive(Debug)]
pub struct UdpLink {
    name: String,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpLink {
    pub async fn connect(config: &SocketLinkConfig) -> Result<Self> {
        config.validate()?;
        let peer = config.peer();

        debug!(peer = %peer, "opening UDP socket");
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| CmdLinkError::config(format!("cannot bind UDP socket: {e}")))?;
        socket
            .connect(&peer)
            .await
            .map_err(|e| CmdLinkError::config(format!("cannot connect to {peer}: {e}")))?;

        Ok(Self {
            name: peer,
            socket: Mutex::new(Some(Arc::new(socket))),
        })
    }

    async fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.socket
            .lock()
            .await
            .clone()
            .ok_or_else(|| CmdLinkError::communication(format!("{} is closed", self.name)))
    }
}

#[async_trait]
impl Link for UdpLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, data: &[u8]) -> Result<usize> {
        let socket = self.socket().await?;
        socket
            .send(data)
            .await
            .map_err(|e| CmdLinkError::communication(format!("send to {} failed: {e}", self.name)))
    }

    async fn receive(&self, buf: &mut [u8], read_timeout: Duration) -> Result<usize> {
        let socket = self.socket().await?;
        match timeout(read_timeout, socket.recv(buf)).await {
            Err(_) => Ok(0),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(CmdLinkError::communication(format!(
                "recv from {} failed: {e}",
                self.name
            ))),
        }
    }

    async fn close(&self) {
        self.socket.lock().await.take();
        debug!(peer = %self.name, "UDP socket closed");
    }
}

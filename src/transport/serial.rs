//! Serial link implementation.
//!
//! Wraps a `tokio-serial` stream behind the [`Link`] contract. The stream is
//! split into read and write halves guarded by separate async mutexes, so
//! sends from caller tasks never contend with the session's read loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

use super::Link;
use crate::codec::FramingConfig;
use crate::error::{CmdLinkError, Result};

/// Default baud rate for microcontroller links.
pub const DEFAULT_BAUDRATE: u32 = 115_200;

fn default_baudrate() -> u32 {
    DEFAULT_BAUDRATE
}

fn default_timeout_secs() -> f64 {
    0.01
}

/// Serial link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialLinkConfig {
    /// Serial port path (e.g. "/dev/ttyACM0", "COM3").
    pub port: String,
    /// Baud rate.
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Read timeout in seconds; bounds the read loop's stop latency.
    #[serde(default = "default_timeout_secs")]
    pub timeout: f64,
    /// Framing parameters for this link.
    #[serde(flatten)]
    pub framing: FramingConfig,
}

impl Default for SerialLinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baudrate: DEFAULT_BAUDRATE,
            timeout: default_timeout_secs(),
            framing: FramingConfig::default(),
        }
    }
}

impl SerialLinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port.is_empty() {
            return Err(CmdLinkError::config("serial port path cannot be empty"));
        }
        if self.baudrate == 0 {
            return Err(CmdLinkError::config("baud rate must be greater than zero"));
        }
        if self.timeout <= 0.0 {
            return Err(CmdLinkError::config("read timeout must be positive"));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

/// Serial port link.
#[derive(Debug)]
pub struct SerialLink {
    name: String,
    rd: Mutex<Option<ReadHalf<SerialStream>>>,
    wr: Mutex<Option<WriteHalf<SerialStream>>>,
}

impl SerialLink {
    /// Open the port. A failure here (missing device, permission, bad
    /// parameters) is a configuration error.
    pub fn open(config: &SerialLinkConfig) -> Result<Self> {
        config.validate()?;

        debug!(port = %config.port, baudrate = config.baudrate, "opening serial port");
        #[cfg_attr(not(unix), allow(unused_mut))]
        let mut port = tokio_serial::new(&config.port, config.baudrate)
            .open_native_async()
            .map_err(|e| {
                CmdLinkError::config(format!("failed to open serial port {}: {e}", config.port))
            })?;

        #[cfg(unix)]
        port.set_exclusive(false)
            .map_err(|e| CmdLinkError::config(format!("failed to set exclusive mode: {e}")))?;

        let (rd, wr) = tokio::io::split(port);
        Ok(Self {
            name: config.port.clone(),
            rd: Mutex::new(Some(rd)),
            wr: Mutex::new(Some(wr)),
        })
    }
}

#[async_trait]
impl Link for SerialLink {
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
        wr.flush()
            .await
            .map_err(|e| CmdLinkError::communication(format!("flush to {} failed: {e}", self.name)))?;
        Ok(data.len())
    }

    async fn receive(&self, buf: &mut [u8], read_timeout: Duration) -> Result<usize> {
        let mut guard = self.rd.lock().await;
        let rd = guard
            .as_mut()
            .ok_or_else(|| CmdLinkError::communication(format!("{} is closed", self.name)))?;
        match timeout(read_timeout, rd.read(buf)).await {
            Err(_) => Ok(0),
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
        debug!(port = %self.name, "serial port closed");
    }
}

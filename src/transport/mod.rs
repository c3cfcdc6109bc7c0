//! Transport layer: byte links and command sessions.
//!
//! A [`Link`] is one physical or logical byte-stream connection (serial
//! port, TCP/UDP socket, or a mock for tests). A [`Session`] owns exactly
//! one link, a top-level [`Dispatcher`], and a background read loop that
//! feeds incoming bytes through a [`StreamDecoder`] and dispatches every
//! complete frame.

pub mod mock;
pub mod serial;
pub mod socket;

pub use mock::MockLink;
pub use serial::{SerialLink, SerialLinkConfig};
pub use socket::{SocketLinkConfig, SocketProtocol, TcpLink, UdpLink};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{CmdArg, FrameCodec, FramingConfig, StreamDecoder};
use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Default per-read timeout; also bounds how quickly the read loop notices
/// a stop signal.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// One byte-stream connection.
///
/// `send` may be called from any task concurrently with `receive`; the two
/// paths touch disjoint halves of the connection.
#[async_trait]
pub trait Link: Send + Sync + fmt::Debug {
    /// Identifier used in logs and errors (port path or peer address).
    fn name(&self) -> &str;

    /// Write raw bytes. A failure is a communication error; the link does
    /// not retry.
    async fn send(&self, data: &[u8]) -> Result<usize>;

    /// Read available bytes into `buf`, waiting at most `timeout`.
    /// `Ok(0)` means nothing arrived within the timeout.
    async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the connection. Idempotent; the link cannot be reopened.
    async fn close(&self);
}

/// A command session over one link.
///
/// Lifecycle: construct (opens the connection — a failure here is a
/// configuration error), [`start`](Session::start) (spawns the read loop),
/// [`stop`](Session::stop) (cancels the loop and closes the link). A stopped
/// session is never restarted; create a new one.
pub struct Session {
    link: Arc<dyn Link>,
    codec: FrameCodec,
    dispatch: Arc<Dispatcher>,
    read_timeout: Duration,
    cancel: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("link", &self.link)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a serial session. Fails with a configuration error when the
    /// port cannot be opened.
    pub fn serial(config: &SerialLinkConfig) -> Result<Arc<Self>> {
        let link = SerialLink::open(config)?;
        Self::with_link(Arc::new(link), &config.framing, config.read_timeout())
    }

    /// Open a socket session (TCP or UDP per the config). Fails with a
    /// configuration error when the connection cannot be established.
    pub async fn socket(config: &SocketLinkConfig) -> Result<Arc<Self>> {
        let link = socket::open(config).await?;
        Self::with_link(link, &config.framing, config.read_timeout())
    }

    /// Build a session around an already-open link. Used by the typed
    /// constructors and by tests running against a [`MockLink`].
    pub fn with_link(
        link: Arc<dyn Link>,
        framing: &FramingConfig,
        read_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let codec = framing.codec()?;
        let dispatch = Arc::new(Dispatcher::new(codec.clone()));
        Ok(Arc::new(Self {
            link,
            codec,
            dispatch,
            read_timeout,
            cancel: CancellationToken::new(),
            reader: parking_lot::Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        self.link.name()
    }

    pub fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    pub fn dispatch(&self) -> &Arc<Dispatcher> {
        &self.dispatch
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Spawn the background read loop. Idempotent; returns immediately.
    pub fn start(self: &Arc<Self>) {
        let mut reader = self.reader.lock();
        if reader.is_some() {
            return;
        }

        let link = self.link.clone();
        let dispatch = self.dispatch.clone();
        let cancel = self.cancel.clone();
        let read_timeout = self.read_timeout;
        let mut decoder = StreamDecoder::new(self.codec.terminator());

        *reader = Some(tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while !cancel.is_cancelled() {
                match link.receive(&mut buf, read_timeout).await {
                    Ok(0) => {} // nothing yet; loop re-checks the stop signal
                    Ok(n) => {
                        for frame in decoder.push_bytes(&buf[..n]) {
                            dispatch.handle(&frame);
                        }
                    }
                    Err(err) => {
                        warn!(link = link.name(), error = %err, "read loop terminated");
                        break;
                    }
                }
            }
            link.close().await;
            debug!(link = link.name(), "read loop exited, connection closed");
        }));
    }

    /// Signal the read loop to stop and wait for it to close the link.
    /// Shutdown latency is bounded by roughly one read-timeout interval.
    /// In-flight getters on other tasks are unaffected; they time out on
    /// their own gates.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        } else {
            self.link.close().await;
        }
    }

    /// Encode a command with this session's framing and write it to the
    /// link. Thread-safe against the read loop.
    pub async fn send(&self, command_id: &str, args: &[CmdArg]) -> Result<()> {
        self.write_raw(&self.codec.encode(command_id, args)).await
    }

    /// Write an already-encoded frame to the link.
    pub async fn write_raw(&self, text: &str) -> Result<()> {
        debug!(link = self.link.name(), frame = text, "sending");
        self.link.send(text.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CommandCallback;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_session_dispatches_injected_frames() {
        let link = MockLink::new("mock0");
        let session =
            Session::with_link(link.clone(), &FramingConfig::default(), DEFAULT_READ_TIMEOUT)
                .unwrap();

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: CommandCallback = Arc::new(move |args: &[String]| {
            sink.lock().push(args.join(","));
        });
        session.dispatch().add_command("A", callback);

        session.start();
        link.inject("A,1;A,2;");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec!["1", "2"]);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_send_encodes_with_session_framing() {
        let link = MockLink::new("mock0");
        let session =
            Session::with_link(link.clone(), &FramingConfig::default(), DEFAULT_READ_TIMEOUT)
                .unwrap();

        session.send("M1", &["BONJOUR".into()]).await.unwrap();
        assert_eq!(link.sent(), vec!["M1,BONJOUR;"]);
    }

    #[tokio::test]
    async fn test_stop_closes_link_and_is_prompt() {
        let link = MockLink::new("mock0");
        let session =
            Session::with_link(link.clone(), &FramingConfig::default(), DEFAULT_READ_TIMEOUT)
                .unwrap();
        session.start();

        let started = tokio::time::Instant::now();
        session.stop().await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(link.is_closed());

        // a stopped session refuses nothing but the link is gone
        assert!(session.send("X", &[]).await.is_err());
    }
}

//! In-memory link for tests.
//!
//! Plays the role of an attached peripheral: bytes written by the engine are
//! recorded (and optionally answered through a scripted responder), bytes
//! injected by the test appear on the receive side.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use super::Link;
use crate::error::{CmdLinkError, Result};

/// Scripted reply: given the raw text written by the engine, optionally
/// produce bytes to feed back.
pub type MockResponder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Mock byte link.
pub struct MockLink {
    name: String,
    inbound: Mutex<VecDeque<u8>>,
    arrived: Notify,
    sent: Mutex<Vec<String>>,
    responder: Mutex<Option<MockResponder>>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl fmt::Debug for MockLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockLink")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockLink {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            inbound: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Install a scripted peripheral: called for every write, its returned
    /// text (if any) is injected into the receive side.
    pub fn set_responder(&self, responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static) {
        *self.responder.lock() = Some(Arc::new(responder));
    }

    /// Feed bytes into the receive side, as if the peripheral had sent them.
    pub fn inject(&self, text: &str) {
        self.inbound.lock().extend(text.as_bytes());
        self.arrived.notify_waiters();
    }

    /// Everything written so far, one entry per `send` call.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Make subsequent sends fail with a communication error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Link for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, data: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(CmdLinkError::communication(format!("{} is closed", self.name)));
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(CmdLinkError::communication(format!(
                "scripted write failure on {}",
                self.name
            )));
        }

        let text = String::from_utf8_lossy(data).into_owned();
        self.sent.lock().push(text.clone());

        let responder = self.responder.lock().clone();
        if let Some(responder) = responder {
            if let Some(reply) = responder(&text) {
                self.inject(&reply);
            }
        }
        Ok(data.len())
    }

    async fn receive(&self, buf: &mut [u8], read_timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + read_timeout;
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            // register interest before checking the queue, so an inject
            // landing in between still wakes this wait
            arrived.as_mut().enable();
            {
                let mut inbound = self.inbound.lock();
                if !inbound.is_empty() {
                    let n = inbound.len().min(buf.len());
                    for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }
            if self.closed.load(Ordering::Relaxed) {
                return Err(CmdLinkError::communication(format!("{} is closed", self.name)));
            }
            if timeout_at(deadline, arrived).await.is_err() {
                return Ok(0);
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.arrived.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inject_then_receive() {
        let link = MockLink::new("mock0");
        link.inject("A,1;");

        let mut buf = [0u8; 16];
        let n = link.receive(&mut buf, Duration::from_millis(50)).await.unwrap();
        assert_eq!(&buf[..n], b"A,1;");
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let link = MockLink::new("mock0");
        let mut buf = [0u8; 16];
        let n = link.receive(&mut buf, Duration::from_millis(20)).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_responder_answers_writes() {
        let link = MockLink::new("mock0");
        link.set_responder(|written| {
            (written == "M1,BONJOUR;").then(|| "M1,BONJOUR,SERVO;".to_string())
        });

        link.send(b"M1,BONJOUR;").await.unwrap();
        assert_eq!(link.sent(), vec!["M1,BONJOUR;"]);

        let mut buf = [0u8; 32];
        let n = link.receive(&mut buf, Duration::from_millis(50)).await.unwrap();
        assert_eq!(&buf[..n], b"M1,BONJOUR,SERVO;");
    }

    #[tokio::test]
    async fn test_scripted_send_failure() {
        let link = MockLink::new("mock0");
        link.fail_sends(true);
        assert!(link.send(b"X;").await.is_err());
    }
}

//! Bonjour device discovery.
//!
//! To find out which link hosts the peripheral answering to a given logical
//! address, each candidate session is probed in turn: a temporary relay
//! loops the address's traffic back into the session's own dispatcher, a
//! temporary handler catches the `BONJOUR` reply, and a gated wait bounds
//! the probe. Probes always roll the session's dispatch state back to
//! exactly what it was beforehand.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::dispatch::{CommandCallback, FrameCallback};
use crate::error::{CmdLinkError, Result};
use crate::gate::Gate;
use crate::transport::Session;

/// Discovery keyword a probed peripheral echoes back with its kind string.
pub const COMMAND_BONJOUR: &str = "BONJOUR";

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Outcome of probing one session for one address.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// The peripheral answered with its kind string.
    Found { kind: String, elapsed: Duration },
    /// Nothing answered within the probe timeout.
    Silent { elapsed: Duration },
}

// Per-probe state, alive for one probe only.
#[derive(Debug, Default)]
struct ProbeRecord {
    kind: String,
    valid: bool,
}

/// Runs bonjour probes against candidate sessions.
pub struct DiscoveryService {
    probe_timeout: Duration,
}

impl Default for DiscoveryService {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl DiscoveryService {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Probe one session for one logical address.
    ///
    /// Installs the loopback relay and the temporary `BONJOUR` handler,
    /// sends `<command_id>,BONJOUR`, waits up to the probe timeout, then
    /// removes both again — regardless of outcome. Only a failed send is an
    /// error; an unanswered probe is a normal [`ProbeOutcome::Silent`].
    pub async fn probe(&self, session: &Arc<Session>, command_id: &str) -> Result<ProbeOutcome> {
        debug!(link = session.name(), id = command_id, "probing for device");

        let record = Arc::new(Mutex::new(ProbeRecord::default()));
        let gate = Arc::new(Gate::new(self.probe_timeout));
        let dispatch = session.dispatch().clone();

        // a device replies under its own address; loop that traffic back
        // into this session's dispatcher so the reply reaches the handler
        let loopback = dispatch.clone();
        let relay: FrameCallback = Arc::new(move |remaining: &str| loopback.handle(remaining));

        let handler: CommandCallback = {
            let record = record.clone();
            let gate = gate.clone();
            Arc::new(move |args: &[String]| {
                let Some(kind) = args.first() else { return };
                if kind.is_empty() {
                    return;
                }
                let mut record = record.lock();
                record.kind = kind.clone();
                record.valid = true;
                gate.ensure_released();
            })
        };

        dispatch.add_relay(command_id, relay.clone());
        dispatch.add_command(COMMAND_BONJOUR, handler.clone());

        gate.acquire().await;
        let sent = session.send(command_id, &[COMMAND_BONJOUR.into()]).await;
        let mut waited = (false, Duration::ZERO);
        if sent.is_ok() {
            waited = gate.wait_until_released().await;
        }
        gate.ensure_released();

        dispatch.remove_command(COMMAND_BONJOUR, &handler);
        dispatch.remove_relay(command_id, &relay);

        sent?;
        let (answered, elapsed) = waited;

        let record = record.lock();
        if answered && record.valid {
            Ok(ProbeOutcome::Found {
                kind: record.kind.clone(),
                elapsed,
            })
        } else {
            Ok(ProbeOutcome::Silent { elapsed })
        }
    }

    /// Linear scan across candidate sessions: the first one whose
    /// peripheral answers wins. Exhaustion is a
    /// [`CmdLinkError::DiscoveryTimeout`].
    pub async fn detect(
        &self,
        sessions: &[Arc<Session>],
        command_id: &str,
    ) -> Result<(Arc<Session>, String, Duration)> {
        let start = Instant::now();
        for session in sessions {
            match self.probe(session, command_id).await? {
                ProbeOutcome::Found { kind, elapsed } => {
                    debug!(
                        link = session.name(),
                        id = command_id,
                        %kind,
                        ?elapsed,
                        "device answered probe"
                    );
                    return Ok((session.clone(), kind, start.elapsed()));
                }
                ProbeOutcome::Silent { .. } => continue,
            }
        }
        Err(CmdLinkError::DiscoveryTimeout {
            command_id: command_id.to_string(),
        })
    }
}

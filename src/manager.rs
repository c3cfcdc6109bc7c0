//! Manager orchestrating sessions and device proxies.
//!
//! Brings up every configured link (tolerating missing optional hardware),
//! runs the ISINIT/INIT readiness handshake per link, then registers each
//! configured device: bonjour discovery picks the hosting session, the
//! registry builds the proxy, a relay routes the device's traffic into its
//! private dispatch scope, and `init` pushes the initial configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DeviceEntry, LinkEntry, LinkKind, ManagerConfig};
use crate::devices::{Device, DeviceRegistry};
use crate::discovery::DiscoveryService;
use crate::error::{CmdLinkError, Result};
use crate::gate::Gate;
use crate::transport::Session;

/// Readiness request sent to a freshly opened link.
pub const COMMAND_IS_INIT: &str = "ISINIT";

/// Readiness reply (payload `0`/`1`).
pub const COMMAND_INIT: &str = "INIT";

/// Default gate timeout per handshake attempt.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of handshake attempts. A freshly opened serial connection
/// commonly resets the microcontroller, so the first requests may fall into
/// its boot window.
pub const DEFAULT_INIT_ATTEMPTS: u32 = 5;

/// Orchestrates transport sessions and device proxies.
pub struct CommandManager {
    sessions: RwLock<Vec<Arc<Session>>>,
    devices: DashMap<String, Arc<dyn Device>>,
    registry: DeviceRegistry,
    discovery: DiscoveryService,
    init_timeout: Duration,
    init_attempts: u32,
    // suppresses unknown-command warnings during startup, when cross-talk
    // between multiple attached boards is normal
    ready: Arc<AtomicBool>,
}

impl CommandManager {
    /// Manager with explicit tuning. The registry is owned by the manager;
    /// there is no global one.
    pub fn new(registry: DeviceRegistry) -> Self {
        Self::with_tuning(
            registry,
            DEFAULT_INIT_TIMEOUT,
            DEFAULT_INIT_ATTEMPTS,
            crate::discovery::DEFAULT_PROBE_TIMEOUT,
        )
    }

    pub fn with_tuning(
        registry: DeviceRegistry,
        init_timeout: Duration,
        init_attempts: u32,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            devices: DashMap::new(),
            registry,
            discovery: DiscoveryService::new(probe_timeout),
            init_timeout,
            init_attempts,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build the full system from a configuration: links first, then
    /// devices. Only a required link that fails to open aborts startup.
    pub async fn from_config(config: &ManagerConfig) -> Result<Self> {
        config.validate()?;
        let manager = Self::with_tuning(
            crate::devices::default_registry(),
            config.init.timeout(),
            config.init.attempts,
            config.init.probe_timeout(),
        );

        for link in &config.links {
            manager.add_session(link).await?;
        }
        for (name, entry) in &config.devices {
            manager.register_device(name, entry).await?;
        }

        manager.mark_ready();
        Ok(manager)
    }

    /// Load a YAML/JSON config file and build the system from it.
    pub async fn from_config_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config = ManagerConfig::from_file(path.as_ref())?;
        Self::from_config(&config).await
    }

    /// Open, start, and handshake one configured link. A failure to open is
    /// fatal for `required` links and a logged skip otherwise. A failed
    /// handshake keeps the session but flags it unready.
    pub async fn add_session(&self, entry: &LinkEntry) -> Result<Option<Arc<Session>>> {
        let session = match open_session(entry).await {
            Ok(session) => session,
            Err(err) if entry.required => {
                return Err(CmdLinkError::config(format!(
                    "required link failed to open: {err}"
                )));
            }
            Err(err) => {
                warn!(error = %err, "optional link failed to open, skipping");
                return Ok(None);
            }
        };

        let ready = self.ready.clone();
        session
            .dispatch()
            .add_default_handler(Arc::new(move |frame: &str| {
                if ready.load(Ordering::Relaxed) {
                    warn!(frame, "received unknown command");
                } else {
                    debug!(frame, "received unknown command during startup");
                }
            }));

        session.start();

        match self.wait_link_ready(&session).await {
            Ok(elapsed) => {
                info!(link = session.name(), ?elapsed, "link ready");
            }
            Err(err) => {
                warn!(link = session.name(), error = %err, "link is not ready, keeping it anyway");
            }
        }

        self.sessions.write().push(session.clone());
        Ok(Some(session))
    }

    /// Adopt an already-started session (embedding and tests).
    pub fn attach_session(&self, session: Arc<Session>) {
        self.sessions.write().push(session);
    }

    /// ISINIT/INIT readiness handshake with bounded retries.
    pub async fn wait_link_ready(&self, session: &Arc<Session>) -> Result<Duration> {
        debug!(link = session.name(), "waiting for init handshake");
        let start = Instant::now();
        let gate = Arc::new(Gate::new(self.init_timeout));

        let handler = {
            let gate = gate.clone();
            let callback: crate::dispatch::CommandCallback = Arc::new(move |args: &[String]| {
                let Some(flag) = args.first() else { return };
                if flag.parse::<i64>().map(|v| v != 0).unwrap_or(false) {
                    gate.ensure_released();
                }
            });
            callback
        };
        session.dispatch().add_command(COMMAND_INIT, handler.clone());

        gate.acquire().await;
        let mut ready = false;
        let mut attempt_result = Ok(());
        for _ in 0..self.init_attempts {
            if let Err(err) = session.send(COMMAND_IS_INIT, &[]).await {
                attempt_result = Err(err);
                break;
            }
            let (answered, _) = gate.wait_until_released().await;
            if answered {
                ready = true;
                break;
            }
        }
        gate.ensure_released();
        session.dispatch().remove_command(COMMAND_INIT, &handler);

        attempt_result?;
        if ready {
            Ok(start.elapsed())
        } else {
            Err(CmdLinkError::InitTimeout {
                link: session.name().to_string(),
            })
        }
    }

    /// Discover and build one configured device. A discovery timeout is a
    /// logged skip; an unknown kind degrades to a blank device.
    pub async fn register_device(&self, name: &str, entry: &DeviceEntry) -> Result<()> {
        let sessions = self.sessions.read().clone();
        match self.discovery.detect(&sessions, &entry.command_id).await {
            Ok((session, kind, elapsed)) => {
                info!(
                    device = name,
                    id = %entry.command_id,
                    %kind,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "device found"
                );
                let device = match self.registry.create(&kind, &entry.config) {
                    Ok(device) => device,
                    Err(CmdLinkError::UnknownDeviceKind { kind }) => {
                        warn!(
                            device = name,
                            %kind,
                            "device kind is not in the registry, creating a blank device instead"
                        );
                        self.registry.create_fallback(&entry.config)?
                    }
                    Err(err) => return Err(err),
                };

                device.bind(&entry.command_id, session.link().clone());
                let relay_target = device.clone();
                session.dispatch().add_relay(
                    &entry.command_id,
                    Arc::new(move |frame: &str| relay_target.handle_frame(frame)),
                );
                device.init().await?;
                self.devices.insert(name.to_string(), device);
            }
            Err(CmdLinkError::DiscoveryTimeout { command_id }) => {
                warn!(device = name, id = %command_id, "device not found on any link, skipping");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Mark startup complete; unknown-command warnings are no longer
    /// suppressed.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn device(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.devices.get(name).map(|entry| entry.value().clone())
    }

    /// Typed device accessor.
    pub fn typed_device<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.device(name)?.as_any_arc().downcast::<T>().ok()
    }

    pub fn device_names(&self) -> Vec<String> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().clone()
    }

    /// Stop one session and drop every device whose write path was bound to
    /// its link (identity comparison).
    pub async fn remove_session(&self, session: &Arc<Session>) {
        self.sessions.write().retain(|s| !Arc::ptr_eq(s, session));

        let stale: Vec<String> = self
            .devices
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .bound_link()
                    .is_some_and(|link| Arc::ptr_eq(&link, session.link()))
            })
            .map(|entry| entry.key().clone())
            .collect();
        for name in stale {
            debug!(device = %name, link = session.name(), "dropping device with its session");
            self.devices.remove(&name);
        }

        session.stop().await;
    }

    /// Stop every session.
    pub async fn stop(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain(..).collect();
        for session in sessions {
            session.stop().await;
        }
        self.devices.clear();
    }
}

async fn open_session(entry: &LinkEntry) -> Result<Arc<Session>> {
    match &entry.link {
        LinkKind::Serial(config) => Session::serial(config),
        LinkKind::Socket(config) => Session::socket(config).await,
    }
}

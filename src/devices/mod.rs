//! Device proxies: host-side objects representing one physical peripheral.
//!
//! Each proxy owns a private [`Dispatcher`] keyed by a device-specific
//! command prefix, and a set of tracked variables, each backed by one cached
//! value and one [`Gate`]. Getters request, wait for the answer callback to
//! release the gate, then read the cache — or report a reply timeout.

pub mod analog;
pub mod blank;
pub mod digital;
pub mod registry;
pub mod servo;
pub mod stepper;

pub use analog::{AnalogInput, AnalogOutput};
pub use blank::BlankDevice;
pub use digital::{DigitalInput, DigitalOutput};
pub use registry::{default_registry, DeviceFactory, DeviceRegistry};
pub use servo::{Servo, ServoConfig};
pub use stepper::{LinearStepper, LinearStepperConfig};

use std::any::Any;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::codec::{CmdArg, FrameCodec};
use crate::dispatch::Dispatcher;
use crate::error::{CmdLinkError, Result};
use crate::gate::Gate;
use crate::transport::Link;

/// Default timeout for a tracked variable's request/answer round trip.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Coercion from a wire token into a tracked variable's scalar type.
pub trait FromToken: Sized {
    fn from_token(token: &str) -> Result<Self>;
}

impl FromToken for i64 {
    fn from_token(token: &str) -> Result<Self> {
        token
            .trim()
            .parse()
            .map_err(|e| CmdLinkError::data(format!("invalid integer token {token:?}: {e}")))
    }
}

impl FromToken for f64 {
    fn from_token(token: &str) -> Result<Self> {
        token
            .trim()
            .parse()
            .map_err(|e| CmdLinkError::data(format!("invalid float token {token:?}: {e}")))
    }
}

impl FromToken for bool {
    fn from_token(token: &str) -> Result<Self> {
        // peripherals report booleans as integers, any non-zero is true
        let v: i64 = FromToken::from_token(token)?;
        Ok(v != 0)
    }
}

impl FromToken for String {
    fn from_token(token: &str) -> Result<Self> {
        Ok(token.to_string())
    }
}

/// One tracked quantity: a cached value paired with its own gate.
///
/// Gates are never shared between variables; each request/answer pair
/// synchronizes on exactly one of these.
#[derive(Debug)]
pub struct TrackedVar<T> {
    value: Mutex<T>,
    gate: Gate,
}

impl<T: Clone> TrackedVar<T> {
    fn new(init: T, timeout: Duration) -> Self {
        Self {
            value: Mutex::new(init),
            gate: Gate::new(timeout),
        }
    }

    /// Last value stored by the answer callback (or the initial value).
    pub fn cached(&self) -> T {
        self.value.lock().clone()
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    fn store(&self, value: T) {
        *self.value.lock() = value;
    }
}

/// Shared machinery behind every device proxy.
///
/// Created unbound; [`bind`](DeviceCore::bind) attaches the command header
/// and the session link exactly once, after which `init` pushes the device's
/// initial configuration.
pub struct DeviceCore {
    kind: &'static str,
    codec: Mutex<FrameCodec>,
    dispatch: Dispatcher,
    link: OnceLock<Arc<dyn Link>>,
}

impl DeviceCore {
    pub fn new(kind: &'static str) -> Self {
        let codec = FrameCodec::default();
        let dispatch = Dispatcher::new(codec.clone());
        dispatch.add_default_handler(Arc::new(move |frame: &str| {
            warn!(device = kind, frame, "received unknown command");
        }));
        Self {
            kind,
            codec: Mutex::new(codec),
            dispatch,
            link: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Attach the identifier prefix and the session's link. Second and later
    /// calls are ignored.
    pub fn bind(&self, command_id: &str, link: Arc<dyn Link>) {
        if self.link.set(link).is_err() {
            warn!(device = self.kind, "device is already bound, ignoring rebind");
            return;
        }
        self.codec.lock().set_command_header(command_id);
    }

    /// The identifier prefix (delimiter included); empty before binding.
    pub fn command_header(&self) -> String {
        self.codec.lock().command_header().to_string()
    }

    pub fn bound_link(&self) -> Option<Arc<dyn Link>> {
        self.link.get().cloned()
    }

    /// Feed a relayed frame into the device's private dispatch scope.
    pub fn handle_frame(&self, frame: &str) {
        self.dispatch.handle(frame);
    }

    /// Encode with the device's own codec and write through the bound link.
    pub async fn send(&self, command_id: &str, args: &[CmdArg]) -> Result<()> {
        let text = self.codec.lock().encode(command_id, args);
        let link = self.link.get().ok_or_else(|| {
            CmdLinkError::state(format!("device {} is not bound to a link", self.kind))
        })?;
        link.send(text.as_bytes()).await?;
        Ok(())
    }

    /// Allocate a tracked variable and register its answer callback.
    ///
    /// The callback stores the coerced first argument and releases the gate.
    /// An absent or empty first argument means "no update": the cache and
    /// the gate are left untouched, so the waiter times out — a peripheral
    /// replying with an empty payload is indistinguishable from one that has
    /// not replied at all.
    pub fn track<T>(&self, answer_id: &str, init: T, timeout: Duration) -> Arc<TrackedVar<T>>
    where
        T: FromToken + Clone + Send + 'static,
    {
        let var = Arc::new(TrackedVar::new(init, timeout));
        let slot = var.clone();
        let answer = answer_id.to_string();
        self.dispatch.add_command(
            answer_id,
            Arc::new(move |args: &[String]| {
                let Some(first) = args.first() else { return };
                if first.is_empty() {
                    return;
                }
                match T::from_token(first) {
                    Ok(value) => {
                        slot.store(value);
                        slot.gate().ensure_released();
                    }
                    Err(err) => {
                        warn!(answer = %answer, error = %err, "discarding malformed reply payload");
                    }
                }
            }),
        );
        var
    }

    /// Fire-and-forget request for a tracked variable.
    pub async fn request(&self, request_id: &str) -> Result<()> {
        self.send(request_id, &[]).await
    }

    /// Blocking getter: acquire the variable's gate, send the request, wait
    /// for the answer callback to release, then return the cached value.
    /// Times out with a [`CmdLinkError::ReplyTimeout`] that is never retried
    /// here — retrying is the caller's decision.
    pub async fn get<T>(&self, var: &TrackedVar<T>, request_id: &str) -> Result<T>
    where
        T: Clone,
    {
        var.gate().acquire().await;
        if let Err(err) = self.send(request_id, &[]).await {
            var.gate().ensure_released();
            return Err(err);
        }
        let (replied, elapsed) = var.gate().wait_until_released().await;
        var.gate().ensure_released();
        if replied {
            Ok(var.cached())
        } else {
            Err(CmdLinkError::ReplyTimeout {
                device: self.command_header(),
                command: request_id.to_string(),
                elapsed,
            })
        }
    }
}

/// Common surface of every device proxy.
#[async_trait]
pub trait Device: Send + Sync {
    /// The kind string this device reports to a bonjour probe.
    fn kind(&self) -> &'static str;

    /// The shared proxy machinery.
    fn core(&self) -> &DeviceCore;

    /// Upcast for typed access through the manager.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Push the device's initial configuration. Called exactly once, after
    /// binding.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    fn bind(&self, command_id: &str, link: Arc<dyn Link>) {
        self.core().bind(command_id, link);
    }

    fn handle_frame(&self, frame: &str) {
        self.core().handle_frame(frame);
    }

    fn bound_link(&self) -> Option<Arc<dyn Link>> {
        self.core().bound_link()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLink;
    use tracing_test::traced_test;

    fn bound_core(link: &Arc<MockLink>) -> DeviceCore {
        let core = DeviceCore::new("TESTDEV");
        core.bind("D1", link.clone() as Arc<dyn Link>);
        core
    }

    #[tokio::test]
    async fn test_send_carries_command_header() {
        let link = MockLink::new("mock0");
        let core = bound_core(&link);

        core.send("W", &[90i64.into()]).await.unwrap();
        assert_eq!(link.sent(), vec!["D1,W,90;"]);
    }

    #[tokio::test]
    async fn test_send_unbound_is_state_error() {
        let core = DeviceCore::new("TESTDEV");
        match core.send("W", &[]).await {
            Err(CmdLinkError::State(_)) => {}
            other => panic!("expected state error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_getter_returns_value_stored_by_answer() {
        let link = MockLink::new("mock0");
        let core = bound_core(&link);
        let level = core.track("L", 0i64, Duration::from_millis(200));

        // deliver the answer through the device's private dispatch directly,
        // as the session relay would
        let getter = core.get(&level, "R");
        tokio::pin!(getter);

        tokio::select! {
            _ = &mut getter => panic!("getter finished before the answer arrived"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        core.handle_frame("L,512;");

        let value = getter.await.unwrap();
        assert_eq!(value, 512);
        assert_eq!(level.cached(), 512);
    }

    #[tokio::test]
    async fn test_getter_times_out_without_answer() {
        let link = MockLink::new("mock0");
        let core = bound_core(&link);
        let level = core.track("L", 0i64, Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        match core.get(&level, "R").await {
            Err(CmdLinkError::ReplyTimeout {
                device,
                command,
                elapsed,
            }) => {
                assert_eq!(device, "D1,");
                assert_eq!(command, "R");
                assert!(elapsed >= Duration::from_millis(50));
            }
            other => panic!("expected reply timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_millis(500));

        // the forced release leaves the gate usable for the next getter
        assert!(!level.gate().is_held());
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_an_update() {
        let link = MockLink::new("mock0");
        let core = bound_core(&link);
        let level = core.track("L", 7i64, Duration::from_millis(50));

        level.gate().acquire().await;
        core.handle_frame("L;"); // no payload at all
        core.handle_frame("L,;"); // empty payload
        assert!(level.gate().is_held(), "empty payload must not release");
        assert_eq!(level.cached(), 7);

        let (replied, _) = level.gate().wait_until_released().await;
        assert!(!replied);
        level.gate().ensure_released();
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_gate_held() {
        let link = MockLink::new("mock0");
        let core = bound_core(&link);
        let level = core.track("L", 7i64, Duration::from_millis(50));

        level.gate().acquire().await;
        core.handle_frame("L,notanumber;");
        assert!(level.gate().is_held());
        assert_eq!(level.cached(), 7);
        level.gate().ensure_released();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_command_logs_warning() {
        let link = MockLink::new("mock0");
        let core = bound_core(&link);
        core.handle_frame("XYZ,1;");
        assert!(logs_contain("received unknown command"));
    }

    #[tokio::test]
    async fn test_send_failure_releases_gate() {
        let link = MockLink::new("mock0");
        let core = bound_core(&link);
        let level = core.track("L", 0i64, Duration::from_millis(50));

        link.fail_sends(true);
        match core.get(&level, "R").await {
            Err(CmdLinkError::Communication(_)) => {}
            other => panic!("expected communication error, got {other:?}"),
        }
        assert!(!level.gate().is_held());
    }
}

//! Linear stepper device proxy (AccelStepper firmware with an end-stop
//! switch).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::debug;

use super::registry::DeviceFactory;
use super::{Device, DeviceCore, TrackedVar, DEFAULT_REPLY_TIMEOUT};
use crate::error::{CmdLinkError, Result};

pub const KIND: &str = "LINEARACCELSTEPPER";

// Outgoing
const CMD_SET_POSITION: &str = "SP";
const CMD_SET_SPEED: &str = "SS";
const CMD_SET_MAX_SPEED: &str = "SMS";
const CMD_SET_ACC: &str = "SA";
const CMD_ENABLE_ACC: &str = "EA";
const CMD_DISABLE_ACC: &str = "DA";
const CMD_ENABLE_SWITCH: &str = "ES";
const CMD_DISABLE_SWITCH: &str = "DS";
const CMD_HOME: &str = "H";
const CMD_MOVE_TO: &str = "MT";
const CMD_MOVE: &str = "M";
const CMD_STOP: &str = "S";
const CMD_REQUEST_SWITCH: &str = "RS";
const CMD_REQUEST_MOVING: &str = "RM";
const CMD_REQUEST_DIST: &str = "RD";
const CMD_REQUEST_TARGET: &str = "RT";
const CMD_REQUEST_POSITION: &str = "RP";
const CMD_REQUEST_SPEED: &str = "RIS";
const CMD_REQUEST_MAX_SPEED: &str = "RIMS";
const CMD_REQUEST_ACC: &str = "RIA";

// Incoming
const CMD_ANSWER_SWITCH: &str = "S";
const CMD_ANSWER_MOVING: &str = "M";
const CMD_ANSWER_DIST: &str = "D";
const CMD_ANSWER_TARGET: &str = "T";
const CMD_ANSWER_POSITION: &str = "P";
const CMD_ANSWER_SPEED: &str = "IS";
const CMD_ANSWER_MAX_SPEED: &str = "IMS";
const CMD_ANSWER_ACC: &str = "IA";

// Idle-poll cadence; keep it low enough not to saturate the command bus.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Linear stepper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearStepperConfig {
    pub speed: f64,
    pub max_speed: f64,
    pub acceleration: f64,
    pub homing_speed: f64,
    pub enabled_acceleration: bool,
    pub reverted_direction: bool,
    pub reverted_switch: bool,
}

impl Default for LinearStepperConfig {
    fn default() -> Self {
        Self {
            speed: 5000.0,
            max_speed: 5000.0,
            acceleration: 2000.0,
            homing_speed: 2000.0,
            enabled_acceleration: true,
            reverted_direction: false,
            reverted_switch: false,
        }
    }
}

// Host-side motion parameters that can change after construction.
#[derive(Debug)]
struct MotionParams {
    running_speed: f64,
    homing_speed: f64,
    enabled_acceleration: bool,
    reverted_switch: bool,
}

/// Linear stepper proxy.
pub struct LinearStepper {
    core: DeviceCore,
    config: LinearStepperConfig,
    params: Mutex<MotionParams>,
    switch_state: Arc<TrackedVar<bool>>,
    moving_state: Arc<TrackedVar<bool>>,
    distance_to_go: Arc<TrackedVar<i64>>,
    target_position: Arc<TrackedVar<i64>>,
    current_position: Arc<TrackedVar<i64>>,
    speed: Arc<TrackedVar<f64>>,
    max_speed: Arc<TrackedVar<f64>>,
    acceleration: Arc<TrackedVar<f64>>,
}

impl LinearStepper {
    pub fn from_config(config: LinearStepperConfig) -> Arc<Self> {
        let core = DeviceCore::new(KIND);
        let t = DEFAULT_REPLY_TIMEOUT;
        let switch_state = core.track(CMD_ANSWER_SWITCH, false, t);
        let moving_state = core.track(CMD_ANSWER_MOVING, false, t);
        let distance_to_go = core.track(CMD_ANSWER_DIST, 0i64, t);
        let target_position = core.track(CMD_ANSWER_TARGET, 0i64, t);
        let current_position = core.track(CMD_ANSWER_POSITION, 0i64, t);
        let speed = core.track(CMD_ANSWER_SPEED, 0f64, t);
        let max_speed = core.track(CMD_ANSWER_MAX_SPEED, 0f64, t);
        let acceleration = core.track(CMD_ANSWER_ACC, 0f64, t);

        let params = Mutex::new(MotionParams {
            running_speed: config.speed,
            homing_speed: config.homing_speed,
            enabled_acceleration: config.enabled_acceleration,
            reverted_switch: config.reverted_switch,
        });

        Arc::new(Self {
            core,
            config,
            params,
            switch_state,
            moving_state,
            distance_to_go,
            target_position,
            current_position,
            speed,
            max_speed,
            acceleration,
        })
    }

    fn apply_direction<T: std::ops::Neg<Output = T>>(&self, value: T) -> T {
        if self.config.reverted_direction {
            -value
        } else {
            value
        }
    }

    async fn set_speed_raw(&self, steps_per_second: f64) -> Result<()> {
        self.core
            .send(CMD_SET_SPEED, &[steps_per_second.into()])
            .await
    }

    /// Overwrite the firmware's notion of the current position.
    pub async fn set_current_position(&self, steps: i64) -> Result<()> {
        self.core.send(CMD_SET_POSITION, &[steps.into()]).await
    }

    /// Host-side running speed, applied before every move.
    pub fn set_running_speed(&self, steps_per_second: f64) {
        self.params.lock().running_speed = steps_per_second;
    }

    /// Host-side homing speed, applied before every home.
    pub fn set_homing_speed(&self, steps_per_second: f64) {
        self.params.lock().homing_speed = steps_per_second;
    }

    pub async fn set_max_speed(&self, steps_per_second: f64) -> Result<()> {
        self.core
            .send(CMD_SET_MAX_SPEED, &[steps_per_second.into()])
            .await
    }

    pub async fn set_acceleration(&self, steps_per_second_sq: f64) -> Result<()> {
        self.core.send(CMD_SET_ACC, &[steps_per_second_sq.into()]).await
    }

    pub async fn enable_acceleration(&self) -> Result<()> {
        self.wait_until_idle().await?;
        self.core.send(CMD_ENABLE_ACC, &[]).await?;
        // the firmware keeps a residual velocity after toggling acceleration;
        // a stop clears it
        self.stop(true).await?;
        self.params.lock().enabled_acceleration = true;
        Ok(())
    }

    pub async fn disable_acceleration(&self) -> Result<()> {
        self.wait_until_idle().await?;
        self.core.send(CMD_DISABLE_ACC, &[]).await?;
        self.stop(true).await?;
        self.params.lock().enabled_acceleration = false;
        Ok(())
    }

    pub async fn enable_revert_switch(&self) -> Result<()> {
        self.params.lock().reverted_switch = true;
        self.core.send(CMD_ENABLE_SWITCH, &[]).await
    }

    pub async fn disable_revert_switch(&self) -> Result<()> {
        self.params.lock().reverted_switch = false;
        self.core.send(CMD_DISABLE_SWITCH, &[]).await
    }

    /// Drive towards the end-stop switch until it triggers.
    pub async fn home(&self, wait: bool) -> Result<()> {
        let homing_speed = self.apply_direction(self.params.lock().homing_speed);
        self.set_speed_raw(-homing_speed).await?;
        self.core.send(CMD_HOME, &[]).await?;
        if wait {
            self.wait_until_idle().await?;
        }
        Ok(())
    }

    /// Move to an absolute position (in steps).
    pub async fn move_to(&self, steps: i64, wait: bool) -> Result<()> {
        let running_speed = self.apply_direction(self.params.lock().running_speed);
        self.set_speed_raw(running_speed).await?;
        let steps = self.apply_direction(steps);
        self.core.send(CMD_MOVE_TO, &[steps.into()]).await?;
        if wait {
            self.wait_until_idle().await?;
        }
        Ok(())
    }

    /// Move by a relative number of steps.
    pub async fn move_by(&self, steps: i64, wait: bool) -> Result<()> {
        let running_speed = self.apply_direction(self.params.lock().running_speed);
        self.set_speed_raw(running_speed).await?;
        let steps = self.apply_direction(steps);
        self.core.send(CMD_MOVE, &[steps.into()]).await?;
        if wait {
            self.wait_until_idle().await?;
        }
        Ok(())
    }

    pub async fn stop(&self, wait: bool) -> Result<()> {
        self.core.send(CMD_STOP, &[]).await?;
        if wait {
            self.wait_until_idle().await?;
        }
        Ok(())
    }

    /// Poll the moving state until the device reports idle. Reply timeouts
    /// are retried indefinitely here: a busy command bus must not abort a
    /// motion sequence. Communication errors still propagate.
    pub async fn wait_until_idle(&self) -> Result<()> {
        loop {
            match self.get_moving_state().await {
                Ok(false) => return Ok(()),
                Ok(true) => time::sleep(IDLE_POLL_INTERVAL).await,
                Err(err @ CmdLinkError::ReplyTimeout { .. }) => {
                    debug!(error = %err, "retrying moving-state poll");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn request_switch_state(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_SWITCH).await
    }

    pub async fn request_moving_state(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_MOVING).await
    }

    pub async fn request_distance_to_go(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_DIST).await
    }

    pub async fn request_target_position(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_TARGET).await
    }

    pub async fn request_current_position(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_POSITION).await
    }

    pub async fn request_speed(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_SPEED).await
    }

    pub async fn request_max_speed(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_MAX_SPEED).await
    }

    pub async fn request_acceleration(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_ACC).await
    }

    pub async fn get_switch_state(&self) -> Result<bool> {
        let raw = self.core.get(&self.switch_state, CMD_REQUEST_SWITCH).await?;
        Ok(if self.params.lock().reverted_switch {
            !raw
        } else {
            raw
        })
    }

    pub async fn get_moving_state(&self) -> Result<bool> {
        self.core.get(&self.moving_state, CMD_REQUEST_MOVING).await
    }

    pub async fn get_distance_to_go(&self) -> Result<i64> {
        let raw = self.core.get(&self.distance_to_go, CMD_REQUEST_DIST).await?;
        Ok(self.apply_direction(raw))
    }

    pub async fn get_target_position(&self) -> Result<i64> {
        let raw = self
            .core
            .get(&self.target_position, CMD_REQUEST_TARGET)
            .await?;
        Ok(self.apply_direction(raw))
    }

    pub async fn get_current_position(&self) -> Result<i64> {
        let raw = self
            .core
            .get(&self.current_position, CMD_REQUEST_POSITION)
            .await?;
        Ok(self.apply_direction(raw))
    }

    pub async fn get_speed(&self) -> Result<f64> {
        self.core.get(&self.speed, CMD_REQUEST_SPEED).await
    }

    pub async fn get_max_speed(&self) -> Result<f64> {
        self.core.get(&self.max_speed, CMD_REQUEST_MAX_SPEED).await
    }

    pub async fn get_acceleration(&self) -> Result<f64> {
        self.core.get(&self.acceleration, CMD_REQUEST_ACC).await
    }
}

#[async_trait]
impl Device for LinearStepper {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn init(&self) -> Result<()> {
        self.set_max_speed(self.config.max_speed).await?;
        self.set_acceleration(self.config.acceleration).await?;
        if self.config.enabled_acceleration {
            self.enable_acceleration().await?;
        } else {
            self.disable_acceleration().await?;
        }
        if self.config.reverted_switch {
            self.enable_revert_switch().await
        } else {
            self.disable_revert_switch().await
        }
    }
}

pub struct LinearStepperFactory;

impl DeviceFactory for LinearStepperFactory {
    fn kinds(&self) -> &'static [&'static str] {
        &[KIND]
    }

    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        let config: LinearStepperConfig = if config.is_null() {
            LinearStepperConfig::default()
        } else {
            serde_json::from_value(config.clone())?
        };
        Ok(LinearStepper::from_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Link, MockLink};

    fn bound_stepper(config: LinearStepperConfig) -> (Arc<MockLink>, Arc<LinearStepper>) {
        let link = MockLink::new("mock0");
        let stepper = LinearStepper::from_config(config);
        stepper.bind("M1", link.clone() as Arc<dyn Link>);
        (link, stepper)
    }

    #[tokio::test]
    async fn test_move_to_sets_speed_then_moves() {
        let (link, stepper) = bound_stepper(LinearStepperConfig::default());
        stepper.move_to(1500, false).await.unwrap();
        assert_eq!(link.sent(), vec!["M1,SS,5000.00;", "M1,MT,1500;"]);
    }

    #[tokio::test]
    async fn test_reverted_direction_negates_moves_and_positions() {
        let (link, stepper) = bound_stepper(LinearStepperConfig {
            reverted_direction: true,
            ..Default::default()
        });
        stepper.move_by(200, false).await.unwrap();
        assert_eq!(link.sent(), vec!["M1,SS,-5000.00;", "M1,M,-200;"]);

        let getter = stepper.get_current_position();
        tokio::pin!(getter);
        tokio::select! {
            _ = &mut getter => panic!("no answer yet"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        stepper.handle_frame("P,-320;");
        assert_eq!(getter.await.unwrap(), 320);
    }

    #[tokio::test]
    async fn test_home_uses_negative_homing_speed() {
        let (link, stepper) = bound_stepper(LinearStepperConfig::default());
        stepper.home(false).await.unwrap();
        assert_eq!(link.sent(), vec!["M1,SS,-2000.00;", "M1,H;"]);
    }

    #[tokio::test]
    async fn test_reverted_switch_inverts_reading() {
        let (_link, stepper) = bound_stepper(LinearStepperConfig {
            reverted_switch: true,
            ..Default::default()
        });
        let getter = stepper.get_switch_state();
        tokio::pin!(getter);
        tokio::select! {
            _ = &mut getter => panic!("no answer yet"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        stepper.handle_frame("S,1;");
        assert!(!getter.await.unwrap());
    }

    #[tokio::test]
    async fn test_float_answers_coerce() {
        let (_link, stepper) = bound_stepper(LinearStepperConfig::default());
        let getter = stepper.get_speed();
        tokio::pin!(getter);
        tokio::select! {
            _ = &mut getter => panic!("no answer yet"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        stepper.handle_frame("IS,4999.80;");
        assert!((getter.await.unwrap() - 4999.8).abs() < 1e-9);
    }
}

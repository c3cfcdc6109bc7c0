//! Servo device proxy.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::registry::DeviceFactory;
use super::{Device, DeviceCore, TrackedVar, DEFAULT_REPLY_TIMEOUT};
use crate::error::Result;

pub const KIND: &str = "SERVO";

// Incoming
const CMD_ANSWER_ANGLE: &str = "A";

// Outgoing
const CMD_SET_ANGLE: &str = "W";
const CMD_REQUEST_ANGLE: &str = "R";

/// Servo configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub initial_angle: i64,
    pub min_limit: i64,
    pub max_limit: i64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            initial_angle: 90,
            min_limit: 0,
            max_limit: 180,
        }
    }
}

/// Servo proxy: one settable/readable angle.
pub struct Servo {
    core: DeviceCore,
    config: ServoConfig,
    // limits narrower than the physical 0..180 range are enforced host-side
    limited: bool,
    angle: Arc<TrackedVar<i64>>,
}

impl Servo {
    pub fn from_config(config: ServoConfig) -> Arc<Self> {
        let core = DeviceCore::new(KIND);
        let angle = core.track(CMD_ANSWER_ANGLE, 0i64, DEFAULT_REPLY_TIMEOUT);
        let limited = config.min_limit > 0 && config.max_limit < 180;
        Arc::new(Self {
            core,
            config,
            limited,
            angle,
        })
    }

    /// Command the servo to an angle, clamped to the configured limits.
    pub async fn set_angle(&self, angle: i64) -> Result<()> {
        let angle = if self.limited {
            angle.clamp(self.config.min_limit, self.config.max_limit)
        } else {
            angle
        };
        self.core.send(CMD_SET_ANGLE, &[angle.into()]).await
    }

    /// Fire-and-forget angle request.
    pub async fn request_angle(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_ANGLE).await
    }

    /// Read the current angle from the device.
    pub async fn get_angle(&self) -> Result<i64> {
        self.core.get(&self.angle, CMD_REQUEST_ANGLE).await
    }
}

#[async_trait]
impl Device for Servo {
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
        self.set_angle(self.config.initial_angle).await
    }
}

pub struct ServoFactory;

impl DeviceFactory for ServoFactory {
    fn kinds(&self) -> &'static [&'static str] {
        &[KIND]
    }

    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        let config: ServoConfig = if config.is_null() {
            ServoConfig::default()
        } else {
            serde_json::from_value(config.clone())?
        };
        Ok(Servo::from_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Link, MockLink};

    fn bound_servo(config: ServoConfig) -> (Arc<MockLink>, Arc<Servo>) {
        let link = MockLink::new("mock0");
        let servo = Servo::from_config(config);
        servo.bind("S1", link.clone() as Arc<dyn Link>);
        (link, servo)
    }

    #[tokio::test]
    async fn test_init_pushes_initial_angle() {
        let (link, servo) = bound_servo(ServoConfig {
            initial_angle: 45,
            ..Default::default()
        });
        servo.init().await.unwrap();
        assert_eq!(link.sent(), vec!["S1,W,45;"]);
    }

    #[tokio::test]
    async fn test_set_angle_clamps_to_limits() {
        let (link, servo) = bound_servo(ServoConfig {
            initial_angle: 90,
            min_limit: 30,
            max_limit: 150,
        });
        servo.set_angle(10).await.unwrap();
        servo.set_angle(170).await.unwrap();
        assert_eq!(link.sent(), vec!["S1,W,30;", "S1,W,150;"]);
    }

    #[tokio::test]
    async fn test_full_range_is_not_clamped() {
        let (link, servo) = bound_servo(ServoConfig::default());
        servo.set_angle(200).await.unwrap();
        assert_eq!(link.sent(), vec!["S1,W,200;"]);
    }

    #[tokio::test]
    async fn test_get_angle_round_trip() {
        let (link, servo) = bound_servo(ServoConfig::default());
        link.set_responder(|_| None);

        let getter = servo.get_angle();
        tokio::pin!(getter);
        tokio::select! {
            _ = &mut getter => panic!("getter finished without an answer"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
        servo.handle_frame("A,77;");
        assert_eq!(getter.await.unwrap(), 77);
        assert_eq!(link.sent(), vec!["S1,R;"]);
    }
}

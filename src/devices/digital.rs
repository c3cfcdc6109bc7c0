//! Digital input/output device proxies.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use super::registry::DeviceFactory;
use super::{Device, DeviceCore, TrackedVar, DEFAULT_REPLY_TIMEOUT};
use crate::error::Result;

pub const INPUT_KIND: &str = "DIGITALREAD";
pub const OUTPUT_KIND: &str = "DIGITALWRITE";

const CMD_ANSWER_STATE: &str = "S";
const CMD_REQUEST_STATE: &str = "R";
const CMD_SET_LEVEL: &str = "W";

/// Digital input proxy: one readable pin state.
pub struct DigitalInput {
    core: DeviceCore,
    state: Arc<TrackedVar<bool>>,
}

impl DigitalInput {
    pub fn new() -> Arc<Self> {
        let core = DeviceCore::new(INPUT_KIND);
        let state = core.track(CMD_ANSWER_STATE, false, DEFAULT_REPLY_TIMEOUT);
        Arc::new(Self { core, state })
    }

    pub async fn request_state(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_STATE).await
    }

    pub async fn get_state(&self) -> Result<bool> {
        self.core.get(&self.state, CMD_REQUEST_STATE).await
    }
}

#[async_trait]
impl Device for DigitalInput {
    fn kind(&self) -> &'static str {
        INPUT_KIND
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub struct DigitalInputFactory;

impl DeviceFactory for DigitalInputFactory {
    fn kinds(&self) -> &'static [&'static str] {
        &[INPUT_KIND]
    }

    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        Ok(DigitalInput::new())
    }
}

/// Digital output proxy: write-only pin level.
pub struct DigitalOutput {
    core: DeviceCore,
}

impl DigitalOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(OUTPUT_KIND),
        })
    }

    pub async fn set_level(&self, level: bool) -> Result<()> {
        self.core.send(CMD_SET_LEVEL, &[level.into()]).await
    }

    pub async fn low(&self) -> Result<()> {
        self.set_level(false).await
    }

    pub async fn high(&self) -> Result<()> {
        self.set_level(true).await
    }
}

#[async_trait]
impl Device for DigitalOutput {
    fn kind(&self) -> &'static str {
        OUTPUT_KIND
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub struct DigitalOutputFactory;

impl DeviceFactory for DigitalOutputFactory {
    fn kinds(&self) -> &'static [&'static str] {
        &[OUTPUT_KIND]
    }

    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        Ok(DigitalOutput::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Link, MockLink};
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_state_coerces_wire_integer() {
        let link = MockLink::new("mock0");
        let input = DigitalInput::new();
        input.bind("D2", link.clone() as Arc<dyn Link>);

        let getter = input.get_state();
        tokio::pin!(getter);
        tokio::select! {
            _ = &mut getter => panic!("no answer yet"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        input.handle_frame("S,1;");
        assert!(getter.await.unwrap());
    }

    #[tokio::test]
    async fn test_levels_go_out_as_integers() {
        let link = MockLink::new("mock0");
        let output = DigitalOutput::new();
        output.bind("D3", link.clone() as Arc<dyn Link>);

        output.high().await.unwrap();
        output.low().await.unwrap();
        assert_eq!(link.sent(), vec!["D3,W,1;", "D3,W,0;"]);
    }
}

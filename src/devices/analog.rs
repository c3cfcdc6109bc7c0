//! Analog input/output device proxies.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use super::registry::DeviceFactory;
use super::{Device, DeviceCore, TrackedVar, DEFAULT_REPLY_TIMEOUT};
use crate::error::Result;

pub const INPUT_KIND: &str = "ANALOGREAD";
pub const OUTPUT_KIND: &str = "ANALOGWRITE";

const CMD_ANSWER_LEVEL: &str = "L";
const CMD_REQUEST_LEVEL: &str = "R";
const CMD_SET_PWM: &str = "W";

/// Analog input proxy: one readable level.
pub struct AnalogInput {
    core: DeviceCore,
    level: Arc<TrackedVar<i64>>,
}

impl AnalogInput {
    pub fn new() -> Arc<Self> {
        let core = DeviceCore::new(INPUT_KIND);
        let level = core.track(CMD_ANSWER_LEVEL, 0i64, DEFAULT_REPLY_TIMEOUT);
        Arc::new(Self { core, level })
    }

    pub async fn request_level(&self) -> Result<()> {
        self.core.request(CMD_REQUEST_LEVEL).await
    }

    pub async fn get_level(&self) -> Result<i64> {
        self.core.get(&self.level, CMD_REQUEST_LEVEL).await
    }
}

#[async_trait]
impl Device for AnalogInput {
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

pub struct AnalogInputFactory;

impl DeviceFactory for AnalogInputFactory {
    fn kinds(&self) -> &'static [&'static str] {
        &[INPUT_KIND]
    }

    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        Ok(AnalogInput::new())
    }
}

/// Analog output proxy: write-only PWM value.
pub struct AnalogOutput {
    core: DeviceCore,
}

impl AnalogOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(OUTPUT_KIND),
        })
    }

    pub async fn set_pwm_value(&self, value: i64) -> Result<()> {
        self.core.send(CMD_SET_PWM, &[value.into()]).await
    }
}

#[async_trait]
impl Device for AnalogOutput {
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

pub struct AnalogOutputFactory;

impl DeviceFactory for AnalogOutputFactory {
    fn kinds(&self) -> &'static [&'static str] {
        &[OUTPUT_KIND]
    }

    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        Ok(AnalogOutput::new())
    }
}

//! Blank device proxy.
//!
//! Stands in for any peripheral whose reported kind has no registered
//! factory: it accepts binding and init and silently drops everything else,
//! so the rest of the system keeps running with a degraded device.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use super::registry::DeviceFactory;
use super::{Device, DeviceCore};
use crate::error::Result;

pub const KIND: &str = "BLANK";

pub struct BlankDevice {
    core: DeviceCore,
}

impl BlankDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(KIND),
        })
    }
}

#[async_trait]
impl Device for BlankDevice {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub struct BlankFactory;

impl DeviceFactory for BlankFactory {
    fn kinds(&self) -> &'static [&'static str] {
        &[KIND]
    }

    fn create(&self, _config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        Ok(BlankDevice::new())
    }
}

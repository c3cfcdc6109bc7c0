//! Device registry: maps bonjour kind strings to proxy factories.
//!
//! The registry is an explicit object constructed once (usually via
//! [`default_registry`]) and handed to the manager — there is no process-wide
//! mutable registry. New device types are added by registering another
//! factory, without touching the manager.

use std::sync::Arc;

use dashmap::DashMap;

use super::blank::BlankFactory;
use super::Device;
use crate::error::{CmdLinkError, Result};

/// Factory for one family of device proxies.
pub trait DeviceFactory: Send + Sync {
    /// Kind strings this factory handles (aliases allowed).
    fn kinds(&self) -> &'static [&'static str];

    /// Build an unbound proxy from the device's free-form config section.
    /// Each factory deserializes the value into its own typed config struct.
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn Device>>;
}

/// Thread-safe registry of device factories keyed by kind string.
pub struct DeviceRegistry {
    factories: DashMap<String, Arc<dyn DeviceFactory>>,
    fallback: Arc<dyn DeviceFactory>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Empty registry; the blank device is always available as fallback.
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
            fallback: Arc::new(BlankFactory),
        }
    }

    /// Register a factory under every kind string it declares.
    pub fn register(&self, factory: Arc<dyn DeviceFactory>) {
        for kind in factory.kinds() {
            self.factories.insert(kind.to_string(), factory.clone());
        }
    }

    /// Create a proxy for a discovered kind string.
    pub fn create(&self, kind: &str, config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| CmdLinkError::UnknownDeviceKind {
                kind: kind.to_string(),
            })?;
        factory.create(config)
    }

    /// Create the minimal blank proxy used when a kind is unregistered.
    pub fn create_fallback(&self, config: &serde_json::Value) -> Result<Arc<dyn Device>> {
        self.fallback.create(config)
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn registered_kinds(&self) -> Vec<String> {
        self.factories.iter().map(|e| e.key().clone()).collect()
    }
}

/// Registry with every built-in device type registered. The single place to
/// extend when adding a new built-in.
pub fn default_registry() -> DeviceRegistry {
    let registry = DeviceRegistry::new();
    registry.register(Arc::new(super::servo::ServoFactory));
    registry.register(Arc::new(super::stepper::LinearStepperFactory));
    registry.register(Arc::new(super::analog::AnalogInputFactory));
    registry.register(Arc::new(super::analog::AnalogOutputFactory));
    registry.register(Arc::new(super::digital::DigitalInputFactory));
    registry.register(Arc::new(super::digital::DigitalOutputFactory));
    registry.register(Arc::new(BlankFactory));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let registry = default_registry();
        assert!(registry.is_registered("SERVO"));
        assert!(registry.is_registered("LINEARACCELSTEPPER"));
        assert!(registry.is_registered("ANALOGREAD"));
        assert!(registry.is_registered("DIGITALWRITE"));
        assert!(!registry.is_registered("FLUXCAPACITOR"));
    }

    #[test]
    fn test_unknown_kind_error() {
        let registry = default_registry();
        match registry.create("FLUXCAPACITOR", &serde_json::Value::Null) {
            Err(CmdLinkError::UnknownDeviceKind { kind }) => assert_eq!(kind, "FLUXCAPACITOR"),
            other => panic!("expected unknown-kind error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_fallback_creates_blank_device() {
        let registry = default_registry();
        let device = registry.create_fallback(&serde_json::Value::Null).unwrap();
        assert_eq!(device.kind(), "BLANK");
    }

    #[test]
    fn test_create_servo_with_config() {
        let registry = default_registry();
        let config = serde_json::json!({ "initial_angle": 45 });
        let device = registry.create("SERVO", &config).unwrap();
        assert_eq!(device.kind(), "SERVO");
    }
}

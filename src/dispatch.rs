//! Command dispatch table.
//!
//! Maps command identifiers to one of three handling strategies: direct
//! callbacks, relays into another dispatch scope, or default handlers for
//! anything unmatched. Exactly one strategy fires per frame, direct handlers
//! taking precedence over relays.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::codec::FrameCodec;

/// Callback invoked with a frame's positional argument tokens.
pub type CommandCallback = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Callback invoked with a complete (relayed or unmatched) frame.
pub type FrameCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Dispatch table for one scope (a session's top level, or a device's
/// private scope behind its command header).
///
/// Registration and removal are identity-based (`Arc::ptr_eq`) and
/// idempotent, and are safe to call concurrently with [`handle`]
/// (Dispatcher::handle): dispatch snapshots the matched callback list before
/// invoking it, which also makes re-entrant dispatch from a relay callback
/// safe.
pub struct Dispatcher {
    codec: FrameCodec,
    handlers: RwLock<HashMap<String, Vec<CommandCallback>>>,
    relays: RwLock<HashMap<String, Vec<FrameCallback>>>,
    defaults: RwLock<Vec<FrameCallback>>,
}

impl Dispatcher {
    /// Create a dispatcher parsing frames with the given codec settings.
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            handlers: RwLock::new(HashMap::new()),
            relays: RwLock::new(HashMap::new()),
            defaults: RwLock::new(Vec::new()),
        }
    }

    /// Register a direct callback for an identifier. Adding the same
    /// callback twice under one identifier is a no-op.
    pub fn add_command(&self, command_id: &str, callback: CommandCallback) {
        let mut handlers = self.handlers.write();
        let entry = handlers.entry(command_id.to_string()).or_default();
        if !entry.iter().any(|cb| Arc::ptr_eq(cb, &callback)) {
            entry.push(callback);
        }
    }

    /// Remove a direct callback if present. An identifier whose last
    /// callback is removed disappears from the table entirely, so later
    /// frames fall through to relays or default handlers.
    pub fn remove_command(&self, command_id: &str, callback: &CommandCallback) {
        let mut handlers = self.handlers.write();
        if let Some(entry) = handlers.get_mut(command_id) {
            entry.retain(|cb| !Arc::ptr_eq(cb, callback));
            if entry.is_empty() {
                handlers.remove(command_id);
            }
        }
    }

    /// Register a relay for an identifier; the callback receives the frame
    /// remainder (identifier stripped, re-terminated).
    pub fn add_relay(&self, command_id: &str, callback: FrameCallback) {
        let mut relays = self.relays.write();
        let entry = relays.entry(command_id.to_string()).or_default();
        if !entry.iter().any(|cb| Arc::ptr_eq(cb, &callback)) {
            entry.push(callback);
        }
    }

    /// Remove a relay if present.
    pub fn remove_relay(&self, command_id: &str, callback: &FrameCallback) {
        let mut relays = self.relays.write();
        if let Some(entry) = relays.get_mut(command_id) {
            entry.retain(|cb| !Arc::ptr_eq(cb, callback));
            if entry.is_empty() {
                relays.remove(command_id);
            }
        }
    }

    /// Append a default handler, invoked (in registration order) for frames
    /// with no identifier match.
    pub fn add_default_handler(&self, callback: FrameCallback) {
        let mut defaults = self.defaults.write();
        if !defaults.iter().any(|cb| Arc::ptr_eq(cb, &callback)) {
            defaults.push(callback);
        }
    }

    /// Remove a default handler if present.
    pub fn remove_default_handler(&self, callback: &FrameCallback) {
        self.defaults.write().retain(|cb| !Arc::ptr_eq(cb, callback));
    }

    pub fn has_command(&self, command_id: &str) -> bool {
        self.handlers.read().contains_key(command_id)
    }

    pub fn has_relay(&self, command_id: &str) -> bool {
        self.relays.read().contains_key(command_id)
    }

    /// Dispatch one frame. Direct handlers win over relays; default handlers
    /// run only when neither matches. Within the matched branch every
    /// callback fires, in registration order; no callback fires twice.
    pub fn handle(&self, frame: &str) {
        let parsed = self.codec.parse(frame);
        debug!(id = %parsed.id, frame = %parsed.text, "handling frame");

        let direct = self.handlers.read().get(&parsed.id).cloned();
        if let Some(callbacks) = direct {
            for callback in &callbacks {
                callback(&parsed.args);
            }
            return;
        }

        let relayed = self.relays.read().get(&parsed.id).cloned();
        if let Some(callbacks) = relayed {
            let remaining = self.codec.build_remaining(&parsed.args);
            for callback in &callbacks {
                callback(&remaining);
            }
            return;
        }

        debug!(id = %parsed.id, "no handler matched, defaulting");
        let defaults = self.defaults.read().clone();
        for callback in &defaults {
            callback(&parsed.text);
        }
    }
}

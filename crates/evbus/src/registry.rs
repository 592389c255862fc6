//! Process-wide default bus for call sites that cannot receive one by reference.
//!
//! Prefer passing the `Arc<dyn EventBus>` returned by [`connect`](crate::connect).

use evbus_event_bus::EventBus;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

static DEFAULT_BUS: RwLock<Option<Arc<dyn EventBus>>> = RwLock::new(None);

/// Installs `bus` as the process default and returns the previous one, if any.
#[deprecated(note = "pass the bus returned by `evbus::connect` by reference instead")]
pub fn install_default(bus: Arc<dyn EventBus>) -> Option<Arc<dyn EventBus>> {
    debug!("default event bus installed");
    DEFAULT_BUS.write().replace(bus)
}

/// The installed default bus, if any.
#[deprecated(note = "pass the bus returned by `evbus::connect` by reference instead")]
#[must_use]
pub fn default_bus() -> Option<Arc<dyn EventBus>> {
    DEFAULT_BUS.read().clone()
}

/// Removes the default bus and returns it.
#[deprecated(note = "pass the bus returned by `evbus::connect` by reference instead")]
pub fn take_default() -> Option<Arc<dyn EventBus>> {
    DEFAULT_BUS.write().take()
}

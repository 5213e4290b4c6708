//! Shared state handed to node callbacks and cleanup actions.

use lumen_core::{LoopManager, MessageBus};

use crate::cache::CacheRegistry;
use crate::device::DeviceId;
use crate::events::GraphEvent;

/// Collaborators owned by a render graph.
///
/// Every registered cleanup action receives this context when it runs, so a
/// device node can drop the device's caches right before destroying it.
#[derive(Debug, Default)]
pub struct GraphContext {
    pub caches: CacheRegistry,
    pub loops: LoopManager,
    pub bus: MessageBus<GraphEvent>,
}

impl GraphContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear a device's caches and announce it.
    ///
    /// Does nothing, and publishes nothing, if the device has no caches.
    pub fn clear_device_caches(&mut self, device: DeviceId) -> usize {
        if !self.caches.active_devices().contains(&device) {
            return 0;
        }
        let entries = self.caches.clear_device_caches(device);
        self.bus.publish(GraphEvent::CachesCleared {
            device: Some(device),
            entries,
        });
        entries
    }

    /// Clear device-independent caches and announce it.
    pub fn clear_global_caches(&mut self) -> usize {
        let entries = self.caches.clear_global_caches();
        if entries > 0 {
            self.bus.publish(GraphEvent::CachesCleared {
                device: None,
                entries,
            });
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::DummyDevice;
    use crate::cache::CountingFactory;
    use crate::device::Device;
    use crate::events::GraphEventKind;

    #[test]
    fn test_clear_device_caches_publishes_once() {
        let mut context = GraphContext::new();
        let device: Arc<dyn Device> = Arc::new(DummyDevice::new("ctx"));
        context
            .caches
            .register_cacher(CountingFactory::default(), "counting", true);
        context
            .caches
            .get_or_create::<CountingFactory>(Some(&device), &("a".to_string(), 1))
            .unwrap();

        assert_eq!(context.clear_device_caches(device.id()), 1);
        assert_eq!(context.clear_device_caches(device.id()), 0);
        assert_eq!(context.bus.published_count(GraphEventKind::CachesCleared), 1);
    }
}

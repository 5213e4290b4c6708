//! Events published on the graph's message bus.

use lumen_core::Event;

use crate::device::DeviceId;

/// Why a device's state is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationReason {
    /// The device reported loss.
    DeviceLost,
    /// The device is being recreated with new settings.
    DeviceRecompilation,
    /// Requested by the application.
    Manual,
}

/// Render graph notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// Published before any state tied to `device` is destroyed.
    DeviceInvalidated {
        device: DeviceId,
        reason: InvalidationReason,
    },
    NodeCompiled {
        node: String,
    },
    NodeCleaned {
        node: String,
    },
    /// Cached resources were destroyed. `device` is `None` for global caches.
    CachesCleared {
        device: Option<DeviceId>,
        entries: usize,
    },
}

/// Discriminant of [`GraphEvent`], used for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphEventKind {
    DeviceInvalidated,
    NodeCompiled,
    NodeCleaned,
    CachesCleared,
}

impl Event for GraphEvent {
    type Kind = GraphEventKind;

    fn kind(&self) -> GraphEventKind {
        match self {
            Self::DeviceInvalidated { .. } => GraphEventKind::DeviceInvalidated,
            Self::NodeCompiled { .. } => GraphEventKind::NodeCompiled,
            Self::NodeCleaned { .. } => GraphEventKind::NodeCleaned,
            Self::CachesCleared { .. } => GraphEventKind::CachesCleared,
        }
    }
}

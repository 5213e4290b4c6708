//! Render graph error types.

use thiserror::Error;

use crate::device::DeviceCapabilities;
use crate::node::SlotType;

/// Errors reported by a device or swapchain collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device ran out of memory.
    #[error("out of device memory")]
    OutOfMemory,
    /// The device was lost or destroyed.
    #[error("device lost")]
    DeviceLost,
    /// A wait could never complete.
    #[error("wait timed out")]
    Timeout,
    /// The device refused to create an object.
    #[error("creation rejected: {0}")]
    CreationRejected(String),
    /// A handle does not belong to this device.
    #[error("invalid handle")]
    InvalidHandle,
    /// An object was used while the device still owned it.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),
    /// No memory type satisfies the requested properties.
    #[error("no memory type matches the requested properties")]
    NoSuitableMemoryType,
    /// The swapchain no longer matches its surface.
    #[error("swapchain out of date")]
    SwapchainOutOfDate,
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Broad classification of a [`GraphError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The graph or a node was set up incorrectly.
    Configuration,
    /// The device could not create a resource.
    ResourceCreation,
}

/// Errors that abort setup or compilation of a render graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A required input slot has no value.
    #[error("node '{node}': required input '{slot}' is not connected")]
    MissingInput { node: String, slot: String },

    /// A connection or value has the wrong slot type.
    #[error("node '{node}': slot '{slot}' expects {expected:?}, got {found:?}")]
    SlotTypeMismatch {
        node: String,
        slot: String,
        expected: SlotType,
        found: SlotType,
    },

    /// A slot name does not exist on the node type.
    #[error("node '{node}': unknown slot '{slot}'")]
    UnknownSlot { node: String, slot: String },

    /// A single-value input slot is already connected.
    #[error("node '{node}': input '{slot}' is already connected")]
    SlotAlreadyConnected { node: String, slot: String },

    /// No cacher was registered for a resource kind.
    #[error("cacher kind '{kind}' is not registered")]
    UnregisteredCacher { kind: &'static str },

    /// A cacher kind was registered with another factory type.
    #[error("cacher kind '{kind}' was registered with a different factory")]
    CacherKindMismatch { kind: &'static str },

    /// A device-dependent cacher was resolved without a device.
    #[error("cacher kind '{kind}' is device dependent but no device was given")]
    DeviceRequired { kind: &'static str },

    /// Cleanup entries depend on each other.
    #[error("cyclic cleanup dependency between {names:?}")]
    CyclicCleanupDependency { names: Vec<String> },

    /// Node connections form a cycle.
    #[error("cyclic node dependency between {nodes:?}")]
    CyclicNodeDependency { nodes: Vec<String> },

    /// A singleton node type was instantiated twice.
    #[error("node type '{node_type}' is a singleton and is already instantiated")]
    SingletonViolation { node_type: String },

    /// The node's device lacks a required capability.
    #[error("node '{node}' requires device capabilities {required:?}")]
    MissingCapability {
        node: String,
        required: DeviceCapabilities,
    },

    /// No node type with this id is registered.
    #[error("unknown node type id {id}")]
    UnknownNodeType { id: u32 },

    /// A node type id was registered twice.
    #[error("node type id {id} is already registered")]
    DuplicateNodeType { id: u32 },

    /// Any other node misconfiguration.
    #[error("node '{node}': {message}")]
    InvalidConfiguration { node: String, message: String },

    /// A factory failed to create a cached resource.
    #[error("failed to create {kind}: {message}")]
    ResourceCreation { kind: String, message: String },

    /// The device collaborator reported an error.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// A node callback failed during a graph phase.
    #[error("node '{node}' failed during {phase}: {source}")]
    NodeFailed {
        node: String,
        phase: &'static str,
        #[source]
        source: Box<GraphError>,
    },
}

impl GraphError {
    /// Shorthand for [`GraphError::InvalidConfiguration`].
    pub fn invalid(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ResourceCreation { .. } | Self::Device(_) => ErrorCategory::ResourceCreation,
            Self::NodeFailed { source, .. } => source.category(),
            _ => ErrorCategory::Configuration,
        }
    }

    /// Whether this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Strip [`GraphError::NodeFailed`] wrappers.
    pub fn root_cause(&self) -> &GraphError {
        match self {
            Self::NodeFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type for render graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::MissingInput {
            node: "present".into(),
            slot: "swapchain".into(),
        };
        assert_eq!(
            err.to_string(),
            "node 'present': required input 'swapchain' is not connected"
        );

        let err = GraphError::Device(DeviceError::OutOfMemory);
        assert_eq!(err.to_string(), "device error: out of device memory");
    }

    #[test]
    fn test_error_category() {
        let config = GraphError::UnregisteredCacher { kind: "sampler" };
        assert_eq!(config.category(), ErrorCategory::Configuration);
        assert!(config.is_configuration());

        let creation = GraphError::ResourceCreation {
            kind: "sampler".into(),
            message: "rejected".into(),
        };
        assert_eq!(creation.category(), ErrorCategory::ResourceCreation);
    }

    #[test]
    fn test_node_failed_wraps_cause() {
        let err = GraphError::NodeFailed {
            node: "sync".into(),
            phase: "compile",
            source: Box::new(DeviceError::DeviceLost.into()),
        };
        assert_eq!(err.category(), ErrorCategory::ResourceCreation);
        assert_eq!(err.root_cause(), &GraphError::Device(DeviceError::DeviceLost));
        assert_eq!(
            err.to_string(),
            "node 'sync' failed during compile: device error: device lost"
        );
    }
}

//! Built-in nodes.
//!
//! | Type id | Node | Inputs | Outputs |
//! |---------|------|--------|---------|
//! | [`DEVICE_NODE`] | [`DeviceNode`] | - | `device` |
//! | [`FRAME_SYNC_NODE`] | [`FrameSyncNode`] | `device`, `swapchain` (optional) | `frame_sync`, `frame` |

mod device;
mod frame_sync;

pub use device::DeviceNode;
pub use frame_sync::{FrameSyncNode, SharedFrameSync};

use crate::error::GraphResult;
use crate::graph::RenderGraph;
use crate::node::NodeTypeId;

/// Type id of [`DeviceNode`].
pub const DEVICE_NODE: NodeTypeId = NodeTypeId(1);

/// Type id of [`FrameSyncNode`].
pub const FRAME_SYNC_NODE: NodeTypeId = NodeTypeId(2);

/// Register every built-in node type with `graph`.
pub fn register_builtin_types(graph: &mut RenderGraph) -> GraphResult<()> {
    graph.register_node_type(DeviceNode::node_type())?;
    graph.register_node_type(FrameSyncNode::node_type())?;
    Ok(())
}

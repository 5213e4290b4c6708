//! Node instances owned by a render graph.

use std::sync::Arc;

use lumen_core::LoopId;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::device::DeviceId;

use super::types::NodeType;
use super::{Node, SlotOutputs};

/// Handle to a node in a [`RenderGraph`](crate::graph::RenderGraph).
///
/// Only valid within the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle state of a node instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Constructed,
    Setup,
    Compiled,
    Executing,
    Cleaned,
}

impl NodeState {
    /// Whether compiled resources are alive.
    pub fn is_compiled(self) -> bool {
        matches!(self, Self::Compiled | Self::Executing)
    }
}

/// Source of an input value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Connection {
    pub source: NodeHandle,
    pub output: &'static str,
}

/// State shared between the graph and the node's registered cleanup action.
pub(crate) struct NodeCore {
    pub node: Box<dyn Node>,
    pub state: NodeState,
    pub outputs: SlotOutputs,
}

pub(crate) struct NodeInstance {
    pub name: String,
    pub node_type: Arc<NodeType>,
    pub core: Arc<Mutex<NodeCore>>,
    /// Connections per input slot, in connection order.
    pub inputs: FxHashMap<&'static str, Vec<Connection>>,
    pub loops: Vec<LoopId>,
    pub tags: FxHashSet<String>,
    pub needs_recompile: bool,
    pub execution_count: u64,
    /// Device resolved at the last compile.
    pub device: Option<DeviceId>,
}

impl NodeInstance {
    pub fn new(name: String, node_type: Arc<NodeType>, node: Box<dyn Node>) -> Self {
        Self {
            name,
            node_type,
            core: Arc::new(Mutex::new(NodeCore {
                node,
                state: NodeState::Constructed,
                outputs: SlotOutputs::default(),
            })),
            inputs: FxHashMap::default(),
            loops: Vec::new(),
            tags: FxHashSet::default(),
            needs_recompile: false,
            execution_count: 0,
            device: None,
        }
    }

    pub fn state(&self) -> NodeState {
        self.core.lock().state
    }

    /// Producers this node reads from, deduplicated, in first-connection order.
    pub fn producers(&self) -> Vec<NodeHandle> {
        let mut producers = Vec::new();
        for desc in self.node_type.inputs() {
            for connection in self.inputs.get(desc.name).into_iter().flatten() {
                if !producers.contains(&connection.source) {
                    producers.push(connection.source);
                }
            }
        }
        producers
    }
}

impl std::fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInstance")
            .field("name", &self.name)
            .field("node_type", &self.node_type.name())
            .field("state", &self.state())
            .field("inputs", &self.inputs)
            .field("loops", &self.loops)
            .field("execution_count", &self.execution_count)
            .finish()
    }
}

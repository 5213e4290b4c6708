//! Node lifecycle contract.
//!
//! A node is a unit of work with a typed schema ([`NodeType`]) and four
//! lifecycle callbacks, driven by the [`RenderGraph`](crate::graph::RenderGraph):
//!
//! ```text
//! Constructed -> Setup -> Compiled -> Executing* -> Cleaned
//!                            ^                         |
//!                            +------- recompile -------+
//! ```
//!
//! - **setup** runs once per node, before the first compile.
//! - **compile** is the only phase that creates device-dependent resources.
//!   It reads connected inputs and writes outputs through [`CompileContext`].
//! - **execute** runs once per frame tick, or once per fixed step for nodes
//!   bound to a loop. It only records per-frame work.
//! - **cleanup** is never called by node owners. The graph registers it with
//!   the [`CleanupRegistry`] after a successful compile, ordered before the
//!   cleanup of every node this one reads from.

mod instance;
mod slot;
mod types;

pub use instance::{NodeHandle, NodeState};
pub use slot::SlotValue;
pub use types::{
    InstancingPolicy, NodeType, NodeTypeId, NodeTypeRegistry, SlotArity, SlotDesc, SlotType,
    WorkloadEstimate,
};

pub(crate) use instance::{Connection, NodeCore, NodeInstance};

use std::any::Any;
use std::sync::Arc;

use lumen_core::{LoopManager, LoopReference};
use rustc_hash::FxHashMap;

use crate::cache::CacheRegistry;
use crate::cleanup::CleanupRegistry;
use crate::device::Device;
use crate::error::{GraphError, GraphResult};
use crate::events::GraphEvent;
use crate::graph::GraphContext;

/// Values gathered for each input slot, in connection order.
pub(crate) type SlotInputs = FxHashMap<&'static str, Vec<SlotValue>>;

/// Values written to output slots.
pub(crate) type SlotOutputs = FxHashMap<&'static str, SlotValue>;

/// A render graph node.
pub trait Node: Send {
    /// Graph-scope initialization, run once before the first compile.
    fn setup(&mut self, _ctx: &mut SetupContext<'_>) -> GraphResult<()> {
        Ok(())
    }

    /// Create device-dependent resources and publish outputs.
    fn compile(&mut self, ctx: &mut CompileContext<'_>) -> GraphResult<()>;

    /// Record one frame (or one fixed step) of work.
    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()>;

    /// Release whatever compile created.
    ///
    /// Must tolerate a lost device by skipping native destruction.
    fn cleanup(&mut self, ctx: &mut GraphContext);
}

fn input_slot<'s>(
    node: &str,
    node_type: &NodeType,
    inputs: &'s SlotInputs,
    name: &str,
) -> GraphResult<&'s [SlotValue]> {
    let desc = node_type.input(name).ok_or_else(|| GraphError::UnknownSlot {
        node: node.to_string(),
        slot: name.to_string(),
    })?;
    Ok(inputs.get(desc.name).map(Vec::as_slice).unwrap_or(&[]))
}

fn required_input<'s>(
    node: &str,
    node_type: &NodeType,
    inputs: &'s SlotInputs,
    name: &str,
) -> GraphResult<&'s SlotValue> {
    input_slot(node, node_type, inputs, name)?
        .first()
        .ok_or_else(|| GraphError::MissingInput {
            node: node.to_string(),
            slot: name.to_string(),
        })
}

fn write_output(
    node: &str,
    node_type: &NodeType,
    outputs: &mut SlotOutputs,
    name: &str,
    value: SlotValue,
) -> GraphResult<()> {
    let desc = node_type.output(name).ok_or_else(|| GraphError::UnknownSlot {
        node: node.to_string(),
        slot: name.to_string(),
    })?;
    if desc.ty != value.ty() {
        return Err(GraphError::SlotTypeMismatch {
            node: node.to_string(),
            slot: name.to_string(),
            expected: desc.ty,
            found: value.ty(),
        });
    }
    outputs.insert(desc.name, value);
    Ok(())
}

/// Context handed to [`Node::setup`].
pub struct SetupContext<'a> {
    pub(crate) node: &'a str,
    pub(crate) node_type: &'a NodeType,
    pub(crate) graph: &'a mut GraphContext,
}

impl<'a> SetupContext<'a> {
    pub fn node_name(&self) -> &str {
        self.node
    }

    pub fn node_type(&self) -> &NodeType {
        self.node_type
    }

    /// Register cachers or loops ahead of compilation.
    pub fn graph(&mut self) -> &mut GraphContext {
        self.graph
    }
}

/// Context handed to [`Node::compile`].
pub struct CompileContext<'a> {
    pub(crate) node: &'a str,
    pub(crate) node_type: &'a NodeType,
    pub(crate) inputs: &'a SlotInputs,
    pub(crate) outputs: &'a mut SlotOutputs,
    pub(crate) device: Option<&'a Arc<dyn Device>>,
    pub(crate) graph: &'a mut GraphContext,
    pub(crate) cleanup: &'a mut CleanupRegistry<GraphContext>,
}

impl<'a> CompileContext<'a> {
    pub fn node_name(&self) -> &str {
        self.node
    }

    pub fn node_type(&self) -> &NodeType {
        self.node_type
    }

    /// The first value connected to `name`.
    ///
    /// Fails with [`GraphError::MissingInput`] if nothing is connected.
    pub fn input(&self, name: &str) -> GraphResult<&SlotValue> {
        required_input(self.node, self.node_type, self.inputs, name)
    }

    /// The first value connected to `name`, if any.
    pub fn optional_input(&self, name: &str) -> GraphResult<Option<&SlotValue>> {
        Ok(input_slot(self.node, self.node_type, self.inputs, name)?.first())
    }

    /// Every value connected to a variadic input.
    pub fn inputs(&self, name: &str) -> GraphResult<&[SlotValue]> {
        input_slot(self.node, self.node_type, self.inputs, name)
    }

    /// Downcast a required input.
    pub fn input_as<T: Any + Send + Sync>(&self, name: &str) -> GraphResult<Arc<T>> {
        self.input(name)?
            .downcast_arc::<T>()
            .ok_or_else(|| GraphError::invalid(self.node, format!("input '{name}' has an unexpected value")))
    }

    /// The device this node runs on, taken from its first device input.
    pub fn device(&self) -> GraphResult<&Arc<dyn Device>> {
        self.device
            .ok_or_else(|| GraphError::invalid(self.node, "no device input is connected"))
    }

    /// Publish a value on an output slot.
    pub fn set_output(&mut self, name: &str, value: SlotValue) -> GraphResult<()> {
        write_output(self.node, self.node_type, self.outputs, name, value)
    }

    pub fn caches(&mut self) -> &mut CacheRegistry {
        &mut self.graph.caches
    }

    pub fn loops(&self) -> &LoopManager {
        &self.graph.loops
    }

    pub fn publish(&mut self, event: GraphEvent) {
        self.graph.bus.publish(event);
    }

    /// Register an extra teardown step that runs before this node's own cleanup.
    ///
    /// The entry is named `"{node}/{name}"` and is replaced on recompile.
    pub fn register_cleanup(
        &mut self,
        name: &str,
        action: impl FnOnce(&mut GraphContext) + Send + 'static,
    ) {
        let full_name = format!("{}/{}", self.node, name);
        self.cleanup.register_before(&full_name, &[self.node], action);
    }
}

/// Context handed to [`Node::execute`].
pub struct ExecuteContext<'a> {
    pub(crate) node: &'a str,
    pub(crate) node_type: &'a NodeType,
    pub(crate) inputs: &'a SlotInputs,
    pub(crate) outputs: &'a mut SlotOutputs,
    pub(crate) graph: &'a mut GraphContext,
    pub(crate) frame_index: u64,
    pub(crate) delta_time: f64,
    pub(crate) step: u32,
    pub(crate) loop_reference: Option<LoopReference>,
}

impl<'a> ExecuteContext<'a> {
    pub fn node_name(&self) -> &str {
        self.node
    }

    /// Outer frame tick, starting at 1.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Seconds covered by this invocation.
    ///
    /// For a loop-bound node this is the loop's delta, otherwise the frame delta.
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    /// Index of this invocation within the tick. Non-zero only for catch-up steps.
    pub fn step(&self) -> u32 {
        self.step
    }

    /// The loop driving this invocation, if any.
    pub fn loop_reference(&self) -> Option<&LoopReference> {
        self.loop_reference.as_ref()
    }

    pub fn input(&self, name: &str) -> GraphResult<&SlotValue> {
        required_input(self.node, self.node_type, self.inputs, name)
    }

    pub fn optional_input(&self, name: &str) -> GraphResult<Option<&SlotValue>> {
        Ok(input_slot(self.node, self.node_type, self.inputs, name)?.first())
    }

    pub fn inputs(&self, name: &str) -> GraphResult<&[SlotValue]> {
        input_slot(self.node, self.node_type, self.inputs, name)
    }

    /// Replace a per-frame output value.
    pub fn set_output(&mut self, name: &str, value: SlotValue) -> GraphResult<()> {
        write_output(self.node, self.node_type, self.outputs, name, value)
    }

    pub fn caches(&mut self) -> &mut CacheRegistry {
        &mut self.graph.caches
    }

    pub fn publish(&mut self, event: GraphEvent) {
        self.graph.bus.publish(event);
    }
}

//! Render graph orchestration.
//!
//! [`RenderGraph`] owns every node instance together with the collaborators
//! they share ([`GraphContext`]) and the [`CleanupRegistry`] their teardown
//! goes through. It drives the node lifecycle across the whole graph:
//!
//! | Phase | Entry point | Order |
//! |-------|-------------|-------|
//! | Setup | [`RenderGraph::setup`] | insertion |
//! | Compile | [`RenderGraph::compile`] | producers before consumers |
//! | Execute | [`RenderGraph::execute`] | producers before consumers, gated by loops |
//! | Cleanup | [`RenderGraph::cleanup`] | consumers before producers |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lumen_graphics::nodes::{self, DeviceNode, FrameSyncNode};
//! use lumen_graphics::{DummyDevice, FrameSyncConfig, RenderGraph};
//!
//! let mut graph = RenderGraph::new();
//! nodes::register_builtin_types(&mut graph).unwrap();
//!
//! let device = graph
//!     .add_node(nodes::DEVICE_NODE, "device", DeviceNode::new(Arc::new(DummyDevice::new("gpu"))))
//!     .unwrap();
//! let sync = graph
//!     .add_node(nodes::FRAME_SYNC_NODE, "sync", FrameSyncNode::new(FrameSyncConfig::default()))
//!     .unwrap();
//! graph.connect(device, "device", sync, "device").unwrap();
//!
//! graph.compile().unwrap();
//! graph.execute(1.0 / 60.0).unwrap();
//! graph.cleanup().unwrap();
//! ```

mod context;

pub use context::GraphContext;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use lumen_core::{LoopConfig, LoopId, LoopReference, clamp_frame_delta};
use rustc_hash::FxHashMap;

use crate::cleanup::CleanupRegistry;
use crate::device::{Device, DeviceId};
use crate::error::{DeviceError, GraphError, GraphResult};
use crate::events::{GraphEvent, InvalidationReason};
use crate::node::{
    CompileContext, Connection, ExecuteContext, InstancingPolicy, Node, NodeCore, NodeHandle,
    NodeInstance, NodeState, NodeType, NodeTypeId, NodeTypeRegistry, SetupContext, SlotArity,
    SlotInputs, SlotValue,
};

/// Default cap on extra fixed steps per loop and tick.
pub const DEFAULT_MAX_CATCHUP_STEPS: u32 = 8;

/// Graph-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphConfig {
    /// Extra executions a `MultipleSteps` loop may get within one tick.
    pub max_catchup_steps: u32,
}

impl GraphConfig {
    pub fn with_max_catchup_steps(mut self, steps: u32) -> Self {
        self.max_catchup_steps = steps;
        self
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_catchup_steps: DEFAULT_MAX_CATCHUP_STEPS,
        }
    }
}

fn node_failed(node: &str, phase: &'static str, source: GraphError) -> GraphError {
    log::error!("RenderGraph: node '{}' failed during {}: {}", node, phase, source);
    GraphError::NodeFailed {
        node: node.to_string(),
        phase,
        source: Box::new(source),
    }
}

/// A graph of nodes connected through typed slots.
pub struct RenderGraph {
    config: GraphConfig,
    types: NodeTypeRegistry,
    nodes: Vec<NodeInstance>,
    by_name: FxHashMap<String, NodeHandle>,
    context: GraphContext,
    cleanup: CleanupRegistry<GraphContext>,
    /// Topological order from the last compile.
    order: Vec<NodeHandle>,
    frame_index: u64,
}

impl RenderGraph {
    /// Create an empty graph with default settings.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            config,
            types: NodeTypeRegistry::new(),
            nodes: Vec::new(),
            by_name: FxHashMap::default(),
            context: GraphContext::new(),
            cleanup: CleanupRegistry::new(),
            order: Vec::new(),
            frame_index: 0,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Make a node type available to [`add_node`](Self::add_node).
    pub fn register_node_type(&mut self, node_type: NodeType) -> GraphResult<()> {
        self.types.register(node_type)
    }

    pub fn node_types(&self) -> &NodeTypeRegistry {
        &self.types
    }

    /// Add a node instance of a registered type.
    ///
    /// Names must be unique within the graph; they also name the node's
    /// cleanup entry.
    pub fn add_node(
        &mut self,
        type_id: NodeTypeId,
        name: impl Into<String>,
        node: impl Node + 'static,
    ) -> GraphResult<NodeHandle> {
        let name = name.into();
        let node_type = self
            .types
            .get(type_id)
            .ok_or(GraphError::UnknownNodeType { id: type_id.0 })?;

        if node_type.instancing() == InstancingPolicy::Singleton
            && self.nodes.iter().any(|n| n.node_type.id() == type_id)
        {
            return Err(GraphError::SingletonViolation {
                node_type: node_type.name().to_string(),
            });
        }
        if self.by_name.contains_key(&name) {
            return Err(GraphError::invalid(name, "a node with this name already exists"));
        }

        let handle = NodeHandle::new(self.nodes.len());
        log::debug!("RenderGraph: added '{}' ({})", name, node_type.name());
        self.nodes.push(NodeInstance::new(
            name.clone(),
            Arc::new(node_type.clone()),
            Box::new(node),
        ));
        self.by_name.insert(name, handle);
        Ok(handle)
    }

    fn instance(&self, handle: NodeHandle) -> &NodeInstance {
        assert!(handle.index() < self.nodes.len(), "Invalid node handle");
        &self.nodes[handle.index()]
    }

    fn instance_mut(&mut self, handle: NodeHandle) -> &mut NodeInstance {
        assert!(handle.index() < self.nodes.len(), "Invalid node handle");
        &mut self.nodes[handle.index()]
    }

    /// Connect `source.output` to `target.input`.
    pub fn connect(
        &mut self,
        source: NodeHandle,
        output: &str,
        target: NodeHandle,
        input: &str,
    ) -> GraphResult<()> {
        let source_node = self.instance(source);
        let output_desc = *source_node
            .node_type
            .output(output)
            .ok_or_else(|| GraphError::UnknownSlot {
                node: source_node.name.clone(),
                slot: output.to_string(),
            })?;
        let source_name = source_node.name.clone();

        let target_node = self.instance(target);
        let input_desc = *target_node
            .node_type
            .input(input)
            .ok_or_else(|| GraphError::UnknownSlot {
                node: target_node.name.clone(),
                slot: input.to_string(),
            })?;
        if input_desc.ty != output_desc.ty {
            return Err(GraphError::SlotTypeMismatch {
                node: target_node.name.clone(),
                slot: input.to_string(),
                expected: input_desc.ty,
                found: output_desc.ty,
            });
        }

        let target_node = self.instance_mut(target);
        let connections = target_node.inputs.entry(input_desc.name).or_default();
        if input_desc.arity == SlotArity::One && !connections.is_empty() {
            return Err(GraphError::SlotAlreadyConnected {
                node: target_node.name.clone(),
                slot: input.to_string(),
            });
        }
        connections.push(Connection {
            source,
            output: output_desc.name,
        });
        target_node.needs_recompile = true;

        log::debug!(
            "RenderGraph: connected '{}'.{} -> '{}'.{}",
            source_name,
            output,
            target_node.name,
            input
        );
        Ok(())
    }

    /// Register a timestep loop.
    pub fn register_loop(&mut self, config: LoopConfig) -> LoopId {
        self.context.loops.register_loop(config)
    }

    /// Drive a node by a loop.
    ///
    /// A node bound to loops executes only on ticks where one of them does,
    /// once per step the loop takes. A node with no loops executes every tick.
    pub fn connect_loop(&mut self, node: NodeHandle, loop_id: LoopId) -> GraphResult<()> {
        if self.context.loops.loop_reference(loop_id).is_none() {
            return Err(GraphError::invalid(
                self.instance(node).name.clone(),
                format!("{loop_id} is not registered"),
            ));
        }
        let instance = self.instance_mut(node);
        if !instance.loops.contains(&loop_id) {
            instance.loops.push(loop_id);
        }
        Ok(())
    }

    pub fn add_tag(&mut self, node: NodeHandle, tag: impl Into<String>) {
        self.instance_mut(node).tags.insert(tag.into());
    }

    pub fn has_tag(&self, node: NodeHandle, tag: &str) -> bool {
        self.instance(node).tags.contains(tag)
    }

    /// Nodes carrying `tag`, in insertion order.
    pub fn nodes_with_tag(&self, tag: &str) -> Vec<NodeHandle> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.tags.contains(tag))
            .map(|(index, _)| NodeHandle::new(index))
            .collect()
    }

    /// Look a node up by name.
    pub fn node(&self, name: &str) -> Option<NodeHandle> {
        self.by_name.get(name).copied()
    }

    pub fn node_name(&self, node: NodeHandle) -> &str {
        &self.instance(node).name
    }

    pub fn node_state(&self, node: NodeHandle) -> NodeState {
        self.instance(node).state()
    }

    /// How many times the node's execute callback has succeeded.
    pub fn execution_count(&self, node: NodeHandle) -> u64 {
        self.instance(node).execution_count
    }

    /// Device the node was compiled against.
    pub fn node_device(&self, node: NodeHandle) -> Option<DeviceId> {
        self.instance(node).device
    }

    pub fn needs_recompile(&self, node: NodeHandle) -> bool {
        self.instance(node).needs_recompile
    }

    /// Current value of an output slot.
    pub fn output(&self, node: NodeHandle, slot: &str) -> Option<SlotValue> {
        self.instance(node).core.lock().outputs.get(slot).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node order of the last compile.
    pub fn execution_order(&self) -> &[NodeHandle] {
        &self.order
    }

    /// Outer frame ticks executed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn context(&self) -> &GraphContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut GraphContext {
        &mut self.context
    }

    pub fn cleanup_registry(&self) -> &CleanupRegistry<GraphContext> {
        &self.cleanup
    }

    /// Force a node, and everything downstream of it, to recompile.
    pub fn mark_needs_recompile(&mut self, node: NodeHandle) {
        let instance = self.instance_mut(node);
        log::debug!("RenderGraph: '{}' marked for recompile", instance.name);
        instance.needs_recompile = true;
    }

    /// Run setup on every node that has not been set up yet.
    pub fn setup(&mut self) -> GraphResult<()> {
        for node in &self.nodes {
            let mut core = node.core.lock();
            if core.state != NodeState::Constructed {
                continue;
            }
            let mut ctx = SetupContext {
                node: &node.name,
                node_type: node.node_type.as_ref(),
                graph: &mut self.context,
            };
            if let Err(err) = core.node.setup(&mut ctx) {
                return Err(node_failed(&node.name, "setup", err));
            }
            core.state = NodeState::Setup;
            log::trace!("RenderGraph: set up '{}'", node.name);
        }
        Ok(())
    }

    /// Kahn's algorithm over node connections.
    fn topological_order(&self) -> GraphResult<Vec<NodeHandle>> {
        let count = self.nodes.len();
        let mut in_degree = vec![0usize; count];
        let mut consumers = vec![Vec::new(); count];
        for (index, node) in self.nodes.iter().enumerate() {
            for producer in node.producers() {
                in_degree[index] += 1;
                consumers[producer.index()].push(index);
            }
        }

        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(index) = queue.pop_front() {
            order.push(NodeHandle::new(index));
            for &consumer in &consumers[index] {
                in_degree[consumer] -= 1;
                if in_degree[consumer] == 0 {
                    queue.push_back(consumer);
                }
            }
        }

        if order.len() != count {
            let nodes: Vec<String> = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].name.clone())
                .collect();
            log::error!("RenderGraph: cyclic node dependency between {:?}", nodes);
            return Err(GraphError::CyclicNodeDependency { nodes });
        }
        Ok(order)
    }

    /// Compile every node that is new, cleaned, marked, or downstream of one.
    ///
    /// Stale compiled state is cleaned first, consumers before producers.
    /// Setup runs for nodes that have not been set up. The first node error
    /// aborts the pass. Returns the number of nodes compiled.
    pub fn compile(&mut self) -> GraphResult<usize> {
        self.setup()?;
        let order = self.topological_order()?;

        let mut dirty = vec![false; self.nodes.len()];
        for &handle in &order {
            let node = &self.nodes[handle.index()];
            dirty[handle.index()] = node.needs_recompile
                || !node.state().is_compiled()
                || node.producers().iter().any(|p| dirty[p.index()]);
        }

        for &handle in &order {
            let node = &self.nodes[handle.index()];
            if dirty[handle.index()] && node.state().is_compiled() {
                self.cleanup.flush_from(&node.name, &mut self.context)?;
            }
        }

        self.order = order.clone();
        let mut compiled = 0;
        for handle in order {
            if dirty[handle.index()] {
                self.compile_node(handle)?;
                compiled += 1;
            }
        }

        log::info!(
            "RenderGraph: compiled {} of {} nodes",
            compiled,
            self.nodes.len()
        );
        Ok(compiled)
    }

    /// Current output values of every connected producer, per input slot.
    fn gather_inputs(&self, index: usize) -> SlotInputs {
        let mut inputs = SlotInputs::default();
        for (&slot, connections) in &self.nodes[index].inputs {
            let values: Vec<SlotValue> = connections
                .iter()
                .filter_map(|c| {
                    self.nodes[c.source.index()]
                        .core
                        .lock()
                        .outputs
                        .get(c.output)
                        .cloned()
                })
                .collect();
            if !values.is_empty() {
                inputs.insert(slot, values);
            }
        }
        inputs
    }

    fn compile_node(&mut self, handle: NodeHandle) -> GraphResult<()> {
        let index = handle.index();
        let inputs = self.gather_inputs(index);
        let node = &self.nodes[index];
        let name = node.name.clone();
        let node_type = Arc::clone(&node.node_type);
        let core = Arc::clone(&node.core);

        for desc in node_type.inputs() {
            if desc.required && !inputs.contains_key(desc.name) {
                let err = GraphError::MissingInput {
                    node: name.clone(),
                    slot: desc.name.to_string(),
                };
                return Err(node_failed(&name, "compile", err));
            }
        }

        let device: Option<Arc<dyn Device>> = node_type
            .inputs()
            .iter()
            .filter_map(|desc| inputs.get(desc.name))
            .flatten()
            .find_map(|value| value.as_device().cloned());

        let required = node_type.required_capabilities();
        match &device {
            Some(device) if device.is_lost() => {
                return Err(node_failed(&name, "compile", DeviceError::DeviceLost.into()));
            }
            Some(device) if !device.capabilities().contains(required) => {
                let err = GraphError::MissingCapability {
                    node: name.clone(),
                    required,
                };
                return Err(node_failed(&name, "compile", err));
            }
            None if !required.is_empty() => {
                let err = GraphError::MissingCapability {
                    node: name.clone(),
                    required,
                };
                return Err(node_failed(&name, "compile", err));
            }
            _ => {}
        }

        let output_device = {
            let mut guard = core.lock();
            let NodeCore {
                node: callbacks,
                state,
                outputs,
            } = &mut *guard;

            let mut ctx = CompileContext {
                node: &name,
                node_type: node_type.as_ref(),
                inputs: &inputs,
                outputs: &mut *outputs,
                device: device.as_ref(),
                graph: &mut self.context,
                cleanup: &mut self.cleanup,
            };
            if let Err(err) = callbacks.compile(&mut ctx) {
                return Err(node_failed(&name, "compile", err));
            }
            *state = NodeState::Compiled;
            outputs
                .values()
                .find_map(|value| value.as_device().map(|d| d.id()))
        };

        let providers: Vec<String> = self.nodes[index]
            .producers()
            .into_iter()
            .map(|p| self.nodes[p.index()].name.clone())
            .collect();
        let providers: Vec<&str> = providers.iter().map(String::as_str).collect();

        let cell = Arc::clone(&core);
        let cleanup_name = name.clone();
        self.cleanup
            .register_before(&name, &providers, move |ctx: &mut GraphContext| {
                let mut core = cell.lock();
                if !core.state.is_compiled() {
                    log::debug!("RenderGraph: '{}' is already cleaned", cleanup_name);
                    return;
                }
                core.node.cleanup(ctx);
                core.outputs.clear();
                core.state = NodeState::Cleaned;
                drop(core);

                log::debug!("RenderGraph: cleaned '{}'", cleanup_name);
                ctx.bus.publish(GraphEvent::NodeCleaned { node: cleanup_name });
            });

        let instance = &mut self.nodes[index];
        instance.needs_recompile = false;
        instance.device = device.as_ref().map(|d| d.id()).or(output_device);

        log::debug!("RenderGraph: compiled '{}'", name);
        self.context.bus.publish(GraphEvent::NodeCompiled { node: name });
        Ok(())
    }

    /// Steps each loop takes this tick: zero if it does not execute, otherwise
    /// one plus whatever `MultipleSteps` catch-up allows.
    fn loop_steps(&mut self) -> Vec<u32> {
        let max_extra = self.config.max_catchup_steps;
        let loops = &mut self.context.loops;
        (0..loops.loop_count() as u32)
            .map(|raw| {
                let id = LoopId::new(raw);
                let executes = loops
                    .loop_reference(id)
                    .is_some_and(|r| r.should_execute_this_frame);
                if !executes {
                    return 0;
                }
                let mut extra = 0;
                while extra < max_extra && loops.take_catchup_step(id) {
                    extra += 1;
                }
                1 + extra
            })
            .collect()
    }

    /// Advance loops by `frame_delta` seconds and execute compiled nodes.
    ///
    /// Nodes that are not compiled are skipped. The first node error aborts
    /// the tick.
    pub fn execute(&mut self, frame_delta: f64) -> GraphResult<()> {
        let frame_delta = clamp_frame_delta(frame_delta);
        self.frame_index += 1;
        self.context.loops.set_current_frame(self.frame_index);
        self.context.loops.update_loops(frame_delta);
        let steps = self.loop_steps();

        for position in 0..self.order.len() {
            let index = self.order[position].index();
            if !self.nodes[index].state().is_compiled() {
                log::trace!("RenderGraph: skipping '{}'", self.nodes[index].name);
                continue;
            }

            if self.nodes[index].loops.is_empty() {
                self.execute_node(index, frame_delta, 0, None)?;
                continue;
            }

            let bound = self.nodes[index].loops.clone();
            for loop_id in bound {
                let count = steps.get(loop_id.index() as usize).copied().unwrap_or(0);
                let Some(reference) = self.context.loops.loop_reference(loop_id).copied() else {
                    continue;
                };
                for step in 0..count {
                    let started = Instant::now();
                    self.execute_node(index, reference.delta_time, step, Some(reference))?;
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    self.context.loops.record_execution_time(loop_id, elapsed_ms);
                }
            }
        }
        Ok(())
    }

    fn execute_node(
        &mut self,
        index: usize,
        delta_time: f64,
        step: u32,
        loop_reference: Option<LoopReference>,
    ) -> GraphResult<()> {
        let inputs = self.gather_inputs(index);
        let node = &self.nodes[index];

        let result = {
            let mut guard = node.core.lock();
            let core = &mut *guard;
            core.state = NodeState::Executing;
            let mut ctx = ExecuteContext {
                node: &node.name,
                node_type: node.node_type.as_ref(),
                inputs: &inputs,
                outputs: &mut core.outputs,
                graph: &mut self.context,
                frame_index: self.frame_index,
                delta_time,
                step,
                loop_reference,
            };
            core.node.execute(&mut ctx)
        };

        if let Err(err) = result {
            return Err(node_failed(&node.name, "execute", err));
        }
        self.nodes[index].execution_count += 1;
        Ok(())
    }

    /// Tear the whole graph down, consumers before producers.
    ///
    /// Global caches are cleared last. Returns the number of cleanup actions run.
    pub fn cleanup(&mut self) -> GraphResult<usize> {
        let executed = self.cleanup.flush(&mut self.context)?;
        let global = self.context.clear_global_caches();
        log::info!(
            "RenderGraph: cleanup ran {} actions and cleared {} global cache entries",
            executed,
            global
        );
        Ok(executed)
    }

    /// Tear down everything that depends on `device`.
    ///
    /// [`GraphEvent::DeviceInvalidated`] is published before anything is
    /// destroyed. The nodes compiled against the device are then cleaned
    /// (along with their consumers), the device's caches are cleared and the
    /// nodes are marked for recompile. Returns the number of cleanup actions run.
    pub fn invalidate_device(
        &mut self,
        device: DeviceId,
        reason: InvalidationReason,
    ) -> GraphResult<usize> {
        log::warn!("RenderGraph: invalidating {} ({:?})", device, reason);
        self.context
            .bus
            .publish(GraphEvent::DeviceInvalidated { device, reason });

        let affected: Vec<NodeHandle> = self
            .order
            .iter()
            .copied()
            .filter(|h| self.nodes[h.index()].device == Some(device))
            .collect();

        let mut flushed = 0;
        for &handle in &affected {
            let node = &self.nodes[handle.index()];
            flushed += self.cleanup.flush_from(&node.name, &mut self.context)?;
        }
        self.context.clear_device_caches(device);

        for handle in affected {
            self.nodes[handle.index()].needs_recompile = true;
        }
        Ok(flushed)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if self.cleanup.is_empty() {
            return;
        }
        log::debug!("RenderGraph: dropped with {} pending cleanups", self.cleanup.len());
        if let Err(err) = self.cleanup() {
            log::error!("RenderGraph: cleanup on drop failed: {}", err);
        }
    }
}

impl fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderGraph")
            .field("config", &self.config)
            .field("nodes", &self.nodes)
            .field("order", &self.order)
            .field("frame_index", &self.frame_index)
            .field("cleanup", &self.cleanup)
            .finish()
    }
}

//! Common utilities for render graph integration tests.
//!
//! Every test runs against [`DummyDevice`], so no GPU is required.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use lumen_graphics::cache::{CacheKind, ResourceFactory, content_hash};
use lumen_graphics::node::{SlotDesc, SlotType};
use lumen_graphics::{
    CompileContext, Device, DeviceCapabilities, DeviceId, DummyDevice, ExecuteContext, GraphContext,
    GraphResult, Node, NodeType, NodeTypeId, RenderGraph, SlotValue, nodes,
};

/// Type id of [`SamplerNode`].
pub const SAMPLER_NODE: NodeTypeId = NodeTypeId(1000);

/// Type id of [`PassNode`].
pub const PASS_NODE: NodeTypeId = NodeTypeId(1001);

/// Type id of a [`PassNode`] that needs a compute-capable device.
pub const COMPUTE_NODE: NodeTypeId = NodeTypeId(1002);

/// Route `log` output to the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared record of lifecycle callbacks, as `"phase:node"` strings.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, phase: &str, node: &str) {
        self.0.lock().unwrap().push(format!("{phase}:{node}"));
    }

    /// Node names recorded for one phase, in call order.
    pub fn phase(&self, phase: &str) -> Vec<String> {
        let prefix = format!("{phase}:");
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Creation parameters of a fake sampler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerParams {
    pub filter: String,
    pub anisotropy: u32,
}

/// Counters shared between a test and its [`Samplers`] factory.
#[derive(Debug, Default)]
pub struct SamplerStats {
    pub created: Mutex<Vec<DeviceId>>,
    pub destroyed: Mutex<usize>,
}

impl SamplerStats {
    pub fn created(&self) -> Vec<DeviceId> {
        self.created.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> usize {
        *self.destroyed.lock().unwrap()
    }
}

/// Fake sampler factory, device dependent.
#[derive(Debug)]
pub struct Samplers(pub Arc<SamplerStats>);

impl ResourceFactory for Samplers {
    const KIND: CacheKind = CacheKind::new("sampler");
    type Params = SamplerParams;
    type Resource = u64;

    fn create(&self, device: Option<&Arc<dyn Device>>, params: &SamplerParams) -> GraphResult<u64> {
        if let Some(device) = device {
            self.0.created.lock().unwrap().push(device.id());
        }
        Ok(content_hash(params.filter.as_bytes()) ^ params.anisotropy as u64)
    }

    fn destroy(&self, _device: Option<&Arc<dyn Device>>, _resource: &u64) {
        *self.0.destroyed.lock().unwrap() += 1;
    }
}

/// Node that resolves a cached sampler on compile.
pub struct SamplerNode {
    pub log: CallLog,
    pub name: &'static str,
    pub params: SamplerParams,
    pub stats: Arc<SamplerStats>,
}

impl Node for SamplerNode {
    fn compile(&mut self, ctx: &mut CompileContext<'_>) -> GraphResult<()> {
        self.log.push("compile", self.name);
        let device = Arc::clone(ctx.device()?);
        ctx.caches()
            .register_cacher(Samplers(Arc::clone(&self.stats)), "samplers", true);
        let sampler = ctx
            .caches()
            .get_or_create::<Samplers>(Some(&device), &self.params)?;
        ctx.set_output(
            "sampler",
            SlotValue::new(SlotType::Value, *sampler.resource()),
        )
    }

    fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        self.log.push("execute", self.name);
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut GraphContext) {
        self.log.push("cleanup", self.name);
    }
}

/// Pass-through node: reads `input` values, records callbacks.
pub struct PassNode {
    pub log: CallLog,
    pub name: &'static str,
}

impl PassNode {
    pub fn new(log: &CallLog, name: &'static str) -> Self {
        Self {
            log: log.clone(),
            name,
        }
    }
}

impl Node for PassNode {
    fn compile(&mut self, ctx: &mut CompileContext<'_>) -> GraphResult<()> {
        self.log.push("compile", self.name);
        let inputs = ctx.inputs("input")?.len() as u64;
        ctx.set_output("output", SlotValue::new(SlotType::Value, inputs))
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        self.log.push("execute", self.name);
        if let Some(reference) = ctx.loop_reference() {
            assert!(reference.should_execute_this_frame);
        }
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut GraphContext) {
        self.log.push("cleanup", self.name);
    }
}

/// Graph with the built-in types plus the test node types.
pub fn test_graph() -> RenderGraph {
    init_logging();
    let mut graph = RenderGraph::new();
    nodes::register_builtin_types(&mut graph).unwrap();
    graph
        .register_node_type(
            NodeType::new(SAMPLER_NODE, "Sampler")
                .with_input(SlotDesc::required("device", SlotType::Device))
                .with_output(SlotDesc::required("sampler", SlotType::Value)),
        )
        .unwrap();
    graph
        .register_node_type(
            NodeType::new(PASS_NODE, "Pass")
                .with_input(SlotDesc::optional("device", SlotType::Device))
                .with_input(SlotDesc::variadic("input", SlotType::Value))
                .with_output(SlotDesc::required("output", SlotType::Value)),
        )
        .unwrap();
    graph
        .register_node_type(
            NodeType::new(COMPUTE_NODE, "Compute")
                .with_input(SlotDesc::required("device", SlotType::Device))
                .with_input(SlotDesc::variadic("input", SlotType::Value))
                .with_output(SlotDesc::required("output", SlotType::Value))
                .with_required_capabilities(DeviceCapabilities::COMPUTE),
        )
        .unwrap();
    graph
}

/// A fresh dummy device, as both its concrete and trait-object form.
pub fn dummy_device(name: &str) -> (Arc<DummyDevice>, Arc<dyn Device>) {
    let device = Arc::new(DummyDevice::new(name));
    let dyn_device: Arc<dyn Device> = device.clone();
    (device, dyn_device)
}

//! Node type descriptors.

use rustc_hash::FxHashMap;

use crate::device::DeviceCapabilities;
use crate::error::{GraphError, GraphResult};

/// Unique identity of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeTypeId(pub u32);

/// What flows through a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// `Arc<dyn Device>`.
    Device,
    /// `Arc<dyn Swapchain>`.
    Swapchain,
    /// Shared frame synchronization state.
    FrameSync,
    Buffer,
    Image,
    ImageView,
    Pipeline,
    DescriptorSet,
    CommandBuffer,
    /// Any other value.
    Value,
}

/// How many connections an input slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlotArity {
    /// Exactly one source.
    #[default]
    One,
    /// Any number of sources, read in connection order.
    Variadic,
}

/// Declaration of one input or output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDesc {
    pub name: &'static str,
    pub ty: SlotType,
    pub arity: SlotArity,
    /// Whether compilation fails without a connection.
    pub required: bool,
}

impl SlotDesc {
    /// A required single-source slot.
    pub const fn required(name: &'static str, ty: SlotType) -> Self {
        Self {
            name,
            ty,
            arity: SlotArity::One,
            required: true,
        }
    }

    /// An optional single-source slot.
    pub const fn optional(name: &'static str, ty: SlotType) -> Self {
        Self {
            name,
            ty,
            arity: SlotArity::One,
            required: false,
        }
    }

    /// An optional slot accepting any number of sources.
    pub const fn variadic(name: &'static str, ty: SlotType) -> Self {
        Self {
            name,
            ty,
            arity: SlotArity::Variadic,
            required: false,
        }
    }
}

/// How many instances of a node type a graph may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstancingPolicy {
    Singleton,
    #[default]
    Unlimited,
}

/// Coarse cost estimate for scheduling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorkloadEstimate {
    /// Persistent memory in bytes.
    pub memory_bytes: u64,
    /// Relative compute cost.
    pub compute_cost: f32,
    /// Relative memory bandwidth cost.
    pub bandwidth_cost: f32,
    /// Whether instances may run concurrently.
    pub parallelizable: bool,
}

/// Immutable schema of a node type.
///
/// ```
/// use lumen_graphics::node::{NodeType, NodeTypeId, SlotDesc, SlotType};
///
/// let ty = NodeType::new(NodeTypeId(42), "Blit")
///     .with_input(SlotDesc::required("device", SlotType::Device))
///     .with_input(SlotDesc::required("source", SlotType::Image))
///     .with_output(SlotDesc::required("target", SlotType::Image));
///
/// assert_eq!(ty.inputs().len(), 2);
/// assert!(ty.input("source").is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NodeType {
    id: NodeTypeId,
    name: String,
    inputs: Vec<SlotDesc>,
    outputs: Vec<SlotDesc>,
    required_capabilities: DeviceCapabilities,
    instancing: InstancingPolicy,
    workload: WorkloadEstimate,
}

impl NodeType {
    /// Create a node type with no slots and no requirements.
    pub fn new(id: NodeTypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            required_capabilities: DeviceCapabilities::empty(),
            instancing: InstancingPolicy::Unlimited,
            workload: WorkloadEstimate::default(),
        }
    }

    pub fn with_input(mut self, slot: SlotDesc) -> Self {
        self.inputs.push(slot);
        self
    }

    pub fn with_output(mut self, slot: SlotDesc) -> Self {
        self.outputs.push(slot);
        self
    }

    pub fn with_required_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_instancing(mut self, instancing: InstancingPolicy) -> Self {
        self.instancing = instancing;
        self
    }

    pub fn with_workload(mut self, workload: WorkloadEstimate) -> Self {
        self.workload = workload;
        self
    }

    pub fn id(&self) -> NodeTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[SlotDesc] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[SlotDesc] {
        &self.outputs
    }

    /// Look up an input slot by name.
    pub fn input(&self, name: &str) -> Option<&SlotDesc> {
        self.inputs.iter().find(|slot| slot.name == name)
    }

    /// Look up an output slot by name.
    pub fn output(&self, name: &str) -> Option<&SlotDesc> {
        self.outputs.iter().find(|slot| slot.name == name)
    }

    pub fn required_capabilities(&self) -> DeviceCapabilities {
        self.required_capabilities
    }

    pub fn instancing(&self) -> InstancingPolicy {
        self.instancing
    }

    pub fn workload(&self) -> WorkloadEstimate {
        self.workload
    }
}

/// Node types known to a graph, keyed by id.
#[derive(Debug, Default)]
pub struct NodeTypeRegistry {
    types: FxHashMap<NodeTypeId, NodeType>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type. Ids must be unique.
    pub fn register(&mut self, node_type: NodeType) -> GraphResult<()> {
        let id = node_type.id();
        if self.types.contains_key(&id) {
            return Err(GraphError::DuplicateNodeType { id: id.0 });
        }
        log::debug!(
            "NodeTypeRegistry: registered '{}' as {}",
            node_type.name(),
            id.0
        );
        self.types.insert(id, node_type);
        Ok(())
    }

    pub fn get(&self, id: NodeTypeId) -> Option<&NodeType> {
        self.types.get(&id)
    }

    pub fn contains(&self, id: NodeTypeId) -> bool {
        self.types.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

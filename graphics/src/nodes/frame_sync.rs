//! Frame synchronization node.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{GraphError, GraphResult};
use crate::frame_sync::{FrameSync, FrameSyncConfig};
use crate::graph::GraphContext;
use crate::node::{
    CompileContext, ExecuteContext, InstancingPolicy, Node, NodeType, SlotDesc, SlotType,
    SlotValue,
};

use super::FRAME_SYNC_NODE;

/// Frame sync state as published on the `frame_sync` output.
pub type SharedFrameSync = Arc<Mutex<FrameSync>>;

/// Owns a [`FrameSync`] for the connected device.
///
/// When a swapchain is connected its image count overrides the configured
/// one. Each execute begins a frame and publishes the resulting
/// [`FlightFrame`](crate::frame_sync::FlightFrame) on the `frame` output.
pub struct FrameSyncNode {
    config: FrameSyncConfig,
    sync: Option<SharedFrameSync>,
}

impl FrameSyncNode {
    pub fn new(config: FrameSyncConfig) -> Self {
        Self { config, sync: None }
    }

    /// The schema of this node.
    pub fn node_type() -> NodeType {
        NodeType::new(FRAME_SYNC_NODE, "FrameSync")
            .with_input(SlotDesc::required("device", SlotType::Device))
            .with_input(SlotDesc::optional("swapchain", SlotType::Swapchain))
            .with_output(SlotDesc::required("frame_sync", SlotType::FrameSync))
            .with_output(SlotDesc::optional("frame", SlotType::Value))
            .with_instancing(InstancingPolicy::Singleton)
    }
}

impl Node for FrameSyncNode {
    fn compile(&mut self, ctx: &mut CompileContext<'_>) -> GraphResult<()> {
        let device = Arc::clone(ctx.device()?);

        let mut config = self.config;
        if let Some(swapchain) = ctx
            .optional_input("swapchain")?
            .and_then(SlotValue::as_swapchain)
        {
            config.image_count = swapchain.image_count();
        }

        if let Some(stale) = self.sync.take() {
            log::warn!("FrameSyncNode: recompiled without cleanup, destroying stale state");
            stale.lock().destroy();
        }

        let sync = Arc::new(Mutex::new(FrameSync::new(device, config)?));
        self.sync = Some(Arc::clone(&sync));
        ctx.set_output("frame_sync", SlotValue::from_arc(SlotType::FrameSync, sync))
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        let Some(sync) = &self.sync else {
            return Err(GraphError::invalid(ctx.node_name(), "executed before compile"));
        };
        let frame = sync.lock().begin_frame()?;
        ctx.set_output("frame", SlotValue::new(SlotType::Value, frame))
    }

    fn cleanup(&mut self, _ctx: &mut GraphContext) {
        if let Some(sync) = self.sync.take() {
            sync.lock().destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::{DummyDevice, DummySwapchain};
    use crate::device::{Device, Swapchain};
    use crate::frame_sync::FlightFrame;
    use crate::graph::RenderGraph;
    use crate::node::NodeTypeId;
    use crate::nodes::{DeviceNode, DEVICE_NODE, register_builtin_types};

    const SWAPCHAIN_NODE: NodeTypeId = NodeTypeId(50);

    struct SwapchainSource(Arc<dyn Swapchain>);

    impl Node for SwapchainSource {
        fn compile(&mut self, ctx: &mut CompileContext<'_>) -> GraphResult<()> {
            ctx.set_output("swapchain", SlotValue::swapchain(Arc::clone(&self.0)))
        }

        fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
            Ok(())
        }

        fn cleanup(&mut self, _ctx: &mut GraphContext) {}
    }

    #[test]
    fn test_image_count_comes_from_swapchain() {
        let dummy = Arc::new(DummyDevice::new("sync-node"));
        let swapchain: Arc<dyn Swapchain> = Arc::new(DummySwapchain::new(dummy.clone(), 5, (64, 64)));

        let mut graph = RenderGraph::new();
        register_builtin_types(&mut graph).unwrap();
        graph
            .register_node_type(
                NodeType::new(SWAPCHAIN_NODE, "Swapchain")
                    .with_output(SlotDesc::required("swapchain", SlotType::Swapchain)),
            )
            .unwrap();

        let device = graph
            .add_node(DEVICE_NODE, "device", DeviceNode::new(dummy.clone()))
            .unwrap();
        let surface = graph
            .add_node(SWAPCHAIN_NODE, "swapchain", SwapchainSource(swapchain))
            .unwrap();
        let sync = graph
            .add_node(FRAME_SYNC_NODE, "sync", FrameSyncNode::new(FrameSyncConfig::new(2, 3)))
            .unwrap();
        graph.connect(device, "device", sync, "device").unwrap();
        graph.connect(surface, "swapchain", sync, "swapchain").unwrap();

        graph.compile().unwrap();
        let shared = graph
            .output(sync, "frame_sync")
            .and_then(|v| v.downcast_arc::<Mutex<FrameSync>>())
            .unwrap();
        assert_eq!(shared.lock().image_count(), 5);
        assert_eq!(dummy.live_fences(), 2 + 5);

        graph.execute(0.016).unwrap();
        graph.execute(0.016).unwrap();
        let frame = graph
            .output(sync, "frame")
            .and_then(|v| v.downcast::<FlightFrame>().copied())
            .unwrap();
        assert_eq!(frame.flight_index, 1);

        graph.cleanup().unwrap();
        assert!(shared.lock().is_destroyed());
        assert!(dummy.is_lost());
        assert!(dummy.violations().is_empty());
    }

    #[test]
    fn test_missing_device_fails_compile() {
        let mut graph = RenderGraph::new();
        register_builtin_types(&mut graph).unwrap();
        graph
            .add_node(FRAME_SYNC_NODE, "sync", FrameSyncNode::new(FrameSyncConfig::default()))
            .unwrap();

        let err = graph.compile().unwrap_err();
        assert!(matches!(err.root_cause(), GraphError::MissingInput { slot, .. } if slot == "device"));
    }
}

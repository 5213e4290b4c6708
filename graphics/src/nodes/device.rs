//! Device acquisition node.

use std::sync::Arc;

use crate::device::Device;
use crate::error::GraphResult;
use crate::graph::GraphContext;
use crate::node::{
    CompileContext, ExecuteContext, Node, NodeType, SlotDesc, SlotType, SlotValue,
    WorkloadEstimate,
};

use super::DEVICE_NODE;

type DeviceFactory = Box<dyn Fn() -> GraphResult<Arc<dyn Device>> + Send>;

/// Publishes a logical device on its `device` output.
///
/// Every node reading the device is cleaned before this node, so its own
/// cleanup can wait for the device to go idle, clear the device's caches and
/// then destroy the device.
pub struct DeviceNode {
    factory: DeviceFactory,
    device: Option<Arc<dyn Device>>,
}

impl DeviceNode {
    /// Publish an existing device.
    ///
    /// The device is destroyed on cleanup, so a recompile after cleanup
    /// hands out a lost device. Use [`with_factory`](Self::with_factory) when
    /// the device must survive invalidation.
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self::with_factory(move || Ok(Arc::clone(&device)))
    }

    /// Create the device on every compile that follows a cleanup.
    pub fn with_factory(
        factory: impl Fn() -> GraphResult<Arc<dyn Device>> + Send + 'static,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            device: None,
        }
    }

    /// The schema of this node.
    pub fn node_type() -> NodeType {
        NodeType::new(DEVICE_NODE, "Device")
            .with_output(SlotDesc::required("device", SlotType::Device))
            .with_workload(WorkloadEstimate {
                memory_bytes: 0,
                compute_cost: 0.0,
                bandwidth_cost: 0.0,
                parallelizable: false,
            })
    }

    /// The device created by the last compile.
    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.device.as_ref()
    }
}

impl Node for DeviceNode {
    fn compile(&mut self, ctx: &mut CompileContext<'_>) -> GraphResult<()> {
        let device = match &self.device {
            Some(device) => Arc::clone(device),
            None => {
                let device = (self.factory)()?;
                log::info!(
                    "DeviceNode: '{}' acquired {} ({})",
                    ctx.node_name(),
                    device.id(),
                    device.name()
                );
                self.device = Some(Arc::clone(&device));
                device
            }
        };
        ctx.set_output("device", SlotValue::device(device))
    }

    fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut GraphContext) {
        let Some(device) = self.device.take() else {
            return;
        };

        if device.is_lost() {
            ctx.clear_device_caches(device.id());
            log::warn!(
                "DeviceNode: {} is already lost, skipping destruction",
                device.id()
            );
            return;
        }
        if let Err(err) = device.wait_idle() {
            log::warn!("DeviceNode: wait_idle on {} failed: {}", device.id(), err);
        }
        ctx.clear_device_caches(device.id());
        device.destroy();
        log::info!("DeviceNode: destroyed {}", device.id());
    }
}

//! # Lumen Graphics
//!
//! Dependency-driven render graph core.
//!
//! ## Overview
//!
//! This crate provides the infrastructure that makes a render graph safe to
//! recompile, cache and tear down across frames and across device changes:
//!
//! - [`cache`] - content-addressed resource caches, one per kind and device
//! - [`cleanup`] - dependency-ordered teardown registry
//! - [`frame_sync`] - fence/semaphore rings for frames in flight and swapchain images
//! - [`node`] - the node schema and lifecycle contract
//! - [`graph`] - [`RenderGraph`], which drives the lifecycle across all nodes
//! - [`nodes`] - built-in device and frame sync nodes
//! - [`backend`] - dummy [`Device`] and [`Swapchain`] implementations for testing
//!
//! Fixed and variable timestep loops come from [`lumen_core::timing`].
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use lumen_graphics::nodes::{self, DeviceNode, FrameSyncNode};
//! use lumen_graphics::{DummyDevice, FrameSyncConfig, LoopConfig, RenderGraph};
//!
//! lumen_graphics::init();
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
//! let render = graph.register_loop(LoopConfig::variable("render"));
//! graph.connect_loop(sync, render).unwrap();
//!
//! graph.compile().unwrap();
//! for _ in 0..3 {
//!     graph.execute(1.0 / 60.0).unwrap();
//! }
//! assert_eq!(graph.execution_count(sync), 3);
//! graph.cleanup().unwrap();
//! ```

pub mod backend;
pub mod cache;
pub mod cleanup;
pub mod device;
pub mod error;
pub mod events;
pub mod frame_sync;
pub mod graph;
pub mod node;
pub mod nodes;

// Re-export main types for convenience
pub use backend::{DummyDevice, DummySwapchain};
pub use cache::{CacheKind, CacheRegistry, CachedWrapper, ResourceCacher, ResourceFactory};
pub use cleanup::{CleanupHandle, CleanupRegistry};
pub use device::{Device, DeviceCapabilities, DeviceId, FenceHandle, SemaphoreHandle, Swapchain};
pub use error::{DeviceError, DeviceResult, ErrorCategory, GraphError, GraphResult};
pub use events::{GraphEvent, GraphEventKind, InvalidationReason};
pub use frame_sync::{
    FlightFrame, FrameSync, FrameSyncConfig, ImageFrame, MAX_FRAMES_IN_FLIGHT,
    MAX_SWAPCHAIN_IMAGES,
};
pub use graph::{GraphConfig, GraphContext, RenderGraph};
pub use node::{
    CompileContext, ExecuteContext, Node, NodeHandle, NodeState, NodeType, NodeTypeId,
    SetupContext, SlotDesc, SlotType, SlotValue,
};

pub use lumen_core::{LoopCatchupMode, LoopConfig, LoopId, LoopReference};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
pub fn init() {
    lumen_core::init();
    log::info!("Lumen Graphics v{} initialized", VERSION);
}

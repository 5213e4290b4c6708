//! Device collaborator interface.
//!
//! The render graph never talks to a native graphics API directly. Every
//! device-side operation it needs (creating and waiting on synchronization
//! primitives, submitting to a queue, picking a memory type) goes through
//! the [`Device`] trait. All queries return a [`DeviceResult`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bitflags::bitflags;

use crate::error::DeviceResult;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a logical device.
///
/// Caches and invalidation events are keyed by this id rather than by the
/// device object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

bitflags! {
    /// What a device's queues can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCapabilities: u32 {
        /// Rasterization work.
        const GRAPHICS = 1 << 0;
        /// Compute dispatches.
        const COMPUTE = 1 << 1;
        /// Copy operations.
        const TRANSFER = 1 << 2;
        /// Presentation to a surface.
        const PRESENT = 1 << 3;
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self::GRAPHICS | Self::COMPUTE | Self::TRANSFER | Self::PRESENT
    }
}

bitflags! {
    /// Properties requested when selecting a memory type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        /// Fast memory local to the device.
        const DEVICE_LOCAL = 1 << 0;
        /// Mappable from the host.
        const HOST_VISIBLE = 1 << 1;
        /// Host writes need no explicit flush.
        const HOST_COHERENT = 1 << 2;
        /// Cached on the host.
        const HOST_CACHED = 1 << 3;
    }
}

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw backend handle.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Get the raw backend handle.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

device_handle!(
    /// CPU-observable completion primitive.
    FenceHandle
);
device_handle!(
    /// GPU-only ordering primitive.
    SemaphoreHandle
);
device_handle!(
    /// Queue used for submission.
    QueueHandle
);
device_handle!(
    /// View onto a swapchain image.
    ImageViewHandle
);

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// A logical graphics device.
///
/// Implementations must be usable from any thread; the graph shares them as
/// `Arc<dyn Device>`.
pub trait Device: Send + Sync + fmt::Debug {
    /// Identity used to scope caches.
    fn id(&self) -> DeviceId;

    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Queue capabilities.
    fn capabilities(&self) -> DeviceCapabilities;

    /// The queue work is submitted to.
    fn queue(&self) -> QueueHandle;

    /// Whether the device is gone (lost or destroyed).
    ///
    /// Teardown code skips native destruction once this returns `true`.
    fn is_lost(&self) -> bool;

    /// Pick a memory type index allowed by `type_bits` with `properties`.
    fn find_memory_type(&self, type_bits: u32, properties: MemoryProperties) -> DeviceResult<u32>;

    /// Create a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceHandle>;

    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceHandle);

    /// Block until the fence is signaled. `None` waits forever.
    fn wait_for_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> DeviceResult<()>;

    /// Return the fence to the unsignaled state.
    fn reset_fence(&self, fence: FenceHandle) -> DeviceResult<()>;

    /// Query a fence without blocking.
    fn fence_status(&self, fence: FenceHandle) -> DeviceResult<FenceStatus>;

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> DeviceResult<SemaphoreHandle>;

    /// Destroy a semaphore.
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Submit recorded work waiting on `wait`, signaling `signal` and `fence`.
    fn submit(
        &self,
        wait: &[SemaphoreHandle],
        signal: &[SemaphoreHandle],
        fence: Option<FenceHandle>,
    ) -> DeviceResult<()>;

    /// Block until all submitted work has finished.
    fn wait_idle(&self) -> DeviceResult<()>;

    /// Release the device. Later calls report the device as lost.
    fn destroy(&self);
}

/// Presentation surface collaborator.
pub trait Swapchain: Send + Sync + fmt::Debug {
    /// Fixed number of images; sizes the image-indexed sync arrays.
    fn image_count(&self) -> u32;

    /// One view per image.
    fn image_views(&self) -> &[ImageViewHandle];

    /// Image size in pixels.
    fn extent(&self) -> (u32, u32);

    /// Acquire the next image, signaling `signal` once it is usable.
    fn acquire_next_image(&self, signal: SemaphoreHandle) -> DeviceResult<u32>;

    /// Queue `image_index` for presentation after `wait`; `present_fence`
    /// signals once the presentation engine is done with the image.
    fn present(
        &self,
        image_index: u32,
        wait: SemaphoreHandle,
        present_fence: FenceHandle,
    ) -> DeviceResult<()>;
}

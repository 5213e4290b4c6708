//! Frame synchronization ring buffers.
//!
//! Two index spaces with independent cardinalities are tracked here:
//!
//! | Indexed by   | Primitives                                   | Released when                 |
//! |--------------|----------------------------------------------|-------------------------------|
//! | flight index | in-flight fence, image-available semaphore   | the frame's submission is done |
//! | image index  | render-complete semaphore, present fence     | presentation of the image is done |
//!
//! The flight index advances once per frame. The image index is whatever the
//! swapchain returns from acquisition and is unrelated to the flight index, so
//! image-indexed primitives are never looked up by flight index.
//!
//! Storage is fixed-size ([`MAX_FRAMES_IN_FLIGHT`], [`MAX_SWAPCHAIN_IMAGES`])
//! with explicit counts, so a [`FrameSync`] that failed halfway through
//! construction tears down exactly what it created.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::device::{Device, FenceHandle, FenceStatus, SemaphoreHandle};
use crate::error::{DeviceError, GraphError, GraphResult};

/// Upper bound on frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 4;

/// Upper bound on swapchain images.
pub const MAX_SWAPCHAIN_IMAGES: u32 = 8;

/// How long [`FrameSync::destroy`] waits on each unsignaled fence.
const DESTROY_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Sizes of the two ring buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSyncConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub flight_count: u32,
    /// Number of swapchain images.
    pub image_count: u32,
}

impl FrameSyncConfig {
    /// Create a config.
    pub fn new(flight_count: u32, image_count: u32) -> Self {
        Self {
            flight_count,
            image_count,
        }
    }

    /// Set the flight count.
    pub fn with_flight_count(mut self, flight_count: u32) -> Self {
        self.flight_count = flight_count;
        self
    }

    /// Set the image count.
    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = image_count;
        self
    }

    /// Check both counts against their maxima.
    pub fn validate(&self) -> GraphResult<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.flight_count) {
            return Err(GraphError::invalid(
                "FrameSync",
                format!(
                    "flight count {} outside 1..={}",
                    self.flight_count, MAX_FRAMES_IN_FLIGHT
                ),
            ));
        }
        if !(1..=MAX_SWAPCHAIN_IMAGES).contains(&self.image_count) {
            return Err(GraphError::invalid(
                "FrameSync",
                format!(
                    "image count {} outside 1..={}",
                    self.image_count, MAX_SWAPCHAIN_IMAGES
                ),
            ));
        }
        Ok(())
    }
}

impl Default for FrameSyncConfig {
    fn default() -> Self {
        Self {
            flight_count: 2,
            image_count: 3,
        }
    }
}

/// Fixed-capacity array with an explicit fill count.
struct BoundedRing<T: Copy, const N: usize> {
    slots: [Option<T>; N],
    len: usize,
}

impl<T: Copy, const N: usize> BoundedRing<T, N> {
    fn new() -> Self {
        Self {
            slots: [None; N],
            len: 0,
        }
    }

    fn push(&mut self, value: T) {
        debug_assert!(self.len < N, "BoundedRing overflow");
        self.slots[self.len] = Some(value);
        self.len += 1;
    }

    fn get(&self, index: usize) -> Option<T> {
        if index < self.len {
            self.slots[index]
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.slots[..self.len].iter().flatten().copied()
    }

    fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        let len = std::mem::take(&mut self.len);
        self.slots[..len].iter_mut().filter_map(Option::take)
    }
}

/// Flight-indexed primitives handed out by [`FrameSync::begin_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightFrame {
    /// Slot in the flight ring.
    pub flight_index: u32,
    /// Signaled when this frame's submission completes. Reset before submit.
    pub in_flight_fence: FenceHandle,
    /// Signaled by image acquisition.
    pub image_available_semaphore: SemaphoreHandle,
}

/// Image-indexed primitives handed out by [`FrameSync::image_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFrame {
    /// Swapchain image index.
    pub image_index: u32,
    /// Signaled by rendering, waited on by presentation.
    pub render_complete_semaphore: SemaphoreHandle,
    /// Signaled when the presentation engine releases the image. Reset before present.
    pub present_fence: FenceHandle,
}

/// Ring buffers of fences and semaphores for frames in flight.
pub struct FrameSync {
    device: Arc<dyn Device>,
    flight_count: u32,
    image_count: u32,
    current_flight: u32,
    frame_count: u64,
    in_flight_fences: BoundedRing<FenceHandle, { MAX_FRAMES_IN_FLIGHT as usize }>,
    image_available: BoundedRing<SemaphoreHandle, { MAX_FRAMES_IN_FLIGHT as usize }>,
    render_complete: BoundedRing<SemaphoreHandle, { MAX_SWAPCHAIN_IMAGES as usize }>,
    present_fences: BoundedRing<FenceHandle, { MAX_SWAPCHAIN_IMAGES as usize }>,
    destroyed: bool,
}

impl FrameSync {
    /// Create every primitive in both rings, pre-signaled.
    ///
    /// If creation fails partway, the primitives created so far are
    /// destroyed before the error is returned.
    pub fn new(device: Arc<dyn Device>, config: FrameSyncConfig) -> GraphResult<Self> {
        config.validate()?;

        let mut sync = Self {
            device,
            flight_count: config.flight_count,
            image_count: config.image_count,
            // The first begin_frame advances to slot 0.
            current_flight: config.flight_count - 1,
            frame_count: 0,
            in_flight_fences: BoundedRing::new(),
            image_available: BoundedRing::new(),
            render_complete: BoundedRing::new(),
            present_fences: BoundedRing::new(),
            destroyed: false,
        };

        if let Err(err) = sync.create_primitives() {
            log::error!("FrameSync: creation failed: {}", err);
            sync.destroy();
            return Err(err.into());
        }

        log::info!(
            "FrameSync: created {} flight slots and {} image slots on '{}'",
            sync.flight_count,
            sync.image_count,
            sync.device.name()
        );
        Ok(sync)
    }

    fn create_primitives(&mut self) -> Result<(), DeviceError> {
        for _ in 0..self.flight_count {
            self.in_flight_fences.push(self.device.create_fence(true)?);
            self.image_available.push(self.device.create_semaphore()?);
        }
        for _ in 0..self.image_count {
            self.render_complete.push(self.device.create_semaphore()?);
            self.present_fences.push(self.device.create_fence(true)?);
        }
        Ok(())
    }

    /// Advance to the next flight slot and block until its previous frame completed.
    pub fn begin_frame(&mut self) -> GraphResult<FlightFrame> {
        if self.destroyed {
            return Err(DeviceError::InvalidHandle.into());
        }

        let next = (self.current_flight + 1) % self.flight_count;
        let (Some(fence), Some(semaphore)) = (
            self.in_flight_fences.get(next as usize),
            self.image_available.get(next as usize),
        ) else {
            return Err(DeviceError::InvalidHandle.into());
        };

        self.device.wait_for_fence(fence, None)?;
        self.current_flight = next;
        self.frame_count += 1;

        log::trace!("FrameSync: frame {} uses flight slot {}", self.frame_count, next);
        Ok(FlightFrame {
            flight_index: next,
            in_flight_fence: fence,
            image_available_semaphore: semaphore,
        })
    }

    /// Image-indexed primitives for an acquired swapchain image.
    ///
    /// Blocks until the image's previous presentation has finished. An index
    /// not below [`image_count`](Self::image_count), such as one acquired
    /// from a swapchain that has since been recreated, is rejected with
    /// [`DeviceError::InvalidUsage`].
    pub fn image_frame(&mut self, image_index: u32) -> GraphResult<ImageFrame> {
        if self.destroyed {
            return Err(DeviceError::InvalidHandle.into());
        }
        if image_index >= self.image_count {
            return Err(DeviceError::InvalidUsage(format!(
                "image index {} out of range for {} swapchain images",
                image_index, self.image_count
            ))
            .into());
        }

        let (Some(semaphore), Some(fence)) = (
            self.render_complete.get(image_index as usize),
            self.present_fences.get(image_index as usize),
        ) else {
            return Err(DeviceError::InvalidHandle.into());
        };

        self.device.wait_for_fence(fence, None)?;
        Ok(ImageFrame {
            image_index,
            render_complete_semaphore: semaphore,
            present_fence: fence,
        })
    }

    /// Flight slot of the most recent [`begin_frame`](Self::begin_frame).
    pub fn current_flight_index(&self) -> u32 {
        self.current_flight
    }

    /// Number of flight slots.
    pub fn flight_count(&self) -> u32 {
        self.flight_count
    }

    /// Number of image slots.
    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Frames begun so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The device the primitives belong to.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Whether [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Destroy every created primitive in both rings.
    ///
    /// Every unsignaled fence is waited on first, so no primitive is
    /// destroyed while a submission or presentation still uses it. Safe to
    /// call more than once. On a lost device the handles are dropped without
    /// waiting or native destruction.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let created = self.in_flight_fences.len()
            + self.image_available.len()
            + self.render_complete.len()
            + self.present_fences.len();

        if self.device.is_lost() {
            log::warn!(
                "FrameSync: device '{}' is lost, skipping destruction of {} primitives",
                self.device.name(),
                created
            );
            self.in_flight_fences.drain().for_each(drop);
            self.image_available.drain().for_each(drop);
            self.render_complete.drain().for_each(drop);
            self.present_fences.drain().for_each(drop);
            return;
        }

        let device = Arc::clone(&self.device);
        for fence in self.in_flight_fences.iter().chain(self.present_fences.iter()) {
            wait_before_destroy(device.as_ref(), fence);
        }
        for fence in self.in_flight_fences.drain() {
            device.destroy_fence(fence);
        }
        for semaphore in self.image_available.drain() {
            device.destroy_semaphore(semaphore);
        }
        for semaphore in self.render_complete.drain() {
            device.destroy_semaphore(semaphore);
        }
        for fence in self.present_fences.drain() {
            device.destroy_fence(fence);
        }
        log::debug!("FrameSync: destroyed {} primitives", created);
    }
}

/// Wait for a fence that may still be owned by submitted work.
///
/// A fence that was reset but never submitted times out here, which is fine
/// since nothing uses it.
fn wait_before_destroy(device: &dyn Device, fence: FenceHandle) {
    match device.fence_status(fence) {
        Ok(FenceStatus::Signaled) => {}
        Ok(FenceStatus::Unsignaled) => {
            match device.wait_for_fence(fence, Some(DESTROY_WAIT_TIMEOUT)) {
                Ok(()) => {}
                Err(DeviceError::Timeout) => {
                    log::debug!("FrameSync: fence {:?} was never submitted", fence);
                }
                Err(err) => log::warn!("FrameSync: wait on fence {:?} failed: {}", fence, err),
            }
        }
        Err(err) => log::warn!("FrameSync: status of fence {:?} failed: {}", fence, err),
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for FrameSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSync")
            .field("device", &self.device.name())
            .field("flight_count", &self.flight_count)
            .field("image_count", &self.image_count)
            .field("current_flight", &self.current_flight)
            .field("frame_count", &self.frame_count)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

static_assertions::assert_impl_all!(FrameSync: Send, Sync);

//! Dummy device and swapchain for testing and development.
//!
//! These implementations don't perform any GPU work but model the state
//! machine of fences and presentation closely enough to exercise the render
//! graph without hardware:
//!
//! - A fence is *unsignaled*, *pending* (owned by submitted work) or
//!   *signaled*. Waiting on a pending fence completes the work; waiting on an
//!   idle unsignaled fence would hang forever and reports
//!   [`DeviceError::Timeout`].
//! - Submitting with a fence that is not unsignaled, or resetting a pending
//!   fence, is recorded as a violation and rejected.
//! - Destroying a pending fence, or a semaphore used by a submission whose
//!   fence is still pending, is recorded as a violation.
//! - Creation failures can be injected to test partial initialization.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::device::{
    Device, DeviceCapabilities, DeviceId, FenceHandle, FenceStatus, ImageViewHandle,
    MemoryProperties, QueueHandle, SemaphoreHandle, Swapchain,
};
use crate::error::{DeviceError, DeviceResult};

/// Memory types exposed by the dummy device, indexed by type index.
const MEMORY_TYPES: [MemoryProperties; 2] = [
    MemoryProperties::DEVICE_LOCAL,
    MemoryProperties::HOST_VISIBLE
        .union(MemoryProperties::HOST_COHERENT)
        .union(MemoryProperties::HOST_CACHED),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

/// Operation recorded by a [`DummyDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DummyEvent {
    FenceCreated(FenceHandle),
    FenceDestroyed(FenceHandle),
    FenceWaited(FenceHandle),
    FenceReset(FenceHandle),
    SemaphoreCreated(SemaphoreHandle),
    SemaphoreDestroyed(SemaphoreHandle),
    Submitted { fence: Option<FenceHandle> },
    Destroyed,
}

#[derive(Debug, Default)]
struct DummyState {
    next_handle: u64,
    fences: FxHashMap<FenceHandle, FenceState>,
    semaphores: FxHashSet<SemaphoreHandle>,
    /// Fence of the latest fenced submission that used each semaphore.
    semaphore_fence: FxHashMap<SemaphoreHandle, FenceHandle>,
    events: Vec<DummyEvent>,
    creations: usize,
    fail_at: Option<usize>,
    violations: Vec<String>,
}

impl DummyState {
    fn allocate(&mut self) -> DeviceResult<u64> {
        if self.fail_at.is_some_and(|limit| self.creations >= limit) {
            return Err(DeviceError::CreationRejected("injected failure".into()));
        }
        self.creations += 1;
        self.next_handle += 1;
        Ok(self.next_handle)
    }

    fn violation(&mut self, message: String) {
        log::warn!("DummyDevice: {}", message);
        self.violations.push(message);
    }

    fn is_pending(&self, fence: FenceHandle) -> bool {
        self.fences.get(&fence) == Some(&FenceState::Pending)
    }
}

/// Dummy logical device.
#[derive(Debug)]
pub struct DummyDevice {
    id: DeviceId,
    name: String,
    capabilities: DeviceCapabilities,
    lost: AtomicBool,
    state: Mutex<DummyState>,
}

impl DummyDevice {
    /// Create a new dummy device with every capability.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: DeviceId::next(),
            name: name.into(),
            capabilities: DeviceCapabilities::default(),
            lost: AtomicBool::new(false),
            state: Mutex::new(DummyState::default()),
        }
    }

    /// Replace the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Make the creation `count` calls from now fail.
    pub fn fail_creation_after(&self, count: usize) {
        let mut state = self.state.lock();
        state.fail_at = Some(state.creations + count);
    }

    /// Mark the device as lost without destroying anything.
    pub fn simulate_device_loss(&self) {
        self.lost.store(true, Ordering::Release);
    }

    /// Finish every pending submission.
    pub fn complete_pending(&self) {
        let mut state = self.state.lock();
        for fence in state.fences.values_mut() {
            if *fence == FenceState::Pending {
                *fence = FenceState::Signaled;
            }
        }
    }

    /// Whether a fence is owned by unfinished work.
    pub fn is_fence_pending(&self, fence: FenceHandle) -> bool {
        self.state.lock().is_pending(fence)
    }

    /// Recorded operations, oldest first.
    pub fn events(&self) -> Vec<DummyEvent> {
        self.state.lock().events.clone()
    }

    /// Number of fences that are created and not destroyed.
    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    /// Number of semaphores that are created and not destroyed.
    pub fn live_semaphores(&self) -> usize {
        self.state.lock().semaphores.len()
    }

    /// Misuse detected so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    fn check_alive(&self) -> DeviceResult<()> {
        if self.is_lost() {
            Err(DeviceError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl Device for DummyDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn queue(&self) -> QueueHandle {
        QueueHandle::from_raw(0)
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn find_memory_type(&self, type_bits: u32, properties: MemoryProperties) -> DeviceResult<u32> {
        MEMORY_TYPES
            .iter()
            .enumerate()
            .find(|&(index, props)| type_bits & (1 << index) != 0 && props.contains(properties))
            .map(|(index, _)| index as u32)
            .ok_or(DeviceError::NoSuitableMemoryType)
    }

    fn create_fence(&self, signaled: bool) -> DeviceResult<FenceHandle> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let fence = FenceHandle::from_raw(state.allocate()?);
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        state.events.push(DummyEvent::FenceCreated(fence));
        log::trace!("DummyDevice: created fence {:?} (signaled: {})", fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        match state.fences.remove(&fence) {
            None => {
                state.violation(format!("destroyed unknown fence {fence:?}"));
                return;
            }
            Some(FenceState::Pending) => {
                state.violation(format!("destroyed fence {fence:?} still owned by the device"));
            }
            Some(_) => {}
        }
        state.semaphore_fence.retain(|_, owner| *owner != fence);
        state.events.push(DummyEvent::FenceDestroyed(fence));
    }

    fn wait_for_fence(&self, fence: FenceHandle, _timeout: Option<Duration>) -> DeviceResult<()> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let status = state
            .fences
            .get_mut(&fence)
            .ok_or(DeviceError::InvalidHandle)?;
        match *status {
            FenceState::Signaled => {}
            // The simulated GPU finishes as soon as someone waits on it.
            FenceState::Pending => *status = FenceState::Signaled,
            FenceState::Unsignaled => return Err(DeviceError::Timeout),
        }
        state.events.push(DummyEvent::FenceWaited(fence));
        Ok(())
    }

    fn reset_fence(&self, fence: FenceHandle) -> DeviceResult<()> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let current = state.fences.get(&fence).copied();
        match current {
            None => return Err(DeviceError::InvalidHandle),
            Some(FenceState::Pending) => {
                let message = format!("reset of fence {fence:?} still owned by the device");
                state.violation(message.clone());
                return Err(DeviceError::InvalidUsage(message));
            }
            Some(_) => {
                state.fences.insert(fence, FenceState::Unsignaled);
                state.semaphore_fence.retain(|_, owner| *owner != fence);
            }
        }
        state.events.push(DummyEvent::FenceReset(fence));
        Ok(())
    }

    fn fence_status(&self, fence: FenceHandle) -> DeviceResult<FenceStatus> {
        match self.state.lock().fences.get(&fence) {
            None => Err(DeviceError::InvalidHandle),
            Some(FenceState::Signaled) => Ok(FenceStatus::Signaled),
            Some(_) => Ok(FenceStatus::Unsignaled),
        }
    }

    fn create_semaphore(&self) -> DeviceResult<SemaphoreHandle> {
        self.check_alive()?;
        let mut state = self.state.lock();
        let semaphore = SemaphoreHandle::from_raw(state.allocate()?);
        state.semaphores.insert(semaphore);
        state.events.push(DummyEvent::SemaphoreCreated(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        if !state.semaphores.remove(&semaphore) {
            state.violation(format!("destroyed unknown semaphore {semaphore:?}"));
            return;
        }
        if let Some(fence) = state.semaphore_fence.remove(&semaphore) {
            if state.is_pending(fence) {
                state.violation(format!(
                    "destroyed semaphore {semaphore:?} used by pending submission {fence:?}"
                ));
            }
        }
        state.events.push(DummyEvent::SemaphoreDestroyed(semaphore));
    }

    fn submit(
        &self,
        wait: &[SemaphoreHandle],
        signal: &[SemaphoreHandle],
        fence: Option<FenceHandle>,
    ) -> DeviceResult<()> {
        self.check_alive()?;
        let mut state = self.state.lock();
        if wait
            .iter()
            .chain(signal)
            .any(|semaphore| !state.semaphores.contains(semaphore))
        {
            return Err(DeviceError::InvalidHandle);
        }

        if let Some(fence) = fence {
            let current = state.fences.get(&fence).copied();
            match current {
                None => return Err(DeviceError::InvalidHandle),
                Some(FenceState::Unsignaled) => {
                    state.fences.insert(fence, FenceState::Pending);
                    for semaphore in wait.iter().chain(signal) {
                        state.semaphore_fence.insert(*semaphore, fence);
                    }
                }
                Some(other) => {
                    let message = format!("submit with fence {fence:?} in state {other:?}");
                    state.violation(message.clone());
                    return Err(DeviceError::InvalidUsage(message));
                }
            }
        }

        state.events.push(DummyEvent::Submitted { fence });
        Ok(())
    }

    fn wait_idle(&self) -> DeviceResult<()> {
        self.check_alive()?;
        self.complete_pending();
        Ok(())
    }

    fn destroy(&self) {
        if self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        state.fences.clear();
        state.semaphores.clear();
        state.semaphore_fence.clear();
        state.events.push(DummyEvent::Destroyed);
        log::debug!("DummyDevice: '{}' destroyed", self.name);
    }
}

#[derive(Debug)]
struct SwapchainState {
    next_image: u32,
    last_present: Vec<Option<FenceHandle>>,
    semaphore_owner: FxHashMap<SemaphoreHandle, FenceHandle>,
    reuse_violations: usize,
    presents: u64,
}

/// Dummy swapchain that cycles its images round-robin.
///
/// Presentation is tracked through the present fence handed to
/// [`Swapchain::present`]: an image stays "presentation pending" until its
/// fence is waited on.
#[derive(Debug)]
pub struct DummySwapchain {
    device: Arc<DummyDevice>,
    views: Vec<ImageViewHandle>,
    extent: (u32, u32),
    state: Mutex<SwapchainState>,
}

impl DummySwapchain {
    /// Create a swapchain with `image_count` images.
    pub fn new(device: Arc<DummyDevice>, image_count: u32, extent: (u32, u32)) -> Self {
        Self {
            device,
            views: (0..image_count as u64)
                .map(|i| ImageViewHandle::from_raw(1000 + i))
                .collect(),
            extent,
            state: Mutex::new(SwapchainState {
                next_image: 0,
                last_present: vec![None; image_count as usize],
                semaphore_owner: FxHashMap::default(),
                reuse_violations: 0,
                presents: 0,
            }),
        }
    }

    /// Whether the presentation engine still owns `image_index`.
    pub fn is_presentation_pending(&self, image_index: u32) -> bool {
        let state = self.state.lock();
        state
            .last_present
            .get(image_index as usize)
            .copied()
            .flatten()
            .is_some_and(|fence| self.device.is_fence_pending(fence))
    }

    /// How often a semaphore or image was reused while still presenting.
    pub fn reuse_violations(&self) -> usize {
        self.state.lock().reuse_violations
    }

    /// Number of successful presents.
    pub fn present_count(&self) -> u64 {
        self.state.lock().presents
    }
}

impl Swapchain for DummySwapchain {
    fn image_count(&self) -> u32 {
        self.views.len() as u32
    }

    fn image_views(&self) -> &[ImageViewHandle] {
        &self.views
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn acquire_next_image(&self, _signal: SemaphoreHandle) -> DeviceResult<u32> {
        if self.device.is_lost() {
            return Err(DeviceError::SwapchainOutOfDate);
        }
        let mut state = self.state.lock();
        let image = state.next_image;
        state.next_image = (state.next_image + 1) % self.image_count().max(1);
        Ok(image)
    }

    fn present(
        &self,
        image_index: u32,
        wait: SemaphoreHandle,
        present_fence: FenceHandle,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let Some(slot) = state.last_present.get(image_index as usize).copied() else {
            return Err(DeviceError::InvalidHandle);
        };

        let image_busy = slot.is_some_and(|fence| self.device.is_fence_pending(fence));
        let semaphore_busy = state
            .semaphore_owner
            .get(&wait)
            .is_some_and(|fence| self.device.is_fence_pending(*fence));
        if image_busy || semaphore_busy {
            state.reuse_violations += 1;
            log::warn!(
                "DummySwapchain: image {} presented while still owned by the presentation engine",
                image_index
            );
        }

        self.device.submit(&[wait], &[], Some(present_fence))?;
        state.last_present[image_index as usize] = Some(present_fence);
        state.semaphore_owner.insert(wait, present_fence);
        state.presents += 1;
        Ok(())
    }
}

static_assertions::assert_impl_all!(DummyDevice: Send, Sync);
static_assertions::assert_impl_all!(DummySwapchain: Send, Sync);

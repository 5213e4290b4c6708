//! Type-erased slot values.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::device::{Device, Swapchain};

use super::types::SlotType;

/// A value written to an output slot and read by connected inputs.
///
/// Cloning shares the underlying value.
#[derive(Clone)]
pub struct SlotValue {
    ty: SlotType,
    value: Arc<dyn Any + Send + Sync>,
}

impl SlotValue {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(ty: SlotType, value: T) -> Self {
        Self {
            ty,
            value: Arc::new(value),
        }
    }

    /// Wrap an already shared value without another allocation.
    pub fn from_arc<T: Any + Send + Sync>(ty: SlotType, value: Arc<T>) -> Self {
        Self { ty, value }
    }

    /// A [`SlotType::Device`] value.
    pub fn device(device: Arc<dyn Device>) -> Self {
        Self::new(SlotType::Device, device)
    }

    /// A [`SlotType::Swapchain`] value.
    pub fn swapchain(swapchain: Arc<dyn Swapchain>) -> Self {
        Self::new(SlotType::Swapchain, swapchain)
    }

    pub fn ty(&self) -> SlotType {
        self.ty
    }

    /// Borrow the value as `T`.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Share the value as `T`.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// The device carried by a [`SlotType::Device`] value.
    pub fn as_device(&self) -> Option<&Arc<dyn Device>> {
        if self.ty != SlotType::Device {
            return None;
        }
        self.downcast::<Arc<dyn Device>>()
    }

    /// The swapchain carried by a [`SlotType::Swapchain`] value.
    pub fn as_swapchain(&self) -> Option<&Arc<dyn Swapchain>> {
        if self.ty != SlotType::Swapchain {
            return None;
        }
        self.downcast::<Arc<dyn Swapchain>>()
    }
}

impl fmt::Debug for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotValue").field("ty", &self.ty).finish_non_exhaustive()
    }
}

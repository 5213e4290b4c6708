//! Device backends.
//!
//! Only the `dummy` backend lives in this crate. Real backends implement
//! [`Device`](crate::device::Device) and [`Swapchain`](crate::device::Swapchain)
//! in their own crates.

pub mod dummy;

pub use dummy::{DummyDevice, DummyEvent, DummySwapchain};

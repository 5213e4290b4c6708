//! # Lumen Core
//!
//! Engine-agnostic building blocks shared by the Lumen render graph:
//!
//! - [`timing`] - fixed and variable timestep loops with catch-up policies
//! - [`events`] - a typed publish/subscribe message bus

pub mod events;
pub mod timing;

pub use events::{Event, MessageBus, SubscriptionId};
pub use timing::{
    LoopCatchupMode, LoopConfig, LoopId, LoopManager, LoopReference, MIN_FRAME_TIME,
    clamp_frame_delta,
};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the core crate.
pub fn init() {
    log::info!("Lumen Core v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

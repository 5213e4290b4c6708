//! Resource caching.
//!
//! Creating GPU objects is expensive and most of them are fully described by
//! a small set of parameters. This module memoizes creation:
//!
//! - [`ResourceFactory`] - creates and destroys objects of one kind
//! - [`ResourceCacher`] - maps params to shared [`CachedWrapper`]s for one
//!   kind on one device
//! - [`CacheRegistry`] - owns every cacher, keyed by [`CacheKind`] and device
//!
//! ```text
//! CacheRegistry
//! ├── global
//! │   └── "pipeline_layout" -> ResourceCacher<PipelineLayouts>
//! ├── device#1
//! │   ├── "sampler"         -> ResourceCacher<Samplers>
//! │   └── "shader_module"   -> ResourceCacher<ShaderModules>
//! └── device#2
//!     └── "sampler"         -> ResourceCacher<Samplers>
//! ```
//!
//! Cached objects are destroyed only by their cacher: when it is cleared, or
//! when [`CacheRegistry::clear_device_caches`] tears down a device.

mod cacher;
mod registry;

pub use cacher::{
    CacheKind, CacheStats, CachedWrapper, CreateParams, ResourceCacher, ResourceFactory,
    content_hash,
};
pub use registry::{CacheRegistry, CacherStats};

#[cfg(test)]
pub(crate) use cacher::tests::CountingFactory;

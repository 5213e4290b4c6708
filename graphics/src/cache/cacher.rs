//! Per-kind, per-device memoization table.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::{FxHashMap, FxHasher};

use crate::device::Device;
use crate::error::GraphResult;

/// Stable identifier of a cached resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKind(&'static str);

impl CacheKind {
    /// Create a kind from its name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Get the kind name.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Identity of a creatable resource.
///
/// Every field that affects the created object must take part in `Eq` and
/// `Hash`; equal params always resolve to the same cached object.
pub trait CreateParams: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> CreateParams for T {}

/// Hash arbitrary bytes into a content-addressed key component.
pub fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Creates and destroys the objects of one resource kind.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lumen_graphics::cache::{CacheKind, ResourceCacher, ResourceFactory};
/// use lumen_graphics::{Device, GraphResult};
///
/// struct SamplerFactory;
///
/// impl ResourceFactory for SamplerFactory {
///     const KIND: CacheKind = CacheKind::new("sampler");
///     type Params = String;
///     type Resource = u64;
///
///     fn create(&self, _: Option<&Arc<dyn Device>>, params: &String) -> GraphResult<u64> {
///         Ok(params.len() as u64)
///     }
/// }
///
/// let mut cacher = ResourceCacher::new(Arc::new(SamplerFactory), None, "samplers");
/// let a = cacher.get_or_create(&"linear".to_string()).unwrap();
/// let b = cacher.get_or_create(&"linear".to_string()).unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
pub trait ResourceFactory: Send + Sync + 'static {
    /// Kind identifier used by the registry.
    const KIND: CacheKind;
    /// Cache key.
    type Params: CreateParams;
    /// The created object.
    type Resource: Send + Sync + 'static;

    /// Create the object described by `params`.
    fn create(
        &self,
        device: Option<&Arc<dyn Device>>,
        params: &Self::Params,
    ) -> GraphResult<Self::Resource>;

    /// Destroy an object previously returned by [`create`](Self::create).
    ///
    /// Not called when the device is already lost.
    fn destroy(&self, device: Option<&Arc<dyn Device>>, resource: &Self::Resource) {
        let _ = (device, resource);
    }
}

/// Shared handle to a cached object.
///
/// Nodes hold wrappers for as long as they need them, but the owning
/// [`ResourceCacher`] decides when the object is destroyed. After that,
/// [`is_valid`](Self::is_valid) returns `false`.
pub struct CachedWrapper<F: ResourceFactory> {
    params: F::Params,
    resource: F::Resource,
    valid: AtomicBool,
}

impl<F: ResourceFactory> CachedWrapper<F> {
    /// The params this object was created from.
    pub fn params(&self) -> &F::Params {
        &self.params
    }

    /// The created object.
    pub fn resource(&self) -> &F::Resource {
        &self.resource
    }

    /// Whether the cacher still owns a live object.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl<F: ResourceFactory> fmt::Debug for CachedWrapper<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedWrapper")
            .field("kind", &F::KIND)
            .field("params", &self.params)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Hit and miss counters of a cacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Mapping from params to cached objects for one kind and one device.
pub struct ResourceCacher<F: ResourceFactory> {
    factory: Arc<F>,
    device: Option<Arc<dyn Device>>,
    label: String,
    entries: FxHashMap<F::Params, Arc<CachedWrapper<F>>>,
    hits: u64,
    misses: u64,
}

impl<F: ResourceFactory> ResourceCacher<F> {
    /// Create an empty cacher. `device` is `None` for device-independent kinds.
    pub fn new(factory: Arc<F>, device: Option<Arc<dyn Device>>, label: impl Into<String>) -> Self {
        Self {
            factory,
            device,
            label: label.into(),
            entries: FxHashMap::default(),
            hits: 0,
            misses: 0,
        }
    }

    /// Return the object for `params`, creating it on first use.
    ///
    /// The factory runs at most once per distinct key. Creation failures are
    /// returned as-is and nothing is cached.
    pub fn get_or_create(&mut self, params: &F::Params) -> GraphResult<Arc<CachedWrapper<F>>> {
        if let Some(existing) = self.entries.get(params) {
            self.hits += 1;
            log::trace!("ResourceCacher[{}]: hit {:?}", self.label, params);
            return Ok(Arc::clone(existing));
        }

        self.misses += 1;
        log::debug!("ResourceCacher[{}]: creating {:?}", self.label, params);
        let resource = self.factory.create(self.device.as_ref(), params)?;

        let wrapper = Arc::new(CachedWrapper {
            params: params.clone(),
            resource,
            valid: AtomicBool::new(true),
        });
        self.entries.insert(params.clone(), Arc::clone(&wrapper));
        Ok(wrapper)
    }

    /// Look up an object without creating it.
    pub fn get(&self, params: &F::Params) -> Option<Arc<CachedWrapper<F>>> {
        self.entries.get(params).cloned()
    }

    /// Whether an object exists for `params`.
    pub fn contains(&self, params: &F::Params) -> bool {
        self.entries.contains_key(params)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cacher holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Label used in diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The device this cacher is scoped to.
    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.device.as_ref()
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    /// Destroy every cached object. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        if count == 0 {
            return 0;
        }

        let device_lost = self.device.as_ref().is_some_and(|d| d.is_lost());
        if device_lost {
            log::warn!(
                "ResourceCacher[{}]: device lost, dropping {} entries without destruction",
                self.label,
                count
            );
        }

        for (_, wrapper) in self.entries.drain() {
            wrapper.valid.store(false, Ordering::Release);
            if !device_lost {
                self.factory.destroy(self.device.as_ref(), &wrapper.resource);
            }
        }

        log::debug!("ResourceCacher[{}]: cleared {} entries", self.label, count);
        count
    }
}

impl<F: ResourceFactory> Drop for ResourceCacher<F> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourceCacher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCacher")
            .field("kind", &F::KIND)
            .field("label", &self.label)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Object-safe view of a [`ResourceCacher`] stored in the registry.
pub(crate) trait AnyCacher: Send + Sync {
    fn kind(&self) -> CacheKind;
    fn label(&self) -> &str;
    fn stats(&self) -> CacheStats;
    fn clear(&mut self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<F: ResourceFactory> AnyCacher for ResourceCacher<F> {
    fn kind(&self) -> CacheKind {
        F::KIND
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stats(&self) -> CacheStats {
        ResourceCacher::stats(self)
    }

    fn clear(&mut self) -> usize {
        ResourceCacher::clear(self)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

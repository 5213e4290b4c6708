//! Registry of resource cachers, scoped per device.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::cacher::{AnyCacher, CacheKind, CacheStats, CachedWrapper, ResourceCacher, ResourceFactory};
use crate::device::{Device, DeviceId};
use crate::error::{GraphError, GraphResult};

type CacherConstructor = Box<dyn Fn(Option<Arc<dyn Device>>) -> Box<dyn AnyCacher> + Send + Sync>;

struct Registration {
    label: String,
    device_dependent: bool,
    constructor: CacherConstructor,
}

struct DeviceCaches {
    device: Arc<dyn Device>,
    cachers: FxHashMap<CacheKind, Box<dyn AnyCacher>>,
}

/// Counters of one live cacher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacherStats {
    pub kind: CacheKind,
    pub label: String,
    /// `None` for device-independent cachers.
    pub device: Option<DeviceId>,
    pub stats: CacheStats,
}

/// Owner of every [`ResourceCacher`] in a graph.
///
/// Kinds are registered once, then resolved lazily: device-dependent kinds get
/// one cacher per device, device-independent kinds share a single global
/// cacher. Registration is idempotent so every node that needs a kind can
/// register it on first compile.
///
/// Clearing walks kinds in reverse registration order. A kind whose objects
/// hold objects of another kind, such as pipelines holding their layouts,
/// must be registered after it so it is destroyed first.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use lumen_graphics::cache::{CacheKind, CacheRegistry, ResourceFactory};
/// use lumen_graphics::{Device, DummyDevice, GraphResult};
///
/// struct ShaderModules;
///
/// impl ResourceFactory for ShaderModules {
///     const KIND: CacheKind = CacheKind::new("shader_module");
///     type Params = u64;
///     type Resource = u64;
///
///     fn create(&self, _: Option<&Arc<dyn Device>>, hash: &u64) -> GraphResult<u64> {
///         Ok(*hash)
///     }
/// }
///
/// let device: Arc<dyn Device> = Arc::new(DummyDevice::new("gpu"));
/// let mut caches = CacheRegistry::new();
/// caches.register_cacher(ShaderModules, "shader modules", true);
///
/// let module = caches.get_or_create::<ShaderModules>(Some(&device), &42).unwrap();
/// assert_eq!(*module.resource(), 42);
///
/// assert_eq!(caches.clear_device_caches(device.id()), 1);
/// ```
#[derive(Default)]
pub struct CacheRegistry {
    registrations: FxHashMap<CacheKind, Registration>,
    /// Registered kinds, oldest first.
    order: Vec<CacheKind>,
    devices: FxHashMap<DeviceId, DeviceCaches>,
    global: FxHashMap<CacheKind, Box<dyn AnyCacher>>,
}

impl CacheRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for `F::KIND`.
    ///
    /// Returns `false` and keeps the existing registration if the kind is
    /// already known.
    pub fn register_cacher<F: ResourceFactory>(
        &mut self,
        factory: F,
        label: impl Into<String>,
        device_dependent: bool,
    ) -> bool {
        if self.registrations.contains_key(&F::KIND) {
            log::trace!("CacheRegistry: '{}' already registered", F::KIND);
            return false;
        }

        let label = label.into();
        let factory = Arc::new(factory);
        let cacher_label = label.clone();
        let constructor: CacherConstructor = Box::new(move |device| {
            Box::new(ResourceCacher::new(
                Arc::clone(&factory),
                device,
                cacher_label.clone(),
            ))
        });

        log::debug!(
            "CacheRegistry: registered cacher '{}' ({}, device dependent: {})",
            F::KIND,
            label,
            device_dependent
        );
        self.order.push(F::KIND);
        self.registrations.insert(
            F::KIND,
            Registration {
                label,
                device_dependent,
                constructor,
            },
        );
        true
    }

    /// Whether a kind has been registered.
    pub fn is_registered(&self, kind: CacheKind) -> bool {
        self.registrations.contains_key(&kind)
    }

    /// Whether a kind is scoped per device. `None` if unregistered.
    pub fn is_device_dependent(&self, kind: CacheKind) -> Option<bool> {
        self.registrations.get(&kind).map(|r| r.device_dependent)
    }

    /// Label a kind was registered with.
    pub fn label(&self, kind: CacheKind) -> Option<&str> {
        self.registrations.get(&kind).map(|r| r.label.as_str())
    }

    /// Resolve the cacher for `F`, creating it on first use.
    ///
    /// Device-dependent kinds require `device`; device-independent kinds
    /// ignore it.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnregisteredCacher`] if `F::KIND` was never registered
    /// - [`GraphError::DeviceRequired`] if the kind needs a device and none was given
    /// - [`GraphError::CacherKindMismatch`] if `F::KIND` belongs to another factory type
    pub fn cacher<F: ResourceFactory>(
        &mut self,
        device: Option<&Arc<dyn Device>>,
    ) -> GraphResult<&mut ResourceCacher<F>> {
        let kind = F::KIND;
        let registration = self
            .registrations
            .get(&kind)
            .ok_or(GraphError::UnregisteredCacher { kind: kind.name() })?;

        let cacher = if registration.device_dependent {
            let device = device.ok_or(GraphError::DeviceRequired { kind: kind.name() })?;
            let caches = self.devices.entry(device.id()).or_insert_with(|| {
                log::debug!("CacheRegistry: tracking {} ({})", device.id(), device.name());
                DeviceCaches {
                    device: Arc::clone(device),
                    cachers: FxHashMap::default(),
                }
            });
            caches
                .cachers
                .entry(kind)
                .or_insert_with(|| (registration.constructor)(Some(Arc::clone(device))))
        } else {
            self.global
                .entry(kind)
                .or_insert_with(|| (registration.constructor)(None))
        };

        cacher
            .as_any_mut()
            .downcast_mut::<ResourceCacher<F>>()
            .ok_or(GraphError::CacherKindMismatch { kind: kind.name() })
    }

    /// Shorthand for `cacher::<F>(device)?.get_or_create(params)`.
    pub fn get_or_create<F: ResourceFactory>(
        &mut self,
        device: Option<&Arc<dyn Device>>,
        params: &F::Params,
    ) -> GraphResult<Arc<CachedWrapper<F>>> {
        self.cacher::<F>(device)?.get_or_create(params)
    }

    /// Destroy every cached object tied to `device` and forget the device.
    ///
    /// Must run once, right before the device itself is destroyed and after
    /// everything that used the device has been cleaned up. Returns the number
    /// of destroyed objects.
    pub fn clear_device_caches(&mut self, device: DeviceId) -> usize {
        let Some(mut caches) = self.devices.remove(&device) else {
            log::trace!("CacheRegistry: no caches for {}", device);
            return 0;
        };

        let cleared = clear_newest_first(&self.order, &mut caches.cachers);
        log::info!(
            "CacheRegistry: cleared {} cached objects of {} ({}) across {} cachers",
            cleared,
            device,
            caches.device.name(),
            caches.cachers.len()
        );
        cleared
    }

    /// Destroy every object held by device-independent cachers.
    pub fn clear_global_caches(&mut self) -> usize {
        let cleared = clear_newest_first(&self.order, &mut self.global);
        if cleared > 0 {
            log::info!("CacheRegistry: cleared {} global cached objects", cleared);
        }
        cleared
    }

    /// Clear every device and global cache. Registrations are kept.
    pub fn clear_all(&mut self) -> usize {
        let devices: Vec<DeviceId> = self.devices.keys().copied().collect();
        let mut cleared = 0;
        for device in devices {
            cleared += self.clear_device_caches(device);
        }
        cleared + self.clear_global_caches()
    }

    /// Registered kinds, sorted by name.
    pub fn registered_kinds(&self) -> Vec<CacheKind> {
        let mut kinds: Vec<CacheKind> = self.registrations.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Devices that currently own at least one cacher, sorted.
    pub fn active_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self.devices.keys().copied().collect();
        devices.sort();
        devices
    }

    /// Counters of every live cacher.
    pub fn stats(&self) -> Vec<CacherStats> {
        let global = self.global.values().map(|c| CacherStats {
            kind: c.kind(),
            label: c.label().to_string(),
            device: None,
            stats: c.stats(),
        });
        let per_device = self.devices.iter().flat_map(|(id, caches)| {
            caches.cachers.values().map(move |c| CacherStats {
                kind: c.kind(),
                label: c.label().to_string(),
                device: Some(*id),
                stats: c.stats(),
            })
        });
        let mut all: Vec<CacherStats> = global.chain(per_device).collect();
        all.sort_by(|a, b| (a.kind, a.device).cmp(&(b.kind, b.device)));
        all
    }
}

fn clear_newest_first(
    order: &[CacheKind],
    cachers: &mut FxHashMap<CacheKind, Box<dyn AnyCacher>>,
) -> usize {
    order
        .iter()
        .rev()
        .filter_map(|kind| cachers.get_mut(kind).map(|cacher| cacher.clear()))
        .sum()
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("kinds", &self.registered_kinds())
            .field("devices", &self.active_devices())
            .field("global", &self.global.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(CacheRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::DummyDevice;
    use crate::cache::cacher::tests::CountingFactory;

    struct OtherFactory;

    impl ResourceFactory for OtherFactory {
        const KIND: CacheKind = CacheKind::new("counting");
        type Params = u32;
        type Resource = u32;

        fn create(&self, _: Option<&Arc<dyn Device>>, params: &u32) -> GraphResult<u32> {
            Ok(*params)
        }
    }

    struct GlobalFactory;

    impl ResourceFactory for GlobalFactory {
        const KIND: CacheKind = CacheKind::new("global");
        type Params = u32;
        type Resource = u32;

        fn create(&self, _: Option<&Arc<dyn Device>>, params: &u32) -> GraphResult<u32> {
            Ok(params * 2)
        }
    }

    fn device(name: &str) -> Arc<dyn Device> {
        Arc::new(DummyDevice::new(name))
    }

    fn params(n: u32) -> (String, u32) {
        ("sampler".to_string(), n)
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut caches = CacheRegistry::new();
        assert!(caches.register_cacher(CountingFactory::default(), "counting", true));
        assert!(!caches.register_cacher(CountingFactory::default(), "again", false));

        assert!(caches.is_registered(CountingFactory::KIND));
        assert_eq!(caches.is_device_dependent(CountingFactory::KIND), Some(true));
        assert_eq!(caches.label(CountingFactory::KIND), Some("counting"));
        assert_eq!(caches.registered_kinds(), vec![CountingFactory::KIND]);
    }

    #[test]
    fn test_unregistered_kind_is_an_error() {
        let mut caches = CacheRegistry::new();
        let gpu = device("gpu");
        let err = caches.cacher::<CountingFactory>(Some(&gpu)).unwrap_err();
        assert_eq!(err, GraphError::UnregisteredCacher { kind: "counting" });
        assert!(err.is_configuration());
    }

    #[test]
    fn test_device_dependent_requires_device() {
        let mut caches = CacheRegistry::new();
        caches.register_cacher(CountingFactory::default(), "counting", true);
        assert_eq!(
            caches.cacher::<CountingFactory>(None).unwrap_err(),
            GraphError::DeviceRequired { kind: "counting" }
        );
    }

    #[test]
    fn test_kind_collision_is_reported() {
        let mut caches = CacheRegistry::new();
        caches.register_cacher(CountingFactory::default(), "counting", false);
        assert_eq!(
            caches.cacher::<OtherFactory>(None).unwrap_err(),
            GraphError::CacherKindMismatch { kind: "counting" }
        );
    }

    #[test]
    fn test_devices_do_not_share_entries() {
        let mut caches = CacheRegistry::new();
        caches.register_cacher(CountingFactory::default(), "counting", true);
        let gpu0 = device("gpu0");
        let gpu1 = device("gpu1");

        let a = caches.get_or_create::<CountingFactory>(Some(&gpu0), &params(1)).unwrap();
        let b = caches.get_or_create::<CountingFactory>(Some(&gpu1), &params(1)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(caches.active_devices().len(), 2);

        assert_eq!(caches.clear_device_caches(gpu0.id()), 1);
        assert!(!a.is_valid());
        assert!(b.is_valid());
        assert_eq!(caches.active_devices(), vec![gpu1.id()]);

        let c = caches.get_or_create::<CountingFactory>(Some(&gpu1), &params(1)).unwrap();
        assert!(Arc::ptr_eq(&b, &c));
    }

    #[test]
    fn test_global_cacher_is_shared() {
        let mut caches = CacheRegistry::new();
        caches.register_cacher(GlobalFactory, "global", false);

        let a = caches.get_or_create::<GlobalFactory>(None, &3).unwrap();
        let b = caches
            .get_or_create::<GlobalFactory>(Some(&device("gpu")), &3)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a.resource(), 6);
        assert!(caches.active_devices().is_empty());

        assert_eq!(caches.clear_global_caches(), 1);
        assert!(!a.is_valid());
    }

    #[test]
    fn test_clear_unknown_device_is_noop() {
        let mut caches = CacheRegistry::new();
        assert_eq!(caches.clear_device_caches(DeviceId::next()), 0);
    }

    #[test]
    fn test_clear_all_keeps_registrations() {
        let mut caches = CacheRegistry::new();
        caches.register_cacher(CountingFactory::default(), "counting", true);
        caches.register_cacher(GlobalFactory, "global", false);
        let gpu = device("gpu");

        caches.get_or_create::<CountingFactory>(Some(&gpu), &params(1)).unwrap();
        caches.get_or_create::<CountingFactory>(Some(&gpu), &params(2)).unwrap();
        caches.get_or_create::<GlobalFactory>(None, &1).unwrap();

        assert_eq!(caches.clear_all(), 3);
        assert!(caches.is_registered(CountingFactory::KIND));
        assert!(caches.is_registered(GlobalFactory::KIND));
    }

    const LOGGED_KINDS: [&str; 4] = ["layout", "pipeline", "descriptor_set", "framebuffer"];

    /// Logs destroy calls of kind `LOGGED_KINDS[N]` into a shared list.
    struct Logged<const N: usize> {
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl<const N: usize> ResourceFactory for Logged<N> {
        const KIND: CacheKind = CacheKind::new(LOGGED_KINDS[N]);
        type Params = u32;
        type Resource = u32;

        fn create(&self, _: Option<&Arc<dyn Device>>, params: &u32) -> GraphResult<u32> {
            Ok(*params)
        }

        fn destroy(&self, _: Option<&Arc<dyn Device>>, _: &u32) {
            self.log.lock().push(LOGGED_KINDS[N]);
        }
    }

    fn register_logged(
        caches: &mut CacheRegistry,
        device_dependent: bool,
    ) -> Arc<parking_lot::Mutex<Vec<&'static str>>> {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        caches.register_cacher(Logged::<0> { log: Arc::clone(&log) }, "layouts", device_dependent);
        caches.register_cacher(Logged::<1> { log: Arc::clone(&log) }, "pipelines", device_dependent);
        caches.register_cacher(Logged::<2> { log: Arc::clone(&log) }, "sets", device_dependent);
        caches.register_cacher(Logged::<3> { log: Arc::clone(&log) }, "framebuffers", device_dependent);
        log
    }

    #[test]
    fn test_device_caches_clear_newest_kind_first() {
        let mut caches = CacheRegistry::new();
        let log = register_logged(&mut caches, true);
        let gpu = device("gpu");

        // Resolve in an order unrelated to registration.
        caches.get_or_create::<Logged<2>>(Some(&gpu), &1).unwrap();
        caches.get_or_create::<Logged<0>>(Some(&gpu), &1).unwrap();
        caches.get_or_create::<Logged<3>>(Some(&gpu), &1).unwrap();
        caches.get_or_create::<Logged<1>>(Some(&gpu), &1).unwrap();

        assert_eq!(caches.clear_device_caches(gpu.id()), 4);
        assert_eq!(
            *log.lock(),
            vec!["framebuffer", "descriptor_set", "pipeline", "layout"]
        );
    }

    #[test]
    fn test_global_caches_clear_newest_kind_first() {
        let mut caches = CacheRegistry::new();
        let log = register_logged(&mut caches, false);

        caches.get_or_create::<Logged<0>>(None, &1).unwrap();
        caches.get_or_create::<Logged<1>>(None, &1).unwrap();
        caches.get_or_create::<Logged<3>>(None, &1).unwrap();

        assert_eq!(caches.clear_global_caches(), 3);
        assert_eq!(*log.lock(), vec!["framebuffer", "pipeline", "layout"]);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut caches = CacheRegistry::new();
        caches.register_cacher(CountingFactory::default(), "counting", true);
        let gpu = device("gpu");

        for _ in 0..3 {
            caches.get_or_create::<CountingFactory>(Some(&gpu), &params(1)).unwrap();
        }

        let stats = caches.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].device, Some(gpu.id()));
        assert_eq!(stats[0].stats.hits, 2);
        assert_eq!(stats[0].stats.misses, 1);
    }

    #[test]
    fn test_factory_runs_once_per_key_per_device() {
        let factory = CountingFactory::default();
        let mut caches = CacheRegistry::new();
        caches.register_cacher(factory, "counting", true);
        let gpu = device("gpu");

        for _ in 0..5 {
            caches.get_or_create::<CountingFactory>(Some(&gpu), &params(7)).unwrap();
        }

        let cacher = caches.cacher::<CountingFactory>(Some(&gpu)).unwrap();
        assert_eq!(cacher.stats().misses, 1);
        assert_eq!(cacher.len(), 1);
        let wrapper = cacher.get(&params(7)).unwrap();
        assert!(wrapper.is_valid());
    }
}

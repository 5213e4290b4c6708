//! Dependency-ordered teardown.
//!
//! Nodes register their cleanup lazily, in whatever order they happen to
//! compile, but resources must be destroyed in an order consistent with how
//! they were created. [`CleanupRegistry`] collects named actions together
//! with ordering constraints and runs them in topological order on flush.
//!
//! Two forms of constraint are supported:
//!
//! - [`register`](CleanupRegistry::register): the entry runs *after* each
//!   named dependency.
//! - [`register_before`](CleanupRegistry::register_before): the entry runs
//!   *before* each named provider. The render graph uses this for nodes, so
//!   consumers are torn down ahead of the producers they read from and the
//!   device goes last.
//!
//! Names are resolved to [`CleanupHandle`]s once, at registration. A name may
//! be referenced before it is registered; such placeholders carry no action
//! and impose no ordering until they are registered.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use lumen_graphics::cleanup::CleanupRegistry;
//!
//! let order = Arc::new(Mutex::new(Vec::new()));
//! let mut cleanup = CleanupRegistry::new();
//!
//! for (name, deps) in [("c", &["b"][..]), ("a", &[][..]), ("b", &["a"][..])] {
//!     let order = Arc::clone(&order);
//!     cleanup.register(name, deps, move |_: &mut ()| order.lock().unwrap().push(name));
//! }
//!
//! cleanup.flush(&mut ()).unwrap();
//! assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
//! ```

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{GraphError, GraphResult};

/// Index of a cleanup entry.
///
/// A name keeps the same handle for the lifetime of the registry, across
/// re-registration and flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CleanupHandle(u32);

impl CleanupHandle {
    fn index(self) -> usize {
        self.0 as usize
    }
}

type CleanupAction<C> = Box<dyn FnOnce(&mut C) + Send>;

struct CleanupEntry<C> {
    name: String,
    action: Option<CleanupAction<C>>,
    /// Entries that must run before this one.
    after: Vec<CleanupHandle>,
    /// Entries that must run after this one.
    before: Vec<CleanupHandle>,
    registered: bool,
}

/// Registry of named teardown actions.
///
/// `C` is the context handed to every action when it runs.
pub struct CleanupRegistry<C = ()> {
    entries: Vec<CleanupEntry<C>>,
    by_name: FxHashMap<String, CleanupHandle>,
}

impl<C> CleanupRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }

    fn resolve(&mut self, name: &str) -> CleanupHandle {
        if let Some(&handle) = self.by_name.get(name) {
            return handle;
        }
        let handle = CleanupHandle(self.entries.len() as u32);
        self.entries.push(CleanupEntry {
            name: name.to_string(),
            action: None,
            after: Vec::new(),
            before: Vec::new(),
            registered: false,
        });
        self.by_name.insert(name.to_string(), handle);
        handle
    }

    fn insert(
        &mut self,
        name: &str,
        after: &[&str],
        before: &[&str],
        action: CleanupAction<C>,
    ) -> CleanupHandle {
        let handle = self.resolve(name);
        let after: Vec<CleanupHandle> = after.iter().map(|n| self.resolve(n)).collect();
        let before: Vec<CleanupHandle> = before.iter().map(|n| self.resolve(n)).collect();

        let entry = &mut self.entries[handle.index()];
        if entry.registered {
            log::debug!("CleanupRegistry: replacing '{}'", name);
        } else {
            log::trace!("CleanupRegistry: registered '{}'", name);
        }
        entry.action = Some(action);
        entry.after = after;
        entry.before = before;
        entry.registered = true;
        handle
    }

    /// Insert or replace `name`, running after every entry in `dependencies`.
    pub fn register(
        &mut self,
        name: &str,
        dependencies: &[&str],
        action: impl FnOnce(&mut C) + Send + 'static,
    ) -> CleanupHandle {
        self.insert(name, dependencies, &[], Box::new(action))
    }

    /// Insert or replace `name`, running before every entry in `providers`.
    pub fn register_before(
        &mut self,
        name: &str,
        providers: &[&str],
        action: impl FnOnce(&mut C) + Send + 'static,
    ) -> CleanupHandle {
        self.insert(name, &[], providers, Box::new(action))
    }

    /// Handle of a name, registered or placeholder.
    pub fn handle(&self, name: &str) -> Option<CleanupHandle> {
        self.by_name.get(name).copied()
    }

    /// Whether `name` has a pending action.
    pub fn contains(&self, name: &str) -> bool {
        self.handle(name)
            .is_some_and(|h| self.entries[h.index()].registered)
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.registered).count()
    }

    /// Whether no action is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of pending actions, in registration slot order.
    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.registered)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Successor lists over registered entries: `edges[a]` must run before each entry in it.
    fn edges(&self) -> Vec<Vec<usize>> {
        let mut edges = vec![Vec::new(); self.entries.len()];
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.registered {
                continue;
            }
            for dep in &entry.after {
                if self.entries[dep.index()].registered {
                    edges[dep.index()].push(index);
                }
            }
            for provider in &entry.before {
                if self.entries[provider.index()].registered {
                    edges[index].push(provider.index());
                }
            }
        }
        edges
    }

    /// Names of every pending entry that must run before `name`, transitively.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let Some(handle) = self.handle(name) else {
            return Vec::new();
        };
        let mut subset = self.predecessors(handle.index());
        subset.remove(&handle.index());
        let mut indices: Vec<usize> = subset.into_iter().collect();
        indices.sort_unstable();
        indices
            .into_iter()
            .map(|i| self.entries[i].name.clone())
            .collect()
    }

    /// `start` plus every registered entry that must run before it.
    fn predecessors(&self, start: usize) -> FxHashSet<usize> {
        let edges = self.edges();
        let mut reverse = vec![Vec::new(); edges.len()];
        for (from, successors) in edges.iter().enumerate() {
            for &to in successors {
                reverse[to].push(from);
            }
        }

        let mut seen = FxHashSet::default();
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            if seen.insert(index) {
                stack.extend(reverse[index].iter().copied());
            }
        }
        seen
    }

    /// Kahn's algorithm over the registered entries in `subset`.
    fn topological_order(&self, subset: &FxHashSet<usize>) -> GraphResult<Vec<usize>> {
        let edges = self.edges();
        let mut in_degree = vec![0usize; self.entries.len()];
        for &from in subset {
            for &to in &edges[from] {
                if subset.contains(&to) {
                    in_degree[to] += 1;
                }
            }
        }

        let mut ready: Vec<usize> = subset.iter().copied().filter(|&i| in_degree[i] == 0).collect();
        ready.sort_unstable();
        let mut queue: VecDeque<usize> = ready.into();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(index) = queue.pop_front() {
            order.push(index);
            for &next in &edges[index] {
                if subset.contains(&next) {
                    in_degree[next] -= 1;
                    if in_degree[next] == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if order.len() != subset.len() {
            let mut names: Vec<String> = subset
                .iter()
                .filter(|&&i| in_degree[i] > 0)
                .map(|&i| self.entries[i].name.clone())
                .collect();
            names.sort();
            log::error!("CleanupRegistry: cyclic dependency between {:?}", names);
            return Err(GraphError::CyclicCleanupDependency { names });
        }

        Ok(order)
    }

    fn run(&mut self, order: Vec<usize>, context: &mut C) -> usize {
        let mut executed = 0;
        for index in order {
            let entry = &mut self.entries[index];
            entry.registered = false;
            entry.after.clear();
            entry.before.clear();
            if let Some(action) = entry.action.take() {
                log::trace!("CleanupRegistry: running '{}'", entry.name);
                action(context);
                executed += 1;
            }
        }
        executed
    }

    /// Run every pending action once, in dependency order.
    ///
    /// On a cycle nothing runs and every entry stays registered.
    pub fn flush(&mut self, context: &mut C) -> GraphResult<usize> {
        let subset: FxHashSet<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.registered)
            .map(|(i, _)| i)
            .collect();
        if subset.is_empty() {
            return Ok(0);
        }

        let order = self.topological_order(&subset)?;
        let executed = self.run(order, context);
        log::debug!("CleanupRegistry: flushed {} actions", executed);
        Ok(executed)
    }

    /// Run `name` and every pending action ordered before it.
    ///
    /// Used when a single node is recompiled: its dependents are torn down
    /// with it while the rest of the graph stays alive. Unknown or already
    /// flushed names run nothing.
    pub fn flush_from(&mut self, name: &str, context: &mut C) -> GraphResult<usize> {
        let Some(handle) = self.handle(name) else {
            return Ok(0);
        };
        if !self.entries[handle.index()].registered {
            return Ok(0);
        }

        let subset = self.predecessors(handle.index());
        let order = self.topological_order(&subset)?;
        let executed = self.run(order, context);
        log::debug!("CleanupRegistry: flushed {} actions from '{}'", executed, name);
        Ok(executed)
    }

    /// Drop every entry without running it.
    pub fn clear(&mut self) {
        let pending = self.len();
        if pending > 0 {
            log::warn!("CleanupRegistry: discarding {} pending actions", pending);
        }
        self.entries.clear();
        self.by_name.clear();
    }
}

impl<C> Default for CleanupRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for CleanupRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, name: &str) -> impl FnOnce(&mut ()) + Send + 'static {
        let log = Arc::clone(log);
        let name = name.to_string();
        move |_| log.lock().unwrap().push(name)
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_run_first() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register("c", &["b"], recorder(&log, "c"));
        cleanup.register("b", &["a"], recorder(&log, "b"));
        cleanup.register("a", &[], recorder(&log, "a"));

        assert_eq!(cleanup.flush(&mut ()).unwrap(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(cleanup.is_empty());
    }

    #[test]
    fn test_register_before_runs_consumers_first() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register_before("device", &[], recorder(&log, "device"));
        cleanup.register_before("swapchain", &["device"], recorder(&log, "swapchain"));
        cleanup.register_before("framebuffer", &["swapchain", "device"], recorder(&log, "framebuffer"));

        cleanup.flush(&mut ()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["framebuffer", "swapchain", "device"]);
    }

    #[test]
    fn test_cycle_is_reported_and_nothing_runs() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register("a", &["b"], recorder(&log, "a"));
        cleanup.register("b", &["a"], recorder(&log, "b"));
        cleanup.register("free", &[], recorder(&log, "free"));

        let err = cleanup.flush(&mut ()).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicCleanupDependency {
                names: vec!["a".into(), "b".into()]
            }
        );
        assert!(err.is_configuration());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(cleanup.len(), 3);
    }

    #[test]
    fn test_replace_by_name_runs_once() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        let first = cleanup.register("node", &[], recorder(&log, "old"));
        let second = cleanup.register("node", &[], recorder(&log, "new"));
        assert_eq!(first, second);
        assert_eq!(cleanup.len(), 1);

        cleanup.flush(&mut ()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["new"]);

        // Nothing left to run.
        assert_eq!(cleanup.flush(&mut ()).unwrap(), 0);
    }

    #[test]
    fn test_unregistered_dependency_is_satisfied() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register("a", &["never_registered"], recorder(&log, "a"));

        assert!(cleanup.handle("never_registered").is_some());
        assert!(!cleanup.contains("never_registered"));
        assert_eq!(cleanup.flush(&mut ()).unwrap(), 1);
    }

    #[test]
    fn test_placeholder_gains_ordering_once_registered() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register("b", &["a"], recorder(&log, "b"));
        cleanup.register("a", &[], recorder(&log, "a"));

        cleanup.flush(&mut ()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_flush_from_runs_entry_and_consumers_only() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register_before("device", &[], recorder(&log, "device"));
        cleanup.register_before("swapchain", &["device"], recorder(&log, "swapchain"));
        cleanup.register_before("framebuffer", &["swapchain"], recorder(&log, "framebuffer"));
        cleanup.register_before("sampler", &["device"], recorder(&log, "sampler"));

        assert_eq!(
            cleanup.dependents_of("swapchain"),
            vec!["framebuffer".to_string()]
        );

        assert_eq!(cleanup.flush_from("swapchain", &mut ()).unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["framebuffer", "swapchain"]);
        assert!(cleanup.contains("device"));
        assert!(cleanup.contains("sampler"));
        assert!(!cleanup.contains("swapchain"));

        // Re-registration after a partial flush reuses the handle.
        let handle = cleanup.handle("swapchain").unwrap();
        assert_eq!(
            cleanup.register_before("swapchain", &["device"], recorder(&log, "swapchain")),
            handle
        );
    }

    #[test]
    fn test_flush_from_unknown_name() {
        let mut cleanup: CleanupRegistry = CleanupRegistry::new();
        assert_eq!(cleanup.flush_from("missing", &mut ()).unwrap(), 0);
    }

    #[test]
    fn test_context_is_passed_to_actions() {
        let mut cleanup: CleanupRegistry<Vec<&'static str>> = CleanupRegistry::new();
        cleanup.register("first", &[], |ctx| ctx.push("first"));
        cleanup.register("second", &["first"], |ctx| ctx.push("second"));

        let mut context = Vec::new();
        cleanup.flush(&mut context).unwrap();
        assert_eq!(context, vec!["first", "second"]);
    }

    #[test]
    fn test_independent_entries_keep_registration_order() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        for name in ["x", "y", "z"] {
            cleanup.register(name, &[], recorder(&log, name));
        }

        cleanup.flush(&mut ()).unwrap();
        let order = log.lock().unwrap().clone();
        assert!(position(&order, "x") < position(&order, "y"));
        assert!(position(&order, "y") < position(&order, "z"));
    }

    #[test]
    fn test_clear_discards_actions() {
        let log = Log::default();
        let mut cleanup = CleanupRegistry::new();
        cleanup.register("a", &[], recorder(&log, "a"));
        cleanup.clear();
        assert!(cleanup.is_empty());
        assert_eq!(cleanup.flush(&mut ()).unwrap(), 0);
        assert!(log.lock().unwrap().is_empty());
    }
}

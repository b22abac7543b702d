//! Named-plugin registration with dependency-ordered startup.
//!
//! The builder registers each storage/serializer/transport implementation
//! under a name; before wiring anything together it resolves the
//! registration order with a topological sort so a plugin's declared
//! dependencies are always constructed first. Kahn's algorithm, run once
//! at `resolve()` time rather than kept as a maintained online structure,
//! since registration only happens during startup.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("plugin name must not be empty")]
    EmptyName,

    #[error("plugin '{0}' is already registered")]
    DuplicateName(String),

    #[error("plugin '{0}' depends on unregistered plugin '{1}'")]
    MissingDependency(String, String),

    #[error("dependency cycle detected among: {0:?}")]
    Cycle(Vec<String>),
}

struct Entry<P> {
    plugin: Arc<P>,
    depends_on: Vec<String>,
}

/// A registry of named plugins of a single type `P`, with dependency edges
/// used to compute a safe construction/startup order.
pub struct PluginRegistry<P> {
    entries: HashMap<String, Entry<P>>,
    order: Vec<String>,
}

impl<P> PluginRegistry<P> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registers `plugin` under `name`, depending on the plugins named in
    /// `depends_on`. Rejects an empty name and a name already taken;
    /// dependency existence is checked lazily by [`resolve`], not here, so
    /// registration order doesn't matter.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        plugin: P,
        depends_on: Vec<String>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        self.entries.insert(
            name,
            Entry {
                plugin: Arc::new(plugin),
                depends_on,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<P>> {
        self.entries.get(name).map(|e| e.plugin.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last successfully computed topological order, from a prior call
    /// to [`resolve`]. Empty until `resolve` has run once.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Computes and caches a dependency-respecting order over every
    /// registered plugin via Kahn's algorithm. Fails on a missing
    /// dependency or a cycle; succeeds idempotently if called again with
    /// the same registrations.
    pub fn resolve(&mut self) -> Result<&[String], RegistryError> {
        let mut in_degree: HashMap<&str, usize> = self.entries.keys().map(|k| (k.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (name, entry) in &self.entries {
            for dep in &entry.depends_on {
                if !self.entries.contains_key(dep) {
                    return Err(RegistryError::MissingDependency(name.clone(), dep.clone()));
                }
                *in_degree.get_mut(name.as_str()).unwrap() += 1;
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&name, _)| name)
            .collect();
        ready.sort_unstable();
        let mut queue: VecDeque<&str> = ready.into();

        let mut order = Vec::with_capacity(self.entries.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            if let Some(deps) = dependents.get(name) {
                let mut ready = Vec::new();
                for &dependent in deps {
                    let degree = in_degree.get_mut(dependent).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(dependent);
                    }
                }
                ready.sort_unstable();
                for name in ready {
                    queue.push_back(name);
                }
            }
        }

        if order.len() != self.entries.len() {
            let remaining: HashSet<&str> = in_degree
                .iter()
                .filter(|(_, &deg)| deg > 0)
                .map(|(&name, _)| name)
                .collect();
            let mut remaining: Vec<String> = remaining.into_iter().map(String::from).collect();
            remaining.sort();
            return Err(RegistryError::Cycle(remaining));
        }

        self.order = order;
        Ok(&self.order)
    }
}

impl<P> Default for PluginRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_rejected() {
        let mut registry: PluginRegistry<u32> = PluginRegistry::new();
        assert_eq!(registry.register("", 1, vec![]), Err(RegistryError::EmptyName));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register("a", 1, vec![]).unwrap();
        assert_eq!(
            registry.register("a", 2, vec![]),
            Err(RegistryError::DuplicateName("a".to_string()))
        );
    }

    #[test]
    fn resolve_orders_dependencies_before_dependents() {
        let mut registry = PluginRegistry::new();
        registry.register("storage", 1, vec![]).unwrap();
        registry.register("outbox", 2, vec!["storage".to_string()]).unwrap();
        registry.register("scheduler", 3, vec!["storage".to_string(), "outbox".to_string()]).unwrap();

        let order = registry.resolve().unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("storage") < pos("outbox"));
        assert!(pos("outbox") < pos("scheduler"));
    }

    #[test]
    fn resolve_rejects_missing_dependency() {
        let mut registry: PluginRegistry<u32> = PluginRegistry::new();
        registry.register("outbox", 1, vec!["storage".to_string()]).unwrap();
        assert_eq!(
            registry.resolve(),
            Err(RegistryError::MissingDependency("outbox".to_string(), "storage".to_string()))
        );
    }

    #[test]
    fn resolve_rejects_cycles() {
        let mut registry = PluginRegistry::new();
        registry.register("a", 1, vec!["b".to_string()]).unwrap();
        registry.register("b", 2, vec!["a".to_string()]).unwrap();
        let err = registry.resolve().unwrap_err();
        match err {
            RegistryError::Cycle(mut names) => {
                names.sort();
                assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn get_returns_registered_plugin() {
        let mut registry = PluginRegistry::new();
        registry.register("answer", 42u32, vec![]).unwrap();
        assert_eq!(*registry.get("answer").unwrap(), 42);
        assert!(registry.get("missing").is_none());
    }
}

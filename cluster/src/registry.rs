use std::sync::RwLock;

use rustc_hash::FxHashMap;

/// Bidirectional node-name / socket-address registry. Both directions live
///  as entries in one map - `name -> addr` for dialing, `addr -> name` so
///  unregistering by name can evict the reverse binding too. Lookups are by
///  name only.
pub struct NodeRegistry {
    entries: RwLock<FxHashMap<String, String>>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        NodeRegistry::new()
    }
}

impl NodeRegistry {
    pub fn new() -> NodeRegistry {
        NodeRegistry { entries: RwLock::new(FxHashMap::default()) }
    }

    pub fn register(&self, name: &str, addr: &str) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(name.to_string(), addr.to_string());
        entries.insert(addr.to_string(), name.to_string());
    }

    pub fn unregister(&self, name: &str) {
        let mut entries = self.entries.write().unwrap();
        if let Some(addr) = entries.remove(name) {
            entries.remove(&addr);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<String> {
        self.entries.read().unwrap().get(name).cloned()
    }

    /// Apply a batch of bindings additively: names absent from `bindings`
    ///  keep whatever they were bound to before. Use `replace_all` when the
    ///  batch is meant to be the complete cluster view.
    pub fn reload(&self, bindings: impl IntoIterator<Item = (String, String)>) {
        for (name, addr) in bindings {
            self.register(&name, &addr);
        }
    }

    /// Replace the whole registry: afterwards exactly the given bindings
    ///  (and their reverse entries) exist.
    pub fn replace_all(&self, bindings: impl IntoIterator<Item = (String, String)>) {
        let mut entries = self.entries.write().unwrap();
        entries.clear();
        for (name, addr) in bindings {
            entries.insert(addr.clone(), name.clone());
            entries.insert(name, addr);
        }
    }
}

//! Kernel sources and loaded module/function tables
//!
//! [`KernelSources`] is the set of kernels the engine wants loaded on every
//! device, by name. Custom ops add themselves with [`KernelSources::register`]
//! and the whole set is handed to the registry when it is constructed, which
//! makes "register before init" hold by construction.
//!
//! [`KernelTables`] holds what the module loader produced: per kernel name,
//! one module and one function handle per device.

use std::collections::HashMap;

/// Opaque handle to a loaded code module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

/// Opaque handle to a kernel entry point inside a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub u64);

/// Kernel name → kernel source text
#[derive(Debug, Clone, Default)]
pub struct KernelSources {
    sources: HashMap<String, String>,
}

impl KernelSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the source for `name`
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        if self.sources.insert(name.clone(), source.into()).is_some() {
            tracing::debug!(kernel = %name, "kernel source replaced");
        }
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.register(name, source);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sources.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Loaded modules and functions, indexed by name then by device
#[derive(Debug, Clone, Default)]
pub struct KernelTables {
    modules: HashMap<String, Vec<ModuleHandle>>,
    functions: HashMap<String, Vec<FunctionHandle>>,
}

impl KernelTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_module(&mut self, name: impl Into<String>, per_device: Vec<ModuleHandle>) {
        self.modules.insert(name.into(), per_device);
    }

    pub fn insert_function(&mut self, name: impl Into<String>, per_device: Vec<FunctionHandle>) {
        self.functions.insert(name.into(), per_device);
    }

    pub fn has_func(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Function handle for `name` on device index `device`
    pub fn function(&self, name: &str, device: usize) -> Option<FunctionHandle> {
        self.functions.get(name)?.get(device).copied()
    }

    pub fn modules(&self) -> &HashMap<String, Vec<ModuleHandle>> {
        &self.modules
    }

    pub fn functions(&self) -> &HashMap<String, Vec<FunctionHandle>> {
        &self.functions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_replace() {
        let mut sources = KernelSources::new();
        sources.register("add_f32", "v1");
        sources.register("add_f32", "v2");

        assert_eq!(sources.len(), 1);
        assert_eq!(sources.get("add_f32"), Some("v2"));
        assert!(!sources.contains("mul_f32"));
    }

    #[test]
    fn test_function_lookup_by_device() {
        let mut tables = KernelTables::new();
        tables.insert_function("add_f32", vec![FunctionHandle(10), FunctionHandle(11)]);

        assert!(tables.has_func("add_f32"));
        assert_eq!(tables.function("add_f32", 1), Some(FunctionHandle(11)));
        assert_eq!(tables.function("add_f32", 2), None);
        assert_eq!(tables.function("sub_f32", 0), None);
    }
}

//! Function registry.
//!
//! Maps the short names stored in job payloads to the functions a worker can
//! run. The host application builds one before starting any worker and hands
//! it over behind an `Arc`; there is no way to change it afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::{Arguments, Value};
use crate::error::{Error, Result};

/// A registered job function.
///
/// Runs on a blocking thread; errors become a failed job with the error's
/// message and cause chain recorded.
pub type JobFn = Arc<dyn Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static>;

/// Registry of job functions, indexed by name.
#[derive(Clone, Default)]
pub struct Registry {
    functions: HashMap<String, JobFn>,
}

impl Registry {
    /// Create an empty registry with no functions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function under `name`. A later registration of the same name
    /// replaces the earlier one.
    pub fn register<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Look up a function by name.
    pub fn get(&self, name: &str) -> Option<&JobFn> {
        self.functions.get(name)
    }

    /// Look up a function by name, failing with `FunctionNotRegistered`.
    pub fn resolve(&self, name: &str) -> Result<JobFn> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::FunctionNotRegistered(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Registry {
        Registry::new()
            .register("add", |args: Arguments| {
                Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
            })
            .register("noop", |_| Ok(Value::Null))
    }

    #[test]
    fn resolves_registered_functions() {
        let registry = registry();
        let add = registry.resolve("add").unwrap();
        let out = add(Arguments::new().arg(2).arg(3)).unwrap();
        assert_eq!(out, json!(5));
        assert_eq!(registry.names(), vec!["add", "noop"]);
    }

    #[test]
    fn unknown_name_is_function_not_registered() {
        let err = registry().resolve("missing").err().unwrap();
        assert!(matches!(err, Error::FunctionNotRegistered(name) if name == "missing"));
    }

    #[test]
    fn independent_registries_do_not_share_state() {
        let a = Registry::new().register("only_a", |_| Ok(Value::Null));
        let b = Registry::new();
        assert!(a.contains("only_a"));
        assert!(!b.contains("only_a"));
        assert!(b.is_empty());
    }
}

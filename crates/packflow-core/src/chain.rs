use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::merge::deep_merge;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no configuration registered under name '{0}'")]
    NotFound(String),
    #[error("a configuration named '{0}' is already registered")]
    Duplicate(String),
    #[error("configuration is not attached to a registry")]
    Detached,
}

struct ChainState {
    value: Value,
    registry: Option<Weak<RefCell<Vec<ConfigEntry>>>>,
}

/// An opaque, fluent configuration builder keyed by convention.
///
/// Clones share one underlying tree, so the handle held by the registry and
/// the handles held by plugins observe each other's mutations. The whole
/// engine is single-threaded, hence `Rc<RefCell>`.
#[derive(Clone)]
pub struct ChainableConfig {
    state: Rc<RefCell<ChainState>>,
}

impl ChainableConfig {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            state: Rc::new(RefCell::new(ChainState {
                value,
                registry: None,
            })),
        }
    }

    /// Sets a value at a dotted path, creating intermediate objects.
    /// A scalar in an intermediate position is overwritten by an object.
    pub fn set(&self, path: &str, value: Value) -> &Self {
        set_path(&mut self.state.borrow_mut().value, path, value);
        self
    }

    /// Removes the value at a dotted path, if present.
    pub fn remove(&self, path: &str) -> &Self {
        remove_path(&mut self.state.borrow_mut().value, path);
        self
    }

    /// Deep-merges `overlay` into the tree.
    pub fn merge(&self, overlay: Value) -> &Self {
        deep_merge(&mut self.state.borrow_mut().value, &overlay);
        self
    }

    /// Returns a clone of the value at a dotted path.
    pub fn value_at(&self, path: &str) -> Option<Value> {
        let state = self.state.borrow();
        let mut current = &state.value;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current.clone())
    }

    /// Snapshots the built configuration, ready to hand to the bundler.
    pub fn to_config(&self) -> Value {
        self.state.borrow().value.clone()
    }

    /// Looks up a sibling configuration registered under `name` in the same
    /// Context. Fails loudly: callers rely on the returned tree's real
    /// structure, so an unknown name never yields an empty default.
    pub fn get(&self, name: &str) -> Result<ChainableConfig, RegistryError> {
        let registry = self
            .state
            .borrow()
            .registry
            .clone()
            .ok_or(RegistryError::Detached)?;
        let entries = registry.upgrade().ok_or(RegistryError::Detached)?;
        let entries = entries.borrow();
        entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.chain_config.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    fn attach(&self, registry: Weak<RefCell<Vec<ConfigEntry>>>) {
        self.state.borrow_mut().registry = Some(registry);
    }
}

impl Default for ChainableConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChainableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChainableConfig")
            .field(&self.state.borrow().value)
            .finish()
    }
}

/// A named configuration owned by the registry.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub name: String,
    pub chain_config: ChainableConfig,
}

/// Insertion-ordered registry of named configurations.
///
/// Cloning yields another handle to the same registry; the Context keeps
/// one and hands short-lived ones to the plugin capability surface.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    entries: Rc<RefCell<Vec<ConfigEntry>>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a configuration and attaches the sibling-lookup link to it.
    /// Duplicate names are rejected: a second registration would make
    /// name-based lookup ambiguous.
    pub fn register(&self, name: &str, chain_config: ChainableConfig) -> Result<(), RegistryError> {
        let mut entries = self.entries.borrow_mut();
        if entries.iter().any(|entry| entry.name == name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        chain_config.attach(Rc::downgrade(&self.entries));
        debug!("registered configuration '{}'", name);
        entries.push(ConfigEntry {
            name: name.to_string(),
            chain_config,
        });
        Ok(())
    }

    /// The first-registered configuration, canonical for chain mutations
    /// and output cleanup.
    pub fn first(&self) -> Option<ChainableConfig> {
        self.entries
            .borrow()
            .first()
            .map(|entry| entry.chain_config.clone())
    }

    /// All entries in registration order.
    pub fn entries(&self) -> Vec<ConfigEntry> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just coerced to an object"),
    }
}

fn split_last(path: &str) -> (&str, &str) {
    match path.rsplit_once('.') {
        Some((parents, last)) => (parents, last),
        None => ("", path),
    }
}

fn set_path(root: &mut Value, path: &str, value: Value) {
    let (parents, last) = split_last(path);
    let mut current = root;
    if !parents.is_empty() {
        for segment in parents.split('.') {
            current = ensure_object(current)
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
    }
    ensure_object(current).insert(last.to_string(), value);
}

fn remove_path(root: &mut Value, path: &str) {
    let (parents, last) = split_last(path);
    let mut current = root;
    if !parents.is_empty() {
        for segment in parents.split('.') {
            match current {
                Value::Object(map) => match map.get_mut(segment) {
                    Some(next) => current = next,
                    None => return,
                },
                _ => return,
            }
        }
    }
    if let Value::Object(map) = current {
        map.remove(last);
    }
}

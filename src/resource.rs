//! Resource database for looking up string settings by name and class.
//!
//! Lookups consult the override table, then the persistent stores in order, then the built-in
//! defaults. Keys are matched ignoring ASCII case.

use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    vec::Vec,
};

use ahash::RandomState;
use indexmap::IndexMap;
use log::{debug, trace};

#[cfg(feature = "std")]
use crate::errors::*;

/// Default attribute values, keyed relative to the application name.
const SYSTEM_DEFAULT_RESOURCES: &[(&str, &str)] = &[
    ("foreground", "SystemWindowText"),
    ("background", "SystemWindow"),
    ("tooltip.attributeForeground", "SystemInfoText"),
    ("tooltip.attributeBackground", "SystemInfoWindow"),
    ("tool-bar.attributeForeground", "SystemButtonText"),
    ("tool-bar.attributeBackground", "SystemButtonFace"),
    ("tab-bar.attributeForeground", "SystemButtonText"),
    ("tab-bar.attributeBackground", "SystemButtonFace"),
    ("menu.attributeForeground", "SystemMenuText"),
    ("menu.attributeBackground", "SystemMenu"),
    ("scroll-bar.attributeForeground", "SystemScrollbar"),
];

/// A persistent store of resource values.
pub trait ConfigStore {
    /// Returns the value stored under the key, matched ignoring ASCII case.
    fn get(&self, key: &str) -> Option<String>;
}

/// Table of resource values with case-insensitive keys.
///
/// Parsed from `name:value` lines. The first entry for a name wins, lines without a separator
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: IndexMap<String, String, RandomState>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Parse a table from `name:value` lines.
    pub fn parse(text: &str) -> Self {
        let mut store = Self::new();
        for line in text.lines() {
            match line.split_once(':') {
                Some((name, value)) => store.insert(name, value),
                None => trace!("ignoring resource line {:?}", line),
            }
        }
        store
    }

    /// Insert a value unless the name already has one.
    pub fn insert(&mut self, name: &str, value: &str) {
        self.values.entry(name.to_ascii_lowercase()).or_insert_with(|| value.to_string());
    }

    pub fn len(&self) -> usize { self.values.len() }

    pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(&key.to_ascii_lowercase()).cloned()
    }
}

/// Store backed by a file of `name:value` lines.
#[cfg(feature = "std")]
#[derive(Debug, Clone)]
pub struct FileStore {
    store: MemoryStore,
}

#[cfg(feature = "std")]
impl FileStore {
    /// Load the store from a file. A missing file is an empty store.
    ///
    /// # Returns
    /// Returns an error naming the file if it exists but could not be read.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ResourceError> {
        let path = path.as_ref();
        let store = match std::fs::read_to_string(path) {
            Ok(text) => MemoryStore::parse(&text),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("resource store {} does not exist", path.display());
                MemoryStore::new()
            }
            Err(source) => {
                return Err(ResourceError::IOError {
                    file: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Self { store })
    }
}

#[cfg(feature = "std")]
impl ConfigStore for FileStore {
    fn get(&self, key: &str) -> Option<String> { self.store.get(key) }
}

/// Layered resource database.
pub struct ResourceDatabase {
    overrides:      MemoryStore,
    stores:         Vec<Box<dyn ConfigStore>>,
    defaults:       MemoryStore,
    inhibit_stores: bool,
}

impl ResourceDatabase {
    /// Create a database with the default values for the application name.
    pub fn new(application: &str) -> Self {
        let mut defaults = MemoryStore::new();
        for (key, value) in SYSTEM_DEFAULT_RESOURCES {
            defaults.insert(&format!("{}.{}", application, key), value);
        }
        Self {
            overrides: MemoryStore::new(),
            stores: Vec::new(),
            defaults,
            inhibit_stores: false,
        }
    }

    /// Set the override table consulted before all stores.
    pub fn with_overrides(mut self, overrides: MemoryStore) -> Self {
        self.overrides = overrides;
        self
    }

    /// Add a store consulted after the stores added before it, per-user stores first.
    pub fn with_store<S: ConfigStore + 'static>(mut self, store: S) -> Self {
        self.stores.push(Box::new(store));
        self
    }

    /// Skip the stores and the defaults, leaving only the override table.
    pub fn set_inhibit_stores(&mut self, inhibit: bool) { self.inhibit_stores = inhibit; }

    /// Look up a resource by its name, falling back to its class.
    ///
    /// The defaults are only consulted by name.
    pub fn lookup(&self, name: &str, class: &str) -> Option<String> {
        let value = self
            .overrides
            .get(name)
            .or_else(|| self.overrides.get(class))
            .or_else(|| {
                if self.inhibit_stores {
                    return None;
                }
                self.stores
                    .iter()
                    .find_map(|store| store.get(name).or_else(|| store.get(class)))
                    .or_else(|| self.defaults.get(name))
            });
        debug!("resource {} ({}): {:?}", name, class, value);
        value
    }
}

// src/merge/handlers.rs

//! Label value merge algorithms
//!
//! When source and target both carry a volatile label with the same name,
//! the two values are combined by the algorithm the label declares. In all
//! algorithms the *local* value is the one being transferred (source) and
//! the *inbound* value is the one already stored in the target.
//!
//! Registered algorithms:
//! - `default`: local value overwrites
//! - `simpleListMerge`: inbound list plus local entries not yet present
//! - `simpleMapMerge`: key union, conflicts resolved by `mode`
//! - `mapListMerge`: list of maps keyed by `keyField`, conflicts resolved by
//!   `mode` or a nested `entries` algorithm

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::descriptor::MergeAlgorithmSpec;
use crate::error::{Error, Result};

pub const DEFAULT: &str = "default";
pub const SIMPLE_LIST_MERGE: &str = "simpleListMerge";
pub const SIMPLE_MAP_MERGE: &str = "simpleMapMerge";
pub const MAP_LIST_MERGE: &str = "mapListMerge";

/// Conflict resolution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Conflicting values are an error
    #[default]
    None,
    /// The transferred value wins
    Local,
    /// The value already in the target wins
    Inbound,
}

impl MergeMode {
    fn resolve(self, algorithm: &str, key: &str, local: &Value, inbound: &Value) -> Result<Value> {
        match self {
            MergeMode::None => Err(Error::MergeError(format!(
                "[{}]: target value for \"{}\" changed",
                algorithm, key
            ))),
            MergeMode::Local => Ok(local.clone()),
            MergeMode::Inbound => Ok(inbound.clone()),
        }
    }
}

/// One value merge algorithm
pub trait ValueMergeHandler: Send + Sync {
    /// Registered algorithm name
    fn algorithm(&self) -> &'static str;

    /// Merge `local` into `inbound`
    fn merge(
        &self,
        registry: &MergeHandlerRegistry,
        local: &Value,
        inbound: &Value,
        config: Option<&Value>,
    ) -> Result<Value>;
}

fn parse_config<T: for<'de> Deserialize<'de> + Default>(
    algorithm: &str,
    config: Option<&Value>,
) -> Result<T> {
    match config {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| Error::MergeError(format!("[{}] invalid config: {}", algorithm, e))),
    }
}

/// Local value overwrites
#[derive(Debug, Default)]
pub struct DefaultMerge;

impl ValueMergeHandler for DefaultMerge {
    fn algorithm(&self) -> &'static str {
        DEFAULT
    }

    fn merge(
        &self,
        _registry: &MergeHandlerRegistry,
        local: &Value,
        _inbound: &Value,
        _config: Option<&Value>,
    ) -> Result<Value> {
        Ok(local.clone())
    }
}

/// Inbound list extended by unseen local entries
#[derive(Debug, Default)]
pub struct SimpleListMerge;

impl ValueMergeHandler for SimpleListMerge {
    fn algorithm(&self) -> &'static str {
        SIMPLE_LIST_MERGE
    }

    fn merge(
        &self,
        _registry: &MergeHandlerRegistry,
        local: &Value,
        inbound: &Value,
        _config: Option<&Value>,
    ) -> Result<Value> {
        let local = as_array(SIMPLE_LIST_MERGE, "local", local)?;
        let mut merged = as_array(SIMPLE_LIST_MERGE, "inbound", inbound)?.clone();
        for entry in local {
            if !merged.contains(entry) {
                merged.push(entry.clone());
            }
        }
        Ok(Value::Array(merged))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SimpleMapConfig {
    mode: MergeMode,
    entries: Option<MergeAlgorithmSpec>,
}

/// Key union of two JSON objects
#[derive(Debug, Default)]
pub struct SimpleMapMerge;

impl ValueMergeHandler for SimpleMapMerge {
    fn algorithm(&self) -> &'static str {
        SIMPLE_MAP_MERGE
    }

    fn merge(
        &self,
        registry: &MergeHandlerRegistry,
        local: &Value,
        inbound: &Value,
        config: Option<&Value>,
    ) -> Result<Value> {
        let cfg: SimpleMapConfig = parse_config(SIMPLE_MAP_MERGE, config)?;
        let local = as_object(SIMPLE_MAP_MERGE, "local", local)?;
        let mut merged = as_object(SIMPLE_MAP_MERGE, "inbound", inbound)?.clone();

        for (key, value) in local {
            let resolved = match merged.get(key) {
                None => value.clone(),
                Some(existing) if existing == value => continue,
                Some(existing) => match &cfg.entries {
                    Some(spec) => registry.merge(Some(spec), value, existing)?,
                    None => cfg.mode.resolve(SIMPLE_MAP_MERGE, key, value, existing)?,
                },
            };
            merged.insert(key.clone(), resolved);
        }
        Ok(Value::Object(merged))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MapListConfig {
    key_field: String,
    mode: MergeMode,
    entries: Option<MergeAlgorithmSpec>,
}

impl Default for MapListConfig {
    fn default() -> Self {
        Self {
            key_field: "name".to_string(),
            mode: MergeMode::None,
            entries: None,
        }
    }
}

/// Lists of maps matched by a key field
#[derive(Debug, Default)]
pub struct MapListMerge;

impl ValueMergeHandler for MapListMerge {
    fn algorithm(&self) -> &'static str {
        MAP_LIST_MERGE
    }

    fn merge(
        &self,
        registry: &MergeHandlerRegistry,
        local: &Value,
        inbound: &Value,
        config: Option<&Value>,
    ) -> Result<Value> {
        let mut cfg: MapListConfig = parse_config(MAP_LIST_MERGE, config)?;
        if cfg.key_field.is_empty() {
            cfg.key_field = "name".to_string();
        }
        let local = as_array(MAP_LIST_MERGE, "local", local)?;
        let mut merged = as_array(MAP_LIST_MERGE, "inbound", inbound)?.clone();

        for entry in local {
            let key = entry_key(&cfg.key_field, entry)?;
            let position = merged
                .iter()
                .position(|m| entry_key(&cfg.key_field, m).ok().as_deref() == Some(key.as_str()));
            match position {
                None => merged.push(entry.clone()),
                Some(i) if &merged[i] == entry => {}
                Some(i) => {
                    let resolved = match &cfg.entries {
                        Some(spec) => registry.merge(Some(spec), entry, &merged[i])?,
                        None => cfg.mode.resolve(MAP_LIST_MERGE, &key, entry, &merged[i])?,
                    };
                    merged[i] = resolved;
                }
            }
        }
        Ok(Value::Array(merged))
    }
}

fn entry_key(field: &str, entry: &Value) -> Result<String> {
    match entry.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(Error::MergeError(format!(
            "[{}] entry without key field \"{}\"",
            MAP_LIST_MERGE, field
        ))),
    }
}

fn as_array<'a>(algorithm: &str, side: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| {
        Error::MergeError(format!("[{}] {} value is not a list", algorithm, side))
    })
}

fn as_object<'a>(algorithm: &str, side: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        Error::MergeError(format!("[{}] {} value is not a map", algorithm, side))
    })
}

/// Merge algorithms by name
pub struct MergeHandlerRegistry {
    handlers: BTreeMap<&'static str, Box<dyn ValueMergeHandler>>,
}

impl MergeHandlerRegistry {
    /// Registry without any algorithm
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with the built-in algorithms
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(DefaultMerge));
        registry.register(Box::new(SimpleListMerge));
        registry.register(Box::new(SimpleMapMerge));
        registry.register(Box::new(MapListMerge));
        registry
    }

    /// Add or replace an algorithm
    pub fn register(&mut self, handler: Box<dyn ValueMergeHandler>) {
        self.handlers.insert(handler.algorithm(), handler);
    }

    pub fn get(&self, algorithm: &str) -> Option<&dyn ValueMergeHandler> {
        self.handlers.get(algorithm).map(|h| h.as_ref())
    }

    /// Registered algorithm names
    pub fn algorithms(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Merge two values with the given algorithm, `default` when unspecified
    pub fn merge(
        &self,
        spec: Option<&MergeAlgorithmSpec>,
        local: &Value,
        inbound: &Value,
    ) -> Result<Value> {
        let (name, config) = match spec {
            Some(spec) => (spec.algorithm.as_str(), spec.config.as_ref()),
            None => (DEFAULT, None),
        };
        let handler = self
            .get(name)
            .ok_or_else(|| Error::MergeError(format!("unknown merge algorithm {}", name)))?;
        handler.merge(self, local, inbound, config)
    }
}

impl Default for MergeHandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Process-wide registry with the built-in algorithms
pub fn default_registry() -> &'static MergeHandlerRegistry {
    static REGISTRY: OnceLock<MergeHandlerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(MergeHandlerRegistry::with_defaults)
}

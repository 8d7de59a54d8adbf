//! Process-wide table of quantization algorithms and layout classes.
//!
//! Plugins receive the registry explicitly and update it through
//! [`AlgoRegistry::register_or_update`], which only touches the fields the
//! caller owns.

use crate::error::{QuantError, Result};
use crate::layout::Layout;
use crate::tensor::DType;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoConfig {
    /// Element type of the stored data.
    pub storage: DType,
    /// Names of the side tensors the algorithm carries.
    pub parameters: BTreeSet<String>,
    /// Layout class name, resolved through [`AlgoRegistry::layout`].
    pub layout: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Storage,
    /// Merged as a set union; names registered by others are kept.
    Parameters,
    Layout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Updated(Vec<Field>),
    Unchanged,
}

/// Result of [`AlgoRegistry::register_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutOutcome {
    Inserted,
    /// A different instance was registered under the same name.
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub algos: BTreeMap<String, AlgoConfig>,
    pub layouts: BTreeSet<String>,
}

#[derive(Default)]
pub struct AlgoRegistry {
    algos: RwLock<BTreeMap<String, AlgoConfig>>,
    layouts: RwLock<BTreeMap<String, Arc<dyn Layout>>>,
}

fn poisoned<T>(_: T) -> QuantError { QuantError::Registration("registry lock poisoned".to_string()) }

impl AlgoRegistry {
    pub fn new() -> Self { Self::default() }

    /// Insert `config` under `key`, or patch the `owned` fields of an existing entry.
    pub fn register_or_update(&self, key: &str, config: AlgoConfig, owned: &[Field]) -> Result<Outcome> {
        let mut algos = self.algos.write().map_err(poisoned)?;
        let Some(existing) = algos.get_mut(key) else {
            debug!("registry: inserting algo {}", key);
            algos.insert(key.to_string(), config);
            return Ok(Outcome::Inserted);
        };
        let mut changed = Vec::new();
        for field in owned.iter().copied().collect::<BTreeSet<_>>() {
            match field {
                Field::Storage if existing.storage != config.storage => {
                    existing.storage = config.storage;
                    changed.push(field);
                }
                Field::Layout if existing.layout != config.layout => {
                    existing.layout = config.layout.clone();
                    changed.push(field);
                }
                Field::Parameters if !config.parameters.is_subset(&existing.parameters) => {
                    existing.parameters.extend(config.parameters.iter().cloned());
                    changed.push(field);
                }
                _ => {}
            }
        }
        if changed.is_empty() {
            Ok(Outcome::Unchanged)
        } else {
            debug!("registry: updated {:?} of algo {}", changed, key);
            Ok(Outcome::Updated(changed))
        }
    }

    pub fn algo(&self, key: &str) -> Option<AlgoConfig> {
        self.algos.read().ok()?.get(key).cloned()
    }

    /// Register a layout class by its name; re-registering the same instance is a no-op.
    pub fn register_layout(&self, layout: Arc<dyn Layout>) -> Result<LayoutOutcome> {
        let mut layouts = self.layouts.write().map_err(poisoned)?;
        let name = layout.name().to_string();
        match layouts.get(&name) {
            Some(existing) if Arc::ptr_eq(existing, &layout) => Ok(LayoutOutcome::Unchanged),
            Some(_) => {
                debug!("registry: replacing layout {}", name);
                layouts.insert(name, layout);
                Ok(LayoutOutcome::Replaced)
            }
            None => {
                layouts.insert(name, layout);
                Ok(LayoutOutcome::Inserted)
            }
        }
    }

    pub fn layout(&self, name: &str) -> Option<Arc<dyn Layout>> {
        self.layouts.read().ok()?.get(name).cloned()
    }

    /// Layout bound to algorithm `key`.
    pub fn layout_for_algo(&self, key: &str) -> Result<Arc<dyn Layout>> {
        let cfg = self.algo(key).ok_or_else(|| QuantError::UnknownLayout(format!("no algorithm registered as {}", key)))?;
        self.layout(&cfg.layout).ok_or(QuantError::UnknownLayout(cfg.layout))
    }

    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        let algos = self.algos.read().map_err(poisoned)?.clone();
        let layouts = self.layouts.read().map_err(poisoned)?.keys().cloned().collect();
        Ok(RegistrySnapshot { algos, layouts })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot()?).map_err(|e| QuantError::Registration(e.to_string()))
    }
}

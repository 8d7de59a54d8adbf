use crate::error::{QuantError, Result};
use crate::ops::LinearOp;
use crate::tensor::{FloatTensor, Tensor};
use std::collections::BTreeMap;

/// Checkpoint contents: tensors by key, plus per-layer quantization tags
/// (`layer prefix -> algorithm`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    tensors: BTreeMap<String, Tensor>,
    quant_tags: BTreeMap<String, String>,
}

impl StateDict {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, key: impl Into<String>, t: impl Into<Tensor>) {
        self.tensors.insert(key.into(), t.into());
    }

    /// Add every entry of a layout storage map under `prefix`.
    pub fn insert_layout_tensors(&mut self, prefix: &str, entries: BTreeMap<String, Tensor>) {
        for (suffix, t) in entries {
            self.tensors.insert(crate::layout::qualified_key(prefix, &suffix), t);
        }
    }

    pub fn tag(&mut self, prefix: impl Into<String>, algo: impl Into<String>) {
        self.quant_tags.insert(prefix.into(), algo.into());
    }

    pub fn quant_tag(&self, prefix: &str) -> Option<&str> { self.quant_tags.get(prefix).map(|s| s.as_str()) }

    pub fn get(&self, key: &str) -> Option<&Tensor> { self.tensors.get(key) }
    pub fn contains(&self, key: &str) -> bool { self.tensors.contains_key(key) }
    pub fn len(&self) -> usize { self.tensors.len() }
    pub fn is_empty(&self) -> bool { self.tensors.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.tensors.keys().map(|k| k.as_str()) }

    pub fn float(&self, key: &str) -> Option<&FloatTensor> { self.get(key).and_then(Tensor::as_float) }

    /// Prefixes of every 2D `<prefix>weight` entry, i.e. the linear layers.
    pub fn linear_prefixes(&self) -> Vec<String> {
        self.tensors
            .iter()
            .filter(|(_, t)| t.shape().len() == 2)
            .filter_map(|(k, _)| k.strip_suffix("weight").map(|p| p.to_string()))
            .filter(|p| p.is_empty() || p.ends_with('.'))
            .collect()
    }
}

/// A loaded diffusion model: its linear layers by prefix, plus every other tensor.
#[derive(Debug, Default)]
pub struct DiffusionModel {
    pub name: String,
    layers: BTreeMap<String, Box<dyn LinearOp>>,
    others: BTreeMap<String, Tensor>,
}

impl DiffusionModel {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), ..Default::default() } }

    pub fn insert_layer(&mut self, prefix: impl Into<String>, op: Box<dyn LinearOp>) {
        self.layers.insert(prefix.into(), op);
    }

    pub fn insert_tensor(&mut self, key: impl Into<String>, t: Tensor) {
        self.others.insert(key.into(), t);
    }

    pub fn layer(&self, prefix: &str) -> Option<&dyn LinearOp> { self.layers.get(prefix).map(|b| b.as_ref()) }

    pub fn layers(&self) -> impl Iterator<Item = (&str, &dyn LinearOp)> {
        self.layers.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn tensor(&self, key: &str) -> Option<&Tensor> { self.others.get(key) }

    /// Layers running through an operator of the given kind.
    pub fn count_kind(&self, kind: &str) -> usize { self.layers.values().filter(|l| l.kind() == kind).count() }

    pub fn forward_layer(&self, prefix: &str, x: &FloatTensor) -> Result<FloatTensor> {
        self.layer(prefix)
            .ok_or_else(|| QuantError::MissingTensor(format!("{}weight", prefix)))?
            .forward(x)
    }
}

/// Where the loader node gets checkpoints from.
pub trait CheckpointSource {
    fn names(&self) -> Vec<String>;
    fn state_dict(&self, name: &str) -> Result<StateDict>;
}

/// In-memory checkpoints, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    checkpoints: BTreeMap<String, StateDict>,
}

impl MemorySource {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, name: impl Into<String>, sd: StateDict) { self.checkpoints.insert(name.into(), sd); }
}

impl CheckpointSource for MemorySource {
    fn names(&self) -> Vec<String> { self.checkpoints.keys().cloned().collect() }

    fn state_dict(&self, name: &str) -> Result<StateDict> {
        self.checkpoints.get(name).cloned().ok_or_else(|| QuantError::CheckpointNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DType, Int8Tensor};

    #[test]
    fn linear_prefixes_skip_non_matrix_and_scale_keys() {
        let mut sd = StateDict::new();
        sd.insert("blocks.0.qkv.weight", Int8Tensor::new(vec![2, 2], vec![0; 4]).unwrap());
        sd.insert("blocks.0.qkv.weight_scale", FloatTensor::scalar(1.0));
        sd.insert("norm.weight", FloatTensor::zeros(vec![4], DType::F32));
        sd.insert("proj_weight", FloatTensor::zeros(vec![2, 2], DType::F32));
        assert_eq!(sd.linear_prefixes(), vec!["blocks.0.qkv.".to_string()]);
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let src = MemorySource::new();
        assert_eq!(src.state_dict("nope"), Err(QuantError::CheckpointNotFound("nope".into())));
    }
}

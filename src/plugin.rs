//! Host integration: capability detection, layout registration and the
//! loader node exposed to the node graph.

use crate::config::QuantConfig;
use crate::device::Device;
use crate::error::{QuantError, Result};
use crate::layout::{dequantized_operator, qualified_key, Int8TensorwiseLayout, Layout, INPUT_SCALE_KEY, PRIMARY_KEY, WEIGHT_SCALE_KEY};
use crate::model::{CheckpointSource, DiffusionModel, StateDict};
use crate::ops::{DenseLinear, LinearOp};
use crate::registry::{AlgoConfig, AlgoRegistry, Field, Outcome};
use crate::tensor::{DType, FloatTensor, Tensor};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const LOADER_NODE_ID: &str = "OTUNetLoaderW8A8";

/// What the host exposes to plugins.
pub trait HostApi {
    /// The quantization registry; `None` on hosts that predate it.
    fn quant_registry(&self) -> Option<Arc<AlgoRegistry>>;
    /// Whether custom layout classes can be registered.
    fn supports_layout_classes(&self) -> bool;
}

/// A host living in this process, used by the CLI and tests.
pub struct InProcessHost {
    registry: Option<Arc<AlgoRegistry>>,
    layout_classes: bool,
}

impl InProcessHost {
    pub fn new() -> Self { Self { registry: Some(Arc::new(AlgoRegistry::new())), layout_classes: true } }

    pub fn with_registry(registry: Arc<AlgoRegistry>) -> Self { Self { registry: Some(registry), layout_classes: true } }

    /// Host without a quantization API at all.
    pub fn legacy() -> Self { Self { registry: None, layout_classes: false } }

    /// Host with a registry but no layout class support.
    pub fn without_layout_classes(registry: Arc<AlgoRegistry>) -> Self { Self { registry: Some(registry), layout_classes: false } }
}

impl Default for InProcessHost {
    fn default() -> Self { Self::new() }
}

impl HostApi for InProcessHost {
    fn quant_registry(&self) -> Option<Arc<AlgoRegistry>> { self.registry.clone() }
    fn supports_layout_classes(&self) -> bool { self.layout_classes }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub quant_registry: bool,
    pub layout_classes: bool,
}

impl Capabilities {
    pub fn detect(host: &dyn HostApi) -> Self {
        Self { quant_registry: host.quant_registry().is_some(), layout_classes: host.supports_layout_classes() }
    }

    pub fn can_register(&self) -> bool { self.quant_registry && self.layout_classes }

    fn missing(&self) -> Option<QuantError> {
        if !self.quant_registry {
            Some(QuantError::MissingDependency("quantization registry".to_string()))
        } else if !self.layout_classes {
            Some(QuantError::MissingDependency("layout class registration".to_string()))
        } else {
            None
        }
    }
}

/// Algorithm entry this plugin owns.
pub fn int8_tensorwise_config() -> AlgoConfig {
    AlgoConfig {
        storage: DType::I8,
        parameters: [WEIGHT_SCALE_KEY, INPUT_SCALE_KEY].iter().map(|s| s.to_string()).collect(),
        layout: Int8TensorwiseLayout.name().to_string(),
    }
}

/// Fields of the algorithm entry this plugin overwrites when another
/// registration got there first.
pub const OWNED_FIELDS: [Field; 3] = [Field::Storage, Field::Parameters, Field::Layout];

/// Register the layout class and the algorithm entry. Safe to repeat.
pub fn register_layouts(registry: &AlgoRegistry, config: &QuantConfig) -> Result<Outcome> {
    registry.register_layout(layout_instance())?;
    registry.register_or_update(&config.algo, int8_tensorwise_config(), &OWNED_FIELDS)
}

fn layout_instance() -> Arc<dyn Layout> {
    use std::sync::OnceLock;
    static LAYOUT: OnceLock<Arc<dyn Layout>> = OnceLock::new();
    LAYOUT.get_or_init(|| Arc::new(Int8TensorwiseLayout) as Arc<dyn Layout>).clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    UnetLoaderW8A8,
}

/// Result of plugin initialization.
pub struct PluginState {
    pub capabilities: Capabilities,
    pub registered: bool,
    registry: Option<Arc<AlgoRegistry>>,
    config: QuantConfig,
}

/// Detect host capabilities and register with the host. Never fails: a
/// missing or broken host API leaves the plugin disabled.
pub fn init(host: &dyn HostApi, config: QuantConfig) -> PluginState {
    let capabilities = Capabilities::detect(host);
    let registry = host.quant_registry();
    let registered = match (capabilities.missing(), registry.as_deref()) {
        (None, Some(reg)) => match register_layouts(reg, &config) {
            Ok(outcome) => {
                info!("Int8-Quant: Registered {} ({:?})", Int8TensorwiseLayout.name(), outcome);
                true
            }
            Err(e) => {
                error!("Int8-Quant: Error registering layout: {}", e);
                false
            }
        },
        (Some(e), _) => {
            warn!("Int8-Quant: Failed to register layout, host too old? {}", e);
            false
        }
        (None, None) => false,
    };
    PluginState { capabilities, registered, registry, config }
}

impl PluginState {
    pub fn node_class_mappings(&self) -> BTreeMap<&'static str, NodeClass> {
        let mut m = BTreeMap::new();
        if self.registered { m.insert(LOADER_NODE_ID, NodeClass::UnetLoaderW8A8); }
        m
    }

    pub fn node_display_name_mappings(&self) -> BTreeMap<&'static str, String> {
        let mut m = BTreeMap::new();
        if self.registered { m.insert(LOADER_NODE_ID, self.config.display_name.clone()); }
        m
    }

    pub fn loader(&self) -> Option<UnetLoaderW8A8> {
        if !self.registered { return None; }
        let registry = self.registry.clone()?;
        Some(UnetLoaderW8A8 { registry, config: self.config.clone() })
    }
}

/// Node that loads a diffusion model and swaps tagged linear layers for
/// their quantized operator.
pub struct UnetLoaderW8A8 {
    registry: Arc<AlgoRegistry>,
    config: QuantConfig,
}

impl UnetLoaderW8A8 {
    pub fn new(registry: Arc<AlgoRegistry>, config: QuantConfig) -> Self { Self { registry, config } }

    pub fn display_name(&self) -> &str { &self.config.display_name }

    /// Checkpoints the node can offer.
    pub fn list(&self, source: &dyn CheckpointSource) -> Vec<String> { source.names() }

    pub fn load(&self, name: &str, source: &dyn CheckpointSource, device: Device, dtype: Option<DType>) -> Result<DiffusionModel> {
        let sd = source.state_dict(name)?;
        self.build(name, &sd, device, dtype)
    }

    pub fn build(&self, name: &str, sd: &StateDict, device: Device, dtype: Option<DType>) -> Result<DiffusionModel> {
        let mut model = DiffusionModel::new(name);
        let mut consumed: Vec<String> = Vec::new();
        for prefix in sd.linear_prefixes() {
            let wkey = qualified_key(&prefix, PRIMARY_KEY);
            let bkey = format!("{}bias", prefix);
            let bias = sd.float(&bkey).cloned();
            let op = match self.algo_for(&prefix, sd) {
                Some(algo) => {
                    consumed.extend([WEIGHT_SCALE_KEY, INPUT_SCALE_KEY].iter().map(|s| qualified_key(&prefix, s)));
                    self.quantized_layer(&algo, &prefix, sd, bias, device, dtype)?
                }
                None => {
                    let w = sd.float(&wkey).cloned().ok_or_else(|| QuantError::MissingTensor(wkey.clone()))?;
                    Box::new(DenseLinear::new(w, bias, dtype)?) as Box<dyn LinearOp>
                }
            };
            consumed.push(wkey);
            consumed.push(bkey);
            model.insert_layer(prefix, op);
        }
        for key in sd.keys().filter(|k| !consumed.iter().any(|c| c == k)) {
            if let Some(t) = sd.get(key) { model.insert_tensor(key, t.clone()); }
        }
        info!("Int8-Quant: loaded {} with {} quantized / {} dense linear layers",
            name, model.count_kind("int8_w8a8"), model.count_kind("dense"));
        Ok(model)
    }

    /// Algorithm for a layer: an explicit tag, else int8 weight with a scale sibling.
    fn algo_for(&self, prefix: &str, sd: &StateDict) -> Option<String> {
        if let Some(tag) = sd.quant_tag(prefix) { return Some(tag.to_string()); }
        let is_int8 = sd.get(&qualified_key(prefix, PRIMARY_KEY)).and_then(Tensor::as_int8).is_some();
        (is_int8 && sd.contains(&qualified_key(prefix, WEIGHT_SCALE_KEY))).then(|| self.config.algo.clone())
    }

    fn quantized_layer(&self, algo: &str, prefix: &str, sd: &StateDict, bias: Option<FloatTensor>, device: Device, dtype: Option<DType>) -> Result<Box<dyn LinearOp>> {
        let layout = self.registry.layout_for_algo(algo)?;
        let orig_dtype = dtype.unwrap_or(self.config.orig_dtype);
        let (qdata, params) = layout.load(prefix, sd, orig_dtype)?;
        let Some(factory) = layout.operator_factory() else {
            debug!("layout {} has no operator factory, dequantizing {}", layout.name(), prefix);
            return dequantized_operator(layout.as_ref(), &qdata, &params, bias, dtype);
        };
        let mut op = factory.build_operator(&params, device, dtype, bias.is_some(), &self.config)?;
        op.load_weights(qdata, params.scale.clone())?;
        if let Some(b) = bias { op.set_bias(b)?; }
        Ok(op.into_linear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_host_disables_plugin() {
        let state = init(&InProcessHost::legacy(), QuantConfig::default());
        assert!(!state.registered);
        assert!(state.node_class_mappings().is_empty());
        assert!(state.loader().is_none());
    }

    #[test]
    fn registry_without_layout_classes_is_left_untouched() {
        let reg = Arc::new(AlgoRegistry::new());
        let state = init(&InProcessHost::without_layout_classes(reg.clone()), QuantConfig::default());
        assert!(!state.registered);
        assert!(reg.algo("int8_tensorwise").is_none());
    }

    #[test]
    fn enabled_plugin_exposes_loader_node() {
        let state = init(&InProcessHost::new(), QuantConfig::default());
        assert!(state.capabilities.can_register());
        assert_eq!(state.node_display_name_mappings()[LOADER_NODE_ID], "Load Diffusion Model INT8 (W8A8)");
        assert_eq!(state.loader().map(|l| l.display_name().to_string()).as_deref(), Some("Load Diffusion Model INT8 (W8A8)"));
    }
}

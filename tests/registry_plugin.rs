use int8_w8a8::config::QuantConfig;
use int8_w8a8::error::Result;
use int8_w8a8::layout::{Layout, LayoutParams};
use int8_w8a8::model::StateDict;
use int8_w8a8::plugin::{self, register_layouts, InProcessHost, LOADER_NODE_ID};
use int8_w8a8::quant::QuantizedWeight;
use int8_w8a8::registry::{AlgoConfig, AlgoRegistry, Field, Outcome};
use int8_w8a8::tensor::{DType, FloatTensor, Tensor};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Layout that panics as soon as the registry asks for its name.
struct PanickingLayout;

impl Layout for PanickingLayout {
    fn name(&self) -> &'static str { panic!("layout name unavailable") }
    fn tensors_for_storage(&self, _: &QuantizedWeight, _: &LayoutParams) -> BTreeMap<String, Tensor> { BTreeMap::new() }
    fn dequantize(&self, q: &QuantizedWeight, _: &LayoutParams) -> Result<FloatTensor> { Ok(q.to_float()) }
    fn load(&self, _: &str, _: &StateDict, _: DType) -> Result<(QuantizedWeight, LayoutParams)> { unreachable!() }
}

#[test]
fn registration_is_idempotent() {
    let reg = AlgoRegistry::new();
    let cfg = QuantConfig::default();
    assert_eq!(register_layouts(&reg, &cfg).unwrap(), Outcome::Inserted);
    let once = reg.snapshot().unwrap();
    assert_eq!(register_layouts(&reg, &cfg).unwrap(), Outcome::Unchanged);
    let twice = reg.snapshot().unwrap();
    assert_eq!(once, twice);
}

#[test]
fn registered_entry_matches_host_contract() {
    let reg = AlgoRegistry::new();
    register_layouts(&reg, &QuantConfig::default()).unwrap();
    let entry = reg.algo("int8_tensorwise").unwrap();
    assert_eq!(entry.storage, DType::I8);
    assert_eq!(entry.layout, "Int8TensorwiseLayout");
    let params: Vec<&str> = entry.parameters.iter().map(|s| s.as_str()).collect();
    assert_eq!(params, vec!["input_scale", "weight_scale"]);
    assert!(reg.layout_for_algo("int8_tensorwise").is_ok());
}

#[test]
fn stub_entry_with_other_layout_is_patched() {
    let reg = AlgoRegistry::new();
    let stub = AlgoConfig {
        storage: DType::I8,
        parameters: ["weight_scale".to_string(), "other_plugin_param".to_string()].into_iter().collect(),
        layout: "TensorCoreStub".to_string(),
    };
    reg.register_or_update("int8_tensorwise", stub, &[]).unwrap();
    let out = register_layouts(&reg, &QuantConfig::default()).unwrap();
    assert_eq!(out, Outcome::Updated(vec![Field::Parameters, Field::Layout]));
    let entry = reg.algo("int8_tensorwise").unwrap();
    assert_eq!(entry.layout, "Int8TensorwiseLayout");
    assert!(entry.parameters.contains("other_plugin_param"), "foreign parameters survive");
    assert!(entry.parameters.contains("input_scale"));
}

#[test]
fn init_twice_on_same_host_never_fails() {
    let reg = Arc::new(AlgoRegistry::new());
    let host = InProcessHost::with_registry(reg.clone());
    let a = plugin::init(&host, QuantConfig::default());
    let snap = reg.snapshot().unwrap();
    let b = plugin::init(&host, QuantConfig::default());
    assert!(a.registered && b.registered);
    assert_eq!(snap, reg.snapshot().unwrap());
    assert_eq!(b.node_class_mappings().len(), 1);
    assert!(b.node_class_mappings().contains_key(LOADER_NODE_ID));
}

#[test]
fn legacy_host_degrades_to_noop() {
    let state = plugin::init(&InProcessHost::legacy(), QuantConfig::default());
    assert!(!state.capabilities.quant_registry);
    assert!(state.node_class_mappings().is_empty());
    assert!(state.node_display_name_mappings().is_empty());
}

#[test]
fn custom_display_name_and_algo_key() {
    let cfg = QuantConfig::from_json_str(r#"{ "algo": "int8_w8a8", "display_name": "INT8 Loader" }"#).unwrap();
    let reg = Arc::new(AlgoRegistry::new());
    let state = plugin::init(&InProcessHost::with_registry(reg.clone()), cfg);
    assert_eq!(state.node_display_name_mappings()[LOADER_NODE_ID], "INT8 Loader");
    assert!(reg.algo("int8_w8a8").is_some());
    assert!(reg.algo("int8_tensorwise").is_none());
}

#[test]
fn snapshot_serializes_to_json() {
    let reg = AlgoRegistry::new();
    register_layouts(&reg, &QuantConfig::default()).unwrap();
    let json = reg.to_json().unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["algos"]["int8_tensorwise"]["storage"], "i8");
    assert_eq!(v["algos"]["int8_tensorwise"]["layout"], "Int8TensorwiseLayout");
    assert_eq!(v["layouts"][0], "Int8TensorwiseLayout");
}

#[test]
fn registry_error_during_init_is_swallowed() {
    let reg = Arc::new(AlgoRegistry::new());
    let poison = panic::catch_unwind(AssertUnwindSafe(|| reg.register_layout(Arc::new(PanickingLayout))));
    assert!(poison.is_err());

    let state = plugin::init(&InProcessHost::with_registry(reg.clone()), QuantConfig::default());
    assert!(state.capabilities.can_register(), "host supports registration");
    assert!(!state.registered);
    assert!(state.node_class_mappings().is_empty());
    assert!(state.loader().is_none());
    assert!(reg.snapshot().is_err());
}

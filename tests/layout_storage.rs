use int8_w8a8::config::QuantConfig;
use int8_w8a8::device::Device;
use int8_w8a8::layout::{dequantized_operator, Int8TensorwiseLayout, Layout, LayoutParams};
use int8_w8a8::model::StateDict;
use int8_w8a8::ops::LinearOp;
use int8_w8a8::quant::{QuantizedOp, WeightScale};
use int8_w8a8::tensor::{DType, FloatTensor, Int8Tensor, Tensor};
use pretty_assertions::assert_eq;

fn weight() -> Int8Tensor {
    Int8Tensor::new(vec![2, 3], vec![10, -20, 30, 1, 2, -3]).unwrap()
}

#[test]
fn storage_then_load_recovers_data_and_params() {
    let layout = Int8TensorwiseLayout;
    let mut params = LayoutParams::new(WeightScale::PerRow(vec![0.5, 0.25]), DType::BF16, [2, 3]);
    params.input_scale = Some(0.02);

    let mut sd = StateDict::new();
    sd.insert_layout_tensors("down.", layout.tensors_for_storage(&weight(), &params));
    let keys: Vec<&str> = sd.keys().collect();
    assert_eq!(keys, vec!["down.input_scale", "down.weight", "down.weight_scale"]);

    let (q, loaded) = layout.load("down.", &sd, DType::BF16).unwrap();
    assert_eq!(q, weight());
    assert_eq!(loaded, params);
}

#[test]
fn dequantize_broadcasts_per_row_scale() {
    let params = LayoutParams::new(WeightScale::PerRow(vec![0.5, 0.25]), DType::F16, [2, 3]);
    let w = Int8TensorwiseLayout.dequantize(&weight(), &params).unwrap();
    assert_eq!(w.dtype(), DType::F32);
    assert_eq!(w.data(), &[5.0, -10.0, 15.0, 0.25, 0.5, -0.75]);
}

#[test]
fn float_weight_under_primary_key_is_rejected() {
    let mut sd = StateDict::new();
    sd.insert("x.weight", FloatTensor::zeros(vec![2, 3], DType::F32));
    sd.insert("x.weight_scale", FloatTensor::scalar(1.0));
    assert!(Int8TensorwiseLayout.load("x.", &sd, DType::F32).is_err());
}

#[test]
fn built_operator_is_uninitialized_until_loaded() {
    let params = LayoutParams::new(WeightScale::Tensor(0.5), DType::BF16, [2, 3]);
    let layout = Int8TensorwiseLayout;
    let factory = layout.operator_factory().expect("int8 layout builds operators");
    let mut op = factory.build_operator(&params, Device::Cpu, None, false, &QuantConfig::default()).unwrap();
    let x = FloatTensor::new(vec![1, 3], vec![1.0, 0.0, 0.0]).unwrap();
    assert!(op.forward(&x).is_err());

    op.load_weights(weight(), params.scale.clone()).unwrap();
    let y = op.forward(&x).unwrap();
    // 127 * w[:,0] * (1/127) * 0.5
    assert!((y.data()[0] - 5.0).abs() < 1e-4);
    assert!((y.data()[1] - 0.5).abs() < 1e-4);
}

#[test]
fn dequantized_fallback_agrees_with_int8_path_on_exact_inputs() {
    let params = LayoutParams::new(WeightScale::Tensor(0.5), DType::F32, [2, 3]);
    let dense = dequantized_operator(&Int8TensorwiseLayout, &weight(), &params, None, None).unwrap();
    let x = FloatTensor::new(vec![1, 3], vec![1.0, 0.0, 0.0]).unwrap();
    let y = dense.forward(&x).unwrap();
    assert_eq!(y.data(), &[5.0, 0.5]);
    assert!(matches!(Tensor::from(y).dtype(), DType::F32));
}

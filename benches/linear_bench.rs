use criterion::{criterion_group, criterion_main, Criterion, black_box};
use int8_w8a8::device::Device;
use int8_w8a8::ops::LinearOp;
use int8_w8a8::quant::{Int8Linear, WeightScale};
use int8_w8a8::tensor::{FloatTensor, Int8Tensor};

fn make_random_layer(in_features: usize, out_features: usize, device: Device) -> Int8Linear {
    let mut seed = 0x1234_5678_9abc_def0u64;
    let mut next_i8 = || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        (((seed >> 33) % 255) as i32 - 127) as i8
    };
    let w: Vec<i8> = (0..in_features * out_features).map(|_| next_i8()).collect();
    let w = Int8Tensor::new(vec![out_features, in_features], w).unwrap();
    Int8Linear::from_parts(w, WeightScale::Tensor(0.01), None, device, None).unwrap()
}

fn make_input(rows: usize, in_features: usize) -> FloatTensor {
    let data = (0..rows * in_features).map(|i| ((i % 17) as f32 - 8.0) * 0.125).collect();
    FloatTensor::new(vec![rows, in_features], data).unwrap()
}

fn bench_int8_forward(c: &mut Criterion) {
    // modest sizes for benchmark speed; adjust as needed
    let x = make_input(64, 512);
    let seq = make_random_layer(512, 512, Device::Cpu);
    c.bench_function("int8_linear_forward_64x512x512", |ben| {
        ben.iter(|| black_box(seq.forward(black_box(&x)).unwrap()))
    });
    let par = make_random_layer(512, 512, Device::CpuParallel { threads: rayon::current_num_threads() });
    c.bench_function("int8_linear_forward_64x512x512_par", |ben| {
        ben.iter(|| black_box(par.forward(black_box(&x)).unwrap()))
    });
}

criterion_group!(benches, bench_int8_forward);
criterion_main!(benches);

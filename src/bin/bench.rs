use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use int8_w8a8::config::{QuantConfig, Rounding};
use int8_w8a8::device;
use int8_w8a8::ops::{DenseLinear, LinearOp};
use int8_w8a8::quant::{quantize_weight, Granularity, Int8Linear};
use int8_w8a8::tensor::FloatTensor;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "int8-bench", version, about = "Benchmark int8 W8A8 linear forward against dense f32")]
struct Args {
    /// Batch rows per call
    #[arg(long, default_value_t = 256)]
    rows: usize,

    /// Input features
    #[arg(long, default_value_t = 1024)]
    in_features: usize,

    /// Output features
    #[arg(long, default_value_t = 1024)]
    out_features: usize,

    /// Forward calls per operator
    #[arg(long, default_value_t = 20)]
    iters: usize,

    /// Threads (0 = rayon pool size, 1 = sequential)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Quantize weights per output row instead of per tensor
    #[arg(long, default_value_t = false)]
    per_row: bool,

    /// Truncate instead of rounding to nearest
    #[arg(long, default_value_t = false)]
    truncate: bool,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn random_tensor(rng: &mut SmallRng, shape: Vec<usize>) -> anyhow::Result<FloatTensor> {
    let normal = Normal::new(0.0f32, 1.0)?;
    let n: usize = shape.iter().product();
    let data = (0..n).map(|_| normal.sample(rng)).collect();
    Ok(FloatTensor::new(shape, data)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = SmallRng::seed_from_u64(args.seed);
    let (k, n) = (args.in_features, args.out_features);

    let mut cfg = QuantConfig::default();
    if args.truncate { cfg.rounding = Rounding::Truncate; }
    let granularity = if args.per_row { Granularity::Row } else { Granularity::Tensor };

    let w = random_tensor(&mut rng, vec![n, k])?;
    let x = random_tensor(&mut rng, vec![args.rows, k])?;
    let (q, scale) = quantize_weight(&w, granularity, cfg.rounding)?;
    let dev = device::get_device_by_threads(args.threads)?;
    let int8 = Int8Linear::from_parts(q, scale, None, dev, None)?.with_config(&cfg);
    let dense = DenseLinear::new(w, None, None)?;

    let pb = ProgressBar::new((2 * args.iters) as u64);
    pb.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")?.progress_chars("=> "));

    let time_op = |name: &str, op: &dyn LinearOp| -> anyhow::Result<(f64, FloatTensor)> {
        pb.set_message(name.to_string());
        let t0 = Instant::now();
        let mut last = op.forward(&x)?;
        pb.inc(1);
        for _ in 1..args.iters {
            last = op.forward(&x)?;
            pb.inc(1);
        }
        Ok((t0.elapsed().as_secs_f64(), last))
    };
    let (t_int8, y_int8) = time_op("int8", &int8)?;
    let (t_dense, y_dense) = time_op("dense", &dense)?;
    pb.finish_with_message("done");

    let err = y_int8
        .data()
        .iter()
        .zip(y_dense.data())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    let macs = (args.rows * k * n * args.iters) as f64;
    println!("device: {:?}", dev);
    println!("int8  : {:.3}s  {:.2} GMAC/s", t_int8, macs / t_int8 / 1e9);
    println!("dense : {:.3}s  {:.2} GMAC/s", t_dense, macs / t_dense / 1e9);
    println!("max abs error vs dense: {:.5}", err);
    Ok(())
}

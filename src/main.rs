use anyhow::{Context, Result};
use clap::Parser;
use int8_w8a8::config::QuantConfig;
use int8_w8a8::device;
use int8_w8a8::layout::{Int8TensorwiseLayout, Layout, LayoutParams};
use int8_w8a8::model::{MemorySource, StateDict};
use int8_w8a8::plugin::{self, InProcessHost, HostApi};
use int8_w8a8::quant::WeightScale;
use int8_w8a8::tensor::{DType, FloatTensor, Int8Tensor};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Register the int8 W8A8 layout with an in-process host and run a sample layer", long_about = None)]
struct Args {
    /// Optional JSON config (rounding, parallel_min_rows, algo, display_name, orig_dtype)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the registry snapshot as JSON
    #[arg(long, default_value_t = false)]
    dump_registry: bool,

    /// Bias for the sample layer, comma separated (two values)
    #[arg(long)]
    bias: Option<String>,

    /// Threads for the matmul (0 = rayon pool size)
    #[arg(long, default_value_t = 1)]
    threads: usize,
}

fn parse_bias(s: &str) -> Result<Vec<f32>> {
    s.split(',')
        .map(|v| v.trim().parse::<f32>().with_context(|| format!("invalid bias value: {}", v)))
        .collect()
}

fn sample_checkpoint(bias: Option<Vec<f32>>) -> Result<StateDict> {
    // in=4, out=2, tensorwise scale 0.1
    let q = Int8Tensor::new(vec![2, 4], vec![1, -1, 2, -2, 3, -3, 4, -4])?;
    let params = LayoutParams::new(WeightScale::Tensor(0.1), DType::F32, [2, 4]);
    let mut sd = StateDict::new();
    sd.insert_layout_tensors("proj.", Int8TensorwiseLayout.tensors_for_storage(&q, &params));
    if let Some(b) = bias {
        sd.insert("proj.bias", FloatTensor::new(vec![b.len()], b)?);
    }
    Ok(sd)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(p) => QuantConfig::from_json_file(p)?,
        None => QuantConfig::default(),
    };

    let host = InProcessHost::new();
    let state = plugin::init(&host, config);
    for (id, name) in state.node_display_name_mappings() {
        println!("node {} -> {}", id, name);
    }
    if args.dump_registry {
        if let Some(reg) = host.quant_registry() {
            println!("{}", reg.to_json()?);
        }
    }

    let Some(loader) = state.loader() else {
        println!("quantization support unavailable");
        return Ok(());
    };

    let bias = args.bias.as_deref().map(parse_bias).transpose()?;
    let mut source = MemorySource::new();
    source.add("sample", sample_checkpoint(bias)?);
    for name in loader.list(&source) {
        println!("checkpoint {}", name);
    }
    let device = device::get_device_by_threads(args.threads)?;
    let model = loader.load("sample", &source, device, Some(DType::F32))?;

    let x = FloatTensor::new(vec![1, 4], vec![1.0, 1.0, 1.0, 1.0])?;
    let y = model.forward_layer("proj.", &x)?;
    println!("input  {:?} -> {:?}", x.shape(), x.data());
    println!("output {:?} -> {:?}", y.shape(), y.data());
    Ok(())
}

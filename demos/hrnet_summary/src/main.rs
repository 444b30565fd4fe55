#![recursion_limit = "256"]

use burn::backend::NdArray;
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};
use burn::tensor::Distribution;
use clap::{Parser, ValueEnum};
use hrseg::models::hrnet::FeatureMapShape;
use hrseg::{HrNetOcrConfig, HrNetSegConfig};
use tracing_subscriber::EnvFilter;

/// Segmentation head selection.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Head {
    /// Concat-and-classify head.
    Plain,

    /// Object-contextual representation head.
    Ocr,
}

// $ --variant=hrnet_w18 --head=ocr --height=128 --width=128 --forward
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Width schedule: hrnet_w18, hrnet_w32 or hrnet_w48.
    #[arg(long, default_value = "hrnet_w48")]
    variant: String,

    /// Segmentation head.
    #[arg(long, value_enum, default_value_t = Head::Plain)]
    head: Head,

    /// Fixed batch size.
    #[arg(short, long, default_value_t = 2)]
    batch_size: usize,

    /// Input height.
    #[arg(long, default_value_t = 512)]
    height: usize,

    /// Input width.
    #[arg(long, default_value_t = 512)]
    width: usize,

    /// Input channels.
    #[arg(long, default_value_t = 3)]
    channels: usize,

    /// Number of classes.
    #[arg(long, default_value_t = 19)]
    classes: usize,

    /// Output activation: softmax or sigmoid; anything else emits raw logits.
    #[arg(long, default_value = "softmax")]
    activation: String,

    /// Load the model config from a JSON file instead of the flags above.
    #[arg(long)]
    config: Option<String>,

    /// Run one forward pass on random input and report the output shapes.
    #[arg(long, default_value_t = false)]
    forward: bool,
}

fn print_branches(shapes: &[FeatureMapShape]) {
    for (idx, shape) in shapes.iter().enumerate() {
        println!("  branch {idx}: {:?}", shape.dims());
    }
}

fn seg_main<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => HrNetSegConfig::load(path)?,
        None => HrNetSegConfig::from_names(
            args.batch_size,
            args.height,
            args.width,
            args.channels,
            args.classes,
            &args.activation,
            &args.variant,
        )?,
    };
    config.try_validate()?;

    println!("input:  {:?}", config.input_shape());
    print_branches(&config.branch_shapes());
    println!("output: {:?}", config.output_shape());

    let model = config.init::<B>(device);
    println!("{model}");
    println!("params: {}", model.num_params());

    if args.forward {
        let input = Tensor::random(model.input_shape(), Distribution::Default, device);
        let output = model.forward(input);
        println!("forward output: {:?}", output.dims());
    }
    Ok(())
}

fn ocr_main<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => HrNetOcrConfig::load(path)?,
        None => HrNetOcrConfig::from_names(
            args.batch_size,
            args.height,
            args.width,
            args.channels,
            args.classes,
            &args.activation,
            &args.variant,
        )?,
    };
    config.try_validate()?;

    println!("input:  {:?}", config.input_shape());
    print_branches(&config.branch_shapes());
    println!("output: {:?} (primary and auxiliary)", config.output_shape());

    let model = config.init::<B>(device);
    println!("{model}");
    println!("params: {}", model.num_params());

    if args.forward {
        let input = Tensor::random(model.input_shape(), Distribution::Default, device);
        let output = model.forward(input);
        println!("forward primary:   {:?}", output.primary.dims());
        println!("forward auxiliary: {:?}", output.auxiliary.dims());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    match args.head {
        Head::Plain => seg_main::<B>(&args, &device),
        Head::Ocr => ocr_main::<B>(&args, &device),
    }
}

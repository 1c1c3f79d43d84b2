#![recursion_limit = "256"] // wgpu

use anyhow::Context;
use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use clap::Parser;
use electra_burn::cli::{Cli, Command, FetchTokenizerArgs};
use electra_burn::data::{class_distribution, load_dataset};
use electra_burn::{evaluation, export, training};
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "f16"))]
#[allow(dead_code)]
type ElemType = f32;
#[cfg(feature = "f16")]
#[allow(dead_code)]
type ElemType = burn::tensor::f16;

fn prepare(dataset: &Path, preview: usize) -> anyhow::Result<()> {
    let records = load_dataset(dataset)?;

    println!("Shape: ({}, 2)", records.len());
    println!("Class distribution:");
    for (label, count) in class_distribution(&records) {
        println!("  {label}: {count}");
    }
    for record in records.iter().take(preview) {
        println!("[{}] {}", record.label, record.body);
    }

    Ok(())
}

#[cfg(feature = "pretrained")]
fn fetch_tokenizer(args: FetchTokenizerArgs) -> anyhow::Result<()> {
    let files = electra_burn::model::download_hf_tokenizer(&args.model_name, None)?;
    std::fs::create_dir_all(&args.output)?;

    for file in files {
        let name = file
            .file_name()
            .with_context(|| format!("no file name in {}", file.display()))?;
        std::fs::copy(&file, args.output.join(name))
            .with_context(|| format!("copying {}", file.display()))?;
    }
    println!("Tokenizer saved to {}", args.output.display());

    Ok(())
}

#[cfg(not(feature = "pretrained"))]
fn fetch_tokenizer(args: FetchTokenizerArgs) -> anyhow::Result<()> {
    anyhow::bail!(
        "cannot fetch {}: built without the `pretrained` feature",
        args.model_name
    )
}

pub fn launch<B: Backend>(cli: Cli, device: B::Device, accelerated: bool) -> anyhow::Result<()> {
    let Cli {
        command,
        dataset,
        models_dir,
        ..
    } = cli;

    match command {
        Command::Prepare(args) => prepare(&dataset, args.preview)?,
        Command::FetchTokenizer(args) => fetch_tokenizer(args)?,
        Command::Train(args) => {
            let config = args.into_config(&models_dir, accelerated);
            let summary = training::train::<Autodiff<B>>(&dataset, config, device)?;
            println!("{summary}");
        }
        Command::Evaluate(args) => {
            let config = args.into_config(&models_dir, accelerated);
            let report = evaluation::evaluate::<B>(&dataset, config, device)?;
            println!("{report}");
        }
        Command::Export(args) => {
            let config = args.into_config(&models_dir, &dataset);
            let report = export::export::<B>(config, device)?;
            println!("{report}");
        }
    }

    Ok(())
}

#[cfg(not(any(feature = "ndarray", feature = "tch-cpu")))]
compile_error!("enable the `ndarray` or `tch-cpu` feature for the CPU backend");

#[cfg(any(feature = "ndarray", feature = "tch-cpu"))]
mod cpu {
    use crate::launch;
    use electra_burn::cli::Cli;

    #[cfg(feature = "tch-cpu")]
    pub fn run(cli: Cli) -> anyhow::Result<()> {
        use crate::ElemType;
        use burn::backend::libtorch::{LibTorch, LibTorchDevice};

        launch::<LibTorch<ElemType>>(cli, LibTorchDevice::Cpu, false)
    }

    #[cfg(all(feature = "ndarray", not(feature = "tch-cpu")))]
    pub fn run(cli: Cli) -> anyhow::Result<()> {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        launch::<NdArray<f32>>(cli, NdArrayDevice::Cpu, false)
    }
}

#[cfg(any(feature = "cuda", feature = "tch-gpu", feature = "wgpu"))]
mod gpu {
    use crate::launch;
    use electra_burn::cli::Cli;

    #[cfg(feature = "cuda")]
    pub fn run(cli: Cli) -> anyhow::Result<()> {
        use burn::backend::{cuda::CudaDevice, Cuda};

        launch::<Cuda>(cli, CudaDevice::default(), true)
    }

    #[cfg(all(feature = "tch-gpu", not(feature = "cuda")))]
    pub fn run(cli: Cli) -> anyhow::Result<()> {
        use crate::ElemType;
        use burn::backend::libtorch::{LibTorch, LibTorchDevice};

        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        launch::<LibTorch<ElemType>>(cli, device, true)
    }

    #[cfg(all(feature = "wgpu", not(any(feature = "cuda", feature = "tch-gpu"))))]
    pub fn run(cli: Cli) -> anyhow::Result<()> {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        launch::<Wgpu>(cli, WgpuDevice::default(), true)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    #[cfg(any(feature = "cuda", feature = "tch-gpu", feature = "wgpu"))]
    if !cli.force_cpu {
        return gpu::run(cli);
    }
    #[cfg(not(any(feature = "cuda", feature = "tch-gpu", feature = "wgpu")))]
    if !cli.force_cpu {
        tracing::info!("No GPU backend compiled in, running on the CPU");
    }

    cpu::run(cli)
}

//! CLI wiring for the fusetune sweep driver.

use crate::manifest::{attention_functional, run_sweep, SweepGrid};
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fusetune_autotune::{ConfigGenerator, FallbackPolicy, LookupTable, Selector};
use fusetune_kernels::{NumericType, RuntimeShape};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fusetune-sweep", about = "Attention kernel tuning sweep toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum DtypeArg {
    Fp16,
    Bf16,
    Fp32,
}

impl From<DtypeArg> for NumericType {
    fn from(value: DtypeArg) -> NumericType {
        match value {
            DtypeArg::Fp16 => NumericType::Fp16,
            DtypeArg::Bf16 => NumericType::Bf16,
            DtypeArg::Fp32 => NumericType::Fp32,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum FallbackArg {
    Defaults,
    FirstCandidate,
}

impl From<FallbackArg> for FallbackPolicy {
    fn from(value: FallbackArg) -> FallbackPolicy {
        match value {
            FallbackArg::Defaults => FallbackPolicy::Defaults,
            FallbackArg::FirstCandidate => FallbackPolicy::FirstCandidate,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enumerate every config to compile for a grid of functionals.
    Generate {
        #[arg(long, default_value = "bwd_kernel_fuse")]
        kernel: String,
        #[arg(long = "arch", required = true)]
        arches: Vec<String>,
        #[arg(long = "dtype", value_enum, default_values_t = [DtypeArg::Fp16, DtypeArg::Bf16, DtypeArg::Fp32])]
        dtypes: Vec<DtypeArg>,
        #[arg(long = "head-dim", default_values_t = [16, 32, 64, 128, 256])]
        head_dims: Vec<i64>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Pick the config a dispatch would use for one call.
    Select {
        #[arg(long)]
        lut: PathBuf,
        #[arg(long, default_value = "bwd_kernel_fuse")]
        kernel: String,
        #[arg(long)]
        arch: String,
        #[arg(long, value_enum, default_value = "fp16")]
        dtype: DtypeArg,
        #[arg(long)]
        head_dim: i64,
        #[arg(long, default_value_t = 0)]
        causal_type: i64,
        #[arg(long, default_value_t = false)]
        dropout: bool,
        #[arg(long, default_value_t = 0)]
        bias_type: i64,
        #[arg(long)]
        seqlen_q: u64,
        #[arg(long)]
        seqlen_k: u64,
        #[arg(long, value_enum, default_value = "defaults")]
        fallback: FallbackArg,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let generator = ConfigGenerator::with_defaults()?;

    match cli.command {
        Command::Generate {
            kernel,
            arches,
            dtypes,
            head_dims,
            output,
        } => {
            let mut grid = SweepGrid::new(kernel);
            grid.arches = arches;
            grid.numeric_types = dtypes.into_iter().map(NumericType::from).collect();
            grid.head_dims = head_dims;

            let manifest = run_sweep(&generator, &grid)?;
            println!(
                "kernel={}, functionals={}, configs={}, gaps={}",
                manifest.kernel,
                manifest.entries.len() + manifest.gaps.len(),
                manifest.total_configs(),
                manifest.gaps.len()
            );

            if let Some(path) = output {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
                info!(path = %path.display(), "manifest written");
            }

            if !manifest.gaps.is_empty() {
                for gap in &manifest.gaps {
                    eprintln!("- {}", gap.reason);
                }
                bail!("{} functionals have no surviving config", manifest.gaps.len());
            }
        }
        Command::Select {
            lut,
            kernel,
            arch,
            dtype,
            head_dim,
            causal_type,
            dropout,
            bias_type,
            seqlen_q,
            seqlen_k,
            fallback,
        } => {
            let table = LookupTable::load_from_file(&lut)?;
            let functional = attention_functional(&arch, dtype.into(), head_dim)
                .with_constant("CAUSAL_TYPE", causal_type)
                .with_constant("ENABLE_DROPOUT", dropout)
                .with_constant("BIAS_TYPE", bias_type);
            let shape = RuntimeShape::new()
                .with("max_seqlen_q", seqlen_q)
                .with("max_seqlen_k", seqlen_k);

            let selection = Selector::new(&table, &generator)
                .with_fallback(fallback.into())
                .select(&kernel, &functional, &shape)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "kernel": kernel,
                    "tuned": selection.is_tuned(),
                    "config": selection.config(),
                }))?
            );
        }
    }

    Ok(())
}

//! Sweep manifests: every config to compile for a grid of functionals.
//!
//! A sweep expands the requested architectures, numeric types and head
//! dimensions over the causal, dropout and bias flags, generates the config
//! space of each functional in parallel and records the result in a
//! reproducible JSON report. Functionals whose space comes out empty are
//! reported as coverage gaps instead of failing the whole sweep.

use anyhow::Result;
use fusetune_autotune::ConfigGenerator;
use fusetune_kernels::{Config, Functional, NumericType, TuneError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Smallest block the attention kernels tile the head dimension with.
const MIN_BLOCK_DMODEL: i64 = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepGrid {
    pub kernel: String,
    pub arches: Vec<String>,
    pub numeric_types: Vec<NumericType>,
    pub head_dims: Vec<i64>,
    pub causal_types: Vec<i64>,
    pub dropout: Vec<bool>,
    pub bias_types: Vec<i64>,
}

impl SweepGrid {
    pub fn new(kernel: impl Into<String>) -> Self {
        Self {
            kernel: kernel.into(),
            arches: Vec::new(),
            numeric_types: Vec::new(),
            head_dims: Vec::new(),
            causal_types: vec![0, 1],
            dropout: vec![false, true],
            bias_types: vec![0, 1],
        }
    }

    /// Cross product of the grid, outermost field first.
    pub fn functionals(&self) -> Vec<Functional> {
        let mut functionals = Vec::new();
        for arch in &self.arches {
            for &numeric_type in &self.numeric_types {
                for &head_dim in &self.head_dims {
                    for &causal in &self.causal_types {
                        for &dropout in &self.dropout {
                            for &bias in &self.bias_types {
                                functionals.push(
                                    attention_functional(arch, numeric_type, head_dim)
                                        .with_constant("CAUSAL_TYPE", causal)
                                        .with_constant("ENABLE_DROPOUT", dropout)
                                        .with_constant("BIAS_TYPE", bias),
                                );
                            }
                        }
                    }
                }
            }
        }
        functionals
    }
}

/// Head dimension rounded up to the compiled block width. Head dimensions
/// with no power-of-two width in range are returned unchanged; they are far
/// past any admissible block and surface as coverage gaps.
pub fn block_dmodel(head_dim: i64) -> i64 {
    let mut block = MIN_BLOCK_DMODEL;
    while block < head_dim {
        match block.checked_mul(2) {
            Some(next) => block = next,
            None => return head_dim,
        }
    }
    block
}

/// Functional for an attention call with all flags cleared. The head
/// dimension is padded to its block width and `PADDED_HEAD` records whether
/// that padding happened.
pub fn attention_functional(arch: &str, numeric_type: NumericType, head_dim: i64) -> Functional {
    let block = block_dmodel(head_dim);
    Functional::new(arch, numeric_type)
        .with_constant("BLOCK_DMODEL", block)
        .with_constant("CAUSAL_TYPE", 0)
        .with_constant("ENABLE_DROPOUT", false)
        .with_constant("PADDED_HEAD", block != head_dim)
        .with_constant("BIAS_TYPE", 0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub functional: Functional,
    pub configs: Vec<Config>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageGap {
    pub functional: Functional,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepManifest {
    pub kernel: String,
    pub generated_at_unix_ms: u128,
    pub entries: Vec<ManifestEntry>,
    pub gaps: Vec<CoverageGap>,
}

impl SweepManifest {
    pub fn total_configs(&self) -> usize {
        self.entries.iter().map(|entry| entry.configs.len()).sum()
    }
}

enum Outcome {
    Entry(ManifestEntry),
    Gap(CoverageGap),
}

/// Generate every functional of `grid` in parallel. Entries keep grid order.
pub fn run_sweep(generator: &ConfigGenerator, grid: &SweepGrid) -> Result<SweepManifest> {
    let functionals = grid.functionals();
    info!(kernel = %grid.kernel, functionals = functionals.len(), "starting sweep");

    let outcomes = functionals
        .into_par_iter()
        .map(|functional| -> Result<Outcome, TuneError> {
            match generator.generate(&grid.kernel, &functional) {
                Ok(space) => {
                    let configs = space.to_vec()?;
                    debug!(functional = ?functional, configs = configs.len(), "generated");
                    Ok(Outcome::Entry(ManifestEntry { functional, configs }))
                }
                Err(err @ TuneError::ConfigSpaceEmpty { .. }) => Ok(Outcome::Gap(CoverageGap {
                    functional,
                    reason: err.to_string(),
                })),
                Err(err) => Err(err),
            }
        })
        .collect::<Result<Vec<_>, TuneError>>()?;

    let mut entries = Vec::new();
    let mut gaps = Vec::new();
    for outcome in outcomes {
        match outcome {
            Outcome::Entry(entry) => entries.push(entry),
            Outcome::Gap(gap) => gaps.push(gap),
        }
    }

    let manifest = SweepManifest {
        kernel: grid.kernel.clone(),
        generated_at_unix_ms: SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis(),
        entries,
        gaps,
    };
    info!(
        kernel = %manifest.kernel,
        configs = manifest.total_configs(),
        gaps = manifest.gaps.len(),
        "sweep finished"
    );
    Ok(manifest)
}

//! Offline tuning: benchmark every generated candidate and record the winner.

use crate::generator::ConfigGenerator;
use crate::lut::{LutBuilder, LutEntry, LutKey};
use anyhow::{anyhow, Result};
use fusetune_kernels::{Config, Functional, RuntimeShape};
use tracing::{info, warn};

/// Something that can time one config. `Ok(None)` marks a candidate that
/// failed or timed out; it is skipped rather than aborting the sweep.
pub trait Benchmark {
    fn measure(
        &mut self,
        functional: &Functional,
        shape: &RuntimeShape,
        config: &Config,
    ) -> Result<Option<f64>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuneOutcome {
    pub key: LutKey,
    pub config: Config,
    pub time_ms: f64,
    pub evaluated: usize,
    pub failed: usize,
}

pub struct Autotuner {
    table: LutBuilder,
    runs: usize,
    warmup_runs: usize,
}

impl Autotuner {
    pub fn new(table: LutBuilder) -> Self {
        Self {
            table,
            runs: 5,
            warmup_runs: 1,
        }
    }

    pub fn with_runs(mut self, warmup_runs: usize, runs: usize) -> Self {
        self.warmup_runs = warmup_runs;
        self.runs = runs.max(1);
        self
    }

    pub fn table(&self) -> &LutBuilder {
        &self.table
    }

    pub fn into_table(self) -> LutBuilder {
        self.table
    }

    /// Benchmark the config space of `kernel` for `functional` at `shape`.
    ///
    /// Partially tuned flags are pinned to their declared values while
    /// measuring, and the winner is keyed without them so every value of
    /// those flags shares it.
    pub fn tune<B: Benchmark>(
        &mut self,
        generator: &ConfigGenerator,
        bench: &mut B,
        kernel: &str,
        functional: &Functional,
        shape: &RuntimeShape,
    ) -> Result<TuneOutcome> {
        let descriptor = generator.kernels().get(kernel)?;
        let measured = descriptor.tuning_functional(functional);
        let space = generator.generate(kernel, &measured)?;
        let buckets = descriptor.bucket_keys(space.production_line(), shape);

        let mut best: Option<(Config, f64)> = None;
        let mut evaluated = 0;
        let mut failed = 0;

        for config in space.iter() {
            let config = config?;
            evaluated += 1;
            let Some(avg_ms) = self.time(bench, &measured, shape, &config)? else {
                warn!(kernel, %config, "candidate failed to run; skipping");
                failed += 1;
                continue;
            };

            match &best {
                Some((_, best_ms)) if avg_ms >= *best_ms => continue,
                _ => best = Some((config, avg_ms)),
            }
        }

        let (config, time_ms) = best.ok_or_else(|| {
            anyhow!(
                "all {} candidates of {} failed on {} ({})",
                evaluated,
                kernel,
                functional.arch,
                functional.numeric_type
            )
        })?;

        let key = LutKey::new(
            &descriptor,
            &functional.arch,
            functional.numeric_type,
            functional,
            buckets,
        );
        info!(
            kernel,
            arch = %functional.arch,
            buckets = ?key.buckets,
            %config,
            time_ms,
            evaluated,
            failed,
            "tuned"
        );
        self.table.record(LutEntry {
            key: key.clone(),
            config: config.clone(),
            time_ms,
        });

        Ok(TuneOutcome {
            key,
            config,
            time_ms,
            evaluated,
            failed,
        })
    }

    fn time<B: Benchmark>(
        &self,
        bench: &mut B,
        functional: &Functional,
        shape: &RuntimeShape,
        config: &Config,
    ) -> Result<Option<f64>> {
        // Warmup runs to avoid cold-start noise.
        for _ in 0..self.warmup_runs {
            if bench.measure(functional, shape, config)?.is_none() {
                return Ok(None);
            }
        }

        let mut total = 0.0;
        for _ in 0..self.runs {
            match bench.measure(functional, shape, config)? {
                Some(ms) => total += ms,
                None => return Ok(None),
            }
        }
        Ok(Some(total / self.runs as f64))
    }
}

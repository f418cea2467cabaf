//! Dispatch-time config selection.

use crate::generator::ConfigGenerator;
use crate::lut::{Lookup, LookupTable};
use fusetune_kernels::error::Result;
use fusetune_kernels::{Config, Functional, RuntimeShape};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What to dispatch when the tuned table has no entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackPolicy {
    /// First candidate per axis with the kernel's default knobs.
    #[default]
    Defaults,
    /// First config the generator yields, rules applied.
    FirstCandidate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    Tuned(Config),
    Fallback(Config),
}

impl Selection {
    pub fn config(&self) -> &Config {
        match self {
            Selection::Tuned(config) | Selection::Fallback(config) => config,
        }
    }

    pub fn into_config(self) -> Config {
        match self {
            Selection::Tuned(config) | Selection::Fallback(config) => config,
        }
    }

    pub fn is_tuned(&self) -> bool {
        matches!(self, Selection::Tuned(_))
    }
}

pub struct Selector<'a> {
    table: &'a LookupTable,
    generator: &'a ConfigGenerator,
    fallback: FallbackPolicy,
}

impl<'a> Selector<'a> {
    pub fn new(table: &'a LookupTable, generator: &'a ConfigGenerator) -> Self {
        Self {
            table,
            generator,
            fallback: FallbackPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn select(&self, kernel: &str, functional: &Functional, shape: &RuntimeShape) -> Result<Selection> {
        let descriptor = self.generator.kernels().get(kernel)?;
        let line = self.generator.arches().production_line(&functional.arch)?;
        let buckets = descriptor.bucket_keys(line, shape);

        let lookup = self.table.lookup(
            &descriptor,
            &functional.arch,
            functional.numeric_type,
            &buckets,
            functional,
        );
        if let Lookup::Hit(config) = lookup {
            return Ok(Selection::Tuned(config.clone()));
        }

        debug!(
            kernel,
            arch = %functional.arch,
            numeric_type = %functional.numeric_type,
            buckets = ?buckets,
            policy = ?self.fallback,
            "tuned table miss"
        );
        let config = match self.fallback {
            FallbackPolicy::Defaults => self.generator.default_config(kernel, functional)?,
            FallbackPolicy::FirstCandidate => self.generator.first_candidate(kernel, functional)?,
        };
        Ok(Selection::Fallback(config))
    }
}

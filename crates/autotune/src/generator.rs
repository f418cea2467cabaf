//! Enumeration of the tuning space for one functional.

use fusetune_kernels::error::Result;
use fusetune_kernels::{
    ArchRegistry, CandidateSource, Config, DynKernel, Functional, KernelDescriptor,
    KernelRegistry, KnobDomains, NumericType, ProductionLine, RuleContext, SchedulingKnobs,
    SchemaError, TuneError, Value,
};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Produces the pruned, deterministic config sequence for a kernel
/// instantiation. Holds no per-call state; `generate` may be called from
/// many threads at once.
#[derive(Debug, Clone)]
pub struct ConfigGenerator {
    kernels: KernelRegistry,
    arches: ArchRegistry,
}

impl ConfigGenerator {
    pub fn new(kernels: KernelRegistry, arches: ArchRegistry) -> Self {
        Self { kernels, arches }
    }

    /// Built-in attention kernels on the default architecture table.
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            KernelRegistry::with_default_kernels()?,
            ArchRegistry::default(),
        ))
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn arches(&self) -> &ArchRegistry {
        &self.arches
    }

    /// Resolve the config space of `kernel` for `functional`.
    ///
    /// Fails with a schema error when a compile-time constant cannot be
    /// resolved and with `ConfigSpaceEmpty` when no candidate survives.
    pub fn generate(&self, kernel: &str, functional: &Functional) -> Result<ConfigSpace> {
        let space = self.resolve(kernel, functional)?;
        match space.iter().next() {
            Some(Ok(_)) => Ok(space),
            Some(Err(err)) => Err(err),
            None => Err(space.empty_error()),
        }
    }

    /// First surviving candidate.
    pub fn first_candidate(&self, kernel: &str, functional: &Functional) -> Result<Config> {
        let space = self.generate(kernel, functional)?;
        space.iter().next().unwrap_or_else(|| Err(space.empty_error()))
    }

    /// First candidate of every axis with the kernel's default knobs,
    /// ignoring exclusion rules.
    pub fn default_config(&self, kernel: &str, functional: &Functional) -> Result<Config> {
        let space = self.resolve(kernel, functional)?;
        let mut values = BTreeMap::new();
        for (name, candidates) in &space.axes {
            let first = candidates.first().ok_or_else(|| space.empty_error())?;
            values.insert(name.clone(), first.clone());
        }
        Ok(Config::new(values, space.descriptor.default_knobs()))
    }

    fn resolve(&self, kernel: &str, functional: &Functional) -> Result<ConfigSpace> {
        let descriptor = self.kernels.get(kernel)?;
        let line = self.arches.production_line(&functional.arch)?;
        let mut admissible = true;

        for name in descriptor.functional_constants() {
            let value = functional.resolve_one(&[name])?;
            if !descriptor.axes().admits(name, value) {
                debug!(
                    kernel,
                    constant = name,
                    value = %value,
                    "compile-time constant rejected by admissibility filter"
                );
                admissible = false;
            }
        }

        let mut axes = Vec::with_capacity(descriptor.axes().axes().len());
        for axis in descriptor.axes().axes() {
            let mut chain = Vec::new();
            let resolved = if admissible {
                self.candidates(&descriptor, &axis.name, functional.numeric_type, &mut chain)?
            } else {
                Vec::new()
            };

            let mut candidates: Vec<Value> = Vec::with_capacity(resolved.len());
            for value in resolved {
                if descriptor.axes().admits(&axis.name, &value) && !candidates.contains(&value) {
                    candidates.push(value);
                }
            }
            axes.push((axis.name.clone(), candidates));
        }

        let space = ConfigSpace {
            knobs: descriptor.knobs().clone(),
            descriptor,
            functional: functional.clone(),
            line,
            axes,
        };
        debug!(
            kernel,
            arch = %functional.arch,
            line = %line,
            numeric_type = %functional.numeric_type,
            candidates = space.upper_bound(),
            "resolved config space"
        );
        Ok(space)
    }

    fn candidates(
        &self,
        owner: &KernelDescriptor,
        axis: &str,
        numeric_type: NumericType,
        chain: &mut Vec<String>,
    ) -> Result<Vec<Value>> {
        let declared = owner
            .axes()
            .axis(axis)
            .ok_or_else(|| SchemaError::UndeclaredReference {
                owner: owner.name().to_string(),
                name: axis.to_string(),
            })?;

        match &declared.source {
            CandidateSource::Literal(values) => Ok(values.clone()),
            CandidateSource::ByNumericType(values) => Ok(values(numeric_type)),
            CandidateSource::Matched { kernel } => {
                chain.push(owner.name().to_string());
                if chain.iter().any(|seen| seen == kernel) {
                    return Err(SchemaError::MatchCycle {
                        axis: axis.to_string(),
                        kernel: kernel.clone(),
                    }
                    .into());
                }
                let other = self.kernels.get(kernel)?;
                self.candidates(&other, axis, numeric_type, chain)
            }
        }
    }
}

/// A resolved, restartable config space. Every call to [`ConfigSpace::iter`]
/// walks the same candidates in the same order.
#[derive(Debug, Clone)]
pub struct ConfigSpace {
    descriptor: DynKernel,
    functional: Functional,
    line: ProductionLine,
    axes: Vec<(String, Vec<Value>)>,
    knobs: KnobDomains,
}

impl ConfigSpace {
    pub fn kernel(&self) -> &str {
        self.descriptor.name()
    }

    pub fn functional(&self) -> &Functional {
        &self.functional
    }

    pub fn production_line(&self) -> ProductionLine {
        self.line
    }

    /// Candidate values per axis after filtering, in declaration order.
    pub fn axis_candidates(&self) -> &[(String, Vec<Value>)] {
        &self.axes
    }

    /// Size of the cross product before exclusion rules.
    pub fn upper_bound(&self) -> usize {
        self.dims().product()
    }

    pub fn iter(&self) -> ConfigIter<'_> {
        ConfigIter {
            space: self,
            next: 0,
            total: self.upper_bound(),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<Config>> {
        self.iter().collect()
    }

    fn dims(&self) -> impl Iterator<Item = usize> + '_ {
        self.axes
            .iter()
            .map(|(_, candidates)| candidates.len())
            .chain([
                self.knobs.waves_per_eu.len(),
                self.knobs.num_warps.len(),
                self.knobs.num_stages.len(),
            ])
    }

    /// Decode a position in the cross product; the last dimension varies fastest.
    fn candidate_at(&self, mut index: usize) -> Config {
        let dims: Vec<usize> = self.dims().collect();
        let mut digits = vec![0; dims.len()];
        for (digit, len) in digits.iter_mut().zip(&dims).rev() {
            *digit = index % len;
            index /= len;
        }

        let n_axes = self.axes.len();
        let values = self
            .axes
            .iter()
            .zip(&digits)
            .map(|((name, candidates), &digit)| (name.clone(), candidates[digit].clone()))
            .collect();
        let knobs = SchedulingKnobs {
            waves_per_eu: self.knobs.waves_per_eu[digits[n_axes]],
            num_warps: self.knobs.num_warps[digits[n_axes + 1]],
            num_stages: self.knobs.num_stages[digits[n_axes + 2]],
        };
        Config::new(values, knobs)
    }

    fn empty_error(&self) -> TuneError {
        TuneError::ConfigSpaceEmpty {
            kernel: self.descriptor.name().to_string(),
            arch: self.functional.arch.clone(),
            numeric_type: self.functional.numeric_type.tag().to_string(),
        }
    }
}

impl<'a> IntoIterator for &'a ConfigSpace {
    type Item = Result<Config>;
    type IntoIter = ConfigIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One traversal of a [`ConfigSpace`]. Rules run in declaration order and the
/// first rule that drops a candidate ends its evaluation.
#[derive(Debug)]
pub struct ConfigIter<'a> {
    space: &'a ConfigSpace,
    next: usize,
    total: usize,
}

impl Iterator for ConfigIter<'_> {
    type Item = Result<Config>;

    fn next(&mut self) -> Option<Self::Item> {
        let space = self.space;
        let ctx = RuleContext::new(&space.functional, space.line);
        'candidates: while self.next < self.total {
            let config = space.candidate_at(self.next);
            self.next += 1;

            for rule in space.descriptor.rules() {
                match rule.keeps(&config, &ctx) {
                    Ok(true) => {}
                    Ok(false) => {
                        trace!(rule = rule.name(), %config, "candidate dropped");
                        continue 'candidates;
                    }
                    Err(err) => {
                        self.next = self.total;
                        return Some(Err(err));
                    }
                }
            }
            return Some(Ok(config));
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.total - self.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusetune_kernels::{
        AdmissibilityFilter, Axis, AxisRegistry, ExclusionRule, KernelKind, ParameterSchema,
        BWD_KERNEL_FUSE,
    };
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn functional(arch: &str, numeric_type: NumericType, head_dim: i64) -> Functional {
        Functional::new(arch, numeric_type)
            .with_constant("BLOCK_DMODEL", head_dim)
            .with_constant("CAUSAL_TYPE", 0)
            .with_constant("ENABLE_DROPOUT", false)
            .with_constant("PADDED_HEAD", false)
            .with_constant("BIAS_TYPE", 0)
    }

    fn bwd_configs(arch: &str, numeric_type: NumericType, head_dim: i64) -> Vec<Config> {
        let generator = ConfigGenerator::with_defaults().unwrap();
        generator
            .generate(BWD_KERNEL_FUSE, &functional(arch, numeric_type, head_dim))
            .unwrap()
            .to_vec()
            .unwrap()
    }

    fn block_pair(config: &Config) -> (i64, i64) {
        (config.int("BLOCK_M").unwrap(), config.int("BLOCK_N").unwrap())
    }

    #[test]
    fn test_cdna_fp16_block_pairs() {
        let configs = bwd_configs("gfx942", NumericType::Fp16, 128);

        let pairs: HashSet<(i64, i64)> = configs.iter().map(block_pair).collect();
        assert_eq!(pairs.len(), 6);

        for waves in 1..=4 {
            let warps4: Vec<(i64, i64)> = configs
                .iter()
                .filter(|c| c.waves_per_eu() == waves && c.num_warps() == 4)
                .map(block_pair)
                .collect();
            assert_eq!(warps4.len(), 5);
            assert!(!warps4.contains(&(64, 64)));

            let warps2 = configs
                .iter()
                .filter(|c| c.waves_per_eu() == waves && c.num_warps() == 2)
                .count();
            assert_eq!(warps2, 6);
        }
        assert_eq!(configs.len(), 44);
    }

    #[test]
    fn test_rdna_drops_32x32_below_four_warps() {
        let configs = bwd_configs("gfx1100", NumericType::Bf16, 64);
        assert!(!configs
            .iter()
            .any(|c| block_pair(c) == (32, 32) && c.num_warps() != 4));
        assert!(configs
            .iter()
            .any(|c| block_pair(c) == (64, 64) && c.num_warps() == 4));
        assert_eq!(configs.len(), 44);
    }

    #[test]
    fn test_fp32_uses_smaller_blocks() {
        let configs = bwd_configs("gfx90a", NumericType::Fp32, 64);
        assert!(configs.iter().all(|c| c.int("BLOCK_M").unwrap() <= 32));
        assert_eq!(configs.len(), 3 * 4 * 2);
    }

    #[test]
    fn test_traversal_order_is_outer_to_inner() {
        let configs = bwd_configs("gfx942", NumericType::Fp16, 128);
        let first = &configs[0];
        assert_eq!(block_pair(first), (16, 16));
        assert_eq!((first.waves_per_eu(), first.num_warps()), (1, 2));
        let second = &configs[1];
        assert_eq!(block_pair(second), (16, 16));
        assert_eq!((second.waves_per_eu(), second.num_warps()), (1, 4));
        assert_eq!(block_pair(configs.last().unwrap()), (64, 64));
    }

    #[test]
    fn test_head_dim_above_ceiling_empties_space() {
        let generator = ConfigGenerator::with_defaults().unwrap();
        let err = generator
            .generate(BWD_KERNEL_FUSE, &functional("gfx942", NumericType::Fp16, 300))
            .unwrap_err();
        assert_eq!(
            err,
            TuneError::ConfigSpaceEmpty {
                kernel: BWD_KERNEL_FUSE.into(),
                arch: "gfx942".into(),
                numeric_type: "*fp16:16".into(),
            }
        );
    }

    #[test]
    fn test_missing_constant_is_schema_error() {
        let generator = ConfigGenerator::with_defaults().unwrap();
        let f = Functional::new("gfx942", NumericType::Fp16).with_constant("BLOCK_DMODEL", 64);
        let err = generator.generate(BWD_KERNEL_FUSE, &f).unwrap_err();
        assert!(matches!(err, TuneError::Schema(SchemaError::Missing { .. })));
    }

    #[test]
    fn test_unknown_arch_and_kernel() {
        let generator = ConfigGenerator::with_defaults().unwrap();
        let f = functional("sm_90", NumericType::Fp16, 64);
        assert_eq!(
            generator.generate(BWD_KERNEL_FUSE, &f).unwrap_err(),
            TuneError::UnknownArchitecture("sm_90".into())
        );
        assert_eq!(
            generator
                .generate("bwd_kernel_dq", &functional("gfx942", NumericType::Fp16, 64))
                .unwrap_err(),
            TuneError::UnknownKernel("bwd_kernel_dq".into())
        );
    }

    #[test]
    fn test_default_config_and_first_candidate() {
        let generator = ConfigGenerator::with_defaults().unwrap();
        let f = functional("gfx942", NumericType::Fp16, 128);

        let default = generator.default_config(BWD_KERNEL_FUSE, &f).unwrap();
        assert_eq!(block_pair(&default), (16, 16));
        assert_eq!(default.num_warps(), 4);
        assert_eq!(default.num_stages(), 1);
        assert_eq!(default.waves_per_eu(), 0);

        let first = generator.first_candidate(BWD_KERNEL_FUSE, &f).unwrap();
        assert_eq!(first.num_warps(), 2);
        assert_eq!(first.waves_per_eu(), 1);
    }

    fn toy_kernel(name: &str, axis: Axis, rule: Option<ExclusionRule>) -> KernelDescriptor {
        let schema = ParameterSchema::builder()
            .runtime(["X"])
            .constants(["HEAD", "TILE"])
            .build()
            .unwrap();
        let axes = AxisRegistry::builder()
            .axis(axis)
            .filter("TILE", AdmissibilityFilter::new("even", |v| v.as_int().is_some_and(|t| t % 2 == 0)))
            .build()
            .unwrap();
        let mut builder = KernelDescriptor::builder(name, KernelKind::Forward)
            .schema(schema)
            .axes(axes);
        if let Some(rule) = rule {
            builder = builder.rule(rule);
        }
        builder.build().unwrap()
    }

    fn toy_generator(kernels: Vec<KernelDescriptor>) -> ConfigGenerator {
        let mut registry = KernelRegistry::new();
        for kernel in kernels {
            registry.register(kernel).unwrap();
        }
        ConfigGenerator::new(registry, ArchRegistry::default())
    }

    #[test]
    fn test_literal_candidates_are_filtered_and_deduplicated() {
        let generator = toy_generator(vec![toy_kernel(
            "toy",
            Axis::literal("TILE", [8, 3, 8, 16, 4]),
            None,
        )]);
        let f = Functional::new("gfx942", NumericType::Fp16).with_constant("HEAD", 64);
        let space = generator.generate("toy", &f).unwrap();
        let tiles: Vec<i64> = space
            .iter()
            .map(|c| c.unwrap().int("TILE").unwrap())
            .collect();
        assert_eq!(tiles, vec![8, 16, 4]);
    }

    #[test]
    fn test_match_cycle_is_detected() {
        let generator = toy_generator(vec![
            toy_kernel("left", Axis::matched("TILE", "right"), None),
            toy_kernel("right", Axis::matched("TILE", "left"), None),
        ]);
        let f = Functional::new("gfx942", NumericType::Fp16).with_constant("HEAD", 64);
        let err = generator.generate("left", &f).unwrap_err();
        assert!(matches!(err, TuneError::Schema(SchemaError::MatchCycle { .. })));
    }

    #[test]
    fn test_rule_failure_surfaces() {
        let rule = ExclusionRule::new("needs-head", &["HEAD"], |_, ctx| {
            Ok(ctx.constant_int("MISSING")? > 0)
        });
        let generator = toy_generator(vec![toy_kernel("toy", Axis::literal("TILE", [2, 4]), Some(rule))]);
        let f = Functional::new("gfx942", NumericType::Fp16).with_constant("HEAD", 64);
        assert!(matches!(
            generator.generate("toy", &f).unwrap_err(),
            TuneError::Schema(SchemaError::Missing { .. })
        ));
    }

    #[test]
    fn test_rules_short_circuit_in_order() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let second_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&second_calls);
        let schema = ParameterSchema::builder().constants(["TILE"]).build().unwrap();
        let axes = AxisRegistry::builder()
            .axis(Axis::literal("TILE", [1, 2, 3, 4]))
            .build()
            .unwrap();
        let kernel = KernelDescriptor::builder("toy", KernelKind::Forward)
            .schema(schema)
            .axes(axes)
            .rule(ExclusionRule::new("even-only", &["TILE"], |cfg, _| {
                Ok(cfg.int("TILE")? % 2 == 0)
            }))
            .rule(ExclusionRule::new("count", &["TILE"], move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }))
            .build()
            .unwrap();
        let generator = toy_generator(vec![kernel]);
        let space = generator
            .generate("toy", &Functional::new("gfx942", NumericType::Fp16))
            .unwrap();

        second_calls.store(0, Ordering::SeqCst);
        assert_eq!(space.to_vec().unwrap().len(), 2);
        assert_eq!(second_calls.load(Ordering::SeqCst), 2);
    }

    fn arb_functional() -> impl Strategy<Value = Functional> {
        (
            prop::sample::select(vec!["gfx90a", "gfx942", "gfx950", "gfx1100", "gfx1201"]),
            prop::sample::select(NumericType::ALL.to_vec()),
            prop::sample::select(vec![16i64, 32, 48, 64, 80, 96, 128, 160, 192, 224, 256]),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(arch, numeric_type, head_dim, causal, padded)| {
                functional(arch, numeric_type, head_dim)
                    .with_constant("CAUSAL_TYPE", i64::from(causal))
                    .with_constant("PADDED_HEAD", padded)
            })
    }

    proptest! {
        #[test]
        fn prop_generation_is_deterministic_and_deduplicated(f in arb_functional()) {
            let generator = ConfigGenerator::with_defaults().unwrap();
            let first = generator.generate(BWD_KERNEL_FUSE, &f).unwrap().to_vec().unwrap();
            let again = generator.generate(BWD_KERNEL_FUSE, &f).unwrap().to_vec().unwrap();
            prop_assert!(!first.is_empty());
            prop_assert_eq!(&first, &again);

            let unique: HashSet<&Config> = first.iter().collect();
            prop_assert_eq!(unique.len(), first.len());
        }

        #[test]
        fn prop_primary_block_never_below_secondary(f in arb_functional()) {
            let generator = ConfigGenerator::with_defaults().unwrap();
            let space = generator.generate(BWD_KERNEL_FUSE, &f).unwrap();
            for config in space.iter() {
                let (m, n) = block_pair(&config.unwrap());
                prop_assert!(m >= n, "BLOCK_M {} < BLOCK_N {}", m, n);
            }
        }

        #[test]
        fn prop_restarted_traversals_match(f in arb_functional()) {
            let generator = ConfigGenerator::with_defaults().unwrap();
            let space = generator.generate(BWD_KERNEL_FUSE, &f).unwrap();
            let mut left = space.iter();
            let _ = left.next();
            let right: Vec<Config> = space.iter().map(|c| c.unwrap()).collect();
            let rest: Vec<Config> = left.map(|c| c.unwrap()).collect();
            prop_assert_eq!(&right[1..], &rest[..]);
        }
    }
}

//! Kernel descriptors: schema, axes, knob domains and pruning rules composed
//! under a kernel-kind tag.

use crate::arch::ProductionLine;
use crate::axis::AxisRegistry;
use crate::binning::AutotuneKey;
use crate::config::{Config, NumericType, SchedulingKnobs, Value};
use crate::error::{Result, SchemaError, TuneError};
use crate::functional::Functional;
use crate::schema::ParameterSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    Forward,
    FusedBackward,
}

/// What an exclusion rule can see besides the candidate itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    functional: &'a Functional,
    line: ProductionLine,
}

impl<'a> RuleContext<'a> {
    pub fn new(functional: &'a Functional, line: ProductionLine) -> Self {
        Self { functional, line }
    }

    pub fn arch(&self) -> &str {
        &self.functional.arch
    }

    pub fn production_line(&self) -> ProductionLine {
        self.line
    }

    pub fn is_cdna(&self) -> bool {
        self.line == ProductionLine::Cdna
    }

    pub fn is_rdna(&self) -> bool {
        self.line == ProductionLine::Rdna
    }

    pub fn numeric_type(&self) -> NumericType {
        self.functional.numeric_type
    }

    pub fn functional(&self) -> &Functional {
        self.functional
    }

    pub fn constant_int(&self, name: &str) -> Result<i64> {
        Ok(self.functional.resolve_int(name)?)
    }
}

type KeepFn = dyn Fn(&Config, &RuleContext<'_>) -> Result<bool> + Send + Sync;

/// Named pruning heuristic. Returns `true` to keep a candidate.
#[derive(Clone)]
pub struct ExclusionRule {
    name: String,
    references: Vec<String>,
    keep: Arc<KeepFn>,
}

impl ExclusionRule {
    /// `references` lists the axes and constants the rule reads; they are
    /// checked against the kernel declaration when the descriptor is built.
    pub fn new<N, F>(name: N, references: &[&str], keep: F) -> Self
    where
        N: Into<String>,
        F: Fn(&Config, &RuleContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            references: references.iter().map(|r| r.to_string()).collect(),
            keep: Arc::new(keep),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn keeps(&self, config: &Config, ctx: &RuleContext<'_>) -> Result<bool> {
        (self.keep)(config, ctx)
    }
}

impl fmt::Debug for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionRule")
            .field("name", &self.name)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

/// Candidate domains for the scheduling knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnobDomains {
    pub waves_per_eu: Vec<u32>,
    pub num_warps: Vec<u32>,
    pub num_stages: Vec<u32>,
}

impl Default for KnobDomains {
    fn default() -> Self {
        let knobs = SchedulingKnobs::default();
        Self {
            waves_per_eu: vec![knobs.waves_per_eu],
            num_warps: vec![knobs.num_warps],
            num_stages: vec![knobs.num_stages],
        }
    }
}

impl KnobDomains {
    fn dedup(mut self) -> Self {
        for domain in [&mut self.waves_per_eu, &mut self.num_warps, &mut self.num_stages] {
            let mut seen = Vec::with_capacity(domain.len());
            domain.retain(|v| {
                let fresh = !seen.contains(v);
                seen.push(*v);
                fresh
            });
        }
        self
    }
}

/// Runtime values of the arguments a kernel bins for table lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeShape(BTreeMap<String, u64>);

impl RuntimeShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<N: Into<String>>(mut self, argument: N, value: u64) -> Self {
        self.0.insert(argument.into(), value);
        self
    }

    pub fn get(&self, argument: &str) -> Option<u64> {
        self.0.get(argument).copied()
    }
}

#[derive(Debug, Clone)]
pub struct KernelDescriptor {
    name: String,
    kind: KernelKind,
    interface: String,
    schema: ParameterSchema,
    axes: AxisRegistry,
    knobs: KnobDomains,
    default_knobs: SchedulingKnobs,
    rules: Vec<ExclusionRule>,
    autotune_keys: Vec<AutotuneKey>,
    partially_tuned: BTreeMap<String, Value>,
}

impl KernelDescriptor {
    pub fn builder<N: Into<String>>(name: N, kind: KernelKind) -> KernelDescriptorBuilder {
        KernelDescriptorBuilder {
            name: name.into(),
            kind,
            interface: None,
            schema: None,
            axes: AxisRegistry::default(),
            knobs: KnobDomains::default(),
            default_knobs: SchedulingKnobs::default(),
            rules: Vec::new(),
            autotune_keys: Vec::new(),
            partially_tuned: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// Shared operator interface this kernel implements.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn axes(&self) -> &AxisRegistry {
        &self.axes
    }

    pub fn knobs(&self) -> &KnobDomains {
        &self.knobs
    }

    pub fn default_knobs(&self) -> SchedulingKnobs {
        self.default_knobs
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn autotune_keys(&self) -> &[AutotuneKey] {
        &self.autotune_keys
    }

    pub fn partially_tuned(&self) -> &BTreeMap<String, Value> {
        &self.partially_tuned
    }

    /// Compile-time constants that a functional must bind, i.e. every
    /// constant that is not itself a performance axis.
    pub fn functional_constants(&self) -> impl Iterator<Item = &str> {
        self.schema
            .constants()
            .iter()
            .map(String::as_str)
            .filter(|name| !self.axes.contains(name))
    }

    /// Functional constants that take part in table keys, with their bound
    /// values. Partially tuned flags are left out.
    pub fn tuned_constants(&self, functional: &Functional) -> BTreeMap<String, Value> {
        self.functional_constants()
            .filter(|name| !self.partially_tuned.contains_key(*name))
            .filter_map(|name| {
                functional
                    .get(name)
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect()
    }

    /// The functional actually benchmarked when tuning on behalf of `functional`:
    /// partially tuned flags are pinned to their declared values.
    pub fn tuning_functional(&self, functional: &Functional) -> Functional {
        functional.with_overrides(&self.partially_tuned)
    }

    /// Bucket every autotune key. Missing runtime values count as zero.
    pub fn bucket_keys(&self, line: ProductionLine, shape: &RuntimeShape) -> Vec<u64> {
        self.autotune_keys
            .iter()
            .map(|key| key.bucket(line, shape.get(&key.argument).unwrap_or(0)))
            .collect()
    }
}

#[derive(Debug)]
pub struct KernelDescriptorBuilder {
    name: String,
    kind: KernelKind,
    interface: Option<String>,
    schema: Option<ParameterSchema>,
    axes: AxisRegistry,
    knobs: KnobDomains,
    default_knobs: SchedulingKnobs,
    rules: Vec<ExclusionRule>,
    autotune_keys: Vec<AutotuneKey>,
    partially_tuned: BTreeMap<String, Value>,
}

impl KernelDescriptorBuilder {
    pub fn interface<I: Into<String>>(mut self, interface: I) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn axes(mut self, axes: AxisRegistry) -> Self {
        self.axes = axes;
        self
    }

    pub fn knobs(mut self, knobs: KnobDomains) -> Self {
        self.knobs = knobs;
        self
    }

    pub fn default_knobs(mut self, knobs: SchedulingKnobs) -> Self {
        self.default_knobs = knobs;
        self
    }

    /// Rules run in the order they are added.
    pub fn rule(mut self, rule: ExclusionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn autotune_key(mut self, key: AutotuneKey) -> Self {
        self.autotune_keys.push(key);
        self
    }

    pub fn partially_tuned<N: Into<String>, V: Into<Value>>(mut self, name: N, tuned_with: V) -> Self {
        self.partially_tuned.insert(name.into(), tuned_with.into());
        self
    }

    pub fn build(self) -> Result<KernelDescriptor> {
        let schema = match self.schema {
            Some(schema) => schema,
            None => ParameterSchema::builder().build()?,
        };
        let undeclared = |name: &str| -> TuneError {
            SchemaError::UndeclaredReference {
                owner: self.name.clone(),
                name: name.to_string(),
            }
            .into()
        };

        for axis in self.axes.axes() {
            if !schema.is_constant(&axis.name) {
                return Err(undeclared(&axis.name));
            }
        }
        for name in self.axes.filtered_names() {
            if !schema.is_constant(name) {
                return Err(undeclared(name));
            }
        }
        for rule in &self.rules {
            if let Some(name) = rule
                .references()
                .iter()
                .find(|name| !self.axes.contains(name) && !schema.is_constant(name))
            {
                return Err(SchemaError::UndeclaredReference {
                    owner: format!("{}::{}", self.name, rule.name()),
                    name: name.clone(),
                }
                .into());
            }
        }
        for key in &self.autotune_keys {
            if !schema.contains(&key.argument) || schema.is_constant(&key.argument) {
                return Err(undeclared(&key.argument));
            }
        }
        for name in self.partially_tuned.keys() {
            if !schema.is_constant(name) || self.axes.contains(name) {
                return Err(undeclared(name));
            }
        }

        Ok(KernelDescriptor {
            interface: self.interface.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            kind: self.kind,
            schema,
            axes: self.axes,
            knobs: self.knobs.dedup(),
            default_knobs: self.default_knobs,
            rules: self.rules,
            autotune_keys: self.autotune_keys,
            partially_tuned: self.partially_tuned,
        })
    }
}

//! Tunable performance axes and their candidate domains.

use crate::config::{NumericType, Value};
use crate::error::{Result, TuneError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Where an axis takes its candidate values from.
#[derive(Debug, Clone)]
pub enum CandidateSource {
    Literal(Vec<Value>),
    /// Candidates depend on the functional's numeric type.
    ByNumericType(fn(NumericType) -> Vec<Value>),
    /// Reuse the candidates another kernel declares for the axis of the same name.
    Matched { kernel: String },
}

#[derive(Debug, Clone)]
pub struct Axis {
    pub name: String,
    pub source: CandidateSource,
}

impl Axis {
    pub fn literal<N, I, V>(name: N, values: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            name: name.into(),
            source: CandidateSource::Literal(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn by_numeric_type<N: Into<String>>(name: N, values: fn(NumericType) -> Vec<Value>) -> Self {
        Self {
            name: name.into(),
            source: CandidateSource::ByNumericType(values),
        }
    }

    pub fn matched<N: Into<String>, K: Into<String>>(name: N, kernel: K) -> Self {
        Self {
            name: name.into(),
            source: CandidateSource::Matched {
                kernel: kernel.into(),
            },
        }
    }
}

/// Admissibility predicate over a single candidate value.
#[derive(Clone)]
pub struct AdmissibilityFilter {
    description: String,
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl AdmissibilityFilter {
    pub fn new<D, F>(description: D, predicate: F) -> Self
    where
        D: Into<String>,
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Integer ceiling; non-integer values are rejected.
    pub fn at_most(limit: i64) -> Self {
        Self::new(format!("<= {limit}"), move |value| {
            value.as_int().is_some_and(|v| v <= limit)
        })
    }

    pub fn admits(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for AdmissibilityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissibilityFilter")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Declared performance axes plus per-name admissibility filters.
///
/// Filters are keyed by name and apply either to a performance axis or to a
/// compile-time constant resolved from the functional.
#[derive(Debug, Clone, Default)]
pub struct AxisRegistry {
    axes: Vec<Axis>,
    filters: BTreeMap<String, AdmissibilityFilter>,
}

impl AxisRegistry {
    pub fn builder() -> AxisRegistryBuilder {
        AxisRegistryBuilder::default()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.axis(name).is_some()
    }

    pub fn filter(&self, name: &str) -> Option<&AdmissibilityFilter> {
        self.filters.get(name)
    }

    pub fn filtered_names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    /// Values without a filter are always admitted.
    pub fn admits(&self, name: &str, value: &Value) -> bool {
        self.filters
            .get(name)
            .map_or(true, |filter| filter.admits(value))
    }
}

#[derive(Debug, Default)]
pub struct AxisRegistryBuilder {
    axes: Vec<Axis>,
    filters: Vec<(String, AdmissibilityFilter)>,
}

impl AxisRegistryBuilder {
    pub fn axis(mut self, axis: Axis) -> Self {
        self.axes.push(axis);
        self
    }

    pub fn filter<N: Into<String>>(mut self, name: N, filter: AdmissibilityFilter) -> Self {
        self.filters.push((name.into(), filter));
        self
    }

    pub fn build(self) -> Result<AxisRegistry> {
        for (idx, axis) in self.axes.iter().enumerate() {
            if self.axes[..idx].iter().any(|prev| prev.name == axis.name) {
                return Err(TuneError::DuplicateName {
                    kind: "axis",
                    name: axis.name.clone(),
                });
            }
        }

        let mut filters = BTreeMap::new();
        for (name, filter) in self.filters {
            if filters.contains_key(&name) {
                return Err(TuneError::DuplicateName {
                    kind: "filter",
                    name,
                });
            }
            filters.insert(name, filter);
        }

        Ok(AxisRegistry {
            axes: self.axes,
            filters,
        })
    }
}

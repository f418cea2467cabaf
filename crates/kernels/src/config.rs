//! Kernel configuration structures.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A compile-time value bound to a kernel argument or axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// Integer view. Booleans are not integers and yield `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(_) | Value::Str(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NumericType {
    Fp16,
    Bf16,
    Fp32,
}

impl NumericType {
    pub const ALL: [NumericType; 3] = [NumericType::Fp16, NumericType::Bf16, NumericType::Fp32];

    /// Tensor pointer signature used when keying tuned tables.
    pub fn tag(&self) -> &'static str {
        match self {
            NumericType::Fp16 => "*fp16:16",
            NumericType::Bf16 => "*bf16:16",
            NumericType::Fp32 => "*fp32:16",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fp16" | "f16" | "*fp16:16" => Some(NumericType::Fp16),
            "bf16" | "*bf16:16" => Some(NumericType::Bf16),
            "fp32" | "f32" | "*fp32:16" => Some(NumericType::Fp32),
            _ => None,
        }
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Launch-level knobs that accompany every config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulingKnobs {
    pub num_warps: u32,
    pub num_stages: u32,
    /// Occupancy hint; zero leaves the choice to the compiler.
    pub waves_per_eu: u32,
}

impl Default for SchedulingKnobs {
    fn default() -> Self {
        Self {
            num_warps: 4,
            num_stages: 1,
            waves_per_eu: 0,
        }
    }
}

/// One concrete kernel specialization: a value per performance axis plus knobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Config {
    pub values: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub knobs: SchedulingKnobs,
}

impl Config {
    pub fn new(values: BTreeMap<String, Value>, knobs: SchedulingKnobs) -> Self {
        Self { values, knobs }
    }

    pub fn int(&self, axis: &str) -> Result<i64, SchemaError> {
        let value = self
            .values
            .get(axis)
            .ok_or_else(|| SchemaError::UnknownAxis(axis.to_string()))?;
        value.as_int().ok_or_else(|| SchemaError::NotAnInteger {
            name: axis.to_string(),
        })
    }

    pub fn num_warps(&self) -> u32 {
        self.knobs.num_warps
    }

    pub fn num_stages(&self) -> u32 {
        self.knobs.num_stages
    }

    pub fn waves_per_eu(&self) -> u32 {
        self.knobs.waves_per_eu
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.values {
            write!(f, "{name}={value} ")?;
        }
        write!(
            f,
            "waves_per_eu={} num_warps={} num_stages={}",
            self.knobs.waves_per_eu, self.knobs.num_warps, self.knobs.num_stages
        )
    }
}

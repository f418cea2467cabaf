//! Fully resolved kernel instantiations.

use crate::config::{NumericType, Value};
use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One instantiation of a kernel: target architecture, numeric type and the
/// compile-time constants it was specialized with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Functional {
    pub arch: String,
    pub numeric_type: NumericType,
    pub constants: BTreeMap<String, Value>,
}

impl Functional {
    pub fn new<A: Into<String>>(arch: A, numeric_type: NumericType) -> Self {
        Self {
            arch: arch.into(),
            numeric_type,
            constants: BTreeMap::new(),
        }
    }

    pub fn with_constant<N: Into<String>, V: Into<Value>>(mut self, name: N, value: V) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    /// Resolve a group of names that must agree on a single value.
    ///
    /// Fails when none of the names is bound, or when the bound names
    /// disagree.
    pub fn resolve_one(&self, names: &[&str]) -> Result<&Value, SchemaError> {
        let mut distinct: Vec<&Value> = Vec::new();
        for value in names.iter().filter_map(|name| self.constants.get(*name)) {
            if !distinct.contains(&value) {
                distinct.push(value);
            }
        }

        let names_owned = || names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        match distinct.as_slice() {
            [] => Err(SchemaError::Missing {
                names: names_owned(),
            }),
            [value] => Ok(*value),
            values => Err(SchemaError::Ambiguous {
                names: names_owned(),
                count: values.len(),
            }),
        }
    }

    pub fn resolve_int(&self, name: &str) -> Result<i64, SchemaError> {
        self.resolve_one(&[name])?
            .as_int()
            .ok_or_else(|| SchemaError::NotAnInteger {
                name: name.to_string(),
            })
    }

    /// Copy of this functional with some constants replaced.
    pub fn with_overrides<'a, I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let mut functional = self.clone();
        for (name, value) in overrides {
            functional.constants.insert(name.clone(), value.clone());
        }
        functional
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn functional() -> Functional {
        Functional::new("gfx942", NumericType::Fp16)
            .with_constant("BLOCK_DMODEL", 128)
            .with_constant("CAUSAL_TYPE", 0)
            .with_constant("K_DMODEL", 128)
            .with_constant("V_DMODEL", 64)
    }

    #[test]
    fn test_resolve_one_single_name() {
        assert_eq!(functional().resolve_int("BLOCK_DMODEL"), Ok(128));
    }

    #[test]
    fn test_resolve_one_agreeing_group() {
        let f = functional();
        assert_eq!(f.resolve_one(&["BLOCK_DMODEL", "K_DMODEL", "Q_DMODEL"]), Ok(&Value::Int(128)));
    }

    #[test]
    fn test_resolve_one_missing() {
        let err = functional().resolve_one(&["BIAS_TYPE"]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::Missing {
                names: vec!["BIAS_TYPE".into()]
            }
        );
    }

    #[test]
    fn test_resolve_one_ambiguous() {
        let err = functional()
            .resolve_one(&["BLOCK_DMODEL", "V_DMODEL"])
            .unwrap_err();
        assert!(matches!(err, SchemaError::Ambiguous { count: 2, .. }));
    }
}

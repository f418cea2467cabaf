//! Ordered kernel argument lists.

use crate::error::SchemaError;
use std::collections::HashMap;

/// Argument list of a kernel, split into runtime arguments followed by
/// compile-time constants. Positions are stable once built.
#[derive(Debug, Clone)]
pub struct ParameterSchema {
    arguments: Vec<String>,
    first_constant: usize,
    positions: HashMap<String, usize>,
}

impl ParameterSchema {
    pub fn builder() -> ParameterSchemaBuilder {
        ParameterSchemaBuilder::default()
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn runtime_arguments(&self) -> &[String] {
        &self.arguments[..self.first_constant]
    }

    pub fn constants(&self) -> &[String] {
        &self.arguments[self.first_constant..]
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.position(name)
            .is_some_and(|pos| pos >= self.first_constant)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ParameterSchemaBuilder {
    runtime: Vec<String>,
    constants: Vec<String>,
}

impl ParameterSchemaBuilder {
    pub fn runtime<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runtime.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn constants<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constants.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<ParameterSchema, SchemaError> {
        let first_constant = self.runtime.len();
        let arguments: Vec<String> = self.runtime.into_iter().chain(self.constants).collect();

        let mut positions = HashMap::with_capacity(arguments.len());
        for (pos, name) in arguments.iter().enumerate() {
            if positions.insert(name.clone(), pos).is_some() {
                return Err(SchemaError::DuplicateArgument(name.clone()));
            }
        }

        Ok(ParameterSchema {
            arguments,
            first_constant,
            positions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_partitions_constants() {
        let schema = ParameterSchema::builder()
            .runtime(["Q", "K", "max_seqlen_q"])
            .constants(["BLOCK_DMODEL", "BLOCK_M"])
            .build()
            .unwrap();

        assert_eq!(schema.position("Q"), Some(0));
        assert_eq!(schema.position("BLOCK_M"), Some(4));
        assert_eq!(schema.runtime_arguments().len(), 3);
        assert_eq!(schema.constants(), ["BLOCK_DMODEL", "BLOCK_M"]);
        assert!(schema.is_constant("BLOCK_DMODEL"));
        assert!(!schema.is_constant("max_seqlen_q"));
        assert!(!schema.is_constant("missing"));
    }

    #[test]
    fn test_schema_rejects_duplicates() {
        let err = ParameterSchema::builder()
            .runtime(["Q", "K"])
            .constants(["Q"])
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateArgument("Q".into()));
    }
}

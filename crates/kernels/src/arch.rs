//! Architecture production lines.

use crate::error::{Result, TuneError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hardware family whose members share pruning heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductionLine {
    Cdna,
    Rdna,
}

impl ProductionLine {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionLine::Cdna => "CDNA",
            ProductionLine::Rdna => "RDNA",
        }
    }
}

impl fmt::Display for ProductionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps concrete target identifiers (e.g. `gfx942`) to their production line.
#[derive(Debug, Clone)]
pub struct ArchRegistry {
    lines: BTreeMap<String, ProductionLine>,
}

impl Default for ArchRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        for arch in ["gfx90a", "gfx942", "gfx950"] {
            registry.register(arch, ProductionLine::Cdna);
        }
        for arch in ["gfx1100", "gfx1101", "gfx1102", "gfx1151", "gfx1200", "gfx1201"] {
            registry.register(arch, ProductionLine::Rdna);
        }
        registry
    }
}

impl ArchRegistry {
    pub fn new() -> Self {
        Self {
            lines: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, arch: &str, line: ProductionLine) {
        self.lines.insert(arch.to_string(), line);
    }

    pub fn production_line(&self, arch: &str) -> Result<ProductionLine> {
        self.lines
            .get(arch)
            .copied()
            .ok_or_else(|| TuneError::UnknownArchitecture(arch.to_string()))
    }

    pub fn architectures(&self) -> impl Iterator<Item = (&str, ProductionLine)> {
        self.lines.iter().map(|(arch, line)| (arch.as_str(), *line))
    }
}

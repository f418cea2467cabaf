//! Discretization of runtime shape values into lookup-table buckets.

use crate::arch::ProductionLine;
use crate::error::{Result, TuneError};
use serde::{Deserialize, Serialize};

const SEQLEN_THRESHOLDS: [u64; 7] = [16, 32, 64, 128, 256, 512, 1024];

/// Navi parts are tuned on their own ladder. It currently matches the CDNA
/// one and may diverge when RDNA tables are regenerated.
const NAVI_SEQLEN_THRESHOLDS: [u64; 7] = [16, 32, 64, 128, 256, 512, 1024];

/// Strictly increasing, non-empty list of bucket thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct Ladder(Vec<u64>);

impl Ladder {
    pub fn new(thresholds: Vec<u64>) -> Result<Self> {
        let increasing = thresholds.windows(2).all(|pair| pair[0] < pair[1]);
        if thresholds.is_empty() || !increasing {
            return Err(TuneError::InvalidLadder(thresholds));
        }
        Ok(Self(thresholds))
    }

    /// Powers of two from 16 through 1024.
    pub fn seqlen() -> Self {
        Self(SEQLEN_THRESHOLDS.to_vec())
    }

    /// Sequence-length ladder for RDNA (Navi) targets.
    pub fn navi_seqlen() -> Self {
        Self(NAVI_SEQLEN_THRESHOLDS.to_vec())
    }

    pub fn thresholds(&self) -> &[u64] {
        &self.0
    }

    pub fn top(&self) -> u64 {
        // Non-empty by construction.
        self.0[self.0.len() - 1]
    }
}

impl TryFrom<Vec<u64>> for Ladder {
    type Error = TuneError;

    fn try_from(value: Vec<u64>) -> Result<Self> {
        Ladder::new(value)
    }
}

impl From<Ladder> for Vec<u64> {
    fn from(value: Ladder) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binning {
    /// The raw value is already a discrete category.
    Exact,
    /// Smallest threshold not below the raw value. Values past the top
    /// threshold saturate into the top bucket.
    LessOrEqual(Ladder),
}

impl Binning {
    pub fn less_or_equal(thresholds: Vec<u64>) -> Result<Self> {
        Ladder::new(thresholds).map(Binning::LessOrEqual)
    }

    pub fn bucket(&self, raw: u64) -> u64 {
        match self {
            Binning::Exact => raw,
            Binning::LessOrEqual(ladder) => {
                let thresholds = ladder.thresholds();
                let idx = thresholds.partition_point(|&t| t < raw);
                thresholds.get(idx).copied().unwrap_or_else(|| ladder.top())
            }
        }
    }

    /// Every bucket this strategy can produce, when finite.
    pub fn buckets(&self) -> Option<&[u64]> {
        match self {
            Binning::Exact => None,
            Binning::LessOrEqual(ladder) => Some(ladder.thresholds()),
        }
    }
}

/// A runtime argument whose binned value keys the tuned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutotuneKey {
    pub argument: String,
    pub binning: Binning,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<(ProductionLine, Binning)>,
}

impl AutotuneKey {
    pub fn new<A: Into<String>>(argument: A, binning: Binning) -> Self {
        Self {
            argument: argument.into(),
            binning,
            overrides: Vec::new(),
        }
    }

    /// Use a different strategy on one production line.
    pub fn with_override(mut self, line: ProductionLine, binning: Binning) -> Self {
        self.overrides.retain(|(existing, _)| *existing != line);
        self.overrides.push((line, binning));
        self
    }

    pub fn binning_for(&self, line: ProductionLine) -> &Binning {
        self.overrides
            .iter()
            .find(|(existing, _)| *existing == line)
            .map_or(&self.binning, |(_, binning)| binning)
    }

    pub fn bucket(&self, line: ProductionLine, raw: u64) -> u64 {
        self.binning_for(line).bucket(raw)
    }
}

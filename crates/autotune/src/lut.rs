//! Tuned lookup tables: offline builder, frozen table, persistence.

use anyhow::{bail, Result};
use fusetune_kernels::{Config, Functional, KernelDescriptor, NumericType, Value};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Current on-disk format.
pub const LUT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LutKey {
    pub kernel: String,
    pub arch: String,
    pub numeric_type: NumericType,
    /// Tuned compile-time constants; partially tuned flags never appear here.
    pub constants: BTreeMap<String, Value>,
    /// Bucketed runtime values in autotune-key order.
    pub buckets: Vec<u64>,
}

impl LutKey {
    pub fn new(
        descriptor: &KernelDescriptor,
        arch: &str,
        numeric_type: NumericType,
        functional: &Functional,
        buckets: Vec<u64>,
    ) -> Self {
        Self {
            kernel: descriptor.name().to_string(),
            arch: arch.to_string(),
            numeric_type,
            constants: descriptor.tuned_constants(functional),
            buckets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LutEntry {
    pub key: LutKey,
    pub config: Config,
    pub time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Hit(&'a Config),
    Miss,
}

impl<'a> Lookup<'a> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn config(&self) -> Option<&'a Config> {
        match self {
            Lookup::Hit(config) => Some(config),
            Lookup::Miss => None,
        }
    }
}

/// Append-only table under construction by a tuning pass.
#[derive(Debug, Default, Clone)]
pub struct LutBuilder {
    entries: HashMap<LutKey, LutEntry>,
}

impl LutBuilder {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Start a re-tuning pass from an existing table.
    pub fn from_table(table: LookupTable) -> Self {
        Self {
            entries: table.entries,
        }
    }

    /// Record a measured winner. An existing entry for the same key is only
    /// replaced by a strictly faster one.
    pub fn record(&mut self, entry: LutEntry) -> bool {
        if let Some(existing) = self.entries.get(&entry.key) {
            if entry.time_ms >= existing.time_ms {
                return false;
            }
        }
        self.entries.insert(entry.key.clone(), entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn freeze(self) -> LookupTable {
        LookupTable {
            entries: self.entries,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LutFile {
    format_version: u32,
    entries: Vec<LutEntry>,
}

/// Read-only table consulted at dispatch time.
#[derive(Debug, Default, Clone)]
pub struct LookupTable {
    entries: HashMap<LutKey, LutEntry>,
}

impl LookupTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &LutKey) -> Lookup<'_> {
        self.entries
            .get(key)
            .map_or(Lookup::Miss, |entry| Lookup::Hit(&entry.config))
    }

    /// Look up the tuned config for a bucketed shape. Never fails; absent
    /// entries come back as [`Lookup::Miss`].
    pub fn lookup(
        &self,
        descriptor: &KernelDescriptor,
        arch: &str,
        numeric_type: NumericType,
        buckets: &[u64],
        functional: &Functional,
    ) -> Lookup<'_> {
        let key = LutKey::new(descriptor, arch, numeric_type, functional, buckets.to_vec());
        self.get(&key)
    }

    /// A missing file loads as an empty table.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no tuned table on disk; every lookup will miss");
            return Ok(Self::empty());
        }
        let data = fs::read(path)?;
        let file: LutFile = serde_json::from_slice(&data)?;
        if file.format_version != LUT_FORMAT_VERSION {
            bail!(
                "tuned table {} has format version {}, expected {}",
                path.display(),
                file.format_version,
                LUT_FORMAT_VERSION
            );
        }

        let mut entries = HashMap::with_capacity(file.entries.len());
        for entry in file.entries {
            if entries.contains_key(&entry.key) {
                bail!("tuned table {} repeats key {:?}", path.display(), entry.key);
            }
            entries.insert(entry.key.clone(), entry);
        }
        Ok(Self { entries })
    }

    /// Entries are written sorted by key so re-tuning diffs stay readable.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entries: Vec<LutEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let file = LutFile {
            format_version: LUT_FORMAT_VERSION,
            entries,
        };
        let blob = serde_json::to_vec_pretty(&file)?;
        fs::write(path, blob)?;
        Ok(())
    }
}

static GLOBAL_TABLE: OnceCell<LookupTable> = OnceCell::new();

/// Install the process-wide table. Only the first install succeeds.
pub fn install_global(table: LookupTable) -> Result<&'static LookupTable> {
    if GLOBAL_TABLE.set(table).is_err() {
        bail!("a tuned table is already installed for this process");
    }
    match GLOBAL_TABLE.get() {
        Some(table) => Ok(table),
        None => bail!("tuned table vanished after install"),
    }
}

pub fn global() -> Option<&'static LookupTable> {
    GLOBAL_TABLE.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusetune_kernels::{bwd_kernel_fuse, SchedulingKnobs};

    fn functional(padded: bool) -> Functional {
        Functional::new("gfx942", NumericType::Fp16)
            .with_constant("BLOCK_DMODEL", 128)
            .with_constant("CAUSAL_TYPE", 0)
            .with_constant("ENABLE_DROPOUT", false)
            .with_constant("PADDED_HEAD", padded)
            .with_constant("BIAS_TYPE", 0)
    }

    fn config(m: i64) -> Config {
        let mut values = BTreeMap::new();
        values.insert("BLOCK_M".to_string(), Value::Int(m));
        values.insert("BLOCK_N".to_string(), Value::Int(16));
        Config::new(values, SchedulingKnobs::default())
    }

    fn entry(descriptor: &KernelDescriptor, buckets: Vec<u64>, m: i64, time_ms: f64) -> LutEntry {
        LutEntry {
            key: LutKey::new(descriptor, "gfx942", NumericType::Fp16, &functional(false), buckets),
            config: config(m),
            time_ms,
        }
    }

    #[test]
    fn test_partially_tuned_flag_shares_entry() {
        let descriptor = bwd_kernel_fuse().unwrap();
        let mut builder = LutBuilder::new();
        builder.record(entry(&descriptor, vec![128, 256], 64, 1.5));
        let table = builder.freeze();

        let unpadded = table.lookup(&descriptor, "gfx942", NumericType::Fp16, &[128, 256], &functional(false));
        let padded = table.lookup(&descriptor, "gfx942", NumericType::Fp16, &[128, 256], &functional(true));
        assert!(unpadded.is_hit());
        assert_eq!(unpadded, padded);
    }

    #[test]
    fn test_lookup_misses_without_failing() {
        let descriptor = bwd_kernel_fuse().unwrap();
        let mut builder = LutBuilder::new();
        builder.record(entry(&descriptor, vec![128, 256], 64, 1.5));
        let table = builder.freeze();

        let f = functional(false);
        assert_eq!(table.lookup(&descriptor, "gfx1100", NumericType::Fp16, &[128, 256], &f), Lookup::Miss);
        assert_eq!(table.lookup(&descriptor, "gfx942", NumericType::Bf16, &[128, 256], &f), Lookup::Miss);
        assert_eq!(table.lookup(&descriptor, "gfx942", NumericType::Fp16, &[1024, 256], &f), Lookup::Miss);
        assert_eq!(table.lookup(&descriptor, "unknown", NumericType::Fp32, &[], &Functional::new("unknown", NumericType::Fp32)), Lookup::Miss);
        assert_eq!(LookupTable::empty().lookup(&descriptor, "gfx942", NumericType::Fp16, &[128, 256], &f), Lookup::Miss);
    }

    #[test]
    fn test_builder_keeps_faster_entry() {
        let descriptor = bwd_kernel_fuse().unwrap();
        let mut builder = LutBuilder::new();
        assert!(builder.record(entry(&descriptor, vec![64, 64], 32, 2.0)));
        assert!(!builder.record(entry(&descriptor, vec![64, 64], 16, 2.0)));
        assert!(builder.record(entry(&descriptor, vec![64, 64], 64, 1.0)));
        assert_eq!(builder.len(), 1);

        let table = builder.freeze();
        let hit = table
            .lookup(&descriptor, "gfx942", NumericType::Fp16, &[64, 64], &functional(false))
            .config()
            .cloned();
        assert_eq!(hit, Some(config(64)));
    }

    #[test]
    fn test_save_and_load_table() {
        let descriptor = bwd_kernel_fuse().unwrap();
        let mut builder = LutBuilder::new();
        builder.record(entry(&descriptor, vec![16, 16], 16, 0.5));
        builder.record(entry(&descriptor, vec![512, 1024], 64, 3.0));
        let table = builder.freeze();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuned").join("gfx942.json");
        table.save_to_file(&path).unwrap();

        let loaded = LookupTable::load_from_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let hit = loaded.lookup(&descriptor, "gfx942", NumericType::Fp16, &[512, 1024], &functional(true));
        assert_eq!(hit.config(), Some(&config(64)));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = LookupTable::load_from_file(&dir.path().join("absent.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        fs::write(&path, r#"{"format_version": 0, "entries": []}"#).unwrap();
        let err = LookupTable::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("format version 0"));
    }

    #[test]
    fn test_retuning_starts_from_existing_table() {
        let descriptor = bwd_kernel_fuse().unwrap();
        let mut builder = LutBuilder::new();
        builder.record(entry(&descriptor, vec![16, 16], 16, 0.5));
        let mut retune = LutBuilder::from_table(builder.freeze());
        assert!(!retune.record(entry(&descriptor, vec![16, 16], 32, 0.9)));
        assert!(retune.record(entry(&descriptor, vec![32, 16], 32, 0.9)));
        assert_eq!(retune.freeze().len(), 2);
    }

    #[test]
    fn test_global_install_happens_once() {
        let descriptor = bwd_kernel_fuse().unwrap();
        let mut builder = LutBuilder::new();
        builder.record(entry(&descriptor, vec![16, 16], 16, 0.5));

        let installed = install_global(builder.freeze()).unwrap();
        assert_eq!(installed.len(), 1);
        assert!(install_global(LookupTable::empty()).is_err());
        assert_eq!(global().map(LookupTable::len), Some(1));
    }
}

//! Kernel registry for lookup and cross-kernel axis sharing.

use crate::descriptor::KernelDescriptor;
use crate::error::{Result, TuneError};
use std::sync::Arc;
use tracing::debug;

pub type DynKernel = Arc<KernelDescriptor>;

#[derive(Debug, Default, Clone)]
pub struct KernelRegistry {
    kernels: Vec<DynKernel>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self {
            kernels: Vec::new(),
        }
    }

    pub fn with_default_kernels() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(crate::attention::attn_fwd()?)?;
        registry.register(crate::attention::bwd_kernel_fuse()?)?;
        Ok(registry)
    }

    pub fn register(&mut self, kernel: KernelDescriptor) -> Result<()> {
        if self.find(kernel.name()).is_some() {
            return Err(TuneError::DuplicateName {
                kind: "kernel",
                name: kernel.name().to_string(),
            });
        }
        debug!(
            kernel = kernel.name(),
            kind = ?kernel.kind(),
            axes = kernel.axes().axes().len(),
            rules = kernel.rules().len(),
            "registered kernel"
        );
        self.kernels.push(Arc::new(kernel));
        Ok(())
    }

    pub fn kernels(&self) -> &[DynKernel] {
        &self.kernels
    }

    pub fn find(&self, name: &str) -> Option<&DynKernel> {
        self.kernels.iter().find(|kernel| kernel.name() == name)
    }

    pub fn get(&self, name: &str) -> Result<DynKernel> {
        self.find(name)
            .map(Arc::clone)
            .ok_or_else(|| TuneError::UnknownKernel(name.to_string()))
    }
}

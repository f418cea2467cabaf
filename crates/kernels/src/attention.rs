//! Attention kernel declarations.
//!
//! `attn_fwd` owns the block-size choices; `bwd_kernel_fuse` matches them so
//! the forward and fused backward kernels are tuned over the same tiles.

use crate::arch::ProductionLine;
use crate::axis::{AdmissibilityFilter, Axis, AxisRegistry};
use crate::binning::{AutotuneKey, Binning, Ladder};
use crate::config::{NumericType, SchedulingKnobs, Value};
use crate::descriptor::{ExclusionRule, KernelDescriptor, KernelKind, KnobDomains};
use crate::error::Result;
use crate::schema::ParameterSchema;

pub const ATTN_FWD: &str = "attn_fwd";
pub const BWD_KERNEL_FUSE: &str = "bwd_kernel_fuse";

/// Largest head dimension the attention kernels are compiled for.
pub const MAX_HEAD_DIM: i64 = 256;

const STRIDE_GROUPS: [(&str, [&str; 4]); 4] = [
    ("q", ["z", "h", "m", "k"]),
    ("k", ["z", "h", "n", "k"]),
    ("v", ["z", "h", "k", "n"]),
    ("b", ["z", "h", "k", "n"]),
];

const SEQUENCE_ARGUMENTS: [&str; 14] = [
    "num_head_q",
    "num_head_k",
    "cu_seqlens_q",
    "cu_seqlens_k",
    "num_seqlens",
    "max_seqlen_q",
    "max_seqlen_k",
    "head_dim",
    "dropout_p",
    "philox_seed_ptr",
    "philox_offset1",
    "philox_offset2",
    "Window_left",
    "Window_right",
];

const ATTENTION_CONSTANTS: [&str; 7] = [
    "BLOCK_DMODEL",
    "CAUSAL_TYPE",
    "ENABLE_DROPOUT",
    "PADDED_HEAD",
    "BIAS_TYPE",
    "BLOCK_M",
    "BLOCK_N",
];

fn strides(tensors: &[(&str, [&str; 4])]) -> Vec<String> {
    tensors
        .iter()
        .flat_map(|(tensor, dims)| dims.iter().map(move |dim| format!("stride_{tensor}{dim}")))
        .collect()
}

fn block_sizes(numeric_type: NumericType) -> Vec<Value> {
    let sizes: &[i64] = match numeric_type {
        NumericType::Fp32 => &[16, 32],
        NumericType::Fp16 | NumericType::Bf16 => &[16, 32, 64],
    };
    sizes.iter().copied().map(Value::Int).collect()
}

fn seqlen_key(argument: &str) -> AutotuneKey {
    AutotuneKey::new(argument, Binning::LessOrEqual(Ladder::seqlen()))
        .with_override(ProductionLine::Rdna, Binning::LessOrEqual(Ladder::navi_seqlen()))
}

pub fn attn_fwd() -> Result<KernelDescriptor> {
    let mut runtime: Vec<String> = ["Q", "K", "V", "B", "A", "sm_scale", "L", "Out"]
        .into_iter()
        .map(String::from)
        .collect();
    let mut groups = STRIDE_GROUPS.to_vec();
    groups.push(("o", ["z", "h", "m", "n"]));
    runtime.extend(strides(&groups));
    runtime.extend(SEQUENCE_ARGUMENTS.iter().map(|s| s.to_string()));

    let schema = ParameterSchema::builder()
        .runtime(runtime)
        .constants(ATTENTION_CONSTANTS)
        .build()?;

    let axes = AxisRegistry::builder()
        .axis(Axis::by_numeric_type("BLOCK_M", block_sizes))
        .axis(Axis::by_numeric_type("BLOCK_N", block_sizes))
        .filter("BLOCK_DMODEL", AdmissibilityFilter::at_most(MAX_HEAD_DIM))
        .build()?;

    KernelDescriptor::builder(ATTN_FWD, KernelKind::Forward)
        .interface("op_attn_fwd")
        .schema(schema)
        .axes(axes)
        .knobs(KnobDomains {
            waves_per_eu: vec![1, 2, 3, 4],
            num_warps: vec![2, 4],
            num_stages: vec![1],
        })
        .autotune_key(seqlen_key("max_seqlen_q"))
        .autotune_key(seqlen_key("max_seqlen_k"))
        .partially_tuned("PADDED_HEAD", false)
        .build()
}

pub fn bwd_kernel_fuse() -> Result<KernelDescriptor> {
    let mut runtime: Vec<String> = ["Q", "K", "V", "B", "sm_scale", "Out", "DO", "DK", "DV", "DQ", "DB", "L"]
        .into_iter()
        .map(String::from)
        .collect();
    let mut groups = STRIDE_GROUPS.to_vec();
    groups.extend([
        ("o", ["z", "h", "m", "k"]),
        ("do", ["z", "h", "m", "k"]),
        ("dk", ["z", "h", "n", "k"]),
        ("dv", ["z", "h", "k", "n"]),
        ("dq", ["z", "h", "m", "k"]),
        ("db", ["z", "h", "m", "n"]),
    ]);
    runtime.extend(strides(&groups));
    runtime.extend(SEQUENCE_ARGUMENTS.iter().map(|s| s.to_string()));

    let schema = ParameterSchema::builder()
        .runtime(runtime)
        .constants(ATTENTION_CONSTANTS)
        .build()?;

    let axes = AxisRegistry::builder()
        .axis(Axis::matched("BLOCK_M", ATTN_FWD))
        .axis(Axis::matched("BLOCK_N", ATTN_FWD))
        .filter("BLOCK_DMODEL", AdmissibilityFilter::at_most(MAX_HEAD_DIM))
        .build()?;

    KernelDescriptor::builder(BWD_KERNEL_FUSE, KernelKind::FusedBackward)
        .interface("op_attn_bwd")
        .schema(schema)
        .axes(axes)
        .knobs(KnobDomains {
            waves_per_eu: vec![1, 2, 3, 4],
            num_warps: vec![2, 4],
            num_stages: vec![1],
        })
        .default_knobs(SchedulingKnobs {
            num_warps: 4,
            num_stages: 1,
            waves_per_eu: 0,
        })
        // Only M >= N is generated; the mirrored pair is redundant.
        .rule(ExclusionRule::new(
            "canonical-block-order",
            &["BLOCK_M", "BLOCK_N"],
            |cfg, _| Ok(cfg.int("BLOCK_M")? >= cfg.int("BLOCK_N")?),
        ))
        // No winner for this shape in the 0.8b tuning database.
        .rule(ExclusionRule::new(
            "cdna-64x64-w4",
            &["BLOCK_M", "BLOCK_N"],
            |cfg, ctx| {
                let drop = ctx.is_cdna()
                    && cfg.int("BLOCK_M")? == 64
                    && cfg.int("BLOCK_N")? == 64
                    && cfg.num_warps() == 4;
                Ok(!drop)
            },
        ))
        .rule(ExclusionRule::new(
            "rdna-large-m-w1",
            &["BLOCK_M"],
            |cfg, ctx| Ok(!(ctx.is_rdna() && cfg.int("BLOCK_M")? > 32 && cfg.num_warps() == 1)),
        ))
        // Times out during compilation.
        .rule(ExclusionRule::new(
            "rdna-32x32-timeout",
            &["BLOCK_M", "BLOCK_N"],
            |cfg, ctx| {
                let drop = ctx.is_rdna()
                    && cfg.int("BLOCK_M")? == 32
                    && cfg.int("BLOCK_N")? == 32
                    && cfg.num_warps() != 4;
                Ok(!drop)
            },
        ))
        .rule(ExclusionRule::new(
            "wide-head-timeout",
            &["BLOCK_DMODEL", "BLOCK_M", "BLOCK_N"],
            |cfg, ctx| {
                let drop = ctx.constant_int("BLOCK_DMODEL")? > MAX_HEAD_DIM
                    && cfg.int("BLOCK_M")? == 64
                    && cfg.int("BLOCK_N")? == 64
                    && cfg.num_warps() == 1;
                Ok(!drop)
            },
        ))
        .autotune_key(seqlen_key("max_seqlen_q"))
        .autotune_key(seqlen_key("max_seqlen_k"))
        .partially_tuned("PADDED_HEAD", false)
        .build()
}

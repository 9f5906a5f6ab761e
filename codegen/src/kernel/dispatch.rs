//! Tiling-key dispatch over the schedule variants of a fused graph.
//!
//! Each cartesian combination of one variant per group becomes a sub-function numbered by its
//! tiling key (the first group varies slowest). The entry point selects the sub-function with
//! `TILING_KEY_IS`; past the packing threshold the chain is split into sub-dispatchers so no
//! single function holds more than the threshold of branches.

use std::collections::HashMap;

use itertools::Itertools;
use vecc_ir::{Expr, FusedGraph};

use super::workspace::{WorkspaceLayout, calculate_workspace_size};
use super::{Kernel, KernelIo};
use crate::config::KernelConfig;
use crate::error::*;
use crate::writer::indent_block;

/// Helpers the rendered size expressions call.
pub const PRELUDE: &str = r#"#include "kernel_operator.h"

using namespace AscendC;

__aicore__ inline double Rational(double num, double den) { return num / den; }
__aicore__ inline int64_t Max(int64_t a, int64_t b) { return a > b ? a : b; }
__aicore__ inline int64_t AlignUp(int64_t value, int64_t align) { return (value + align - 1) / align * align; }
__aicore__ inline int64_t Ceiling(double value) {
  int64_t truncated = static_cast<int64_t>(value);
  return value > static_cast<double>(truncated) ? truncated + 1 : truncated;
}
__aicore__ inline double Pow(double base, int64_t exp) {
  double result = 1.0;
  for (int64_t i = 0; i < (exp < 0 ? -exp : exp); ++i) {
    result *= base;
  }
  return exp < 0 ? 1.0 / result : result;
}
"#;

/// Generated source of a fused graph.
#[derive(Debug, Clone)]
pub struct KernelOutput {
    pub code: String,
    /// Workspace bytes the caller must allocate.
    pub workspace_size: Expr,
    pub workspace: WorkspaceLayout,
    /// Number of tiling keys the entry point dispatches on.
    pub tiling_keys: usize,
}

fn camel_case(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map(|c| c.to_ascii_uppercase().to_string() + chars.as_str()).unwrap_or_default()
        })
        .collect()
}

/// Tiling-data struct of schedule combination `key`.
pub fn tiling_data_type(fused: &FusedGraph, key: usize) -> String {
    format!("{}TilingData{key}", camel_case(&fused.name))
}

fn gm_params(fused: &FusedGraph) -> String {
    fused
        .inputs
        .iter()
        .chain(&fused.outputs)
        .map(|name| format!("GM_ADDR {name}"))
        .chain(["GM_ADDR workspace".to_string()])
        .join(", ")
}

fn gm_args(fused: &FusedGraph) -> String {
    fused.inputs.iter().chain(&fused.outputs).map(String::as_str).chain(["workspace"]).join(", ")
}

pub fn kernel_func_declare(fused: &FusedGraph) -> String {
    format!("extern \"C\" __global__ __aicore__ void {}({}, GM_ADDR tiling)", fused.name, gm_params(fused))
}

pub fn tiling_key_func_declare(fused: &FusedGraph, key: usize, config: &KernelConfig) -> String {
    format!(
        "inline __aicore__ void {}_{key}({}, const {}& {})",
        fused.name,
        gm_params(fused),
        tiling_data_type(fused, key),
        config.tiling_data_param
    )
}

fn dispatch_chain(fused: &FusedGraph, keys: std::ops::Range<usize>, config: &KernelConfig) -> String {
    let param = &config.tiling_data_param;
    let mut out = String::new();
    for key in keys.clone() {
        let open = if key == keys.start { "if" } else { "} else if" };
        out.push_str(&format!("{open} (TILING_KEY_IS({key})) {{\n"));
        out.push_str(&format!("  GET_TILING_DATA_WITH_STRUCT({}, {param}, tiling);\n", tiling_data_type(fused, key)));
        out.push_str(&format!("  {}_{key}({}, {param});\n", fused.name, gm_args(fused)));
    }
    if !keys.is_empty() {
        out.push_str("}\n");
    }
    out
}

/// Sub-functions for every schedule combination plus the dispatching entry point.
pub fn gen_kernel_func_by_tiling_key(fused: &FusedGraph, layout: &WorkspaceLayout, config: &KernelConfig) -> Result<(String, usize)> {
    if fused.groups.is_empty() {
        return Err(Error::init("schedule group", fused.name.clone()));
    }
    for (index, group) in fused.groups.iter().enumerate() {
        if group.impls.is_empty() {
            return Err(Error::init(format!("schedule variant of group {index}"), fused.name.clone()));
        }
    }

    let io = KernelIo { inputs: &fused.inputs, outputs: &fused.outputs };
    let mut bodies: HashMap<(usize, usize), String> = HashMap::new();
    let combos: Vec<Vec<usize>> = fused.groups.iter().map(|g| 0..g.impls.len()).multi_cartesian_product().collect();

    let mut out = String::new();
    for (key, combo) in combos.iter().enumerate() {
        out.push_str(&format!("{} {{\n", tiling_key_func_declare(fused, key, config)));
        for (group, &variant) in combo.iter().enumerate() {
            if group > 0 {
                out.push_str("  SyncAll();\n");
            }
            let body = match bodies.get(&(group, variant)) {
                Some(body) => body.clone(),
                None => {
                    let graph = &fused.groups[group].impls[variant];
                    let body = Kernel::parse_graph(graph, config)?.generate(io, layout, config)?;
                    bodies.insert((group, variant), body.clone());
                    body
                }
            };
            out.push_str("  {\n");
            out.push_str(&indent_block(&body, 2));
            out.push_str("  }\n");
        }
        out.push_str("}\n\n");
    }

    let keys = combos.len();
    let threshold = config.tiling_key_pack_threshold.max(1);
    if keys <= threshold {
        out.push_str(&format!("{} {{\n", kernel_func_declare(fused)));
        out.push_str(&indent_block(&dispatch_chain(fused, 0..keys, config), 1));
        out.push_str("}\n");
    } else {
        let packs: Vec<std::ops::Range<usize>> =
            (0..keys).step_by(threshold).map(|start| start..(start + threshold).min(keys)).collect();
        for (pack, range) in packs.iter().enumerate() {
            out.push_str(&format!("inline __aicore__ void {}_dispatch_{pack}({}, GM_ADDR tiling) {{\n", fused.name, gm_params(fused)));
            out.push_str(&indent_block(&dispatch_chain(fused, range.clone(), config), 1));
            out.push_str("}\n\n");
        }
        out.push_str(&format!("{} {{\n", kernel_func_declare(fused)));
        for (pack, range) in packs.iter().enumerate() {
            let open = if pack == 0 { "if" } else { "} else if" };
            out.push_str(&format!("  {open} (TILING_KEY_VAR < {}) {{\n", range.end));
            out.push_str(&format!("    {}_dispatch_{pack}({}, tiling);\n", fused.name, gm_args(fused)));
        }
        out.push_str("  }\n}\n");
        tracing::debug!(keys, packs = packs.len(), "tiling key dispatch packed");
    }
    Ok((out, keys))
}

/// Generate the complete source of a fused graph.
#[tracing::instrument(skip_all, fields(kernel = %fused.name, groups = fused.groups.len()))]
pub fn generate_fused_kernel(fused: &FusedGraph, config: &KernelConfig) -> Result<KernelOutput> {
    let layout = calculate_workspace_size(fused.all_graphs());
    let (functions, tiling_keys) = gen_kernel_func_by_tiling_key(fused, &layout, config)?;
    let code = format!("{PRELUDE}\n{functions}");
    tracing::debug!(tiling_keys, bytes = code.len(), "fused kernel generated");
    Ok(KernelOutput { code, workspace_size: layout.total.clone(), workspace: layout, tiling_keys })
}

//! Kernel generation configuration.
//!
//! Everything the generator looks up by operation type lives here and is passed explicitly to
//! the entry points: the operation registry that maps node op types to instruction families,
//! the scratch-size registry, and the target constants used for alignment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bon::bon;
use vecc_dtype::{DType, DTypeSet, sets};
use vecc_ir::{ComputeUnit, Expr, Node};

use crate::api_call::{ApiKind, CmpMode};

/// Instruction family and target instruction for one node op type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSpec {
    pub kind: ApiKind,
    /// Target instruction name.
    pub api: String,
    pub unit: ComputeUnit,
    /// Vector-scalar variant of a binary instruction (`Adds` for `Add`).
    pub scalar_api: Option<String>,
    /// Operands may be swapped without changing the result.
    pub commutative: bool,
    /// Element types the instruction accepts.
    pub dtypes: DTypeSet,
}

impl ApiSpec {
    pub fn new(kind: ApiKind, api: impl Into<String>, unit: ComputeUnit, dtypes: DTypeSet) -> Self {
        Self { kind, api: api.into(), unit, scalar_api: None, commutative: false, dtypes }
    }

    pub fn with_scalar(mut self, scalar_api: impl Into<String>) -> Self {
        self.scalar_api = Some(scalar_api.into());
        self
    }

    pub fn commutative(mut self) -> Self {
        self.commutative = true;
        self
    }
}

/// Op type → instruction family lookup table.
#[derive(Debug, Clone, Default)]
pub struct ApiRegistry {
    entries: HashMap<String, ApiSpec>,
}

impl ApiRegistry {
    /// A registry with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding every builtin operation.
    pub fn builtin() -> Self {
        use ApiKind::*;
        use ComputeUnit::{Mte2, Mte3, Vector};

        let mut registry = Self::empty();
        for op in ["Data", "Output", "Workspace", "Scalar"] {
            registry.register(op, ApiSpec::new(Nop, "", ComputeUnit::None, sets::MOVABLE));
        }
        registry.register("Load", ApiSpec::new(Load, "DataCopyPadExtend", Mte2, sets::MOVABLE));
        registry.register("Store", ApiSpec::new(Store, "DataCopyPadExtend", Mte3, sets::MOVABLE));
        registry.register("Broadcast", ApiSpec::new(Duplicate, "Duplicate", Vector, sets::DUPLICATE));

        for (op, api, dtypes) in [
            ("Abs", "Abs", sets::VECTOR_ARITH),
            ("Exp", "Exp", sets::FLOATS),
            ("Ln", "Ln", sets::FLOATS),
            ("Sqrt", "Sqrt", sets::FLOATS),
            ("Rsqrt", "Rsqrt", sets::FLOATS),
            ("Reciprocal", "Reciprocal", sets::FLOATS),
            ("Relu", "Relu", sets::VECTOR_ARITH),
        ] {
            registry.register(op, ApiSpec::new(Unary, api, Vector, dtypes));
        }
        for op in ["Erf", "Tanh", "Sigmoid", "Gelu"] {
            registry.register(op, ApiSpec::new(UnaryTmp, op, Vector, sets::FLOATS));
        }
        registry.register("BitwiseNot", ApiSpec::new(UnaryBitWidth, "Not", Vector, sets::BITWISE));
        registry.register("Cast", ApiSpec::new(Cast, "Cast", Vector, sets::MOVABLE));
        registry.register("Neg", ApiSpec::new(Neg, "Muls", Vector, sets::VECTOR_ARITH));

        registry.register("Add", ApiSpec::new(Binary, "Add", Vector, sets::VECTOR_ARITH).with_scalar("Adds").commutative());
        registry.register("Sub", ApiSpec::new(Binary, "Sub", Vector, sets::VECTOR_ARITH));
        registry.register("Mul", ApiSpec::new(Binary, "Mul", Vector, sets::VECTOR_ARITH).with_scalar("Muls").commutative());
        registry.register("Div", ApiSpec::new(Binary, "Div", Vector, sets::FLOATS));
        registry.register("Max", ApiSpec::new(Binary, "Max", Vector, sets::VECTOR_ARITH).with_scalar("Maxs").commutative());
        registry.register("Min", ApiSpec::new(Binary, "Min", Vector, sets::VECTOR_ARITH).with_scalar("Mins").commutative());
        registry.register("BitwiseAnd", ApiSpec::new(Binary, "And", Vector, sets::BITWISE).commutative());
        registry.register("BitwiseOr", ApiSpec::new(Binary, "Or", Vector, sets::BITWISE).commutative());

        for (op, mode) in [
            ("Ge", CmpMode::Ge),
            ("Gt", CmpMode::Gt),
            ("Le", CmpMode::Le),
            ("Lt", CmpMode::Lt),
            ("Eq", CmpMode::Eq),
            ("Ne", CmpMode::Ne),
        ] {
            registry.register(op, ApiSpec::new(Compare(mode), "CompareExtend", Vector, sets::COMPARE));
        }

        registry.register("Sum", ApiSpec::new(Reduce, "ReduceSum", Vector, sets::FLOATS));
        registry.register("ReduceMax", ApiSpec::new(Reduce, "ReduceMax", Vector, sets::FLOATS));
        registry
    }

    /// Register or replace the entry for `op_type`.
    pub fn register(&mut self, op_type: impl Into<String>, spec: ApiSpec) -> &mut Self {
        self.entries.insert(op_type.into(), spec);
        self
    }

    pub fn get(&self, op_type: &str) -> Option<&ApiSpec> {
        self.entries.get(op_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One scratch-buffer requirement of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpBufDesc {
    /// Bytes needed.
    pub size: Expr,
    /// Requests with the same tag share one scratch buffer.
    pub reuse_tag: i64,
}

pub type TmpBufFn = Arc<dyn Fn(&Node) -> Vec<TmpBufDesc> + Send + Sync>;

/// Op type → scratch-size callback.
#[derive(Clone, Default)]
pub struct TmpBufRegistry {
    entries: HashMap<String, TmpBufFn>,
}

impl fmt::Debug for TmpBufRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ops.sort_unstable();
        f.debug_struct("TmpBufRegistry").field("ops", &ops).finish()
    }
}

/// Scratch bytes the builtin math and reduce instructions need: a fixed number of vector
/// repeats, enough for the intermediate results the target library keeps.
const BUILTIN_TMP_BYTES: i64 = 8 * 256;

impl TmpBufRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with scratch callbacks for the builtin ops that need one.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for op in ["Erf", "Tanh", "Sigmoid", "Gelu", "Sum", "ReduceMax"] {
            registry.register(op, |_node: &Node| vec![TmpBufDesc { size: Expr::int(BUILTIN_TMP_BYTES), reuse_tag: 0 }]);
        }
        registry
    }

    pub fn register(
        &mut self,
        op_type: impl Into<String>,
        callback: impl Fn(&Node) -> Vec<TmpBufDesc> + Send + Sync + 'static,
    ) -> &mut Self {
        self.entries.insert(op_type.into(), Arc::new(callback));
        self
    }

    /// Scratch requirements of `node`; empty when its op type has no callback.
    pub fn descs(&self, node: &Node) -> Vec<TmpBufDesc> {
        self.entries.get(&node.op_type).map(|f| f(node)).unwrap_or_default()
    }
}

/// Configuration passed to every kernel generation entry point.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub api_registry: ApiRegistry,
    pub tmp_buf_registry: TmpBufRegistry,
    /// Above this many tiling keys the dispatcher is split into packed sub-dispatchers.
    pub tiling_key_pack_threshold: usize,
    /// Name of the tiling-data parameter of generated functions.
    pub tiling_data_param: String,
    /// Bytes per local-buffer block, the alignment unit of local tensors.
    pub block_size: usize,
    /// Bytes processed by one vector repeat.
    pub repeat_size: usize,
}

#[bon]
impl KernelConfig {
    /// Create a kernel configuration with builder pattern.
    #[builder]
    pub fn new(
        #[builder(default = ApiRegistry::builtin())] api_registry: ApiRegistry,
        #[builder(default = TmpBufRegistry::builtin())] tmp_buf_registry: TmpBufRegistry,
        #[builder(default = 64)] tiling_key_pack_threshold: usize,
        #[builder(default = "t".to_string(), into)] tiling_data_param: String,
        #[builder(default = 32)] block_size: usize,
        #[builder(default = 256)] repeat_size: usize,
    ) -> Self {
        Self {
            api_registry,
            tmp_buf_registry,
            tiling_key_pack_threshold: tiling_key_pack_threshold.max(1),
            tiling_data_param,
            block_size,
            repeat_size,
        }
    }

    /// Elements of `dtype` in one local block.
    pub fn block_elems(&self, dtype: DType) -> i64 {
        dtype.block_elems(self.block_size) as i64
    }

    /// Elements of `dtype` processed by one vector repeat.
    pub fn repeat_elems(&self, dtype: DType) -> i64 {
        (self.repeat_size / dtype.bytes()).max(1) as i64
    }

    /// Blocks covered by one vector repeat.
    pub fn blocks_per_repeat(&self) -> i64 {
        (self.repeat_size / self.block_size.max(1)).max(1) as i64
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

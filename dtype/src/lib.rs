//! Element data types understood by the vector-core code generator.
//!
//! Every local or global tensor carries exactly one [`DType`]. The type knows its width in
//! bytes and the spelling the target language uses for it, which is all the allocator and
//! the instruction emitters need.

pub mod cast;


use enumset::EnumSet;

pub use cast::RoundMode;

/// Element data type of a tensor.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::EnumString, strum::IntoStaticStr)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
#[enumset(repr = "u32")]
pub enum DType {
    Bool,

    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,

    Float16,
    BFloat16,
    Float32,
}

/// A set of element types, used to describe what an instruction accepts.
pub type DTypeSet = EnumSet<DType>;

impl DType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 => 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32)
    }

    /// Spelling of the type in generated kernel source.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8_t",
            Self::UInt8 => "uint8_t",
            Self::Int16 => "int16_t",
            Self::UInt16 => "uint16_t",
            Self::Int32 => "int32_t",
            Self::UInt32 => "uint32_t",
            Self::Int64 => "int64_t",
            Self::UInt64 => "uint64_t",
            Self::Float16 => "half",
            Self::BFloat16 => "bfloat16_t",
            Self::Float32 => "float",
        }
    }

    /// Number of elements that fit in one memory block of `block_bytes`.
    pub const fn block_elems(&self, block_bytes: usize) -> usize {
        block_bytes / self.bytes()
    }

    /// Integer type of the same width, used when an instruction only works on integer lanes.
    pub const fn same_width_int(&self) -> Self {
        match self.bytes() {
            1 => Self::UInt8,
            2 => Self::Int16,
            4 => Self::Int32,
            _ => Self::Int64,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name: &'static str = self.into();
        f.write_str(name)
    }
}

/// Commonly used dtype sets.
pub mod sets {
    use enumset::enum_set;

    use super::{DType, DTypeSet};

    pub const FLOATS: DTypeSet = enum_set!(DType::Float16 | DType::Float32);

    pub const ALL_FLOATS: DTypeSet = enum_set!(DType::Float16 | DType::BFloat16 | DType::Float32);

    /// Types accepted by elementwise vector arithmetic.
    pub const VECTOR_ARITH: DTypeSet = enum_set!(DType::Float16 | DType::Float32 | DType::Int16 | DType::Int32);

    /// Types accepted by the extended compare instructions.
    pub const COMPARE: DTypeSet = enum_set!(DType::Float16 | DType::Float32 | DType::Int32);

    /// Types accepted by bitwise instructions, which operate on 16-bit lanes.
    pub const BITWISE: DTypeSet = enum_set!(
        DType::Bool | DType::Int8 | DType::UInt8 | DType::Int16 | DType::UInt16 | DType::Int32 | DType::UInt32
    );

    /// Types a scalar can be broadcast into with a single fill instruction.
    pub const DUPLICATE: DTypeSet = enum_set!(
        DType::Float16 | DType::BFloat16 | DType::Float32 | DType::Int16 | DType::UInt16 | DType::Int32 | DType::UInt32
    );

    /// Types that can be moved between global and local memory.
    pub const MOVABLE: DTypeSet = DTypeSet::all();
}

//! Identifier newtypes and the small enums attached to scheduled nodes.

use std::fmt;

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident($inner:ty)),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub $inner);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<$inner> for $name {
                fn from(value: $inner) -> Self {
                    Self(value)
                }
            }
        )*
    };
}

define_id! {
    /// Scheduler-assigned axis identifier.
    AxisId(u32),
    /// Position-independent node identifier.
    NodeId(u32),
    /// Stable tensor identifier, assigned once and never reused.
    TensorId(u64),
    /// Queue identifier.
    QueId(u32),
    /// Static buffer identifier.
    BufId(u32),
    /// Merge scope grouping key.
    MergeScopeId(u64),
    /// Workspace region identifier.
    WorkspaceId(u32),
}

/// Hardware pipeline stage that executes an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(strum::EnumIter, strum::AsRefStr)]
pub enum ComputeUnit {
    /// Pure marker nodes that do not execute on hardware.
    #[default]
    None,
    /// Global to local data movement.
    Mte2,
    /// Local to global data movement.
    Mte3,
    /// Vector compute.
    Vector,
    /// Scalar compute.
    Scalar,
}

impl ComputeUnit {
    /// Name used in hardware event identifiers (`HardEvent::MTE2_V`).
    pub const fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Mte2 => Some("MTE2"),
            Self::Mte3 => Some("MTE3"),
            Self::Vector => Some("V"),
            Self::Scalar => Some("S"),
        }
    }

    /// Name of the pipe used for same-unit barriers (`PipeBarrier<PIPE_V>`).
    pub const fn pipe_name(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Mte2 => Some("PIPE_MTE2"),
            Self::Mte3 => Some("PIPE_MTE3"),
            Self::Vector => Some("PIPE_V"),
            Self::Scalar => Some("PIPE_S"),
        }
    }

    pub const fn is_hardware(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Memory position of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Position {
    Global,
    VecIn,
    VecOut,
    VecCalc,
    /// Compile-time constants and other values without storage.
    #[default]
    Invalid,
}

impl Position {
    pub const fn target_name(&self) -> &'static str {
        match self {
            Self::Global => "TPosition::GM",
            Self::VecIn => "TPosition::VECIN",
            Self::VecOut => "TPosition::VECOUT",
            Self::VecCalc => "TPosition::VECCALC",
            Self::Invalid => "TPosition::MAX",
        }
    }

    pub const fn is_local(&self) -> bool {
        matches!(self, Self::VecIn | Self::VecOut | Self::VecCalc)
    }
}

/// How the storage backing a tensor is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocKind {
    Global,
    Queue,
    Buffer,
    #[default]
    Invalid,
}

impl AllocKind {
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Queue | Self::Buffer)
    }
}

/// Role of an axis produced by the scheduler's tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AxisKind {
    #[default]
    Original,
    TileOuter,
    TileInner,
    BlockOuter,
}

use super::*;

/// Rounding applied by a lowered cast instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundMode {
    /// Exact conversion, no rounding required.
    None,
    /// Round to nearest even.
    Rint,
    /// Round toward zero.
    Trunc,
}

impl RoundMode {
    pub const fn target_name(&self) -> &'static str {
        match self {
            Self::None => "RoundMode::CAST_NONE",
            Self::Rint => "RoundMode::CAST_RINT",
            Self::Trunc => "RoundMode::CAST_TRUNC",
        }
    }
}

impl DType {
    /// Immediate cast targets reachable with a single cast instruction.
    const fn cast_targets(self) -> &'static [Self] {
        use DType::*;
        match self {
            Bool | UInt8 => &[Float16],
            Int8 => &[Float16],
            Int16 => &[Float16, Float32],
            Int32 => &[Float16, Float32, Int16, Int64],
            Int64 => &[Int32, Float32],
            Float16 => &[Float32, Int8, UInt8, Int16, Int32],
            BFloat16 => &[Float32],
            Float32 => &[Float16, BFloat16, Int16, Int32, Int64],
            UInt16 | UInt32 | UInt64 => &[],
        }
    }

    /// Whether the target has a single instruction converting `self` into `to`.
    pub fn can_lower_cast(self, to: Self) -> bool {
        self == to || self.cast_targets().contains(&to)
    }

    /// Rounding mode of the lowered cast, or `None` when no single instruction exists.
    pub fn cast_round_mode(self, to: Self) -> Option<RoundMode> {
        if !self.can_lower_cast(to) {
            return None;
        }
        let mode = match (self.is_float(), to.is_float()) {
            // Float to integer truncates toward the integer grid.
            (true, false) => RoundMode::Trunc,
            // Narrowing float needs rounding, widening is exact.
            (true, true) if to.bytes() < self.bytes() => RoundMode::Rint,
            (false, true) if self.bytes() >= to.bytes() => RoundMode::Rint,
            _ => RoundMode::None,
        };
        Some(mode)
    }

    /// Every type reachable from `self` through single cast instructions.
    pub fn reachable_casts(self) -> DTypeSet {
        self.cast_targets().iter().fold(EnumSet::only(self), |set, &to| set | to)
    }
}

use crate::{AxisId, AxisKind, Expr};

/// A named runtime scalar tiling parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SizeVar {
    pub name: String,
    /// Known value when the scheduler resolved it at compile time.
    pub value: Option<i64>,
}

impl SizeVar {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), value: None }
    }

    pub fn with_value(name: impl Into<String>, value: i64) -> Self {
        Self { name: name.into(), value: Some(value) }
    }

    /// The symbol referencing this variable inside expressions.
    pub fn expr(&self) -> Expr {
        Expr::sym(self.name.clone())
    }
}

/// An iteration dimension, created and typed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Axis {
    pub id: AxisId,
    pub name: String,
    pub size: Expr,
    pub kind: AxisKind,
}

impl Axis {
    pub fn new(id: impl Into<AxisId>, name: impl Into<String>, size: impl Into<Expr>, kind: AxisKind) -> Self {
        Self { id: id.into(), name: name.into(), size: size.into(), kind }
    }

    pub fn is_block_outer(&self) -> bool {
        self.kind == AxisKind::BlockOuter
    }
}

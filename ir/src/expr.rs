//! Symbolic size expressions.
//!
//! Tensor shapes are only known at run time, so every size and offset the generator computes
//! is an [`Expr`]: a literal, a named runtime symbol, or an operator applied to other
//! expressions. Expressions are immutable values. The constructors fold literal operands
//! (`x * 1`, `x + 0`, `2 * 3`) so that generated text stays readable, but nothing is ever
//! evaluated unless it is fully literal.

use std::fmt;
use std::ops;

/// Immutable symbolic integer expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(i64),
    Symbol(String),
    Add(Vec<Expr>),
    Mul(Vec<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Rational(i64, i64),
    /// Round up to the next multiple of the literal.
    Align(Box<Expr>, i64),
    Max(Vec<Expr>),
    Ceil(Box<Expr>),
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

fn ceil_div(num: i64, den: i64) -> Option<i64> {
    let quot = num.checked_div_euclid(den)?;
    if num.checked_rem_euclid(den)? == 0 { Some(quot) } else { quot.checked_add(1) }
}

impl Expr {
    pub const ZERO: Expr = Expr::Const(0);
    pub const ONE: Expr = Expr::Const(1);

    pub fn int(value: i64) -> Self {
        Self::Const(value)
    }

    pub fn sym(name: impl Into<String>) -> Self {
        Self::Symbol(name.into())
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Self::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    pub fn is_zero(&self) -> bool {
        self.as_const() == Some(0)
    }

    pub fn is_one(&self) -> bool {
        self.as_const() == Some(1)
    }

    /// Sum of terms. Nested sums are flattened and literal terms folded into one trailing literal.
    pub fn sum(terms: impl IntoIterator<Item = Expr>) -> Self {
        let mut constant = 0i64;
        let mut rest = Vec::new();
        for term in terms {
            match term {
                Self::Const(c) => constant = constant.saturating_add(c),
                Self::Add(inner) => {
                    for t in inner {
                        match t {
                            Self::Const(c) => constant = constant.saturating_add(c),
                            t => rest.push(t),
                        }
                    }
                }
                t => rest.push(t),
            }
        }
        if constant != 0 {
            rest.push(Self::Const(constant));
        }
        match rest.len() {
            0 => Self::ZERO,
            1 => rest.remove(0),
            _ => Self::Add(rest),
        }
    }

    /// Product of factors. Any literal zero folds the whole product to zero.
    pub fn prod(factors: impl IntoIterator<Item = Expr>) -> Self {
        let mut constant = 1i64;
        let mut rest = Vec::new();
        for factor in factors {
            match factor {
                Self::Const(c) => constant = constant.saturating_mul(c),
                Self::Mul(inner) => {
                    for f in inner {
                        match f {
                            Self::Const(c) => constant = constant.saturating_mul(c),
                            f => rest.push(f),
                        }
                    }
                }
                f => rest.push(f),
            }
        }
        if constant == 0 {
            return Self::ZERO;
        }
        if constant != 1 {
            rest.push(Self::Const(constant));
        }
        match rest.len() {
            0 => Self::ONE,
            1 => rest.remove(0),
            _ => Self::Mul(rest),
        }
    }

    pub fn neg(self) -> Self {
        Self::prod([self, Self::Const(-1)])
    }

    pub fn div(self, rhs: Expr) -> Self {
        match (&self, &rhs) {
            (_, Self::Const(1)) => self,
            (Self::Const(0), _) => Self::ZERO,
            (Self::Const(a), Self::Const(b)) if *b != 0 => Self::rational(*a, *b),
            _ => Self::Div(Box::new(self), Box::new(rhs)),
        }
    }

    pub fn pow(self, exp: Expr) -> Self {
        match exp {
            Self::Const(0) => Self::ONE,
            Self::Const(1) => self,
            exp => Self::Pow(Box::new(self), Box::new(exp)),
        }
    }

    /// Exact fraction, reduced. Integral fractions become literals.
    pub fn rational(num: i64, den: i64) -> Self {
        if den == 0 {
            return Self::Rational(num, den);
        }
        let g = gcd(num, den).max(1);
        let (mut num, mut den) = (num / g, den / g);
        if den < 0 {
            (num, den) = (-num, -den);
        }
        if den == 1 { Self::Const(num) } else { Self::Rational(num, den) }
    }

    /// Round up to a multiple of `multiple`.
    pub fn align(self, multiple: i64) -> Self {
        if multiple <= 1 {
            return self;
        }
        match self {
            Self::Const(v) => Self::Const(v.div_euclid(multiple) * multiple + if v.rem_euclid(multiple) == 0 { 0 } else { multiple }),
            Self::Align(inner, m) if m == multiple => Self::Align(inner, m),
            other => Self::Align(Box::new(other), multiple),
        }
    }

    pub fn ceil(self) -> Self {
        match self {
            Self::Rational(n, d) if d > 0 => Self::Const(n.div_euclid(d) + if n.rem_euclid(d) == 0 { 0 } else { 1 }),
            c @ Self::Const(_) => c,
            c @ Self::Ceil(_) => c,
            other => Self::Ceil(Box::new(other)),
        }
    }

    /// Maximum of operands. Literal operands fold into a single leading literal, duplicates are dropped.
    pub fn max_of(operands: impl IntoIterator<Item = Expr>) -> Self {
        let mut literal: Option<i64> = None;
        let mut rest: Vec<Expr> = Vec::new();
        let push = |e: Expr, literal: &mut Option<i64>, rest: &mut Vec<Expr>| match e {
            Self::Const(c) => *literal = Some(literal.map_or(c, |l| l.max(c))),
            e if !rest.contains(&e) => rest.push(e),
            _ => {}
        };
        for operand in operands {
            match operand {
                Self::Max(inner) => {
                    for e in inner {
                        push(e, &mut literal, &mut rest);
                    }
                }
                e => push(e, &mut literal, &mut rest),
            }
        }
        if let Some(l) = literal {
            rest.insert(0, Self::Const(l));
        }
        match rest.len() {
            0 => Self::ZERO,
            1 => rest.remove(0),
            _ => Self::Max(rest),
        }
    }

    pub fn max(self, other: Expr) -> Self {
        Self::max_of([self, other])
    }

    /// Names of every symbol referenced, in first-occurrence order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Const(_) | Self::Rational(..) => {}
            Self::Symbol(s) => {
                if !out.contains(&s.as_str()) {
                    out.push(s);
                }
            }
            Self::Add(v) | Self::Mul(v) | Self::Max(v) => v.iter().for_each(|e| e.collect_symbols(out)),
            Self::Div(a, b) | Self::Pow(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
            Self::Align(a, _) | Self::Ceil(a) => a.collect_symbols(out),
        }
    }

    /// Evaluate with integer semantics, given values for every symbol.
    ///
    /// Division and rationals floor unless wrapped in `Ceil`; `None` when a symbol is unbound or an operation is undefined.
    pub fn eval(&self, env: &impl Fn(&str) -> Option<i64>) -> Option<i64> {
        Some(match self {
            Self::Const(v) => *v,
            Self::Symbol(s) => env(s)?,
            Self::Add(v) => v.iter().try_fold(0i64, |acc, e| acc.checked_add(e.eval(env)?))?,
            Self::Mul(v) => v.iter().try_fold(1i64, |acc, e| acc.checked_mul(e.eval(env)?))?,
            Self::Div(a, b) => a.eval(env)?.checked_div_euclid(b.eval(env)?)?,
            Self::Pow(a, b) => a.eval(env)?.checked_pow(u32::try_from(b.eval(env)?).ok()?)?,
            Self::Rational(n, d) => n.checked_div_euclid(*d)?,
            Self::Align(a, m) => {
                let v = a.eval(env)?;
                v.div_euclid(*m).checked_mul(*m)?.checked_add(if v.rem_euclid(*m) == 0 { 0 } else { *m })?
            }
            Self::Max(v) => v.iter().map(|e| e.eval(env)).collect::<Option<Vec<_>>>()?.into_iter().max()?,
            Self::Ceil(a) => match a.as_ref() {
                Self::Div(num, den) => ceil_div(num.eval(env)?, den.eval(env)?)?,
                Self::Rational(num, den) => ceil_div(*num, *den)?,
                other => other.eval(env)?,
            },
        })
    }

    /// Whether the expression needs parentheses when used as a product factor.
    pub fn is_sum(&self) -> bool {
        matches!(self, Self::Add(_))
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Const(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Self::sym(value)
    }
}

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs])
    }
}

impl ops::Add<i64> for Expr {
    type Output = Expr;

    fn add(self, rhs: i64) -> Expr {
        Expr::sum([self, Expr::Const(rhs)])
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::sum([self, rhs.neg()])
    }
}

impl ops::Sub<i64> for Expr {
    type Output = Expr;

    fn sub(self, rhs: i64) -> Expr {
        Expr::sum([self, Expr::Const(-rhs)])
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::prod([self, rhs])
    }
}

impl ops::Mul<i64> for Expr {
    type Output = Expr;

    fn mul(self, rhs: i64) -> Expr {
        Expr::prod([self, Expr::Const(rhs)])
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn wrapped(e: &Expr) -> String {
            if matches!(e, Expr::Add(_) | Expr::Mul(_)) { format!("({e})") } else { e.to_string() }
        }
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Symbol(s) => f.write_str(s),
            Self::Add(v) => {
                let parts: Vec<String> = v.iter().map(|e| e.to_string()).collect();
                f.write_str(&parts.join(" + "))
            }
            Self::Mul(v) => {
                let parts: Vec<String> = v.iter().map(|e| if e.is_sum() { format!("({e})") } else { e.to_string() }).collect();
                f.write_str(&parts.join(" * "))
            }
            Self::Div(a, b) => write!(f, "{} / {}", wrapped(a), wrapped(b)),
            Self::Pow(a, b) => write!(f, "{}^{}", wrapped(a), wrapped(b)),
            Self::Rational(n, d) => write!(f, "{n}/{d}"),
            Self::Align(a, m) => write!(f, "align({a}, {m})"),
            Self::Max(v) => {
                let parts: Vec<String> = v.iter().map(|e| e.to_string()).collect();
                write!(f, "max({})", parts.join(", "))
            }
            Self::Ceil(a) => write!(f, "ceil({a})"),
        }
    }
}

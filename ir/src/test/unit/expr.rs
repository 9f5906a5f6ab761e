use test_case::test_case;

use crate::Expr;

fn s(name: &str) -> Expr {
    Expr::sym(name)
}

#[test]
fn test_sum_folds_literals() {
    let e = Expr::sum([Expr::int(2), s("a"), Expr::int(3)]);
    assert_eq!(e, Expr::Add(vec![s("a"), Expr::int(5)]));
}

#[test]
fn test_sum_drops_zero() {
    assert_eq!(s("a") + Expr::ZERO, s("a"));
    assert_eq!(Expr::sum([]), Expr::ZERO);
}

#[test]
fn test_sum_flattens_nested() {
    let inner = s("a") + s("b");
    let e = inner + s("c");
    assert_eq!(e, Expr::Add(vec![s("a"), s("b"), s("c")]));
}

#[test]
fn test_prod_folds_one_and_zero() {
    assert_eq!(s("a") * 1, s("a"));
    assert_eq!(s("a") * 0, Expr::ZERO);
    assert_eq!(Expr::prod([Expr::int(2), s("a"), Expr::int(4)]), Expr::Mul(vec![s("a"), Expr::int(8)]));
}

#[test]
fn test_sub_of_literal() {
    assert_eq!(s("r") - 1, Expr::Add(vec![s("r"), Expr::int(-1)]));
    assert_eq!(Expr::int(5) - 5, Expr::ZERO);
}

#[test_case(6, 3, Expr::Const(2); "integral")]
#[test_case(2, 4, Expr::Rational(1, 2); "reduced")]
#[test_case(3, -6, Expr::Rational(-1, 2); "sign_normalised")]
fn test_rational(num: i64, den: i64, expected: Expr) {
    assert_eq!(Expr::rational(num, den), expected);
}

#[test]
fn test_div() {
    assert_eq!(s("a").div(Expr::ONE), s("a"));
    assert_eq!(Expr::int(8).div(Expr::int(2)), Expr::int(4));
    assert!(matches!(s("a").div(s("b")), Expr::Div(..)));
}

#[test_case(0, 8, 0; "zero")]
#[test_case(1, 8, 8; "one")]
#[test_case(8, 8, 8; "exact")]
#[test_case(9, 8, 16; "round_up")]
fn test_align_literal(value: i64, multiple: i64, expected: i64) {
    assert_eq!(Expr::int(value).align(multiple), Expr::int(expected));
}

#[test]
fn test_align_symbolic_is_idempotent() {
    let once = s("a").align(8);
    assert_eq!(once.clone().align(8), once);
    assert_eq!(s("a").align(1), s("a"));
}

#[test]
fn test_max_folds_literals_first() {
    let e = Expr::max_of([s("a"), Expr::int(3), Expr::int(7), s("a")]);
    assert_eq!(e, Expr::Max(vec![Expr::int(7), s("a")]));
    assert_eq!(Expr::int(1).max(Expr::int(4)), Expr::int(4));
}

#[test]
fn test_ceil() {
    assert_eq!(Expr::rational(7, 2).ceil(), Expr::int(4));
    assert_eq!(Expr::int(3).ceil(), Expr::int(3));
    assert!(matches!(s("a").ceil(), Expr::Ceil(_)));
}

#[test]
fn test_pow() {
    assert_eq!(s("a").pow(Expr::ONE), s("a"));
    assert_eq!(s("a").pow(Expr::ZERO), Expr::ONE);
}

#[test]
fn test_symbols_in_order() {
    let e = (s("b") + s("a")) * s("b");
    assert_eq!(e.symbols(), vec!["b", "a"]);
}

#[test]
fn test_eval() {
    let e = ((s("r") - 1) * 16 + 1).align(8);
    let env = |name: &str| (name == "r").then_some(3);
    assert_eq!(e.eval(&env), Some(40));
    assert_eq!(s("unbound").eval(&env), None);
}

#[test_case(7, 4; "rounds_up")]
#[test_case(8, 4; "exact")]
#[test_case(1, 1; "below_divisor")]
fn test_eval_ceil_of_quotient(value: i64, expected: i64) {
    let env = |name: &str| (name == "n").then_some(value);
    assert_eq!(s("n").div(Expr::int(2)).ceil().eval(&env), Some(expected));
    assert_eq!(s("n").div(Expr::int(2)).eval(&env), Some(value / 2));
    assert_eq!(Expr::Ceil(Box::new(Expr::Rational(value, 2))).eval(&env), Some(expected));
}

#[test]
fn test_display() {
    let e = Expr::max_of([Expr::ZERO, (s("a") + 1) * s("b")]);
    assert_eq!(e.to_string(), "max(0, (a + 1) * b)");
    assert_eq!(s("a").align(16).to_string(), "align(a, 16)");
}

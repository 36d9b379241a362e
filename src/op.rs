//! The binary operations understood by the generic `apply` combinator.

use std::fmt;

use crate::utils::{approx_eq, EPSILON};

/// A binary operation over decision diagrams.
///
/// Arithmetic operations combine terminal values pointwise; comparison
/// operations yield 0/1 indicator terminals.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum BinOp {
    Sum,
    Minus,
    Prod,
    Div,
    Min,
    Max,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Eq,
    NotEq,
}

impl BinOp {
    /// Whether swapping the operands leaves the result unchanged.
    ///
    /// Used to canonicalize operation-cache keys.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOp::Sum | BinOp::Prod | BinOp::Min | BinOp::Max | BinOp::Eq | BinOp::NotEq
        )
    }

    /// Whether this operation compares its operands (result is a 0/1 indicator).
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Greater | BinOp::GreaterEq | BinOp::Less | BinOp::LessEq | BinOp::Eq | BinOp::NotEq
        )
    }

    /// Evaluate the operation on two terminal values.
    ///
    /// # Panics
    ///
    /// Panics on division by a (near-)zero terminal; a diagram containing a
    /// zero terminal must never appear as a divisor.
    pub fn eval(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Sum => a + b,
            BinOp::Minus => a - b,
            BinOp::Prod => a * b,
            BinOp::Div => {
                if b.abs() <= EPSILON {
                    panic!("Division by a diagram containing the terminal 0");
                }
                a / b
            }
            BinOp::Min => a.min(b),
            BinOp::Max => a.max(b),
            BinOp::Greater => indicator(a > b && !approx_eq(a, b)),
            BinOp::GreaterEq => indicator(a > b || approx_eq(a, b)),
            BinOp::Less => indicator(a < b && !approx_eq(a, b)),
            BinOp::LessEq => indicator(a < b || approx_eq(a, b)),
            BinOp::Eq => indicator(approx_eq(a, b)),
            BinOp::NotEq => indicator(!approx_eq(a, b)),
        }
    }
}

fn indicator(cond: bool) -> f64 {
    if cond {
        1.0
    } else {
        0.0
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Sum => "+",
            BinOp::Minus => "-",
            BinOp::Prod => "*",
            BinOp::Div => "/",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Greater => ">",
            BinOp::GreaterEq => ">=",
            BinOp::Less => "<",
            BinOp::LessEq => "<=",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arith() {
        assert_eq!(BinOp::Sum.eval(2.0, 3.0), 5.0);
        assert_eq!(BinOp::Minus.eval(2.0, 3.0), -1.0);
        assert_eq!(BinOp::Prod.eval(2.0, 3.0), 6.0);
        assert_eq!(BinOp::Div.eval(6.0, 3.0), 2.0);
        assert_eq!(BinOp::Min.eval(2.0, 3.0), 2.0);
        assert_eq!(BinOp::Max.eval(2.0, 3.0), 3.0);
    }

    #[test]
    fn test_comparisons_are_indicators() {
        assert_eq!(BinOp::Greater.eval(3.0, 2.0), 1.0);
        assert_eq!(BinOp::Greater.eval(2.0, 2.0), 0.0);
        assert_eq!(BinOp::GreaterEq.eval(2.0, 2.0 + 1e-12), 1.0);
        assert_eq!(BinOp::Less.eval(2.0, 3.0), 1.0);
        assert_eq!(BinOp::LessEq.eval(3.0, 2.0), 0.0);
        assert_eq!(BinOp::Eq.eval(2.0, 2.0), 1.0);
        assert_eq!(BinOp::NotEq.eval(2.0, 2.0), 0.0);
    }

    #[test]
    #[should_panic(expected = "Division by a diagram containing the terminal 0")]
    fn test_div_by_zero_is_fatal() {
        BinOp::Div.eval(1.0, 0.0);
    }

    #[test]
    fn test_commutative() {
        assert!(BinOp::Sum.is_commutative());
        assert!(BinOp::Prod.is_commutative());
        assert!(!BinOp::Minus.is_commutative());
        assert!(!BinOp::GreaterEq.is_commutative());
        assert!(BinOp::Eq.is_commutative());
    }
}

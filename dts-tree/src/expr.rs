//! Integer expressions, as found in cell arrays and `/memreserve/`s.
//!
//! Expressions follow C syntax and precedence. They are parsed into an
//! [`Expression`] tree and evaluated with 128-bit arithmetic, so anything
//! outside that range is reported as an overflow instead of wrapping.

use std::fmt;

use crate::{
    error::Result,
    lexer::{Punct, Token},
    parser::Parser,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Expression {
    Lit(IntLiteral),
    Unary(UnaryOp, Box<Expression>),
    Binary(Box<Expression>, BinaryOp, Box<Expression>),
    Ternary {
        cond: Box<Expression>,
        then: Box<Expression>,
        else_: Box<Expression>,
    },
}

impl Expression {
    pub(crate) fn eval(&self) -> Result<i128, EvalError> {
        match self {
            Expression::Lit(l) => Ok(l.eval()),
            Expression::Unary(op, e) => op.eval(e),
            Expression::Binary(lhs, op, rhs) => op.eval(lhs, rhs),
            Expression::Ternary { cond, then, else_ } => {
                if cond.eval()? != 0 {
                    then.eval()
                } else {
                    else_.eval()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IntLiteral {
    Num(i128),
    Char(u8),
}

impl IntLiteral {
    fn eval(&self) -> i128 {
        match self {
            IntLiteral::Num(n) => *n,
            IntLiteral::Char(c) => i128::from(*c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    BitNot,
    LogicalNot,
}

impl UnaryOp {
    fn eval(&self, e: &Expression) -> Result<i128, EvalError> {
        let v = e.eval()?;

        match self {
            UnaryOp::Neg => v.checked_neg().ok_or(EvalError::Overflow),
            UnaryOp::BitNot => Ok(!v),
            UnaryOp::LogicalNot => Ok(i128::from(v == 0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    And,
    Or,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    fn eval(&self, l: &Expression, r: &Expression) -> Result<i128, EvalError> {
        // Logical operators only look at the right-hand side when they must.
        match self {
            BinaryOp::And => return Ok(i128::from(l.eval()? != 0 && r.eval()? != 0)),
            BinaryOp::Or => return Ok(i128::from(l.eval()? != 0 || r.eval()? != 0)),
            _ => {}
        }

        let (l, r) = (l.eval()?, r.eval()?);

        match self {
            BinaryOp::Add => l.checked_add(r).ok_or(EvalError::Overflow),
            BinaryOp::Sub => l.checked_sub(r).ok_or(EvalError::Overflow),
            BinaryOp::Mul => l.checked_mul(r).ok_or(EvalError::Overflow),
            BinaryOp::Div => floor_div(l, r),
            BinaryOp::Mod => floor_mod(l, r),
            BinaryOp::BitAnd => Ok(l & r),
            BinaryOp::BitOr => Ok(l | r),
            BinaryOp::BitXor => Ok(l ^ r),
            BinaryOp::LShift => shift_left(l, r),
            BinaryOp::RShift => shift_right(l, r),
            BinaryOp::Eq => Ok(i128::from(l == r)),
            BinaryOp::Neq => Ok(i128::from(l != r)),
            BinaryOp::Lt => Ok(i128::from(l < r)),
            BinaryOp::Gt => Ok(i128::from(l > r)),
            BinaryOp::Le => Ok(i128::from(l <= r)),
            BinaryOp::Ge => Ok(i128::from(l >= r)),
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalError {
    DivisionByZero,
    Overflow,
    NegativeShift,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::DivisionByZero => f.write_str("division by zero"),
            EvalError::Overflow => f.write_str("integer overflow in expression"),
            EvalError::NegativeShift => f.write_str("negative shift count"),
        }
    }
}

/// Division rounding towards negative infinity.
fn floor_div(l: i128, r: i128) -> Result<i128, EvalError> {
    if r == 0 {
        return Err(EvalError::DivisionByZero);
    }

    let q = l.checked_div(r).ok_or(EvalError::Overflow)?;
    if l % r != 0 && (l < 0) != (r < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Remainder with the sign of the divisor.
fn floor_mod(l: i128, r: i128) -> Result<i128, EvalError> {
    if r == 0 {
        return Err(EvalError::DivisionByZero);
    }

    let m = l.checked_rem(r).ok_or(EvalError::Overflow)?;
    if m != 0 && (m < 0) != (r < 0) {
        Ok(m + r)
    } else {
        Ok(m)
    }
}

fn shift_left(l: i128, r: i128) -> Result<i128, EvalError> {
    if r < 0 {
        return Err(EvalError::NegativeShift);
    }
    if l == 0 {
        return Ok(0);
    }

    let shift = u32::try_from(r)
        .ok()
        .filter(|s| *s < i128::BITS)
        .ok_or(EvalError::Overflow)?;
    let res = l << shift;
    if res >> shift != l {
        return Err(EvalError::Overflow);
    }
    Ok(res)
}

fn shift_right(l: i128, r: i128) -> Result<i128, EvalError> {
    if r < 0 {
        return Err(EvalError::NegativeShift);
    }

    match u32::try_from(r) {
        Ok(shift) if shift < i128::BITS => Ok(l >> shift),
        _ => Ok(if l < 0 { -1 } else { 0 }),
    }
}

/// Binary operators by precedence level, loosest first.
const BINARY_LEVELS: [&[(Punct, BinaryOp)]; 10] = [
    &[(Punct::OrOr, BinaryOp::Or)],
    &[(Punct::AndAnd, BinaryOp::And)],
    &[(Punct::Or, BinaryOp::BitOr)],
    &[(Punct::Caret, BinaryOp::BitXor)],
    &[(Punct::And, BinaryOp::BitAnd)],
    &[(Punct::EqEq, BinaryOp::Eq), (Punct::NotEq, BinaryOp::Neq)],
    &[
        (Punct::Lt, BinaryOp::Lt),
        (Punct::Gt, BinaryOp::Gt),
        (Punct::Le, BinaryOp::Le),
        (Punct::Ge, BinaryOp::Ge),
    ],
    &[(Punct::Shl, BinaryOp::LShift), (Punct::Shr, BinaryOp::RShift)],
    &[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)],
    &[
        (Punct::Star, BinaryOp::Mul),
        (Punct::Slash, BinaryOp::Div),
        (Punct::Percent, BinaryOp::Mod),
    ],
];

impl Parser {
    /// Parses and evaluates a primary expression: a number, a character
    /// literal or a parenthesized expression.
    pub(crate) fn eval_prim(&mut self) -> Result<i128> {
        let expr = self.parse_prim()?;
        expr.eval().map_err(|e| self.lexer.error(e))
    }

    fn parse_prim(&mut self) -> Result<Expression> {
        match self.next()? {
            Token::Num(n) => Ok(Expression::Lit(IntLiteral::Num(n))),
            Token::Char(c) => Ok(Expression::Lit(IntLiteral::Char(c))),
            Token::Punct(Punct::LParen) => {
                let expr = self.parse_ternary()?;
                self.expect(Punct::RParen)?;
                Ok(expr)
            }
            _ => Err(self.lexer.error("expected number or parenthesized expression")),
        }
    }

    fn parse_ternary(&mut self) -> Result<Expression> {
        let cond = self.parse_binary(0)?;
        if !self.check(Punct::Question)? {
            return Ok(cond);
        }

        let then = self.parse_ternary()?;
        self.expect(Punct::Colon)?;
        let else_ = self.parse_ternary()?;

        Ok(Expression::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            else_: Box::new(else_),
        })
    }

    /// Parses a left-associative chain of the operators at `level`.
    fn parse_binary(&mut self, level: usize) -> Result<Expression> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.parse_unary();
        };

        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let op = match self.peek()? {
                Token::Punct(p) => ops.iter().find(|(punct, _)| punct == p).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else {
                return Ok(lhs);
            };

            self.next()?;
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expression::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let op = if self.check(Punct::Minus)? {
            UnaryOp::Neg
        } else if self.check(Punct::Tilde)? {
            UnaryOp::BitNot
        } else if self.check(Punct::Not)? {
            UnaryOp::LogicalNot
        } else {
            return self.parse_prim();
        };

        Ok(Expression::Unary(op, Box::new(self.parse_unary()?)))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::options::ParseOptions;

    fn eval(expr: &str) -> Result<i128> {
        let mut parser = Parser::new(
            &ParseOptions::new(),
            PathBuf::from("expr.dts"),
            expr.as_bytes().to_vec(),
        );
        parser.eval_prim()
    }

    #[test]
    fn literals() {
        for (input, exp) in [("42", 42), ("0x2a", 42), ("052", 42), ("'*'", 42), ("(42)", 42)] {
            assert_eq!(exp, eval(input).unwrap());
        }
    }

    #[test]
    fn precedence() {
        for (input, exp) in [
            ("(1 + 2 * 3)", 7),
            ("((1 + 2) * 3)", 9),
            ("(10 - 4 - 3)", 3),
            ("(1 << 4 + 1)", 32),
            ("(1 | 2 ^ 3 & 4)", 3),
            ("(2 < 3 == 1)", 1),
            ("(1 || 0 && 0)", 1),
            ("(-3 * -(2))", 6),
            ("(~0)", -1),
            ("(!5)", 0),
            ("(!0)", 1),
            ("(0 ? 1 : 2)", 2),
            ("(1 ? 2 ? 3 : 4 : 5)", 3),
            ("(0x10 >= 16)", 1),
            ("(3 != 3)", 0),
        ] {
            assert_eq!(exp, eval(dbg!(input)).unwrap());
        }
    }

    #[test]
    fn floor_division() {
        for (input, exp) in [
            ("(7 / 2)", 3),
            ("(-7 / 2)", -4),
            ("(7 / -2)", -4),
            ("(-7 / -2)", 3),
            ("(7 % 3)", 1),
            ("(-7 % 3)", 2),
            ("(7 % -3)", -2),
        ] {
            assert_eq!(exp, eval(dbg!(input)).unwrap());
        }
    }

    #[test]
    fn shifts() {
        assert_eq!(1i128 << 100, eval("(1 << 100)").unwrap());
        assert_eq!(-1, eval("(-8 >> 200)").unwrap());
        assert_eq!(0, eval("(8 >> 200)").unwrap());
        assert_eq!(0, eval("(0 << 500)").unwrap());
    }

    #[test]
    fn short_circuit() {
        assert_eq!(1, eval("(1 || 1 / 0)").unwrap());
        assert_eq!(0, eval("(0 && 1 / 0)").unwrap());
        assert_eq!(2, eval("(0 ? 1 / 0 : 2)").unwrap());
    }

    #[test]
    fn errors() {
        for (input, msg) in [
            ("(1 / 0)", "division by zero"),
            ("(1 % 0)", "division by zero"),
            ("(1 << 127 << 1)", "integer overflow in expression"),
            ("(1 << -1)", "negative shift count"),
            ("(1 + )", "expected number or parenthesized expression"),
            ("x", "expected number or parenthesized expression"),
            ("(1 ? 2 3)", "expected ':', not '3'"),
            ("(1 2)", "expected ')', not '2'"),
        ] {
            let err = eval(dbg!(input)).unwrap_err().to_string();
            assert!(err.ends_with(msg), "{err}");
        }
    }
}

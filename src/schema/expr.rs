//! Arithmetic expressions for computed columns.
//!
//! A computed column declares an expression over its sibling stored columns,
//! e.g. `weight_lb / 2.205` or `1.0e9 * revenue / num_employees`. Expressions
//! are parsed once at schema load time; evaluation happens after every
//! create/update to refresh the derived values.

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("invalid number literal '{0}'")]
    BadNumber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Column(String),
    Neg(Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' | '.' => {
                let mut lit = String::new();
                while let Some(&c) = chars.peek() {
                    match c {
                        '0'..='9' | '.' | 'e' | 'E' => {
                            lit.push(c);
                            chars.next();
                            // exponent sign, e.g. 1.0e-3
                            if (c == 'e' || c == 'E')
                                && matches!(chars.peek(), Some('+') | Some('-'))
                            {
                                if let Some(sign) = chars.next() {
                                    lit.push(sign);
                                }
                            }
                        }
                        _ => break,
                    }
                }
                let value: f64 = lit.parse().map_err(|_| ExprError::BadNumber(lit.clone()))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(Op::Add),
            Some(Token::Minus) => Some(Op::Sub),
            _ => None,
        } {
            self.next();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.factor()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(Op::Mul),
            Some(Token::Slash) => Some(Op::Div),
            _ => None,
        } {
            self.next();
            let rhs = self.factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // factor := '-' factor | number | ident | '(' expr ')'
    fn factor(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => Ok(Expr::Column(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(t) => Err(ExprError::UnexpectedToken(format!("{:?}", t))),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(t) => Err(ExprError::UnexpectedToken(format!("{:?}", t))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

impl Expr {
    pub fn parse(src: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(t) = parser.peek() {
            return Err(ExprError::UnexpectedToken(format!("{:?}", t)));
        }
        Ok(expr)
    }

    /// Column names referenced by this expression.
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Column(name) => {
                out.insert(name.as_str());
            }
            Expr::Neg(inner) => inner.collect_columns(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_columns(out);
                rhs.collect_columns(out);
            }
        }
    }

    /// Evaluate against a row. A NULL input or a division by zero makes the
    /// whole result NULL instead of failing the write.
    pub fn eval(&self, row: &HashMap<String, Option<f64>>) -> Option<f64> {
        match self {
            Expr::Number(n) => Some(*n),
            Expr::Column(name) => row.get(name).copied().flatten(),
            Expr::Neg(inner) => inner.eval(row).map(|v| -v),
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(row)?;
                let r = rhs.eval(row)?;
                match op {
                    Op::Add => Some(l + r),
                    Op::Sub => Some(l - r),
                    Op::Mul => Some(l * r),
                    Op::Div => {
                        if r == 0.0 {
                            None
                        } else {
                            Some(l / r)
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Option<f64>)]) -> HashMap<String, Option<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn parses_and_evaluates_basic_arithmetic() {
        let e = Expr::parse("weight_lb / 2.205").unwrap();
        let v = e.eval(&row(&[("weight_lb", Some(44.1))])).unwrap();
        assert!((v - 20.0).abs() < 1e-9);
    }

    #[test]
    fn respects_precedence_and_parens() {
        let e = Expr::parse("1 + 2 * 3").unwrap();
        assert_eq!(e.eval(&row(&[])), Some(7.0));

        let e = Expr::parse("(1 + 2) * 3").unwrap();
        assert_eq!(e.eval(&row(&[])), Some(9.0));
    }

    #[test]
    fn scientific_notation_and_chained_division() {
        let e = Expr::parse("1.0e9 * revenue / num_employees").unwrap();
        let v = e
            .eval(&row(&[("revenue", Some(265.0)), ("num_employees", Some(132000.0))]))
            .unwrap();
        assert!((v - 2007575.757575).abs() < 1e-3);
    }

    #[test]
    fn unary_minus() {
        let e = Expr::parse("-x + 10").unwrap();
        assert_eq!(e.eval(&row(&[("x", Some(4.0))])), Some(6.0));
    }

    #[test]
    fn null_inputs_and_division_by_zero_yield_null() {
        let e = Expr::parse("a / b").unwrap();
        assert_eq!(e.eval(&row(&[("a", Some(1.0)), ("b", Some(0.0))])), None);
        assert_eq!(e.eval(&row(&[("a", None), ("b", Some(2.0))])), None);
        assert_eq!(e.eval(&row(&[("b", Some(2.0))])), None);
    }

    #[test]
    fn reports_referenced_columns() {
        let e = Expr::parse("1.0e9 * revenue / num_employees").unwrap();
        let cols: Vec<&str> = e.columns().into_iter().collect();
        assert_eq!(cols, vec!["num_employees", "revenue"]);
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(Expr::parse("").is_err());
        assert!(Expr::parse("a +").is_err());
        assert!(Expr::parse("(a + b").is_err());
        assert!(Expr::parse("a $ b").is_err());
        assert!(Expr::parse("1.2.3").is_err());
    }
}

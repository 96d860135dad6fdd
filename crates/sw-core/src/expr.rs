//! Restricted expression sublanguage for filter steps.
//!
//! Pure and total over bound variables: comparisons, boolean connectives,
//! arithmetic, string concatenation, templates and a conditional. No calls,
//! no property access, no assignment.

use std::collections::BTreeSet;
use std::fmt;

use crate::binding::{Bindings, Template};
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum ExprError {
    Parse { offset: usize, message: String },
    Unbound(String),
    Type(String),
    DivisionByZero,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Parse { offset, message } => write!(f, "parse error at {offset}: {message}"),
            ExprError::Unbound(var) => write!(f, "unbound variable {var}"),
            ExprError::Type(msg) => write!(f, "type error: {msg}"),
            ExprError::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

impl std::error::Error for ExprError {}

type ExprResult<T> = std::result::Result<T, ExprError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn binding_power(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub => 5,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 6,
        }
    }

    fn from_symbol(op: &str) -> Option<Self> {
        Some(match op {
            "||" => BinOp::Or,
            "&&" => BinOp::And,
            "==" | "===" => BinOp::Eq,
            "!=" | "!==" => BinOp::Ne,
            "<" => BinOp::Lt,
            "<=" => BinOp::Le,
            ">" => BinOp::Gt,
            ">=" => BinOp::Ge,
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Rem,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Template(Template),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(src: &str) -> ExprResult<Self> {
        let tokens = lex(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.ternary()?;
        match parser.peek() {
            Tok::Eof => Ok(expr),
            other => Err(parser.error(format!("unexpected {other:?}"))),
        }
    }

    /// Every variable the expression reads.
    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Template(t) => out.extend(t.vars().map(str::to_string)),
            Expr::Unary(_, e) => e.collect_vars(out),
            Expr::Binary(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            Expr::Conditional(c, t, e) => {
                c.collect_vars(out);
                t.collect_vars(out);
                e.collect_vars(out);
            }
        }
    }

    pub fn eval(&self, env: &Bindings) -> ExprResult<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::Unbound(name.clone())),
            Expr::Template(t) => t.render(env).map(Value::String),
            Expr::Unary(UnaryOp::Not, e) => Ok(Value::Bool(!expect_bool(&e.eval(env)?, "!")?)),
            Expr::Unary(UnaryOp::Neg, e) => match e.eval(env)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(ExprError::Type(format!("cannot negate {}", other.type_name()))),
            },
            Expr::Binary(BinOp::And, l, r) => {
                if !expect_bool(&l.eval(env)?, "&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(expect_bool(&r.eval(env)?, "&&")?))
            }
            Expr::Binary(BinOp::Or, l, r) => {
                if expect_bool(&l.eval(env)?, "||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(expect_bool(&r.eval(env)?, "||")?))
            }
            Expr::Binary(op, l, r) => binary(*op, l.eval(env)?, r.eval(env)?),
            Expr::Conditional(c, t, e) => {
                if expect_bool(&c.eval(env)?, "?:")? {
                    t.eval(env)
                } else {
                    e.eval(env)
                }
            }
        }
    }
}

fn expect_bool(v: &Value, op: &str) -> ExprResult<bool> {
    v.as_bool()
        .ok_or_else(|| ExprError::Type(format!("{op} expects boolean, got {}", v.type_name())))
}

fn binary(op: BinOp, l: Value, r: Value) -> ExprResult<Value> {
    use Value::{Number, String as Str};
    match op {
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (&l, &r) {
                (Number(a), Number(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(|| {
                ExprError::Type(format!(
                    "cannot compare {} with {}",
                    l.type_name(),
                    r.type_name()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::Add => match (&l, &r) {
            (Number(a), Number(b)) => Ok(Number(a + b)),
            (Str(_), _) | (_, Str(_)) => Ok(Str(format!("{l}{r}"))),
            _ => Err(ExprError::Type(format!(
                "cannot add {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let (Number(a), Number(b)) = (&l, &r) else {
                return Err(ExprError::Type(format!(
                    "arithmetic on {} and {}",
                    l.type_name(),
                    r.type_name()
                )));
            };
            match op {
                BinOp::Sub => Ok(Number(a - b)),
                BinOp::Mul => Ok(Number(a * b)),
                _ if *b == 0.0 => Err(ExprError::DivisionByZero),
                BinOp::Div => Ok(Number(a / b)),
                _ => Ok(Number(a % b)),
            }
        }
        BinOp::And => Ok(Value::Bool(expect_bool(&l, "&&")? && expect_bool(&r, "&&")?)),
        BinOp::Or => Ok(Value::Bool(expect_bool(&l, "||")? || expect_bool(&r, "||")?)),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Tpl(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
    Eof,
}

const OPERATORS: [&str; 17] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!", "=",
];

fn lex(src: &str) -> ExprResult<Vec<(usize, Tok)>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        match c {
            '(' => {
                out.push((start, Tok::LParen));
                i += 1;
            }
            ')' => {
                out.push((start, Tok::RParen));
                i += 1;
            }
            '?' => {
                out.push((start, Tok::Question));
                i += 1;
            }
            ':' => {
                out.push((start, Tok::Colon));
                i += 1;
            }
            '0'..='9' | '.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let text = &src[start..i];
                let n = text.parse::<f64>().map_err(|_| ExprError::Parse {
                    offset: start,
                    message: format!("bad number {text:?}"),
                })?;
                out.push((start, Tok::Num(n)));
            }
            '"' | '\'' => {
                let (s, next) = lex_string(src, i, c)?;
                out.push((start, Tok::Str(s)));
                i = next;
            }
            '`' => {
                let end = src[i + 1..].find('`').ok_or(ExprError::Parse {
                    offset: start,
                    message: "unterminated template".into(),
                })?;
                out.push((start, Tok::Tpl(src[i + 1..i + 1 + end].to_string())));
                i += end + 2;
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
                {
                    i += 1;
                }
                let word = src[start..i].trim_start_matches('$');
                out.push((start, Tok::Ident(word.to_string())));
            }
            _ => {
                let op = OPERATORS
                    .iter()
                    .find(|op| src[i..].starts_with(**op))
                    .ok_or_else(|| ExprError::Parse {
                        offset: start,
                        message: format!("unexpected character {c:?}"),
                    })?;
                if *op == "=" {
                    return Err(ExprError::Parse {
                        offset: start,
                        message: "assignment is not allowed; use == for comparison".into(),
                    });
                }
                out.push((start, Tok::Op(*op)));
                i += op.len();
            }
        }
    }
    out.push((src.len(), Tok::Eof));
    Ok(out)
}

fn lex_string(src: &str, open: usize, quote: char) -> ExprResult<(String, usize)> {
    let mut s = String::new();
    let mut chars = src[open + 1..].char_indices();
    while let Some((off, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => s.push('\n'),
                Some((_, 't')) => s.push('\t'),
                Some((_, other)) => s.push(other),
                None => break,
            },
            c if c == quote => return Ok((s, open + 1 + off + 1)),
            c => s.push(c),
        }
    }
    Err(ExprError::Parse {
        offset: open,
        message: "unterminated string".into(),
    })
}

// ---------------------------------------------------------------------------
// Parser (precedence climbing)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].1.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: String) -> ExprError {
        ExprError::Parse {
            offset: self.tokens[self.pos].0,
            message,
        }
    }

    fn ternary(&mut self) -> ExprResult<Expr> {
        let cond = self.binary(0)?;
        if *self.peek() != Tok::Question {
            return Ok(cond);
        }
        self.advance();
        let then = self.ternary()?;
        if *self.peek() != Tok::Colon {
            return Err(self.error("expected ':' in conditional".into()));
        }
        self.advance();
        let otherwise = self.ternary()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn binary(&mut self, min_bp: u8) -> ExprResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Op(sym) => match BinOp::from_symbol(sym) {
                    Some(op) => op,
                    None => break,
                },
                _ => break,
            };
            let bp = op.binding_power();
            if bp <= min_bp {
                break;
            }
            self.advance();
            let rhs = self.binary(bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> ExprResult<Expr> {
        match self.peek() {
            Tok::Op("!") => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Tok::Op("-") => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> ExprResult<Expr> {
        let offset = self.tokens[self.pos].0;
        match self.advance() {
            Tok::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::Tpl(raw) => Ok(Expr::Template(Template::parse(&raw))),
            Tok::Ident(word) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Var(word),
            }),
            Tok::LParen => {
                let inner = self.ternary()?;
                if *self.peek() != Tok::RParen {
                    return Err(self.error("expected ')'".into()));
                }
                self.advance();
                Ok(inner)
            }
            other => Err(ExprError::Parse {
                offset,
                message: format!("unexpected {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, Value)]) -> Bindings {
        let mut b = Bindings::new();
        for (k, v) in pairs {
            b.unify(k, v.clone());
        }
        b
    }

    fn eval(src: &str, env: &Bindings) -> ExprResult<Value> {
        Expr::parse(src)?.eval(env)
    }

    #[test]
    fn test_strict_equality() {
        let e = env(&[("count", Value::Number(3.0))]);
        assert_eq!(eval("count === 3", &e).unwrap(), Value::Bool(true));
        assert_eq!(eval("count == 2", &e).unwrap(), Value::Bool(false));
        assert_eq!(eval("count !== '3'", &e).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_precedence() {
        let e = Bindings::new();
        assert_eq!(eval("1 + 2 * 3", &e).unwrap(), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3", &e).unwrap(), Value::Number(9.0));
        assert_eq!(eval("10 - 4 - 3", &e).unwrap(), Value::Number(3.0));
        assert_eq!(eval("1 < 2 && 2 < 3 || false", &e).unwrap(), Value::Bool(true));
        assert_eq!(eval("!(1 > 2)", &e).unwrap(), Value::Bool(true));
        assert_eq!(eval("-2 * 3", &e).unwrap(), Value::Number(-6.0));
    }

    #[test]
    fn test_concatenation_and_ternary() {
        let e = env(&[("allowed", Value::Bool(false)), ("n", Value::Number(2.0))]);
        assert_eq!(
            eval("allowed ? \"received\" : \"rate limited\"", &e).unwrap(),
            Value::str("rate limited")
        );
        assert_eq!(eval("'n=' + n", &e).unwrap(), Value::str("n=2"));
        assert_eq!(eval("`got ${n}`", &e).unwrap(), Value::str("got 2"));
    }

    #[test]
    fn test_short_circuit_skips_unbound() {
        let e = Bindings::new();
        assert_eq!(eval("false && missing", &e).unwrap(), Value::Bool(false));
        assert_eq!(eval("true || missing", &e).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_errors() {
        let e = env(&[("s", Value::str("x"))]);
        assert_eq!(eval("missing > 1", &e), Err(ExprError::Unbound("missing".into())));
        assert!(matches!(eval("s > 1", &e), Err(ExprError::Type(_))));
        assert!(matches!(eval("s && true", &e), Err(ExprError::Type(_))));
        assert_eq!(eval("1 / 0", &e), Err(ExprError::DivisionByZero));
        assert_eq!(eval("1 % 0", &e), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Expr::parse("count = 3"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("(1 + 2"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("'open"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("1 2"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("a ? b"), Err(ExprError::Parse { .. })));
        assert!(matches!(Expr::parse("#"), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn test_vars_collects_all_references() {
        let expr = Expr::parse("$a > b ? `x${c}` : d + 1").unwrap();
        let vars: Vec<_> = expr.vars().into_iter().collect();
        assert_eq!(vars, vec!["a", "b", "c", "d"]);
    }
}

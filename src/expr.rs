//! Expression evaluation for array lengths, conditions and `#define` values.
//!
//! The decoder only depends on the [`Evaluator`] and [`Resolver`] traits: given expression text
//! and a way to look names up, produce a [`Number`]. [`ExprEvaluator`] is the bundled
//! implementation, a PEST grammar (`expr.pest`) driven through a Pratt parser with C operator
//! precedence.

use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser as PestParser;
use std::collections::HashMap;

#[derive(PestParser)]
#[grammar = "expr.pest"]
struct ExprParser;

/// Result of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_i64(&self) -> i64 {
        match *self {
            Number::Int(i) => i,
            Number::Float(f) => f as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match *self {
            Number::Int(i) => i != 0,
            Number::Float(f) => f != 0.0,
        }
    }
}

impl From<bool> for Number {
    fn from(b: bool) -> Self {
        Number::Int(b as i64)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("syntax: {0}")]
    Syntax(String),
    #[error("unknown name '{0}'")]
    UnknownName(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("bad literal '{0}'")]
    BadLiteral(String),
}

/// Name lookup supplied by the caller of [`Evaluator::evaluate`].
pub trait Resolver {
    fn lookup(&self, name: &str) -> Option<Number>;
}

/// Deterministic, side-effect-free expression evaluation.
pub trait Evaluator {
    fn evaluate(&self, expr: &str, resolver: &dyn Resolver) -> Result<Number, EvalError>;
}

/// Resolves nothing; useful for constant expressions.
pub struct NoNames;

impl Resolver for NoNames {
    fn lookup(&self, _name: &str) -> Option<Number> {
        None
    }
}

const MAX_DEFINE_NESTING: u8 = 16;

/// Resolves names against `#define` bindings, evaluating each value on demand. Values may refer
/// to other defines; a chain deeper than 16 (or a cycle) resolves to nothing.
pub struct DefineResolver<'a> {
    defines: &'a HashMap<String, String>,
    evaluator: &'a dyn Evaluator,
    depth: u8,
}

impl<'a> DefineResolver<'a> {
    pub fn new(defines: &'a HashMap<String, String>, evaluator: &'a dyn Evaluator) -> Self {
        DefineResolver { defines, evaluator, depth: 0 }
    }
}

impl Resolver for DefineResolver<'_> {
    fn lookup(&self, name: &str) -> Option<Number> {
        let text = self.defines.get(name)?;
        if self.depth >= MAX_DEFINE_NESTING {
            tracing::warn!(define = name, "define nesting too deep");
            return None;
        }
        let inner = DefineResolver {
            defines: self.defines,
            evaluator: self.evaluator,
            depth: self.depth + 1,
        };
        self.evaluator.evaluate(text, &inner).ok()
    }
}

/// C-like integer/float expressions: `|| && | ^ & == != < <= > >= << >> + - * / %`, prefix
/// `- ! ~`, parentheses, decimal, hex and float literals, and identifiers.
pub struct ExprEvaluator {
    pratt: PrattParser<Rule>,
}

impl Default for ExprEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprEvaluator {
    pub fn new() -> Self {
        let pratt = PrattParser::new()
            .op(Op::infix(Rule::or, Assoc::Left))
            .op(Op::infix(Rule::and, Assoc::Left))
            .op(Op::infix(Rule::bit_or, Assoc::Left))
            .op(Op::infix(Rule::bit_xor, Assoc::Left))
            .op(Op::infix(Rule::bit_and, Assoc::Left))
            .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::ne, Assoc::Left))
            .op(Op::infix(Rule::lt, Assoc::Left)
                | Op::infix(Rule::le, Assoc::Left)
                | Op::infix(Rule::gt, Assoc::Left)
                | Op::infix(Rule::ge, Assoc::Left))
            .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left)
                | Op::infix(Rule::div, Assoc::Left)
                | Op::infix(Rule::rem, Assoc::Left))
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::not) | Op::prefix(Rule::bit_not));
        ExprEvaluator { pratt }
    }

    fn eval_pairs(&self, pairs: Pairs<Rule>, resolver: &dyn Resolver) -> Result<Number, EvalError> {
        self.pratt
            .map_primary(|primary| self.eval_primary(primary, resolver))
            .map_prefix(|op, rhs| {
                let v = rhs?;
                Ok(match op.as_rule() {
                    Rule::neg => match v {
                        Number::Int(i) => Number::Int(i.wrapping_neg()),
                        Number::Float(f) => Number::Float(-f),
                    },
                    Rule::not => Number::from(!v.is_truthy()),
                    Rule::bit_not => Number::Int(!v.as_i64()),
                    other => return Err(EvalError::Syntax(format!("unexpected prefix {:?}", other))),
                })
            })
            .map_infix(|lhs, op, rhs| binary(op.as_rule(), lhs?, rhs?))
            .parse(pairs)
    }

    fn eval_primary(&self, pair: Pair<Rule>, resolver: &dyn Resolver) -> Result<Number, EvalError> {
        match pair.as_rule() {
            Rule::expr => self.eval_pairs(pair.into_inner(), resolver),
            Rule::int => {
                let s = pair.as_str();
                s.parse::<i64>()
                    .or_else(|_| s.parse::<u64>().map(|u| u as i64))
                    .map(Number::Int)
                    .map_err(|_| EvalError::BadLiteral(s.to_string()))
            }
            Rule::hex => {
                let s = pair.as_str();
                u64::from_str_radix(&s[2..], 16)
                    .map(|u| Number::Int(u as i64))
                    .map_err(|_| EvalError::BadLiteral(s.to_string()))
            }
            Rule::float => {
                let s = pair.as_str();
                s.parse::<f64>()
                    .map(Number::Float)
                    .map_err(|_| EvalError::BadLiteral(s.to_string()))
            }
            Rule::ident => {
                let name = pair.as_str();
                resolver
                    .lookup(name)
                    .ok_or_else(|| EvalError::UnknownName(name.to_string()))
            }
            other => Err(EvalError::Syntax(format!("unexpected {:?}", other))),
        }
    }
}

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, expr: &str, resolver: &dyn Resolver) -> Result<Number, EvalError> {
        let mut pairs = ExprParser::parse(Rule::expression, expr)
            .map_err(|e| EvalError::Syntax(e.to_string()))?;
        let root = pairs.next().ok_or_else(|| EvalError::Syntax("empty expression".to_string()))?;
        let body = root
            .into_inner()
            .find(|p| p.as_rule() == Rule::expr)
            .ok_or_else(|| EvalError::Syntax("empty expression".to_string()))?;
        self.eval_pairs(body.into_inner(), resolver)
    }
}

fn binary(rule: Rule, l: Number, r: Number) -> Result<Number, EvalError> {
    use Number::{Float, Int};
    Ok(match rule {
        Rule::or => Number::from(l.is_truthy() || r.is_truthy()),
        Rule::and => Number::from(l.is_truthy() && r.is_truthy()),
        Rule::bit_or => Int(l.as_i64() | r.as_i64()),
        Rule::bit_xor => Int(l.as_i64() ^ r.as_i64()),
        Rule::bit_and => Int(l.as_i64() & r.as_i64()),
        Rule::shl => Int(l.as_i64().wrapping_shl(r.as_i64() as u32)),
        Rule::shr => Int(l.as_i64().wrapping_shr(r.as_i64() as u32)),
        Rule::eq => Number::from(compare(l, r) == Some(std::cmp::Ordering::Equal)),
        Rule::ne => Number::from(compare(l, r) != Some(std::cmp::Ordering::Equal)),
        Rule::lt => Number::from(compare(l, r) == Some(std::cmp::Ordering::Less)),
        Rule::le => Number::from(matches!(compare(l, r), Some(o) if o.is_le())),
        Rule::gt => Number::from(compare(l, r) == Some(std::cmp::Ordering::Greater)),
        Rule::ge => Number::from(matches!(compare(l, r), Some(o) if o.is_ge())),
        Rule::add | Rule::sub | Rule::mul | Rule::div | Rule::rem => match (l, r) {
            (Int(a), Int(b)) => Int(match rule {
                Rule::add => a.wrapping_add(b),
                Rule::sub => a.wrapping_sub(b),
                Rule::mul => a.wrapping_mul(b),
                Rule::div if b == 0 => return Err(EvalError::DivisionByZero),
                Rule::div => a.wrapping_div(b),
                _ if b == 0 => return Err(EvalError::DivisionByZero),
                _ => a.wrapping_rem(b),
            }),
            _ => {
                let (a, b) = (l.as_f64(), r.as_f64());
                Float(match rule {
                    Rule::add => a + b,
                    Rule::sub => a - b,
                    Rule::mul => a * b,
                    _ if b == 0.0 => return Err(EvalError::DivisionByZero),
                    Rule::div => a / b,
                    _ => a % b,
                })
            }
        },
        other => return Err(EvalError::Syntax(format!("unexpected operator {:?}", other))),
    })
}

fn compare(l: Number, r: Number) -> Option<std::cmp::Ordering> {
    match (l, r) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
        _ => l.as_f64().partial_cmp(&r.as_f64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Vars(Vec<(&'static str, i64)>);

    impl Resolver for Vars {
        fn lookup(&self, name: &str) -> Option<Number> {
            self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| Number::Int(*v))
        }
    }

    fn eval(s: &str) -> Result<Number, EvalError> {
        ExprEvaluator::new().evaluate(s, &NoNames)
    }

    #[test]
    fn precedence_follows_c() {
        assert_eq!(eval("1 + 2 * 3"), Ok(Number::Int(7)));
        assert_eq!(eval("(1 + 2) * 3"), Ok(Number::Int(9)));
        assert_eq!(eval("1 << 2 + 1"), Ok(Number::Int(8)));
        assert_eq!(eval("6 & 3 == 3"), Ok(Number::Int(0)));
        assert_eq!(eval("1 || 0 && 0"), Ok(Number::Int(1)));
    }

    #[test]
    fn prefix_operators() {
        assert_eq!(eval("-4 + 1"), Ok(Number::Int(-3)));
        assert_eq!(eval("!0"), Ok(Number::Int(1)));
        assert_eq!(eval("~0"), Ok(Number::Int(-1)));
    }

    #[test]
    fn hex_and_float_literals() {
        assert_eq!(eval("0x10 + 1"), Ok(Number::Int(17)));
        assert_eq!(eval("1.5 * 2"), Ok(Number::Float(3.0)));
        assert_eq!(eval("7 / 2"), Ok(Number::Int(3)));
    }

    #[test]
    fn names_go_through_resolver() {
        let vars = Vars(vec![("count", 5), ("flags", 0x81)]);
        let e = ExprEvaluator::new();
        assert_eq!(e.evaluate("count * 4", &vars), Ok(Number::Int(20)));
        assert_eq!(e.evaluate("flags & 0x80", &vars), Ok(Number::Int(0x80)));
        assert_eq!(e.evaluate("missing + 1", &vars), Err(EvalError::UnknownName("missing".to_string())));
    }

    #[test]
    fn division_by_zero_fails() {
        assert_eq!(eval("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(eval("1 % 0"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(matches!(eval("1 +"), Err(EvalError::Syntax(_))));
        assert!(matches!(eval(""), Err(EvalError::Syntax(_))));
    }

    #[test]
    fn defines_chain_and_cycles() {
        let e = ExprEvaluator::new();
        let mut defines = HashMap::new();
        defines.insert("A".to_string(), "4".to_string());
        defines.insert("B".to_string(), "A * 2".to_string());
        defines.insert("LOOP".to_string(), "LOOP + 1".to_string());
        let r = DefineResolver::new(&defines, &e);
        assert_eq!(r.lookup("B"), Some(Number::Int(8)));
        assert_eq!(r.lookup("a"), None);
        assert_eq!(r.lookup("LOOP"), None);
    }
}

//! Formula parsing and evaluation for COMPUTED parameters
//!
//! The formula language is plain arithmetic (`+ - * / ^`, with `**` accepted
//! as a synonym for `^`, unary minus, parentheses, numeric literals and a
//! few functions) over references to other dashboard parameters.
//!
//! A reference is written either as `p[N]`, with `N` the internal index of the
//! referenced parameter, or as a bare identifier. Bare identifiers are bound
//! after parsing: first against the dashboard parameter names, then against
//! the `pN` shorthand. Once bound, a formula only holds [`Expression::Reference`]
//! nodes; the resolver later rewrites those into [`Expression::Slot`] nodes
//! addressing the optimizer's flat parameter vector.

use nom::{
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::recognize,
    multi::many0,
    number::complete::double,
    sequence::{delimited, pair},
    IResult, Parser,
};
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Error that can occur during formula parsing, binding or evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Failed to parse formula: {message}")]
    ParseError { message: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Reference p[{index}] is not strictly before parameter {owner}")]
    ForwardReference { index: usize, owner: usize },

    #[error("Reference p[{index}] has not been translated to an optimizer slot")]
    UnresolvedReference { index: usize },

    #[error("Optimizer slot {index} is out of range")]
    SlotOutOfRange { index: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Undefined function: {name}")]
    UndefinedFunction { name: String },
}

/// Result type for formula evaluation
pub type ExprResult<T> = Result<T, ExpressionError>;

/// Formula AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant number
    Number(f64),

    /// Internal (dashboard) parameter index
    Reference(usize),

    /// Optimizer (minuit) slot index
    Slot(usize),

    /// Identifier not yet bound to a parameter
    Symbol(String),

    /// Unary operations
    Unary(UnaryOp, Box<Expression>),

    /// Binary operations
    Binary(BinaryOp, Box<Expression>, Box<Expression>),

    /// Function call
    Function(String, Vec<Expression>),
}

/// Unary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    /// Negation (-)
    Neg,
}

/// Binary operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }

    fn apply(self, lhs: f64, rhs: f64) -> ExprResult<f64> {
        match self {
            BinaryOp::Add => Ok(lhs + rhs),
            BinaryOp::Sub => Ok(lhs - rhs),
            BinaryOp::Mul => Ok(lhs * rhs),
            BinaryOp::Div => {
                if rhs == 0.0 {
                    Err(ExpressionError::DivisionByZero)
                } else {
                    Ok(lhs / rhs)
                }
            }
            BinaryOp::Pow => Ok(lhs.powf(rhs)),
        }
    }
}

/// Source of values for references and slots during evaluation
pub trait EvaluationContext {
    /// Value of the internal parameter `index`
    fn reference(&self, index: usize) -> ExprResult<f64>;

    /// Value of optimizer slot `index`
    fn slot(&self, index: usize) -> ExprResult<f64>;
}

/// Context over the optimizer's flat vector; references are not allowed.
#[derive(Debug, Clone, Copy)]
pub struct SlotValues<'a>(pub &'a [f64]);

impl EvaluationContext for SlotValues<'_> {
    fn reference(&self, index: usize) -> ExprResult<f64> {
        Err(ExpressionError::UnresolvedReference { index })
    }

    fn slot(&self, index: usize) -> ExprResult<f64> {
        self.0
            .get(index)
            .copied()
            .ok_or(ExpressionError::SlotOutOfRange { index })
    }
}

/// Context over dashboard values indexed by internal index.
#[derive(Debug, Clone, Copy)]
pub struct InternalValues<'a>(pub &'a [f64]);

impl EvaluationContext for InternalValues<'_> {
    fn reference(&self, index: usize) -> ExprResult<f64> {
        self.0
            .get(index)
            .copied()
            .ok_or(ExpressionError::UnresolvedReference { index })
    }

    fn slot(&self, index: usize) -> ExprResult<f64> {
        Err(ExpressionError::SlotOutOfRange { index })
    }
}

impl Expression {
    /// Parse a formula from a string
    pub fn parse(input: &str) -> ExprResult<Self> {
        match expr_parser(input.trim()) {
            Ok((remainder, expr)) => {
                if remainder.trim().is_empty() {
                    Ok(expr)
                } else {
                    Err(ExpressionError::ParseError {
                        message: format!("Unexpected trailing characters: '{}'", remainder),
                    })
                }
            }
            Err(e) => Err(ExpressionError::ParseError {
                message: format!("{:?}", e),
            }),
        }
    }

    /// Replace every [`Expression::Symbol`] by a [`Expression::Reference`].
    ///
    /// `lookup` maps a parameter name to its internal index. Names it does not
    /// know fall back to the `pN` shorthand; `pi` is the only named constant.
    /// Function names and argument counts are checked here too, so a bound
    /// formula can only fail to evaluate on its values.
    pub fn bind<F>(self, lookup: &F) -> ExprResult<Self>
    where
        F: Fn(&str) -> Option<usize>,
    {
        Ok(match self {
            Self::Symbol(name) => {
                if let Some(index) = lookup(&name) {
                    Self::Reference(index)
                } else if let Some(index) = shorthand_index(&name) {
                    Self::Reference(index)
                } else if name == "pi" {
                    Self::Number(std::f64::consts::PI)
                } else {
                    return Err(ExpressionError::UndefinedVariable { name });
                }
            }
            Self::Unary(op, inner) => Self::Unary(op, Box::new(inner.bind(lookup)?)),
            Self::Binary(op, lhs, rhs) => Self::Binary(
                op,
                Box::new(lhs.bind(lookup)?),
                Box::new(rhs.bind(lookup)?),
            ),
            Self::Function(name, args) => {
                check_call(&name, args.len())?;
                Self::Function(
                    name,
                    args.into_iter()
                        .map(|a| a.bind(lookup))
                        .collect::<ExprResult<Vec<_>>>()?,
                )
            }
            other => other,
        })
    }

    /// Rewrite references with `map`, which returns the replacement subtree.
    pub fn map_references<F>(&self, map: &mut F) -> ExprResult<Self>
    where
        F: FnMut(usize) -> ExprResult<Expression>,
    {
        Ok(match self {
            Self::Reference(index) => map(*index)?,
            Self::Unary(op, inner) => Self::Unary(*op, Box::new(inner.map_references(map)?)),
            Self::Binary(op, lhs, rhs) => Self::Binary(
                *op,
                Box::new(lhs.map_references(map)?),
                Box::new(rhs.map_references(map)?),
            ),
            Self::Function(name, args) => {
                let mut mapped = Vec::with_capacity(args.len());
                for arg in args {
                    mapped.push(arg.map_references(map)?);
                }
                Self::Function(name.clone(), mapped)
            }
            other => other.clone(),
        })
    }

    /// Evaluate the formula with the given context
    pub fn evaluate<C: EvaluationContext + ?Sized>(&self, context: &C) -> ExprResult<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Reference(index) => context.reference(*index),
            Self::Slot(index) => context.slot(*index),
            Self::Symbol(name) => Err(ExpressionError::UndefinedVariable { name: name.clone() }),
            Self::Unary(UnaryOp::Neg, expr) => Ok(-expr.evaluate(context)?),
            Self::Binary(op, left, right) => {
                let lhs = left.evaluate(context)?;
                let rhs = right.evaluate(context)?;
                op.apply(lhs, rhs)
            }
            Self::Function(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.evaluate(context)?);
                }
                call_function(name, &values)
            }
        }
    }

    /// Internal indices referenced by the formula, sorted and deduplicated
    pub fn references(&self) -> Vec<usize> {
        let mut refs = Vec::new();
        self.collect(&mut |e| {
            if let Self::Reference(i) = e {
                refs.push(*i);
            }
        });
        refs.sort_unstable();
        refs.dedup();
        refs
    }

    /// Optimizer slots used by the formula, sorted and deduplicated
    pub fn slots(&self) -> Vec<usize> {
        let mut slots = Vec::new();
        self.collect(&mut |e| {
            if let Self::Slot(i) = e {
                slots.push(*i);
            }
        });
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    fn collect<F: FnMut(&Expression)>(&self, visit: &mut F) {
        visit(self);
        match self {
            Self::Unary(_, expr) => expr.collect(visit),
            Self::Binary(_, left, right) => {
                left.collect(visit);
                right.collect(visit);
            }
            Self::Function(_, args) => {
                for arg in args {
                    arg.collect(visit);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Reference(i) => write!(f, "p[{}]", i),
            Self::Slot(i) => write!(f, "x[{}]", i),
            Self::Symbol(name) => write!(f, "{}", name),
            Self::Unary(UnaryOp::Neg, expr) => write!(f, "-({})", expr),
            Self::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Self::Function(name, args) => {
                write!(f, "{}(", name)?;
                for (k, arg) in args.iter().enumerate() {
                    if k > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// `p12` -> `Some(12)`
fn shorthand_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('p')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Argument counts accepted by a built-in function, `None` when unknown.
fn arity(name: &str) -> Option<RangeInclusive<usize>> {
    match name {
        "sin" | "cos" | "tan" | "sinh" | "cosh" | "tanh" | "arctan" | "atan" | "exp" | "log"
        | "ln" | "log10" | "sqrt" | "abs" | "real" => Some(1..=1),
        "max" | "min" => Some(2..=usize::MAX),
        _ => None,
    }
}

/// Fail unless `name` is a built-in function taking `count` arguments.
fn check_call(name: &str, count: usize) -> ExprResult<()> {
    let accepted = arity(name).ok_or_else(|| ExpressionError::UndefinedFunction {
        name: name.to_string(),
    })?;
    if accepted.contains(&count) {
        return Ok(());
    }
    let expected = if accepted.start() == accepted.end() {
        format!("{}", accepted.start())
    } else {
        format!("at least {}", accepted.start())
    };
    Err(ExpressionError::InvalidOperation {
        message: format!("{}() requires {} argument(s), got {}", name, expected, count),
    })
}

fn call_function(name: &str, args: &[f64]) -> ExprResult<f64> {
    check_call(name, args.len())?;
    let x = args[0];
    Ok(match name {
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        "sinh" => x.sinh(),
        "cosh" => x.cosh(),
        "tanh" => x.tanh(),
        "arctan" | "atan" => x.atan(),
        "exp" => x.exp(),
        "log" | "ln" => x.ln(),
        "log10" => x.log10(),
        "sqrt" => x.sqrt(),
        "abs" => x.abs(),
        "real" => x,
        "max" => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "min" => args.iter().copied().fold(f64::INFINITY, f64::min),
        _ => {
            return Err(ExpressionError::UndefinedFunction {
                name: name.to_string(),
            })
        }
    })
}

// Parser functions using nom

/// Parse an identifier (parameter or function name). Greek letters are allowed.
fn identifier(input: &str) -> IResult<&str, String> {
    let mut parser = recognize(pair(
        nom::branch::alt((alpha1, tag("_"), greek1)),
        many0(nom::branch::alt((alphanumeric1, tag("_"), greek1))),
    ));

    let (input, matched) = parser.parse(input)?;
    Ok((input, matched.to_string()))
}

/// Non-ASCII alphabetic run, for names such as `λa` or `Δb`
fn greek1(input: &str) -> IResult<&str, &str> {
    let end = input
        .char_indices()
        .find(|(_, c)| c.is_ascii() || !c.is_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    if end == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Alpha,
        )));
    }
    Ok((&input[end..], &input[..end]))
}

/// Parse `p[N]`
fn indexed_reference(input: &str) -> IResult<&str, Expression> {
    let (input, _) = tag("p[").parse(input)?;
    let (input, digits) = delimited(multispace0, digit1, multispace0).parse(input)?;
    let (input, _) = char(']').parse(input)?;
    let index = digits.parse::<usize>().map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
    })?;
    Ok((input, Expression::Reference(index)))
}

/// Parse a comma-separated argument list
fn args_list(input: &str) -> IResult<&str, Vec<Expression>> {
    let (mut remainder, first) = expr_parser(input)?;
    let mut res = vec![first];

    loop {
        let mut comma = delimited(
            multispace0::<&str, nom::error::Error<&str>>,
            char(','),
            multispace0,
        );
        match comma.parse(remainder) {
            Ok((after_comma, _)) => {
                let (after_expr, expr) = expr_parser(after_comma)?;
                res.push(expr);
                remainder = after_expr;
            }
            Err(_) => break,
        }
    }

    Ok((remainder, res))
}

/// Parse an identifier, optionally followed by a call argument list
fn identifier_or_call(input: &str) -> IResult<&str, Expression> {
    let (input, name) = identifier(input)?;
    let (after_space, _) = multispace0.parse(input)?;

    let mut open = char::<&str, nom::error::Error<&str>>('(');
    let Ok((after_open, _)) = open.parse(after_space) else {
        return Ok((input, Expression::Symbol(name)));
    };

    let (after_open, _) = multispace0.parse(after_open)?;
    let mut close = char::<&str, nom::error::Error<&str>>(')');
    if let Ok((rest, _)) = close.parse(after_open) {
        return Ok((rest, Expression::Function(name, vec![])));
    }

    let (input, args) = args_list(after_open)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, _) = char(')').parse(input)?;
    Ok((input, Expression::Function(name, args)))
}

/// Parse a parenthesized expression
fn parens(input: &str) -> IResult<&str, Expression> {
    let (input, _) = char('(').parse(input)?;
    let (input, expr) = expr_parser(input)?;
    let (input, _) = multispace0.parse(input)?;
    let (input, _) = char::<_, nom::error::Error<_>>(')').parse(input)?;
    Ok((input, expr))
}

/// Parse a primary expression (number, reference, identifier, call, or parentheses)
fn primary(input: &str) -> IResult<&str, Expression> {
    let (input, _) = multispace0.parse(input)?;

    match input.chars().next() {
        Some(c) if c.is_ascii_digit() || c == '.' => {
            let (input, num) = double(input)?;
            Ok((input, Expression::Number(num)))
        }
        Some('(') => parens(input),
        _ => {
            if let Ok(result) = indexed_reference(input) {
                return Ok(result);
            }
            identifier_or_call(input)
        }
    }
}

/// Parse a power expression; `^` and `**` are right-associative
fn power(input: &str) -> IResult<&str, Expression> {
    let (input, base) = primary(input)?;
    let (after_space, _) = multispace0.parse(input)?;

    let op_result = nom::branch::alt((tag::<&str, &str, nom::error::Error<&str>>("**"), tag("^")))
        .parse(after_space);
    match op_result {
        Ok((after_op, _)) => {
            let (rest, exponent) = unary(after_op)?;
            Ok((
                rest,
                Expression::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)),
            ))
        }
        Err(_) => Ok((input, base)),
    }
}

/// Parse a unary expression (-expr)
fn unary(input: &str) -> IResult<&str, Expression> {
    let (input, _) = multispace0.parse(input)?;

    if let Ok((rest, _)) = char::<_, nom::error::Error<_>>('-').parse(input) {
        let (rest, expr) = unary(rest)?;
        return Ok((rest, Expression::Unary(UnaryOp::Neg, Box::new(expr))));
    }
    if let Ok((rest, _)) = char::<_, nom::error::Error<_>>('+').parse(input) {
        return unary(rest);
    }
    power(input)
}

/// Parse a left-associative chain `operand (op operand)*`
fn left_chain<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expression>,
    ops: &[(char, BinaryOp)],
) -> IResult<&'a str, Expression> {
    let (mut input, mut acc) = operand(input)?;

    'chain: loop {
        let (after_space, _) = multispace0.parse(input)?;
        for &(symbol, op) in ops {
            // '*' followed by '*' is a power operator, handled in `power`
            if symbol == '*' && after_space.starts_with("**") {
                continue;
            }
            if let Ok((after_op, _)) = char::<_, nom::error::Error<_>>(symbol).parse(after_space) {
                let (rest, rhs) = operand(after_op)?;
                acc = Expression::Binary(op, Box::new(acc), Box::new(rhs));
                input = rest;
                continue 'chain;
            }
        }
        return Ok((input, acc));
    }
}

/// Parse a multiplicative expression (expr * expr, expr / expr)
fn term(input: &str) -> IResult<&str, Expression> {
    left_chain(input, unary, &[('*', BinaryOp::Mul), ('/', BinaryOp::Div)])
}

/// Parse an additive expression (expr + expr, expr - expr)
fn expr_parser(input: &str) -> IResult<&str, Expression> {
    left_chain(input, term, &[('+', BinaryOp::Add), ('-', BinaryOp::Sub)])
}

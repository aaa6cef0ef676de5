//! Free-form conversion expressions.
//!
//! Grammar (whitespace-insensitive):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | power
//! power   := primary ('^' unary)?
//! primary := number | ident '(' args ')' | ident | '(' expr ')'
//! ```
//!
//! Functions: `sqrt abs floor ceil round min max pow`. Variables are supplied
//! by the caller (`d`, plus `level` for life).

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, multispace0, one_of},
    combinator::{all_consuming, map, map_res, opt, recognize},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Cannot parse expression near '{0}'")]
    Parse(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function {name} expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable(String),
    Neg(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
}

/// A parsed expression, ready to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        match all_consuming(delimited(multispace0, expr, multispace0))(input) {
            Ok((_, root)) => Ok(Self { root }),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(ExpressionError::Parse(e.input.chars().take(20).collect()))
            }
            Err(nom::Err::Incomplete(_)) => Err(ExpressionError::Parse(input.to_string())),
        }
    }

    /// Evaluate with the given variable bindings.
    pub fn eval(&self, vars: &[(&str, f64)]) -> Result<f64, ExpressionError> {
        eval_node(&self.root, vars)
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(input: &str, vars: &[(&str, f64)]) -> Result<f64, ExpressionError> {
    Expression::parse(input)?.eval(vars)
}

fn eval_node(node: &Node, vars: &[(&str, f64)]) -> Result<f64, ExpressionError> {
    match node {
        Node::Number(n) => Ok(*n),
        Node::Variable(name) => vars
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| ExpressionError::UnknownVariable(name.clone())),
        Node::Neg(inner) => Ok(-eval_node(inner, vars)?),
        Node::Binary(op, lhs, rhs) => {
            let a = eval_node(lhs, vars)?;
            let b = eval_node(rhs, vars)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Pow => a.powf(b),
            })
        }
        Node::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| eval_node(a, vars))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values)
        }
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, ExpressionError> {
    let unary = |f: fn(f64) -> f64| match args {
        [x] => Ok(f(*x)),
        _ => Err(ExpressionError::Arity {
            name: name.to_string(),
            expected: "1",
            got: args.len(),
        }),
    };

    match name {
        "sqrt" => unary(f64::sqrt),
        "abs" => unary(f64::abs),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "pow" => match args {
            [x, y] => Ok(x.powf(*y)),
            _ => Err(ExpressionError::Arity {
                name: name.to_string(),
                expected: "2",
                got: args.len(),
            }),
        },
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExpressionError::Arity {
                    name: name.to_string(),
                    expected: "at least 1",
                    got: 0,
                });
            }
            let pick = if name == "min" { f64::min } else { f64::max };
            Ok(args[1..].iter().fold(args[0], |acc, v| pick(acc, *v)))
        }
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

// =============================================================================
// Parsers
// =============================================================================

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn number(input: &str) -> IResult<&str, Node> {
    map_res(
        recognize(alt((
            recognize(tuple((digit1, opt(pair(char('.'), digit0))))),
            recognize(pair(char('.'), digit1)),
        ))),
        |s: &str| s.parse::<f64>().map(Node::Number),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn call_or_variable(input: &str) -> IResult<&str, Node> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expr),
        ws(char(')')),
    ))(input)?;

    let node = match args {
        Some(args) => Node::Call(name.to_string(), args),
        None => Node::Variable(name.to_string()),
    };
    Ok((input, node))
}

fn primary(input: &str) -> IResult<&str, Node> {
    ws(alt((
        number,
        call_or_variable,
        delimited(char('('), expr, char(')')),
    )))(input)
}

fn power(input: &str) -> IResult<&str, Node> {
    let (input, base) = primary(input)?;
    let (input, exponent) = opt(preceded(ws(char('^')), unary))(input)?;
    let node = match exponent {
        Some(e) => Node::Binary(BinaryOp::Pow, Box::new(base), Box::new(e)),
        None => base,
    };
    Ok((input, node))
}

fn unary(input: &str) -> IResult<&str, Node> {
    alt((
        map(preceded(ws(char('-')), unary), |n| Node::Neg(Box::new(n))),
        power,
    ))(input)
}

fn term(input: &str) -> IResult<&str, Node> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(ws(one_of("*/%")), unary))(input)?;
    Ok((input, fold(first, rest)))
}

fn expr(input: &str) -> IResult<&str, Node> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(ws(one_of("+-")), term))(input)?;
    Ok((input, fold(first, rest)))
}

fn fold(first: Node, rest: Vec<(char, Node)>) -> Node {
    rest.into_iter().fold(first, |acc, (op, rhs)| {
        let op = match op {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            '%' => BinaryOp::Rem,
            _ => BinaryOp::Pow,
        };
        Node::Binary(op, Box::new(acc), Box::new(rhs))
    })
}

//! Expression grammar, built from `nom` combinators.

use bson::Bson;
use mingo_common::{MingoError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{anychar, char, digit1, multispace0, satisfy};
use nom::combinator::{all_consuming, cut, map, not, opt, recognize, value};
use nom::error::{ErrorKind, ParseError};
use nom::multi::{fold_many0, many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::IResult;
use std::cell::Cell;

/// Deepest nesting a single expression may reach
pub const MAX_DEPTH: usize = 40;

/// How parameters are referenced in an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `status`
    Jexl,
    /// `#status`
    SpringEl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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
    Mod,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Bson),
    Variable(String),
    List(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Parse an expression in the given dialect
    pub fn parse(input: &str, dialect: Dialect) -> Result<Expr> {
        if input.trim().is_empty() {
            return Err(syntax_error("empty expression", input));
        }

        let grammar = Grammar {
            dialect,
            depth: Cell::new(0),
        };
        match grammar.complete(input) {
            Ok((_, expr)) => Ok(expr),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(syntax_error(&e.message, input)),
            Err(nom::Err::Incomplete(_)) => Err(syntax_error("incomplete expression", input)),
        }
    }
}

fn syntax_error(msg: &str, input: &str) -> MingoError {
    MingoError::ExpressionEvaluation(format!("{} in '{}'", msg, input))
}

#[derive(Debug, Clone, PartialEq)]
struct SyntaxError {
    message: String,
}

impl SyntaxError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<'a> ParseError<&'a str> for SyntaxError {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        match input.trim() {
            "" => Self::new("unexpected end of expression"),
            rest => Self::new(format!("unexpected '{}'", rest)),
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

type PResult<'a, O> = IResult<&'a str, O, SyntaxError>;

fn failure(message: impl Into<String>) -> nom::Err<SyntaxError> {
    nom::Err::Failure(SyntaxError::new(message))
}

fn found(input: &str) -> String {
    match input.trim() {
        "" => "end of expression".to_string(),
        rest => format!("'{}'", rest),
    }
}

/// Commit to `parser`: a mismatch becomes a hard failure naming what was expected
fn expected<'a, O>(
    what: &'static str,
    mut parser: impl FnMut(&'a str) -> PResult<'a, O>,
) -> impl FnMut(&'a str) -> PResult<'a, O> {
    move |input: &'a str| match parser(input) {
        Err(nom::Err::Error(_)) => Err(failure(format!("expected {}, found {}", what, found(input)))),
        other => other,
    }
}

fn token<'a, O>(parser: impl FnMut(&'a str) -> PResult<'a, O>) -> impl FnMut(&'a str) -> PResult<'a, O> {
    preceded(multispace0, parser)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_part)))(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    terminated(tag(word), not(satisfy(is_ident_part)))
}

/// Word forms of the operators; never variable names
const RESERVED: [&str; 9] = ["and", "or", "not", "eq", "ne", "lt", "le", "gt", "ge"];

fn or_op(input: &str) -> PResult<'_, BinaryOp> {
    value(BinaryOp::Or, alt((tag("||"), keyword("or"))))(input)
}

fn and_op(input: &str) -> PResult<'_, BinaryOp> {
    value(BinaryOp::And, alt((tag("&&"), keyword("and"))))(input)
}

fn equality_op(input: &str) -> PResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Eq, alt((tag("=="), keyword("eq")))),
        value(BinaryOp::Ne, alt((tag("!="), keyword("ne")))),
    ))(input)
}

fn comparison_op(input: &str) -> PResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Le, alt((tag("<="), keyword("le")))),
        value(BinaryOp::Lt, alt((tag("<"), keyword("lt")))),
        value(BinaryOp::Ge, alt((tag(">="), keyword("ge")))),
        value(BinaryOp::Gt, alt((tag(">"), keyword("gt")))),
    ))(input)
}

fn additive_op(input: &str) -> PResult<'_, BinaryOp> {
    alt((value(BinaryOp::Add, char('+')), value(BinaryOp::Sub, char('-'))))(input)
}

fn multiplicative_op(input: &str) -> PResult<'_, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Mod, char('%')),
    ))(input)
}

fn not_op(input: &str) -> PResult<'_, &str> {
    alt((terminated(tag("!"), not(char('='))), keyword("not")))(input)
}

fn number(input: &str) -> PResult<'_, Expr> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let literal = if text.contains('.') {
        text.parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| failure(format!("invalid number '{}'", text)))?
    } else {
        let value = text
            .parse::<i64>()
            .map_err(|_| failure(format!("integer out of range '{}'", text)))?;
        i32::try_from(value).map(Bson::Int32).unwrap_or(Bson::Int64(value))
    };
    Ok((rest, Expr::Literal(literal)))
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}

fn quoted<'a>(quote: char) -> impl FnMut(&'a str) -> PResult<'a, String> {
    delimited(
        char(quote),
        fold_many0(
            alt((
                preceded(char('\\'), map(anychar, unescape)),
                satisfy(move |c| c != quote && c != '\\'),
            )),
            String::new,
            |mut text, c| {
                text.push(c);
                text
            },
        ),
        expected("closing quote", char(quote)),
    )
}

fn string_literal(input: &str) -> PResult<'_, String> {
    alt((quoted('\''), quoted('"')))(input)
}

enum Suffix {
    Member(String),
    Index(Expr),
}

/// Recursive rules share the dialect and the current nesting depth
struct Grammar {
    dialect: Dialect,
    depth: Cell<usize>,
}

impl Grammar {
    fn complete<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        all_consuming(terminated(|i: &'a str| self.expr(i), multispace0))(input)
    }

    fn descend(&self) -> std::result::Result<(), nom::Err<SyntaxError>> {
        let depth = self.depth.get() + 1;
        if depth > MAX_DEPTH {
            return Err(failure(format!("expression nests deeper than {} levels", MAX_DEPTH)));
        }
        self.depth.set(depth);
        Ok(())
    }

    fn expr<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        self.binary_level(input, or_op, Self::and)
    }

    fn and<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        self.binary_level(input, and_op, Self::equality)
    }

    fn equality<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        self.binary_level(input, equality_op, Self::comparison)
    }

    fn comparison<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        self.binary_level(input, comparison_op, Self::additive)
    }

    fn additive<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        self.binary_level(input, additive_op, Self::multiplicative)
    }

    fn multiplicative<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        self.binary_level(input, multiplicative_op, Self::unary)
    }

    /// One left-associative precedence level. Every operator in the chain deepens the tree.
    fn binary_level<'a>(
        &self,
        input: &'a str,
        operator: fn(&'a str) -> PResult<'a, BinaryOp>,
        operand: fn(&Self, &'a str) -> PResult<'a, Expr>,
    ) -> PResult<'a, Expr> {
        let base = self.depth.get();
        let result = self.fold_chain(input, operator, operand);
        self.depth.set(base);
        result
    }

    fn fold_chain<'a>(
        &self,
        input: &'a str,
        operator: fn(&'a str) -> PResult<'a, BinaryOp>,
        operand: fn(&Self, &'a str) -> PResult<'a, Expr>,
    ) -> PResult<'a, Expr> {
        let (mut rest, mut left) = operand(self, input)?;
        loop {
            let (after_op, op) = match token(operator)(rest) {
                Ok(parsed) => parsed,
                Err(nom::Err::Error(_)) => return Ok((rest, left)),
                Err(e) => return Err(e),
            };
            self.descend()?;
            let (after, right) = cut(|i: &'a str| operand(self, i))(after_op)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
            rest = after;
        }
    }

    fn unary<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        let base = self.depth.get();
        self.descend()?;
        let result = alt((
            map(
                preceded(token(not_op), cut(|i: &'a str| self.unary(i))),
                |e| Expr::Unary(UnaryOp::Not, Box::new(e)),
            ),
            map(
                preceded(token(char('-')), cut(|i: &'a str| self.unary(i))),
                |e| Expr::Unary(UnaryOp::Neg, Box::new(e)),
            ),
            |i: &'a str| self.postfix(i),
        ))(input);
        self.depth.set(base);
        result
    }

    fn postfix<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        let (rest, (base, suffixes)) =
            pair(|i: &'a str| self.primary(i), many0(|i: &'a str| self.suffix(i)))(input)?;
        if self.depth.get() + suffixes.len() > MAX_DEPTH {
            return Err(failure(format!("expression nests deeper than {} levels", MAX_DEPTH)));
        }
        let expr = suffixes.into_iter().fold(base, |expr, suffix| match suffix {
            Suffix::Member(name) => Expr::Member(Box::new(expr), name),
            Suffix::Index(index) => Expr::Index(Box::new(expr), Box::new(index)),
        });
        Ok((rest, expr))
    }

    fn suffix<'a>(&self, input: &'a str) -> PResult<'a, Suffix> {
        alt((
            map(
                preceded(
                    token(char('.')),
                    expected("property name after '.'", token(identifier)),
                ),
                |name: &str| Suffix::Member(name.to_string()),
            ),
            map(
                delimited(
                    token(char('[')),
                    cut(|i: &'a str| self.expr(i)),
                    expected("']'", token(char(']'))),
                ),
                Suffix::Index,
            ),
        ))(input)
    }

    fn primary<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        token(alt((
            number,
            map(string_literal, |s| Expr::Literal(Bson::String(s))),
            |i: &'a str| self.reference(i),
            |i: &'a str| self.word(i),
            |i: &'a str| self.parenthesized(i),
            map(
                preceded(char('['), |i: &'a str| self.items(i, ']')),
                Expr::List,
            ),
        )))(input)
    }

    /// `#name`
    fn reference<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        let (rest, name) = preceded(char('#'), expected("variable name after '#'", identifier))(input)?;
        match self.dialect {
            Dialect::SpringEl => Ok((rest, Expr::Variable(name.to_string()))),
            Dialect::Jexl => Err(failure(format!("'#{}' is not a valid jexl reference", name))),
        }
    }

    /// Literal keyword, function call or bare variable
    fn word<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        let (rest, name) = identifier(input)?;
        let literal = match name {
            "null" => Some(Bson::Null),
            "true" => Some(Bson::Boolean(true)),
            "false" => Some(Bson::Boolean(false)),
            _ => None,
        };
        if let Some(literal) = literal {
            return Ok((rest, Expr::Literal(literal)));
        }
        if RESERVED.contains(&name) {
            return Err(nom::Err::Error(SyntaxError::from_error_kind(input, ErrorKind::Tag)));
        }

        let (rest, args) = opt(|i: &'a str| self.arguments(i))(rest)?;
        match (args, self.dialect) {
            (Some(args), _) => Ok((rest, Expr::Call(name.to_string(), args))),
            (None, Dialect::Jexl) => Ok((rest, Expr::Variable(name.to_string()))),
            (None, Dialect::SpringEl) => Err(failure(format!(
                "variable '{}' must be referenced as '#{}'",
                name, name
            ))),
        }
    }

    fn arguments<'a>(&self, input: &'a str) -> PResult<'a, Vec<Expr>> {
        preceded(token(char('(')), |i: &'a str| self.items(i, ')'))(input)
    }

    fn parenthesized<'a>(&self, input: &'a str) -> PResult<'a, Expr> {
        delimited(
            char('('),
            cut(|i: &'a str| self.expr(i)),
            expected("')'", token(char(')'))),
        )(input)
    }

    /// Comma-separated expressions up to and including `close`
    fn items<'a>(&self, input: &'a str, close: char) -> PResult<'a, Vec<Expr>> {
        let what = if close == ')' { "')'" } else { "']'" };
        terminated(
            separated_list0(token(char(',')), |i: &'a str| self.expr(i)),
            expected(what, token(char(close))),
        )(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.to_string()))
    }

    #[test]
    fn test_parse_comparison_precedence() {
        let expr = Expr::parse("a > 1 && b == 'x'", Dialect::Jexl).unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::And,
                Box::new(Expr::Binary(BinaryOp::Gt, var("a"), Box::new(Expr::Literal(Bson::Int32(1))))),
                Box::new(Expr::Binary(
                    BinaryOp::Eq,
                    var("b"),
                    Box::new(Expr::Literal(Bson::String("x".to_string())))
                )),
            )
        );
    }

    #[test]
    fn test_parse_word_operators() {
        let symbolic = Expr::parse("!(a == 1 || b != 2)", Dialect::Jexl).unwrap();
        let words = Expr::parse("not (a eq 1 or b ne 2)", Dialect::Jexl).unwrap();
        assert_eq!(symbolic, words);
    }

    #[test]
    fn test_parse_member_and_index() {
        let expr = Expr::parse("user.tags[0]", Dialect::Jexl).unwrap();
        assert_eq!(
            expr,
            Expr::Index(
                Box::new(Expr::Member(var("user"), "tags".to_string())),
                Box::new(Expr::Literal(Bson::Int32(0))),
            )
        );
    }

    #[test]
    fn test_parse_spring_variables() {
        assert_eq!(Expr::parse("#status", Dialect::SpringEl).unwrap(), *var("status"));
        assert!(Expr::parse("status", Dialect::SpringEl).is_err());
        assert!(Expr::parse("#status", Dialect::Jexl).is_err());
    }

    #[test]
    fn test_parse_call_and_list() {
        let expr = Expr::parse("size([1, 2.5, 'a'])", Dialect::Jexl).unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "size".to_string(),
                vec![Expr::List(vec![
                    Expr::Literal(Bson::Int32(1)),
                    Expr::Literal(Bson::Double(2.5)),
                    Expr::Literal(Bson::String("a".to_string())),
                ])]
            )
        );
    }

    #[test]
    fn test_parse_large_integer_is_int64() {
        let expr = Expr::parse("5000000000", Dialect::Jexl).unwrap();
        assert_eq!(expr, Expr::Literal(Bson::Int64(5_000_000_000)));
    }

    #[test]
    fn test_parse_errors() {
        for input in ["", "a ==", "(a", "'open", "a b", "1 @ 2", "a."] {
            let err = Expr::parse(input, Dialect::Jexl).unwrap_err();
            assert!(matches!(err, MingoError::ExpressionEvaluation(_)), "{}", input);
        }
    }

    #[test]
    fn test_nesting_is_bounded() {
        let shallow = format!("{}a{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(Expr::parse(&shallow, Dialect::Jexl).unwrap(), *var("a"));

        let deep = format!("{}a{}", "(".repeat(5000), ")".repeat(5000));
        let err = Expr::parse(&deep, Dialect::Jexl).unwrap_err();
        assert!(err.to_string().contains("deeper than"), "{}", err);

        for input in ["!".repeat(5000) + "a", "a".to_string() + &".b".repeat(5000), vec!["a"; 5000].join(" + ")] {
            let err = Expr::parse(&input, Dialect::Jexl).unwrap_err();
            assert!(matches!(err, MingoError::ExpressionEvaluation(_)));
        }
    }

    #[test]
    fn test_operator_words_are_not_variables() {
        assert!(Expr::parse("and", Dialect::Jexl).is_err());
        assert_eq!(Expr::parse("order", Dialect::Jexl).unwrap(), *var("order"));
        assert_eq!(
            Expr::parse("nothing or notes", Dialect::Jexl).unwrap(),
            Expr::Binary(BinaryOp::Or, var("nothing"), var("notes"))
        );
    }

    #[test]
    fn test_string_escapes() {
        let expr = Expr::parse(r#""say \"hi\"""#, Dialect::Jexl).unwrap();
        assert_eq!(expr, Expr::Literal(Bson::String("say \"hi\"".to_string())));
        assert_eq!(
            Expr::parse("''", Dialect::Jexl).unwrap(),
            Expr::Literal(Bson::String(String::new()))
        );
    }
}

//! Nom parser for frame expressions.
//!
//! The grammar is deliberately narrow: a `df` pipeline of column selections,
//! filters and a fixed set of methods, optionally wrapped in `len()`.
//! Anything else fails to parse.

use super::ast::{AggFunc, CmpOp, Literal, Predicate, Program, Step};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum FrameSyntaxError {
    #[error("expression is not valid frame syntax near offset {offset}")]
    Syntax { offset: usize },

    #[error("method '{0}' is not supported")]
    UnknownMethod(String),

    #[error("invalid arguments for '{method}': {message}")]
    BadArguments { method: String, message: String },

    #[error("filter nests deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Nesting cap for `~` and parentheses inside a filter.
pub const MAX_PREDICATE_DEPTH: usize = 32;

// =============================================================================
// MAIN PARSER ENTRY POINT
// =============================================================================

/// Parses a complete frame expression.
///
/// # Examples
///
/// ```
/// use querent_core::frame::parse_program;
///
/// let program = parse_program("len(df[df['age'] > 30])").unwrap();
/// assert!(program.len_of);
/// assert_eq!(program.to_string(), "len(df[(df['age'] > 30)])");
/// ```
pub fn parse_program(input: &str) -> Result<Program, FrameSyntaxError> {
    let parsed = all_consuming(delimited(multispace0, program, multispace0))(input);
    let (len_of, raw_steps) = match parsed {
        Ok((_, parsed)) => parsed,
        Err(nom::Err::Failure(err)) if err.code == ErrorKind::TooLarge => {
            return Err(FrameSyntaxError::TooDeep {
                limit: MAX_PREDICATE_DEPTH,
            });
        }
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => {
            return Err(FrameSyntaxError::Syntax {
                offset: input.len() - err.input.len(),
            });
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(FrameSyntaxError::Syntax {
                offset: input.len(),
            });
        }
    };

    let steps = raw_steps
        .into_iter()
        .map(|raw| match raw {
            RawStep::Step(step) => Ok(step),
            RawStep::Call { name, args } => build_call(&name, args),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Program { len_of, steps })
}

#[derive(Debug, Clone)]
enum RawStep {
    Step(Step),
    Call { name: String, args: Vec<Arg> },
}

#[derive(Debug, Clone)]
enum Arg {
    Positional(Literal),
    Keyword(String, Literal),
}

fn program(input: &str) -> IResult<&str, (bool, Vec<RawStep>)> {
    alt((
        map(
            delimited(pair(tag("len"), ws(char('('))), pipeline, ws(char(')'))),
            |steps| (true, steps),
        ),
        map(pipeline, |steps| (false, steps)),
    ))(input)
}

fn pipeline(input: &str) -> IResult<&str, Vec<RawStep>> {
    preceded(tag("df"), many0(preceded(multispace0, step)))(input)
}

fn step(input: &str) -> IResult<&str, RawStep> {
    alt((
        map(bracket_step, RawStep::Step),
        map(shape_rows, |_| RawStep::Step(Step::ShapeRows)),
        method_call,
    ))(input)
}

// =============================================================================
// HELPER PARSERS
// =============================================================================

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// Parses a single- or double-quoted string with backslash escapes.
fn string_literal(input: &str) -> IResult<&str, String> {
    let quote = match input.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Char))),
    };

    let body = &input[1..];
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((index, c)) = chars.next() {
        if c == quote {
            return Ok((&body[index + 1..], out));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            }
        } else {
            out.push(c);
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

fn number(input: &str) -> IResult<&str, Literal> {
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    let literal = if text.contains('.') {
        text.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Literal::Float)
    } else {
        text.parse::<i64>().map(Literal::Int).ok()
    };

    match literal {
        Some(literal) => Ok((rest, literal)),
        None => Err(nom::Err::Error(Error::new(input, ErrorKind::Digit))),
    }
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(string_literal, Literal::Str),
        number,
        value(Literal::Bool(true), tag("True")),
        value(Literal::Bool(false), tag("False")),
        value(Literal::None, tag("None")),
    ))(input)
}

fn literal_list(input: &str) -> IResult<&str, Vec<Literal>> {
    delimited(
        ws(char('[')),
        separated_list0(ws(char(',')), literal),
        ws(char(']')),
    )(input)
}

// =============================================================================
// PREDICATES
// =============================================================================

/// `df['col']`
fn column_ref(input: &str) -> IResult<&str, String> {
    preceded(
        tag("df"),
        delimited(ws(char('[')), string_literal, ws(char(']'))),
    )(input)
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    alt((
        value(CmpOp::Eq, tag("==")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
    ))(input)
}

#[derive(Clone)]
enum TestSuffix {
    Compare(CmpOp, Literal),
    IsIn(Vec<Literal>),
    Contains(String),
    IsNa,
    NotNa,
}

fn column_test(input: &str) -> IResult<&str, Predicate> {
    let (input, column) = column_ref(input)?;
    let (input, suffix) = alt((
        map(pair(ws(cmp_op), literal), |(op, lit)| {
            TestSuffix::Compare(op, lit)
        }),
        map(
            delimited(tag(".isin("), literal_list, char(')')),
            TestSuffix::IsIn,
        ),
        map(
            delimited(tag(".str.contains("), ws(string_literal), char(')')),
            TestSuffix::Contains,
        ),
        value(TestSuffix::IsNa, alt((tag(".isna()"), tag(".isnull()")))),
        value(TestSuffix::NotNa, alt((tag(".notna()"), tag(".notnull()")))),
    ))(input)?;

    let predicate = match suffix {
        TestSuffix::Compare(op, value) => Predicate::Compare { column, op, value },
        TestSuffix::IsIn(values) => Predicate::IsIn { column, values },
        TestSuffix::Contains(needle) => Predicate::Contains { column, needle },
        TestSuffix::IsNa => Predicate::IsNa(column),
        TestSuffix::NotNa => Predicate::NotNa(column),
    };
    Ok((input, predicate))
}

/// `depth` counts enclosing `~` and `(`; past the cap parsing stops with a
/// hard failure so `alt` does not backtrack into other branches.
fn unary(input: &str, depth: usize) -> IResult<&str, Predicate> {
    if depth > MAX_PREDICATE_DEPTH {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)));
    }
    if let Ok((rest, _)) = ws(char('~'))(input) {
        let (rest, inner) = unary(rest, depth + 1)?;
        return Ok((rest, Predicate::Not(Box::new(inner))));
    }
    if let Ok((rest, _)) = ws(char('('))(input) {
        let (rest, inner) = predicate(rest, depth + 1)?;
        let (rest, _) = ws(char(')'))(rest)?;
        return Ok((rest, inner));
    }
    ws(column_test)(input)
}

fn conjunction(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (mut input, mut folded) = unary(input, depth)?;
    while let Ok((rest, _)) = ws(char('&'))(input) {
        let (rest, next) = unary(rest, depth)?;
        folded = Predicate::And(Box::new(folded), Box::new(next));
        input = rest;
    }
    Ok((input, folded))
}

fn predicate(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (mut input, mut folded) = conjunction(input, depth)?;
    while let Ok((rest, _)) = ws(char('|'))(input) {
        let (rest, next) = conjunction(rest, depth)?;
        folded = Predicate::Or(Box::new(folded), Box::new(next));
        input = rest;
    }
    Ok((input, folded))
}

fn filter(input: &str) -> IResult<&str, Predicate> {
    predicate(input, 0)
}

// =============================================================================
// STEPS
// =============================================================================

fn bracket_step(input: &str) -> IResult<&str, Step> {
    delimited(
        char('['),
        alt((
            map(
                delimited(
                    ws(char('[')),
                    separated_list1(ws(char(',')), string_literal),
                    ws(char(']')),
                ),
                Step::Project,
            ),
            map(terminated(ws(string_literal), multispace0), Step::Column),
            map(filter, Step::Filter),
        )),
        char(']'),
    )(input)
}

fn shape_rows(input: &str) -> IResult<&str, ()> {
    value(
        (),
        tuple((tag(".shape"), ws(char('[')), char('0'), ws(char(']')))),
    )(input)
}

fn argument(input: &str) -> IResult<&str, Arg> {
    alt((
        map(
            pair(identifier, preceded(ws(char('=')), literal)),
            |(name, lit)| Arg::Keyword(name.to_string(), lit),
        ),
        map(literal, Arg::Positional),
    ))(input)
}

fn method_call(input: &str) -> IResult<&str, RawStep> {
    let (input, name) = preceded(char('.'), identifier)(input)?;
    let (input, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), argument),
        ws(char(')')),
    )(input)?;
    Ok((
        input,
        RawStep::Call {
            name: name.to_string(),
            args,
        },
    ))
}

// =============================================================================
// METHOD ARGUMENTS
// =============================================================================

fn bad_args(method: &str, message: impl Into<String>) -> FrameSyntaxError {
    FrameSyntaxError::BadArguments {
        method: method.to_string(),
        message: message.into(),
    }
}

/// Looks up an argument by keyword, falling back to a positional slot.
fn arg<'a>(args: &'a [Arg], keyword: &str, position: usize) -> Option<&'a Literal> {
    args.iter()
        .find_map(|a| match a {
            Arg::Keyword(name, lit) if name == keyword => Some(lit),
            _ => None,
        })
        .or_else(|| {
            args.iter()
                .filter_map(|a| match a {
                    Arg::Positional(lit) => Some(lit),
                    Arg::Keyword(..) => None,
                })
                .nth(position)
        })
}

fn check_known(method: &str, args: &[Arg], keywords: &[&str], max_positional: usize) -> Result<(), FrameSyntaxError> {
    let positional = args.iter().filter(|a| matches!(a, Arg::Positional(_))).count();
    if positional > max_positional {
        return Err(bad_args(method, "too many arguments"));
    }
    for a in args {
        if let Arg::Keyword(name, _) = a {
            if !keywords.contains(&name.as_str()) {
                return Err(bad_args(method, format!("unexpected keyword '{name}'")));
            }
        }
    }
    Ok(())
}

fn count_arg(method: &str, lit: Option<&Literal>, default: Option<usize>) -> Result<usize, FrameSyntaxError> {
    match (lit, default) {
        (Some(Literal::Int(n)), _) if *n >= 0 => Ok(*n as usize),
        (None, Some(default)) => Ok(default),
        _ => Err(bad_args(method, "expected a non-negative integer")),
    }
}

fn column_arg(method: &str, lit: Option<&Literal>) -> Result<Option<String>, FrameSyntaxError> {
    match lit {
        None => Ok(None),
        Some(Literal::Str(column)) => Ok(Some(column.clone())),
        Some(_) => Err(bad_args(method, "expected a column name")),
    }
}

fn build_call(name: &str, args: Vec<Arg>) -> Result<Step, FrameSyntaxError> {
    let aggregate = match name {
        "count" => Some(AggFunc::Count),
        "sum" => Some(AggFunc::Sum),
        "mean" => Some(AggFunc::Mean),
        "median" => Some(AggFunc::Median),
        "min" => Some(AggFunc::Min),
        "max" => Some(AggFunc::Max),
        "nunique" => Some(AggFunc::NUnique),
        _ => None,
    };
    if let Some(func) = aggregate {
        check_known(name, &args, &[], 0)?;
        return Ok(Step::Aggregate(func));
    }

    match name {
        "head" | "tail" => {
            check_known(name, &args, &["n"], 1)?;
            let n = count_arg(name, arg(&args, "n", 0), Some(5))?;
            Ok(if name == "head" { Step::Head(n) } else { Step::Tail(n) })
        }
        "sort_values" => {
            check_known(name, &args, &["by", "ascending"], 1)?;
            let by = column_arg(name, arg(&args, "by", 0))?;
            let ascending = match arg(&args, "ascending", usize::MAX) {
                None => true,
                Some(Literal::Bool(value)) => *value,
                Some(_) => return Err(bad_args(name, "ascending must be True or False")),
            };
            Ok(Step::SortValues { by, ascending })
        }
        "groupby" => {
            check_known(name, &args, &["by"], 1)?;
            column_arg(name, arg(&args, "by", 0))?
                .map(Step::GroupBy)
                .ok_or_else(|| bad_args(name, "expected a column name"))
        }
        "nlargest" | "nsmallest" => {
            check_known(name, &args, &["n", "columns"], 2)?;
            let n = count_arg(name, arg(&args, "n", 0), None)?;
            let column = column_arg(name, arg(&args, "columns", 1))?;
            Ok(if name == "nlargest" {
                Step::NLargest { n, column }
            } else {
                Step::NSmallest { n, column }
            })
        }
        "size" | "value_counts" | "unique" | "drop_duplicates" => {
            check_known(name, &args, &[], 0)?;
            Ok(match name {
                "size" => Step::Size,
                "value_counts" => Step::ValueCounts,
                "unique" => Step::Unique,
                _ => Step::DropDuplicates,
            })
        }
        other => Err(FrameSyntaxError::UnknownMethod(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_len_of_frame() {
        let program = parse_program("len(df)").unwrap();
        assert!(program.len_of);
        assert!(program.steps.is_empty());
    }

    #[test]
    fn test_parse_filter_with_boolean_ops() {
        let program =
            parse_program("df[(df['age'] >= 30) & ~df['city'].isin(['Oslo', \"Rome\"])]").unwrap();
        match &program.steps[0] {
            Step::Filter(Predicate::And(left, right)) => {
                assert!(matches!(**left, Predicate::Compare { op: CmpOp::Ge, .. }));
                assert!(matches!(**right, Predicate::Not(_)));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn test_parse_groupby_aggregate() {
        let program = parse_program("df.groupby('city')['age'].mean()").unwrap();
        assert_eq!(
            program.steps,
            vec![
                Step::GroupBy("city".into()),
                Step::Column("age".into()),
                Step::Aggregate(AggFunc::Mean),
            ]
        );
    }

    #[test]
    fn test_parse_method_arguments() {
        let program =
            parse_program("df.sort_values(by='age', ascending=False).head(3)[['name', 'age']]")
                .unwrap();
        assert_eq!(
            program.steps[0],
            Step::SortValues {
                by: Some("age".into()),
                ascending: false
            }
        );
        assert_eq!(program.steps[1], Step::Head(3));
        assert_eq!(
            program.steps[2],
            Step::Project(vec!["name".into(), "age".into()])
        );
        assert_eq!(
            program.to_string(),
            "df.sort_values(by='age', ascending=False).head(3)[['name', 'age']]"
        );
    }

    #[test]
    fn test_parse_shape_and_nlargest() {
        let program = parse_program("df.nlargest(2, 'age').shape[0]").unwrap();
        assert_eq!(
            program.steps,
            vec![
                Step::NLargest {
                    n: 2,
                    column: Some("age".into())
                },
                Step::ShapeRows,
            ]
        );
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let err = parse_program("df.to_csv('out.csv')").unwrap_err();
        assert_eq!(err, FrameSyntaxError::UnknownMethod("to_csv".into()));
    }

    #[test]
    fn test_foreign_syntax_is_rejected() {
        assert!(parse_program("__import__('os').system('ls')").is_err());
        assert!(parse_program("df; df").is_err());
        assert!(parse_program("df.head(-1)").is_err());
        assert!(parse_program("df[df['a'] > other]").is_err());
    }

    #[test]
    fn test_deep_filters_fail_without_recursing() {
        let negated = format!("df[{}df['amount'].isna()]", "~".repeat(1900));
        assert_eq!(
            parse_program(&negated).unwrap_err(),
            FrameSyntaxError::TooDeep {
                limit: MAX_PREDICATE_DEPTH
            }
        );

        let parens = format!("df[{}df['a'] > 1{}]", "(".repeat(900), ")".repeat(900));
        assert!(matches!(
            parse_program(&parens),
            Err(FrameSyntaxError::TooDeep { .. })
        ));

        let shallow = format!("df[{}df['a'].isna()]", "~".repeat(MAX_PREDICATE_DEPTH));
        assert!(parse_program(&shallow).is_ok());
    }

    #[test]
    fn test_float_literals_render_in_parseable_form() {
        for (source, rendered) in [
            ("df[df['a'] > 0.0000001]", "df[(df['a'] > 0.0000001)]"),
            ("df[df['a'] < 100000000000000000.0]", "df[(df['a'] < 100000000000000000.0)]"),
            ("df[df['a'] == -2.50]", "df[(df['a'] == -2.5)]"),
        ] {
            let program = parse_program(source).unwrap();
            assert_eq!(program.to_string(), rendered);
            assert_eq!(parse_program(rendered).unwrap(), program);
        }
    }

    #[test]
    fn test_overflowing_numbers_are_rejected() {
        let huge = format!("df[df['a'] > {}.5]", "9".repeat(400));
        assert!(parse_program(&huge).is_err());
        assert!(parse_program("df[df['a'] > 99999999999999999999]").is_err());
    }

    #[test]
    fn test_string_escapes_round_trip() {
        let program = parse_program(r#"df[df['name'] == 'O\'Brien']"#).unwrap();
        assert_eq!(program.to_string(), r#"df[(df['name'] == 'O\'Brien')]"#);
        assert_eq!(parse_program(&program.to_string()).unwrap(), program);
    }
}

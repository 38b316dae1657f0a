//! nom parsers for the small expression languages inside revision files:
//! column types (`text(50)`, `timestamptz`) and step guards
//! (`not table_exists(foo)`).

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, map_res, opt, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::{ColumnType, Guard, SchemaCheck};

/// Parse an identifier (table, column, index or constraint name).
pub fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.' || c == '$')(input)
}

/// Parse a `(n)` length suffix.
fn parse_length(input: &str) -> IResult<&str, u32> {
    delimited(
        pair(char('('), multispace0),
        map_res(digit1, str::parse::<u32>),
        pair(multispace0, char(')')),
    )(input)
}

fn parse_text_type(input: &str) -> IResult<&str, ColumnType> {
    map(
        pair(
            alt((tag_no_case("varchar"), tag_no_case("string"), tag_no_case("text"))),
            opt(preceded(multispace0, parse_length)),
        ),
        |(_, len)| ColumnType::Text(len),
    )(input)
}

/// Parse a semantic column type. Longer keywords are tried first so that
/// `integer` is not read as `int` + trailing garbage.
pub fn parse_column_type(input: &str) -> IResult<&str, ColumnType> {
    alt((
        value(ColumnType::BigInteger, tag_no_case("bigint")),
        value(ColumnType::Integer, tag_no_case("integer")),
        value(ColumnType::Integer, tag_no_case("int")),
        value(ColumnType::Float, tag_no_case("float")),
        value(ColumnType::Float, tag_no_case("double")),
        value(
            ColumnType::Timestamp { with_time_zone: true },
            tag_no_case("timestamptz"),
        ),
        value(
            ColumnType::Timestamp { with_time_zone: false },
            tag_no_case("timestamp"),
        ),
        value(ColumnType::Uuid, tag_no_case("uuid")),
        value(ColumnType::Boolean, tag_no_case("boolean")),
        value(ColumnType::Boolean, tag_no_case("bool")),
        value(ColumnType::Jsonb, tag_no_case("jsonb")),
        parse_text_type,
    ))(input)
}

fn parse_arguments(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        pair(char('('), multispace0),
        separated_list1(tuple((multispace0, char(','), multispace0)), parse_identifier),
        pair(multispace0, char(')')),
    )(input)
}

fn parse_guard_parts(input: &str) -> IResult<&str, (bool, &str, Vec<&str>)> {
    tuple((
        map(opt(terminated(tag_no_case("not"), multispace1)), |n| n.is_some()),
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        preceded(multispace0, parse_arguments),
    ))(input)
}

/// Parse a full column type string.
pub fn column_type(input: &str) -> Result<ColumnType, String> {
    all_consuming(delimited(multispace0, parse_column_type, multispace0))(input)
        .map(|(_, ty)| ty)
        .map_err(|_| format!("unknown column type '{}'", input.trim()))
}

/// Parse a full guard expression.
pub fn guard(input: &str) -> Result<Guard, String> {
    let (_, (negated, predicate, args)) =
        all_consuming(delimited(multispace0, parse_guard_parts, multispace0))(input)
            .map_err(|_| format!("invalid guard expression '{}'", input.trim()))?;

    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!(
                "{} takes {} argument(s), got {}",
                predicate,
                n,
                args.len()
            ))
        }
    };

    let check = match predicate {
        "table_exists" => {
            arity(1)?;
            SchemaCheck::TableExists(args[0].to_string())
        }
        "column_exists" => {
            arity(2)?;
            SchemaCheck::ColumnExists {
                table: args[0].to_string(),
                column: args[1].to_string(),
            }
        }
        "index_exists" => {
            arity(1)?;
            SchemaCheck::IndexExists(args[0].to_string())
        }
        "constraint_exists" => {
            arity(2)?;
            SchemaCheck::ConstraintExists {
                table: args[0].to_string(),
                name: args[1].to_string(),
            }
        }
        other => return Err(format!("unknown guard predicate '{}'", other)),
    };

    Ok(Guard { negated, check })
}

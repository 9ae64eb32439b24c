//! LINQ-style query text front end.
//!
//! ```text
//! Order.Where(o => o.Customer.Name == "Alice").Include(o => o.Customer)
//! ```
//!
//! Entity types are sources, lambdas use `=>`, and sequence operators are
//! method calls. The parser only builds syntax; `expression::ast_conversion`
//! types it against a model.

use nom::character::complete::multispace0;
use nom::combinator::opt;
use nom::{bytes::complete::tag, IResult, Parser};

pub mod ast;
mod common;
pub(crate) mod errors;
mod expression;

use ast::Expression;
use common::ws;
pub use errors::QueryParseError;

/// Parse a complete query, rejecting trailing input.
pub fn parse_query(input: &'_ str) -> Result<Expression<'_>, QueryParseError<'_>> {
    match parse_query_with_nom(input) {
        Ok(("", query)) => Ok(query),
        Ok((rest, _)) => Err(QueryParseError {
            errors: vec![(rest, "Unexpected trailing input")],
        }),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e.into()),
        Err(nom::Err::Incomplete(_)) => Err(QueryParseError {
            errors: vec![(input, "Incomplete query")],
        }),
    }
}

fn parse_query_with_nom(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, _) = multispace0.parse(input)?;
    let (input, query) = expression::parse_expression(input)?;
    // Optional trailing semicolon
    let (input, _) = opt(ws(tag(";"))).parse(input)?;
    Ok((input, query))
}

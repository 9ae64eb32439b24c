use nom::error::{ContextError, ParseError};
use std::fmt;

#[derive(Debug, PartialEq)]
pub struct QueryParseError<'a> {
    pub errors: Vec<(&'a str, &'static str)>,
}

impl<'a> ParseError<&'a str> for QueryParseError<'a> {
    fn from_error_kind(input: &'a str, _kind: nom::error::ErrorKind) -> Self {
        QueryParseError {
            errors: vec![(input, "unknown error")],
        }
    }

    fn append(input: &'a str, _kind: nom::error::ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, "unknown error (appended)"));
        other
    }
}

impl<'a> ContextError<&'a str> for QueryParseError<'a> {
    fn add_context(input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ctx));
        other
    }
}

impl fmt::Display for QueryParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (input, ctx) in &self.errors {
            if input.is_empty() {
                writeln!(f, "{}: <end of input>", ctx)?;
            } else {
                writeln!(f, "{}: {}", ctx, input)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for QueryParseError<'_> {}

impl<'a> From<nom::error::Error<&'a str>> for QueryParseError<'a> {
    fn from(err: nom::error::Error<&'a str>) -> Self {
        QueryParseError {
            errors: vec![(err.input, "Unable to parse")],
        }
    }
}

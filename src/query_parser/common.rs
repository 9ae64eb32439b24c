use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, multispace0},
    combinator::{not, peek, recognize},
    error::ParseError,
    multi::many0,
    sequence::{delimited, pair, terminated},
    IResult, Parser,
};

pub fn ws<'a, O, E: ParseError<&'a str>, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
{
    delimited(multispace0, inner, multispace0)
}

const KEYWORDS: &[&str] = &["new", "true", "false", "null"];

// letter or underscore, then letters, digits and underscores
pub fn identifier(input: &str) -> IResult<&str, &str> {
    let (rest, name) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)?;
    if KEYWORDS.contains(&name) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, name))
}

/// Keyword not followed by more identifier characters, so `nullable` is not `null`.
pub fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag(word), not(peek(alt((alphanumeric1, tag("_"))))))
}

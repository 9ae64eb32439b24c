use nom::{
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{char, digit1},
    combinator::{map, not, opt, peek, recognize},
    error::{Error, ErrorKind},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use super::ast::{
    AnonymousObject, Expression, LambdaExpression, Literal, MemberAccess, MethodCall, Operator,
    OperatorApplication,
};
use super::common::{identifier, keyword, ws};

pub fn parse_expression(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    alt((parse_lambda, parse_logical_or)).parse(input)
}

// x => body | (a, b) => body
fn parse_lambda(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, parameters) = alt((
        map(ws(identifier), |p| vec![p]),
        delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), ws(identifier)),
            ws(char(')')),
        ),
    ))
    .parse(input)?;
    let (input, _) = ws(tag("=>")).parse(input)?;
    let (input, body) = parse_expression(input)?;
    Ok((
        input,
        Expression::Lambda(LambdaExpression {
            parameters,
            body: Box::new(body),
        }),
    ))
}

fn binary<'a>(operator: Operator, lhs: Expression<'a>, rhs: Expression<'a>) -> Expression<'a> {
    Expression::OperatorApplicationExp(OperatorApplication {
        operator,
        operands: vec![lhs, rhs],
    })
}

fn parse_logical_or(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, lhs) = parse_logical_and(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        let res = preceded(ws(tag("||")), parse_logical_and).parse(remaining_input);
        match res {
            Ok((new_input, rhs)) => {
                final_expression = binary(Operator::Or, final_expression, rhs);
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn parse_logical_and(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, lhs) = parse_comparison_expression(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        let res = preceded(ws(tag("&&")), parse_comparison_expression).parse(remaining_input);
        match res {
            Ok((new_input, rhs)) => {
                final_expression = binary(Operator::And, final_expression, rhs);
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

// Comparisons do not chain: `a == b == c` is rejected by the caller.
fn parse_comparison_expression(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, lhs) = parse_additive_expression(input)?;

    let op_result = ws(alt((
        map(tag(">="), |_| Operator::GreaterThanEqual),
        map(tag("<="), |_| Operator::LessThanEqual),
        map(tag("=="), |_| Operator::Equal),
        map(tag("!="), |_| Operator::NotEqual),
        map(terminated(tag(">"), not(peek(char('=')))), |_| Operator::GreaterThan),
        map(tag("<"), |_| Operator::LessThan),
    )))
    .parse(input);

    match op_result {
        Ok((input, op)) => {
            let (input, rhs) = parse_additive_expression(input)?;
            Ok((input, binary(op, lhs, rhs)))
        }
        Err(nom::Err::Error(_)) => Ok((input, lhs)),
        Err(e) => Err(e),
    }
}

fn parse_additive_expression(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, lhs) = parse_multiplicative_expression(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        let op_result = ws(alt((
            map(tag("+"), |_| Operator::Addition),
            map(terminated(tag("-"), not(peek(char('>')))), |_| Operator::Subtraction),
        )))
        .parse(remaining_input);

        match op_result {
            Ok((new_input, op)) => {
                let (new_input, rhs) = parse_multiplicative_expression(new_input)?;
                final_expression = binary(op, final_expression, rhs);
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn parse_multiplicative_expression(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, lhs) = parse_unary_expression(input)?;

    let mut remaining_input = input;
    let mut final_expression = lhs;

    loop {
        let res = preceded(ws(char('*')), parse_unary_expression).parse(remaining_input);
        match res {
            Ok((new_input, rhs)) => {
                final_expression = binary(Operator::Multiplication, final_expression, rhs);
                remaining_input = new_input;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((remaining_input, final_expression))
}

fn parse_unary_expression(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let not_result =
        preceded(ws(terminated(char('!'), not(peek(char('='))))), parse_unary_expression)
            .parse(input);
    match not_result {
        Ok((input, operand)) => Ok((
            input,
            Expression::OperatorApplicationExp(OperatorApplication {
                operator: Operator::Not,
                operands: vec![operand],
            }),
        )),
        Err(nom::Err::Error(_)) => parse_postfix_expression(input),
        Err(e) => Err(e),
    }
}

// primary followed by any number of `.Member` or `.Method(args)`
fn parse_postfix_expression(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, primary) = parse_primary_expression(input)?;

    let mut remaining_input = input;
    let mut final_expression = primary;

    loop {
        let res = preceded(ws(char('.')), ws(identifier)).parse(remaining_input);
        let (new_input, name) = match res {
            Ok(ok) => ok,
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        };

        let args = opt(delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), parse_expression),
            ws(char(')')),
        ))
        .parse(new_input)?;

        final_expression = match args {
            (new_input, Some(arguments)) => {
                remaining_input = new_input;
                Expression::MethodCall(MethodCall {
                    target: Box::new(final_expression),
                    method: name,
                    arguments,
                })
            }
            (new_input, None) => {
                remaining_input = new_input;
                Expression::MemberAccess(MemberAccess {
                    target: Box::new(final_expression),
                    member: name,
                })
            }
        };
    }
    Ok((remaining_input, final_expression))
}

fn parse_primary_expression(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    alt((
        map(ws(parse_literal), Expression::Literal),
        parse_anonymous_object,
        map(ws(identifier), Expression::Identifier),
        delimited(ws(char('(')), parse_expression, ws(char(')'))),
    ))
    .parse(input)
}

fn parse_literal(input: &'_ str) -> IResult<&'_ str, Literal<'_>> {
    alt((
        parse_double_quoted_string_literal,
        map(keyword("true"), |_| Literal::Boolean(true)),
        map(keyword("false"), |_| Literal::Boolean(false)),
        map(keyword("null"), |_| Literal::Null),
        parse_numeric_literal,
    ))
    .parse(input)
}

pub fn parse_double_quoted_string_literal(input: &'_ str) -> IResult<&'_ str, Literal<'_>> {
    let (input, s) = delimited(char('"'), take_until("\""), char('"')).parse(input)?;

    Ok((input, Literal::String(s)))
}

/// Matches: 123, -123, 3.14, -3.14
fn parse_numeric_literal(input: &'_ str) -> IResult<&'_ str, Literal<'_>> {
    let (rest, text) = recognize(pair(
        opt(char('-')),
        pair(digit1, opt(pair(char('.'), digit1))),
    ))
    .parse(input)?;

    if let Ok(i) = text.parse::<i64>() {
        Ok((rest, Literal::Integer(i)))
    } else if let Ok(f) = text.parse::<f64>() {
        Ok((rest, Literal::Float(f)))
    } else {
        Err(nom::Err::Error(Error::new(input, ErrorKind::Digit)))
    }
}

// new { Name = expr, o.Member }
fn parse_anonymous_object(input: &'_ str) -> IResult<&'_ str, Expression<'_>> {
    let (input, _) = ws(keyword("new")).parse(input)?;
    let (input, fields) = delimited(
        ws(char('{')),
        separated_list0(ws(char(',')), parse_anonymous_field),
        ws(char('}')),
    )
    .parse(input)?;
    Ok((input, Expression::AnonymousObject(AnonymousObject { fields })))
}

fn parse_anonymous_field(input: &'_ str) -> IResult<&'_ str, (Option<&'_ str>, Expression<'_>)> {
    let named = pair(
        terminated(ws(identifier), terminated(ws(char('=')), not(peek(char('='))))),
        parse_expression,
    )
    .parse(input);
    match named {
        Ok((input, (name, value))) => Ok((input, (Some(name), value))),
        Err(nom::Err::Error(_)) => {
            let (input, value) = parse_expression(input)?;
            Ok((input, (None, value)))
        }
        Err(e) => Err(e),
    }
}

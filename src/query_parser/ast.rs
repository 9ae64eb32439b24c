/// Untyped syntax tree for LINQ-style query text.
///
/// Names borrow from the input; typing happens later against the model.

#[derive(Debug, PartialEq, Clone)]
pub enum Literal<'a> {
    Integer(i64),
    Float(f64),
    String(&'a str),
    Boolean(bool),
    Null,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    And,
    Or,
    Not,
    Addition,
    Subtraction,
    Multiplication,
}

#[derive(Debug, PartialEq, Clone)]
pub struct OperatorApplication<'a> {
    pub operator: Operator,
    pub operands: Vec<Expression<'a>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct MemberAccess<'a> {
    pub target: Box<Expression<'a>>,
    pub member: &'a str,
}

/// `target.Method(args)`
#[derive(Debug, PartialEq, Clone)]
pub struct MethodCall<'a> {
    pub target: Box<Expression<'a>>,
    pub method: &'a str,
    pub arguments: Vec<Expression<'a>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct LambdaExpression<'a> {
    pub parameters: Vec<&'a str>,
    pub body: Box<Expression<'a>>,
}

/// `new { Name = expr, other.Member }`; unnamed fields carry `None`.
#[derive(Debug, PartialEq, Clone)]
pub struct AnonymousObject<'a> {
    pub fields: Vec<(Option<&'a str>, Expression<'a>)>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression<'a> {
    Literal(Literal<'a>),
    Identifier(&'a str),
    MemberAccess(MemberAccess<'a>),
    MethodCall(MethodCall<'a>),
    OperatorApplicationExp(OperatorApplication<'a>),
    Lambda(LambdaExpression<'a>),
    AnonymousObject(AnonymousObject<'a>),
}

//! Typed conversion from the parsed query AST.
//!
//! Identifiers resolve to the innermost lambda parameter of that name, or to an
//! entity source when the model declares an entity type with that name. Member
//! types come from the model; operator result types follow the registry's
//! generic shapes.

use super::errors::QueryConversionError;
use super::operators::{lookup_operator, OperatorDescriptor};
use super::{
    BinaryOperator, Expr, ExprType, Literal, LiteralValue, Parameter, QueryOperator, RecordExpr,
};
use crate::model::{Model, ResolvedMember, ScalarKind};
use crate::query_parser::ast::{self, Expression};

pub struct QueryConverter<'m> {
    model: &'m Model,
    scopes: Vec<Vec<Parameter>>,
}

/// Convert a parsed query into a typed expression tree.
pub fn convert_query(model: &Model, query: &Expression<'_>) -> Result<Expr, QueryConversionError> {
    QueryConverter::new(model).convert(query)
}

impl<'m> QueryConverter<'m> {
    pub fn new(model: &'m Model) -> Self {
        QueryConverter {
            model,
            scopes: vec![],
        }
    }

    pub fn convert(&mut self, expr: &Expression<'_>) -> Result<Expr, QueryConversionError> {
        match expr {
            Expression::Literal(literal) => convert_literal(literal),
            Expression::Identifier(name) => self.convert_identifier(name),
            Expression::MemberAccess(access) => {
                let target = self.convert(&access.target)?;
                let ty = self.member_type(&target.ty(), access.member)?;
                Ok(Expr::member(target, access.member, ty))
            }
            Expression::MethodCall(call) => self.convert_call(call),
            Expression::OperatorApplicationExp(application) => self.convert_operator(application),
            Expression::Lambda(_) => Err(QueryConversionError::UnexpectedLambda),
            Expression::AnonymousObject(object) => {
                let mut fields = Vec::with_capacity(object.fields.len());
                for (name, value) in &object.fields {
                    let name = match name {
                        Some(name) => name.to_string(),
                        None => implicit_field_name(value)?,
                    };
                    fields.push((name, self.convert(value)?));
                }
                Ok(Expr::Record(RecordExpr { fields }))
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&Parameter> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|p| p.name == name)
    }

    fn convert_identifier(&self, name: &str) -> Result<Expr, QueryConversionError> {
        if let Some(parameter) = self.lookup(name) {
            return Ok(Expr::parameter(parameter));
        }
        if self.model.contains_entity(name) {
            return Ok(Expr::entity_source(name));
        }
        Err(QueryConversionError::UnknownIdentifier {
            name: name.to_string(),
        })
    }

    fn member_type(&self, target: &ExprType, member: &str) -> Result<ExprType, QueryConversionError> {
        let unknown = || QueryConversionError::UnknownMember {
            ty: target.to_string(),
            member: member.to_string(),
        };
        match target {
            ExprType::Entity(entity) => {
                // Ambiguous names are reported by the binder, not here.
                match self.model.resolve_member_unchecked(entity, member)? {
                    Some(ResolvedMember::Property(property)) => Ok(ExprType::of_property(property)),
                    Some(ResolvedMember::Navigation(navigation)) => {
                        let target = ExprType::entity(navigation.target_entity.clone());
                        Ok(match navigation.collection {
                            Some(kind) => ExprType::collection(target, kind),
                            None => target,
                        })
                    }
                    None => Err(unknown()),
                }
            }
            ExprType::Composite { .. } | ExprType::Record(_) => {
                target.field(member).cloned().ok_or_else(unknown)
            }
            ExprType::Collection { .. } if member == "Count" => Ok(ExprType::int32()),
            _ => Err(unknown()),
        }
    }

    fn convert_lambda(
        &mut self,
        argument: &Expression<'_>,
        parameter_types: Vec<ExprType>,
        operator: QueryOperator,
        position: usize,
    ) -> Result<Expr, QueryConversionError> {
        let expected = parameter_types.len();
        let lambda = match argument {
            Expression::Lambda(lambda) if lambda.parameters.len() == expected => lambda,
            _ => {
                return Err(QueryConversionError::ExpectedLambda {
                    operator: operator.to_string(),
                    position,
                    expected,
                })
            }
        };
        let parameters: Vec<Parameter> = lambda
            .parameters
            .iter()
            .zip(parameter_types)
            .map(|(name, ty)| Parameter::new(*name, ty))
            .collect();

        self.scopes.push(parameters.clone());
        let body = self.convert(&lambda.body);
        self.scopes.pop();

        Ok(Expr::lambda(parameters, body?))
    }

    fn convert_call(&mut self, call: &ast::MethodCall<'_>) -> Result<Expr, QueryConversionError> {
        let source = self.convert(&call.target)?;
        let descriptor = lookup_operator(call.method, call.arguments.len() + 1).ok_or_else(|| {
            QueryConversionError::UnknownOperator {
                name: call.method.to_string(),
                arity: call.arguments.len() + 1,
            }
        })?;
        let operator = descriptor.operator;

        let source_ty = source.ty();
        let element = source_ty
            .element()
            .cloned()
            .ok_or_else(|| QueryConversionError::NotASequence {
                operator: operator.to_string(),
                found: source_ty.to_string(),
            })?;
        if operator == QueryOperator::Exists && !source_ty.is_collection() {
            return Err(QueryConversionError::NotASequence {
                operator: operator.to_string(),
                found: source_ty.to_string(),
            });
        }

        let mut arguments = vec![source];
        for (i, argument) in call.arguments.iter().enumerate() {
            let position = i + 1;
            let converted = if descriptor.lambda_arguments.contains(&position) {
                let parameter_types = self.lambda_parameter_types(descriptor, &arguments, position)?;
                self.convert_lambda(argument, parameter_types, operator, position)?
            } else {
                self.convert(argument)?
            };
            arguments.push(converted);
        }

        let ty = result_type(operator, &element, &arguments);
        Ok(Expr::call(operator, arguments, ty))
    }

    // Parameter types for the lambda at `position`, given the arguments
    // converted so far (source first).
    fn lambda_parameter_types(
        &self,
        descriptor: &OperatorDescriptor,
        converted: &[Expr],
        position: usize,
    ) -> Result<Vec<ExprType>, QueryConversionError> {
        let element_of = |expr: &Expr| -> Result<ExprType, QueryConversionError> {
            let ty = expr.ty();
            ty.element()
                .cloned()
                .ok_or_else(|| QueryConversionError::NotASequence {
                    operator: descriptor.name.to_string(),
                    found: ty.to_string(),
                })
        };
        let outer = element_of(&converted[0])?;

        Ok(match (descriptor.operator, position) {
            (QueryOperator::Join | QueryOperator::GroupJoin, 3) => vec![element_of(&converted[1])?],
            (QueryOperator::Join, 4) => vec![outer, element_of(&converted[1])?],
            (QueryOperator::GroupJoin, 4) => {
                vec![outer, ExprType::sequence(element_of(&converted[1])?)]
            }
            (QueryOperator::SelectMany, 2) => {
                let collection = lambda_result(&converted[1]);
                let item = collection
                    .element()
                    .cloned()
                    .ok_or_else(|| QueryConversionError::NotASequence {
                        operator: descriptor.name.to_string(),
                        found: collection.to_string(),
                    })?;
                vec![outer, item]
            }
            (QueryOperator::ThenInclude, 1) => vec![included_type(&converted[0]).unwrap_or(outer)],
            _ => vec![outer],
        })
    }

    fn convert_operator(
        &mut self,
        application: &ast::OperatorApplication<'_>,
    ) -> Result<Expr, QueryConversionError> {
        if application.operator == ast::Operator::Not {
            let operand = self.convert(&application.operands[0])?;
            expect_bool("!", &operand, &operand)?;
            return Ok(Expr::Not(Box::new(operand)));
        }

        let op = binary_operator(application.operator);
        let (left, right) = match application.operands.as_slice() {
            [left, right] => (left, right),
            _ => {
                return Err(QueryConversionError::InvalidLiteral {
                    literal: format!("{:?}", application.operator),
                })
            }
        };

        // A bare null takes its type from the other operand.
        let (left, right) = match (is_null(left), is_null(right)) {
            (true, false) => {
                let right = self.convert(right)?;
                (Expr::null(right.ty().make_nullable()), right)
            }
            (false, true) => {
                let left = self.convert(left)?;
                let null = Expr::null(left.ty().make_nullable());
                (left, null)
            }
            _ => (self.convert(left)?, self.convert(right)?),
        };

        if op.is_logical() {
            expect_bool(&op.to_string(), &left, &right)?;
            return Ok(Expr::binary(op, left, right));
        }

        let (lt, rt) = (left.ty(), right.ty());
        let comparable = lt.eq_ignoring_nullability(&rt)
            || (is_numeric(&lt) && is_numeric(&rt))
            || left.is_null_literal()
            || right.is_null_literal();
        if !comparable || (!op.is_comparison() && !(is_numeric(&lt) && is_numeric(&rt))) {
            return Err(QueryConversionError::TypeMismatch {
                op: op.to_string(),
                left: lt.to_string(),
                right: rt.to_string(),
            });
        }

        let (left, right) = super::key_access::coerce_nullability(left, right);
        Ok(Expr::binary(op, left, right))
    }
}

fn convert_literal(literal: &ast::Literal<'_>) -> Result<Expr, QueryConversionError> {
    let (value, ty) = match literal {
        ast::Literal::Integer(i) => {
            let kind = if i32::try_from(*i).is_ok() {
                ScalarKind::Int32
            } else {
                ScalarKind::Int64
            };
            (LiteralValue::Int(*i), ExprType::scalar(kind))
        }
        ast::Literal::Float(f) => {
            if !f.is_finite() {
                return Err(QueryConversionError::InvalidLiteral {
                    literal: f.to_string(),
                });
            }
            (LiteralValue::Float(*f), ExprType::scalar(ScalarKind::Float64))
        }
        ast::Literal::String(s) => (
            LiteralValue::String(s.to_string()),
            ExprType::scalar(ScalarKind::String),
        ),
        ast::Literal::Boolean(b) => (LiteralValue::Bool(*b), ExprType::bool()),
        // Untyped null outside a comparison reads as a null string.
        ast::Literal::Null => (LiteralValue::Null, ExprType::scalar(ScalarKind::String)),
    };
    Ok(Expr::Literal(Literal { value, ty }))
}

fn implicit_field_name(value: &Expression<'_>) -> Result<String, QueryConversionError> {
    match value {
        Expression::MemberAccess(access) => Ok(access.member.to_string()),
        Expression::Identifier(name) => Ok(name.to_string()),
        other => Err(QueryConversionError::UnknownMember {
            ty: "anonymous object".to_string(),
            member: format!("{:?}", other),
        }),
    }
}

fn is_null(expr: &Expression<'_>) -> bool {
    matches!(expr, Expression::Literal(ast::Literal::Null))
}

fn is_numeric(ty: &ExprType) -> bool {
    matches!(ty, ExprType::Scalar { kind, .. } if kind.is_numeric())
}

fn expect_bool(op: &str, left: &Expr, right: &Expr) -> Result<(), QueryConversionError> {
    let bool_ty = ExprType::bool();
    let (lt, rt) = (left.ty(), right.ty());
    if lt.eq_ignoring_nullability(&bool_ty) && rt.eq_ignoring_nullability(&bool_ty) {
        Ok(())
    } else {
        Err(QueryConversionError::TypeMismatch {
            op: op.to_string(),
            left: lt.to_string(),
            right: rt.to_string(),
        })
    }
}

fn binary_operator(operator: ast::Operator) -> BinaryOperator {
    match operator {
        ast::Operator::Equal => BinaryOperator::Equal,
        ast::Operator::NotEqual => BinaryOperator::NotEqual,
        ast::Operator::LessThan => BinaryOperator::LessThan,
        ast::Operator::LessThanEqual => BinaryOperator::LessThanOrEqual,
        ast::Operator::GreaterThan => BinaryOperator::GreaterThan,
        ast::Operator::GreaterThanEqual => BinaryOperator::GreaterThanOrEqual,
        ast::Operator::And | ast::Operator::Not => BinaryOperator::AndAlso,
        ast::Operator::Or => BinaryOperator::OrElse,
        ast::Operator::Addition => BinaryOperator::Add,
        ast::Operator::Subtraction => BinaryOperator::Subtract,
        ast::Operator::Multiplication => BinaryOperator::Multiply,
    }
}

fn lambda_result(expr: &Expr) -> ExprType {
    match expr {
        Expr::Lambda(lambda) => lambda.body.ty(),
        other => other.ty(),
    }
}

// Navigation type selected by the preceding Include/ThenInclude, element type
// for collections.
fn included_type(source: &Expr) -> Option<ExprType> {
    match source {
        Expr::Call(call)
            if matches!(call.operator, QueryOperator::Include | QueryOperator::ThenInclude) =>
        {
            let included = lambda_result(call.arguments.get(1)?);
            Some(included.element().cloned().unwrap_or(included))
        }
        _ => None,
    }
}

fn result_type(operator: QueryOperator, element: &ExprType, arguments: &[Expr]) -> ExprType {
    match operator {
        QueryOperator::Where
        | QueryOperator::Take
        | QueryOperator::Skip
        | QueryOperator::Distinct
        | QueryOperator::DefaultIfEmpty
        | QueryOperator::Include
        | QueryOperator::ThenInclude => ExprType::sequence(element.clone()),
        QueryOperator::OrderBy
        | QueryOperator::OrderByDescending
        | QueryOperator::ThenBy
        | QueryOperator::ThenByDescending
        | QueryOperator::AsOrdered => ExprType::ordered_sequence(element.clone()),
        QueryOperator::Select => ExprType::sequence(lambda_result(&arguments[1])),
        QueryOperator::Join | QueryOperator::GroupJoin => {
            ExprType::sequence(lambda_result(&arguments[4]))
        }
        QueryOperator::SelectMany => ExprType::sequence(lambda_result(&arguments[2])),
        QueryOperator::First
        | QueryOperator::FirstOrDefault
        | QueryOperator::Single
        | QueryOperator::SingleOrDefault => element.clone(),
        QueryOperator::Any | QueryOperator::All | QueryOperator::Contains | QueryOperator::Exists => {
            ExprType::bool()
        }
        QueryOperator::Count => ExprType::int32(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_parser::parse_query;

    const MODEL: &str = r#"
entities:
  - name: Customer
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: Name, type: string }
  - name: Order
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: CustomerId, type: int32, nullable: true }
relationships:
  - dependent: Order
    principal: Customer
    foreign_key: CustomerId
    dependent_to_principal: Customer
    principal_to_dependent: Orders
"#;

    fn convert(text: &str) -> Result<Expr, QueryConversionError> {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let parsed = parse_query(text).unwrap();
        convert_query(&model, &parsed)
    }

    #[test]
    fn test_where_keeps_source_type() {
        let expr = convert(r#"Order.Where(o => o.Customer.Name == "Alice")"#).unwrap();
        assert_eq!(expr.ty(), ExprType::sequence(ExprType::entity("Order")));
        let Expr::Call(call) = &expr else {
            panic!("expected call");
        };
        assert_eq!(call.operator, QueryOperator::Where);
        assert!(matches!(call.arguments[0], Expr::EntitySource(_)));
    }

    #[test]
    fn test_null_literal_typed_from_other_side() {
        let expr = convert("Order.Where(o => o.CustomerId == null)").unwrap();
        let Expr::Call(call) = &expr else {
            panic!("expected call");
        };
        let Expr::Lambda(lambda) = &call.arguments[1] else {
            panic!("expected lambda");
        };
        let Expr::Binary(cmp) = &*lambda.body else {
            panic!("expected comparison");
        };
        assert_eq!(cmp.right.ty(), ExprType::int32().make_nullable());
    }

    #[test]
    fn test_result_types() {
        let select = convert("Customer.Select(c => c.Orders)").unwrap();
        assert_eq!(
            select.ty().element().unwrap().element(),
            Some(&ExprType::entity("Order"))
        );
        assert_eq!(
            convert("Customer.Select(c => c.Orders.Count)").unwrap().ty(),
            ExprType::sequence(ExprType::int32())
        );
        assert!(convert("Order.OrderBy(o => o.Id)").unwrap().ty().is_ordered());
        assert_eq!(convert("Order.FirstOrDefault()").unwrap().ty(), ExprType::entity("Order"));
        assert_eq!(convert("Order.Any()").unwrap().ty(), ExprType::bool());
    }

    #[test]
    fn test_join_lambda_parameters() {
        let expr = convert(
            "Order.Join(Customer, o => o.CustomerId, c => c.Id, (o, c) => new { o.Id, c.Name })",
        )
        .unwrap();
        let element = expr.ty().element().cloned().unwrap();
        assert_eq!(element.field("Name"), Some(&ExprType::scalar(ScalarKind::String)));
    }

    #[test]
    fn test_then_include_parameter_is_included_element() {
        let expr = convert("Customer.Include(c => c.Orders).ThenInclude(o => o.Customer)");
        assert!(expr.is_ok());
    }

    #[test]
    fn test_conversion_errors() {
        assert!(matches!(
            convert("Order.Where(o => o.Missing == 1)"),
            Err(QueryConversionError::UnknownMember { .. })
        ));
        assert!(matches!(
            convert("Invoice.Where(i => true)"),
            Err(QueryConversionError::UnknownIdentifier { .. })
        ));
        assert!(matches!(
            convert("Order.GroupBy(o => o.Id)"),
            Err(QueryConversionError::UnknownOperator { .. })
        ));
        assert!(matches!(
            convert(r#"Order.Where(o => o.Id == "x")"#),
            Err(QueryConversionError::TypeMismatch { .. })
        ));
    }
}

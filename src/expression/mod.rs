//! Query expression trees.
//!
//! `Expr` is a closed sum type covering both the input language (lambdas,
//! member chains, sequence operator calls over entity sources) and the nodes
//! that only exist while navigations are being expanded. A fully reduced tree
//! contains none of the expansion-only kinds.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::model::entity_model::serialize_navigation;
use crate::model::NavigationRef;
use crate::navigation_expansion::navigation_tree::{CustomRootId, NodeId, SourceId};
use crate::navigation_expansion::state::NavigationExpansion;

pub mod ast_conversion;
pub mod display;
pub mod errors;
pub mod key_access;
pub mod operators;
pub mod types;
pub mod visitors;

pub use operators::QueryOperator;
pub use types::{ExprType, INNER, OUTER};

static PARAMETER_COUNTER: AtomicU32 = AtomicU32::new(1);

fn next_parameter_id() -> u32 {
    PARAMETER_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Lambda parameter. Identity is the id; the name is only for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Parameter {
    pub id: u32,
    pub name: String,
    pub ty: ExprType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: ExprType) -> Self {
        Parameter {
            id: next_parameter_id(),
            name: name.into(),
            ty,
        }
    }

    /// Fresh parameter with the same name over a different type.
    pub fn retyped(&self, ty: ExprType) -> Self {
        Parameter::new(self.name.clone(), ty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Literal {
    pub value: LiteralValue,
    pub ty: ExprType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberAccess {
    pub target: Box<Expr>,
    pub member: String,
    pub ty: ExprType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    Add,
    Subtract,
    Multiply,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::AndAlso | BinaryOperator::OrElse)
    }

    pub fn is_equality(&self) -> bool {
        matches!(self, BinaryOperator::Equal | BinaryOperator::NotEqual)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryExpr {
    pub op: BinaryOperator,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Convert {
    pub operand: Box<Expr>,
    pub ty: ExprType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conditional {
    pub test: Box<Expr>,
    pub if_true: Box<Expr>,
    pub if_false: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lambda {
    pub parameters: Vec<Parameter>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new(parameters: Vec<Parameter>, body: Expr) -> Self {
        Lambda {
            parameters,
            body: Box::new(body),
        }
    }

    pub fn unary(parameter: Parameter, body: Expr) -> Self {
        Lambda::new(vec![parameter], body)
    }

    /// First parameter; every lambda the engine builds has at least one.
    pub fn parameter(&self) -> Option<&Parameter> {
        self.parameters.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordExpr {
    pub fields: Vec<(String, Expr)>,
}

/// Join carrier pairing the outer row with the inner match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeExpr {
    pub outer: Box<Expr>,
    pub inner: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySource {
    pub entity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorCall {
    pub operator: QueryOperator,
    pub arguments: Vec<Expr>,
    pub ty: ExprType,
}

/// Rebuilds a navigated collection in its declared collection shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializeCollection {
    pub source: Box<Expr>,
    #[serde(serialize_with = "serialize_navigation")]
    pub navigation: NavigationRef,
}

/// Post-materialization assignment of an eagerly loaded navigation; a no-op
/// when the owning entity is null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeAssign {
    pub entity: Box<Expr>,
    pub value: Box<Expr>,
    #[serde(serialize_with = "serialize_navigation")]
    pub navigation: NavigationRef,
}

/// Member chain resolved onto a navigation tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationBinding {
    pub root: Parameter,
    pub node: NodeId,
    pub source: SourceId,
    /// Entity type, or collection type for a collection navigation
    pub ty: ExprType,
}

impl NavigationBinding {
    /// Entity at this point; the element entity for collections.
    pub fn entity_type(&self) -> Option<&str> {
        match &self.ty {
            ExprType::Entity(name) => Some(name),
            other => other.element().and_then(|e| e.entity_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncludeExpr {
    pub caller: Box<Expr>,
    pub included: Box<Expr>,
    #[serde(serialize_with = "serialize_navigation")]
    pub navigation: NavigationRef,
}

/// Correlated equality with its null guard kept apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationPredicate {
    pub null_guard: Box<Expr>,
    pub equality: Box<Expr>,
}

/// Non-entity leaf of a restarted query's element shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomRoot {
    pub root: Parameter,
    pub mapping: CustomRootId,
    pub ty: ExprType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Parameter(Parameter),
    Literal(Literal),
    Member(MemberAccess),
    Binary(BinaryExpr),
    Not(Box<Expr>),
    Convert(Convert),
    Conditional(Conditional),
    Lambda(Lambda),
    Record(RecordExpr),
    Composite(CompositeExpr),
    EntitySource(EntitySource),
    Call(OperatorCall),
    MaterializeCollection(MaterializeCollection),
    IncludeAssign(IncludeAssign),

    // Expansion-only
    NavigationExpansion(Box<NavigationExpansion>),
    NavigationBinding(NavigationBinding),
    Include(IncludeExpr),
    CorrelationPredicate(CorrelationPredicate),
    CustomRoot(CustomRoot),
}

impl Expr {
    pub fn parameter(parameter: &Parameter) -> Expr {
        Expr::Parameter(parameter.clone())
    }

    pub fn null(ty: ExprType) -> Expr {
        Expr::Literal(Literal {
            value: LiteralValue::Null,
            ty,
        })
    }

    pub fn bool(value: bool) -> Expr {
        Expr::Literal(Literal {
            value: LiteralValue::Bool(value),
            ty: ExprType::bool(),
        })
    }

    pub fn member(target: Expr, member: impl Into<String>, ty: ExprType) -> Expr {
        Expr::Member(MemberAccess {
            target: Box::new(target),
            member: member.into(),
            ty,
        })
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
        Expr::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn equal(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOperator::Equal, left, right)
    }

    pub fn not_equal(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOperator::NotEqual, left, right)
    }

    pub fn and_also(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOperator::AndAlso, left, right)
    }

    pub fn or_else(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOperator::OrElse, left, right)
    }

    pub fn convert(operand: Expr, ty: ExprType) -> Expr {
        Expr::Convert(Convert {
            operand: Box::new(operand),
            ty,
        })
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Expr {
        Expr::Conditional(Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    pub fn lambda(parameters: Vec<Parameter>, body: Expr) -> Expr {
        Expr::Lambda(Lambda::new(parameters, body))
    }

    pub fn composite(outer: Expr, inner: Expr) -> Expr {
        Expr::Composite(CompositeExpr {
            outer: Box::new(outer),
            inner: Box::new(inner),
        })
    }

    pub fn entity_source(entity: impl Into<String>) -> Expr {
        Expr::EntitySource(EntitySource {
            entity: entity.into(),
        })
    }

    pub fn call(operator: QueryOperator, arguments: Vec<Expr>, ty: ExprType) -> Expr {
        Expr::Call(OperatorCall {
            operator,
            arguments,
            ty,
        })
    }

    /// Static type of the node.
    pub fn ty(&self) -> ExprType {
        match self {
            Expr::Parameter(p) => p.ty.clone(),
            Expr::Literal(l) => l.ty.clone(),
            Expr::Member(m) => m.ty.clone(),
            Expr::Binary(b) => {
                if b.op.is_comparison() || b.op.is_logical() {
                    ExprType::bool()
                } else {
                    let left = b.left.ty();
                    if b.right.ty().is_nullable() {
                        left.make_nullable()
                    } else {
                        left
                    }
                }
            }
            Expr::Not(_) => ExprType::bool(),
            Expr::Convert(c) => c.ty.clone(),
            Expr::Conditional(c) => c.if_true.ty(),
            Expr::Lambda(l) => ExprType::Lambda {
                parameters: l.parameters.iter().map(|p| p.ty.clone()).collect(),
                result: Box::new(l.body.ty()),
            },
            Expr::Record(r) => ExprType::Record(
                r.fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.ty()))
                    .collect(),
            ),
            Expr::Composite(c) => ExprType::composite(c.outer.ty(), c.inner.ty()),
            Expr::EntitySource(s) => ExprType::sequence(ExprType::entity(s.entity.clone())),
            Expr::Call(c) => c.ty.clone(),
            Expr::MaterializeCollection(m) => {
                let source = m.source.ty();
                let element = source.element().cloned().unwrap_or(source);
                ExprType::collection(
                    element,
                    m.navigation.collection.unwrap_or(crate::model::CollectionKind::List),
                )
            }
            Expr::IncludeAssign(i) => i.entity.ty(),
            Expr::NavigationExpansion(n) => n.return_type.clone(),
            Expr::NavigationBinding(b) => b.ty.clone(),
            Expr::Include(i) => i.caller.ty(),
            Expr::CorrelationPredicate(_) => ExprType::bool(),
            Expr::CustomRoot(c) => c.ty.clone(),
        }
    }

    pub fn is_null_literal(&self) -> bool {
        match self {
            Expr::Literal(Literal {
                value: LiteralValue::Null,
                ..
            }) => true,
            Expr::Convert(c) => c.operand.is_null_literal(),
            _ => false,
        }
    }

    /// Node kind name, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Parameter(_) => "Parameter",
            Expr::Literal(_) => "Literal",
            Expr::Member(_) => "Member",
            Expr::Binary(_) => "Binary",
            Expr::Not(_) => "Not",
            Expr::Convert(_) => "Convert",
            Expr::Conditional(_) => "Conditional",
            Expr::Lambda(_) => "Lambda",
            Expr::Record(_) => "Record",
            Expr::Composite(_) => "Composite",
            Expr::EntitySource(_) => "EntitySource",
            Expr::Call(_) => "Call",
            Expr::MaterializeCollection(_) => "MaterializeCollection",
            Expr::IncludeAssign(_) => "IncludeAssign",
            Expr::NavigationExpansion(_) => "NavigationExpansion",
            Expr::NavigationBinding(_) => "NavigationBinding",
            Expr::Include(_) => "Include",
            Expr::CorrelationPredicate(_) => "CorrelationPredicate",
            Expr::CustomRoot(_) => "CustomRoot",
        }
    }

    /// Nodes that must not survive reduction.
    pub fn is_expansion_only(&self) -> bool {
        matches!(
            self,
            Expr::NavigationExpansion(_)
                | Expr::NavigationBinding(_)
                | Expr::Include(_)
                | Expr::CustomRoot(_)
        )
    }

    /// Parameter at the root of a member chain, if the chain is rooted at one.
    pub fn root_parameter(&self) -> Option<&Parameter> {
        match self {
            Expr::Parameter(p) => Some(p),
            Expr::Member(m) => m.target.root_parameter(),
            _ => None,
        }
    }

    /// Member names from the root parameter down to this node.
    pub fn member_path(&self) -> Option<Vec<String>> {
        match self {
            Expr::Parameter(_) => Some(vec![]),
            Expr::Member(m) => {
                let mut path = m.target.member_path()?;
                path.push(m.member.clone());
                Some(path)
            }
            _ => None,
        }
    }

    pub fn into_lambda(self) -> Option<Lambda> {
        match self {
            Expr::Lambda(l) => Some(l),
            _ => None,
        }
    }
}

/// Read `path` off `root`, typing each step from the composite/record shape.
pub fn build_path(root: Expr, path: &[String]) -> Option<Expr> {
    let mut current = root;
    for segment in path {
        let ty = current.ty().field(segment)?.clone();
        current = Expr::member(current, segment.clone(), ty);
    }
    Some(current)
}

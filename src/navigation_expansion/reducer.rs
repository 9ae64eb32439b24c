//! Reducer
//!
//! Lowers expansion-only nodes to plain operator calls:
//!
//! - a binding becomes the member path of its node read off the binding root
//! - a custom root becomes its recorded path
//! - an include becomes an include assignment (or just its caller)
//! - a navigation expansion lays down its pending orderings, projection,
//!   cardinality operator and collection marker, then has its shape checked
//!   against the type it stands for
//!
//! Reduction can be limited to bindings rooted at some parameters so an
//! immediately applied lambda can be lowered while references to enclosing
//! queries stay symbolic.

use super::errors::{ExpansionResult, NavigationExpansionError, Pass};
use super::include_builder::IncludeBuilder;
use super::navigation_tree::NavigationArena;
use super::state::{NavigationExpansion, PendingOrdering};
use crate::expression::visitors::{replace_parameter, try_map_children};
use crate::expression::{
    build_path, Expr, ExprType, IncludeAssign, IncludeExpr, Parameter, QueryOperator,
};
use crate::model::Model;

/// Bindings a reduction may lower.
#[derive(Debug, Clone, PartialEq)]
pub enum ReduceScope {
    All,
    Parameters(Vec<Parameter>),
}

impl ReduceScope {
    pub fn local(parameter: &Parameter) -> Self {
        ReduceScope::Parameters(vec![parameter.clone()])
    }

    pub fn allows(&self, parameter: &Parameter) -> bool {
        match self {
            ReduceScope::All => true,
            ReduceScope::Parameters(parameters) => parameters.contains(parameter),
        }
    }

    pub fn with(&self, parameter: &Parameter) -> Self {
        match self {
            ReduceScope::All => ReduceScope::All,
            ReduceScope::Parameters(parameters) => {
                let mut parameters = parameters.clone();
                if !parameters.contains(parameter) {
                    parameters.push(parameter.clone());
                }
                ReduceScope::Parameters(parameters)
            }
        }
    }
}

pub struct NavigationReducer<'a> {
    model: &'a Model,
    arena: &'a mut NavigationArena,
    emit_include_assignments: bool,
}

impl<'a> NavigationReducer<'a> {
    pub fn new(model: &'a Model, arena: &'a mut NavigationArena, emit_include_assignments: bool) -> Self {
        NavigationReducer {
            model,
            arena,
            emit_include_assignments,
        }
    }

    pub fn reduce_expr(&mut self, expr: Expr, scope: &ReduceScope) -> ExpansionResult<Expr> {
        match expr {
            Expr::NavigationBinding(binding) if scope.allows(&binding.root) => {
                let path = &self.arena.node(binding.node).to_path;
                build_path(Expr::parameter(&binding.root), path).ok_or_else(|| {
                    NavigationExpansionError::invalid(
                        Pass::Reducer,
                        format!("cannot read {:?} from {}", path, binding.root.ty),
                    )
                })
            }
            Expr::CustomRoot(custom) if scope.allows(&custom.root) => {
                let path = self.arena.custom_root(custom.mapping);
                build_path(Expr::parameter(&custom.root), path).ok_or_else(|| {
                    NavigationExpansionError::invalid(
                        Pass::Reducer,
                        format!("cannot read {:?} from {}", path, custom.root.ty),
                    )
                })
            }
            Expr::NavigationExpansion(expansion) => self.reduce_expansion(*expansion, scope),
            Expr::Include(include) => self.reduce_include(include, scope),
            other => try_map_children(other, &mut |child| self.reduce_expr(child, scope)),
        }
    }

    fn reduce_include(&mut self, include: IncludeExpr, scope: &ReduceScope) -> ExpansionResult<Expr> {
        let IncludeExpr {
            caller,
            included,
            navigation,
        } = include;
        let caller = self.reduce_expr(*caller, scope)?;
        if !self.emit_include_assignments {
            return Ok(caller);
        }
        let value = self.reduce_expr(*included, scope)?;
        Ok(Expr::IncludeAssign(IncludeAssign {
            entity: Box::new(caller),
            value: Box::new(value),
            navigation,
        }))
    }

    /// Apply `orderings` to `operand` over rows named by `parameter`.
    pub fn apply_orderings(
        &mut self,
        mut operand: Expr,
        orderings: Vec<PendingOrdering>,
        parameter: &Parameter,
        scope: &ReduceScope,
    ) -> ExpansionResult<Expr> {
        let current = Expr::parameter(parameter);
        for ordering in orderings {
            let key = ordering.key_selector.parameter().cloned();
            let body = match &key {
                Some(key) => replace_parameter(*ordering.key_selector.body, key, &current),
                None => *ordering.key_selector.body,
            };
            let body = self.reduce_expr(body, scope)?;
            operand = Expr::call(
                ordering.operator,
                vec![operand, Expr::lambda(vec![parameter.clone()], body)],
                ExprType::ordered_sequence(parameter.ty.clone()),
            );
        }
        Ok(operand)
    }

    pub fn reduce_expansion(
        &mut self,
        expansion: NavigationExpansion,
        scope: &ReduceScope,
    ) -> ExpansionResult<Expr> {
        let scope = scope.with(&expansion.state.current_parameter);

        // Scalar results never materialize entities, so includes are moot.
        let scalar_result = matches!(
            expansion.state.cardinality_operator(),
            Some(QueryOperator::Any | QueryOperator::All | QueryOperator::Count | QueryOperator::Contains)
        );
        let expansion = if scalar_result {
            expansion
        } else {
            IncludeBuilder::new(self.model, self.arena).apply(expansion)?
        };

        let NavigationExpansion {
            operand,
            state,
            return_type,
        } = expansion;
        let mut result = self.reduce_expr(operand, &scope)?;
        if !state.has_pending_work() {
            return coerce_shape(result, &return_type);
        }

        let parameter = state.current_parameter;
        result = self.apply_orderings(result, state.pending_orderings, &parameter, &scope)?;

        if state.apply_pending_selector {
            let selector = state.pending_selector;
            let selector_parameter = selector.parameter().cloned().unwrap_or_else(|| parameter.clone());
            let body = self.reduce_expr(*selector.body, &scope)?;
            let ty = ExprType::sequence(body.ty());
            result = Expr::call(
                QueryOperator::Select,
                vec![result, Expr::lambda(vec![selector_parameter], body)],
                ty,
            );
        }

        if let Some(cardinality) = state.pending_cardinality {
            let element = result.ty().element().cloned().ok_or_else(|| {
                NavigationExpansionError::invalid(
                    Pass::Reducer,
                    format!("{} applied to a non-sequence", cardinality.operator),
                )
            })?;
            let mut arguments = vec![result];
            if let Some(argument) = cardinality.argument {
                arguments.push(self.reduce_expr(argument, &scope)?);
            }
            let ty = match cardinality.operator {
                QueryOperator::Count => ExprType::int32(),
                operator if operator.returns_element() => element,
                _ => ExprType::bool(),
            };
            result = Expr::call(cardinality.operator, arguments, ty);
        }

        if let Some(navigation) = state.materialize_collection {
            result = Expr::MaterializeCollection(crate::expression::MaterializeCollection {
                source: Box::new(result),
                navigation,
            });
        }

        log::trace!("Reduced query to {}", result);
        coerce_shape(result, &return_type)
    }
}

/// Reconcile the reduced tree with the type the query stood for.
fn coerce_shape(result: Expr, expected: &ExprType) -> ExpansionResult<Expr> {
    let actual = result.ty();
    if actual == *expected {
        return Ok(result);
    }
    match (expected, &actual) {
        (
            ExprType::Sequence {
                element: expected_element,
                ordered: true,
            },
            ExprType::Sequence {
                element: actual_element,
                ordered: false,
            },
        ) if expected_element == actual_element => Ok(Expr::call(
            QueryOperator::AsOrdered,
            vec![result],
            expected.clone(),
        )),
        (
            ExprType::Sequence {
                element: expected_element,
                ordered: false,
            },
            ExprType::Sequence {
                element: actual_element,
                ordered: true,
            },
        ) if expected_element == actual_element => Ok(result),
        _ if expected.eq_ignoring_nullability(&actual) => Ok(Expr::convert(result, expected.clone())),
        _ => Err(NavigationExpansionError::ShapeMismatch {
            pass: Pass::Reducer,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
    }
}

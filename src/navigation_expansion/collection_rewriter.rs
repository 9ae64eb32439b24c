//! Collection navigations are never joined. A bound collection navigation is
//! replaced by a correlated subquery over the target entity, filtered to the
//! rows whose foreign key matches the owner's principal key and wrapped in a
//! `MaterializeCollection` marker. The marker is dropped again wherever the
//! collection feeds a sequence operator.

use super::binding::node_entity;
use super::errors::{ExpansionResult, NavigationExpansionError, Pass};
use super::navigation_tree::NavigationArena;
use super::parameter_name;
use crate::expression::key_access::{coerce_nullability, create_key_access};
use crate::expression::visitors::try_map_children;
use crate::expression::{
    CorrelationPredicate, Expr, ExprType, MaterializeCollection, MemberAccess, NavigationBinding,
    OperatorCall, Parameter, QueryOperator,
};
use crate::model::Model;

pub struct CollectionNavigationRewriter<'a> {
    model: &'a Model,
    arena: &'a mut NavigationArena,
}

impl<'a> CollectionNavigationRewriter<'a> {
    pub fn new(model: &'a Model, arena: &'a mut NavigationArena) -> Self {
        CollectionNavigationRewriter { model, arena }
    }

    pub fn rewrite(&mut self, expr: Expr) -> ExpansionResult<Expr> {
        match expr {
            Expr::NavigationBinding(binding) => self.rewrite_binding(binding),
            Expr::NavigationExpansion(_) => Ok(expr),
            Expr::Call(call) => self.rewrite_call(call),
            Expr::Member(member) => self.rewrite_member(member),
            other => try_map_children(other, &mut |child| self.rewrite(child)),
        }
    }

    fn rewrite_binding(&mut self, binding: NavigationBinding) -> ExpansionResult<Expr> {
        let node = self.arena.node(binding.node);
        let (Some(navigation), Some(parent)) = (node.navigation.clone(), node.parent) else {
            return Ok(Expr::NavigationBinding(binding));
        };
        if !navigation.is_collection() {
            return Ok(Expr::NavigationBinding(binding));
        }

        let parent_optional = self.arena.node(parent).optional;
        let owner_entity = node_entity(self.arena, parent, binding.source);
        self.arena.detach(binding.node);

        let to_model_error = |e| NavigationExpansionError::from_model(Pass::CollectionRewrite, e);
        let foreign_key = &navigation.foreign_key;
        let principal_key = self
            .model
            .properties(&owner_entity, &foreign_key.principal_key)
            .map_err(to_model_error)?;
        let dependent_key = self
            .model
            .properties(&navigation.target_entity, &foreign_key.properties)
            .map_err(to_model_error)?;

        let owner = Expr::NavigationBinding(NavigationBinding {
            root: binding.root,
            node: parent,
            source: binding.source,
            ty: ExprType::entity(owner_entity),
        });
        let target = ExprType::entity(navigation.target_entity.clone());
        let element = Parameter::new(parameter_name(&target), target.clone());

        let outer_key = create_key_access(&owner, &principal_key, parent_optional);
        let inner_key = create_key_access(&Expr::parameter(&element), &dependent_key, false);
        let (outer_key, inner_key) = coerce_nullability(outer_key, inner_key);

        let predicate = Expr::CorrelationPredicate(CorrelationPredicate {
            null_guard: Box::new(Expr::not_equal(owner.clone(), Expr::null(owner.ty()))),
            equality: Box::new(Expr::equal(outer_key, inner_key)),
        });
        let correlated = Expr::call(
            QueryOperator::Where,
            vec![
                Expr::entity_source(navigation.target_entity.clone()),
                Expr::lambda(vec![element], predicate),
            ],
            ExprType::sequence(target),
        );

        log::debug!("Rewrote {} as a correlated subquery", navigation.qualified_name());
        Ok(Expr::MaterializeCollection(MaterializeCollection {
            source: Box::new(correlated),
            navigation,
        }))
    }

    fn rewrite_call(&mut self, call: OperatorCall) -> ExpansionResult<Expr> {
        let OperatorCall {
            operator,
            arguments,
            ty,
        } = call;

        match operator {
            QueryOperator::Include | QueryOperator::ThenInclude => {
                Ok(Expr::call(operator, arguments, ty))
            }
            QueryOperator::Exists => {
                let [caller, predicate] = two_arguments(operator, arguments)?;
                let caller = without_materialize(self.rewrite(caller)?);
                let predicate = self.rewrite(predicate)?;
                Ok(Expr::call(QueryOperator::Any, vec![caller, predicate], ExprType::bool()))
            }
            QueryOperator::Contains if arguments.first().map(is_collection_binding).unwrap_or(false) => {
                let [caller, item] = two_arguments(operator, arguments)?;
                let caller = without_materialize(self.rewrite(caller)?);
                let item = self.rewrite(item)?;
                let element = caller.ty().element().cloned().ok_or_else(|| {
                    NavigationExpansionError::invalid(Pass::CollectionRewrite, "Contains over a non-sequence")
                })?;
                let candidate = Parameter::new(parameter_name(&element), element);
                let predicate = Expr::lambda(
                    vec![candidate.clone()],
                    Expr::equal(Expr::parameter(&candidate), item),
                );
                Ok(Expr::call(QueryOperator::Any, vec![caller, predicate], ExprType::bool()))
            }
            _ => {
                let arguments = arguments
                    .into_iter()
                    .map(|argument| Ok(without_materialize(self.rewrite(argument)?)))
                    .collect::<ExpansionResult<Vec<_>>>()?;
                Ok(Expr::call(operator, arguments, ty))
            }
        }
    }

    fn rewrite_member(&mut self, member: MemberAccess) -> ExpansionResult<Expr> {
        let MemberAccess { target, member, ty } = member;
        match self.rewrite(*target)? {
            Expr::MaterializeCollection(materialize) if member == "Count" => Ok(Expr::call(
                QueryOperator::Count,
                vec![*materialize.source],
                ExprType::int32(),
            )),
            target => Ok(Expr::member(target, member, ty)),
        }
    }
}

fn is_collection_binding(expr: &Expr) -> bool {
    matches!(expr, Expr::NavigationBinding(binding) if binding.ty.is_collection())
}

/// Drop a `MaterializeCollection` marker.
pub(crate) fn without_materialize(expr: Expr) -> Expr {
    match expr {
        Expr::MaterializeCollection(materialize) => *materialize.source,
        other => other,
    }
}

fn two_arguments(operator: QueryOperator, arguments: Vec<Expr>) -> ExpansionResult<[Expr; 2]> {
    let count = arguments.len();
    <[Expr; 2]>::try_from(arguments).map_err(|_| {
        NavigationExpansionError::invalid(
            Pass::CollectionRewrite,
            format!("{} takes 2 arguments, got {}", operator, count),
        )
    })
}

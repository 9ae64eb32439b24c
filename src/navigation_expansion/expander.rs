//! Expander
//!
//! Walks a query bottom-up. Every entity source becomes a
//! [`NavigationExpansion`] wrapper, and every operator applied to a wrapper is
//! folded into the wrapper's deferred state instead of being emitted right
//! away. Lambdas are bound against the navigation tree, collection navigations
//! are rewritten into correlated subqueries, and pending reference navigations
//! are joined into the operand. Operators that fix the shape of the query
//! (joins, flattening, `Distinct`) reduce the wrapper and restart expansion
//! over their result.

use std::mem;

use super::binding::NavigationBinder;
use super::collection_rewriter::{without_materialize, CollectionNavigationRewriter};
use super::errors::{ExpansionResult, NavigationExpansionError, Pass};
use super::join_synthesizer::JoinSynthesizer;
use super::navigation_tree::{CustomRootId, ExpansionMode, NavigationArena, SourceId};
use super::parameter_name;
use super::reducer::{NavigationReducer, ReduceScope};
use super::state::{ExpansionState, NavigationExpansion, PendingCardinality, PendingOrdering};
use crate::config::ExpansionConfig;
use crate::expression::key_access::{coerce_nullability, create_key_access, null_key};
use crate::expression::visitors::{find_unreduced, replace_parameter, try_map_children};
use crate::expression::{
    BinaryExpr, CustomRoot, Expr, ExprType, Lambda, MaterializeCollection, MemberAccess,
    NavigationBinding, OperatorCall, Parameter, QueryOperator, RecordExpr, INNER, OUTER,
};
use crate::model::{CollectionKind, Model};

pub struct NavigationExpander<'m> {
    model: &'m Model,
    config: ExpansionConfig,
    arena: NavigationArena,
    subquery_depth: usize,
}

impl<'m> NavigationExpander<'m> {
    pub fn new(model: &'m Model, config: ExpansionConfig) -> Self {
        NavigationExpander {
            model,
            config,
            arena: NavigationArena::new(),
            subquery_depth: 0,
        }
    }

    /// Navigation trees built so far.
    pub fn arena(&self) -> &NavigationArena {
        &self.arena
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    /// Expand `query` into a tree that may still hold expansion-only nodes.
    pub fn build(&mut self, query: &Expr) -> ExpansionResult<Expr> {
        log::debug!("Expanding navigations in {}", query);
        self.expand(query.clone())
    }

    /// Lower every expansion-only node of a built tree.
    pub fn reduce(&mut self, expr: Expr) -> ExpansionResult<Expr> {
        let reduced = self.reducer().reduce_expr(expr, &ReduceScope::All)?;
        if self.config.validate_output {
            if let Some(kind) = find_unreduced(&reduced) {
                return Err(NavigationExpansionError::UnreducedNode {
                    pass: Pass::Reducer,
                    kind,
                });
            }
        }
        log::debug!("Reduced query: {}", reduced);
        Ok(reduced)
    }

    fn reducer(&mut self) -> NavigationReducer<'_> {
        NavigationReducer::new(self.model, &mut self.arena, self.config.emit_include_assignments)
    }

    fn reduce_local(&mut self, expr: Expr, parameter: &Parameter) -> ExpansionResult<Expr> {
        self.reducer().reduce_expr(expr, &ReduceScope::local(parameter))
    }

    fn expand(&mut self, expr: Expr) -> ExpansionResult<Expr> {
        match expr {
            Expr::EntitySource(source) => {
                let entity = source.entity.clone();
                Ok(self.entity_query(Expr::EntitySource(source), &entity).into_expr())
            }
            Expr::Call(call) => self.expand_call(call),
            Expr::MaterializeCollection(materialize) => self.expand_materialize(materialize),
            Expr::Member(member) => self.expand_member(member),
            Expr::Binary(binary) if binary.op.is_equality() => self.expand_equality(binary),
            Expr::NavigationExpansion(_) | Expr::NavigationBinding(_) | Expr::CustomRoot(_) => Ok(expr),
            other => try_map_children(other, &mut |child| self.expand(child)),
        }
    }

    /// Fresh wrapper over `operand`, whose rows are `entity` instances.
    fn entity_query(&mut self, operand: Expr, entity: &str) -> NavigationExpansion {
        let source = self.arena.add_source(entity);
        let root = self.arena.create_root(source, vec![], false);
        let ty = ExprType::entity(entity);
        let parameter = Parameter::new(parameter_name(&ty), ty.clone());
        let binding = Expr::NavigationBinding(NavigationBinding {
            root: parameter.clone(),
            node: root,
            source,
            ty: ty.clone(),
        });
        NavigationExpansion::new(
            operand,
            ExpansionState::new(parameter, vec![source], binding),
            ExprType::sequence(ty),
        )
    }

    fn expand_call(&mut self, call: OperatorCall) -> ExpansionResult<Expr> {
        let OperatorCall {
            operator,
            arguments,
            ty,
        } = call;
        let mut arguments = arguments.into_iter();
        let source = arguments.next().ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::Expander, format!("{} has no source", operator))
        })?;
        let rest: Vec<Expr> = arguments.collect();

        let mut expansion = match self.expand(source)? {
            Expr::NavigationExpansion(expansion) => *expansion,
            source => {
                // Sequences that are not entity queries, e.g. a group of a
                // group join, only get their arguments expanded.
                let mut expanded = vec![source];
                for argument in rest {
                    expanded.push(self.expand(argument)?);
                }
                return Ok(Expr::call(operator, expanded, ty));
            }
        };
        log::trace!("Folding {} into the pending query", operator);

        // A collection marker only survives when the collection itself is the
        // result.
        expansion.state.materialize_collection = None;

        let mut expansion = match operator {
            QueryOperator::Where => {
                let predicate = lambda_argument(operator, &rest, 0)?;
                self.process_where(expansion, predicate)?
            }
            QueryOperator::Select => {
                let selector = lambda_argument(operator, &rest, 0)?;
                self.process_select(expansion, selector)?
            }
            QueryOperator::OrderBy
            | QueryOperator::OrderByDescending
            | QueryOperator::ThenBy
            | QueryOperator::ThenByDescending => {
                let key_selector = lambda_argument(operator, &rest, 0)?;
                self.process_ordering(expansion, operator, key_selector)?
            }
            QueryOperator::Take | QueryOperator::Skip => self.process_paging(expansion, operator, rest)?,
            QueryOperator::DefaultIfEmpty => self.process_default_if_empty(expansion),
            QueryOperator::First
            | QueryOperator::FirstOrDefault
            | QueryOperator::Single
            | QueryOperator::SingleOrDefault
            | QueryOperator::Any
            | QueryOperator::All
            | QueryOperator::Count
            | QueryOperator::Contains => self.process_cardinality(expansion, operator, rest)?,
            QueryOperator::Exists => self.process_cardinality(expansion, QueryOperator::Any, rest)?,
            QueryOperator::Include => {
                let navigation = lambda_argument(operator, &rest, 0)?;
                self.process_include(expansion, navigation)?
            }
            QueryOperator::ThenInclude => {
                let navigation = lambda_argument(operator, &rest, 0)?;
                self.process_then_include(expansion, navigation)?
            }
            QueryOperator::Join => return self.process_join(expansion, rest, ty),
            QueryOperator::GroupJoin => return self.process_group_join(expansion, rest, ty),
            QueryOperator::SelectMany => return self.process_select_many(expansion, rest, ty),
            QueryOperator::Distinct | QueryOperator::AsOrdered => {
                return self.commit_and_restart(expansion, operator, rest, ty)
            }
        };
        expansion.return_type = ty;
        Ok(expansion.into_expr())
    }

    /// Bind `bodies` against the query's navigation tree, rewrite collection
    /// navigations, join what the bodies need and expand nested subqueries.
    /// Bodies come back rooted at the (possibly new) current parameter.
    fn find_and_apply(
        &mut self,
        expansion: NavigationExpansion,
        bodies: Vec<Expr>,
    ) -> ExpansionResult<(NavigationExpansion, Vec<Expr>)> {
        let NavigationExpansion {
            operand,
            mut state,
            return_type,
        } = expansion;
        let previous = state.current_parameter.clone();

        let mut binder = NavigationBinder::new(
            self.model,
            &mut self.arena,
            &previous,
            &state.source_mappings,
            self.config.max_navigation_depth,
        );
        let bound = bodies
            .into_iter()
            .map(|body| binder.bind(body))
            .collect::<ExpansionResult<Vec<_>>>()?;

        let mut rewriter = CollectionNavigationRewriter::new(self.model, &mut self.arena);
        let mut bodies = bound
            .into_iter()
            .map(|body| rewriter.rewrite(body))
            .collect::<ExpansionResult<Vec<_>>>()?;

        let (operand, parameter) = JoinSynthesizer::new(
            self.model,
            &mut self.arena,
            &state.source_mappings,
            &state.custom_root_mappings,
        )
        .join_pending(operand, previous.clone())?;

        if parameter != previous {
            let replacement = Expr::parameter(&parameter);
            bodies = bodies
                .into_iter()
                .map(|body| replace_parameter(body, &previous, &replacement))
                .collect();
            let selector = replace_parameter(*state.pending_selector.body, &previous, &replacement);
            state.pending_selector = Lambda::unary(parameter.clone(), selector);
            if let Some(chain) = state.pending_include_chain.as_mut() {
                if chain.root == previous {
                    chain.root = parameter.clone();
                }
            }
            state.current_parameter = parameter;
            state.apply_pending_selector = true;
        }

        let bodies = bodies
            .into_iter()
            .map(|body| self.expand_nested(body))
            .collect::<ExpansionResult<Vec<_>>>()?;
        Ok((NavigationExpansion::new(operand, state, return_type), bodies))
    }

    fn expand_nested(&mut self, body: Expr) -> ExpansionResult<Expr> {
        if self.subquery_depth >= self.config.max_subquery_depth {
            return Err(NavigationExpansionError::DepthExceeded {
                pass: Pass::Expander,
                what: "subquery nesting",
                limit: self.config.max_subquery_depth,
            });
        }
        self.subquery_depth += 1;
        let result = self.expand(body);
        self.subquery_depth -= 1;
        result
    }

    fn process_where(
        &mut self,
        expansion: NavigationExpansion,
        predicate: Lambda,
    ) -> ExpansionResult<NavigationExpansion> {
        let body = remap(&predicate, &expansion.state.pending_selector);
        let (mut expansion, bodies) = self.find_and_apply(expansion, vec![body])?;
        let parameter = expansion.state.current_parameter.clone();
        let body = self.reduce_local(single(bodies)?, &parameter)?;
        let ty = ExprType::sequence(parameter.ty.clone());
        expansion.operand = Expr::call(
            QueryOperator::Where,
            vec![expansion.operand, Expr::lambda(vec![parameter], body)],
            ty,
        );
        Ok(expansion)
    }

    fn process_select(
        &mut self,
        expansion: NavigationExpansion,
        selector: Lambda,
    ) -> ExpansionResult<NavigationExpansion> {
        let body = remap(&selector, &expansion.state.pending_selector);
        let (mut expansion, bodies) = self.find_and_apply(expansion, vec![body])?;
        let parameter = expansion.state.current_parameter.clone();
        expansion.state.pending_selector = Lambda::unary(parameter, single(bodies)?);
        expansion.state.apply_pending_selector = true;
        Ok(expansion)
    }

    fn process_ordering(
        &mut self,
        expansion: NavigationExpansion,
        operator: QueryOperator,
        key_selector: Lambda,
    ) -> ExpansionResult<NavigationExpansion> {
        let body = remap(&key_selector, &expansion.state.pending_selector);
        let (mut expansion, bodies) = self.find_and_apply(expansion, vec![body])?;
        let parameter = expansion.state.current_parameter.clone();
        expansion.state.pending_orderings.push(PendingOrdering {
            operator,
            key_selector: Lambda::unary(parameter, single(bodies)?),
        });
        Ok(expansion)
    }

    fn process_paging(
        &mut self,
        expansion: NavigationExpansion,
        operator: QueryOperator,
        rest: Vec<Expr>,
    ) -> ExpansionResult<NavigationExpansion> {
        let count = rest.into_iter().next().ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::Expander, format!("{} needs a count", operator))
        })?;
        let mut expansion = self.flush_orderings(expansion)?;
        let parameter = expansion.state.current_parameter.clone();
        let count = self.expand(count)?;
        let count = self.reduce_local(count, &parameter)?;
        let ty = ExprType::sequence(parameter.ty);
        expansion.operand = Expr::call(operator, vec![expansion.operand, count], ty);
        Ok(expansion)
    }

    fn process_default_if_empty(&mut self, mut expansion: NavigationExpansion) -> NavigationExpansion {
        for source in &expansion.state.source_mappings {
            let root = self.arena.source(*source).root;
            if let Some(root) = root {
                self.arena.mark_optional(root);
            }
        }
        let ty = ExprType::sequence(expansion.state.current_parameter.ty.clone());
        expansion.operand = Expr::call(QueryOperator::DefaultIfEmpty, vec![expansion.operand], ty);
        expansion
    }

    fn process_cardinality(
        &mut self,
        expansion: NavigationExpansion,
        operator: QueryOperator,
        rest: Vec<Expr>,
    ) -> ExpansionResult<NavigationExpansion> {
        let argument = rest.into_iter().next();
        let mut expansion = expansion;
        let argument = match operator {
            QueryOperator::All => {
                let predicate = argument.and_then(Expr::into_lambda).ok_or_else(|| {
                    NavigationExpansionError::invalid(Pass::Expander, "All needs a predicate")
                })?;
                let body = remap(&predicate, &expansion.state.pending_selector);
                let (applied, bodies) = self.find_and_apply(expansion, vec![body])?;
                expansion = applied;
                let parameter = expansion.state.current_parameter.clone();
                let body = self.reduce_local(single(bodies)?, &parameter)?;
                expansion.state.pending_orderings.clear();
                expansion.state.apply_pending_selector = false;
                Some(Expr::lambda(vec![parameter], body))
            }
            QueryOperator::Contains => {
                let item = argument.ok_or_else(|| {
                    NavigationExpansionError::invalid(Pass::Expander, "Contains needs an item")
                })?;
                expansion.state.pending_orderings.clear();
                Some(self.expand(item)?)
            }
            _ => {
                if let Some(predicate) = argument {
                    let predicate = predicate.into_lambda().ok_or_else(|| {
                        NavigationExpansionError::invalid(
                            Pass::Expander,
                            format!("{} expects a predicate lambda", operator),
                        )
                    })?;
                    expansion = self.process_where(expansion, predicate)?;
                }
                if operator.returns_element() {
                    expansion = self.flush_orderings(expansion)?;
                } else {
                    expansion.state.pending_orderings.clear();
                    expansion.state.apply_pending_selector = false;
                }
                None
            }
        };
        expansion.state.pending_cardinality = Some(PendingCardinality { operator, argument });
        Ok(expansion)
    }

    fn process_include(
        &mut self,
        mut expansion: NavigationExpansion,
        navigation: Lambda,
    ) -> ExpansionResult<NavigationExpansion> {
        let body = remap(&navigation, &expansion.state.pending_selector);
        let chain = self.bind_include(&expansion.state, body)?;
        expansion.state.pending_include_chain = Some(chain);
        Ok(expansion)
    }

    fn process_then_include(
        &mut self,
        mut expansion: NavigationExpansion,
        navigation: Lambda,
    ) -> ExpansionResult<NavigationExpansion> {
        let chain = expansion.state.pending_include_chain.clone().ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::Expander, "ThenInclude without a preceding Include")
        })?;
        if chain.ty.is_collection() {
            let navigation = self
                .arena
                .node(chain.node)
                .navigation
                .as_ref()
                .map(|n| n.qualified_name())
                .unwrap_or_default();
            return Err(NavigationExpansionError::UnsupportedInclude {
                pass: Pass::Expander,
                navigation,
            });
        }
        let parameter = navigation.parameter().cloned();
        let body = match parameter {
            Some(parameter) => replace_parameter(*navigation.body, &parameter, &Expr::NavigationBinding(chain)),
            None => *navigation.body,
        };
        let chain = self.bind_include(&expansion.state, body)?;
        expansion.state.pending_include_chain = Some(chain);
        Ok(expansion)
    }

    fn bind_include(&mut self, state: &ExpansionState, body: Expr) -> ExpansionResult<NavigationBinding> {
        let bound = NavigationBinder::new(
            self.model,
            &mut self.arena,
            &state.current_parameter,
            &state.source_mappings,
            self.config.max_navigation_depth,
        )
        .include_mode()
        .bind(body)?;
        match bound {
            Expr::NavigationBinding(binding) => Ok(binding),
            other => Err(NavigationExpansionError::invalid(
                Pass::Expander,
                format!("Include expects a navigation chain, found {}", other),
            )),
        }
    }

    fn process_join(
        &mut self,
        outer: NavigationExpansion,
        rest: Vec<Expr>,
        ty: ExprType,
    ) -> ExpansionResult<Expr> {
        let [inner, outer_key, inner_key, result_selector] = four_arguments(QueryOperator::Join, rest)?;
        let inner = self.expand_inner(QueryOperator::Join, inner)?;
        let outer_key = into_lambda(QueryOperator::Join, outer_key)?;
        let inner_key = into_lambda(QueryOperator::Join, inner_key)?;
        let result_selector = into_lambda(QueryOperator::Join, result_selector)?;

        let body = remap(&outer_key, &outer.state.pending_selector);
        let (outer, bodies) = self.find_and_apply(outer, vec![body])?;
        let outer_parameter = outer.state.current_parameter.clone();
        let outer_key = self.reduce_local(single(bodies)?, &outer_parameter)?;

        let body = remap(&inner_key, &inner.state.pending_selector);
        let (inner, bodies) = self.find_and_apply(inner, vec![body])?;
        let inner_parameter = inner.state.current_parameter.clone();
        let inner_key = self.reduce_local(single(bodies)?, &inner_parameter)?;
        let (outer_key, inner_key) = coerce_nullability(outer_key, inner_key);

        let row = ExprType::composite(outer_parameter.ty.clone(), inner_parameter.ty.clone());
        let result_outer = Parameter::new(outer_parameter.name.clone(), outer_parameter.ty.clone());
        let result_inner = Parameter::new(inner_parameter.name.clone(), inner_parameter.ty.clone());
        let operand = Expr::call(
            QueryOperator::Join,
            vec![
                outer.operand,
                inner.operand,
                Expr::lambda(vec![outer_parameter.clone()], outer_key),
                Expr::lambda(vec![inner_parameter.clone()], inner_key),
                Expr::lambda(
                    vec![result_outer.clone(), result_inner.clone()],
                    Expr::composite(Expr::parameter(&result_outer), Expr::parameter(&result_inner)),
                ),
            ],
            ExprType::sequence(row.clone()),
        );

        self.prefix_paths(&outer.state.source_mappings, &outer.state.custom_root_mappings, OUTER);
        self.prefix_paths(&inner.state.source_mappings, &inner.state.custom_root_mappings, INNER);

        let transparent = Parameter::new("t", row);
        let current = Expr::parameter(&transparent);
        let outer_selector = replace_parameter(*outer.state.pending_selector.body, &outer_parameter, &current);
        let inner_selector = replace_parameter(*inner.state.pending_selector.body, &inner_parameter, &current);

        let mut source_mappings = outer.state.source_mappings;
        source_mappings.extend(inner.state.source_mappings);
        let mut custom_root_mappings = outer.state.custom_root_mappings;
        custom_root_mappings.extend(inner.state.custom_root_mappings);

        let mut state = ExpansionState::new(
            transparent,
            source_mappings,
            Expr::composite(outer_selector.clone(), inner_selector.clone()),
        );
        state.custom_root_mappings = custom_root_mappings;
        state.pending_orderings = outer.state.pending_orderings;
        let merged = NavigationExpansion::new(operand, state, ty.clone());

        let body = match result_selector.parameters.as_slice() {
            [o, i] => {
                let body = replace_parameter(*result_selector.body.clone(), o, &outer_selector);
                replace_parameter(body, i, &inner_selector)
            }
            _ => {
                return Err(NavigationExpansionError::invalid(
                    Pass::Expander,
                    "Join result selector takes two parameters",
                ))
            }
        };
        let (mut merged, bodies) = self.find_and_apply(merged, vec![body])?;
        let parameter = merged.state.current_parameter.clone();
        merged.state.pending_selector = Lambda::unary(parameter, single(bodies)?);
        merged.state.apply_pending_selector = true;
        merged.return_type = ty;
        Ok(merged.into_expr())
    }

    /// Move every joined path of a join input under `segment`.
    fn prefix_paths(&mut self, sources: &[SourceId], custom_roots: &[CustomRootId], segment: &str) {
        for node in self.arena.flatten_sources(sources) {
            if self.arena.node(node).expansion_mode == ExpansionMode::Complete {
                self.arena.prepend_to_path(node, segment);
            }
        }
        for custom_root in custom_roots {
            self.arena.prepend_custom_root(*custom_root, segment);
        }
    }

    fn process_group_join(
        &mut self,
        outer: NavigationExpansion,
        rest: Vec<Expr>,
        ty: ExprType,
    ) -> ExpansionResult<Expr> {
        let [inner, outer_key, inner_key, result_selector] = four_arguments(QueryOperator::GroupJoin, rest)?;
        let inner_element = inner.ty().element().cloned().ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::Expander, "GroupJoin over a non-sequence")
        })?;
        let inner = self.expand_inner(QueryOperator::GroupJoin, inner)?;
        let outer_key = into_lambda(QueryOperator::GroupJoin, outer_key)?;
        let inner_key = into_lambda(QueryOperator::GroupJoin, inner_key)?;
        let result_selector = into_lambda(QueryOperator::GroupJoin, result_selector)?;
        let group = result_selector.parameters.get(1).cloned().ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::Expander, "GroupJoin result selector takes two parameters")
        })?;

        let outer_key = remap(&outer_key, &outer.state.pending_selector);
        let result = remap(&result_selector, &outer.state.pending_selector);
        let (outer, bodies) = self.find_and_apply(outer, vec![outer_key, result])?;
        let outer = self.flush_orderings(outer)?;
        let outer_parameter = outer.state.current_parameter.clone();
        let [outer_key, result] = <[Expr; 2]>::try_from(bodies).map_err(|_| {
            NavigationExpansionError::invalid(Pass::Expander, "GroupJoin lost a lambda body")
        })?;
        let outer_key = self.reduce_local(outer_key, &outer_parameter)?;
        let mut result = self.reduce_local(result, &outer_parameter)?;

        let body = remap(&inner_key, &inner.state.pending_selector);
        let (inner, bodies) = self.find_and_apply(inner, vec![body])?;
        let inner_parameter = inner.state.current_parameter.clone();
        let inner_key = self.reduce_local(single(bodies)?, &inner_parameter)?;

        let group_parameter = if inner.state.apply_pending_selector {
            // Grouped rows carry the joined shape; project them back to the
            // inner element.
            let rows = Parameter::new(group.name.clone(), ExprType::sequence(inner_parameter.ty.clone()));
            let row = Parameter::new(inner_parameter.name.clone(), inner_parameter.ty.clone());
            let selector = replace_parameter(
                *inner.state.pending_selector.body,
                &inner_parameter,
                &Expr::parameter(&row),
            );
            let selector = self.reduce_local(selector, &row)?;
            let projected = Expr::call(
                QueryOperator::Select,
                vec![Expr::parameter(&rows), Expr::lambda(vec![row], selector)],
                ExprType::sequence(inner_element),
            );
            result = replace_parameter(result, &group, &projected);
            rows
        } else {
            group
        };

        let (outer_key, inner_key) = coerce_nullability(outer_key, inner_key);
        let call = Expr::call(
            QueryOperator::GroupJoin,
            vec![
                outer.operand,
                inner.operand,
                Expr::lambda(vec![outer_parameter.clone()], outer_key),
                Expr::lambda(vec![inner_parameter], inner_key),
                Expr::lambda(vec![outer_parameter, group_parameter], result),
            ],
            ty.clone(),
        );
        self.restart(call, ty)
    }

    fn process_select_many(
        &mut self,
        expansion: NavigationExpansion,
        rest: Vec<Expr>,
        ty: ExprType,
    ) -> ExpansionResult<Expr> {
        let mut rest = rest.into_iter();
        let collection_selector = rest
            .next()
            .and_then(Expr::into_lambda)
            .ok_or_else(|| NavigationExpansionError::invalid(Pass::Expander, "SelectMany needs a collection selector"))?;
        let result_selector = rest.next().map(|r| into_lambda(QueryOperator::SelectMany, r)).transpose()?;

        let collection = remap(&collection_selector, &expansion.state.pending_selector);
        let mut bodies = vec![collection];
        if let Some(result_selector) = &result_selector {
            bodies.push(remap(result_selector, &expansion.state.pending_selector));
        }
        let (expansion, bodies) = self.find_and_apply(expansion, bodies)?;
        let expansion = self.flush_orderings(expansion)?;
        let parameter = expansion.state.current_parameter.clone();
        let mut bodies = bodies.into_iter();
        let collection = bodies.next().ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::Expander, "SelectMany lost its collection selector")
        })?;
        let collection = without_materialize(self.reduce_local(collection, &parameter)?);

        let item_type = collection.ty().element().cloned().ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::Expander, "SelectMany collection selector is not a sequence")
        })?;
        let (item, result) = match (result_selector, bodies.next()) {
            (Some(selector), Some(body)) => {
                let item = selector
                    .parameters
                    .get(1)
                    .cloned()
                    .unwrap_or_else(|| Parameter::new(parameter_name(&item_type), item_type.clone()));
                (item, self.reduce_local(body, &parameter)?)
            }
            _ => {
                let item = Parameter::new(parameter_name(&item_type), item_type);
                let body = Expr::parameter(&item);
                (item, body)
            }
        };

        let call = Expr::call(
            QueryOperator::SelectMany,
            vec![
                expansion.operand,
                Expr::lambda(vec![parameter.clone()], collection),
                Expr::lambda(vec![parameter, item], result),
            ],
            ty.clone(),
        );
        self.restart(call, ty)
    }

    fn expand_inner(&mut self, operator: QueryOperator, inner: Expr) -> ExpansionResult<NavigationExpansion> {
        match self.expand(inner)? {
            Expr::NavigationExpansion(expansion) => Ok(*expansion),
            other => Err(NavigationExpansionError::invalid(
                Pass::Expander,
                format!("{} needs a query as its inner source, found {}", operator, other),
            )),
        }
    }

    fn flush_orderings(&mut self, expansion: NavigationExpansion) -> ExpansionResult<NavigationExpansion> {
        if expansion.state.pending_orderings.is_empty() {
            return Ok(expansion);
        }
        let NavigationExpansion {
            operand,
            mut state,
            return_type,
        } = expansion;
        let orderings = mem::take(&mut state.pending_orderings);
        let parameter = state.current_parameter.clone();
        let operand = self
            .reducer()
            .apply_orderings(operand, orderings, &parameter, &ReduceScope::local(&parameter))?;
        Ok(NavigationExpansion::new(operand, state, return_type))
    }

    /// Reduce the query, apply `operator` to the result and continue with a
    /// fresh wrapper over it.
    fn commit_and_restart(
        &mut self,
        expansion: NavigationExpansion,
        operator: QueryOperator,
        rest: Vec<Expr>,
        ty: ExprType,
    ) -> ExpansionResult<Expr> {
        let reduced = self
            .reducer()
            .reduce_expansion(expansion, &ReduceScope::Parameters(vec![]))?;
        let mut arguments = vec![reduced];
        for argument in rest {
            arguments.push(self.expand(argument)?);
        }
        log::debug!("{} fixes the query shape; restarting expansion", operator);
        self.restart(Expr::call(operator, arguments, ty.clone()), ty)
    }

    /// Wrap a committed operand so later operators can keep navigating from
    /// its rows.
    fn restart(&mut self, operand: Expr, ty: ExprType) -> ExpansionResult<Expr> {
        let Some(element) = ty.element().cloned() else {
            return Ok(operand);
        };
        let parameter = Parameter::new(parameter_name(&element), element.clone());
        let mut source_mappings = vec![];
        let mut custom_root_mappings = vec![];
        let selector = self.mirror(
            &element,
            &parameter,
            vec![],
            &mut source_mappings,
            &mut custom_root_mappings,
        );
        let mut state = ExpansionState::new(parameter, source_mappings, selector);
        state.custom_root_mappings = custom_root_mappings;
        Ok(NavigationExpansion::new(operand, state, ty).into_expr())
    }

    /// Selector that reads a row of type `ty` at `path`: entities become
    /// navigation roots, anything else opaque becomes a custom root.
    fn mirror(
        &mut self,
        ty: &ExprType,
        parameter: &Parameter,
        path: Vec<String>,
        sources: &mut Vec<SourceId>,
        custom_roots: &mut Vec<CustomRootId>,
    ) -> Expr {
        match ty {
            ExprType::Entity(entity) => {
                let source = self.arena.add_source(entity.clone());
                let root = self.arena.create_root(source, path, false);
                sources.push(source);
                Expr::NavigationBinding(NavigationBinding {
                    root: parameter.clone(),
                    node: root,
                    source,
                    ty: ty.clone(),
                })
            }
            ExprType::Composite { outer, inner } => {
                let outer = self.mirror(outer, parameter, extend(&path, OUTER), sources, custom_roots);
                let inner = self.mirror(inner, parameter, extend(&path, INNER), sources, custom_roots);
                Expr::composite(outer, inner)
            }
            ExprType::Record(fields) => Expr::Record(RecordExpr {
                fields: fields
                    .iter()
                    .map(|(name, field)| {
                        let value = self.mirror(field, parameter, extend(&path, name), sources, custom_roots);
                        (name.clone(), value)
                    })
                    .collect(),
            }),
            other => {
                let mapping = self.arena.add_custom_root(path);
                custom_roots.push(mapping);
                Expr::CustomRoot(CustomRoot {
                    root: parameter.clone(),
                    mapping,
                    ty: other.clone(),
                })
            }
        }
    }

    fn expand_materialize(&mut self, materialize: MaterializeCollection) -> ExpansionResult<Expr> {
        let MaterializeCollection { source, navigation } = materialize;
        match self.expand(*source)? {
            Expr::NavigationExpansion(mut expansion) => {
                let element = expansion.return_type.element().cloned().ok_or_else(|| {
                    NavigationExpansionError::invalid(Pass::Expander, "collection over a non-sequence")
                })?;
                let kind = navigation.collection.unwrap_or(CollectionKind::List);
                expansion.return_type = ExprType::collection(element, kind);
                expansion.state.materialize_collection = Some(navigation);
                Ok(Expr::NavigationExpansion(expansion))
            }
            source => Ok(Expr::MaterializeCollection(MaterializeCollection {
                source: Box::new(source),
                navigation,
            })),
        }
    }

    fn expand_member(&mut self, member: MemberAccess) -> ExpansionResult<Expr> {
        let MemberAccess { target, member, ty } = member;
        match self.expand(*target)? {
            Expr::NavigationExpansion(expansion)
                if expansion
                    .state
                    .cardinality_operator()
                    .is_some_and(|operator| operator.returns_element()) =>
            {
                self.member_on_element(*expansion, member, ty)
            }
            target => Ok(Expr::member(target, member, ty)),
        }
    }

    /// `query.First().Member`: the member is read inside the query.
    fn member_on_element(
        &mut self,
        expansion: NavigationExpansion,
        member: String,
        member_ty: ExprType,
    ) -> ExpansionResult<Expr> {
        let or_default = expansion
            .state
            .cardinality_operator()
            .is_some_and(|operator| operator.is_or_default());
        if member_ty.is_collection() {
            return self.collection_on_element(expansion, member, member_ty, or_default);
        }

        let element = Parameter::new(
            expansion.state.current_parameter.name.clone(),
            expansion.return_type.clone(),
        );
        let mut body = Expr::member(Expr::parameter(&element), member, member_ty.clone());
        if or_default && member_ty.make_nullable() != member_ty {
            body = Expr::convert(body, member_ty.make_nullable());
        }
        let mut expansion = self.process_select(expansion, Lambda::unary(element, body))?;
        expansion.return_type = expansion.state.pending_selector.body.ty();
        let result_ty = expansion.return_type.clone();
        let result = expansion.into_expr();
        if result_ty == member_ty {
            Ok(result)
        } else {
            Ok(Expr::convert(result, member_ty))
        }
    }

    /// `query.First().Orders`: the target rows whose foreign key matches the
    /// key of the selected element, read as a scalar subquery.
    fn collection_on_element(
        &mut self,
        expansion: NavigationExpansion,
        member: String,
        member_ty: ExprType,
        or_default: bool,
    ) -> ExpansionResult<Expr> {
        let owner_entity = expansion
            .return_type
            .entity_name()
            .map(str::to_string)
            .ok_or_else(|| {
                NavigationExpansionError::invalid(
                    Pass::Expander,
                    format!("`{}` read from a non-entity element", member),
                )
            })?;
        let model = self.model;
        let to_model_error = |e| NavigationExpansionError::from_model(Pass::Expander, e);
        let navigation = model
            .find_navigation(&owner_entity, &member)
            .map_err(to_model_error)?
            .filter(|navigation| navigation.is_collection())
            .ok_or_else(|| {
                NavigationExpansionError::invalid(
                    Pass::Expander,
                    format!("`{}` is not a collection navigation of {}", member, owner_entity),
                )
            })?;
        let principal_key = model
            .properties(&owner_entity, &navigation.foreign_key.principal_key)
            .map_err(to_model_error)?;
        let dependent_key = model
            .properties(&navigation.target_entity, &navigation.foreign_key.properties)
            .map_err(to_model_error)?;

        let mut keyed = expansion;
        let mut key = create_key_access(&keyed.state.pending_selector.body, &principal_key, false);
        if or_default && !key.ty().is_nullable() {
            let ty = key.ty().make_nullable();
            key = Expr::convert(key, ty);
        }
        let parameter = keyed.state.current_parameter.clone();
        keyed.return_type = key.ty();
        keyed.state.pending_selector = Lambda::unary(parameter, key);
        keyed.state.apply_pending_selector = true;
        let owner_key = self
            .reducer()
            .reduce_expansion(keyed, &ReduceScope::Parameters(vec![]))?;

        let target = ExprType::entity(navigation.target_entity.clone());
        let candidate = Parameter::new(parameter_name(&target), target.clone());
        let dependent = create_key_access(&Expr::parameter(&candidate), &dependent_key, false);
        let (dependent, owner_key) = coerce_nullability(dependent, owner_key);
        let filtered = Expr::call(
            QueryOperator::Where,
            vec![
                Expr::entity_source(navigation.target_entity.clone()),
                Expr::lambda(vec![candidate], Expr::equal(dependent, owner_key)),
            ],
            ExprType::sequence(target),
        );

        let mut collection = self.entity_query(filtered, &navigation.target_entity);
        collection.state.materialize_collection = Some(navigation);
        collection.return_type = member_ty;
        Ok(collection.into_expr())
    }

    fn expand_equality(&mut self, binary: BinaryExpr) -> ExpansionResult<Expr> {
        let BinaryExpr { op, left, right } = binary;
        let left = self.expand(*left)?;
        let right = self.expand(*right)?;
        let (left, right) = match (left, right) {
            (Expr::NavigationExpansion(expansion), right)
                if right.is_null_literal() && selects_entity_element(&expansion) =>
            {
                self.element_key(*expansion)?
            }
            (left, Expr::NavigationExpansion(expansion))
                if left.is_null_literal() && selects_entity_element(&expansion) =>
            {
                let (key, null) = self.element_key(*expansion)?;
                (null, key)
            }
            pair => pair,
        };
        Ok(Expr::binary(op, left, right))
    }

    /// Compare a single-element query against null through its key. Returns
    /// the keyed query and the matching null key.
    fn element_key(&mut self, mut expansion: NavigationExpansion) -> ExpansionResult<(Expr, Expr)> {
        let Expr::NavigationBinding(binding) = (*expansion.state.pending_selector.body).clone() else {
            return Err(NavigationExpansionError::invalid(
                Pass::Expander,
                "null comparison on a non-entity element",
            ));
        };
        let entity = binding.entity_type().map(str::to_string).unwrap_or_default();
        let primary_key = self
            .model
            .primary_key(&entity)
            .map_err(|e| NavigationExpansionError::from_model(Pass::Expander, e))?;
        let key = create_key_access(&Expr::NavigationBinding(binding), &primary_key, true);
        let null = null_key(&key);

        let parameter = expansion.state.current_parameter.clone();
        expansion.return_type = key.ty();
        expansion.state.pending_selector = Lambda::unary(parameter, key);
        expansion.state.apply_pending_selector = true;
        Ok((expansion.into_expr(), null))
    }
}

fn selects_entity_element(expansion: &NavigationExpansion) -> bool {
    expansion
        .state
        .cardinality_operator()
        .is_some_and(|operator| operator.returns_element())
        && matches!(&*expansion.state.pending_selector.body, Expr::NavigationBinding(binding) if !binding.ty.is_collection())
}

/// Body of `lambda` with its first parameter replaced by the pending
/// selector body.
fn remap(lambda: &Lambda, selector: &Lambda) -> Expr {
    let body = (*lambda.body).clone();
    match lambda.parameter() {
        Some(parameter) => replace_parameter(body, parameter, &selector.body),
        None => body,
    }
}

fn extend(path: &[String], segment: &str) -> Vec<String> {
    let mut path = path.to_vec();
    path.push(segment.to_string());
    path
}

fn single(bodies: Vec<Expr>) -> ExpansionResult<Expr> {
    bodies
        .into_iter()
        .next()
        .ok_or_else(|| NavigationExpansionError::invalid(Pass::Expander, "lambda body went missing"))
}

fn into_lambda(operator: QueryOperator, expr: Expr) -> ExpansionResult<Lambda> {
    expr.into_lambda().ok_or_else(|| {
        NavigationExpansionError::invalid(Pass::Expander, format!("{} expects a lambda argument", operator))
    })
}

fn lambda_argument(operator: QueryOperator, arguments: &[Expr], index: usize) -> ExpansionResult<Lambda> {
    let argument = arguments.get(index).cloned().ok_or_else(|| {
        NavigationExpansionError::invalid(Pass::Expander, format!("{} is missing an argument", operator))
    })?;
    into_lambda(operator, argument)
}

fn four_arguments(operator: QueryOperator, arguments: Vec<Expr>) -> ExpansionResult<[Expr; 4]> {
    let count = arguments.len();
    <[Expr; 4]>::try_from(arguments).map_err(|_| {
        NavigationExpansionError::invalid(
            Pass::Expander,
            format!("{} takes 5 arguments, got {}", operator, count + 1),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::display::ExprTree;

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
      - { name: CustomerId, type: int32 }
relationships:
  - dependent: Order
    principal: Customer
    foreign_key: CustomerId
    required: true
    dependent_to_principal: Customer
    principal_to_dependent: Orders
"#;

    fn orders_where_customer_named() -> Expr {
        let order = Parameter::new("o", ExprType::entity("Order"));
        let customer = Expr::member(Expr::parameter(&order), "Customer", ExprType::entity("Customer"));
        let name = Expr::member(customer, "Name", ExprType::scalar(crate::model::ScalarKind::String));
        Expr::call(
            QueryOperator::Where,
            vec![
                Expr::entity_source("Order"),
                Expr::lambda(vec![order], Expr::not_equal(name.clone(), Expr::null(name.ty()))),
            ],
            ExprType::sequence(ExprType::entity("Order")),
        )
    }

    #[test]
    fn test_entity_source_becomes_wrapper() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut expander = NavigationExpander::new(&model, ExpansionConfig::default());
        let built = expander.build(&Expr::entity_source("Order")).unwrap();
        let Expr::NavigationExpansion(expansion) = built else {
            panic!("expected a wrapper");
        };
        assert_eq!(expansion.state.current_parameter.name, "o");
        assert_eq!(expander.arena().len(), 1);
    }

    #[test]
    fn test_filter_through_reference_joins() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut expander = NavigationExpander::new(&model, ExpansionConfig::default());
        let built = expander.build(&orders_where_customer_named()).unwrap();
        let reduced = expander.reduce(built).unwrap();

        let rendered = ExprTree(&reduced).to_string();
        assert!(rendered.contains("Join"), "{}", rendered);
        assert!(!rendered.contains("GroupJoin"), "{}", rendered);
        assert_eq!(reduced.ty(), ExprType::sequence(ExprType::entity("Order")));
    }

    #[test]
    fn test_subquery_depth_limit() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let config = ExpansionConfig {
            max_subquery_depth: 1,
            ..Default::default()
        };
        let customer = Parameter::new("c", ExprType::entity("Customer"));
        let order = Parameter::new("o", ExprType::entity("Order"));
        let orders = Expr::member(
            Expr::parameter(&customer),
            "Orders",
            ExprType::collection(ExprType::entity("Order"), CollectionKind::List),
        );
        // c => c.Orders.Any(o => o.Customer.Orders.Any())
        let inner_orders = Expr::member(
            Expr::member(Expr::parameter(&order), "Customer", ExprType::entity("Customer")),
            "Orders",
            ExprType::collection(ExprType::entity("Order"), CollectionKind::List),
        );
        let inner_any = Expr::call(QueryOperator::Any, vec![inner_orders], ExprType::bool());
        let outer_any = Expr::call(
            QueryOperator::Any,
            vec![orders, Expr::lambda(vec![order], inner_any)],
            ExprType::bool(),
        );
        let query = Expr::call(
            QueryOperator::Where,
            vec![Expr::entity_source("Customer"), Expr::lambda(vec![customer], outer_any)],
            ExprType::sequence(ExprType::entity("Customer")),
        );

        let err = NavigationExpander::new(&model, config).build(&query).unwrap_err();
        assert!(matches!(err, NavigationExpansionError::DepthExceeded { what: "subquery nesting", .. }));
    }

    #[test]
    fn test_distinct_restarts_over_committed_query() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut expander = NavigationExpander::new(&model, ExpansionConfig::default());
        let query = Expr::call(
            QueryOperator::Distinct,
            vec![orders_where_customer_named()],
            ExprType::sequence(ExprType::entity("Order")),
        );
        let built = expander.build(&query).unwrap();
        let Expr::NavigationExpansion(expansion) = &built else {
            panic!("expected a restarted wrapper");
        };
        assert!(matches!(expansion.operand, Expr::Call(ref c) if c.operator == QueryOperator::Distinct));
        assert!(!expansion.state.has_pending_work());

        let reduced = expander.reduce(built).unwrap();
        let Expr::Call(distinct) = reduced else {
            panic!("expected Distinct");
        };
        assert_eq!(distinct.operator, QueryOperator::Distinct);
    }

    #[test]
    fn test_then_include_without_include_is_invalid() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let customer = Parameter::new("c", ExprType::entity("Customer"));
        let query = Expr::call(
            QueryOperator::ThenInclude,
            vec![
                Expr::entity_source("Order"),
                Expr::lambda(vec![customer.clone()], Expr::parameter(&customer)),
            ],
            ExprType::sequence(ExprType::entity("Order")),
        );
        let err = NavigationExpander::new(&model, ExpansionConfig::default())
            .build(&query)
            .unwrap_err();
        assert!(matches!(err, NavigationExpansionError::InvalidQuery { pass: Pass::Expander, .. }));
    }
}

//! Include Builder
//!
//! Runs when a query is reduced. Included navigations reachable from the
//! pending selector are joined if nothing has joined them yet, and every
//! binding that owns included children is wrapped in `Include` nodes so the
//! reducer can emit the assignments that populate them.

use super::binding::navigation_type;
use super::errors::{ExpansionResult, NavigationExpansionError, Pass};
use super::join_synthesizer::{JoinSynthesizer, JoinTrigger};
use super::navigation_tree::{ExpansionMode, NavigationArena, NodeId};
use super::state::NavigationExpansion;
use crate::expression::visitors::{collect_bindings, map_children, replace_parameter};
use crate::expression::{Expr, IncludeExpr, Lambda, NavigationBinding};
use crate::model::Model;

pub struct IncludeBuilder<'a> {
    model: &'a Model,
    arena: &'a mut NavigationArena,
}

impl<'a> IncludeBuilder<'a> {
    pub fn new(model: &'a Model, arena: &'a mut NavigationArena) -> Self {
        IncludeBuilder { model, arena }
    }

    pub fn apply(&mut self, expansion: NavigationExpansion) -> ExpansionResult<NavigationExpansion> {
        let NavigationExpansion {
            mut operand,
            mut state,
            return_type,
        } = expansion;

        let pending = self.find_pending_includes(&state.pending_selector.body)?;

        let mut emitted = false;
        let body = self.rewrite(*state.pending_selector.body, &mut emitted);

        let old_parameter = state.current_parameter.clone();
        let mut parameter = old_parameter.clone();
        if !pending.is_empty() {
            log::debug!("Joining {} included navigations", pending.len());
            let mut synthesizer = JoinSynthesizer::new(
                self.model,
                self.arena,
                &state.source_mappings,
                &state.custom_root_mappings,
            );
            for node in pending {
                (operand, parameter) =
                    synthesizer.add_navigation_join(operand, parameter, node, JoinTrigger::Include)?;
            }
        }

        let body = if parameter != old_parameter {
            replace_parameter(body, &old_parameter, &Expr::parameter(&parameter))
        } else {
            body
        };
        state.pending_selector = Lambda::unary(parameter.clone(), body);
        state.current_parameter = parameter;
        if emitted || state.current_parameter != old_parameter {
            state.apply_pending_selector = true;
        }

        Ok(NavigationExpansion::new(operand, state, return_type))
    }

    /// Included nodes below the selector's bindings that still need a join.
    fn find_pending_includes(&self, body: &Expr) -> ExpansionResult<Vec<NodeId>> {
        let mut found = vec![];
        for binding in collect_bindings(body) {
            for id in self.arena.flatten(binding.node) {
                let node = self.arena.node(id);
                if !node.included || node.expansion_mode == ExpansionMode::Complete {
                    continue;
                }
                if node.is_collection() {
                    let navigation = node
                        .navigation
                        .as_ref()
                        .map(|n| n.qualified_name())
                        .unwrap_or_default();
                    return Err(NavigationExpansionError::UnsupportedInclude {
                        pass: Pass::IncludeBuilder,
                        navigation,
                    });
                }
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Ok(found)
    }

    fn included_children(&self, node: NodeId) -> Vec<NodeId> {
        self.arena
            .node(node)
            .children
            .iter()
            .copied()
            .filter(|c| {
                let child = self.arena.node(*c);
                child.included && !child.detached
            })
            .collect()
    }

    // Member accesses, calls, lambdas and nested queries carry no includes of
    // this query.
    fn rewrite(&self, expr: Expr, emitted: &mut bool) -> Expr {
        match expr {
            Expr::Member(_) | Expr::Call(_) | Expr::Lambda(_) | Expr::NavigationExpansion(_) => expr,
            Expr::NavigationBinding(binding) => {
                let mut result = Expr::NavigationBinding(binding.clone());
                for child in self.included_children(binding.node) {
                    result = self.include_call(result, child, &binding);
                    *emitted = true;
                }
                result
            }
            other => map_children(other, &mut |child| self.rewrite(child, emitted)),
        }
    }

    fn include_call(&self, caller: Expr, node: NodeId, owner: &NavigationBinding) -> Expr {
        let Some(navigation) = self.arena.node(node).navigation.clone() else {
            return caller;
        };
        let mut included = Expr::NavigationBinding(NavigationBinding {
            root: owner.root.clone(),
            node,
            source: owner.source,
            ty: navigation_type(&navigation),
        });
        for child in self.included_children(node) {
            included = self.include_call(included, child, owner);
        }
        Expr::Include(IncludeExpr {
            caller: Box::new(caller),
            included: Box::new(included),
            navigation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ExprType, Parameter};
    use crate::navigation_expansion::state::ExpansionState;

    const MODEL: &str = r#"
entities:
  - name: Customer
    key: Id
    properties:
      - { name: Id, type: int32 }
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

    fn orders(arena: &mut NavigationArena) -> (NavigationExpansion, NodeId) {
        let source = arena.add_source("Order");
        let root = arena.create_root(source, vec![], false);
        let parameter = Parameter::new("o", ExprType::entity("Order"));
        let binding = Expr::NavigationBinding(NavigationBinding {
            root: parameter.clone(),
            node: root,
            source,
            ty: ExprType::entity("Order"),
        });
        let state = ExpansionState::new(parameter, vec![source], binding);
        (
            NavigationExpansion::new(
                Expr::entity_source("Order"),
                state,
                ExprType::sequence(ExprType::entity("Order")),
            ),
            root,
        )
    }

    #[test]
    fn test_include_joins_and_wraps_selector() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut arena = NavigationArena::new();
        let (expansion, root) = orders(&mut arena);
        let customer = model.find_navigation("Order", "Customer").unwrap().unwrap();
        let node = arena.create_child(&customer, root, true);

        let result = IncludeBuilder::new(&model, &mut arena).apply(expansion).unwrap();

        assert_eq!(arena.node(node).expansion_mode, ExpansionMode::Complete);
        assert!(result.state.apply_pending_selector);
        assert!(matches!(*result.state.pending_selector.body, Expr::Include(_)));
        assert!(matches!(result.operand, Expr::Call(_)));
    }

    #[test]
    fn test_collection_include_rejected() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Customer");
        let root = arena.create_root(source, vec![], false);
        let orders = model.find_navigation("Customer", "Orders").unwrap().unwrap();
        arena.create_child(&orders, root, true);
        let parameter = Parameter::new("c", ExprType::entity("Customer"));
        let binding = Expr::NavigationBinding(NavigationBinding {
            root: parameter.clone(),
            node: root,
            source,
            ty: ExprType::entity("Customer"),
        });
        let expansion = NavigationExpansion::new(
            Expr::entity_source("Customer"),
            ExpansionState::new(parameter, vec![source], binding),
            ExprType::sequence(ExprType::entity("Customer")),
        );

        let err = IncludeBuilder::new(&model, &mut arena).apply(expansion).unwrap_err();
        assert_eq!(
            err,
            NavigationExpansionError::UnsupportedInclude {
                pass: Pass::IncludeBuilder,
                navigation: "Customer.Orders".to_string(),
            }
        );
    }

    #[test]
    fn test_no_includes_leaves_state_alone() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut arena = NavigationArena::new();
        let (expansion, _) = orders(&mut arena);

        let result = IncludeBuilder::new(&model, &mut arena)
            .apply(expansion.clone())
            .unwrap();
        assert!(!result.state.apply_pending_selector);
        assert_eq!(result.operand, expansion.operand);
    }
}

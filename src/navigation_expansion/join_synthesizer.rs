//! Join Synthesizer
//!
//! Replaces pending reference navigations with joins on the query operand.
//! A required navigation becomes an inner `Join`; an optional one becomes a
//! `GroupJoin` flattened by `SelectMany(.., DefaultIfEmpty)`, i.e. a left
//! outer join. Joins forced only by an include are always left outer joins.
//!
//! Every join wraps the current row in a composite `(Outer, Inner)`, so the
//! access path of everything already joined grows by one `Outer` segment (two
//! for a left join, whose grouping adds another composite level). The new
//! navigation is read from `Inner`.

use super::errors::{ExpansionResult, NavigationExpansionError, Pass};
use super::navigation_tree::{CustomRootId, ExpansionMode, NavigationArena, NodeId, SourceId};
use crate::expression::key_access::{coerce_nullability, create_key_access};
use crate::expression::{build_path, Expr, ExprType, Parameter, QueryOperator, INNER, OUTER};
use crate::model::Model;

/// Which nodes a join pass picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinTrigger {
    /// Nodes some expression needs.
    Pending,
    /// Nodes an include asked for, whether or not anything reads them.
    Include,
}

impl JoinTrigger {
    fn selects(&self, mode: ExpansionMode) -> bool {
        match self {
            JoinTrigger::Pending => mode == ExpansionMode::Pending,
            JoinTrigger::Include => mode != ExpansionMode::Complete,
        }
    }
}

pub struct JoinSynthesizer<'a> {
    model: &'a Model,
    arena: &'a mut NavigationArena,
    source_mappings: &'a [SourceId],
    custom_root_mappings: &'a [CustomRootId],
}

impl<'a> JoinSynthesizer<'a> {
    pub fn new(
        model: &'a Model,
        arena: &'a mut NavigationArena,
        source_mappings: &'a [SourceId],
        custom_root_mappings: &'a [CustomRootId],
    ) -> Self {
        JoinSynthesizer {
            model,
            arena,
            source_mappings,
            custom_root_mappings,
        }
    }

    /// Join every pending node below the source roots. Returns the new
    /// operand and the parameter naming its row.
    pub fn join_pending(
        &mut self,
        operand: Expr,
        parameter: Parameter,
    ) -> ExpansionResult<(Expr, Parameter)> {
        let mut result = (operand, parameter);
        for source in self.source_mappings {
            let Some(root) = self.arena.source(*source).root else {
                continue;
            };
            for child in self.arena.node(root).children.clone() {
                result = self.add_navigation_join(result.0, result.1, child, JoinTrigger::Pending)?;
            }
        }
        Ok(result)
    }

    /// Join `node` if `trigger` selects it, then descend into its reference
    /// children.
    pub fn add_navigation_join(
        &mut self,
        operand: Expr,
        parameter: Parameter,
        node: NodeId,
        trigger: JoinTrigger,
    ) -> ExpansionResult<(Expr, Parameter)> {
        let current = self.arena.node(node);
        if current.is_collection() || current.detached {
            return Ok((operand, parameter));
        }

        let mode = current.expansion_mode;
        let (mut operand, mut parameter) = (operand, parameter);
        if trigger.selects(mode) {
            // Include-only navigations never drop owner rows.
            if trigger == JoinTrigger::Include && mode == ExpansionMode::NotNeeded {
                self.arena.mark_optional(node);
            }
            (operand, parameter) = self.join(operand, parameter, node)?;
        }

        for child in self.arena.node(node).children.clone() {
            (operand, parameter) = self.add_navigation_join(operand, parameter, child, trigger)?;
        }
        Ok((operand, parameter))
    }

    fn join(&mut self, operand: Expr, parameter: Parameter, node: NodeId) -> ExpansionResult<(Expr, Parameter)> {
        let current = self.arena.node(node);
        let Some(navigation) = current.navigation.clone() else {
            return Ok((operand, parameter));
        };
        let optional = current.optional;
        let parent_id = current.parent.ok_or_else(|| {
            NavigationExpansionError::invalid(Pass::JoinSynthesis, "navigation node has no parent")
        })?;
        let parent = self.arena.node(parent_id);

        let to_model_error = |e| NavigationExpansionError::from_model(Pass::JoinSynthesis, e);
        let (outer_names, inner_names) = navigation.join_keys();
        let outer_properties = self
            .model
            .properties(&navigation.declaring_entity, outer_names)
            .map_err(to_model_error)?;
        let inner_properties = self
            .model
            .properties(&navigation.target_entity, inner_names)
            .map_err(to_model_error)?;

        let row = parameter.ty.clone();
        let target = ExprType::entity(navigation.target_entity.clone());

        let outer_parameter = Parameter::new(parameter.name.clone(), row.clone());
        let outer_access = build_path(Expr::parameter(&outer_parameter), &parent.to_path).ok_or_else(|| {
            NavigationExpansionError::invalid(
                Pass::JoinSynthesis,
                format!("cannot read {:?} from {}", parent.to_path, row),
            )
        })?;
        let outer_key = create_key_access(&outer_access, &outer_properties, parent.optional);

        let inner_name = format!("{}_{}", parameter.name, navigation.name);
        let inner_parameter = Parameter::new(inner_name.clone(), target.clone());
        let inner_key = create_key_access(&Expr::parameter(&inner_parameter), &inner_properties, false);
        let (outer_key, inner_key) = coerce_nullability(outer_key, inner_key);

        let outer_key_selector = Expr::lambda(vec![outer_parameter], outer_key);
        let inner_key_selector = Expr::lambda(vec![inner_parameter], inner_key);
        let source = match operand {
            Expr::MaterializeCollection(materialize) => *materialize.source,
            operand => operand,
        };

        let (joined, joined_row) = if optional {
            let grouped = ExprType::sequence(target.clone());
            let grouping_row = ExprType::composite(row.clone(), grouped.clone());
            let result_outer = Parameter::new(parameter.name.clone(), row.clone());
            let result_group = Parameter::new(inner_name.clone(), grouped.clone());
            let group_join = Expr::call(
                QueryOperator::GroupJoin,
                vec![
                    source,
                    Expr::entity_source(navigation.target_entity.clone()),
                    outer_key_selector,
                    inner_key_selector,
                    Expr::lambda(
                        vec![result_outer.clone(), result_group.clone()],
                        Expr::composite(Expr::parameter(&result_outer), Expr::parameter(&result_group)),
                    ),
                ],
                ExprType::sequence(grouping_row.clone()),
            );

            let grouping = Parameter::new("ti", grouping_row.clone());
            let default_if_empty = Expr::call(
                QueryOperator::DefaultIfEmpty,
                vec![Expr::member(Expr::parameter(&grouping), INNER, grouped.clone())],
                grouped,
            );
            let result_grouping = Parameter::new("ti", grouping_row.clone());
            let result_inner = Parameter::new(inner_name.clone(), target.clone());
            let joined_row = ExprType::composite(grouping_row, target);
            let select_many = Expr::call(
                QueryOperator::SelectMany,
                vec![
                    group_join,
                    Expr::lambda(vec![grouping], default_if_empty),
                    Expr::lambda(
                        vec![result_grouping.clone(), result_inner.clone()],
                        Expr::composite(Expr::parameter(&result_grouping), Expr::parameter(&result_inner)),
                    ),
                ],
                ExprType::sequence(joined_row.clone()),
            );
            (select_many, joined_row)
        } else {
            let joined_row = ExprType::composite(row.clone(), target.clone());
            let result_outer = Parameter::new(parameter.name.clone(), row);
            let result_inner = Parameter::new(inner_name.clone(), target.clone());
            let join = Expr::call(
                QueryOperator::Join,
                vec![
                    source,
                    Expr::entity_source(navigation.target_entity.clone()),
                    outer_key_selector,
                    inner_key_selector,
                    Expr::lambda(
                        vec![result_outer.clone(), result_inner.clone()],
                        Expr::composite(Expr::parameter(&result_outer), Expr::parameter(&result_inner)),
                    ),
                ],
                ExprType::sequence(joined_row.clone()),
            );
            (join, joined_row)
        };

        // Everything joined earlier now sits under Outer (twice for a left join).
        let prefix_depth = if optional { 2 } else { 1 };
        for other in self.arena.flatten_sources(self.source_mappings) {
            if other != node && self.arena.node(other).expansion_mode == ExpansionMode::Complete {
                for _ in 0..prefix_depth {
                    self.arena.prepend_to_path(other, OUTER);
                }
            }
        }
        for custom_root in self.custom_root_mappings {
            for _ in 0..prefix_depth {
                self.arena.prepend_custom_root(*custom_root, OUTER);
            }
        }
        self.arena.set_to_path(node, vec![INNER.to_string()]);
        self.arena.mark_complete(node);

        log::debug!(
            "Joined {} as {} join",
            navigation.qualified_name(),
            if optional { "left outer" } else { "inner" }
        );

        Ok((joined, Parameter::new(inner_name, joined_row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
entities:
  - name: Customer
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: AddressId, type: int32, nullable: true }
  - name: Address
    key: Id
    properties:
      - { name: Id, type: int32 }
  - name: Order
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: CustomerId, type: int32 }
relationships:
  - dependent: Order
    principal: Customer
    foreign_key: CustomerId
    dependent_to_principal: Customer
    principal_to_dependent: Orders
  - dependent: Customer
    principal: Address
    foreign_key: AddressId
    dependent_to_principal: Address
"#;

    fn order_tree(model: &Model) -> (NavigationArena, SourceId, NodeId, NodeId, NodeId) {
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Order");
        let root = arena.create_root(source, vec![], false);
        let customer_nav = model.find_navigation("Order", "Customer").unwrap().unwrap();
        let address_nav = model.find_navigation("Customer", "Address").unwrap().unwrap();
        let customer = arena.create_child(&customer_nav, root, false);
        let address = arena.create_child(&address_nav, customer, false);
        (arena, source, root, customer, address)
    }

    #[test]
    fn test_required_then_optional_join() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let (mut arena, source, root, customer, address) = order_tree(&model);
        let parameter = Parameter::new("o", ExprType::entity("Order"));
        let sources = [source];

        let (operand, parameter) = JoinSynthesizer::new(&model, &mut arena, &sources, &[])
            .join_pending(Expr::entity_source("Order"), parameter)
            .unwrap();

        assert!(!arena.node(customer).optional);
        assert!(arena.node(address).optional);
        assert_eq!(arena.node(customer).expansion_mode, ExpansionMode::Complete);
        assert_eq!(arena.node(address).expansion_mode, ExpansionMode::Complete);

        // Root: Outer from the inner join, then Outer.Outer from the left join.
        assert_eq!(arena.node(root).to_path, vec!["Outer", "Outer", "Outer"]);
        assert_eq!(arena.node(customer).to_path, vec!["Outer", "Outer", "Inner"]);
        assert_eq!(arena.node(address).to_path, vec!["Inner"]);

        let Expr::Call(select_many) = &operand else {
            panic!("expected SelectMany");
        };
        assert_eq!(select_many.operator, QueryOperator::SelectMany);
        let Expr::Call(group_join) = &select_many.arguments[0] else {
            panic!("expected GroupJoin");
        };
        assert_eq!(group_join.operator, QueryOperator::GroupJoin);
        let Expr::Call(join) = &group_join.arguments[0] else {
            panic!("expected Join");
        };
        assert_eq!(join.operator, QueryOperator::Join);

        assert_eq!(parameter.name, "o_Customer_Address");
        assert_eq!(parameter.ty, operand.ty().element().cloned().unwrap());
    }

    #[test]
    fn test_include_trigger_joins_not_needed_nodes() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Order");
        let root = arena.create_root(source, vec![], false);
        let customer_nav = model.find_navigation("Order", "Customer").unwrap().unwrap();
        let customer = arena.create_child(&customer_nav, root, true);
        let sources = [source];
        let parameter = Parameter::new("o", ExprType::entity("Order"));

        let mut synthesizer = JoinSynthesizer::new(&model, &mut arena, &sources, &[]);
        let (operand, parameter) = synthesizer
            .join_pending(Expr::entity_source("Order"), parameter)
            .unwrap();
        assert!(matches!(operand, Expr::EntitySource(_)));

        let (operand, _) = synthesizer
            .add_navigation_join(operand, parameter, customer, JoinTrigger::Include)
            .unwrap();
        assert!(matches!(operand, Expr::Call(ref c) if c.operator == QueryOperator::SelectMany));
        assert_eq!(arena.node(customer).expansion_mode, ExpansionMode::Complete);
        assert!(arena.node(customer).optional);
    }

    #[test]
    fn test_collection_nodes_are_skipped() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Customer");
        let root = arena.create_root(source, vec![], false);
        let orders = model.find_navigation("Customer", "Orders").unwrap().unwrap();
        let node = arena.create_child(&orders, root, false);
        let sources = [source];
        let parameter = Parameter::new("c", ExprType::entity("Customer"));

        let (operand, _) = JoinSynthesizer::new(&model, &mut arena, &sources, &[])
            .join_pending(Expr::entity_source("Customer"), parameter)
            .unwrap();
        assert!(matches!(operand, Expr::EntitySource(_)));
        assert_eq!(arena.node(node).expansion_mode, ExpansionMode::Pending);
    }
}

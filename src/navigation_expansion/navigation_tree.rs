//! Navigation tree arena.
//!
//! Every navigation hop reached from a query source is a node in a per-source
//! tree. Nodes live in one arena per expansion and are addressed by `NodeId`;
//! parent and child links are indices. State changes are one-way: optionality
//! and inclusion can only be raised, and the expansion mode only advances
//! NotNeeded -> Pending -> Complete (or straight to Complete).

use serde::Serialize;

use crate::model::entity_model::serialize_optional_navigation;
use crate::model::NavigationRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CustomRootId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ExpansionMode {
    /// Reachable, but nothing needs its value yet.
    NotNeeded,
    /// A join has to be added before the value can be read.
    Pending,
    /// Already joined into the running row.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationTreeNode {
    pub id: NodeId,
    /// `None` for a source root.
    #[serde(serialize_with = "serialize_optional_navigation")]
    pub navigation: Option<NavigationRef>,
    pub parent: Option<NodeId>,
    pub optional: bool,
    pub expansion_mode: ExpansionMode,
    pub included: bool,
    pub children: Vec<NodeId>,
    /// Every member chain, from the source parameter, that denotes this node.
    pub from_paths: Vec<Vec<String>>,
    /// Composite accessors leading to the node's value in the running row.
    pub to_path: Vec<String>,
    /// Removed from its parent by a collection rewrite.
    pub detached: bool,
}

impl NavigationTreeNode {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_collection(&self) -> bool {
        self.navigation
            .as_ref()
            .map(|n| n.is_collection())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceMapping {
    pub id: SourceId,
    pub root_entity: String,
    pub root: Option<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NavigationArena {
    nodes: Vec<NavigationTreeNode>,
    sources: Vec<SourceMapping>,
    custom_roots: Vec<Vec<String>>,
}

impl NavigationArena {
    pub fn new() -> Self {
        NavigationArena::default()
    }

    pub fn add_source(&mut self, root_entity: impl Into<String>) -> SourceId {
        let id = SourceId(self.sources.len());
        self.sources.push(SourceMapping {
            id,
            root_entity: root_entity.into(),
            root: None,
        });
        id
    }

    pub fn source(&self, id: SourceId) -> &SourceMapping {
        &self.sources[id.0]
    }

    pub fn node(&self, id: NodeId) -> &NavigationTreeNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root of `source`, created on first use. A root is Complete from the
    /// start: it is the row itself.
    pub fn create_root(&mut self, source: SourceId, from_path: Vec<String>, optional: bool) -> NodeId {
        if let Some(root) = self.sources[source.0].root {
            return root;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(NavigationTreeNode {
            id,
            navigation: None,
            parent: None,
            optional,
            expansion_mode: ExpansionMode::Complete,
            included: false,
            children: vec![],
            from_paths: vec![from_path.clone()],
            to_path: from_path,
            detached: false,
        });
        self.sources[source.0].root = Some(id);
        id
    }

    /// Child of `parent` along `navigation`, reusing an existing child for the
    /// same navigation.
    pub fn create_child(
        &mut self,
        navigation: &NavigationRef,
        parent: NodeId,
        include: bool,
    ) -> NodeId {
        let parent_from_paths: Vec<Vec<String>> = self.nodes[parent.0]
            .from_paths
            .iter()
            .map(|path| {
                let mut path = path.clone();
                path.push(navigation.name.clone());
                path
            })
            .collect();

        let existing = self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].navigation.as_ref() == Some(navigation));

        if let Some(existing) = existing {
            let node = &mut self.nodes[existing.0];
            if include {
                node.included = true;
            } else if node.expansion_mode == ExpansionMode::NotNeeded {
                node.expansion_mode = ExpansionMode::Pending;
            }
            for path in parent_from_paths {
                if !node.from_paths.contains(&path) {
                    node.from_paths.push(path);
                }
            }
            return existing;
        }

        let parent_optional = self.nodes[parent.0].optional;
        let optional = parent_optional
            || !navigation.foreign_key.is_required
            || !navigation.is_dependent_to_principal();

        let id = NodeId(self.nodes.len());
        self.nodes.push(NavigationTreeNode {
            id,
            navigation: Some(navigation.clone()),
            parent: Some(parent),
            optional,
            expansion_mode: if include {
                ExpansionMode::NotNeeded
            } else {
                ExpansionMode::Pending
            },
            included: include,
            children: vec![],
            from_paths: parent_from_paths,
            to_path: vec![],
            detached: false,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// `id` and all attached descendants, pre-order.
    pub fn flatten(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = vec![id];
        for child in &self.nodes[id.0].children {
            result.extend(self.flatten(*child));
        }
        result
    }

    /// Every node of every listed source, pre-order per source.
    pub fn flatten_sources(&self, sources: &[SourceId]) -> Vec<NodeId> {
        sources
            .iter()
            .filter_map(|s| self.sources[s.0].root)
            .flat_map(|root| self.flatten(root))
            .collect()
    }

    /// Navigation hops between the source root and `id`.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[id.0].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes[parent.0].parent;
        }
        depth
    }

    pub fn mark_pending(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        if node.expansion_mode == ExpansionMode::NotNeeded {
            node.expansion_mode = ExpansionMode::Pending;
        }
    }

    pub fn mark_complete(&mut self, id: NodeId) {
        self.nodes[id.0].expansion_mode = ExpansionMode::Complete;
    }

    pub fn mark_included(&mut self, id: NodeId) {
        self.nodes[id.0].included = true;
    }

    /// Make `id` and everything below it optional.
    pub fn mark_optional(&mut self, id: NodeId) {
        for node in self.flatten(id) {
            self.nodes[node.0].optional = true;
        }
    }

    /// Take `id` out of its parent's children.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
        self.nodes[id.0].detached = true;
    }

    pub fn set_to_path(&mut self, id: NodeId, path: Vec<String>) {
        self.nodes[id.0].to_path = path;
    }

    pub fn prepend_to_path(&mut self, id: NodeId, segment: &str) {
        self.nodes[id.0].to_path.insert(0, segment.to_string());
    }

    /// Node of `source` whose from-paths contain `path`.
    pub fn find_by_from_path(&self, source: SourceId, path: &[String]) -> Option<NodeId> {
        let root = self.sources[source.0].root?;
        self.flatten(root)
            .into_iter()
            .find(|n| self.nodes[n.0].from_paths.iter().any(|p| p == path))
    }

    pub fn add_custom_root(&mut self, path: Vec<String>) -> CustomRootId {
        let id = CustomRootId(self.custom_roots.len());
        self.custom_roots.push(path);
        id
    }

    pub fn custom_root(&self, id: CustomRootId) -> &[String] {
        &self.custom_roots[id.0]
    }

    pub fn prepend_custom_root(&mut self, id: CustomRootId, segment: &str) {
        self.custom_roots[id.0].insert(0, segment.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    const MODEL: &str = r#"
entities:
  - name: Customer
    key: Id
    properties:
      - { name: Id, type: int32 }
  - name: Address
    key: Id
    properties:
      - { name: Id, type: int32 }
  - name: Order
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: CustomerId, type: int32 }
  - name: Profile
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: CustomerId, type: int32 }
      - { name: AddressId, type: int32 }
relationships:
  - dependent: Order
    principal: Customer
    foreign_key: CustomerId
    dependent_to_principal: Customer
    principal_to_dependent: Orders
  - dependent: Profile
    principal: Customer
    foreign_key: CustomerId
    required: false
    dependent_to_principal: Customer
  - dependent: Profile
    principal: Address
    foreign_key: AddressId
    dependent_to_principal: Address
"#;

    fn nav(model: &Model, entity: &str, name: &str) -> NavigationRef {
        model.find_navigation(entity, name).unwrap().unwrap()
    }

    #[test]
    fn test_create_root_is_idempotent() {
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Order");
        let root = arena.create_root(source, vec![], false);
        assert_eq!(arena.create_root(source, vec!["x".to_string()], true), root);
        assert_eq!(arena.node(root).expansion_mode, ExpansionMode::Complete);
        assert!(arena.node(root).to_path.is_empty());
    }

    #[test]
    fn test_children_are_deduplicated() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let customer = nav(&model, "Order", "Customer");
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Order");
        let root = arena.create_root(source, vec![], false);

        let first = arena.create_child(&customer, root, false);
        let second = arena.create_child(&customer, root, false);
        assert_eq!(first, second);
        assert_eq!(arena.node(root).children.len(), 1);
        assert_eq!(arena.node(first).from_paths, vec![vec!["Customer".to_string()]]);
        assert!(!arena.node(first).optional);
        assert_eq!(arena.node(first).expansion_mode, ExpansionMode::Pending);
    }

    #[test]
    fn test_include_then_value_use_advances_mode() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let customer = nav(&model, "Order", "Customer");
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Order");
        let root = arena.create_root(source, vec![], false);

        let node = arena.create_child(&customer, root, true);
        assert_eq!(arena.node(node).expansion_mode, ExpansionMode::NotNeeded);
        assert!(arena.node(node).included);
        arena.create_child(&customer, root, false);
        assert_eq!(arena.node(node).expansion_mode, ExpansionMode::Pending);
        arena.mark_complete(node);
        arena.mark_pending(node);
        assert_eq!(arena.node(node).expansion_mode, ExpansionMode::Complete);
    }

    #[test]
    fn test_optional_parent_makes_children_optional() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Profile");
        let root = arena.create_root(source, vec![], false);

        let customer = arena.create_child(&nav(&model, "Profile", "Customer"), root, false);
        assert!(arena.node(customer).optional);
        let orders = arena.create_child(&nav(&model, "Customer", "Orders"), customer, false);
        assert!(arena.node(orders).optional);

        let address = arena.create_child(&nav(&model, "Profile", "Address"), root, false);
        assert!(!arena.node(address).optional);
        arena.mark_optional(root);
        assert!(arena.node(address).optional);
    }

    #[test]
    fn test_flatten_detach_and_lookup() {
        let model = Model::from_yaml_str(MODEL).unwrap();
        let mut arena = NavigationArena::new();
        let source = arena.add_source("Profile");
        let root = arena.create_root(source, vec![], false);
        let customer = arena.create_child(&nav(&model, "Profile", "Customer"), root, false);
        let orders = arena.create_child(&nav(&model, "Customer", "Orders"), customer, false);
        let address = arena.create_child(&nav(&model, "Profile", "Address"), root, false);

        assert_eq!(arena.flatten(root), vec![root, customer, orders, address]);
        assert_eq!(arena.depth(orders), 2);
        assert_eq!(
            arena.find_by_from_path(source, &["Customer".to_string(), "Orders".to_string()]),
            Some(orders)
        );

        arena.detach(orders);
        assert!(arena.node(orders).detached);
        assert_eq!(arena.flatten(root), vec![root, customer, address]);
        assert_eq!(arena.find_by_from_path(source, &["Customer".to_string(), "Orders".to_string()]), None);
    }
}

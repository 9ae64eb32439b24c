//! Binding Resolver
//!
//! Turns member chains that start at the current row into `NavigationBinding`
//! nodes. Each navigation segment looks up or creates the matching child in
//! the navigation tree, so two spellings of the same chain share one node and
//! therefore one join.
//!
//! Equality comparisons get a pre-pass before their operands are bound:
//!
//! - `x.Collection == null` compares the owner instead
//! - `a.Collection == b.Collection` on the same navigation compares the owners
//! - `x.Reference == null` for a dependent-to-principal navigation compares the
//!   foreign key on the owner, so no join is needed

use super::errors::{ExpansionResult, NavigationExpansionError, Pass};
use super::navigation_tree::{NavigationArena, NodeId, SourceId};
use crate::expression::key_access::create_key_access;
use crate::expression::visitors::try_map_children;
use crate::expression::{
    BinaryExpr, BinaryOperator, Expr, ExprType, MemberAccess, NavigationBinding, Parameter, INNER,
    OUTER,
};
use crate::model::{Model, Navigation, NavigationRef, ResolvedMember};

/// Static type of a binding along `navigation`.
pub(crate) fn navigation_type(navigation: &Navigation) -> ExprType {
    let target = ExprType::entity(navigation.target_entity.clone());
    match navigation.collection {
        Some(kind) => ExprType::collection(target, kind),
        None => target,
    }
}

/// Entity type at `node`: the navigation target, or the source entity for a
/// root.
pub(crate) fn node_entity(arena: &NavigationArena, node: NodeId, source: SourceId) -> String {
    match &arena.node(node).navigation {
        Some(navigation) => navigation.target_entity.clone(),
        None => arena.source(source).root_entity.clone(),
    }
}

pub struct NavigationBinder<'a> {
    model: &'a Model,
    arena: &'a mut NavigationArena,
    current_parameter: &'a Parameter,
    source_mappings: &'a [SourceId],
    include: bool,
    max_navigation_depth: usize,
}

impl<'a> NavigationBinder<'a> {
    pub fn new(
        model: &'a Model,
        arena: &'a mut NavigationArena,
        current_parameter: &'a Parameter,
        source_mappings: &'a [SourceId],
        max_navigation_depth: usize,
    ) -> Self {
        NavigationBinder {
            model,
            arena,
            current_parameter,
            source_mappings,
            include: false,
            max_navigation_depth,
        }
    }

    /// Bind for eager loading: every navigation segment is marked included
    /// instead of pending.
    pub fn include_mode(mut self) -> Self {
        self.include = true;
        self
    }

    pub fn bind(&mut self, expr: Expr) -> ExpansionResult<Expr> {
        match expr {
            Expr::NavigationBinding(_) | Expr::CustomRoot(_) | Expr::NavigationExpansion(_) => {
                Ok(expr)
            }
            Expr::Parameter(parameter) if parameter == *self.current_parameter => {
                Ok(self.bind_path(&[]).unwrap_or(Expr::Parameter(parameter)))
            }
            Expr::Member(_) => self.bind_member(expr),
            Expr::Binary(binary) if binary.op.is_equality() => self.bind_equality(binary),
            other => try_map_children(other, &mut |child| self.bind(child)),
        }
    }

    // A chain spelled directly on the current parameter, matched against the
    // recorded from-paths.
    fn bind_path(&self, path: &[String]) -> Option<Expr> {
        self.source_mappings.iter().find_map(|source| {
            let node = self.arena.find_by_from_path(*source, path)?;
            let ty = match &self.arena.node(node).navigation {
                Some(navigation) => navigation_type(navigation),
                None => ExprType::entity(self.arena.source(*source).root_entity.clone()),
            };
            Some(Expr::NavigationBinding(NavigationBinding {
                root: self.current_parameter.clone(),
                node,
                source: *source,
                ty,
            }))
        })
    }

    fn bind_member(&mut self, expr: Expr) -> ExpansionResult<Expr> {
        if expr.root_parameter() == Some(self.current_parameter) {
            if let Some(binding) = expr.member_path().and_then(|path| self.bind_path(&path)) {
                return Ok(binding);
            }
        }

        let Expr::Member(MemberAccess { target, member, ty }) = expr else {
            return Ok(expr);
        };

        match self.bind(*target)? {
            Expr::Record(mut record) => {
                match record.fields.iter().position(|(name, _)| *name == member) {
                    Some(index) => Ok(record.fields.swap_remove(index).1),
                    None => Ok(Expr::member(Expr::Record(record), member, ty)),
                }
            }
            Expr::Composite(composite) if member == OUTER => Ok(*composite.outer),
            Expr::Composite(composite) if member == INNER => Ok(*composite.inner),
            Expr::NavigationBinding(binding) => self.bind_binding_member(binding, member, ty),
            target => Ok(Expr::member(target, member, ty)),
        }
    }

    fn bind_binding_member(
        &mut self,
        binding: NavigationBinding,
        member: String,
        ty: ExprType,
    ) -> ExpansionResult<Expr> {
        // Collection members such as Count are left for the collection rewriter.
        if binding.ty.is_collection() {
            return Ok(Expr::member(Expr::NavigationBinding(binding), member, ty));
        }
        let Some(entity) = binding.entity_type().map(str::to_string) else {
            return Ok(Expr::member(Expr::NavigationBinding(binding), member, ty));
        };

        let model = self.model;
        let resolved = model
            .resolve_member(&entity, &member)
            .map_err(|e| NavigationExpansionError::from_model(Pass::Binding, e))?;

        match resolved {
            Some(ResolvedMember::Navigation(navigation)) => {
                if self.arena.depth(binding.node) + 1 > self.max_navigation_depth {
                    return Err(NavigationExpansionError::DepthExceeded {
                        pass: Pass::Binding,
                        what: "navigation chain",
                        limit: self.max_navigation_depth,
                    });
                }
                let node = self.arena.create_child(&navigation, binding.node, self.include);
                log::trace!(
                    "Bound {} to node {} (include: {})",
                    navigation.qualified_name(),
                    node,
                    self.include
                );
                Ok(Expr::NavigationBinding(NavigationBinding {
                    root: binding.root,
                    node,
                    source: binding.source,
                    ty: navigation_type(&navigation),
                }))
            }
            Some(ResolvedMember::Property(_)) | None => {
                Ok(Expr::member(Expr::NavigationBinding(binding), member, ty))
            }
        }
    }

    fn bind_equality(&mut self, binary: BinaryExpr) -> ExpansionResult<Expr> {
        let BinaryExpr { op, left, right } = binary;

        if let Some(rewritten) = self.collection_comparison(op, &left, &right) {
            return self.bind(rewritten);
        }
        if right.is_null_literal() {
            if let Some(rewritten) = self.foreign_key_null_comparison(op, &left)? {
                return Ok(rewritten);
            }
        }
        if left.is_null_literal() {
            if let Some(rewritten) = self.foreign_key_null_comparison(op, &right)? {
                return Ok(rewritten);
            }
        }

        let left = self.bind(*left)?;
        let right = self.bind(*right)?;
        Ok(Expr::binary(op, left, right))
    }

    // Owner expression and navigation of a collection member access.
    fn collection_owner(&self, expr: &Expr) -> Option<(Expr, NavigationRef)> {
        let Expr::Member(member) = expr else {
            return None;
        };
        if !member.ty.is_collection() {
            return None;
        }
        let owner_ty = member.target.ty();
        let entity = owner_ty.entity_name()?;
        let navigation = self.model.find_navigation(entity, &member.member).ok()??;
        navigation
            .is_collection()
            .then(|| ((*member.target).clone(), navigation))
    }

    fn collection_comparison(&self, op: BinaryOperator, left: &Expr, right: &Expr) -> Option<Expr> {
        match (self.collection_owner(left), self.collection_owner(right)) {
            (Some((l, left_nav)), Some((r, right_nav))) if left_nav == right_nav => {
                Some(Expr::binary(op, l, r))
            }
            (Some((l, _)), None) if right.is_null_literal() => {
                let null = Expr::null(l.ty());
                Some(Expr::binary(op, l, null))
            }
            (None, Some((r, _))) if left.is_null_literal() => {
                let null = Expr::null(r.ty());
                Some(Expr::binary(op, null, r))
            }
            _ => None,
        }
    }

    fn foreign_key_null_comparison(
        &mut self,
        op: BinaryOperator,
        operand: &Expr,
    ) -> ExpansionResult<Option<Expr>> {
        let Expr::Member(member) = operand else {
            return Ok(None);
        };
        if !matches!(member.ty, ExprType::Entity(_)) {
            return Ok(None);
        }

        let owner = self.bind((*member.target).clone())?;
        let Expr::NavigationBinding(binding) = &owner else {
            return Ok(None);
        };
        if binding.ty.is_collection() {
            return Ok(None);
        }
        let Some(entity) = binding.entity_type().map(str::to_string) else {
            return Ok(None);
        };

        let model = self.model;
        let to_model_error = |e| NavigationExpansionError::from_model(Pass::Binding, e);
        let navigation = match model.resolve_member(&entity, &member.member).map_err(to_model_error)? {
            Some(ResolvedMember::Navigation(nav))
                if nav.is_dependent_to_principal() && !nav.is_collection() =>
            {
                nav
            }
            _ => return Ok(None),
        };

        let properties = model
            .properties(&entity, &navigation.foreign_key.properties)
            .map_err(to_model_error)?;
        let add_null_check = self.arena.node(binding.node).optional;
        let key = create_key_access(&owner, &properties, add_null_check);
        log::trace!(
            "Comparing {} with null through its foreign key",
            navigation.qualified_name()
        );
        Ok(Some(null_key_comparison(op, key)))
    }
}

/// `key op null`; a composite key is null when any part is.
fn null_key_comparison(op: BinaryOperator, key: Expr) -> Expr {
    let compare = |part: Expr| {
        let null = Expr::null(part.ty().make_nullable());
        Expr::binary(op, part, null)
    };
    match key {
        Expr::Record(record) => {
            let mut parts = record.fields.into_iter().map(|(_, part)| compare(part));
            let first = match parts.next() {
                Some(first) => first,
                None => return Expr::bool(op == BinaryOperator::NotEqual),
            };
            parts.fold(first, |acc, part| {
                if op == BinaryOperator::Equal {
                    Expr::or_else(acc, part)
                } else {
                    Expr::and_also(acc, part)
                }
            })
        }
        key => compare(key),
    }
}

//! Hierarchy-aware member lookup.
//!
//! A member name is looked up on the entity and then on each base type. When
//! more than one type in the chain declares the name, every declaration has to
//! agree on what backs it; otherwise the name is ambiguous and resolution fails
//! instead of silently picking the most derived one.

use super::entity_model::{Model, NavigationRef, PropertyDef};
use super::errors::ModelError;

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedMember<'m> {
    Property(&'m PropertyDef),
    Navigation(NavigationRef),
}

impl ResolvedMember<'_> {
    fn describe(&self, declaring: &str) -> String {
        match self {
            ResolvedMember::Property(p) => {
                format!("{}.{} ({})", declaring, p.name, p.backing_member())
            }
            ResolvedMember::Navigation(n) => format!(
                "{}.{} -> {} ({})",
                declaring,
                n.name,
                n.target_entity,
                n.backing_member()
            ),
        }
    }

    fn same_backing(&self, other: &ResolvedMember<'_>) -> bool {
        match (self, other) {
            (ResolvedMember::Property(a), ResolvedMember::Property(b)) => {
                a.backing_member() == b.backing_member() && a.kind == b.kind
            }
            (ResolvedMember::Navigation(a), ResolvedMember::Navigation(b)) => {
                a.target_entity == b.target_entity
                    && a.backing_member() == b.backing_member()
                    && a.is_collection() == b.is_collection()
            }
            _ => false,
        }
    }
}

impl Model {
    /// Resolve `member` on `entity`, walking derived to base.
    ///
    /// Returns `Ok(None)` when no type in the hierarchy declares the name.
    pub fn resolve_member(
        &self,
        entity: &str,
        member: &str,
    ) -> Result<Option<ResolvedMember<'_>>, ModelError> {
        let mut found: Option<(ResolvedMember<'_>, String)> = None;

        for declaring in self.hierarchy(entity)? {
            let candidates = [
                declaring
                    .declared_property(member)
                    .map(ResolvedMember::Property),
                declaring
                    .declared_navigation(member)
                    .cloned()
                    .map(ResolvedMember::Navigation),
            ];

            for candidate in candidates.into_iter().flatten() {
                match &found {
                    None => found = Some((candidate, declaring.name.clone())),
                    Some((first, first_owner)) => {
                        if !first.same_backing(&candidate) {
                            return Err(ModelError::ConflictingBackingFields {
                                entity: entity.to_string(),
                                member: member.to_string(),
                                first: first.describe(first_owner),
                                second: candidate.describe(&declaring.name),
                            });
                        }
                    }
                }
            }
        }

        Ok(found.map(|(member, _)| member))
    }

    /// Most derived declaration of `member`, without the conflict check.
    ///
    /// Used for typing query text; binding performs the checked lookup.
    pub fn resolve_member_unchecked(
        &self,
        entity: &str,
        member: &str,
    ) -> Result<Option<ResolvedMember<'_>>, ModelError> {
        for declaring in self.hierarchy(entity)? {
            if let Some(property) = declaring.declared_property(member) {
                return Ok(Some(ResolvedMember::Property(property)));
            }
            if let Some(navigation) = declaring.declared_navigation(member) {
                return Ok(Some(ResolvedMember::Navigation(navigation.clone())));
            }
        }
        Ok(None)
    }

    /// Navigation lookup that treats a property hit as "not a navigation".
    pub fn find_navigation(
        &self,
        entity: &str,
        member: &str,
    ) -> Result<Option<NavigationRef>, ModelError> {
        match self.resolve_member(entity, member)? {
            Some(ResolvedMember::Navigation(nav)) => Ok(Some(nav)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HIERARCHY: &str = r#"
entities:
  - name: Person
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: Name, type: string, nullable: true }
  - name: Employee
    base: Person
    properties:
      - { name: Name, type: string, nullable: true }
      - { name: Badge, type: string, backing_field: _badge }
  - name: Contractor
    base: Person
    properties:
      - { name: Name, type: string, nullable: true, backing_field: _contractorName }
"#;

    #[test]
    fn test_redeclared_member_with_same_backing_resolves() {
        let model = Model::from_yaml_str(HIERARCHY).unwrap();
        let resolved = model.resolve_member("Employee", "Name").unwrap();
        assert!(matches!(resolved, Some(ResolvedMember::Property(p)) if p.name == "Name"));
    }

    #[test]
    fn test_base_member_visible_from_derived() {
        let model = Model::from_yaml_str(HIERARCHY).unwrap();
        let resolved = model.resolve_member("Employee", "Id").unwrap();
        assert!(matches!(resolved, Some(ResolvedMember::Property(p)) if p.name == "Id"));
        assert!(model.resolve_member("Employee", "Missing").unwrap().is_none());
    }

    #[test]
    fn test_conflicting_backing_fields_rejected() {
        let model = Model::from_yaml_str(HIERARCHY).unwrap();
        let err = model.resolve_member("Contractor", "Name").unwrap_err();
        assert!(err.is_conflict());
        match err {
            ModelError::ConflictingBackingFields { first, second, .. } => {
                assert!(first.contains("_contractorName"));
                assert!(second.starts_with("Person.Name"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

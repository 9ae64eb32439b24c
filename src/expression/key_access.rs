//! Key selectors and nullable coercion.
//!
//! Single-property keys read as a plain member access; composite keys read as a
//! positional record (`Item1`, `Item2`, ...) so both sides of a join compare
//! field by field whatever the property names are.

use super::{Expr, ExprType, RecordExpr};
use crate::model::PropertyDef;

/// Key selector over `target`. With `add_null_check` each part becomes
/// `target == null ? null : (T?)target.P`.
pub fn create_key_access(target: &Expr, properties: &[&PropertyDef], add_null_check: bool) -> Expr {
    if properties.len() == 1 {
        return property_access(target, properties[0], add_null_check);
    }
    Expr::Record(RecordExpr {
        fields: properties
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("Item{}", i + 1), property_access(target, p, add_null_check)))
            .collect(),
    })
}

fn property_access(target: &Expr, property: &PropertyDef, add_null_check: bool) -> Expr {
    let ty = ExprType::of_property(property);
    let member = Expr::member(target.clone(), property.name.clone(), ty.clone());
    if !add_null_check {
        return member;
    }
    let nullable = ty.make_nullable();
    let value = if ty.is_nullable() {
        member
    } else {
        Expr::convert(member, nullable.clone())
    };
    Expr::conditional(
        Expr::equal(target.clone(), Expr::null(target.ty())),
        Expr::null(nullable),
        value,
    )
}

/// Make two comparable expressions agree on nullability by lifting the
/// non-nullable side. Records are coerced field by field.
pub fn coerce_nullability(left: Expr, right: Expr) -> (Expr, Expr) {
    match (left, right) {
        (Expr::Record(l), Expr::Record(r)) if l.fields.len() == r.fields.len() => {
            let mut left_fields = Vec::with_capacity(l.fields.len());
            let mut right_fields = Vec::with_capacity(r.fields.len());
            for ((ln, lv), (rn, rv)) in l.fields.into_iter().zip(r.fields) {
                let (lv, rv) = coerce_nullability(lv, rv);
                left_fields.push((ln, lv));
                right_fields.push((rn, rv));
            }
            (
                Expr::Record(RecordExpr { fields: left_fields }),
                Expr::Record(RecordExpr { fields: right_fields }),
            )
        }
        (left, right) => {
            let (lt, rt) = (left.ty(), right.ty());
            if lt == rt || !lt.eq_ignoring_nullability(&rt) {
                (left, right)
            } else if !lt.is_nullable() {
                (Expr::convert(left, lt.make_nullable()), right)
            } else if !rt.is_nullable() {
                (left, Expr::convert(right, rt.make_nullable()))
            } else {
                (left, right)
            }
        }
    }
}

/// A null value shaped like `key`.
pub fn null_key(key: &Expr) -> Expr {
    match key {
        Expr::Record(r) => Expr::Record(RecordExpr {
            fields: r
                .fields
                .iter()
                .map(|(name, value)| (name.clone(), Expr::null(value.ty().make_nullable())))
                .collect(),
        }),
        other => Expr::null(other.ty().make_nullable()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Parameter;
    use crate::model::ScalarKind;

    fn prop(name: &str, nullable: bool) -> PropertyDef {
        PropertyDef {
            name: name.to_string(),
            kind: ScalarKind::Int32,
            nullable,
            backing_field: None,
        }
    }

    #[test]
    fn test_single_key_is_member() {
        let o = Parameter::new("o", ExprType::entity("Order"));
        let id = prop("CustomerId", false);
        let key = create_key_access(&Expr::parameter(&o), &[&id], false);
        assert_eq!(key.member_path().unwrap(), vec!["CustomerId".to_string()]);
        assert_eq!(key.ty(), ExprType::int32());
    }

    #[test]
    fn test_null_checked_key_is_nullable() {
        let o = Parameter::new("o", ExprType::entity("Order"));
        let id = prop("Id", false);
        let key = create_key_access(&Expr::parameter(&o), &[&id], true);
        assert!(matches!(key, Expr::Conditional(_)));
        assert_eq!(key.ty(), ExprType::int32().make_nullable());
    }

    #[test]
    fn test_coerce_lifts_non_nullable_side() {
        let a = Parameter::new("a", ExprType::int32());
        let b = Parameter::new("b", ExprType::int32().make_nullable());
        let (l, r) = coerce_nullability(Expr::parameter(&a), Expr::parameter(&b));
        assert!(matches!(l, Expr::Convert(_)));
        assert_eq!(l.ty(), r.ty());
    }

    #[test]
    fn test_composite_key_coerced_fieldwise() {
        let o = Parameter::new("o", ExprType::entity("Line"));
        let i = Parameter::new("i", ExprType::entity("Order"));
        let (a, b) = (prop("OrderId", true), prop("Part", false));
        let (c, d) = (prop("Id", false), prop("Part", false));
        let outer = create_key_access(&Expr::parameter(&o), &[&a, &b], false);
        let inner = create_key_access(&Expr::parameter(&i), &[&c, &d], false);
        let (outer, inner) = coerce_nullability(outer, inner);
        assert_eq!(outer.ty(), inner.ty());
        assert_eq!(null_key(&inner).ty(), inner.ty().make_nullable());
    }
}

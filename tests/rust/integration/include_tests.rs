//! Eager loading through Include / ThenInclude

use navexpand::expression::visitors::for_each_child;
use navexpand::navigation_expansion::Pass;
use navexpand::{Expr, ExpansionConfig, NavigationExpansionError};

use super::fixtures::{expand, expand_with};

#[test]
fn test_include_of_required_reference_left_joins() {
    let rendered = expand("Order.Include(o => o.Customer)").to_string();
    assert!(
        rendered.starts_with("Select(SelectMany(GroupJoin(DbSet<Order>, DbSet<Customer>"),
        "{}",
        rendered
    );
    assert!(rendered.contains("DefaultIfEmpty("), "{}", rendered);
    assert!(rendered.contains("IncludeAssign("), "{}", rendered);
    assert!(rendered.ends_with("Order.Customer))"), "{}", rendered);
}

#[test]
fn test_include_optional_reference_uses_left_join() {
    let rendered = expand("Customer.Include(c => c.Address)").to_string();
    assert!(rendered.contains("GroupJoin(DbSet<Customer>, DbSet<Address>"), "{}", rendered);
    assert!(rendered.contains("SelectMany("), "{}", rendered);
    assert!(rendered.contains("IncludeAssign("), "{}", rendered);
    assert!(rendered.ends_with("Customer.Address))"), "{}", rendered);
}

#[test]
fn test_then_include_nests_assignments() {
    let rendered = expand("Order.Include(o => o.Customer).ThenInclude(c => c.Address)").to_string();
    assert_eq!(rendered.matches("IncludeAssign(").count(), 2, "{}", rendered);
    assert!(rendered.contains("GroupJoin(DbSet<Order>, DbSet<Customer>"), "{}", rendered);
    assert_eq!(rendered.matches("GroupJoin(").count(), 2, "{}", rendered);
}

#[test]
fn test_include_after_filter_reuses_join() {
    let rendered = expand(r#"Order.Where(o => o.Customer.Name == "Alice").Include(o => o.Customer)"#)
        .to_string();
    assert_eq!(rendered.matches("Join(").count(), 1, "{}", rendered);
    assert!(!rendered.contains("GroupJoin("), "{}", rendered);
    assert!(rendered.contains("IncludeAssign("), "{}", rendered);
}

/// (navigation, navigation whose loaded value holds it) for every assignment.
fn include_shape(expr: &Expr) -> Vec<(String, Option<String>)> {
    fn collect(expr: &Expr, owner: Option<String>, out: &mut Vec<(String, Option<String>)>) {
        match expr {
            Expr::IncludeAssign(assign) => {
                let name = assign.navigation.qualified_name();
                out.push((name.clone(), owner.clone()));
                collect(&assign.entity, owner, out);
                collect(&assign.value, Some(name), out);
            }
            other => for_each_child(other, |child| collect(child, owner.clone(), out)),
        }
    }
    let mut shape = Vec::new();
    collect(expr, None, &mut shape);
    shape.sort();
    shape
}

#[test]
fn test_include_shape_ignores_include_order() {
    let filter = r#"Order.Where(o => o.Customer.Address.City == "Oslo")"#;
    let first = expand(&format!(
        "{}.Include(o => o.Customer).ThenInclude(c => c.Address).Include(o => o.ShippingAddress)",
        filter
    ));
    let second = expand(&format!(
        "{}.Include(o => o.ShippingAddress).Include(o => o.Customer).ThenInclude(c => c.Address)",
        filter
    ));

    let expected = vec![
        ("Customer.Address".to_string(), Some("Order.Customer".to_string())),
        ("Order.Customer".to_string(), None),
        ("Order.ShippingAddress".to_string(), None),
    ];
    assert_eq!(include_shape(&first), expected, "{}", first);
    assert_eq!(include_shape(&second), expected, "{}", second);
}

#[test]
fn test_joined_but_not_included_navigation_is_not_assigned() {
    let reduced = expand(
        r#"Order.Where(o => o.Customer.Address.City == "Oslo").Include(o => o.Customer).Include(o => o.ShippingAddress)"#,
    );
    assert_eq!(
        include_shape(&reduced),
        vec![
            ("Order.Customer".to_string(), None),
            ("Order.ShippingAddress".to_string(), None),
        ]
    );
}

#[test]
fn test_include_without_assignments_still_joins() {
    let config = ExpansionConfig {
        emit_include_assignments: false,
        ..Default::default()
    };
    let rendered = expand_with("Order.Include(o => o.Customer)", &config)
        .unwrap()
        .to_string();
    assert!(rendered.contains("Join(DbSet<Order>, DbSet<Customer>"), "{}", rendered);
    assert!(!rendered.contains("IncludeAssign"), "{}", rendered);
    assert!(rendered.ends_with(".Outer)"), "{}", rendered);
}

#[test]
fn test_include_ignored_for_scalar_results() {
    let rendered = expand("Order.Include(o => o.Customer).Count()").to_string();
    assert_eq!(rendered, "Count(DbSet<Order>)");
}

#[test]
fn test_collection_include_rejected() {
    let err = expand_with("Customer.Include(c => c.Orders)", &ExpansionConfig::default()).unwrap_err();
    assert_eq!(
        err,
        NavigationExpansionError::UnsupportedInclude {
            pass: Pass::IncludeBuilder,
            navigation: "Customer.Orders".to_string(),
        }
    );
}

//! End-to-end expansion of reference and collection navigations

use navexpand::expression::display::ExprTree;
use navexpand::expression::ExprType;
use navexpand::navigation_expansion::{ExpansionMode, NodeId, Pass};
use navexpand::{ExpansionConfig, NavigationExpander, NavigationExpansionError};
use test_case::test_case;

use super::fixtures::{expand, expand_with, shop_model, typed_query};

#[test]
fn test_required_reference_filter_uses_inner_join() {
    let model = shop_model();
    let query = typed_query(&model, r#"Order.Where(o => o.Customer.Name == "Alice")"#);
    let mut expander = NavigationExpander::new(&model, ExpansionConfig::default());
    let built = expander.build(&query).unwrap();

    let customer = expander.arena().node(NodeId(1));
    assert_eq!(customer.expansion_mode, ExpansionMode::Complete);
    assert!(!customer.optional);
    assert_eq!(customer.to_path, vec!["Inner".to_string()]);

    let reduced = expander.reduce(built).unwrap();
    let rendered = reduced.to_string();
    assert!(rendered.starts_with("Select(Where(Join(DbSet<Order>, DbSet<Customer>"), "{}", rendered);
    assert!(rendered.contains(r#".Inner.Name == "Alice")"#), "{}", rendered);
    assert!(rendered.ends_with(".Outer)"), "{}", rendered);
    assert!(!rendered.contains("GroupJoin"), "{}", rendered);
    assert_eq!(reduced.ty(), ExprType::sequence(ExprType::entity("Order")));
}

#[test]
fn test_optional_reference_filter_uses_left_join() {
    let rendered = expand(r#"Customer.Where(c => c.Address.City == "Oslo")"#).to_string();
    assert!(rendered.contains("GroupJoin(DbSet<Customer>, DbSet<Address>"), "{}", rendered);
    assert!(rendered.contains("DefaultIfEmpty("), "{}", rendered);
    assert!(rendered.contains("SelectMany("), "{}", rendered);
    assert!(rendered.contains(r#".Inner.City == "Oslo")"#), "{}", rendered);
    // The customer sits under two outer levels of the left join.
    assert!(rendered.ends_with(".Outer.Outer)"), "{}", rendered);
}

#[test]
fn test_repeated_navigation_joined_once() {
    let rendered = expand(
        r#"Order.Where(o => o.Customer.Name == "Alice").Select(o => o.Customer.Name)"#,
    )
    .to_string();
    assert_eq!(rendered.matches("Join(").count(), 1, "{}", rendered);
    assert!(rendered.ends_with(".Inner.Name)"), "{}", rendered);
}

#[test]
fn test_optionality_propagates_down_the_chain() {
    let model = shop_model();
    let query = typed_query(&model, "Order.Select(o => o.Customer.Address.Country.Name)");
    let mut expander = NavigationExpander::new(&model, ExpansionConfig::default());
    let built = expander.build(&query).unwrap();

    // Customer is required, Address is optional, Country is required but
    // reached through Address.
    assert!(!expander.arena().node(NodeId(1)).optional);
    assert!(expander.arena().node(NodeId(2)).optional);
    assert!(expander.arena().node(NodeId(3)).optional);

    let rendered = expander.reduce(built).unwrap().to_string();
    assert_eq!(rendered.matches("GroupJoin(").count(), 2, "{}", rendered);
    assert!(rendered.contains("Join(DbSet<Order>, DbSet<Customer>"), "{}", rendered);
}

#[test]
fn test_reference_null_check_reads_foreign_key() {
    let reduced = expand("Order.Where(o => o.Customer == null)");
    assert_eq!(reduced.to_string(), "Where(DbSet<Order>, o => (o.CustomerId == null))");
}

#[test]
fn test_collection_null_check_reads_owner() {
    let reduced = expand("Customer.Where(c => c.Orders != null)");
    assert_eq!(reduced.to_string(), "Where(DbSet<Customer>, c => (c != null))");
}

#[test]
fn test_collection_projection_becomes_correlated_subquery() {
    let reduced = expand("Customer.Select(c => c.Orders)");
    let rendered = reduced.to_string();
    assert!(rendered.contains("MaterializeCollection(Where(DbSet<Order>"), "{}", rendered);
    assert!(rendered.contains("Correlate((c != null), (c.Id == o.CustomerId))"), "{}", rendered);
    assert!(!rendered.contains("Join("), "{}", rendered);
}

#[test]
fn test_collection_count_member() {
    let reduced = expand("Customer.Select(c => c.Orders.Count)");
    assert_eq!(
        reduced.to_string(),
        "Select(DbSet<Customer>, c => Count(Where(DbSet<Order>, o => Correlate((c != null), (c.Id == o.CustomerId)))))"
    );
    assert_eq!(reduced.ty(), ExprType::sequence(ExprType::int32()));
}

#[test]
fn test_collection_any_with_predicate() {
    let rendered = expand("Customer.Where(c => c.Orders.Any(o => o.Id > 100))").to_string();
    assert!(
        rendered.contains("Any(Where(Where(DbSet<Order>, o => Correlate((c != null), (c.Id == o.CustomerId))), o => (o.Id > 100)))"),
        "{}",
        rendered
    );
}

#[test]
fn test_ordering_through_navigation_restores_order() {
    let reduced = expand("Order.OrderBy(o => o.Customer.Name)");
    let rendered = reduced.to_string();
    assert!(rendered.starts_with("AsOrdered(Select(OrderBy(Join("), "{}", rendered);
    assert!(reduced.ty().is_ordered());
}

#[test]
fn test_member_on_first_or_default() {
    let reduced = expand("Order.FirstOrDefault().Customer");
    let rendered = reduced.to_string();
    assert!(rendered.starts_with("FirstOrDefault(Select(Join("), "{}", rendered);
    assert_eq!(reduced.ty(), ExprType::entity("Customer"));
}

#[test]
fn test_explicit_join_result_reads_both_sides() {
    let reduced = expand(
        "Order.Join(Customer, o => o.CustomerId, c => c.Id, (o, c) => new { o.Id, c.Name })",
    );
    assert_eq!(
        reduced.to_string(),
        "Select(Join(DbSet<Order>, DbSet<Customer>, o => o.CustomerId, c => c.Id, (o, c) => Composite(o, c)), t => new { Id = t.Outer.Id, Name = t.Inner.Name })"
    );
}

#[test]
fn test_distinct_then_navigate() {
    let rendered = expand(r#"Order.Distinct().Where(o => o.Customer.Name == "Alice")"#).to_string();
    assert!(rendered.contains("Join(Distinct(DbSet<Order>), DbSet<Customer>"), "{}", rendered);
}

#[test]
fn test_tree_rendering_lists_join_sources() {
    let reduced = expand(r#"Order.Where(o => o.Customer.Name == "Alice")"#);
    let tree = ExprTree(&reduced).to_string();
    assert!(tree.contains("DbSet<Order>"), "{}", tree);
    assert!(tree.contains("DbSet<Customer>"), "{}", tree);
}

#[test_case(1, true ; "single hop within limit")]
#[test_case(2, true ; "two hops within limit")]
#[test_case(3, true ; "three hops within limit")]
#[test_case(2, false ; "three hops over limit")]
fn test_navigation_depth_limit(limit: usize, short_chain: bool) {
    let text = match (limit, short_chain) {
        (1, true) => "Order.Select(o => o.Customer.Name)",
        (2, true) => "Order.Select(o => o.Customer.Address.City)",
        _ => "Order.Select(o => o.Customer.Address.Country.Name)",
    };
    let config = ExpansionConfig {
        max_navigation_depth: limit,
        ..Default::default()
    };
    let result = expand_with(text, &config);
    if short_chain {
        assert!(result.is_ok(), "{:?}", result);
    } else {
        assert_eq!(
            result.unwrap_err(),
            NavigationExpansionError::DepthExceeded {
                pass: Pass::Binding,
                what: "navigation chain",
                limit: 2,
            }
        );
    }
}

#[test]
fn test_conflicting_member_in_hierarchy() {
    let model = navexpand::Model::from_yaml_str(
        r#"
entities:
  - name: Person
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: Name, type: string, nullable: true }
  - name: Contractor
    base: Person
    properties:
      - { name: Name, type: string, nullable: true, backing_field: _contractorName }
"#,
    )
    .unwrap();
    let query = typed_query(&model, r#"Contractor.Where(c => c.Name == "Bob")"#);
    let err = navexpand::expand_navigations(&query, &model, &ExpansionConfig::default()).unwrap_err();
    assert!(
        matches!(err, NavigationExpansionError::ConflictingBinding { pass: Pass::Binding, .. }),
        "{:?}",
        err
    );
}

#[test]
fn test_collection_contains_becomes_any() {
    let rendered = expand("Order.Where(o => o.Customer.Orders.Contains(o))").to_string();
    assert!(rendered.contains("Any(Where(Where(DbSet<Order>"), "{}", rendered);
    assert!(
        rendered.contains("Correlate((o_Customer.Inner != null), (o_Customer.Inner.Id == o.CustomerId))"),
        "{}",
        rendered
    );
    assert!(rendered.contains("(o == o_Customer.Outer)"), "{}", rendered);
    // Join rows are named apart from member access.
    assert!(!rendered.contains("o.Customer."), "{}", rendered);
}

const WAREHOUSE_MODEL: &str = r#"
entities:
  - name: Warehouse
    key: [Region, Code]
    properties:
      - { name: Region, type: string }
      - { name: Code, type: int32 }
  - name: Shipment
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: WarehouseRegion, type: string, nullable: true }
      - { name: WarehouseCode, type: int32, nullable: true }
relationships:
  - dependent: Shipment
    principal: Warehouse
    foreign_key: [WarehouseRegion, WarehouseCode]
    dependent_to_principal: Warehouse
"#;

#[test_case("==", "((s.WarehouseRegion == null) || (s.WarehouseCode == null))" ; "any part null")]
#[test_case("!=", "((s.WarehouseRegion != null) && (s.WarehouseCode != null))" ; "every part set")]
fn test_composite_foreign_key_null_check(op: &str, predicate: &str) {
    let model = navexpand::Model::from_yaml_str(WAREHOUSE_MODEL).unwrap();
    let query = typed_query(&model, &format!("Shipment.Where(s => s.Warehouse {} null)", op));
    let reduced = navexpand::expand_navigations(&query, &model, &ExpansionConfig::default()).unwrap();
    assert_eq!(
        reduced.to_string(),
        format!("Where(DbSet<Shipment>, s => {})", predicate)
    );
}

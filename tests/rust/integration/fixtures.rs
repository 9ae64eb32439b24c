use navexpand::expression::ast_conversion::convert_query;
use navexpand::query_parser::parse_query;
use navexpand::{expand_navigations, Expr, ExpansionConfig, Model, NavigationExpansionError};

/// Customers place orders and optionally have an address; orders may name a
/// shipping address; every address is in a country.
pub const SHOP_MODEL: &str = r#"
entities:
  - name: Customer
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: Name, type: string }
      - { name: AddressId, type: int32, nullable: true }
  - name: Address
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: City, type: string }
      - { name: CountryId, type: int32 }
  - name: Country
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: Name, type: string }
  - name: Order
    key: Id
    properties:
      - { name: Id, type: int32 }
      - { name: CustomerId, type: int32 }
      - { name: Total, type: decimal }
      - { name: ShippingAddressId, type: int32, nullable: true }
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
  - dependent: Order
    principal: Address
    foreign_key: ShippingAddressId
    dependent_to_principal: ShippingAddress
  - dependent: Address
    principal: Country
    foreign_key: CountryId
    dependent_to_principal: Country
"#;

pub fn shop_model() -> Model {
    Model::from_yaml_str(SHOP_MODEL).expect("shop model should load")
}

/// Parse and type `text` against `model`.
pub fn typed_query(model: &Model, text: &str) -> Expr {
    let parsed = parse_query(text).expect("query should parse");
    convert_query(model, &parsed).expect("query should type-check")
}

pub fn expand_with(text: &str, config: &ExpansionConfig) -> Result<Expr, NavigationExpansionError> {
    let model = shop_model();
    let query = typed_query(&model, text);
    expand_navigations(&query, &model, config)
}

pub fn expand(text: &str) -> Expr {
    expand_with(text, &ExpansionConfig::default()).expect("expansion should succeed")
}

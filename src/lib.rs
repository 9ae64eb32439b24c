//! navexpand - Navigation expansion for LINQ-style entity queries
//!
//! This crate rewrites queries that traverse entity navigations into queries
//! over flat entity sources through:
//! - Entity model definitions loaded from YAML
//! - A query text front end typed against the model
//! - Navigation binding, join synthesis and correlated collection subqueries
//! - Eager loading of reference navigations

pub mod config;
pub mod expression;
pub mod model;
pub mod navigation_expansion;
pub mod query_parser;

pub use config::ExpansionConfig;
pub use expression::{Expr, ExprType, QueryOperator};
pub use model::Model;
pub use navigation_expansion::{expand_navigations, NavigationExpander, NavigationExpansionError};

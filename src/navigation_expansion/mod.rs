//! Navigation Expansion
//!
//! This module rewrites queries that read related entities through
//! navigations (`o.Customer.Name`, `c.Orders.Count`, `Include(o => o.Customer)`)
//! into queries over flat entity sources joined on their foreign keys.
//!
//! ## Architecture Overview
//!
//! Expansion runs in two phases:
//!
//! 1. **Build** - [`NavigationExpander`] walks the query bottom-up and turns
//!    each entity source into a [`NavigationExpansion`] wrapper. Operators on a
//!    wrapper are folded into its deferred [`ExpansionState`]. Lambda bodies are
//!    bound to navigation tree nodes, collection navigations become correlated
//!    subqueries and pending reference navigations are joined in.
//! 2. **Reduce** - the reducer lowers every expansion-only node back to plain
//!    operator calls and member paths, and runs the include builder for
//!    queries that still project entities.
//!
//! ## Module Structure
//!
//! - `navigation_tree` - Arena of navigation tree nodes, sources and custom roots
//! - `state` - Deferred query state and the wrapper node
//! - `binding` - Binds member chains to tree nodes
//! - `join_synthesizer` - Emits inner and left joins for pending navigations
//! - `collection_rewriter` - Correlated subqueries for collection navigations
//! - `include_builder` - Eager-load joins and include markers
//! - `reducer` - Lowers expansion-only nodes
//! - `expander` - Operator processing
//! - `errors` - Expansion errors tagged with the pass that raised them

pub mod binding;
pub mod collection_rewriter;
pub mod errors;
pub mod expander;
pub mod include_builder;
pub mod join_synthesizer;
pub mod navigation_tree;
pub mod reducer;
pub mod state;

pub use errors::{ExpansionResult, NavigationExpansionError, Pass};
pub use expander::NavigationExpander;
pub use navigation_tree::{CustomRootId, ExpansionMode, NavigationArena, NodeId, SourceId};
pub use reducer::ReduceScope;
pub use state::{ExpansionState, NavigationExpansion, PendingCardinality, PendingOrdering};

use crate::config::ExpansionConfig;
use crate::expression::{Expr, ExprType};
use crate::model::Model;

/// Expand every navigation in `query` and reduce the result to plain
/// operator calls over entity sources.
pub fn expand_navigations(
    query: &Expr,
    model: &Model,
    config: &ExpansionConfig,
) -> ExpansionResult<Expr> {
    let mut expander = NavigationExpander::new(model, config.clone());
    let built = expander.build(query)?;
    expander.reduce(built)
}

/// Name for a lambda parameter ranging over `ty`.
pub(crate) fn parameter_name(ty: &ExprType) -> String {
    match ty {
        ExprType::Entity(name) => name
            .chars()
            .next()
            .map(|c| c.to_lowercase().to_string())
            .unwrap_or_else(|| "x".to_string()),
        _ => "x".to_string(),
    }
}

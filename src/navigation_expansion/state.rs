use serde::Serialize;

use super::navigation_tree::{CustomRootId, SourceId};
use crate::expression::{Expr, ExprType, Lambda, NavigationBinding, Parameter, QueryOperator};
use crate::model::entity_model::serialize_optional_navigation;
use crate::model::NavigationRef;

/// Ordering registered but not yet applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingOrdering {
    pub operator: QueryOperator,
    pub key_selector: Lambda,
}

/// Cardinality-reducing operator laid down at the end of the reduction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingCardinality {
    pub operator: QueryOperator,
    /// All's predicate or Contains' item, already reduced.
    pub argument: Option<Expr>,
}

/// Deferred state of one in-flight query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpansionState {
    /// Names the current row of the operand.
    pub current_parameter: Parameter,
    pub source_mappings: Vec<SourceId>,
    pub pending_selector: Lambda,
    pub apply_pending_selector: bool,
    pub pending_orderings: Vec<PendingOrdering>,
    pub pending_include_chain: Option<NavigationBinding>,
    pub pending_cardinality: Option<PendingCardinality>,
    pub custom_root_mappings: Vec<CustomRootId>,
    #[serde(serialize_with = "serialize_optional_navigation")]
    pub materialize_collection: Option<NavigationRef>,
}

impl ExpansionState {
    /// Fresh state whose selector returns the row unchanged.
    pub fn new(current_parameter: Parameter, source_mappings: Vec<SourceId>, selector_body: Expr) -> Self {
        ExpansionState {
            pending_selector: Lambda::unary(current_parameter.clone(), selector_body),
            current_parameter,
            source_mappings,
            apply_pending_selector: false,
            pending_orderings: vec![],
            pending_include_chain: None,
            pending_cardinality: None,
            custom_root_mappings: vec![],
            materialize_collection: None,
        }
    }

    pub fn has_pending_work(&self) -> bool {
        self.apply_pending_selector
            || self.pending_cardinality.is_some()
            || self.materialize_collection.is_some()
            || !self.pending_orderings.is_empty()
    }

    pub fn cardinality_operator(&self) -> Option<QueryOperator> {
        self.pending_cardinality.as_ref().map(|c| c.operator)
    }
}

/// Query operand paired with its deferred state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationExpansion {
    pub operand: Expr,
    pub state: ExpansionState,
    pub return_type: ExprType,
}

impl NavigationExpansion {
    pub fn new(operand: Expr, state: ExpansionState, return_type: ExprType) -> Self {
        NavigationExpansion {
            operand,
            state,
            return_type,
        }
    }

    pub fn into_expr(self) -> Expr {
        Expr::NavigationExpansion(Box::new(self))
    }

    /// Rewrite every expression held by the wrapper: the operand, the pending
    /// selector body, ordering key bodies and the cardinality argument.
    pub fn try_map_expressions<E, F>(self, f: &mut F) -> Result<Self, E>
    where
        F: FnMut(Expr) -> Result<Expr, E>,
    {
        let NavigationExpansion {
            operand,
            mut state,
            return_type,
        } = self;

        let operand = f(operand)?;
        state.pending_selector = Lambda {
            parameters: state.pending_selector.parameters,
            body: Box::new(f(*state.pending_selector.body)?),
        };
        state.pending_orderings = state
            .pending_orderings
            .into_iter()
            .map(|ordering| {
                Ok(PendingOrdering {
                    operator: ordering.operator,
                    key_selector: Lambda {
                        parameters: ordering.key_selector.parameters,
                        body: Box::new(f(*ordering.key_selector.body)?),
                    },
                })
            })
            .collect::<Result<_, E>>()?;
        if let Some(cardinality) = state.pending_cardinality.as_mut() {
            if let Some(argument) = cardinality.argument.take() {
                cardinality.argument = Some(f(argument)?);
            }
        }

        Ok(NavigationExpansion {
            operand,
            state,
            return_type,
        })
    }
}

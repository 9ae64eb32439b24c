/// Sequence operator registry.
///
/// One descriptor per supported operator shape, grouped by name. The table is
/// built once and only read afterwards; lookups go through
/// `lookup_operator(name, arity)` where arity counts the source argument.
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum QueryOperator {
    Where,
    Select,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Join,
    GroupJoin,
    SelectMany,
    DefaultIfEmpty,
    Take,
    Skip,
    Distinct,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Any,
    All,
    Count,
    Contains,
    Include,
    ThenInclude,
    AsOrdered,
    /// `List<T>.Exists(predicate)` on a collection-valued member.
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Filter,
    Projection,
    Ordering,
    Join,
    Flatten,
    Paging,
    SetOperation,
    CardinalityReducing,
    EagerLoad,
    ShapeCoercion,
}

/// Operator descriptor entry
#[derive(Debug, Clone)]
pub struct OperatorDescriptor {
    pub operator: QueryOperator,
    pub name: &'static str,
    /// Argument count including the source
    pub arity: usize,
    /// Argument positions that hold lambdas
    pub lambda_arguments: &'static [usize],
    /// Generic shape, for diagnostics
    pub generic_pattern: &'static str,
    pub kind: OperatorKind,
}

impl QueryOperator {
    pub fn name(&self) -> &'static str {
        match self {
            QueryOperator::Where => "Where",
            QueryOperator::Select => "Select",
            QueryOperator::OrderBy => "OrderBy",
            QueryOperator::OrderByDescending => "OrderByDescending",
            QueryOperator::ThenBy => "ThenBy",
            QueryOperator::ThenByDescending => "ThenByDescending",
            QueryOperator::Join => "Join",
            QueryOperator::GroupJoin => "GroupJoin",
            QueryOperator::SelectMany => "SelectMany",
            QueryOperator::DefaultIfEmpty => "DefaultIfEmpty",
            QueryOperator::Take => "Take",
            QueryOperator::Skip => "Skip",
            QueryOperator::Distinct => "Distinct",
            QueryOperator::First => "First",
            QueryOperator::FirstOrDefault => "FirstOrDefault",
            QueryOperator::Single => "Single",
            QueryOperator::SingleOrDefault => "SingleOrDefault",
            QueryOperator::Any => "Any",
            QueryOperator::All => "All",
            QueryOperator::Count => "Count",
            QueryOperator::Contains => "Contains",
            QueryOperator::Include => "Include",
            QueryOperator::ThenInclude => "ThenInclude",
            QueryOperator::AsOrdered => "AsOrdered",
            QueryOperator::Exists => "Exists",
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            QueryOperator::OrderBy
                | QueryOperator::OrderByDescending
                | QueryOperator::ThenBy
                | QueryOperator::ThenByDescending
        )
    }

    /// Operators that collapse a sequence to one element or a scalar.
    pub fn is_cardinality_reducing(&self) -> bool {
        matches!(
            self,
            QueryOperator::First
                | QueryOperator::FirstOrDefault
                | QueryOperator::Single
                | QueryOperator::SingleOrDefault
                | QueryOperator::Any
                | QueryOperator::All
                | QueryOperator::Count
                | QueryOperator::Contains
        )
    }

    /// First/Single family: the result is an element of the sequence.
    pub fn returns_element(&self) -> bool {
        matches!(
            self,
            QueryOperator::First
                | QueryOperator::FirstOrDefault
                | QueryOperator::Single
                | QueryOperator::SingleOrDefault
        )
    }

    pub fn is_or_default(&self) -> bool {
        matches!(
            self,
            QueryOperator::FirstOrDefault | QueryOperator::SingleOrDefault
        )
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Get the descriptor for an operator name and argument count
pub fn lookup_operator(name: &str, arity: usize) -> Option<&'static OperatorDescriptor> {
    OPERATOR_REGISTRY
        .get(name)
        .and_then(|shapes| shapes.iter().find(|d| d.arity == arity))
}

/// Descriptor for an operator variant, preferring the smallest arity.
pub fn descriptor_of(operator: QueryOperator) -> Option<&'static OperatorDescriptor> {
    OPERATOR_REGISTRY
        .get(operator.name())
        .and_then(|shapes| shapes.iter().min_by_key(|d| d.arity))
}

/// All names that have at least one registered shape.
pub fn is_known_operator(name: &str) -> bool {
    OPERATOR_REGISTRY.contains_key(name)
}

// Static operator table
lazy_static::lazy_static! {
    static ref OPERATOR_REGISTRY: HashMap<&'static str, Vec<OperatorDescriptor>> = {
        let mut m: HashMap<&'static str, Vec<OperatorDescriptor>> = HashMap::new();
        let mut add = |operator: QueryOperator,
                       arity: usize,
                       lambda_arguments: &'static [usize],
                       generic_pattern: &'static str,
                       kind: OperatorKind| {
            m.entry(operator.name()).or_default().push(OperatorDescriptor {
                operator,
                name: operator.name(),
                arity,
                lambda_arguments,
                generic_pattern,
                kind,
            });
        };

        // ===== FILTERING / PROJECTION =====
        add(QueryOperator::Where, 2, &[1], "IQueryable<T>, T -> bool => IQueryable<T>", OperatorKind::Filter);
        add(QueryOperator::Select, 2, &[1], "IQueryable<T>, T -> R => IQueryable<R>", OperatorKind::Projection);

        // ===== ORDERING =====
        add(QueryOperator::OrderBy, 2, &[1], "IQueryable<T>, T -> K => IOrderedQueryable<T>", OperatorKind::Ordering);
        add(QueryOperator::OrderByDescending, 2, &[1], "IQueryable<T>, T -> K => IOrderedQueryable<T>", OperatorKind::Ordering);
        add(QueryOperator::ThenBy, 2, &[1], "IOrderedQueryable<T>, T -> K => IOrderedQueryable<T>", OperatorKind::Ordering);
        add(QueryOperator::ThenByDescending, 2, &[1], "IOrderedQueryable<T>, T -> K => IOrderedQueryable<T>", OperatorKind::Ordering);

        // ===== JOINS =====
        add(QueryOperator::Join, 5, &[2, 3, 4], "IQueryable<O>, IQueryable<I>, O -> K, I -> K, (O, I) -> R => IQueryable<R>", OperatorKind::Join);
        add(QueryOperator::GroupJoin, 5, &[2, 3, 4], "IQueryable<O>, IQueryable<I>, O -> K, I -> K, (O, IEnumerable<I>) -> R => IQueryable<R>", OperatorKind::Join);
        add(QueryOperator::SelectMany, 3, &[1, 2], "IQueryable<T>, T -> IEnumerable<C>, (T, C) -> R => IQueryable<R>", OperatorKind::Flatten);
        add(QueryOperator::DefaultIfEmpty, 1, &[], "IQueryable<T> => IQueryable<T>", OperatorKind::Flatten);

        // ===== PAGING / SET =====
        add(QueryOperator::Take, 2, &[], "IQueryable<T>, int => IQueryable<T>", OperatorKind::Paging);
        add(QueryOperator::Skip, 2, &[], "IQueryable<T>, int => IQueryable<T>", OperatorKind::Paging);
        add(QueryOperator::Distinct, 1, &[], "IQueryable<T> => IQueryable<T>", OperatorKind::SetOperation);

        // ===== CARDINALITY REDUCING =====
        for op in [
            QueryOperator::First,
            QueryOperator::FirstOrDefault,
            QueryOperator::Single,
            QueryOperator::SingleOrDefault,
        ] {
            add(op, 1, &[], "IQueryable<T> => T", OperatorKind::CardinalityReducing);
            add(op, 2, &[1], "IQueryable<T>, T -> bool => T", OperatorKind::CardinalityReducing);
        }
        add(QueryOperator::Any, 1, &[], "IQueryable<T> => bool", OperatorKind::CardinalityReducing);
        add(QueryOperator::Any, 2, &[1], "IQueryable<T>, T -> bool => bool", OperatorKind::CardinalityReducing);
        add(QueryOperator::All, 2, &[1], "IQueryable<T>, T -> bool => bool", OperatorKind::CardinalityReducing);
        add(QueryOperator::Count, 1, &[], "IQueryable<T> => int", OperatorKind::CardinalityReducing);
        add(QueryOperator::Count, 2, &[1], "IQueryable<T>, T -> bool => int", OperatorKind::CardinalityReducing);
        add(QueryOperator::Contains, 2, &[], "IQueryable<T>, T => bool", OperatorKind::CardinalityReducing);
        add(QueryOperator::Exists, 2, &[1], "List<T>, T -> bool => bool", OperatorKind::CardinalityReducing);

        // ===== EAGER LOADING =====
        add(QueryOperator::Include, 2, &[1], "IQueryable<T>, T -> P => IIncludableQueryable<T, P>", OperatorKind::EagerLoad);
        add(QueryOperator::ThenInclude, 2, &[1], "IIncludableQueryable<T, P>, P -> Q => IIncludableQueryable<T, Q>", OperatorKind::EagerLoad);

        // ===== SHAPE =====
        add(QueryOperator::AsOrdered, 1, &[], "IQueryable<T> => IOrderedQueryable<T>", OperatorKind::ShapeCoercion);

        m
    };
}

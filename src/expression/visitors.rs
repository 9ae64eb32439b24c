//! Expression Visitor Pattern
//!
//! Traversal helpers shared by the expansion passes:
//!
//! - `ExprVisitor` + `walk_expr` for read-only walks with selective hooks
//! - `try_map_children` for rebuilding a node with its direct children rewritten
//! - `replace_parameter` for substituting a parameter everywhere below a node
//!
//! # Example
//!
//! ```ignore
//! struct BindingCollector { bindings: Vec<NavigationBinding> }
//!
//! impl ExprVisitor for BindingCollector {
//!     fn visit_binding(&mut self, binding: &NavigationBinding) {
//!         self.bindings.push(binding.clone());
//!     }
//! }
//! ```

use std::convert::Infallible;

use super::{
    BinaryExpr, CompositeExpr, Conditional, Convert, CorrelationPredicate, Expr, IncludeAssign,
    IncludeExpr, Lambda, MaterializeCollection, MemberAccess, NavigationBinding, OperatorCall,
    Parameter, RecordExpr,
};
use crate::navigation_expansion::state::NavigationExpansion;

/// Trait for visiting Expr nodes.
///
/// `visit_node` runs for every node before the specific hook; returning
/// `false` skips that node's children.
pub trait ExprVisitor {
    fn visit_node(&mut self, _expr: &Expr) -> bool {
        true
    }

    fn visit_parameter(&mut self, _parameter: &Parameter) {}

    fn visit_binding(&mut self, _binding: &NavigationBinding) {}

    fn visit_call(&mut self, _call: &OperatorCall) {}

    /// Whether to descend into a nested navigation expansion.
    fn visit_expansion(&mut self, _expansion: &NavigationExpansion) -> bool {
        true
    }
}

/// Walk an expression tree, calling visitor hooks for each node.
pub fn walk_expr<V: ExprVisitor>(expr: &Expr, visitor: &mut V) {
    if !visitor.visit_node(expr) {
        return;
    }
    match expr {
        Expr::Parameter(p) => visitor.visit_parameter(p),
        Expr::NavigationBinding(b) => {
            visitor.visit_binding(b);
            visitor.visit_parameter(&b.root);
        }
        Expr::CustomRoot(c) => visitor.visit_parameter(&c.root),
        Expr::Call(c) => {
            visitor.visit_call(c);
            for argument in &c.arguments {
                walk_expr(argument, visitor);
            }
        }
        Expr::NavigationExpansion(n) => {
            if visitor.visit_expansion(n) {
                walk_expr(&n.operand, visitor);
                walk_expr(&n.state.pending_selector.body, visitor);
                for ordering in &n.state.pending_orderings {
                    walk_expr(&ordering.key_selector.body, visitor);
                }
                if let Some(argument) = n
                    .state
                    .pending_cardinality
                    .as_ref()
                    .and_then(|c| c.argument.as_ref())
                {
                    walk_expr(argument, visitor);
                }
            }
        }
        other => for_each_child(other, |child| walk_expr(child, visitor)),
    }
}

/// Direct children of a node, excluding nested expansion internals.
pub fn for_each_child<'e, F: FnMut(&'e Expr)>(expr: &'e Expr, mut f: F) {
    match expr {
        Expr::Parameter(_)
        | Expr::Literal(_)
        | Expr::EntitySource(_)
        | Expr::NavigationBinding(_)
        | Expr::CustomRoot(_)
        | Expr::NavigationExpansion(_) => {}
        Expr::Member(m) => f(&m.target),
        Expr::Binary(b) => {
            f(&b.left);
            f(&b.right);
        }
        Expr::Not(e) => f(e),
        Expr::Convert(c) => f(&c.operand),
        Expr::Conditional(c) => {
            f(&c.test);
            f(&c.if_true);
            f(&c.if_false);
        }
        Expr::Lambda(l) => f(&l.body),
        Expr::Record(r) => r.fields.iter().for_each(|(_, v)| f(v)),
        Expr::Composite(c) => {
            f(&c.outer);
            f(&c.inner);
        }
        Expr::Call(c) => c.arguments.iter().for_each(f),
        Expr::MaterializeCollection(m) => f(&m.source),
        Expr::IncludeAssign(i) => {
            f(&i.entity);
            f(&i.value);
        }
        Expr::Include(i) => {
            f(&i.caller);
            f(&i.included);
        }
        Expr::CorrelationPredicate(c) => {
            f(&c.null_guard);
            f(&c.equality);
        }
    }
}

/// Rebuild `expr` with every direct child passed through `f`.
///
/// Nested navigation expansions are descended into: their operand, pending
/// selector body, ordering key bodies and cardinality argument are mapped.
/// Lambda parameter lists are kept as they are.
pub fn try_map_children<E, F>(expr: Expr, f: &mut F) -> Result<Expr, E>
where
    F: FnMut(Expr) -> Result<Expr, E>,
{
    Ok(match expr {
        leaf @ (Expr::Parameter(_)
        | Expr::Literal(_)
        | Expr::EntitySource(_)
        | Expr::NavigationBinding(_)
        | Expr::CustomRoot(_)) => leaf,
        Expr::Member(m) => Expr::Member(MemberAccess {
            target: Box::new(f(*m.target)?),
            member: m.member,
            ty: m.ty,
        }),
        Expr::Binary(b) => Expr::Binary(BinaryExpr {
            op: b.op,
            left: Box::new(f(*b.left)?),
            right: Box::new(f(*b.right)?),
        }),
        Expr::Not(e) => Expr::Not(Box::new(f(*e)?)),
        Expr::Convert(c) => Expr::Convert(Convert {
            operand: Box::new(f(*c.operand)?),
            ty: c.ty,
        }),
        Expr::Conditional(c) => Expr::Conditional(Conditional {
            test: Box::new(f(*c.test)?),
            if_true: Box::new(f(*c.if_true)?),
            if_false: Box::new(f(*c.if_false)?),
        }),
        Expr::Lambda(l) => Expr::Lambda(Lambda {
            parameters: l.parameters,
            body: Box::new(f(*l.body)?),
        }),
        Expr::Record(r) => Expr::Record(RecordExpr {
            fields: r
                .fields
                .into_iter()
                .map(|(name, value)| Ok((name, f(value)?)))
                .collect::<Result<_, E>>()?,
        }),
        Expr::Composite(c) => Expr::Composite(CompositeExpr {
            outer: Box::new(f(*c.outer)?),
            inner: Box::new(f(*c.inner)?),
        }),
        Expr::Call(c) => Expr::Call(OperatorCall {
            operator: c.operator,
            arguments: c
                .arguments
                .into_iter()
                .map(&mut *f)
                .collect::<Result<_, E>>()?,
            ty: c.ty,
        }),
        Expr::MaterializeCollection(m) => Expr::MaterializeCollection(MaterializeCollection {
            source: Box::new(f(*m.source)?),
            navigation: m.navigation,
        }),
        Expr::IncludeAssign(i) => Expr::IncludeAssign(IncludeAssign {
            entity: Box::new(f(*i.entity)?),
            value: Box::new(f(*i.value)?),
            navigation: i.navigation,
        }),
        Expr::Include(i) => Expr::Include(IncludeExpr {
            caller: Box::new(f(*i.caller)?),
            included: Box::new(f(*i.included)?),
            navigation: i.navigation,
        }),
        Expr::CorrelationPredicate(c) => Expr::CorrelationPredicate(CorrelationPredicate {
            null_guard: Box::new(f(*c.null_guard)?),
            equality: Box::new(f(*c.equality)?),
        }),
        Expr::NavigationExpansion(n) => {
            Expr::NavigationExpansion(Box::new(n.try_map_expressions(f)?))
        }
    })
}

fn infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Infallible `try_map_children`.
pub fn map_children<F>(expr: Expr, f: &mut F) -> Expr
where
    F: FnMut(Expr) -> Expr,
{
    infallible(try_map_children(expr, &mut |e| Ok::<_, Infallible>(f(e))))
}

/// Substitute `with` for every use of `from` below `expr`.
///
/// When `with` is itself a parameter, navigation bindings and custom roots
/// rooted at `from` are retargeted as well.
pub fn replace_parameter(expr: Expr, from: &Parameter, with: &Expr) -> Expr {
    match expr {
        Expr::Parameter(p) if p == *from => with.clone(),
        Expr::NavigationBinding(mut b) if b.root == *from => {
            if let Expr::Parameter(to) = with {
                b.root = to.clone();
            }
            Expr::NavigationBinding(b)
        }
        Expr::CustomRoot(mut c) if c.root == *from => {
            if let Expr::Parameter(to) = with {
                c.root = to.clone();
            }
            Expr::CustomRoot(c)
        }
        other => map_children(other, &mut |child| replace_parameter(child, from, with)),
    }
}

/// Bindings reachable from `expr` without entering nested expansions.
pub fn collect_bindings(expr: &Expr) -> Vec<NavigationBinding> {
    struct Collector {
        bindings: Vec<NavigationBinding>,
    }

    impl ExprVisitor for Collector {
        fn visit_binding(&mut self, binding: &NavigationBinding) {
            self.bindings.push(binding.clone());
        }

        fn visit_expansion(&mut self, _expansion: &NavigationExpansion) -> bool {
            false
        }
    }

    let mut collector = Collector { bindings: vec![] };
    walk_expr(expr, &mut collector);
    collector.bindings
}

/// First expansion-only node kind left anywhere in `expr`.
pub fn find_unreduced(expr: &Expr) -> Option<&'static str> {
    struct Finder {
        found: Option<&'static str>,
    }

    impl ExprVisitor for Finder {
        fn visit_node(&mut self, expr: &Expr) -> bool {
            if self.found.is_none() && expr.is_expansion_only() {
                self.found = Some(expr.kind_name());
            }
            self.found.is_none()
        }
    }

    let mut finder = Finder { found: None };
    walk_expr(expr, &mut finder);
    finder.found
}

/// Whether `parameter` is used anywhere below `expr`.
pub fn references_parameter(expr: &Expr, parameter: &Parameter) -> bool {
    struct Finder<'p> {
        target: &'p Parameter,
        found: bool,
    }

    impl ExprVisitor for Finder<'_> {
        fn visit_node(&mut self, _expr: &Expr) -> bool {
            !self.found
        }

        fn visit_parameter(&mut self, parameter: &Parameter) {
            if parameter == self.target {
                self.found = true;
            }
        }
    }

    let mut finder = Finder {
        target: parameter,
        found: false,
    };
    walk_expr(expr, &mut finder);
    finder.found
}

use std::fmt;

use super::{BinaryOperator, Expr, LiteralValue, QueryOperator};
use crate::navigation_expansion::navigation_tree::{CustomRootId, NodeId};

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::AndAlso => "&&",
            BinaryOperator::OrElse => "||",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
        };
        write!(f, "{}", symbol)
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Null => write!(f, "null"),
            LiteralValue::Bool(b) => write!(f, "{}", b),
            LiteralValue::Int(i) => write!(f, "{}", i),
            LiteralValue::Float(x) => write!(f, "{}", x),
            LiteralValue::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for CustomRootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Single-line, C#-flavoured rendering.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Parameter(p) => write!(f, "{}", p.name),
            Expr::Literal(l) => write!(f, "{}", l.value),
            Expr::Member(m) => write!(f, "{}.{}", m.target, m.member),
            Expr::Binary(b) => write!(f, "({} {} {})", b.left, b.op, b.right),
            Expr::Not(e) => write!(f, "!{}", e),
            Expr::Convert(c) => write!(f, "({}){}", c.ty, c.operand),
            Expr::Conditional(c) => write!(f, "({} ? {} : {})", c.test, c.if_true, c.if_false),
            Expr::Lambda(l) => {
                if l.parameters.len() == 1 {
                    write!(f, "{} => {}", l.parameters[0].name, l.body)
                } else {
                    let names: Vec<&str> = l.parameters.iter().map(|p| p.name.as_str()).collect();
                    write!(f, "({}) => {}", names.join(", "), l.body)
                }
            }
            Expr::Record(r) => {
                write!(f, "new {{ ")?;
                for (i, (name, value)) in r.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", name, value)?;
                }
                write!(f, " }}")
            }
            Expr::Composite(c) => write!(f, "Composite({}, {})", c.outer, c.inner),
            Expr::EntitySource(s) => write!(f, "DbSet<{}>", s.entity),
            Expr::Call(c) => {
                write!(f, "{}(", c.operator)?;
                write_list(f, &c.arguments)?;
                write!(f, ")")
            }
            Expr::MaterializeCollection(m) => write!(
                f,
                "MaterializeCollection({}, {})",
                m.source,
                m.navigation.qualified_name()
            ),
            Expr::IncludeAssign(i) => write!(
                f,
                "IncludeAssign({}, {}, {})",
                i.entity,
                i.value,
                i.navigation.qualified_name()
            ),
            Expr::NavigationExpansion(n) => write!(
                f,
                "Expansion({} | {})",
                n.operand,
                Expr::Lambda(n.state.pending_selector.clone())
            ),
            Expr::NavigationBinding(b) => write!(f, "Binding({}, {})", b.root.name, b.node),
            Expr::Include(i) => write!(
                f,
                "{}.Include({}, {})",
                i.caller,
                i.included,
                i.navigation.qualified_name()
            ),
            Expr::CorrelationPredicate(c) => write!(f, "Correlate({}, {})", c.null_guard, c.equality),
            Expr::CustomRoot(c) => write!(f, "CustomRoot({}, {})", c.root.name, c.mapping),
        }
    }
}

/// Indented operator tree, sources as children.
pub struct ExprTree<'e>(pub &'e Expr);

impl Expr {
    pub fn tree(&self) -> ExprTree<'_> {
        ExprTree(self)
    }

    fn sources(&self) -> Vec<&Expr> {
        match self {
            Expr::Call(c) => {
                let source_count = match c.operator {
                    QueryOperator::Join | QueryOperator::GroupJoin => 2,
                    _ => 1,
                };
                c.arguments.iter().take(source_count).collect()
            }
            Expr::MaterializeCollection(m) => vec![&m.source],
            _ => vec![],
        }
    }

    fn variant_name(&self) -> String {
        match self {
            Expr::Call(c) => {
                let skip = self.sources().len();
                let rest: Vec<String> = c.arguments.iter().skip(skip).map(|a| a.to_string()).collect();
                if rest.is_empty() {
                    c.operator.to_string()
                } else {
                    format!("{}[{}]", c.operator, rest.join(", "))
                }
            }
            Expr::MaterializeCollection(m) => {
                format!("MaterializeCollection[{}]", m.navigation.qualified_name())
            }
            other => other.to_string(),
        }
    }

    fn fmt_with_tree(
        &self,
        f: &mut fmt::Formatter<'_>,
        prefix: &str,
        is_last: bool,
        is_root: bool,
    ) -> fmt::Result {
        let (branch, next_prefix) = if is_last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };

        if is_root {
            writeln!(f, "{}", self.variant_name())?;
        } else {
            writeln!(f, "{}{}{}", prefix, branch, self.variant_name())?;
        }

        let children = self.sources();
        let child_prefix = if is_root {
            String::new()
        } else {
            format!("{}{}", prefix, next_prefix)
        };
        let n = children.len();
        for (i, child) in children.into_iter().enumerate() {
            child.fmt_with_tree(f, &child_prefix, i + 1 == n, false)?;
        }
        Ok(())
    }
}

impl fmt::Display for ExprTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_with_tree(f, "", true, true)
    }
}

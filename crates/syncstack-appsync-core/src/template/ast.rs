//! Syntax tree of a compiled template.

/// One element of template body text.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal output.
    Text(String),
    /// `$ref`, `$!ref`, `${ref}`, `$!{ref}`.
    Reference(Reference),
    /// `#set($target = value)`.
    Set {
        /// Variable or property being assigned.
        target: Reference,
        /// Assigned value.
        value: Expr,
    },
    /// `#if / #elseif / #else / #end`.
    If {
        /// Conditions with their bodies, in order.
        branches: Vec<(Expr, Vec<Node>)>,
        /// `#else` body.
        otherwise: Vec<Node>,
    },
    /// `#foreach($var in iterable) ... #end`.
    Foreach {
        /// Loop variable name, without `$`.
        var: String,
        /// Iterated value.
        iterable: Expr,
        /// Loop body.
        body: Vec<Node>,
    },
    /// `#break`.
    Break,
    /// `#return` or `#return(expr)`.
    Return(Option<Expr>),
}

/// A variable reference with its accessor chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// `$!` form: render nothing when null.
    pub quiet: bool,
    /// Root variable name, without `$`.
    pub root: String,
    /// Property, index and method accessors in order.
    pub accessors: Vec<Accessor>,
    /// Source text, rendered verbatim when a loud reference is null.
    pub source: String,
}

impl Reference {
    /// Whether the chain ends in a method call.
    #[must_use]
    pub fn ends_with_method(&self) -> bool {
        matches!(self.accessors.last(), Some(Accessor::Method { .. }))
    }
}

/// One step of a reference chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    /// `.name`
    Property(String),
    /// `[expr]`
    Index(Expr),
    /// `.name(args)`
    Method {
        /// Method name.
        name: String,
        /// Argument expressions.
        args: Vec<Expr>,
    },
}

/// Binary operators, loosest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `||`, `or`
    Or,
    /// `&&`, `and`
    And,
    /// `==`, `eq`
    Eq,
    /// `!=`, `ne`
    Ne,
    /// `<`, `lt`
    Lt,
    /// `<=`, `le`
    Le,
    /// `>`, `gt`
    Gt,
    /// `>=`, `ge`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
}

/// Directive argument expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// Single-quoted or plain double-quoted string.
    Str(String),
    /// Double-quoted string with references.
    Interpolated(Vec<Node>),
    /// `[a, b]`
    List(Vec<Expr>),
    /// `[a..b]`, inclusive.
    Range(Box<Expr>, Box<Expr>),
    /// `{k: v}`
    Map(Vec<(Expr, Expr)>),
    /// A reference.
    Ref(Reference),
    /// `!x`, `not x`
    Not(Box<Expr>),
    /// `-x`
    Neg(Box<Expr>),
    /// `a op b`
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
}

/// Whether any reference in `nodes` reads `$ctx.<field>` (or `$context.<field>`).
#[must_use]
pub fn reads_context_field(nodes: &[Node], field: &str) -> bool {
    nodes.iter().any(|node| node_reads(node, field))
}

fn node_reads(node: &Node, field: &str) -> bool {
    match node {
        Node::Text(_) | Node::Break | Node::Return(None) => false,
        Node::Reference(reference) => reference_reads(reference, field),
        Node::Set { target, value } => reference_reads(target, field) || expr_reads(value, field),
        Node::If { branches, otherwise } => {
            branches
                .iter()
                .any(|(cond, body)| expr_reads(cond, field) || reads_context_field(body, field))
                || reads_context_field(otherwise, field)
        }
        Node::Foreach { iterable, body, .. } => {
            expr_reads(iterable, field) || reads_context_field(body, field)
        }
        Node::Return(Some(expr)) => expr_reads(expr, field),
    }
}

fn reference_reads(reference: &Reference, field: &str) -> bool {
    let direct = matches!(reference.root.as_str(), "ctx" | "context")
        && matches!(reference.accessors.first(), Some(Accessor::Property(name)) if name == field);
    direct
        || reference.accessors.iter().any(|accessor| match accessor {
            Accessor::Property(_) => false,
            Accessor::Index(expr) => expr_reads(expr, field),
            Accessor::Method { args, .. } => args.iter().any(|arg| expr_reads(arg, field)),
        })
}

fn expr_reads(expr: &Expr, field: &str) -> bool {
    match expr {
        Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => false,
        Expr::Interpolated(nodes) => reads_context_field(nodes, field),
        Expr::List(items) => items.iter().any(|item| expr_reads(item, field)),
        Expr::Range(from, to) => expr_reads(from, field) || expr_reads(to, field),
        Expr::Map(entries) => entries
            .iter()
            .any(|(key, value)| expr_reads(key, field) || expr_reads(value, field)),
        Expr::Ref(reference) => reference_reads(reference, field),
        Expr::Not(inner) | Expr::Neg(inner) => expr_reads(inner, field),
        Expr::Binary { left, right, .. } => expr_reads(left, field) || expr_reads(right, field),
    }
}

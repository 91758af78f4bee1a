//! This module defines the expression tree shared by the reader, the evaluator and
//! the tree editor. Every node is an [`Expr`]: a cheap-to-clone handle to an immutable
//! node that carries a process-unique id and a [`Kind`]. Pairs build lists and trees,
//! atoms hold symbols and literals, and the remaining kinds are evaluator values
//! (special-form markers, user procedures and primitives).
//!
//! Ids come from an [`IdGen`] owned by whoever drives the interpreter; they are
//! never part of equality or printing, only of identity lookups (`same_node`, the
//! editor's `*_by_id` operations).

use crate::builtinops::BuiltinOp;
use crate::evaluator::Environment;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// Unique identifier of a tree node
pub type Uid = u64;

/// Id carried by the "not found" sentinel and by nothing else
pub const SENTINEL_UID: Uid = 0;

/// Monotonic id source. Ids start at 1 and are never handed out twice.
#[derive(Debug)]
pub struct IdGen {
    next: AtomicU64,
}

impl IdGen {
    pub fn new() -> Self {
        IdGen {
            next: AtomicU64::new(SENTINEL_UID + 1),
        }
    }

    pub fn fresh(&self) -> Uid {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call to [`IdGen::fresh`] will return
    pub fn peek(&self) -> Uid {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Syntactic operators whose operands are not uniformly evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialForm {
    Define,
    Quote,
    Begin,
    Lambda,
    If,
    Set,
    /// Reserved for the module preprocessor; never applicable at evaluation time
    Import,
    /// Reserved for the module preprocessor; never applicable at evaluation time
    Export,
}

impl SpecialForm {
    /// Reserved words recognised by the reader
    pub const ALL: [SpecialForm; 8] = [
        SpecialForm::Define,
        SpecialForm::Quote,
        SpecialForm::Begin,
        SpecialForm::Lambda,
        SpecialForm::If,
        SpecialForm::Set,
        SpecialForm::Import,
        SpecialForm::Export,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            SpecialForm::Define => "define",
            SpecialForm::Quote => "quote",
            SpecialForm::Begin => "begin",
            SpecialForm::Lambda => "lambda",
            SpecialForm::If => "if",
            SpecialForm::Set => "set!",
            SpecialForm::Import => "import",
            SpecialForm::Export => "export",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|form| form.keyword() == word)
    }
}

/// User-defined closure.
///
/// The activation slot caches the frame built on the first call when the
/// evaluator runs in [`crate::config::ActivationMode::Cached`]. It is keyed by
/// this object, so evaluating one tree from two threads needs
/// [`deep_clone_for_isolated_execution`] first.
pub struct Procedure {
    pub(crate) params: Expr,
    pub(crate) body: Expr,
    pub(crate) env: Environment,
    pub(crate) activation: Mutex<Option<Environment>>,
}

impl Procedure {
    pub fn new(params: Expr, body: Expr, env: Environment) -> Self {
        Procedure {
            params,
            body,
            env,
            activation: Mutex::new(None),
        }
    }

    pub fn params(&self) -> &Expr {
        &self.params
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub fn defining_env(&self) -> &Environment {
        &self.env
    }

    /// Whether a cached activation frame exists
    pub fn is_activated(&self) -> bool {
        self.activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for Procedure {
    // The defining environment usually contains this procedure, so it is left out.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Procedure(params={}, body={})",
            self.params.debug_string(),
            self.body.debug_string()
        )
    }
}

/// The discriminant and payload of a node
#[derive(Debug)]
pub enum Kind {
    Pair(Expr, Expr),
    Symbol(String),
    Int(i64),
    Double(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Null,
    Form(SpecialForm),
    Procedure(Procedure),
    Primitive(Arc<BuiltinOp>),
}

#[derive(Debug)]
struct Node {
    id: Uid,
    kind: Kind,
}

// Uniquely owned children are released from a work list, so neither long
// chains nor deep `first` nesting drop recursively
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(&mut self.kind, &mut pending);
        while let Some(expr) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(expr.0) {
                detach_children(&mut node.kind, &mut pending);
            }
        }
    }
}

fn detach_children(kind: &mut Kind, pending: &mut Vec<Expr>) {
    if let Kind::Pair(first, rest) = kind {
        for child in [first, rest] {
            if !child.is_not_found() {
                pending.push(std::mem::replace(child, Expr::not_found()));
            }
        }
    }
}

/// Shared handle to an expression node
#[derive(Clone)]
pub struct Expr(Arc<Node>);

static NOT_FOUND: LazyLock<Expr> = LazyLock::new(|| Expr::with_id(SENTINEL_UID, Kind::Null));

impl Expr {
    pub fn new(ids: &IdGen, kind: Kind) -> Self {
        Self::with_id(ids.fresh(), kind)
    }

    /// Build a node under an existing id. Used when a tree is rebuilt around
    /// unchanged nodes, never to mint new identities.
    pub(crate) fn with_id(id: Uid, kind: Kind) -> Self {
        Expr(Arc::new(Node { id, kind }))
    }

    /// The "not found" sentinel: a Null that is never part of a real tree
    pub fn not_found() -> Self {
        NOT_FOUND.clone()
    }

    pub fn pair(ids: &IdGen, first: Expr, rest: Expr) -> Self {
        Self::new(ids, Kind::Pair(first, rest))
    }

    pub fn symbol(ids: &IdGen, name: impl Into<String>) -> Self {
        Self::new(ids, Kind::Symbol(name.into()))
    }

    pub fn int(ids: &IdGen, value: i64) -> Self {
        Self::new(ids, Kind::Int(value))
    }

    pub fn double(ids: &IdGen, value: f64) -> Self {
        Self::new(ids, Kind::Double(value))
    }

    pub fn string(ids: &IdGen, value: impl Into<String>) -> Self {
        Self::new(ids, Kind::Str(value.into()))
    }

    pub fn char(ids: &IdGen, value: char) -> Self {
        Self::new(ids, Kind::Char(value))
    }

    pub fn bool(ids: &IdGen, value: bool) -> Self {
        Self::new(ids, Kind::Bool(value))
    }

    pub fn null(ids: &IdGen) -> Self {
        Self::new(ids, Kind::Null)
    }

    pub fn form(ids: &IdGen, form: SpecialForm) -> Self {
        Self::new(ids, Kind::Form(form))
    }

    pub fn procedure(ids: &IdGen, params: Expr, body: Expr, env: Environment) -> Self {
        Self::new(ids, Kind::Procedure(Procedure::new(params, body, env)))
    }

    pub fn primitive(ids: &IdGen, op: Arc<BuiltinOp>) -> Self {
        Self::new(ids, Kind::Primitive(op))
    }

    /// Right-fold `items` into a Null-terminated chain of pairs
    pub fn list(ids: &IdGen, items: Vec<Expr>) -> Self {
        Self::list_with_tail(ids, items, Expr::null(ids))
    }

    /// Right-fold `items` onto `tail`; a non-Null tail gives a dotted list
    pub fn list_with_tail(ids: &IdGen, items: Vec<Expr>, tail: Expr) -> Self {
        items
            .into_iter()
            .rev()
            .fold(tail, |rest, first| Expr::pair(ids, first, rest))
    }

    pub fn id(&self) -> Uid {
        self.0.id
    }

    pub fn kind(&self) -> &Kind {
        &self.0.kind
    }

    /// Identity comparison by unique id
    pub fn same_node(&self, other: &Expr) -> bool {
        self.id() == other.id()
    }

    pub fn is_pair(&self) -> bool {
        matches!(self.kind(), Kind::Pair(..))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind(), Kind::Null)
    }

    pub fn is_not_found(&self) -> bool {
        self.id() == SENTINEL_UID
    }

    pub fn as_pair(&self) -> Option<(&Expr, &Expr)> {
        match self.kind() {
            Kind::Pair(first, rest) => Some((first, rest)),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self.kind() {
            Kind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind() {
            Kind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self.kind() {
            Kind::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind() {
            Kind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.kind() {
            Kind::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<SpecialForm> {
        match self.kind() {
            Kind::Form(form) => Some(*form),
            _ => None,
        }
    }

    pub fn as_procedure(&self) -> Option<&Procedure> {
        match self.kind() {
            Kind::Procedure(proc) => Some(proc),
            _ => None,
        }
    }

    /// Name of the kind, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self.kind() {
            Kind::Pair(..) => "pair",
            Kind::Symbol(_) => "symbol",
            Kind::Int(_) => "int",
            Kind::Double(_) => "double",
            Kind::Str(_) => "string",
            Kind::Char(_) => "char",
            Kind::Bool(_) => "bool",
            Kind::Null => "null",
            Kind::Form(_) => "special form",
            Kind::Procedure(_) => "procedure",
            Kind::Primitive(_) => "primitive",
        }
    }

    /// Elements of a pair chain.
    ///
    /// Walks `rest` links collecting each `first`, and stops at the first `rest`
    /// that is not a pair. A Null terminator is dropped, any other atom there is
    /// kept as the final element. A lone Null flattens to nothing and any other
    /// atom to itself.
    pub fn flatten(&self) -> Vec<Expr> {
        let mut out = Vec::new();
        let mut cur = self;
        while let Kind::Pair(first, rest) = cur.kind() {
            out.push(first.clone());
            cur = rest;
        }
        if !cur.is_null() {
            out.push(cur.clone());
        }
        out
    }

    /// The `(a . b)` debug rendering: `(Symbol:+ . (Int:1 . _null_))`
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        let mut pending = vec![Piece::Value(self)];
        while let Some(piece) = pending.pop() {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Value(expr) | Piece::Rest(expr) => match expr.kind() {
                    Kind::Pair(first, rest) => {
                        out.push('(');
                        pending.push(Piece::Text(")"));
                        pending.push(Piece::Value(rest));
                        pending.push(Piece::Text(" . "));
                        pending.push(Piece::Value(first));
                    }
                    _ => expr.write_debug_atom(&mut out),
                },
            }
        }
        out
    }

    fn write_debug_atom(&self, out: &mut String) {
        match self.kind() {
            Kind::Pair(..) => {}
            Kind::Symbol(name) => {
                out.push_str("Symbol:");
                out.push_str(name);
            }
            Kind::Int(n) => out.push_str(&format!("Int:{n}")),
            Kind::Double(d) => {
                out.push_str("Double:");
                out.push_str(&format_double(*d));
            }
            Kind::Str(s) => out.push_str(&format!("String:\"{s}\"")),
            Kind::Char(c) => out.push_str(&format!("Char:{c}")),
            Kind::Bool(b) => out.push_str(&format!("Bool:{b}")),
            Kind::Null => out.push_str("_null_"),
            Kind::Form(form) => out.push_str(form.keyword()),
            Kind::Procedure(_) => out.push_str("procedure"),
            Kind::Primitive(op) => out.push_str(&format!("primitive:{}", op.name)),
        }
    }

    /// Multi-line rendering for tree views. Lists made only of atoms stay on one
    /// line; otherwise every element after the head goes on its own line, indented
    /// by `indent` per nesting level.
    pub fn pretty(&self, indent: &str) -> String {
        let mut out = String::new();
        let mut pending = vec![Layout::Value(self.clone(), 0)];
        while let Some(layout) = pending.pop() {
            let (expr, level) = match layout {
                Layout::Text(text) => {
                    out.push_str(&text);
                    continue;
                }
                Layout::Value(expr, level) => (expr, level),
            };
            if !expr.is_pair() || expr.flatten().iter().all(|e| !e.is_pair()) {
                out.push_str(&expr.to_string());
                continue;
            }
            let (elements, tail) = split_tail(&expr);
            out.push('(');
            pending.push(Layout::Text(match tail {
                Some(tail) => format!(" . {tail})"),
                None => ")".to_owned(),
            }));
            for (i, element) in elements.into_iter().enumerate().rev() {
                pending.push(Layout::Value(element, level + 1));
                if i > 0 {
                    pending.push(Layout::Text(format!("\n{}", indent.repeat(level + 1))));
                }
            }
        }
        out
    }
}

/// Work items for the printers
enum Piece<'a> {
    Value(&'a Expr),
    /// What follows an element inside a list: more elements, a dotted tail or nothing
    Rest(&'a Expr),
    Text(&'static str),
}

enum Layout {
    Value(Expr, usize),
    Text(String),
}

/// Split a chain into its `first` elements and a non-Null dotted tail.
fn split_tail(expr: &Expr) -> (Vec<Expr>, Option<Expr>) {
    let mut elements = Vec::new();
    let mut cur = expr;
    while let Kind::Pair(first, rest) = cur.kind() {
        elements.push(first.clone());
        cur = rest;
    }
    let tail = (!cur.is_null()).then(|| cur.clone());
    (elements, tail)
}

/// Doubles always print with a decimal point so that they read back as doubles.
pub(crate) fn format_double(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 {
        format!("{d:.1}")
    } else {
        format!("{d}")
    }
}

/// Copy a tree so that it can be evaluated on another thread.
///
/// Every node keeps its id. Procedures are rebuilt with an empty activation
/// cache (their defining environment stays shared), primitives are shared.
/// Concurrent evaluation of one parsed tree needs one call per execution context.
pub fn deep_clone_for_isolated_execution(expr: &Expr) -> Expr {
    enum Step<'a> {
        Visit(&'a Expr),
        Join(Uid),
    }
    let mut pending = vec![Step::Visit(expr)];
    let mut built: Vec<Expr> = Vec::new();
    while let Some(step) = pending.pop() {
        match step {
            Step::Visit(expr) => match expr.kind() {
                Kind::Pair(first, rest) => {
                    pending.push(Step::Join(expr.id()));
                    pending.push(Step::Visit(rest));
                    pending.push(Step::Visit(first));
                }
                _ => built.push(clone_atom(expr)),
            },
            Step::Join(id) => {
                if let (Some(rest), Some(first)) = (built.pop(), built.pop()) {
                    built.push(Expr::with_id(id, Kind::Pair(first, rest)));
                }
            }
        }
    }
    built.pop().unwrap_or_else(Expr::not_found)
}

fn clone_atom(expr: &Expr) -> Expr {
    let kind = match expr.kind() {
        Kind::Pair(..) => return deep_clone_for_isolated_execution(expr),
        Kind::Symbol(name) => Kind::Symbol(name.clone()),
        Kind::Int(n) => Kind::Int(*n),
        Kind::Double(d) => Kind::Double(*d),
        Kind::Str(s) => Kind::Str(s.clone()),
        Kind::Char(c) => Kind::Char(*c),
        Kind::Bool(b) => Kind::Bool(*b),
        Kind::Null if expr.is_not_found() => return Expr::not_found(),
        Kind::Null => Kind::Null,
        Kind::Form(form) => Kind::Form(*form),
        Kind::Procedure(proc) => Kind::Procedure(Procedure::new(
            deep_clone_for_isolated_execution(&proc.params),
            deep_clone_for_isolated_execution(&proc.body),
            proc.env.clone(),
        )),
        Kind::Primitive(op) => Kind::Primitive(Arc::clone(op)),
    };
    Expr::with_id(expr.id(), kind)
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id(), self.debug_string())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending = vec![Piece::Value(self)];
        while let Some(piece) = pending.pop() {
            match piece {
                Piece::Text(text) => f.write_str(text)?,
                Piece::Value(expr) => match expr.kind() {
                    Kind::Pair(first, rest) => {
                        f.write_str("(")?;
                        pending.push(Piece::Text(")"));
                        pending.push(Piece::Rest(rest));
                        pending.push(Piece::Value(first));
                    }
                    _ => expr.fmt_atom(f)?,
                },
                Piece::Rest(expr) => match expr.kind() {
                    Kind::Pair(first, rest) => {
                        f.write_str(" ")?;
                        pending.push(Piece::Rest(rest));
                        pending.push(Piece::Value(first));
                    }
                    Kind::Null => {}
                    _ => {
                        f.write_str(" . ")?;
                        expr.fmt_atom(f)?;
                    }
                },
            }
        }
        Ok(())
    }
}

impl Expr {
    fn fmt_atom(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Kind::Pair(..) => Ok(()),
            Kind::Symbol(name) => write!(f, "{name}"),
            Kind::Int(n) => write!(f, "{n}"),
            Kind::Double(d) => write!(f, "{}", format_double(*d)),
            Kind::Str(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Kind::Char(c) => write!(f, "#\\{c}"),
            Kind::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Kind::Null => write!(f, "()"),
            Kind::Form(form) => write!(f, "{}", form.keyword()),
            Kind::Procedure(_) => write!(f, "#<procedure>"),
            Kind::Primitive(op) => write!(f, "#<primitive:{}>", op.name),
        }
    }
}

/// Content equality. Ids are ignored; procedures and primitives compare by identity.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some((a, b)) = pending.pop() {
            let same = match (a.kind(), b.kind()) {
                (Kind::Pair(a_first, a_rest), Kind::Pair(b_first, b_rest)) => {
                    pending.push((a_rest, b_rest));
                    pending.push((a_first, b_first));
                    true
                }
                (Kind::Symbol(x), Kind::Symbol(y)) => x == y,
                (Kind::Int(x), Kind::Int(y)) => x == y,
                (Kind::Double(x), Kind::Double(y)) => x == y,
                (Kind::Str(x), Kind::Str(y)) => x == y,
                (Kind::Char(x), Kind::Char(y)) => x == y,
                (Kind::Bool(x), Kind::Bool(y)) => x == y,
                (Kind::Null, Kind::Null) => true,
                (Kind::Form(x), Kind::Form(y)) => x == y,
                (Kind::Procedure(_), Kind::Procedure(_)) => {
                    Arc::ptr_eq(&a.0, &b.0) || a.same_node(b)
                }
                (Kind::Primitive(x), Kind::Primitive(y)) => {
                    Arc::ptr_eq(x, y) || x.name == y.name
                }
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}

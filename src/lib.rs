//! MintLisp - a small Lisp interpreter with editable syntax trees
//!
//! This crate reads S-expression text into a cons-cell tree, evaluates it with a
//! trampolined evaluator over a chain of environment frames, and lets a host edit
//! the parsed trees in place by addressing nodes through their unique ids.
//!
//! ```scheme
//! (define (fact n acc)
//!   (if (= n 0) acc (fact (- n 1) (* acc n))))
//! (fact 10 1)              ; 3628800
//! ((lambda (a b) (* a b)) 4 1.5)  ; 6.0
//! (car '(1 2 3))           ; 1
//! ```
//!
//! ## Forgiving evaluation
//!
//! A malformed top-level expression must never poison the interpreter for the
//! expressions that follow it. Unbound symbols, type errors inside primitives and
//! refused `define`/`set!` operations are logged through `tracing`, reported to the
//! host's [`port::Port`], and evaluate to `null`. Only a handful of conditions abort
//! the whole top-level evaluation (see [`Error::is_fatal`]); [`evaluator::evaluate`]
//! turns those into `null` as well, while [`evaluator::try_evaluate`] hands them back.
//!
//! ## Modules
//!
//! - `ast`: expression tree, unique ids, printers and the isolation clone
//! - `scheme`: tokenizer, parser combinators and the S-expression reader
//! - `evaluator`: environments, special forms and the trampoline
//! - `builtinops`: primitive procedures and the global procedure table
//! - `port`: output sink injected by the host
//! - `editor`: arena of top-level trees addressable by node id
//! - `interpreter`: the context tying the pieces together

use std::fmt;

/// Maximum nesting of parentheses and quote marks accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 128;

/// Maximum depth of non-tail evaluation (operator and operand positions).
/// Tail calls run in the trampoline and do not count against this limit.
/// Small enough for a 2 MiB thread stack in debug builds; a host raising
/// [`config::EvalConfig::max_depth`] must run evaluation on a larger stack.
pub const MAX_EVAL_DEPTH: usize = 128;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
    /// Valid language syntax that is intentionally not supported in this implementation
    Unsupported,
    /// A literal the implementation cannot represent, such as an integer beyond `i64`
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given character offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        Self::with_context_and_found(kind, message, input, error_offset, None)
    }

    /// Create a ParseError with context and found token
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    EvalError(String),
    TypeError(String),
    UnboundVariable(String),
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    /// `define` of a name that already has a binding in the same frame
    AlreadyDefined(String),
    /// `set!` of a name that is bound nowhere in the chain
    UndefinedAssignment(String),
    /// Non-tail evaluation nested deeper than the configured limit
    DepthLimit { max: usize },
    /// A tree edit addressed a node that cannot be edited that way
    EditError(String),
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// Errors that abandon the whole top-level evaluation instead of collapsing
    /// into `null` at the point where they happen.
    ///
    /// `UnboundVariable` is only ever raised under the strict unbound policy, and
    /// arity errors carrying an expression come from applying a user procedure.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::DepthLimit { .. } | Error::UnboundVariable(_) => true,
            Error::ArityError { expression, .. } => expression.is_some(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnboundVariable(var) => write!(f, "Unbound variable: {var}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: expression {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: function expected {expected} arguments but got {got}"
                ),
            },
            Error::AlreadyDefined(name) => write!(f, "Symbol already defined: {name}"),
            Error::UndefinedAssignment(name) => {
                write!(f, "Cannot set! undefined symbol: {name}")
            }
            Error::DepthLimit { max } => {
                write!(f, "Evaluation depth limit exceeded (max: {max})")
            }
            Error::EditError(msg) => write!(f, "EditError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

pub mod ast;
pub mod builtinops;
pub mod config;
pub mod editor;
pub mod evaluator;
pub mod interpreter;
pub mod port;
pub mod scheme;

pub use interpreter::Interpreter;

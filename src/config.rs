//! Reader and evaluator settings.

use crate::MAX_EVAL_DEPTH;

/// Configuration for the reader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Skip `;` line comments together with whitespace
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

/// How a procedure obtains the frame that binds its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationMode {
    /// Keep one template frame per procedure object. The first call extends the
    /// defining environment, later calls rebind the template with `set`, and every
    /// call runs in a shallow clone of it.
    #[default]
    Cached,
    /// Extend the defining environment with a brand new frame on every call.
    FreshPerCall,
}

/// What an unbound symbol evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnboundPolicy {
    /// Log the symbol and continue with `null`
    #[default]
    Forgiving,
    /// Abort the top-level evaluation with [`crate::Error::UnboundVariable`]
    Strict,
}

/// Configuration for the evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalConfig {
    pub activation: ActivationMode,
    pub unbound: UnboundPolicy,
    /// Limit on non-tail nesting; defaults to [`MAX_EVAL_DEPTH`]. Each level
    /// costs a few native frames, so a higher limit needs a larger thread stack.
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            activation: ActivationMode::default(),
            unbound: UnboundPolicy::default(),
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// Both halves of the interpreter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Config {
    pub parse: ParseConfig,
    pub eval: EvalConfig,
}

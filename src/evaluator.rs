//! Trampolined evaluator.
//!
//! Evaluation iterates over an `(expression, environment)` state. A step either
//! finishes with a value or hands back the next state: `if` branches, the last
//! expression of `begin` and procedure bodies are continued this way, so tail
//! calls never grow the native stack. Operators, operands, `if` predicates and
//! the value of `define`/`set!` are evaluated by a nested call. That nesting is
//! bounded by [`EvalConfig::max_depth`], whose default fits a 2 MiB thread stack.
//!
//! Errors raised by primitives and special forms are recoverable: they are
//! logged, reported to the port and the offending expression evaluates to
//! `null`. Errors for which [`Error::is_fatal`] holds abandon the whole
//! evaluation.

pub mod environment;

pub use environment::Environment;

use crate::Error;
use crate::ast::{Expr, IdGen, Kind, Procedure, SpecialForm};
use crate::builtinops::CallSite;
use crate::config::{ActivationMode, EvalConfig, UnboundPolicy};
use crate::port::Port;
use std::sync::PoisonError;

/// Everything an evaluation needs besides the expression and its environment
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub ids: &'a IdGen,
    pub port: &'a dyn Port,
    pub config: EvalConfig,
}

impl<'a> EvalContext<'a> {
    pub fn new(ids: &'a IdGen, port: &'a dyn Port, config: EvalConfig) -> Self {
        EvalContext { ids, port, config }
    }

    fn null(&self) -> Expr {
        Expr::null(self.ids)
    }

    /// Log a diagnostic and forward it to the port, tagged with the expression id
    fn report(&self, expr: &Expr, err: &Error) {
        tracing::warn!(id = expr.id(), %err, "recovered evaluation error");
        self.port.write_error(&err.to_string(), expr.id());
    }
}

/// Result of one trampoline step
enum Step {
    Done(Expr),
    Continue(Expr, Environment),
}

/// Evaluate `expr` in `env`. Never fails: a fatal error is reported and gives `null`.
pub fn evaluate(expr: &Expr, env: &Environment, ctx: &EvalContext<'_>) -> Expr {
    try_evaluate(expr, env, ctx).unwrap_or_else(|err| {
        ctx.report(expr, &err);
        ctx.null()
    })
}

/// Evaluate `expr` in `env`, handing fatal errors back to the caller.
pub fn try_evaluate(expr: &Expr, env: &Environment, ctx: &EvalContext<'_>) -> Result<Expr, Error> {
    eval_with_depth_tracking(expr, env, ctx, 0)
}

fn eval_with_depth_tracking(
    expr: &Expr,
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Expr, Error> {
    if depth > ctx.config.max_depth {
        return Err(Error::DepthLimit {
            max: ctx.config.max_depth,
        });
    }

    let mut state = (expr.clone(), env.clone());
    loop {
        let (expr, env) = &state;
        match step(expr, env, ctx, depth)? {
            Step::Done(value) => return Ok(value),
            Step::Continue(next, next_env) => {
                tracing::trace!(id = next.id(), depth, "tail step");
                state = (next, next_env);
            }
        }
    }
}

fn step(
    expr: &Expr,
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Step, Error> {
    match expr.kind() {
        Kind::Symbol(name) => lookup_symbol(name, expr, env, ctx).map(Step::Done),
        Kind::Pair(operator, operands) => {
            let op = eval_with_depth_tracking(operator, env, ctx, depth + 1)?;
            let result = match op.kind() {
                Kind::Form(form) => eval_form(*form, operands, env, ctx, depth),
                Kind::Procedure(proc) => eval_operands(operands, env, ctx, depth)
                    .and_then(|args| activate(proc, &args, expr, ctx))
                    .map(|frame| Step::Continue(proc.body().clone(), frame)),
                Kind::Primitive(builtin) => {
                    eval_operands(operands, env, ctx, depth).and_then(|args| {
                        let site = CallSite {
                            ids: ctx.ids,
                            port: ctx.port,
                            id: expr.id(),
                        };
                        builtin.apply(&args, &site).map(Step::Done)
                    })
                }
                _ => Err(Error::TypeError(format!(
                    "Cannot apply {} {op}",
                    op.type_name()
                ))),
            };
            recover(result, expr, ctx)
        }
        // Literals, Null, form markers and procedure values evaluate to themselves
        _ => Ok(Step::Done(expr.clone())),
    }
}

/// Collapse a recoverable error into `null`; fatal errors keep propagating
fn recover(result: Result<Step, Error>, expr: &Expr, ctx: &EvalContext<'_>) -> Result<Step, Error> {
    match result {
        Err(err) if !err.is_fatal() => {
            ctx.report(expr, &err);
            Ok(Step::Done(ctx.null()))
        }
        other => other,
    }
}

fn lookup_symbol(
    name: &str,
    expr: &Expr,
    env: &Environment,
    ctx: &EvalContext<'_>,
) -> Result<Expr, Error> {
    if let Some(value) = env.get(name) {
        return Ok(value);
    }
    let err = Error::UnboundVariable(name.to_owned());
    match ctx.config.unbound {
        UnboundPolicy::Strict => Err(err),
        UnboundPolicy::Forgiving => {
            ctx.report(expr, &err);
            Ok(ctx.null())
        }
    }
}

/// Evaluate every element of an operand chain, left to right. A dotted tail
/// atom counts as a final operand.
fn eval_operands(
    operands: &Expr,
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Vec<Expr>, Error> {
    operands
        .flatten()
        .iter()
        .map(|operand| eval_with_depth_tracking(operand, env, ctx, depth + 1))
        .collect()
}

fn eval_form(
    form: SpecialForm,
    operands: &Expr,
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Step, Error> {
    let operands = operands.flatten();
    match form {
        SpecialForm::Quote => eval_quote(&operands),
        SpecialForm::If => eval_if(&operands, env, ctx, depth),
        SpecialForm::Define => eval_define(&operands, env, ctx, depth),
        SpecialForm::Set => eval_set(&operands, env, ctx, depth),
        SpecialForm::Lambda => eval_lambda(&operands, env, ctx),
        SpecialForm::Begin => eval_begin(&operands, env, ctx, depth),
        SpecialForm::Import | SpecialForm::Export => Err(Error::EvalError(format!(
            "'{}' is only meaningful to the module preprocessor",
            form.keyword()
        ))),
    }
}

/// Evaluate quote special form
fn eval_quote(operands: &[Expr]) -> Result<Step, Error> {
    match operands {
        [datum] => Ok(Step::Done(datum.clone())),
        _ => Err(Error::arity_error(1, operands.len())),
    }
}

/// Evaluate if special form. The predicate must be a bool; the chosen branch is
/// continued in tail position.
fn eval_if(
    operands: &[Expr],
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Step, Error> {
    let [predicate, then_branch, else_branch] = operands else {
        return Err(Error::arity_error(3, operands.len()));
    };
    let condition = eval_with_depth_tracking(predicate, env, ctx, depth + 1)?;
    match condition.as_bool() {
        Some(true) => Ok(Step::Continue(then_branch.clone(), env.clone())),
        Some(false) => Ok(Step::Continue(else_branch.clone(), env.clone())),
        None => Err(Error::TypeError(format!(
            "if condition must be a bool, got {}",
            condition.type_name()
        ))),
    }
}

/// Evaluate define special form: `(define name value)` or
/// `(define (name . params) body ...)`. A name already bound in the current
/// frame is left untouched.
fn eval_define(
    operands: &[Expr],
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Step, Error> {
    let (name, value) = match operands {
        [target, value_expr] if target.as_symbol().is_some() => {
            let value = eval_with_depth_tracking(value_expr, env, ctx, depth + 1)?;
            (target, value)
        }
        [signature, body @ ..] if !body.is_empty() => match signature.as_pair() {
            Some((name, params)) => (name, make_procedure(params, body, env, ctx)?),
            None => {
                return Err(Error::TypeError(
                    "define requires a symbol or (name . params)".to_owned(),
                ));
            }
        },
        _ => return Err(Error::arity_error(2, operands.len())),
    };

    let Some(key) = name.as_symbol() else {
        return Err(Error::TypeError(format!(
            "define requires a symbol name, got {}",
            name.type_name()
        )));
    };
    if !env.define(key, value.clone()) {
        return Err(Error::AlreadyDefined(key.to_owned()));
    }
    tracing::debug!(name = key, value = %value, "bound");
    Ok(Step::Done(ctx.null()))
}

/// Evaluate set! special form
fn eval_set(
    operands: &[Expr],
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Step, Error> {
    let [target, value_expr] = operands else {
        return Err(Error::arity_error(2, operands.len()));
    };
    let Some(key) = target.as_symbol() else {
        return Err(Error::TypeError(format!(
            "set! requires a symbol, got {}",
            target.type_name()
        )));
    };
    let value = eval_with_depth_tracking(value_expr, env, ctx, depth + 1)?;
    if !env.set(key, value) {
        return Err(Error::UndefinedAssignment(key.to_owned()));
    }
    Ok(Step::Done(ctx.null()))
}

/// Evaluate lambda special form
fn eval_lambda(operands: &[Expr], env: &Environment, ctx: &EvalContext<'_>) -> Result<Step, Error> {
    match operands {
        [params, body @ ..] if !body.is_empty() => {
            make_procedure(params, body, env, ctx).map(Step::Done)
        }
        _ => Err(Error::arity_error(2, operands.len())),
    }
}

/// Evaluate begin special form; the last expression is in tail position
fn eval_begin(
    operands: &[Expr],
    env: &Environment,
    ctx: &EvalContext<'_>,
    depth: usize,
) -> Result<Step, Error> {
    let Some((last, init)) = operands.split_last() else {
        return Err(Error::EvalError(
            "begin requires at least one expression".to_owned(),
        ));
    };
    for expr in init {
        eval_with_depth_tracking(expr, env, ctx, depth + 1)?;
    }
    Ok(Step::Continue(last.clone(), env.clone()))
}

/// Build a closure over `env`. Several body expressions are wrapped in `begin`.
fn make_procedure(
    params: &Expr,
    body: &[Expr],
    env: &Environment,
    ctx: &EvalContext<'_>,
) -> Result<Expr, Error> {
    check_params(params)?;
    let body = match body {
        [single] => single.clone(),
        _ => {
            let mut exprs = Vec::with_capacity(body.len() + 1);
            exprs.push(Expr::form(ctx.ids, SpecialForm::Begin));
            exprs.extend(body.iter().cloned());
            Expr::list(ctx.ids, exprs)
        }
    };
    Ok(Expr::procedure(ctx.ids, params.clone(), body, env.clone()))
}

/// Parameters are a proper list of symbols, optionally with a dotted rest
/// symbol, or a single symbol that collects every argument.
fn check_params(params: &Expr) -> Result<(), Error> {
    let mut cur = params;
    while let Some((param, rest)) = cur.as_pair() {
        if param.as_symbol().is_none() {
            return Err(Error::TypeError(format!(
                "Lambda parameters must be symbols, got {}",
                param.type_name()
            )));
        }
        cur = rest;
    }
    if cur.is_null() || cur.as_symbol().is_some() {
        Ok(())
    } else {
        Err(Error::TypeError(format!(
            "Lambda rest parameter must be a symbol, got {}",
            cur.type_name()
        )))
    }
}

/// Pair parameter symbols with argument values. A rest parameter receives the
/// remaining arguments as a list.
fn bind_arguments(
    params: &Expr,
    args: &[Expr],
    call: &Expr,
    ctx: &EvalContext<'_>,
) -> Result<(Vec<Expr>, Vec<Expr>), Error> {
    let positional = std::iter::successors(params.as_pair(), |&(_, rest)| rest.as_pair()).count();
    let mut names = Vec::new();
    let mut values = Vec::new();
    let mut remaining = args;
    let mut cur = params;
    while let Some((param, rest)) = cur.as_pair() {
        let Some((arg, tail)) = remaining.split_first() else {
            return Err(Error::arity_error_with_expr(
                positional,
                args.len(),
                call.to_string(),
            ));
        };
        names.push(param.clone());
        values.push(arg.clone());
        remaining = tail;
        cur = rest;
    }
    if cur.as_symbol().is_some() {
        names.push(cur.clone());
        values.push(Expr::list(ctx.ids, remaining.to_vec()));
    } else if !remaining.is_empty() {
        return Err(Error::arity_error_with_expr(
            positional,
            args.len(),
            call.to_string(),
        ));
    }
    Ok((names, values))
}

/// Obtain the frame a call runs in, according to the activation mode
fn activate(
    proc: &Procedure,
    args: &[Expr],
    call: &Expr,
    ctx: &EvalContext<'_>,
) -> Result<Environment, Error> {
    let (names, values) = bind_arguments(proc.params(), args, call, ctx)?;
    match ctx.config.activation {
        ActivationMode::FreshPerCall => proc.defining_env().extend(&names, &values),
        ActivationMode::Cached => {
            let mut slot = proc
                .activation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(template) => {
                    for (name, value) in names.iter().zip(values) {
                        if let Some(key) = name.as_symbol() {
                            template.set(key, value);
                        }
                    }
                    Ok(template.clone_frame())
                }
                None => {
                    let template = proc.defining_env().extend(&names, &values)?;
                    let frame = template.clone_frame();
                    *slot = Some(template);
                    Ok(frame)
                }
            }
        }
    }
}

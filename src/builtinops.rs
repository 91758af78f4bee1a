//! Built-in procedures and the table that installs them into a root environment.
//!
//! Every primitive receives its arguments already evaluated. Most of them are
//! binary operations left-folded over the argument list:
//!
//! ```scheme
//! (+ 1 2 3)        ; ((1 + 2) + 3) = 6
//! (+ 1 2.5)        ; Int and Double promote to Double: 3.5
//! (/ 6 4)          ; division always gives a Double: 1.5
//! (+ "ab" #\c)     ; strings and chars concatenate: "abc"
//! (+)              ; no arguments: ()
//! (- 5)            ; a single argument comes back unchanged: 5
//! ```
//!
//! Comparisons (`= < > <= >=`) check every adjacent pair and stop at the first
//! failing one. All primitives report bad operand types as a recoverable
//! [`Error`]; the evaluator turns that into `null` plus a diagnostic.
//!
//! ## Adding New Operations
//!
//! Build a [`BuiltinOp`] with a name, an [`Arity`] and a closure over
//! `(&[Expr], &CallSite)`, then either add it to the registry below or hand it
//! to [`PrimitiveTable::register`] / `Interpreter::register_primitive` at runtime.

use crate::Error;
use crate::ast::{Expr, IdGen, Kind, Uid};
use crate::evaluator::Environment;
use crate::port::Port;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Accepted argument counts of a primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// Any number of arguments; the primitive checks what it was given
    Any,
}

impl Arity {
    pub fn validate(self, arg_count: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if arg_count != n => Err(Error::arity_error(n, arg_count)),
            _ => Ok(()),
        }
    }
}

/// What a primitive can reach besides its arguments
pub struct CallSite<'a> {
    /// Id source for the nodes the primitive builds
    pub ids: &'a IdGen,
    /// Output sink for `print` and `display`
    pub port: &'a dyn Port,
    /// Id of the application expression being evaluated
    pub id: Uid,
}

/// Signature shared by every primitive
pub type PrimitiveFn = dyn Fn(&[Expr], &CallSite<'_>) -> Result<Expr, Error> + Send + Sync;

/// A named primitive procedure
#[derive(Clone)]
pub struct BuiltinOp {
    pub name: String,
    pub arity: Arity,
    func: Arc<PrimitiveFn>,
}

impl BuiltinOp {
    pub fn new(
        name: impl Into<String>,
        arity: Arity,
        func: impl Fn(&[Expr], &CallSite<'_>) -> Result<Expr, Error> + Send + Sync + 'static,
    ) -> Self {
        BuiltinOp {
            name: name.into(),
            arity,
            func: Arc::new(func),
        }
    }

    /// Check the argument count, then run the primitive
    pub fn apply(&self, args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
        self.arity.validate(args.len())?;
        (self.func)(args, site)
    }
}

impl fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinOp({}, {:?})", self.name, self.arity)
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

//
// Numeric helpers
//

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Double(f64),
}

impl Num {
    fn of(expr: &Expr) -> Option<Num> {
        match expr.kind() {
            Kind::Int(n) => Some(Num::Int(*n)),
            Kind::Double(d) => Some(Num::Double(*d)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Double(d) => d,
        }
    }

    fn compare(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

fn type_mismatch(name: &str, a: &Expr, b: &Expr) -> Error {
    Error::TypeError(format!(
        "Cannot apply '{name}' to {} and {}",
        a.type_name(),
        b.type_name()
    ))
}

fn expect_number(name: &str, expr: &Expr) -> Result<Num, Error> {
    Num::of(expr).ok_or_else(|| {
        Error::TypeError(format!("'{name}' requires a number, got {}", expr.type_name()))
    })
}

/// Left fold of a binary step: no arguments give Null, one comes back unchanged
fn fold_args(
    args: &[Expr],
    site: &CallSite<'_>,
    step: impl Fn(&Expr, &Expr, &CallSite<'_>) -> Result<Expr, Error>,
) -> Result<Expr, Error> {
    let Some((head, rest)) = args.split_first() else {
        return Ok(Expr::null(site.ids));
    };
    rest.iter()
        .try_fold(head.clone(), |acc, arg| step(&acc, arg, site))
}

/// Int op Int stays Int (overflow is an error), anything with a Double promotes
fn numeric_step(
    name: &'static str,
    int_op: fn(i64, i64) -> Option<i64>,
    double_op: fn(f64, f64) -> f64,
) -> impl Fn(&Expr, &Expr, &CallSite<'_>) -> Result<Expr, Error> {
    move |a: &Expr, b: &Expr, site: &CallSite<'_>| match (Num::of(a), Num::of(b)) {
        (Some(Num::Int(x)), Some(Num::Int(y))) => int_op(x, y)
            .map(|n| Expr::int(site.ids, n))
            .ok_or_else(|| Error::EvalError(format!("Integer overflow in '{name}'"))),
        (Some(x), Some(y)) => Ok(Expr::double(site.ids, double_op(x.as_f64(), y.as_f64()))),
        _ => Err(type_mismatch(name, a, b)),
    }
}

fn text_of(expr: &Expr) -> Option<String> {
    match expr.kind() {
        Kind::Str(s) => Some(s.clone()),
        Kind::Char(c) => Some(c.to_string()),
        _ => None,
    }
}

//
// Builtin Function Implementations
//

fn builtin_add(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    let numeric = numeric_step("+", i64::checked_add, |a, b| a + b);
    fold_args(args, site, |a, b, site| match (text_of(a), text_of(b)) {
        (Some(x), Some(y)) => Ok(Expr::string(site.ids, x + &y)),
        _ => numeric(a, b, site),
    })
}

fn builtin_sub(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    fold_args(args, site, numeric_step("-", i64::checked_sub, |a, b| a - b))
}

fn builtin_mul(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    fold_args(args, site, numeric_step("*", i64::checked_mul, |a, b| a * b))
}

fn builtin_div(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    fold_args(args, site, |a, b, site| match (Num::of(a), Num::of(b)) {
        (Some(x), Some(y)) => Ok(Expr::double(site.ids, x.as_f64() / y.as_f64())),
        _ => Err(type_mismatch("/", a, b)),
    })
}

fn builtin_mod(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    fold_args(args, site, |a, b, site| match (Num::of(a), Num::of(b)) {
        (Some(Num::Int(_)), Some(Num::Int(0))) => {
            Err(Error::EvalError("Division by zero in 'mod'".to_owned()))
        }
        (Some(Num::Int(x)), Some(Num::Int(y))) => x
            .checked_rem(y)
            .map(|n| Expr::int(site.ids, n))
            .ok_or_else(|| Error::EvalError("Integer overflow in 'mod'".to_owned())),
        (Some(x), Some(y)) => Ok(Expr::double(site.ids, x.as_f64() % y.as_f64())),
        _ => Err(type_mismatch("mod", a, b)),
    })
}

fn builtin_pow(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    fold_args(args, site, |a, b, site| match (Num::of(a), Num::of(b)) {
        (Some(Num::Int(base)), Some(Num::Int(exp))) if exp >= 0 => u32::try_from(exp)
            .ok()
            .and_then(|exp| base.checked_pow(exp))
            .map(|n| Expr::int(site.ids, n))
            .ok_or_else(|| Error::EvalError("Integer overflow in 'pow'".to_owned())),
        (Some(x), Some(y)) => Ok(Expr::double(site.ids, x.as_f64().powf(y.as_f64()))),
        _ => Err(type_mismatch("pow", a, b)),
    })
}

fn extremum(
    name: &'static str,
    keep: Ordering,
) -> impl Fn(&[Expr], &CallSite<'_>) -> Result<Expr, Error> {
    move |args: &[Expr], site: &CallSite<'_>| {
        fold_args(args, site, |a, b, site| match (Num::of(a), Num::of(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => {
                Ok(Expr::int(site.ids, if x.cmp(&y) == keep { x } else { y }))
            }
            (Some(x), Some(y)) => {
                let (x, y) = (x.as_f64(), y.as_f64());
                let pick = if keep == Ordering::Greater { x.max(y) } else { x.min(y) };
                Ok(Expr::double(site.ids, pick))
            }
            _ => Err(type_mismatch(name, a, b)),
        })
    }
}

fn builtin_abs(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    match expect_number("abs", &args[0])? {
        Num::Int(n) => n
            .checked_abs()
            .map(|n| Expr::int(site.ids, n))
            .ok_or_else(|| Error::EvalError("Integer overflow in 'abs'".to_owned())),
        Num::Double(d) => Ok(Expr::double(site.ids, d.abs())),
    }
}

/// Pairwise numeric comparison, wrapped in a Bool. One argument is trivially true.
fn comparison(
    name: &'static str,
    holds: fn(Ordering) -> bool,
) -> impl Fn(&[Expr], &CallSite<'_>) -> Result<Expr, Error> {
    move |args: &[Expr], site: &CallSite<'_>| {
        if args.is_empty() {
            return Ok(Expr::null(site.ids));
        }
        let nums = args
            .iter()
            .map(|arg| expect_number(name, arg))
            .collect::<Result<Vec<_>, _>>()?;
        let all_hold = nums
            .windows(2)
            .all(|pair| pair[0].compare(pair[1]).is_some_and(holds));
        Ok(Expr::bool(site.ids, all_hold))
    }
}

fn boolean_fold(
    name: &'static str,
    op: fn(bool, bool) -> bool,
) -> impl Fn(&[Expr], &CallSite<'_>) -> Result<Expr, Error> {
    move |args: &[Expr], site: &CallSite<'_>| {
        fold_args(args, site, |a, b, site| match (a.as_bool(), b.as_bool()) {
            (Some(x), Some(y)) => Ok(Expr::bool(site.ids, op(x, y))),
            _ => Err(type_mismatch(name, a, b)),
        })
    }
}

fn builtin_not(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    match args[0].as_bool() {
        Some(b) => Ok(Expr::bool(site.ids, !b)),
        None => Err(Error::TypeError(format!(
            "'not' requires a bool, got {}",
            args[0].type_name()
        ))),
    }
}

/// One-argument math function; the result is always a Double
fn unary_math(name: &'static str, f: fn(f64) -> f64) -> BuiltinOp {
    BuiltinOp::new(name, Arity::Exact(1), move |args, site| {
        let n = expect_number(name, &args[0])?;
        Ok(Expr::double(site.ids, f(n.as_f64())))
    })
}

/// Rounding keeps Ints as they are
fn rounding(name: &'static str, f: fn(f64) -> f64) -> BuiltinOp {
    BuiltinOp::new(name, Arity::Exact(1), move |args, site| {
        match expect_number(name, &args[0])? {
            Num::Int(_) => Ok(args[0].clone()),
            Num::Double(d) => Ok(Expr::double(site.ids, f(d))),
        }
    })
}

fn builtin_atan2(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    let y = expect_number("atan2", &args[0])?.as_f64();
    let x = expect_number("atan2", &args[1])?.as_f64();
    Ok(Expr::double(site.ids, y.atan2(x)))
}

fn builtin_cast_double(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    match expect_number("cast-double", &args[0])? {
        Num::Int(n) => Ok(Expr::double(site.ids, n as f64)),
        Num::Double(_) => Ok(args[0].clone()),
    }
}

fn builtin_cons(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    Ok(Expr::pair(site.ids, args[0].clone(), args[1].clone()))
}

fn builtin_list(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    Ok(Expr::list(site.ids, args.to_vec()))
}

fn builtin_is_null(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    Ok(Expr::bool(site.ids, args[0].is_null()))
}

/// `car`, `cdr` and their compositions. The letters between `c` and `r` are
/// applied right to left: `cadr` is the car of the cdr.
fn accessor(name: &'static str) -> BuiltinOp {
    let path = &name[1..name.len() - 1];
    BuiltinOp::new(name, Arity::Exact(1), move |args, _site| {
        let mut cur = args[0].clone();
        for step in path.chars().rev() {
            let Some((first, rest)) = cur.as_pair() else {
                return Err(Error::TypeError(format!(
                    "'{name}' requires a pair, got {}",
                    cur.type_name()
                )));
            };
            cur = if step == 'a' { first.clone() } else { rest.clone() };
        }
        Ok(cur)
    })
}

const ACCESSORS: [&str; 14] = [
    "car", "cdr", "caar", "cadr", "cdar", "cddr", "caaar", "caadr", "cadar", "caddr", "cdaar",
    "cdadr", "cddar", "cdddr",
];

fn output(args: &[Expr], site: &CallSite<'_>) -> Result<Expr, Error> {
    site.port.write(&args[0], site.id);
    Ok(Expr::null(site.ids))
}

/// Global registry of the standard primitives, built once.
static BUILTIN_OPS: LazyLock<Vec<Arc<BuiltinOp>>> = LazyLock::new(|| {
    let mut ops = vec![
        // Arithmetic operations
        BuiltinOp::new("+", Arity::Any, builtin_add),
        BuiltinOp::new("-", Arity::Any, builtin_sub),
        BuiltinOp::new("*", Arity::Any, builtin_mul),
        BuiltinOp::new("/", Arity::Any, builtin_div),
        BuiltinOp::new("mod", Arity::Any, builtin_mod),
        BuiltinOp::new("pow", Arity::Any, builtin_pow),
        BuiltinOp::new("max", Arity::Any, extremum("max", Ordering::Greater)),
        BuiltinOp::new("min", Arity::Any, extremum("min", Ordering::Less)),
        BuiltinOp::new("abs", Arity::Exact(1), builtin_abs),
        // Comparison operations
        BuiltinOp::new("=", Arity::Any, comparison("=", Ordering::is_eq)),
        BuiltinOp::new("<", Arity::Any, comparison("<", Ordering::is_lt)),
        BuiltinOp::new(">", Arity::Any, comparison(">", Ordering::is_gt)),
        BuiltinOp::new("<=", Arity::Any, comparison("<=", Ordering::is_le)),
        BuiltinOp::new(">=", Arity::Any, comparison(">=", Ordering::is_ge)),
        // Logical operations
        BuiltinOp::new("and", Arity::Any, boolean_fold("and", |a, b| a && b)),
        BuiltinOp::new("or", Arity::Any, boolean_fold("or", |a, b| a || b)),
        BuiltinOp::new("not", Arity::Exact(1), builtin_not),
        // Math
        rounding("floor", f64::floor),
        rounding("ceil", f64::ceil),
        rounding("round", f64::round),
        unary_math("sqrt", f64::sqrt),
        unary_math("exp", f64::exp),
        unary_math("log", f64::ln),
        unary_math("log10", f64::log10),
        unary_math("sin", f64::sin),
        unary_math("cos", f64::cos),
        unary_math("tan", f64::tan),
        unary_math("asin", f64::asin),
        unary_math("acos", f64::acos),
        unary_math("atan", f64::atan),
        unary_math("sinh", f64::sinh),
        unary_math("cosh", f64::cosh),
        unary_math("tanh", f64::tanh),
        BuiltinOp::new("atan2", Arity::Exact(2), builtin_atan2),
        BuiltinOp::new("cast-double", Arity::Exact(1), builtin_cast_double),
        // List operations
        BuiltinOp::new("cons", Arity::Exact(2), builtin_cons),
        BuiltinOp::new("list", Arity::Any, builtin_list),
        BuiltinOp::new("null?", Arity::Exact(1), builtin_is_null),
        // Output
        BuiltinOp::new("print", Arity::Exact(1), output),
        BuiltinOp::new("display", Arity::Exact(1), output),
    ];
    ops.extend(ACCESSORS.into_iter().map(accessor));
    ops.into_iter().map(Arc::new).collect()
});

/// Find a standard primitive by name
pub fn find_builtin_op(name: &str) -> Option<Arc<BuiltinOp>> {
    BUILTIN_OPS.iter().find(|op| op.name == name).cloned()
}

/// The set of primitives and constants a root environment starts with
#[derive(Debug, Clone, Default)]
pub struct PrimitiveTable {
    ops: Vec<Arc<BuiltinOp>>,
}

impl PrimitiveTable {
    /// Every standard primitive
    pub fn standard() -> Self {
        PrimitiveTable {
            ops: BUILTIN_OPS.clone(),
        }
    }

    /// Add a primitive; a later entry with the same name replaces an earlier one
    pub fn register(&mut self, op: BuiltinOp) {
        self.ops.retain(|existing| existing.name != op.name);
        self.ops.push(Arc::new(op));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<BuiltinOp>> {
        self.ops.iter().find(|op| op.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.ops.iter().map(|op| op.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Bind every primitive plus the constants `pi` and `null` in `env`.
    /// Names already bound in `env` are left alone.
    pub fn install(&self, env: &Environment, ids: &IdGen) {
        for op in &self.ops {
            env.define(op.name.clone(), Expr::primitive(ids, Arc::clone(op)));
        }
        env.define("pi", Expr::double(ids, std::f64::consts::PI));
        env.define("null", Expr::null(ids));
        tracing::debug!(count = self.ops.len(), "installed primitives");
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::port::{BufferPort, SilentPort};
    use crate::scheme::try_read_one;

    static IDS: LazyLock<IdGen> = LazyLock::new(IdGen::new);

    /// Datum written in reader syntax
    fn val(text: &str) -> Expr {
        try_read_one(text, &IDS).unwrap()
    }

    fn success(text: &str) -> Option<Expr> {
        Some(val(text))
    }

    fn call_builtin(name: &str, args: &[Expr]) -> Result<Expr, Error> {
        let op = find_builtin_op(name).unwrap();
        let site = CallSite {
            ids: &IDS,
            port: &SilentPort,
            id: 0,
        };
        op.apply(args, &site)
    }

    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    fn test_builtin_ops_registry() {
        let add = find_builtin_op("+").unwrap();
        assert_eq!(add.arity, Arity::Any);
        assert!(find_builtin_op("caddr").is_some());
        assert!(find_builtin_op("random").is_none());

        let table = PrimitiveTable::standard();
        assert_eq!(table.len(), BUILTIN_OPS.len());
        assert!(table.names().contains(&"cast-double"));
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Expr, Error>, Option<Expr>);

        let many_ones: Vec<Expr> = (0..100).map(|_| val("1")).collect();
        let nested = val("((1 2) (3 4) 5)");

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[val("1"), val("2"), val("3")], success("6")),
            test!("+", &[val("1"), val("2.5")], success("3.5")),
            test!("+", &[val("1.5"), val("2")], success("3.5")),
            test!("+", &[val("7")], success("7")),
            test!("+", &[], success("()")),
            test!("+", &many_ones, success("100")),
            test!("+", &[val("\"ab\""), val("\"cd\"")], success("\"abcd\"")),
            test!("+", &[val("\"ab\""), val("#\\c")], success("\"abc\"")),
            test!("+", &[val("#\\a"), val("#\\b")], success("\"ab\"")),
            test!("+", &[val("1"), val("\"x\"")], None),
            test!("+", &[val("\"x\""), val("1")], None),
            test!("+", &[val("9223372036854775807"), val("1")], None),
            test!("-", &[val("10"), val("3"), val("2")], success("5")),
            test!("-", &[val("5")], success("5")),
            test!("-", &[val("5"), val("0.5")], success("4.5")),
            test!("-", &[val("-9223372036854775807"), val("2")], None),
            test!("*", &[val("2"), val("3"), val("4")], success("24")),
            test!("*", &[val("2"), val("1.5")], success("3.0")),
            test!("*", &[val("4611686018427387904"), val("2")], None),
            test!("/", &[val("6"), val("4")], success("1.5")),
            test!("/", &[val("6"), val("3")], success("2.0")),
            test!("/", &[val("1.0"), val("4")], success("0.25")),
            test!("/", &[val("6")], success("6")),
            test!("/", &[val("#t"), val("1")], None),
            test!("mod", &[val("7"), val("3")], success("1")),
            test!("mod", &[val("-7"), val("3")], success("-1")),
            test!("mod", &[val("7.5"), val("2")], success("1.5")),
            test!("mod", &[val("7"), val("0")], None),
            test!("pow", &[val("2"), val("8")], success("256")),
            test!("pow", &[val("2"), val("-1")], success("0.5")),
            test!("pow", &[val("4"), val("0.5")], success("2.0")),
            test!("pow", &[val("2"), val("64")], None),
            test!("max", &[val("1"), val("5"), val("3")], success("5")),
            test!("max", &[val("1"), val("2.5")], success("2.5")),
            test!("min", &[val("4"), val("-2"), val("3")], success("-2")),
            test!("min", &[val("4"), val("x")], None),
            test!("abs", &[val("-4")], success("4")),
            test!("abs", &[val("-4.5")], success("4.5")),
            test!("abs", &[val("-9223372036854775808")], None),
            test!("abs", &[], None),
            // =================================================================
            // COMPARISON AND LOGIC
            // =================================================================
            test!("=", &[val("1"), val("1"), val("1")], success("#t")),
            test!("=", &[val("1"), val("1.0")], success("#t")),
            test!("=", &[val("1"), val("2"), val("3")], success("#f")),
            test!("=", &[val("5")], success("#t")),
            test!("=", &[], success("()")),
            test!("=", &[val("1"), val("\"1\"")], None),
            test!("<", &[val("-5"), val("-2"), val("0"), val("3")], success("#t")),
            test!("<", &[val("1"), val("2"), val("1")], success("#f")),
            test!(">", &[val("3"), val("2.5")], success("#t")),
            test!("<=", &[val("2"), val("2"), val("3")], success("#t")),
            test!(">=", &[val("2"), val("3")], success("#f")),
            test!(
                "<",
                &[val("9223372036854775806"), val("9223372036854775807")],
                success("#t")
            ),
            test!("and", &[val("#t"), val("#t")], success("#t")),
            test!("and", &[val("#t"), val("#f"), val("#t")], success("#f")),
            test!("or", &[val("#f"), val("#t")], success("#t")),
            test!("or", &[val("#f")], success("#f")),
            test!("or", &[val("#f"), val("0")], None),
            test!("not", &[val("#f")], success("#t")),
            test!("not", &[val("0")], None),
            // =================================================================
            // MATH
            // =================================================================
            test!("floor", &[val("2.7")], success("2.0")),
            test!("ceil", &[val("2.1")], success("3.0")),
            test!("round", &[val("2.5")], success("3.0")),
            test!("floor", &[val("4")], success("4")),
            test!("sqrt", &[val("16")], success("4.0")),
            test!("exp", &[val("0")], success("1.0")),
            test!("log", &[val("1")], success("0.0")),
            test!("log10", &[val("1")], success("0.0")),
            test!("sin", &[val("0")], success("0.0")),
            test!("cos", &[val("0.0")], success("1.0")),
            test!("atan2", &[val("0"), val("1")], success("0.0")),
            test!("cast-double", &[val("3")], success("3.0")),
            test!("cast-double", &[val("2.5")], success("2.5")),
            test!("cast-double", &[val("\"3\"")], None),
            test!("sqrt", &[val("a"), val("b")], None),
            // =================================================================
            // PAIRS AND LISTS
            // =================================================================
            test!("cons", &[val("1"), val("2")], success("(1 . 2)")),
            test!("cons", &[val("1"), val("(2 3)")], success("(1 2 3)")),
            test!("cons", &[val("1")], None),
            test!("car", &[val("(1 2 3)")], success("1")),
            test!("cdr", &[val("(1 2 3)")], success("(2 3)")),
            test!("cdr", &[val("(1)")], success("()")),
            test!("car", &[val("()")], None),
            test!("car", &[val("5")], None),
            test!("car", &[nested.clone()], success("(1 2)")),
            test!("caar", &[nested.clone()], success("1")),
            test!("cadr", &[nested.clone()], success("(3 4)")),
            test!("cdar", &[nested.clone()], success("(2)")),
            test!("cddr", &[nested.clone()], success("(5)")),
            test!("caddr", &[nested.clone()], success("5")),
            test!("cdddr", &[nested.clone()], success("()")),
            test!("caadr", &[nested.clone()], success("3")),
            test!("cadar", &[nested.clone()], success("2")),
            test!("cddar", &[nested.clone()], success("()")),
            test!("cdadr", &[nested.clone()], success("(4)")),
            test!("caaar", &[nested.clone()], None),
            test!("cdaar", &[nested], None),
            test!("list", &[val("1"), val("2")], success("(1 2)")),
            test!("list", &[], success("()")),
            test!("null?", &[val("()")], success("#t")),
            test!("null?", &[val("(1)")], success("#f")),
            test!("null?", &[val("0")], success("#f")),
        ];

        for (test_expr, result, expected) in test_cases {
            match (result, expected) {
                (Ok(actual), Some(expected_val)) => {
                    assert_eq!(
                        actual, expected_val,
                        "Failed for test case: {test_expr}: got {actual}, expected {expected_val}"
                    );
                }
                (Err(_), None) => {} // Expected error
                (actual, expected) => panic!(
                    "Unexpected result for test case: {test_expr}\nGot: {actual:?}, Expected: {expected:?}"
                ),
            }
        }
    }

    #[test]
    fn test_double_results_keep_kind() {
        // 3.0 and 3 compare equal numerically but are different kinds
        let product = call_builtin("*", &[val("2"), val("1.5")]).unwrap();
        assert_eq!(product.as_double(), Some(3.0));
        let sum = call_builtin("+", &[val("1"), val("2")]).unwrap();
        assert_eq!(sum.as_int(), Some(3));
    }

    #[test]
    fn test_output_goes_through_port() {
        let port = BufferPort::new();
        let site = CallSite {
            ids: &IDS,
            port: &port,
            id: 77,
        };
        let display = find_builtin_op("display").unwrap();
        let result = display.apply(&[val("\"hi\"")], &site).unwrap();
        assert!(result.is_null());
        find_builtin_op("print")
            .unwrap()
            .apply(&[val("(1 2)")], &site)
            .unwrap();

        let written = port.take();
        assert_eq!(written[0].0, 77);
        assert_eq!(written[0].1.as_str(), Some("hi"));
        assert_eq!(written[1].1.to_string(), "(1 2)");
    }

    #[test]
    fn test_primitive_table_install_and_register() {
        let ids = IdGen::new();
        let env = Environment::new();
        env.define("car", Expr::int(&ids, 1));

        let mut table = PrimitiveTable::standard();
        table.register(BuiltinOp::new("twice", Arity::Exact(1), |args, site| {
            let n = args[0].as_int().unwrap_or_default();
            Ok(Expr::int(site.ids, n * 2))
        }));
        table.install(&env, &ids);

        assert_eq!(env.lookup("pi").as_double(), Some(std::f64::consts::PI));
        assert!(env.lookup("null").is_null());
        assert!(!env.lookup("null").is_not_found());
        // Pre-existing bindings win
        assert_eq!(env.lookup("car").as_int(), Some(1));

        let twice = table.get("twice").unwrap();
        let site = CallSite {
            ids: &ids,
            port: &SilentPort,
            id: 0,
        };
        assert_eq!(
            twice.apply(&[Expr::int(&ids, 21)], &site).unwrap().as_int(),
            Some(42)
        );
        assert!(matches!(
            twice.apply(&[], &site),
            Err(Error::ArityError { expected: 1, got: 0, expression: None })
        ));

        // Re-registering replaces
        let before = table.len();
        table.register(BuiltinOp::new("twice", Arity::Any, |_, site| Ok(Expr::null(site.ids))));
        assert_eq!(table.len(), before);
        assert_eq!(table.get("twice").unwrap().arity, Arity::Any);
    }

    #[test]
    fn test_arity_validation() {
        use Arity::*;

        Exact(2).validate(2).unwrap();
        Exact(2).validate(1).unwrap_err();
        Exact(2).validate(3).unwrap_err();

        Any.validate(0).unwrap();
        Any.validate(100).unwrap();

        match Exact(2).validate(1).unwrap_err() {
            Error::ArityError { expected, got, .. } => {
                assert_eq!(expected, 2);
                assert_eq!(got, 1);
            }
            _ => panic!("Expected ArityError"),
        }
    }
}

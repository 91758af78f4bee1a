#![expect(clippy::unwrap_used)] // test code OK

use mintlisp::{Error, Interpreter, MAX_EVAL_DEPTH};
use mintlisp::ast::{Expr, IdGen, deep_clone_for_isolated_execution};
use mintlisp::config::{ActivationMode, Config, EvalConfig, ParseConfig};
use mintlisp::port::BufferPort;
use mintlisp::scheme::tokenizer::tokenize;
use mintlisp::scheme::{parse_tokens, try_read_one};
use std::sync::Arc;

fn interpreter_with(activation: ActivationMode) -> (Interpreter, Arc<BufferPort>) {
    let port = Arc::new(BufferPort::new());
    let config = Config {
        eval: EvalConfig {
            activation,
            ..EvalConfig::default()
        },
        ..Config::default()
    };
    (Interpreter::with_config(port.clone(), config), port)
}

fn interpreter() -> (Interpreter, Arc<BufferPort>) {
    interpreter_with(ActivationMode::default())
}

fn eval(interp: &Interpreter, text: &str) -> Expr {
    let expr = interp.try_read_one(text).unwrap();
    interp.try_evaluate(&expr).unwrap()
}

#[test]
fn tokenize_define_sugar() {
    let tokens = tokenize("(define (test-func a b) (+ a b))", ParseConfig::default()).unwrap();
    assert_eq!(tokens.len(), 13);
}

#[test]
fn parse_define_sugar_token_stream() {
    let ids = IdGen::new();
    let tokens: Vec<_> = tokenize("(define (test-func a b) (+ a b))", ParseConfig::default())
        .unwrap()
        .into_iter()
        .map(|spanned| spanned.token)
        .collect();
    let expr = parse_tokens(&tokens, &ids).unwrap();
    assert_eq!(
        expr.debug_string(),
        "(define . ((Symbol:test-func . (Symbol:a . (Symbol:b . _null_))) . \
         ((Symbol:+ . (Symbol:a . (Symbol:b . _null_))) . _null_)))"
    );
}

#[test]
fn define_then_lookup() {
    let (interp, _) = interpreter();
    assert!(eval(&interp, "(define test_var 100)").is_null());
    assert_eq!(interp.global().get("test_var").unwrap().as_int(), Some(100));
    assert_eq!(eval(&interp, "test_var").as_int(), Some(100));
}

#[test]
fn nested_arithmetic() {
    let (interp, _) = interpreter();
    assert_eq!(eval(&interp, "(+ 10 (- 10 5) (* 1 5))").as_int(), Some(20));
}

#[test]
fn tail_recursive_factorial_in_both_modes() {
    for mode in [ActivationMode::Cached, ActivationMode::FreshPerCall] {
        let (interp, _) = interpreter_with(mode);
        eval(
            &interp,
            "(define (fact n acc) (if (= n 0) acc (fact (- n 1) (* acc n))))",
        );
        assert_eq!(eval(&interp, "(fact 10 1)").as_int(), Some(3_628_800), "{mode:?}");

        eval(
            &interp,
            "(define (count n acc) (if (= n 0) acc (count (- n 1) (+ acc 1))))",
        );
        assert_eq!(eval(&interp, "(count 10000 0)").as_int(), Some(10_000), "{mode:?}");
    }
}

#[test]
fn anonymous_procedure_promotes_to_double() {
    let (interp, _) = interpreter();
    let value = eval(&interp, "((lambda (a b) (* a b)) 4 1.5)");
    assert_eq!(value.as_double(), Some(6.0));
    assert_eq!(value.to_string(), "6.0");
}

#[test]
fn bit_doubling() {
    let (interp, _) = interpreter();
    eval(
        &interp,
        "(define (bit n) (if (= n 0) 1 (* 2 (bit (- n 1)))))",
    );
    assert_eq!(eval(&interp, "(bit 8)").as_int(), Some(256));
    assert_eq!(eval(&interp, "(bit 40)").as_int(), Some(1 << 40));
}

#[test]
fn set_and_redefinition() {
    let (interp, port) = interpreter();
    eval(&interp, "(define total 1)");
    eval(&interp, "(set! total (+ total 41))");
    assert_eq!(eval(&interp, "total").as_int(), Some(42));

    // Refused operations leave state alone and carry on
    assert!(eval(&interp, "(define total 0)").is_null());
    assert!(eval(&interp, "(set! nowhere 1)").is_null());
    assert_eq!(eval(&interp, "total").as_int(), Some(42));
    assert_eq!(port.take_errors().len(), 2);
}

#[test]
fn quoted_list_accessors() {
    let (interp, _) = interpreter();
    assert_eq!(eval(&interp, "(car (quote (1 2 3)))").as_int(), Some(1));
    assert_eq!(eval(&interp, "(caddr '(1 2 3))").as_int(), Some(3));
    assert_eq!(eval(&interp, "(cdr '(1 . 2))").as_int(), Some(2));
}

#[test]
fn read_all_then_evaluate_in_order() {
    let (interp, port) = interpreter();
    let exprs = interp.read_all(
        "; a small program\n(define (sq x) (* x x))\n(print (sq 12))\n(sq 1.5)",
    );
    assert_eq!(exprs.len(), 3);
    let values: Vec<Expr> = exprs.iter().map(|e| interp.evaluate(e)).collect();
    assert_eq!(values[2].as_double(), Some(2.25));
    assert_eq!(port.lines(), vec!["144"]);
}

#[test]
fn bad_expression_does_not_poison_later_ones() {
    let (interp, port) = interpreter();
    assert!(eval(&interp, "(+ 1 \"two\")").is_null());
    assert!(eval(&interp, "(undefined-proc 1 2)").is_null());
    assert_eq!(eval(&interp, "(+ 1 2)").as_int(), Some(3));
    assert!(!port.error_lines().is_empty());
}

#[test]
fn shadowing_in_closures() {
    let (interp, _) = interpreter();
    eval(&interp, "(define x 1)");
    eval(&interp, "(define (shadow x) (* x 10))");
    assert_eq!(eval(&interp, "(shadow 5)").as_int(), Some(50));
    assert_eq!(eval(&interp, "x").as_int(), Some(1));
}

#[test]
fn isolated_clones_evaluate_on_threads() {
    let (interp, _) = interpreter();
    eval(
        &interp,
        "(define (sum-to n acc) (if (= n 0) acc (sum-to (- n 1) (+ acc n))))",
    );
    let interp = Arc::new(interp);
    let program = try_read_one("(sum-to 2000 0)", interp.ids()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let interp = Arc::clone(&interp);
            let copy = deep_clone_for_isolated_execution(&program);
            assert_eq!(copy.id(), program.id());
            std::thread::spawn(move || interp.try_evaluate(&copy).unwrap().as_int())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(2_001_000));
    }
}

#[test]
fn edit_loaded_program_and_rerun() {
    let (mut interp, port) = interpreter();
    let roots = interp.load("(print (+ 1 2 3))").unwrap();
    let call = interp.trees()[0].flatten()[1].clone();
    let items = call.flatten();

    interp.remove_by_id(items[2].id()).unwrap();
    interp.run();
    interp.insert_after_id(items[3].id(), items[0].id()).unwrap();
    interp.run();
    interp.overwrite_by_id(items[1].id(), "(* 5 5)").unwrap();
    interp.run();

    assert_eq!(port.lines(), vec!["4", "4", "28"]);
    assert_eq!(interp.trees()[0].to_string(), "(print (+ 3 (* 5 5)))");
    assert_eq!(interp.trees()[0].id(), roots[0]);
}

#[test]
fn runaway_recursion_hits_depth_limit() {
    let (interp, port) = interpreter();
    eval(
        &interp,
        "(define (make-deep depth) (if (= depth 0) 42 (+ 1 (make-deep (- depth 1)))))",
    );
    assert!(matches!(
        interp.eval_str("(make-deep 1000)"),
        Err(Error::DepthLimit { max }) if max == MAX_EVAL_DEPTH
    ));

    // The forgiving entry point reports it and gives null
    let expr = interp.try_read_one("(make-deep 1000)").unwrap();
    assert!(interp.evaluate(&expr).is_null());
    let errors = port.take_errors();
    assert!(errors.iter().any(|(id, msg)| *id == expr.id() && msg.contains("depth limit")));

    assert_eq!(eval(&interp, "(make-deep 50)").as_int(), Some(92));
}

#[test]
fn deeply_nested_values() {
    let (interp, port) = interpreter();
    eval(
        &interp,
        "(define (nest n acc) (if (= n 0) acc (nest (- n 1) (cons acc 1))))",
    );
    let deep = eval(&interp, "(nest 100000 0)");
    let again = eval(&interp, "(nest 100000 0)");
    assert_eq!(deep, again);
    assert_eq!(deep_clone_for_isolated_execution(&deep), deep);

    let text = deep.to_string();
    assert!(text.starts_with("((((") && text.contains("((0 . 1) . 1)"));
    assert!(deep.debug_string().ends_with(" . Int:1)"));

    eval(&interp, "(display (nest 100000 0))");
    assert_eq!(port.lines(), vec![text]);
}


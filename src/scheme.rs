//! S-expression reader.
//!
//! Text is lexed by [`tokenizer`] and the token stream is parsed with the
//! list-of-successes combinators in [`combinator`]. The grammar:
//!
//! ```text
//! datum := atom | "'" datum | "(" datum* ["." datum] ")"
//! ```
//!
//! Parenthesised sequences are right-folded into Null-terminated pair chains,
//! `()` reads as Null, `'x` reads as `(quote x)`, and the reserved words
//! `define lambda if quote set! begin import export` read as special-form nodes
//! instead of symbols.

pub mod combinator;
pub mod tokenizer;

use crate::ast::{Expr, IdGen, SpecialForm};
use crate::config::ParseConfig;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};
use combinator::{
    Parser, chain, exactly, fail, lazy, repeat_first, satisfy, succeed, zero_or_one,
};
use std::fmt;
use tokenizer::{Spanned, Token, char_offset, tokenize};

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Symbol(name) => write!(f, "{name}"),
            Token::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Token::Int(n) => write!(f, "{n}"),
            Token::Double(d) => write!(f, "{}", crate::ast::format_double(*d)),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Char(c) => write!(f, "#\\{c}"),
            Token::Null => write!(f, "null"),
            Token::Quote => write!(f, "'"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
        }
    }
}

fn is_atom(token: &Token) -> bool {
    matches!(
        token,
        Token::Symbol(_)
            | Token::Bool(_)
            | Token::Int(_)
            | Token::Double(_)
            | Token::Str(_)
            | Token::Char(_)
            | Token::Null
    )
}

fn atom_expr(token: &Token, ids: &IdGen) -> Expr {
    match token {
        Token::Symbol(name) => match SpecialForm::from_keyword(name) {
            Some(form) => Expr::form(ids, form),
            None => Expr::symbol(ids, name.clone()),
        },
        Token::Bool(b) => Expr::bool(ids, *b),
        Token::Int(n) => Expr::int(ids, *n),
        Token::Double(d) => Expr::double(ids, *d),
        Token::Str(s) => Expr::string(ids, s.clone()),
        Token::Char(c) => Expr::char(ids, *c),
        Token::Null => Expr::null(ids),
        // Guarded by `is_atom`
        Token::LParen | Token::RParen | Token::Quote | Token::Comma | Token::Dot => {
            Expr::not_found()
        }
    }
}

fn datum<'a>(ids: &'a IdGen) -> Parser<'a, Token, Expr> {
    let atom = satisfy(is_atom).map(move |token| atom_expr(&token, ids));
    let quoted = lazy(move || datum(ids))
        .after(exactly(Token::Quote))
        .map(move |quoted| Expr::list(ids, vec![Expr::form(ids, SpecialForm::Quote), quoted]));
    atom.or(quoted).or(list(ids))
}

fn list<'a>(ids: &'a IdGen) -> Parser<'a, Token, Expr> {
    let elements = repeat_first(lazy(move || datum(ids)));
    let dotted_tail = zero_or_one(lazy(move || datum(ids)).after(exactly(Token::Dot)));
    let body = chain(elements, move |items: Vec<Expr>| {
        dotted_tail.clone().then(move |tail| match tail {
            Some(_) if items.is_empty() => fail(),
            Some(tail) => succeed(Expr::list_with_tail(ids, items.clone(), tail)),
            None if items.is_empty() => succeed(Expr::null(ids)),
            None => succeed(Expr::list(ids, items.clone())),
        })
    });
    body.after(exactly(Token::LParen))
        .skip(exactly(Token::RParen))
}

/// Deepest nesting of lists and quote marks in a token stream
fn nesting_depth(tokens: &[Token]) -> usize {
    // true marks a quote still waiting for its datum
    let mut open: Vec<bool> = Vec::new();
    let mut max_depth = 0;
    let close_quotes = |open: &mut Vec<bool>| {
        while open.last() == Some(&true) {
            open.pop();
        }
    };
    for token in tokens {
        match token {
            Token::Quote | Token::LParen => {
                open.push(*token == Token::Quote);
                max_depth = max_depth.max(open.len());
            }
            Token::RParen => {
                open.pop();
                close_quotes(&mut open);
            }
            Token::Dot => {}
            _ => close_quotes(&mut open),
        }
    }
    max_depth
}

/// Parse a token stream into consecutive top-level expressions.
/// Returns the expressions and the number of tokens they consumed.
fn parse_sequence(tokens: &[Token], ids: &IdGen) -> (Vec<Expr>, usize) {
    let program = repeat_first(datum(ids));
    match program.parse(tokens).into_iter().next() {
        Some((exprs, rest)) => (exprs, tokens.len() - rest.len()),
        None => (Vec::new(), 0),
    }
}

/// Explain why parsing stopped at `index`
fn diagnose(tokens: &[Token], index: usize) -> (ParseErrorKind, String) {
    if tokens.contains(&Token::Comma) {
        return (
            ParseErrorKind::Unsupported,
            "Unquote (,) is not supported".to_owned(),
        );
    }
    let opens = tokens.iter().filter(|t| **t == Token::LParen).count();
    let closes = tokens.iter().filter(|t| **t == Token::RParen).count();
    if opens > closes {
        return (
            ParseErrorKind::Incomplete,
            "Unclosed parenthesis".to_owned(),
        );
    }
    match tokens.get(index) {
        Some(Token::RParen) => (ParseErrorKind::InvalidSyntax, "Unexpected ')'".to_owned()),
        Some(Token::Dot) => (ParseErrorKind::InvalidSyntax, "Misplaced '.'".to_owned()),
        Some(Token::Quote) if index + 1 == tokens.len() => (
            ParseErrorKind::Incomplete,
            "Quote mark without a datum".to_owned(),
        ),
        _ => (ParseErrorKind::InvalidSyntax, "Invalid syntax".to_owned()),
    }
}

fn check_depth(tokens: &[Token]) -> Result<(), Error> {
    let depth = nesting_depth(tokens);
    if depth > MAX_PARSE_DEPTH {
        return Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
        )));
    }
    Ok(())
}

/// Parse an already tokenized expression. Exactly one datum must cover the
/// whole stream.
pub fn parse_tokens(tokens: &[Token], ids: &IdGen) -> Result<Expr, Error> {
    check_depth(tokens)?;
    let (mut exprs, consumed) = parse_sequence(tokens, ids);
    if consumed < tokens.len() {
        let (kind, message) = diagnose(tokens, consumed);
        return Err(Error::ParseError(ParseError::new(
            kind,
            message,
            None,
            tokens.get(consumed).map(ToString::to_string),
        )));
    }
    match exprs.len() {
        1 => Ok(exprs.remove(0)),
        0 => Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::Incomplete,
            "No expression found",
        ))),
        n => Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::TrailingContent,
            format!("Expected one expression, found {n}"),
        ))),
    }
}

fn read_sequence(text: &str, ids: &IdGen, config: ParseConfig) -> Result<Vec<Expr>, Error> {
    let spanned = tokenize(text, config)?;
    let tokens: Vec<Token> = spanned.iter().map(|s| s.token.clone()).collect();
    check_depth(&tokens)?;

    let (exprs, consumed) = parse_sequence(&tokens, ids);
    if consumed < tokens.len() {
        let (kind, message) = diagnose(&tokens, consumed);
        let Spanned { token, offset } = &spanned[consumed];
        return Err(Error::ParseError(ParseError::with_context_and_found(
            kind,
            message,
            text,
            char_offset(text, *offset),
            Some(token.to_string()),
        )));
    }
    Ok(exprs)
}

/// Read exactly one expression.
pub fn try_read_one(text: &str, ids: &IdGen) -> Result<Expr, Error> {
    try_read_one_with_config(text, ids, ParseConfig::default())
}

pub fn try_read_one_with_config(
    text: &str,
    ids: &IdGen,
    config: ParseConfig,
) -> Result<Expr, Error> {
    let mut exprs = read_sequence(text, ids, config)?;
    match exprs.len() {
        1 => Ok(exprs.remove(0)),
        0 => Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::Incomplete,
            "No expression found",
        ))),
        n => Err(Error::ParseError(ParseError::with_context(
            ParseErrorKind::TrailingContent,
            format!("Expected one expression, found {n}"),
            text,
            0,
        ))),
    }
}

/// Read every top-level expression. Empty input gives an empty vector.
pub fn try_read_all(text: &str, ids: &IdGen) -> Result<Vec<Expr>, Error> {
    read_sequence(text, ids, ParseConfig::default())
}

pub fn try_read_all_with_config(
    text: &str,
    ids: &IdGen,
    config: ParseConfig,
) -> Result<Vec<Expr>, Error> {
    read_sequence(text, ids, config)
}

/// Read one expression; on failure log the diagnostic and return the
/// not-found sentinel.
pub fn read_one(text: &str, ids: &IdGen) -> Expr {
    try_read_one(text, ids).unwrap_or_else(|err| {
        tracing::warn!(%err, "read failed");
        Expr::not_found()
    })
}

/// Read all expressions; on failure log the diagnostic and return nothing.
pub fn read_all(text: &str, ids: &IdGen) -> Vec<Expr> {
    try_read_all(text, ids).unwrap_or_else(|err| {
        tracing::warn!(%err, "read failed");
        Vec::new()
    })
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    /// Test result variants for comprehensive parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(&'static str),       // Parsing should succeed with this debug string
        SpecificError(&'static str), // Parsing should fail with error containing this string
        Error,                       // Parsing should fail (any error)
    }
    use ParseTestResult::*;

    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        let ids = IdGen::new();
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{}", i + 1);
            match (try_read_one(input, &ids), expected) {
                (Ok(actual), Success(debug)) => {
                    assert_eq!(actual.debug_string(), *debug, "{test_id}: '{input}'");

                    let displayed = actual.to_string();
                    let reparsed = try_read_one(&displayed, &ids).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(
                        reparsed.debug_string(),
                        actual.debug_string(),
                        "{test_id}: round-trip mismatch for '{input}'"
                    );
                }
                (Err(_), Error) => {}
                (Err(err), SpecificError(text)) => {
                    let msg = format!("{err:?}");
                    assert!(
                        msg.contains(text),
                        "{test_id}: error should contain '{text}', got {msg}"
                    );
                }
                (Ok(actual), _) => panic!("{test_id}: expected error, got {actual:?}"),
                (Err(err), Success(_)) => {
                    panic!("{test_id}: expected success for '{input}', got error {err}")
                }
            }
        }
    }

    #[test]
    fn test_parser_comprehensive() {
        let test_cases = vec![
            // ===== ATOMS =====
            ("42", Success("Int:42")),
            ("-3.25", Success("Double:-3.25")),
            ("\"text\"", Success("String:\"text\"")),
            ("#\\x", Success("Char:x")),
            ("#f", Success("Bool:false")),
            ("sym", Success("Symbol:sym")),
            ("null", Success("_null_")),
            ("nullable", Success("Symbol:nullable")),
            // ===== RESERVED WORDS =====
            ("define", Success("define")),
            ("(set! x 1)", Success("(set! . (Symbol:x . (Int:1 . _null_)))")),
            ("(begin)", Success("(begin . _null_)")),
            ("(import lib)", Success("(import . (Symbol:lib . _null_))")),
            ("display", Success("Symbol:display")),
            // ===== LISTS =====
            ("()", Success("_null_")),
            ("( )", Success("_null_")),
            ("(1)", Success("(Int:1 . _null_)")),
            ("(1 2)", Success("(Int:1 . (Int:2 . _null_))")),
            ("((1) ())", Success("((Int:1 . _null_) . (_null_ . _null_))")),
            ("(1 . 2)", Success("(Int:1 . Int:2)")),
            ("(1 2 . (3))", Success("(Int:1 . (Int:2 . (Int:3 . _null_)))")),
            ("(a . ())", Success("(Symbol:a . _null_)")),
            // ===== QUOTE =====
            ("'a", Success("(quote . (Symbol:a . _null_))")),
            ("'(a null)", Success("(quote . ((Symbol:a . (_null_ . _null_)) . _null_))")),
            (
                "'(1 2)",
                Success("(quote . ((Int:1 . (Int:2 . _null_)) . _null_))"),
            ),
            (
                "''a",
                Success("(quote . ((quote . (Symbol:a . _null_)) . _null_))"),
            ),
            ("'()", Success("(quote . (_null_ . _null_))")),
            // ===== ERRORS =====
            ("", SpecificError("No expression")),
            ("   ; only a comment", SpecificError("No expression")),
            ("(1 2", SpecificError("Incomplete")),
            ("((1)", SpecificError("Unclosed")),
            (")", SpecificError("Unexpected ')'")),
            ("(1))", SpecificError("Unexpected ')'")),
            (". 1", SpecificError("Misplaced")),
            ("(. 1)", Error),
            ("(1 . 2 3)", Error),
            ("(1 . )", Error),
            ("'", SpecificError("without a datum")),
            ("(a ,b)", SpecificError("Unsupported")),
            ("1 2", SpecificError("TrailingContent")),
            ("(a) (b)", SpecificError("found 2")),
            ("#x", SpecificError("Invalid token")),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_parse_define_token_stream() {
        let ids = IdGen::new();
        let tokens: Vec<Token> = tokenize("(define (test-func a b) (+ a b))", ParseConfig::default())
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect();
        let expr = parse_tokens(&tokens, &ids).unwrap();
        assert_eq!(
            expr.debug_string(),
            "(define . ((Symbol:test-func . (Symbol:a . (Symbol:b . _null_))) . ((Symbol:+ . (Symbol:a . (Symbol:b . _null_))) . _null_)))"
        );

        assert!(parse_tokens(&[], &ids).is_err());
        assert!(parse_tokens(&[Token::LParen], &ids).is_err());
    }

    #[test]
    fn test_read_all_sequences() {
        let ids = IdGen::new();
        let text = "(define x 1)\n; comment\n(define y 2)\n(+ x y)";
        let exprs = try_read_all(text, &ids).unwrap();
        assert_eq!(exprs.len(), 3);
        assert_eq!(exprs[2].to_string(), "(+ x y)");

        assert!(try_read_all("", &ids).unwrap().is_empty());
        assert!(try_read_all("(1) (2", &ids).is_err());

        // Forgiving entry points
        assert!(read_all("(1) )", &ids).is_empty());
        assert!(read_one("(", &ids).is_not_found());
        assert_eq!(read_one("7", &ids).as_int(), Some(7));
    }

    #[test]
    fn test_parse_error_context() {
        let ids = IdGen::new();
        match try_read_all("(ok) (bad))", &ids).unwrap_err() {
            crate::Error::ParseError(e) => {
                assert_eq!(e.kind, ParseErrorKind::InvalidSyntax);
                assert_eq!(e.found.as_deref(), Some(")"));
                assert!(e.context.unwrap().contains("(bad))"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parser_depth_limits() {
        let ids = IdGen::new();
        let at_limit = format!(
            "{}1{}",
            "(".repeat(MAX_PARSE_DEPTH),
            ")".repeat(MAX_PARSE_DEPTH)
        );
        let over_limit = format!(
            "{}1{}",
            "(".repeat(MAX_PARSE_DEPTH + 1),
            ")".repeat(MAX_PARSE_DEPTH + 1)
        );
        let quotes_over_limit = format!("{}a", "'".repeat(MAX_PARSE_DEPTH + 1));
        let siblings = format!("({})", "(1) ".repeat(MAX_PARSE_DEPTH * 4));

        assert!(try_read_one(&at_limit, &ids).is_ok());
        assert!(try_read_one(&siblings, &ids).is_ok());
        for input in [over_limit, quotes_over_limit] {
            match try_read_one(&input, &ids).unwrap_err() {
                crate::Error::ParseError(e) => assert_eq!(e.kind, ParseErrorKind::TooDeeplyNested),
                other => panic!("expected depth error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_nesting_depth_counts_quotes_and_parens() {
        let lex = |s: &str| -> Vec<Token> {
            tokenize(s, ParseConfig::default())
                .unwrap()
                .into_iter()
                .map(|t| t.token)
                .collect()
        };
        assert_eq!(nesting_depth(&lex("1")), 0);
        assert_eq!(nesting_depth(&lex("(1 (2) 3)")), 2);
        assert_eq!(nesting_depth(&lex("''a")), 2);
        assert_eq!(nesting_depth(&lex("'(a 'b)")), 3);
        assert_eq!(nesting_depth(&lex("('a 'b 'c)")), 2);
    }
}

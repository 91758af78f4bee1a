//! Character-level lexer.
//!
//! Every token except the punctuation marks must be followed by a divider:
//! whitespace, `(`, `)`, `"`, `;` or the end of input. The divider is checked
//! with a lookahead and left in place. This rule is what separates the dotted-pair
//! marker from a decimal point and from a dot inside a symbol.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit0, digit1, one_of, satisfy},
    combinator::{eof, map, map_res, opt, peek, recognize, value},
    sequence::{preceded, terminated},
};

use crate::config::ParseConfig;
use crate::{Error, ParseError, ParseErrorKind};

/// Characters allowed to start a symbol besides ASCII letters
pub(crate) const SYMBOL_INITIAL_SPECIALS: &str = "!$%&*/:<=>?^_~";

/// Characters allowed after the first one besides initials and digits
pub(crate) const SYMBOL_SUBSEQUENT_SPECIALS: &str = "+-.@";

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    Symbol(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Char(char),
    /// The `null` literal
    Null,
    Quote,
    Comma,
    Dot,
}

/// A token and the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn is_divider(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';')
}

fn is_symbol_initial(c: char) -> bool {
    c.is_ascii_alphabetic() || SYMBOL_INITIAL_SPECIALS.contains(c)
}

fn is_symbol_subsequent(c: char) -> bool {
    is_symbol_initial(c) || c.is_ascii_digit() || SYMBOL_SUBSEQUENT_SPECIALS.contains(c)
}

/// Succeeds without consuming when the next character ends a token
fn divider(input: &str) -> IResult<&str, ()> {
    alt((value((), peek(satisfy(is_divider))), value((), eof))).parse(input)
}

fn parse_identifier(input: &str) -> IResult<&str, Token> {
    map(
        terminated(
            recognize((satisfy(is_symbol_initial), take_while(is_symbol_subsequent))),
            divider,
        ),
        |name: &str| Token::Symbol(name.to_owned()),
    )
    .parse(input)
}

/// A lone `+` or `-`
fn parse_peculiar_identifier(input: &str) -> IResult<&str, Token> {
    map(terminated(recognize(one_of("+-")), divider), |name: &str| {
        Token::Symbol(name.to_owned())
    })
    .parse(input)
}

fn parse_bool(input: &str) -> IResult<&str, Token> {
    terminated(
        alt((
            value(Token::Bool(true), tag("#t")),
            value(Token::Bool(false), tag("#f")),
        )),
        divider,
    )
    .parse(input)
}

fn parse_null(input: &str) -> IResult<&str, Token> {
    value(Token::Null, terminated(tag("null"), divider)).parse(input)
}

fn parse_int(input: &str) -> IResult<&str, Token> {
    map_res(
        terminated(recognize((opt(one_of("+-")), digit1)), divider),
        |digits: &str| digits.parse::<i64>().map(Token::Int),
    )
    .parse(input)
}

/// (sign | digit) digit* "." digit+
fn parse_double(input: &str) -> IResult<&str, Token> {
    map_res(
        terminated(
            recognize((one_of("+-0123456789"), digit0, char('.'), digit1)),
            divider,
        ),
        |digits: &str| digits.parse::<f64>().map(Token::Double),
    )
    .parse(input)
}

fn parse_char(input: &str) -> IResult<&str, Token> {
    map(
        terminated(
            preceded(tag("#\\"), satisfy(|c: char| !c.is_whitespace())),
            divider,
        ),
        Token::Char,
    )
    .parse(input)
}

/// Only `\"` and `\\` are escapes; any other backslash sequence is rejected
fn parse_string(input: &str) -> IResult<&str, Token> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => return Ok((char_iter.as_str(), Token::Str(chars))),
            Some('\\') => {
                match char_iter.next() {
                    Some(escaped @ ('"' | '\\')) => chars.push(escaped),
                    _ => {
                        return Err(nom::Err::Error(nom::error::Error::new(
                            remaining,
                            nom::error::ErrorKind::Escaped,
                        )));
                    }
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                chars.push(ch);
                remaining = char_iter.as_str();
            }
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

fn parse_punctuation(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::LParen, char('(')),
        value(Token::RParen, char(')')),
        value(Token::Quote, char('\'')),
        value(Token::Comma, char(',')),
        value(Token::Dot, terminated(char('.'), divider)),
    ))
    .parse(input)
}

fn parse_token(input: &str) -> IResult<&str, Token> {
    alt((
        parse_punctuation,
        parse_bool,
        parse_char,
        parse_string,
        parse_double,
        parse_int,
        parse_null,
        parse_identifier,
        parse_peculiar_identifier,
    ))
    .parse(input)
}

fn parse_line_comment(input: &str) -> IResult<&str, &str> {
    recognize(preceded(char(';'), take_while(|c: char| c != '\n'))).parse(input)
}

/// Skip whitespace and, when enabled, `;` comments
fn skip_trivia(input: &str, handle_comments: bool) -> &str {
    let mut rest = input.trim_start();
    while handle_comments {
        match parse_line_comment(rest) {
            Ok((after, _)) => rest = after.trim_start(),
            Err(_) => break,
        }
    }
    rest
}

/// Lex as many tokens as possible and return them with the unlexed remainder.
/// Well-formed input leaves an empty remainder.
pub fn tokenize_partial(input: &str, config: ParseConfig) -> (Vec<Spanned>, &str) {
    let mut tokens = Vec::new();
    let mut rest = skip_trivia(input, config.handle_comments);

    while !rest.is_empty() {
        match parse_token(rest) {
            Ok((remaining, token)) => {
                tokens.push(Spanned {
                    token,
                    offset: input.len() - rest.len(),
                });
                rest = skip_trivia(remaining, config.handle_comments);
            }
            Err(_) => break,
        }
    }

    tracing::trace!(count = tokens.len(), leftover = rest.len(), "tokenized input");
    (tokens, rest)
}

/// Lex the whole input or report where lexing stopped
pub fn tokenize(input: &str, config: ParseConfig) -> Result<Vec<Spanned>, Error> {
    let (tokens, rest) = tokenize_partial(input, config);
    if rest.is_empty() {
        return Ok(tokens);
    }

    let offset = char_offset(input, input.len() - rest.len());
    let found: String = rest.chars().take_while(|c| !c.is_whitespace()).take(20).collect();
    let (kind, message) = if rest.starts_with('"') && !rest[1..].contains('"') {
        (ParseErrorKind::Incomplete, "Unterminated string literal".to_owned())
    } else if is_integer_literal(rest) {
        (
            ParseErrorKind::ImplementationLimit,
            format!("Integer literal out of range at position {offset}"),
        )
    } else {
        (
            ParseErrorKind::InvalidSyntax,
            format!("Invalid token at position {offset}"),
        )
    };
    Err(Error::ParseError(ParseError::with_context_and_found(
        kind,
        message,
        input,
        offset,
        Some(found),
    )))
}

/// Whether the next token is a signed digit run, which only fails to lex when
/// it does not fit an `i64`
fn is_integer_literal(rest: &str) -> bool {
    let literal = &rest[..rest.find(is_divider).unwrap_or(rest.len())];
    let digits = literal.strip_prefix(['+', '-']).unwrap_or(literal);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Convert a byte offset into a character offset
pub(crate) fn char_offset(input: &str, byte_offset: usize) -> usize {
    input
        .char_indices()
        .take_while(|(i, _)| *i < byte_offset)
        .count()
}

//! List-of-successes parser combinators.
//!
//! A [`Parser`] maps an input slice to every way it can consume a prefix of that
//! input: a vector of `(result, remaining_input)` pairs. An empty vector is failure,
//! several entries model ambiguity. Callers that need one outcome pick the first
//! candidate that consumed everything ([`Parser::first_full`]).
//!
//! The combinators are generic over the token type, so the same toolkit works on
//! characters and on lexer tokens.

use std::rc::Rc;

/// Every way a parser can succeed on an input
pub type Parsed<'a, T, R> = Vec<(R, &'a [T])>;

type ParseFn<'a, T, R> = dyn Fn(&'a [T]) -> Parsed<'a, T, R> + 'a;

pub struct Parser<'a, T, R>(Rc<ParseFn<'a, T, R>>);

impl<T, R> Clone for Parser<'_, T, R> {
    fn clone(&self) -> Self {
        Parser(Rc::clone(&self.0))
    }
}

impl<'a, T: 'a, R: 'a> Parser<'a, T, R> {
    pub fn new(f: impl Fn(&'a [T]) -> Parsed<'a, T, R> + 'a) -> Self {
        Parser(Rc::new(f))
    }

    pub fn parse(&self, input: &'a [T]) -> Parsed<'a, T, R> {
        (self.0)(input)
    }

    /// The first candidate that consumed the whole input
    pub fn first_full(&self, input: &'a [T]) -> Option<R> {
        self.parse(input)
            .into_iter()
            .find(|(_, rest)| rest.is_empty())
            .map(|(result, _)| result)
    }

    pub fn map<S: 'a>(self, f: impl Fn(R) -> S + 'a) -> Parser<'a, T, S> {
        Parser::new(move |input| {
            self.parse(input)
                .into_iter()
                .map(|(result, rest)| (f(result), rest))
                .collect()
        })
    }

    /// Method form of [`chain`]
    pub fn then<S: 'a>(self, next: impl Fn(R) -> Parser<'a, T, S> + 'a) -> Parser<'a, T, S> {
        chain(self, next)
    }

    /// Method form of [`alternative`]
    pub fn or(self, other: Parser<'a, T, R>) -> Parser<'a, T, R> {
        alternative(self, other)
    }

    /// Run `next` after this parser and keep this parser's result
    pub fn skip<S: 'a>(self, next: Parser<'a, T, S>) -> Parser<'a, T, R>
    where
        R: Clone,
    {
        chain(self, move |result: R| next.clone().map(move |_| result.clone()))
    }

    /// Run `self` after `first` and keep this parser's result
    pub fn after<S: 'a>(self, first: Parser<'a, T, S>) -> Parser<'a, T, R> {
        chain(first, move |_| self.clone())
    }
}

/// Succeed with `value` without consuming anything
pub fn succeed<'a, T: 'a, R: Clone + 'a>(value: R) -> Parser<'a, T, R> {
    Parser::new(move |input| vec![(value.clone(), input)])
}

/// Never succeed
pub fn fail<'a, T: 'a, R: 'a>() -> Parser<'a, T, R> {
    Parser::new(|_| Vec::new())
}

/// Consume exactly one token, whatever it is
pub fn one_token<'a, T: Clone + 'a>() -> Parser<'a, T, T> {
    Parser::new(|input: &'a [T]| match input.split_first() {
        Some((token, rest)) => vec![(token.clone(), rest)],
        None => Vec::new(),
    })
}

/// Monadic bind: run `parser`, then the parser built from each of its results
/// on the matching remainder. All outcomes are concatenated.
pub fn chain<'a, T: 'a, R: 'a, S: 'a>(
    parser: Parser<'a, T, R>,
    next: impl Fn(R) -> Parser<'a, T, S> + 'a,
) -> Parser<'a, T, S> {
    Parser::new(move |input| {
        parser
            .parse(input)
            .into_iter()
            .flat_map(|(result, rest)| next(result).parse(rest))
            .collect()
    })
}

/// Both parsers are tried; the outcomes of `first` come before those of `second`
pub fn alternative<'a, T: 'a, R: 'a>(
    first: Parser<'a, T, R>,
    second: Parser<'a, T, R>,
) -> Parser<'a, T, R> {
    Parser::new(move |input| {
        let mut results = first.parse(input);
        results.extend(second.parse(input));
        results
    })
}

/// Consume one token matching `pred`
pub fn satisfy<'a, T: Clone + 'a>(pred: impl Fn(&T) -> bool + 'a) -> Parser<'a, T, T> {
    Parser::new(move |input: &'a [T]| match input.split_first() {
        Some((token, rest)) if pred(token) => vec![(token.clone(), rest)],
        _ => Vec::new(),
    })
}

/// Succeed without consuming when the next token matches `pred`
pub fn lookahead<'a, T: 'a>(pred: impl Fn(&T) -> bool + 'a) -> Parser<'a, T, ()> {
    Parser::new(move |input: &'a [T]| match input.first() {
        Some(token) if pred(token) => vec![((), input)],
        _ => Vec::new(),
    })
}

/// Succeed only on empty input
pub fn end_of_input<'a, T: 'a>() -> Parser<'a, T, ()> {
    Parser::new(|input: &'a [T]| {
        if input.is_empty() {
            vec![((), input)]
        } else {
            Vec::new()
        }
    })
}

pub fn exactly<'a, T: Clone + PartialEq + 'a>(expected: T) -> Parser<'a, T, T> {
    satisfy(move |token| *token == expected)
}

pub fn not_token<'a, T: Clone + PartialEq + 'a>(excluded: T) -> Parser<'a, T, T> {
    satisfy(move |token| *token != excluded)
}

/// Zero or one occurrence; the `Some` outcomes come first
pub fn zero_or_one<'a, T: 'a, R: 'a>(parser: Parser<'a, T, R>) -> Parser<'a, T, Option<R>> {
    Parser::new(move |input| {
        let mut results: Parsed<'a, T, Option<R>> = parser
            .parse(input)
            .into_iter()
            .map(|(result, rest)| (Some(result), rest))
            .collect();
        results.push((None, input));
        results
    })
}

/// One or more repetitions, every possible count, longest first.
///
/// Repetitions that consume nothing are dropped, so a parser that can succeed
/// on empty input cannot make this loop forever.
pub fn one_or_more<'a, T: 'a, R: Clone + 'a>(parser: Parser<'a, T, R>) -> Parser<'a, T, Vec<R>> {
    Parser::new(move |input| {
        let mut levels: Vec<Parsed<'a, T, Vec<R>>> = Vec::new();
        let mut frontier: Parsed<'a, T, Vec<R>> = vec![(Vec::new(), input)];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for &(ref acc, rest) in &frontier {
                for (result, remaining) in parser.parse(rest) {
                    if remaining.len() == rest.len() {
                        continue;
                    }
                    let mut grown = acc.clone();
                    grown.push(result);
                    next.push((grown, remaining));
                }
            }
            if !next.is_empty() {
                levels.push(next.clone());
            }
            frontier = next;
        }
        levels.into_iter().rev().flatten().collect()
    })
}

/// Zero or more repetitions, every possible count, longest first
pub fn zero_or_more<'a, T: 'a, R: Clone + 'a>(parser: Parser<'a, T, R>) -> Parser<'a, T, Vec<R>> {
    let repeated = one_or_more(parser);
    Parser::new(move |input| {
        let mut results = repeated.parse(input);
        results.push((Vec::new(), input));
        results
    })
}

/// Deterministic repetition: keep applying `parser`, committing to its first
/// outcome each time, until it fails or stops consuming. Yields exactly one result.
///
/// Equivalent to taking the longest outcome of [`zero_or_more`] whenever the
/// repeated parser is unambiguous, without materialising every shorter prefix.
pub fn repeat_first<'a, T: 'a, R: 'a>(parser: Parser<'a, T, R>) -> Parser<'a, T, Vec<R>> {
    Parser::new(move |input| {
        let mut acc = Vec::new();
        let mut rest = input;
        while let Some((result, remaining)) = parser.parse(rest).into_iter().next() {
            if remaining.len() == rest.len() {
                break;
            }
            acc.push(result);
            rest = remaining;
        }
        vec![(acc, rest)]
    })
}

/// Defer building a parser until it runs; needed for recursive grammars
pub fn lazy<'a, T: 'a, R: 'a>(build: impl Fn() -> Parser<'a, T, R> + 'a) -> Parser<'a, T, R> {
    Parser::new(move |input| build().parse(input))
}

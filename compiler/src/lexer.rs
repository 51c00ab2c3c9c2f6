// Lexer for free-form Fortran source with OpenMP/OpenACC directive lines.
//
// Uses the `logos` crate for DFA-based lexing. Whole directive lines
// (`!$omp ...`, `!$acc ...`) become a single `Directive` token carrying the
// recognised directive name; the clause text after the name is lexed again
// by the clause parser from the same source.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

use crate::directive::{self, DirectiveLine, Sentinel};

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Token types.
///
/// Keywords and symbols are matched as fixed strings. Literals carry parsed
/// values. Identifiers carry no value — use the span to retrieve the text
/// from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|![^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("program")]
    Program,
    #[token("subroutine")]
    Subroutine,
    #[token("end")]
    End,
    #[token("do")]
    Do,
    #[token("while")]
    While,
    #[token("if")]
    If,
    #[token("then")]
    Then,
    #[token("else")]
    Else,
    #[token("call")]
    Call,
    #[token("print")]
    Print,
    #[token("block")]
    Block,
    #[token("continue")]
    Continue,
    #[token("integer")]
    Integer,
    #[token("real")]
    Real,
    #[token("complex")]
    Complex,
    #[token("logical")]
    Logical,
    #[token("character")]
    Character,
    #[token("type")]
    Type,
    #[token("common")]
    Common,
    #[token("namelist")]
    Namelist,
    #[token("implicit")]
    Implicit,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("::")]
    DoubleColon,
    #[token(":")]
    Colon,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("**")]
    Power,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("==")]
    #[token(".eq.")]
    EqEq,
    #[token("/=")]
    #[token(".ne.")]
    NotEq,
    #[token("<")]
    #[token(".lt.")]
    Lt,
    #[token("<=")]
    #[token(".le.")]
    Le,
    #[token(">")]
    #[token(".gt.")]
    Gt,
    #[token(">=")]
    #[token(".ge.")]
    Ge,
    #[token(".and.")]
    And,
    #[token(".or.")]
    Or,
    #[token(".not.")]
    Not,
    #[token(".eqv.")]
    Eqv,
    #[token(".neqv.")]
    Neqv,
    #[token(".true.")]
    True,
    #[token(".false.")]
    False,

    // ── Literals ──
    //
    // A real literal needs a digit after the dot so that `1.and.` lexes as
    // `1` followed by `.and.`.
    /// Real literal. `d` exponents mark double precision; the parser reads
    /// the kind back from the lexeme.
    #[regex(r"[0-9]+\.[0-9]+([eEdD][+-]?[0-9]+)?", parse_real)]
    #[regex(r"[0-9]+[eEdD][+-]?[0-9]+", parse_real)]
    RealLit(f64),

    /// Integer literal.
    #[regex(r"[0-9]+", parse_int)]
    IntLit(i64),

    /// Character literal, single or double quoted, with doubled-quote escapes.
    #[regex(r"'([^'\n]|'')*'", parse_string)]
    #[regex(r#""([^"\n]|"")*""#, parse_string)]
    StringLit(String),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Directives ──
    //
    // Outranks the comment skip pattern, which matches the same text.
    #[regex(r"!\$[oO][mM][pP][^\n]*", lex_omp, priority = 20)]
    #[regex(r"!\$[aA][cC][cC][^\n]*", lex_acc, priority = 20)]
    Directive(DirectiveLine),

    // ── Structure ──
    /// One or more newlines (statement terminator). `;` separates
    /// statements on one line.
    #[regex(r"\n+")]
    #[token(";")]
    Newline,
}

impl Token {
    /// Tokens whose text is a word: identifiers and keywords. The clause
    /// parser matches clause names by text, so `if` and `do` are words there.
    pub fn is_word(&self) -> bool {
        matches!(
            self,
            Token::Ident
                | Token::Program
                | Token::Subroutine
                | Token::End
                | Token::Do
                | Token::While
                | Token::If
                | Token::Then
                | Token::Else
                | Token::Call
                | Token::Print
                | Token::Block
                | Token::Continue
                | Token::Integer
                | Token::Real
                | Token::Complex
                | Token::Logical
                | Token::Character
                | Token::Type
                | Token::Common
                | Token::Namelist
                | Token::Implicit
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Program => write!(f, "program"),
            Token::Subroutine => write!(f, "subroutine"),
            Token::End => write!(f, "end"),
            Token::Do => write!(f, "do"),
            Token::While => write!(f, "while"),
            Token::If => write!(f, "if"),
            Token::Then => write!(f, "then"),
            Token::Else => write!(f, "else"),
            Token::Call => write!(f, "call"),
            Token::Print => write!(f, "print"),
            Token::Block => write!(f, "block"),
            Token::Continue => write!(f, "continue"),
            Token::Integer => write!(f, "integer"),
            Token::Real => write!(f, "real"),
            Token::Complex => write!(f, "complex"),
            Token::Logical => write!(f, "logical"),
            Token::Character => write!(f, "character"),
            Token::Type => write!(f, "type"),
            Token::Common => write!(f, "common"),
            Token::Namelist => write!(f, "namelist"),
            Token::Implicit => write!(f, "implicit"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::DoubleColon => write!(f, "::"),
            Token::Colon => write!(f, ":"),
            Token::Assign => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Power => write!(f, "**"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "/="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::And => write!(f, ".and."),
            Token::Or => write!(f, ".or."),
            Token::Not => write!(f, ".not."),
            Token::Eqv => write!(f, ".eqv."),
            Token::Neqv => write!(f, ".neqv."),
            Token::True => write!(f, ".true."),
            Token::False => write!(f, ".false."),
            Token::RealLit(v) => write!(f, "{v}"),
            Token::IntLit(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "'{s}'"),
            Token::Ident => write!(f, "<ident>"),
            Token::Directive(d) => write!(f, "{d}"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_real(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().replace(['d', 'D'], "e").parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let quote = slice.chars().next()?;
    let inner = &slice[1..slice.len() - 1];
    let doubled: String = [quote, quote].iter().collect();
    Some(inner.replace(&doubled, &quote.to_string()))
}

fn lex_omp(lex: &mut logos::Lexer<'_, Token>) -> DirectiveLine {
    directive::scan_line(Sentinel::Omp, lex.slice(), lex.span().start)
}

fn lex_acc(lex: &mut logos::Lexer<'_, Token>) -> DirectiveLine {
    directive::scan_line(Sentinel::Acc, lex.slice(), lex.span().start)
}

// ── Public API ──

/// Lex a source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    lex_at(source, 0)
}

/// Lex `text`, reporting spans shifted by `offset`. Used for directive
/// clause text, which is a slice of a larger source.
pub fn lex_at(text: &str, offset: usize) -> LexResult {
    let lexer = Token::lexer(text);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start + offset,
            end: range.end + offset,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &text[range]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DirectiveKind;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            lex_ok("do i = 1, n"),
            vec![
                Token::Do,
                Token::Ident,
                Token::Assign,
                Token::IntLit(1),
                Token::Comma,
                Token::Ident
            ]
        );
        // keyword prefix stays an identifier
        assert_eq!(lex_ok("done"), vec![Token::Ident]);
    }

    #[test]
    fn dotted_operators_after_integer() {
        assert_eq!(
            lex_ok("1.and.x"),
            vec![Token::IntLit(1), Token::And, Token::Ident]
        );
        assert_eq!(lex_ok("a .eq. b"), vec![Token::Ident, Token::EqEq, Token::Ident]);
    }

    #[test]
    fn real_literals() {
        assert_eq!(lex_ok("1.5"), vec![Token::RealLit(1.5)]);
        assert_eq!(lex_ok("2.0d0"), vec![Token::RealLit(2.0)]);
        assert_eq!(lex_ok("1e3"), vec![Token::RealLit(1000.0)]);
    }

    #[test]
    fn power_and_slash_forms() {
        assert_eq!(
            lex_ok("a ** 2 / b /= c"),
            vec![
                Token::Ident,
                Token::Power,
                Token::IntLit(2),
                Token::Slash,
                Token::Ident,
                Token::NotEq,
                Token::Ident
            ]
        );
    }

    #[test]
    fn string_literal_doubled_quote() {
        assert_eq!(lex_ok("'it''s'"), vec![Token::StringLit("it's".into())]);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            lex_ok("x = 1 ! set x\ny"),
            vec![
                Token::Ident,
                Token::Assign,
                Token::IntLit(1),
                Token::Newline,
                Token::Ident
            ]
        );
    }

    #[test]
    fn directive_line_is_one_token() {
        let toks = lex_ok("!$omp parallel do private(i)\n");
        assert_eq!(toks.len(), 2);
        let Token::Directive(d) = &toks[0] else {
            panic!("expected directive, got {:?}", toks[0]);
        };
        assert_eq!(d.kind, Some(DirectiveKind::ParallelDo));
        assert!(!d.end);
        assert_eq!(toks[1], Token::Newline);
    }

    #[test]
    fn acc_directive_line() {
        let toks = lex_ok("!$acc end kernels");
        let Token::Directive(d) = &toks[0] else {
            panic!("expected directive");
        };
        assert_eq!(d.sentinel, Sentinel::Acc);
        assert!(d.end);
        assert_eq!(d.kind, Some(DirectiveKind::AccKernels));
    }

    #[test]
    fn lex_at_shifts_spans() {
        let r = lex_at("x", 10);
        assert_eq!(r.tokens[0].1, Span { start: 10, end: 11 });
    }

    #[test]
    fn bad_character_is_reported() {
        let r = lex("x = 1 @ 2");
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].message.contains('@'));
        assert_eq!(r.tokens.len(), 4);
    }
}

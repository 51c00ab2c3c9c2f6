// Parser for the Fortran subset and its OpenMP/OpenACC directives.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Directive clause text is handed to `clause_parser`; a clause
// syntax error is reported here but only discards that directive's clauses.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; a broken clause
//   list leaves `Directive::clauses` as `None`.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::clause_parser::{self, ClauseSyntaxError};
use crate::directive::{Category, DirectiveKind, DirectiveLine};
use crate::lexer::{self, Token};

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

/// Parse one expression from already-lexed tokens. `eoi` is the byte
/// offset reported when the tokens run out.
pub fn parse_expr_tokens(
    source: &str,
    tokens: Vec<(Token, lexer::Span)>,
    eoi: usize,
) -> Result<Expr, Vec<Rich<'static, Token, SimpleSpan>>> {
    let token_iter = tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (eoi..eoi).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let (expr, errors) = expr_parser(source)
        .then_ignore(end())
        .parse(stream)
        .into_output_errors();
    match expr {
        Some(e) if errors.is_empty() => Ok(e),
        _ => Err(errors.into_iter().map(|e| e.into_owned()).collect()),
    }
}

// ── Directive assembly ──
//
// Plain functions, called from `validate` closures, so that clause errors
// can be emitted without failing the surrounding construct.

#[derive(Debug, Clone, Copy)]
struct Header {
    kind: DirectiveKind,
    line: DirectiveLine,
    span: Span,
}

fn open_directive(source: &str, header: Header, errors: &mut Vec<ClauseSyntaxError>) -> Directive {
    let mut dir = Directive::new(header.kind, None, header.span);
    match clause_parser::parse_directive_args(source, &header.line, header.kind) {
        Ok(args) => {
            dir.clauses = Some(args.clauses);
            dir.atomic = args.atomic;
            dir.name = args.name;
            dir.flush = args.list;
        }
        Err(err) => errors.push(err),
    }
    dir
}

fn close_directive(
    source: &str,
    dir: &mut Directive,
    end: Header,
    errors: &mut Vec<ClauseSyntaxError>,
) {
    if end.kind != dir.kind {
        errors.push(ClauseSyntaxError {
            span: end.span,
            message: format!("expected '{} end {}'", dir.kind.sentinel(), dir.kind.name()),
        });
        return;
    }
    match clause_parser::parse_end_args(source, &end.line, dir.kind) {
        Ok(args) => {
            if let Some(clauses) = &mut dir.clauses {
                clauses.absorb(args.clauses);
            }
            dir.end_name = args.name;
        }
        Err(err) => {
            errors.push(err);
            dir.clauses = None;
        }
    }
}

fn spec_directive(source: &str, header: Header, errors: &mut Vec<ClauseSyntaxError>) -> SpecStmt {
    let args = clause_parser::parse_directive_args(source, &header.line, header.kind);
    match header.kind {
        DirectiveKind::DeclareSimd => {
            let (proc_name, clauses) = match args {
                Ok(args) => (
                    args.proc_name.unwrap_or_else(|| Ident::new("", header.span)),
                    Some(args.clauses),
                ),
                Err(err) => {
                    errors.push(err);
                    (Ident::new("", header.span), None)
                }
            };
            SpecStmt::DeclareSimd(DeclareSimdStmt {
                proc_name,
                clauses,
                span: header.span,
            })
        }
        _ => {
            let items = match args {
                Ok(args) => args.list,
                Err(err) => {
                    errors.push(err);
                    Vec::new()
                }
            };
            SpecStmt::Threadprivate(ThreadprivateStmt {
                items,
                span: header.span,
            })
        }
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let span: Span = (lhs.span.start..rhs.span.end).into();
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

// ── Expression parser ──
//
// Fortran precedence, loosest first: `.eqv./.neqv.`, `.or.`, `.and.`,
// `.not.`, comparisons (non-associative), `+ -` (with a leading sign),
// `* /`, `**` (right-associative).

pub(crate) fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(move |expr| {
        // `real` is a type keyword and an intrinsic.
        let name = just(Token::Ident)
            .or(just(Token::Real))
            .map_with(move |_, e| {
                let span: SimpleSpan = e.span();
                Ident {
                    name: source[span.start()..span.end()].to_string(),
                    span,
                }
            });

        let literal = select! {
            Token::IntLit(v) => ExprKind::Int(v),
            Token::RealLit(v) = e => {
                let span: SimpleSpan = e.span();
                let lexeme = &source[span.start()..span.end()];
                let kind = if lexeme.contains(['d', 'D']) { 8 } else { 4 };
                ExprKind::Real { value: v, kind }
            },
            Token::True => ExprKind::Logical(true),
            Token::False => ExprKind::Logical(false),
            Token::StringLit(s) => ExprKind::Str(s),
        }
        .map_with(|kind, e| Expr::new(kind, e.span()));

        // `e`, `lo:hi`, `lo:hi:st`, `:`, `lo:`, `:hi`
        let subscript = expr
            .clone()
            .or_not()
            .then(
                just(Token::Colon)
                    .ignore_then(expr.clone().or_not())
                    .then(just(Token::Colon).ignore_then(expr.clone()).or_not())
                    .or_not(),
            )
            .try_map(|(first, rest), span| match (first, rest) {
                (Some(e), None) => Ok(Subscript::Element(e)),
                (lower, Some((upper, stride))) => Ok(Subscript::Range {
                    lower,
                    upper,
                    stride,
                }),
                (None, None) => Err(Rich::custom(span, "expected subscript")),
            });

        let designator = name
            .then(
                subscript
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .or_not(),
            )
            .map_with(|(name, subscripts), e| {
                Expr::new(
                    ExprKind::Ref(DataRef {
                        name,
                        subscripts,
                        symbol: None,
                    }),
                    e.span(),
                )
            });

        let paren = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map_with(|inner, e| Expr::new(ExprKind::Paren(Box::new(inner)), e.span()));

        let primary = choice((literal, designator, paren)).boxed();

        let power = primary
            .separated_by(just(Token::Power))
            .at_least(1)
            .collect::<Vec<_>>()
            .try_map(|operands, span| {
                operands
                    .into_iter()
                    .rev()
                    .reduce(|rhs, lhs| binary(BinOp::Pow, lhs, rhs))
                    .ok_or_else(|| Rich::custom(span, "expected operand"))
            })
            .boxed();

        let mul_op = choice((
            just(Token::Star).to(BinOp::Mul),
            just(Token::Slash).to(BinOp::Div),
        ));
        let mul = power
            .clone()
            .foldl(mul_op.then(power).repeated(), |l, (op, r)| binary(op, l, r))
            .boxed();

        let sign = choice((
            just(Token::Minus).to(UnaryOp::Neg),
            just(Token::Plus).to(UnaryOp::Plus),
        ));
        let signed = sign
            .or_not()
            .then(mul.clone())
            .map_with(|(sign, operand), e| match sign {
                Some(op) => Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    e.span(),
                ),
                None => operand,
            });
        let add_op = choice((
            just(Token::Plus).to(BinOp::Add),
            just(Token::Minus).to(BinOp::Sub),
        ));
        let add = signed
            .foldl(add_op.then(mul).repeated(), |l, (op, r)| binary(op, l, r))
            .boxed();

        let cmp_op = choice((
            just(Token::EqEq).to(BinOp::Eq),
            just(Token::NotEq).to(BinOp::Ne),
            just(Token::Le).to(BinOp::Le),
            just(Token::Lt).to(BinOp::Lt),
            just(Token::Ge).to(BinOp::Ge),
            just(Token::Gt).to(BinOp::Gt),
        ));
        let cmp = add
            .clone()
            .then(cmp_op.then(add).or_not())
            .map(|(l, rest)| match rest {
                Some((op, r)) => binary(op, l, r),
                None => l,
            })
            .boxed();

        let not = just(Token::Not)
            .ignored()
            .repeated()
            .collect::<Vec<()>>()
            .then(cmp)
            .map_with(|(nots, operand), e| {
                nots.into_iter().fold(operand, |acc, _| {
                    Expr::new(
                        ExprKind::Unary {
                            op: UnaryOp::Not,
                            operand: Box::new(acc),
                        },
                        e.span(),
                    )
                })
            })
            .boxed();

        let and = not
            .clone()
            .foldl(
                just(Token::And).to(BinOp::And).then(not).repeated(),
                |l, (op, r)| binary(op, l, r),
            )
            .boxed();

        let or = and
            .clone()
            .foldl(
                just(Token::Or).to(BinOp::Or).then(and).repeated(),
                |l, (op, r)| binary(op, l, r),
            )
            .boxed();

        let eqv_op = choice((
            just(Token::Eqv).to(BinOp::Eqv),
            just(Token::Neqv).to(BinOp::Neqv),
        ));
        or.clone()
            .foldl(eqv_op.then(or).repeated(), |l, (op, r)| binary(op, l, r))
            .boxed()
    })
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators. This avoids
// complex lifetime annotations on per-rule helper functions.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Newlines ──

    let nl = just(Token::Newline).repeated().at_least(1).ignored();
    let nl_opt = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // A non-reserved word such as `none`, `allocatable` or `in`.
    let word = move |w: &'static str| {
        just(Token::Ident)
            .map_with(move |_, e| {
                let span: SimpleSpan = e.span();
                source[span.start()..span.end()].to_ascii_lowercase()
            })
            .filter(move |text: &String| text == w)
            .ignored()
    };

    // ── Directive lines ──

    let directive = move |end: bool, category: Category| {
        select! {
            Token::Directive(line @ DirectiveLine { kind: Some(kind), end: is_end, .. })
                if is_end == end && kind.category() == category => (kind, line),
        }
        .map_with(|(kind, line), e| Header {
            kind,
            line,
            span: e.span(),
        })
    };

    let end_directive = select! {
        Token::Directive(line @ DirectiveLine { kind: Some(kind), end: true, .. }) => (kind, line),
    }
    .map_with(|(kind, line), e| Header {
        kind,
        line,
        span: e.span(),
    });

    let expr = expr_parser(source);

    // ── Specification statements ──

    let kind_selector = just(Token::LParen)
        .ignore_then(word("kind").then(just(Token::Assign)).or_not())
        .ignore_then(select! { Token::IntLit(v) => v })
        .then_ignore(just(Token::RParen))
        .try_map(|v, span| {
            u8::try_from(v).map_err(|_| Rich::custom(span, format!("invalid kind {v}")))
        });

    let intrinsic_type = choice((
        just(Token::Integer).to(TypeName::Integer),
        just(Token::Real).to(TypeName::Real),
        just(Token::Complex).to(TypeName::Complex),
        just(Token::Logical).to(TypeName::Logical),
    ))
    .then(kind_selector.or_not());
    let character_type = just(Token::Character).map(|_| (TypeName::Character, None));
    let derived_type = just(Token::Type)
        .ignore_then(
            ident
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map(|name| (TypeName::Derived(name), None));
    let type_spec = choice((intrinsic_type, character_type, derived_type))
        .map_with(|(name, kind), e| TypeSpec {
            name,
            kind,
            span: e.span(),
        });

    let dim = choice((
        just(Token::Star).map(|_| DimSpec::AssumedSize { lower: None }),
        expr.clone()
            .then_ignore(just(Token::Colon))
            .then_ignore(just(Token::Star))
            .map(|lower| DimSpec::AssumedSize { lower: Some(lower) }),
        expr.clone()
            .then(just(Token::Colon).ignore_then(expr.clone()).or_not())
            .map(|(first, upper)| match upper {
                Some(upper) => DimSpec::Explicit {
                    lower: Some(first),
                    upper,
                },
                None => DimSpec::Explicit {
                    lower: None,
                    upper: first,
                },
            }),
        just(Token::Colon).map(|_| DimSpec::Deferred),
    ));
    let dims = dim
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .boxed();

    let intent = ident
        .clone()
        .try_map(|id: Ident, span| match id.name.to_ascii_lowercase().as_str() {
            "in" => Ok(Intent::In),
            "out" => Ok(Intent::Out),
            "inout" => Ok(Intent::InOut),
            _ => Err(Rich::custom(span, "expected 'in', 'out' or 'inout'")),
        })
        .delimited_by(just(Token::LParen), just(Token::RParen));
    let simple_attr = ident
        .clone()
        .try_map(|id: Ident, span| match id.name.to_ascii_lowercase().as_str() {
            "allocatable" => Ok(AttrKind::Allocatable),
            "pointer" => Ok(AttrKind::Pointer),
            "target" => Ok(AttrKind::Target),
            "value" => Ok(AttrKind::Value),
            "parameter" => Ok(AttrKind::Parameter),
            other => Err(Rich::custom(span, format!("unknown attribute '{other}'"))),
        });
    let attr = choice((
        word("dimension")
            .ignore_then(dims.clone())
            .map(AttrKind::Dimension),
        word("intent").ignore_then(intent).map(AttrKind::Intent),
        simple_attr,
    ))
    .map_with(|kind, e| Attr {
        kind,
        span: e.span(),
    });

    let entity = ident
        .clone()
        .then(dims.clone().or_not())
        .then(just(Token::Assign).ignore_then(expr.clone()).or_not())
        .map_with(|((name, dims), init), e| Entity {
            name,
            dims,
            init,
            span: e.span(),
        });

    let type_decl = type_spec
        .then(
            just(Token::Comma)
                .ignore_then(attr)
                .repeated()
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::DoubleColon).or_not())
        .then(
            entity
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map_with(|((ty, attrs), entities), e| TypeDecl {
            ty,
            attrs,
            entities,
            span: e.span(),
        })
        .boxed();

    let derived_def = just(Token::Type)
        .ignore_then(just(Token::DoubleColon))
        .ignore_then(ident.clone())
        .then_ignore(nl.clone())
        .then(
            type_decl
                .clone()
                .then_ignore(nl.clone())
                .repeated()
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::End))
        .then_ignore(just(Token::Type))
        .then_ignore(ident.clone().or_not())
        .map_with(|(name, components), e| {
            SpecStmt::DerivedType(DerivedTypeDef {
                name,
                components,
                span: e.span(),
            })
        });

    let group = |keyword: Token| {
        just(keyword)
            .ignore_then(
                ident
                    .clone()
                    .delimited_by(just(Token::Slash), just(Token::Slash)),
            )
            .then(
                ident
                    .clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .map_with(|(name, members), e| GroupStmt {
                name,
                members,
                span: e.span(),
            })
    };
    let common = group(Token::Common).map(SpecStmt::Common);
    let namelist = group(Token::Namelist).map(SpecStmt::Namelist);

    let cray_pointer = word("pointer")
        .ignore_then(
            ident
                .clone()
                .then_ignore(just(Token::Comma))
                .then(ident.clone())
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map_with(|(pointer, pointee), e| {
            SpecStmt::CrayPointer(CrayPointerStmt {
                pointer,
                pointee,
                span: e.span(),
            })
        });

    let implicit_none = just(Token::Implicit)
        .ignore_then(word("none"))
        .map_with(|_, e| SpecStmt::Implicit(e.span()));

    let spec_dir = directive(false, Category::Specification).validate(move |header, _e, emitter| {
        let mut errors = Vec::new();
        let stmt = spec_directive(source, header, &mut errors);
        for err in errors {
            emitter.emit(Rich::custom(err.span, err.message));
        }
        stmt
    });

    let spec_stmt = choice((
        implicit_none,
        derived_def,
        type_decl.map(SpecStmt::Decl),
        common,
        namelist,
        cray_pointer,
        spec_dir,
    ))
    .boxed();

    let spec_part = spec_stmt
        .then_ignore(nl.clone())
        .repeated()
        .collect::<Vec<_>>()
        .boxed();

    // ── Executable statements ──

    let assignment = expr
        .clone()
        .try_map(|lhs: Expr, span| match lhs.kind {
            ExprKind::Ref(_) => Ok(lhs),
            _ => Err(Rich::custom(span, "expected a variable on the left of '='")),
        })
        .then_ignore(just(Token::Assign))
        .then(expr.clone())
        .map_with(|(lhs, rhs), e| Stmt {
            kind: StmtKind::Assign(Assignment { lhs, rhs }),
            span: e.span(),
        })
        .boxed();

    let stmt = recursive(|stmt| {
        let body = stmt
            .clone()
            .then_ignore(nl.clone())
            .repeated()
            .collect::<Vec<Stmt>>()
            .boxed();

        let counted = just(Token::Do)
            .ignore_then(ident.clone())
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .then_ignore(just(Token::Comma))
            .then(expr.clone())
            .then(just(Token::Comma).ignore_then(expr.clone()).or_not())
            .map(|(((var, start), end), step)| {
                LoopControl::Counted(CountedControl {
                    var,
                    symbol: None,
                    start,
                    end,
                    step,
                })
            });
        let do_while = just(Token::Do)
            .ignore_then(just(Token::While))
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(LoopControl::While);
        let do_loop = choice((do_while, counted))
            .then_ignore(nl.clone())
            .then(body.clone())
            .then_ignore(just(Token::End))
            .then_ignore(just(Token::Do))
            .map_with(|(control, body), e| Stmt {
                kind: StmtKind::Do(DoLoop { control, body }),
                span: e.span(),
            })
            .boxed();

        let if_block = just(Token::If)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then_ignore(just(Token::Then))
            .then_ignore(nl.clone())
            .then(body.clone())
            .then(
                just(Token::Else)
                    .ignore_then(nl.clone())
                    .ignore_then(body.clone())
                    .or_not(),
            )
            .then_ignore(just(Token::End))
            .then_ignore(just(Token::If))
            .map_with(|((cond, then_body), else_body), e| Stmt {
                kind: StmtKind::If(IfBlock {
                    cond,
                    then_body,
                    else_body: else_body.unwrap_or_default(),
                }),
                span: e.span(),
            });

        let call = just(Token::Call)
            .ignore_then(ident.clone())
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .or_not(),
            )
            .map_with(|(name, args), e| Stmt {
                kind: StmtKind::Call(CallStmt {
                    name,
                    args: args.unwrap_or_default(),
                }),
                span: e.span(),
            });

        let print = just(Token::Print)
            .ignore_then(just(Token::Star))
            .ignore_then(
                just(Token::Comma)
                    .ignore_then(expr.clone())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map_with(|items, e| Stmt {
                kind: StmtKind::Print(items),
                span: e.span(),
            });

        let cont = just(Token::Continue).map_with(|_, e| Stmt {
            kind: StmtKind::Continue,
            span: e.span(),
        });

        let block = just(Token::Block)
            .ignore_then(nl.clone())
            .ignore_then(spec_part.clone())
            .then(body.clone())
            .then_ignore(just(Token::End))
            .then_ignore(just(Token::Block))
            .map_with(|(specs, body), e| Stmt {
                kind: StmtKind::Block(BlockConstruct {
                    specs,
                    body,
                    scope: None,
                }),
                span: e.span(),
            });

        // ── Directive constructs ──

        let block_construct = directive(false, Category::Block)
            .then_ignore(nl.clone())
            .then(body.clone())
            .then(end_directive)
            .validate(move |((open, body), end), e, emitter| {
                let mut errors = Vec::new();
                let mut dir = open_directive(source, open, &mut errors);
                dir.body = body;
                close_directive(source, &mut dir, end, &mut errors);
                for err in errors {
                    emitter.emit(Rich::custom(err.span, err.message));
                }
                Stmt {
                    kind: StmtKind::Directive(Box::new(dir)),
                    span: e.span(),
                }
            });

        let loop_construct = directive(false, Category::Loop)
            .then_ignore(nl.clone())
            .then(do_loop.clone())
            .then(
                nl.clone()
                    .ignore_then(directive(true, Category::Loop))
                    .or_not(),
            )
            .validate(move |((open, do_stmt), end), e, emitter| {
                let mut errors = Vec::new();
                let mut dir = open_directive(source, open, &mut errors);
                dir.body = vec![do_stmt];
                if let Some(end) = end {
                    close_directive(source, &mut dir, end, &mut errors);
                }
                for err in errors {
                    emitter.emit(Rich::custom(err.span, err.message));
                }
                Stmt {
                    kind: StmtKind::Directive(Box::new(dir)),
                    span: e.span(),
                }
            });

        // A second assignment belongs to the construct only when an end
        // directive follows it.
        let atomic_tail = choice((
            nl.clone()
                .ignore_then(assignment.clone())
                .then_ignore(nl.clone())
                .then(directive(true, Category::Atomic))
                .map(|(second, end)| (Some(second), Some(end))),
            nl.clone()
                .ignore_then(directive(true, Category::Atomic))
                .map(|end| (None, Some(end))),
            empty().map(|_| (None, None)),
        ));
        let atomic_construct = directive(false, Category::Atomic)
            .then_ignore(nl.clone())
            .then(assignment.clone())
            .then(atomic_tail)
            .validate(move |((open, first), (second, end)), e, emitter| {
                let mut errors = Vec::new();
                let mut dir = open_directive(source, open, &mut errors);
                dir.body.push(first);
                dir.body.extend(second);
                if let Some(end) = end {
                    close_directive(source, &mut dir, end, &mut errors);
                }
                for err in errors {
                    emitter.emit(Rich::custom(err.span, err.message));
                }
                Stmt {
                    kind: StmtKind::Directive(Box::new(dir)),
                    span: e.span(),
                }
            });

        let standalone = directive(false, Category::Standalone).validate(move |open, e, emitter| {
            let mut errors = Vec::new();
            let dir = open_directive(source, open, &mut errors);
            for err in errors {
                emitter.emit(Rich::custom(err.span, err.message));
            }
            Stmt {
                kind: StmtKind::Directive(Box::new(dir)),
                span: e.span(),
            }
        });

        let unknown = select! {
            Token::Directive(line @ DirectiveLine { kind: None, .. }) => line,
        }
        .validate(|line, e, emitter| {
            emitter.emit(Rich::custom(
                e.span(),
                format!("unrecognized {} directive", line.sentinel),
            ));
            Stmt {
                kind: StmtKind::Continue,
                span: e.span(),
            }
        });

        choice((
            block_construct,
            loop_construct,
            atomic_construct,
            standalone,
            unknown,
            do_loop,
            if_block,
            call,
            print,
            cont,
            block,
            assignment.clone(),
        ))
        .boxed()
    });

    let body = stmt
        .then_ignore(nl.clone())
        .repeated()
        .collect::<Vec<_>>()
        .boxed();

    // ── Program units ──

    let params = ident
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen))
        .or_not()
        .map(Option::unwrap_or_default);

    let program_head = just(Token::Program)
        .ignore_then(ident.clone())
        .map(|name| (UnitKind::Program, name, Vec::new()));
    let subroutine_head = just(Token::Subroutine)
        .ignore_then(ident.clone())
        .then(params)
        .map(|(name, params)| (UnitKind::Subroutine, name, params));

    let unit_end = just(Token::End).then(
        choice((just(Token::Program), just(Token::Subroutine)))
            .then(ident.clone().or_not())
            .or_not(),
    );

    let unit = choice((program_head, subroutine_head))
        .then_ignore(nl.clone())
        .then(spec_part)
        .then(body)
        .then_ignore(unit_end)
        .map_with(|(((kind, name, params), specs), body), e| Unit {
            kind,
            name,
            params,
            specs,
            body,
            scope: None,
            span: e.span(),
        });

    nl_opt
        .clone()
        .ignore_then(
            unit.separated_by(nl.clone())
                .allow_trailing()
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl_opt)
        .then_ignore(end())
        .map_with(|units, e| Program {
            units,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clauses::ListClass;

    fn parse_ok(source: &str) -> Program {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.program.expect("expected program")
    }

    fn body_of(source: &str) -> Vec<Stmt> {
        let mut prog = parse_ok(source);
        assert_eq!(prog.units.len(), 1);
        prog.units.remove(0).body
    }

    fn wrap(body: &str) -> String {
        format!("program p\ninteger :: i, j, n, x\nreal :: a(10)\n{body}\nend program p\n")
    }

    fn expr_of(text: &str) -> Expr {
        let stmts = body_of(&wrap(&format!("x = {text}")));
        let StmtKind::Assign(a) = &stmts[0].kind else {
            panic!("expected assignment")
        };
        a.rhs.clone()
    }

    // ── Units and declarations ──

    #[test]
    fn program_and_subroutine_units() {
        let prog = parse_ok(
            "program main\nend program main\n\nsubroutine s(a, b)\ninteger, value :: a\nend subroutine s\n",
        );
        assert_eq!(prog.units.len(), 2);
        assert_eq!(prog.units[0].kind, UnitKind::Program);
        assert_eq!(prog.units[1].params.len(), 2);
        let SpecStmt::Decl(decl) = &prog.units[1].specs[0] else {
            panic!("expected declaration")
        };
        assert_eq!(decl.attrs[0].kind, AttrKind::Value);
    }

    #[test]
    fn declarations_with_dims_and_kinds() {
        let prog = parse_ok(
            "subroutine s(a, n)\nimplicit none\ninteger :: n\nreal(8), dimension(:) , allocatable :: b\nreal :: a(n, *)\ninteger, parameter :: k = 4\nend\n",
        );
        let specs = &prog.units[0].specs;
        assert!(matches!(specs[0], SpecStmt::Implicit(_)));
        let SpecStmt::Decl(b) = &specs[2] else {
            panic!("expected declaration")
        };
        assert_eq!(b.ty.kind, Some(8));
        assert!(matches!(&b.attrs[0].kind, AttrKind::Dimension(d) if matches!(d[0], DimSpec::Deferred)));
        let SpecStmt::Decl(a) = &specs[3] else {
            panic!("expected declaration")
        };
        let dims = a.entities[0].dims.as_ref().expect("dims");
        assert!(matches!(dims[1], DimSpec::AssumedSize { lower: None }));
    }

    #[test]
    fn common_namelist_and_cray_pointer() {
        let prog = parse_ok(
            "program p\ninteger :: a, b\ncommon /blk/ a, b\nnamelist /grp/ a\npointer (q, b)\nend\n",
        );
        let specs = &prog.units[0].specs;
        assert!(matches!(&specs[1], SpecStmt::Common(g) if g.name.name == "blk" && g.members.len() == 2));
        assert!(matches!(&specs[2], SpecStmt::Namelist(g) if g.name.name == "grp"));
        assert!(matches!(&specs[3], SpecStmt::CrayPointer(c) if c.pointee.name == "b"));
    }

    #[test]
    fn derived_type_definition() {
        let prog = parse_ok(
            "program p\ntype :: t\nreal, allocatable :: v(:)\nend type t\ntype(t) :: x\nend\n",
        );
        let SpecStmt::DerivedType(def) = &prog.units[0].specs[0] else {
            panic!("expected type definition")
        };
        assert_eq!(def.components.len(), 1);
    }

    // ── Expressions ──

    #[test]
    fn precedence_of_arithmetic() {
        assert_eq!(expr_of("1 + 2 * 3").to_string(), "1 + 2 * 3");
        let e = expr_of("1 + 2 * 3");
        let ExprKind::Binary { op, rhs, .. } = &e.kind else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn power_is_right_associative() {
        let e = expr_of("2 ** 3 ** 2");
        let ExprKind::Binary { op, lhs, rhs } = &e.kind else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinOp::Pow);
        assert!(matches!(lhs.kind, ExprKind::Int(2)));
        assert!(matches!(rhs.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn parens_are_kept() {
        let e = expr_of("n - (i + 1)");
        assert_eq!(e.to_string(), "n - (i + 1)");
    }

    #[test]
    fn logical_operators_bind_loosest() {
        let e = expr_of(".not. i < n .and. .true.");
        let ExprKind::Binary { op, lhs, .. } = &e.kind else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinOp::And);
        assert!(matches!(lhs.kind, ExprKind::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn double_precision_literal_kind() {
        assert!(matches!(expr_of("1.5d0").kind, ExprKind::Real { kind: 8, .. }));
        assert!(matches!(expr_of("1.5").kind, ExprKind::Real { kind: 4, .. }));
    }

    #[test]
    fn array_sections() {
        let e = expr_of("a(2:n:2)");
        let ExprKind::Ref(r) = &e.kind else {
            panic!("expected reference")
        };
        let subs = r.subscripts.as_ref().expect("subscripts");
        assert!(matches!(&subs[0], Subscript::Range { stride: Some(_), .. }));
    }

    // ── Statements ──

    #[test]
    fn do_if_block_statements() {
        let stmts = body_of(&wrap(
            "do i = 1, n, 2\n  if (i > 3) then\n    x = i\n  else\n    continue\n  end if\nend do\nblock\n  integer :: t\n  t = 1\nend block\ncall foo(x)\nprint *, x",
        ));
        assert_eq!(stmts.len(), 4);
        let StmtKind::Do(d) = &stmts[0].kind else {
            panic!("expected do")
        };
        assert!(d.counted().is_some_and(|c| c.step.is_some()));
        assert!(matches!(&stmts[1].kind, StmtKind::Block(b) if b.specs.len() == 1));
    }

    #[test]
    fn do_while_loop() {
        let stmts = body_of(&wrap("do while (i < n)\n  i = i + 1\nend do"));
        assert!(matches!(&stmts[0].kind, StmtKind::Do(d) if matches!(d.control, LoopControl::While(_))));
    }

    // ── Directives ──

    #[test]
    fn parallel_block_with_clauses() {
        let stmts = body_of(&wrap(
            "!$omp parallel private(i) shared(n)\nx = 1\n!$omp end parallel",
        ));
        let StmtKind::Directive(d) = &stmts[0].kind else {
            panic!("expected directive")
        };
        assert_eq!(d.kind, DirectiveKind::Parallel);
        assert_eq!(d.body.len(), 1);
        let clauses = d.clauses.as_ref().expect("clauses");
        assert_eq!(clauses.list(ListClass::Private).len(), 1);
        assert_eq!(clauses.list(ListClass::Shared).len(), 1);
    }

    #[test]
    fn loop_directive_with_optional_end() {
        let stmts = body_of(&wrap(
            "!$omp do\ndo i = 1, n\nend do\n!$omp end do nowait\n!$omp parallel do\ndo i = 1, n\nend do",
        ));
        assert_eq!(stmts.len(), 2);
        let StmtKind::Directive(d) = &stmts[0].kind else {
            panic!("expected directive")
        };
        assert!(d.clauses.as_ref().is_some_and(|c| c.nowait));
    }

    #[test]
    fn atomic_takes_second_statement_only_before_end() {
        let stmts = body_of(&wrap(
            "!$omp atomic capture\nx = x + 1\ni = x\n!$omp end atomic\n!$omp atomic\nx = x + 1\ni = 2",
        ));
        assert_eq!(stmts.len(), 3);
        let StmtKind::Directive(capture) = &stmts[0].kind else {
            panic!("expected directive")
        };
        assert_eq!(capture.body.len(), 2);
        let StmtKind::Directive(update) = &stmts[1].kind else {
            panic!("expected directive")
        };
        assert_eq!(update.body.len(), 1);
    }

    #[test]
    fn acc_kernels_region() {
        let stmts = body_of(&wrap(
            "!$acc kernels copy(a) num_gangs(4)\n!$acc loop independent\ndo i = 1, n\n  a(i) = 0\nend do\n!$acc end kernels",
        ));
        let StmtKind::Directive(k) = &stmts[0].kind else {
            panic!("expected directive")
        };
        assert_eq!(k.kind, DirectiveKind::AccKernels);
        assert!(k.clauses.as_ref().is_some_and(|c| c.num_gangs.is_some()));
        assert!(matches!(&k.body[0].kind, StmtKind::Directive(l) if l.kind == DirectiveKind::AccLoop));
    }

    #[test]
    fn clause_error_keeps_the_construct() {
        let result = parse(&wrap("!$omp parallel private(i\nx = 1\n!$omp end parallel"));
        assert_eq!(result.errors.len(), 1);
        let prog = result.program.expect("program survives clause errors");
        let StmtKind::Directive(d) = &prog.units[0].body[0].kind else {
            panic!("expected directive")
        };
        assert!(d.clauses.is_none());
        assert_eq!(d.body.len(), 1);
    }

    #[test]
    fn mismatched_end_directive_is_reported() {
        let result = parse(&wrap("!$omp single\nx = 1\n!$omp end master"));
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn unknown_directive_is_reported() {
        let result = parse(&wrap("!$omp frobnicate\nx = 1"));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].to_string().contains("unrecognized"));
    }

    #[test]
    fn threadprivate_and_declare_simd_in_spec_part() {
        let prog = parse_ok(
            "subroutine s(a)\ninteger, value :: a\ninteger :: c\ncommon /blk/ c\n!$omp threadprivate(/blk/)\n!$omp declare simd(s) uniform(a)\nend\n",
        );
        let specs = &prog.units[0].specs;
        assert!(matches!(&specs[3], SpecStmt::Threadprivate(t) if t.items[0].common));
        assert!(matches!(&specs[4], SpecStmt::DeclareSimd(d) if d.proc_name.name == "s"));
    }
}

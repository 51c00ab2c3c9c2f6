// pdc — Parallel Directive Checker
//
// Library root. Front end (lexer, parser, clause parser), resolution of
// OpenMP/OpenACC directives, lowering to explicit regions and the kernels
// region decomposition.

pub mod ast;
pub mod atomic;
pub mod clause_parser;
pub mod clauses;
pub mod diag;
pub mod directive;
pub mod expr;
pub mod id;
pub mod kernels;
pub mod lexer;
pub mod loops;
pub mod lower;
pub mod omp_context;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod region;
pub mod resolve;
pub mod symbols;
pub mod validate;

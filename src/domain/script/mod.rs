//! Script compilation pipeline: lexer, parser, scope resolution, rewriter.
//!
//! `compile` turns script text into a [`CompiledScript`] exactly once; the
//! runtime then replays the compiled unit over every bar.

pub mod ast;
pub mod compiled;
pub mod emit;
pub mod lexer;
pub mod parser;
pub mod rewrite;
pub mod scope;

pub use compiled::CompiledScript;

use crate::domain::error::ParseError;

pub fn compile(source: &str) -> Result<CompiledScript, ParseError> {
    let program = parser::parse(source)?;
    rewrite::rewrite(&program)
}

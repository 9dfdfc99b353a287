// ============================================================================
// Resolution Module - Sandboxed Outcome Logic
// ============================================================================
//
// Caller-supplied resolution logic is compiled and run here:
//   - lexer/parser: turn the logic description into a syntax tree
//   - interpreter/value: evaluate it against a fixed capability surface
//   - runner: compile once, run per game, unwrap async completion
//
// ============================================================================

pub mod ast;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod runner;
pub mod value;

pub use error::ResolveError;
pub use interpreter::Limits;
pub use runner::ResolutionFunctionRunner;
pub use value::{Builtin, Value};

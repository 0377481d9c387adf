//! Filter-language compiler for catalog search.
//!
//! User queries mix `field<op>value` filters with free-text terms, e.g.
//! `stars=5.5 mode=keys year=2023 "some title"`. The lexer produces typed
//! tokens, and the compiler lowers them to a parameterized SQL fragment plus
//! a residual full-text query. User input never reaches SQL as text, only as
//! bound parameters.

mod compiler;
mod lexer;
mod types;

pub use compiler::{compile, parse_date_range, widen_number};
pub use lexer::tokenize;
pub use types::{CompiledQuery, Filter, FilterOp, SortKey, Token};

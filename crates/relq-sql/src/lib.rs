//! Target SQL statement tree for RELQ
//!
//! The compiler's output vocabulary: a `SELECT` with ordered clauses,
//! joins, subqueries and common table expressions, plus scalar SQL nodes.
//! Statements render to literal SQL text and carry a canonical structural
//! fingerprint used to deduplicate identical subplans into shared CTEs.

mod ast;
mod render;

pub use ast::*;
pub use render::*;

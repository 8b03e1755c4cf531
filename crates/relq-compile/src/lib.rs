//! RELQ query compiler
//!
//! Deterministically lowers logical operator trees (`relq-plan`) into SQL
//! statement trees (`relq-sql`): fusing adjacent operators into one SELECT
//! where semantics allow, wrapping subqueries where they do not, assigning
//! table aliases in traversal order, and deduplicating structurally
//! identical subplans into shared common table expressions.

use thiserror::Error;

mod bridge;
mod compiler;
mod config;
mod context;
mod scalar;

pub use bridge::*;
pub use compiler::*;
pub use config::*;
pub use context::*;
pub use scalar::*;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Ambiguous column reference: {0}")]
    AmbiguousColumnReference(String),

    #[error("Malformed plan: {0}")]
    MalformedPlan(String),
}

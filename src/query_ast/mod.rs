//! Query plan model and compilation/evaluation engine.
//!
//! Pipeline tools mutate an [`OverallQueryPlan`], pass it along as JSON (see [`wire`]) and the
//! last tool in the pipe compiles it into one parameterized statement, earlier plans becoming
//! CTEs. Evaluation resolves untyped literals against the statement's declared column types
//! before binding them.

pub mod alias;
pub mod ast;
pub mod errors;
pub mod evaluator;
pub mod executor;
pub mod executors;
pub mod inference;
pub mod logical;
pub mod wire;

pub use alias::AliasGenerator;
pub use ast::*;
pub use errors::*;
pub use evaluator::{EvalState, EvalSummary, Evaluator};
pub use executor::{ColumnDescription, QueryEngine};
pub use logical::*;

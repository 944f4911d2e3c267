//! Core types shared across the skein narrative engine.
//!
//! This crate holds the leaf types the rest of the workspace builds on: the
//! dynamically-typed [`Value`], the [`VarStore`] trait the engine reads and
//! writes variables through, the expression-language exchange types
//! ([`CompiledExpr`] and friends) that cross the boundary to the external
//! expression evaluator, and the [`ContentSource`] trait used to fetch raw
//! script text by name.
//!
//! The expression engine itself is a collaborator, not part of this
//! workspace. [`BasicEvaluator`] is a deliberately small reference
//! implementation so tests, demos, and the CLI can run scripts without a
//! host application; production hosts supply their own [`Evaluator`].

/// Reference expression evaluator.
pub mod basic;
/// Expression-language exchange types and evaluator interfaces.
pub mod expr;
/// Content loading interface.
pub mod loader;
/// Variable store interface and an in-memory implementation.
pub mod store;
/// Dynamically-typed values.
pub mod value;

pub use basic::BasicEvaluator;
pub use expr::{CompiledExpr, EvalOutcome, Evaluator, ExprToken, FnDispatch, NativeFn, NoFns};
pub use loader::{ContentSource, MemorySource};
pub use store::{MemoryStore, VarStore};
pub use value::Value;

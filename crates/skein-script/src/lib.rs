//! Parser and compiled script model for the skein narrative language.
//!
//! Source text containing prose, labeled sections (`=== knot ===`,
//! `= stitch`), diverts (`-> target`), player choices (`*`/`+`), inline
//! `{...}` variation lists, and `~` expression code compiles into a
//! [`Script`]: a flat, index-addressable element graph plus label tables.
//! Execution lives in the `skein-runtime` crate; this crate only builds and
//! stores the graph.

/// Diagnostics with spans and terminal rendering.
pub mod diagnostics;
/// The compiled element graph.
pub mod element;
/// Parse errors.
pub mod error;
/// The line-oriented parser.
pub mod parser;
/// The compiled script value.
pub mod script;

pub use diagnostics::{Diagnostic, Severity, render_diagnostics};
pub use element::{DivertTarget, ElemId, Element, ElementKind, ListPolicy};
pub use error::ScriptError;
pub use parser::{IncludeResolver, parse, parse_with_includes};
pub use script::{Script, VarInit, VarInitValue};

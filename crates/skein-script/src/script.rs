//! The compiled script value.

use crate::element::{Arena, ElemId, Element, ElementKind};
use serde::{Deserialize, Serialize};
use skein_core::{CompiledExpr, Value};
use std::collections::HashMap;

/// Label of the synthetic entry knot at line 0 of every script.
pub const ENTRY_LABEL: &str = "START";

/// How a declared variable gets its initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VarInitValue {
    /// A literal parsed straight from the declaration.
    Literal(Value),
    /// A compiled assignment expression, for non-literal initializers.
    Expr(CompiledExpr),
}

/// A `VAR`/`CONST` declaration: a name and its initial value. Applied
/// insert-if-absent when a cursor first runs against the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInit {
    /// The store key to initialize.
    pub name: String,
    /// The initial value.
    pub init: VarInitValue,
}

/// One immutable compiled script.
///
/// Holds the element arena, the ordered table of top-level line heads that
/// cursor positions and divert targets index into, and the label and
/// function tables. Shared read-only by every cursor created against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    name: String,
    arena: Arena,
    lines: Vec<ElemId>,
    labels: HashMap<String, usize>,
    functions: HashMap<String, usize>,
    var_inits: Vec<VarInit>,
    source: String,
}

impl Script {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        arena: Arena,
        lines: Vec<ElemId>,
        labels: HashMap<String, usize>,
        functions: HashMap<String, usize>,
        var_inits: Vec<VarInit>,
        source: String,
    ) -> Self {
        Self {
            name,
            arena,
            lines,
            labels,
            functions,
            var_inits,
            source,
        }
    }

    /// The name this script was compiled under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The original source text, retained for diagnostics.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Borrow an element by id.
    pub fn elem(&self, id: ElemId) -> &Element {
        self.arena.get(id)
    }

    /// The element arena.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Head element of the top-level line at `index`.
    pub fn line(&self, index: usize) -> Option<ElemId> {
        self.lines.get(index).copied()
    }

    /// Number of top-level lines (including the synthetic entry knot).
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    /// Whether `index` addresses a top-level line.
    pub fn is_valid_line(&self, index: usize) -> bool {
        index < self.lines.len()
    }

    /// Resolve a knot/stitch label to its line index.
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    /// Resolve a function name to its entry line index.
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    /// Whether the script defines the named function.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Iterate over all registered labels.
    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Iterate over all registered function entry points.
    pub fn functions(&self) -> impl Iterator<Item = (&str, usize)> {
        self.functions.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Declared variable initializers, in source order.
    pub fn var_inits(&self) -> &[VarInit] {
        &self.var_inits
    }

    /// Render the numbered element table, one row per top-level line.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (index, &id) in self.lines.iter().enumerate() {
            let elem = self.arena.get(id);
            let label = match &elem.kind {
                ElementKind::Knot { label }
                | ElementKind::Stitch { label }
                | ElementKind::Divert { label, .. } => label.as_str(),
                ElementKind::Variable { name } => name.as_str(),
                _ => "",
            };
            out.push_str(&format!(
                "[{index:3}] {:<10} {:<16} gather {}\n",
                elem.kind.name(),
                label,
                elem.gather_level
            ));
        }
        out
    }
}

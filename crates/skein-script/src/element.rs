//! The compiled element graph.
//!
//! A parsed script is a flat arena of typed elements. Each source line
//! compiles to a chain of elements linked through `next` (a paragraph
//! followed by an inline list followed by a divert, say), and the head of
//! each chain is recorded in the script's top-level line table. List and
//! choice elements additionally own child chains linked to each other
//! through `sibling`. The graph is never altered once built, so elements
//! are addressed by stable arena indices rather than pointers.

use serde::{Deserialize, Serialize};
use skein_core::CompiledExpr;

/// Stable handle to an element in a script's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElemId(u32);

impl ElemId {
    /// The arena slot this id refers to.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Selection policy for a `{...}` variation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListPolicy {
    /// Walk the branches in order, then stay on the last one.
    Sequence,
    /// Walk the branches in order, wrapping around.
    Cycle,
    /// Walk the branches in order, then produce nothing.
    Once,
    /// Pick a branch at random on every visit.
    Shuffle,
    /// First child is a condition expression; it picks between the
    /// remaining branches.
    Conditional,
}

/// Where a divert jumps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivertTarget {
    /// A top-level line index in the owning script.
    Line(usize),
    /// The terminal sentinel (`-> END`); the cursor stops here.
    End,
}

/// The payload of one compiled element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    /// A literal run of text.
    Paragraph {
        /// The text, kept verbatim including glue markers and tag spans.
        text: String,
    },
    /// A named top-level section. Evaluation bumps the visit counter
    /// stored under the label in the variable store.
    Knot {
        /// The section label.
        label: String,
    },
    /// A named sub-section within a knot; counts visits like a knot.
    Stitch {
        /// The qualified label (`knot.name`).
        label: String,
    },
    /// An unconditional jump.
    Divert {
        /// The target as written in the source, for diagnostics.
        label: String,
        /// The resolved target.
        target: DivertTarget,
    },
    /// A set of alternative content chains with a selection policy.
    List {
        /// How a branch is picked on each visit.
        policy: ListPolicy,
    },
    /// A compiled fragment of the expression language.
    Expression {
        /// The compiled fragment.
        expr: CompiledExpr,
    },
    /// A variable read, rendered as text.
    Variable {
        /// The store key to read.
        name: String,
    },
    /// A player-selectable branch.
    Choice {
        /// Nesting depth, from the number of leading `*`/`+` markers.
        level: u32,
    },
}

impl ElementKind {
    /// Short kind name for disassembly listings.
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Paragraph { .. } => "Paragraph",
            ElementKind::Knot { .. } => "Knot",
            ElementKind::Stitch { .. } => "Stitch",
            ElementKind::Divert { .. } => "Divert",
            ElementKind::List { .. } => "List",
            ElementKind::Expression { .. } => "Expression",
            ElementKind::Variable { .. } => "Variable",
            ElementKind::Choice { .. } => "Choice",
        }
    }
}

/// One node in the element graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// What this element is and its payload.
    pub kind: ElementKind,
    /// The continuation of this element's chain.
    pub next: Option<ElemId>,
    /// First child chain, for lists and choices.
    pub children: Option<ElemId>,
    /// Next sibling among a parent's children.
    pub sibling: Option<ElemId>,
    /// Nesting depth of the innermost open choice/gather scope this
    /// element belongs to.
    pub gather_level: i32,
}

impl Element {
    /// Create an unlinked element.
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            next: None,
            children: None,
            sibling: None,
            gather_level: -1,
        }
    }

    /// Whether this is a choice element.
    pub fn is_choice(&self) -> bool {
        matches!(self.kind, ElementKind::Choice { .. })
    }

    /// Whether this is a knot element.
    pub fn is_knot(&self) -> bool {
        matches!(self.kind, ElementKind::Knot { .. })
    }

    /// The choice level, if this is a choice.
    pub fn choice_level(&self) -> Option<u32> {
        match self.kind {
            ElementKind::Choice { level } => Some(level),
            _ => None,
        }
    }
}

/// The element arena. Elements never move once allocated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    elems: Vec<Element>,
}

impl Arena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements allocated.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Allocate a new element and return its id.
    pub fn alloc(&mut self, kind: ElementKind) -> ElemId {
        let id = ElemId(self.elems.len() as u32);
        self.elems.push(Element::new(kind));
        id
    }

    /// Borrow an element.
    pub fn get(&self, id: ElemId) -> &Element {
        &self.elems[id.index()]
    }

    /// Borrow an element mutably.
    pub fn get_mut(&mut self, id: ElemId) -> &mut Element {
        &mut self.elems[id.index()]
    }

    /// Append `elem` to the end of the chain starting at `head`.
    pub fn append_next(&mut self, head: ElemId, elem: ElemId) {
        let mut tail = head;
        while let Some(next) = self.get(tail).next {
            tail = next;
        }
        self.get_mut(tail).next = Some(elem);
    }

    /// Append `child` to the end of `parent`'s child list.
    pub fn add_child(&mut self, parent: ElemId, child: ElemId) {
        match self.get(parent).children {
            None => self.get_mut(parent).children = Some(child),
            Some(first) => {
                let mut last = first;
                while let Some(sib) = self.get(last).sibling {
                    last = sib;
                }
                self.get_mut(last).sibling = Some(child);
            }
        }
    }

    /// Number of children of an element.
    pub fn num_children(&self, id: ElemId) -> usize {
        let mut count = 0;
        let mut cur = self.get(id).children;
        while let Some(c) = cur {
            count += 1;
            cur = self.get(c).sibling;
        }
        count
    }

    /// The `index`-th child of an element, if any.
    pub fn child(&self, id: ElemId, index: usize) -> Option<ElemId> {
        let mut cur = self.get(id).children;
        for _ in 0..index {
            cur = cur.and_then(|c| self.get(c).sibling);
        }
        cur
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(text: &str) -> ElementKind {
        ElementKind::Paragraph { text: text.into() }
    }

    #[test]
    fn chain_append_walks_to_tail() {
        let mut arena = Arena::new();
        let a = arena.alloc(para("a"));
        let b = arena.alloc(para("b"));
        let c = arena.alloc(para("c"));
        arena.append_next(a, b);
        arena.append_next(a, c);

        assert_eq!(arena.get(a).next, Some(b));
        assert_eq!(arena.get(b).next, Some(c));
        assert_eq!(arena.get(c).next, None);
    }

    #[test]
    fn children_are_ordered_siblings() {
        let mut arena = Arena::new();
        let list = arena.alloc(ElementKind::List {
            policy: ListPolicy::Sequence,
        });
        let one = arena.alloc(para("one"));
        let two = arena.alloc(para("two"));
        let three = arena.alloc(para("three"));
        arena.add_child(list, one);
        arena.add_child(list, two);
        arena.add_child(list, three);

        assert_eq!(arena.num_children(list), 3);
        assert_eq!(arena.child(list, 0), Some(one));
        assert_eq!(arena.child(list, 1), Some(two));
        assert_eq!(arena.child(list, 2), Some(three));
        assert_eq!(arena.child(list, 3), None);
    }

    #[test]
    fn kind_names() {
        assert_eq!(para("x").name(), "Paragraph");
        assert_eq!(ElementKind::Choice { level: 1 }.name(), "Choice");
    }
}

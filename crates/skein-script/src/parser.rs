//! The line-oriented parser.
//!
//! Each source line is classified by its leading markers and converted to a
//! chain of elements appended to the growing script. Knot and stitch
//! headers update the label tables as they are seen; divert targets are
//! resolved in a second pass once every label is known, so forward
//! references work. A single malformed line rejects the whole script.

use crate::element::{Arena, DivertTarget, ElemId, ElementKind, ListPolicy};
use crate::error::ScriptError;
use crate::script::{ENTRY_LABEL, Script, VarInit, VarInitValue};
use skein_core::{CompiledExpr, Value};
use std::collections::HashMap;

/// Resolves `INCLUDE` names to sub-document source text.
pub trait IncludeResolver {
    /// Return the source text of the named sub-document, if known.
    fn resolve(&self, name: &str) -> Option<String>;
}

impl<F> IncludeResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// Parse a script from source text.
pub fn parse(name: &str, source: &str) -> Result<Script, ScriptError> {
    Parser::new().run(name, source, None)
}

/// Parse a script that may pull in sub-documents with `INCLUDE name` lines.
pub fn parse_with_includes(
    name: &str,
    source: &str,
    resolver: &dyn IncludeResolver,
) -> Result<Script, ScriptError> {
    Parser::new().run(name, source, Some(resolver))
}

/// Upper bound on `INCLUDE` nesting.
const MAX_INCLUDE_DEPTH: usize = 16;

/// Upper bound on brace/choice nesting within one line.
const MAX_NESTING: usize = 32;

/// Minimum similarity for a "did you mean" divert suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// One logical source line after comment stripping.
#[derive(Debug, Clone)]
struct Line {
    text: String,
    number: usize,
    span: std::ops::Range<usize>,
}

/// A divert waiting for the link pass, with the knot it was written in.
struct PendingDivert {
    elem: ElemId,
    label: String,
    knot: Option<String>,
    line: usize,
    span: std::ops::Range<usize>,
}

struct Parser {
    arena: Arena,
    lines: Vec<ElemId>,
    labels: HashMap<String, usize>,
    functions: HashMap<String, usize>,
    var_inits: Vec<VarInit>,
    pending_diverts: Vec<PendingDivert>,
    gather_level: i32,
    next_gather_level: i32,
    current_knot: Option<String>,
    in_expr_block: bool,
}

impl Parser {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            lines: Vec::new(),
            labels: HashMap::new(),
            functions: HashMap::new(),
            var_inits: Vec::new(),
            pending_diverts: Vec::new(),
            gather_level: 0,
            next_gather_level: 0,
            current_knot: None,
            in_expr_block: false,
        }
    }

    fn run(
        mut self,
        name: &str,
        source: &str,
        resolver: Option<&dyn IncludeResolver>,
    ) -> Result<Script, ScriptError> {
        // line 0 is the synthetic entry knot
        let entry = self.arena.alloc(ElementKind::Knot {
            label: ENTRY_LABEL.to_string(),
        });
        self.arena.get_mut(entry).gather_level = 0;
        self.lines.push(entry);

        let mut stack = vec![logical_lines(source, true).into_iter()];

        while let Some(iter) = stack.last_mut() {
            let Some(line) = iter.next() else {
                stack.pop();
                continue;
            };
            let mut text = line.text.trim_start();

            if !self.in_expr_block {
                if let Some(rest) = text.strip_prefix("INCLUDE ") {
                    let sub_name = rest.trim();
                    let sub = resolver.and_then(|r| r.resolve(sub_name));
                    match sub {
                        Some(sub_source) => {
                            if stack.len() >= MAX_INCLUDE_DEPTH {
                                return Err(ScriptError::Parse {
                                    line: line.number,
                                    message: "includes nested too deeply".to_string(),
                                    span: line.span.clone(),
                                });
                            }
                            stack.push(logical_lines(&sub_source, false).into_iter());
                        }
                        None => {
                            return Err(ScriptError::Include {
                                line: line.number,
                                name: sub_name.to_string(),
                                span: line.span.clone(),
                            });
                        }
                    }
                    continue;
                }
            }

            if let Some(rest) = text.strip_prefix("~~~") {
                self.in_expr_block = !self.in_expr_block;
                if rest.trim().is_empty() {
                    continue;
                }
                text = rest;
            }

            if text.is_empty() {
                continue;
            }

            if let Some(head) = self.chain_from_line(text, &line, 0)? {
                self.lines.push(head);
            }
        }

        self.link_diverts()?;

        Ok(Script::new(
            name.to_string(),
            self.arena,
            self.lines,
            self.labels,
            self.functions,
            self.var_inits,
            source.to_string(),
        ))
    }

    /// Convert one line (or line fragment) into a chain of elements,
    /// returning the chain head. Marker handling updates the gather state;
    /// the head element is stamped with the line's gather level.
    fn chain_from_line(
        &mut self,
        text: &str,
        src: &Line,
        depth: usize,
    ) -> Result<Option<ElemId>, ScriptError> {
        if depth > MAX_NESTING {
            return Err(self.err(src, "constructs nested too deeply"));
        }

        let mut head: Option<ElemId> = None;
        let mut rest = text;

        while !rest.is_empty() {
            if self.in_expr_block || rest.starts_with('~') {
                let elem = self.parse_expression(rest);
                self.push_chain(&mut head, elem);
                rest = "";
            } else if rest.starts_with("==") {
                self.parse_knot(rest, src, depth, &mut head)?;
                rest = "";
            } else if rest.starts_with('=') {
                self.parse_stitch(rest, src, depth, &mut head)?;
                rest = "";
            } else if rest.starts_with("->") {
                self.parse_divert(rest, src, &mut head)?;
                rest = "";
            } else if rest.starts_with('-') {
                rest = parse_gather_markers(rest, &mut self.gather_level, &mut self.next_gather_level);
            } else if rest.starts_with('*') || rest.starts_with('+') {
                self.parse_choice(rest, src, depth, &mut head)?;
                rest = "";
            } else if rest.starts_with('{') {
                let consumed = self.parse_list(rest, src, depth, &mut head)?;
                rest = &rest[consumed..];
            } else if rest.starts_with("VAR ") || rest.starts_with("CONST ") {
                self.parse_var(rest, src)?;
                rest = "";
            } else {
                let consumed = self.parse_paragraph(rest, &mut head);
                rest = &rest[consumed..];
            }
        }

        if let Some(h) = head {
            self.arena.get_mut(h).gather_level = self.gather_level;
            self.gather_level = self.next_gather_level;
        }

        Ok(head)
    }

    /// Parse an embedded fragment (a list branch or a choice part) without
    /// disturbing the enclosing line's gather state.
    fn parse_fragment(
        &mut self,
        text: &str,
        src: &Line,
        depth: usize,
    ) -> Result<Option<ElemId>, ScriptError> {
        let saved = (self.gather_level, self.next_gather_level);
        let result = self.chain_from_line(text, src, depth);
        self.gather_level = saved.0;
        self.next_gather_level = saved.1;
        result
    }

    fn parse_knot(
        &mut self,
        rest: &str,
        src: &Line,
        depth: usize,
        head: &mut Option<ElemId>,
    ) -> Result<(), ScriptError> {
        if depth > 0 {
            return Err(self.err(src, "section header inside an embedded construct"));
        }

        let body = rest.trim_start_matches('=').trim_start();
        let mut words = body.split_whitespace();
        let first = words.next().unwrap_or("").trim_end_matches('=');
        if first.is_empty() {
            return Err(self.err(src, "malformed knot header: missing name"));
        }

        let label = if first == "function" {
            let fn_name = words.next().unwrap_or("").trim_end_matches('=');
            if fn_name.is_empty() {
                return Err(self.err(src, "malformed function header: missing name"));
            }
            if self
                .functions
                .insert(fn_name.to_string(), self.lines.len())
                .is_some()
            {
                return Err(self.err(src, format!("duplicate function \"{fn_name}\"")));
            }
            fn_name
        } else {
            first
        };

        if self
            .labels
            .insert(label.to_string(), self.lines.len())
            .is_some()
        {
            return Err(self.err(src, format!("duplicate label \"{label}\"")));
        }

        let elem = self.arena.alloc(ElementKind::Knot {
            label: label.to_string(),
        });
        self.current_knot = Some(label.to_string());
        self.gather_level = 0;
        self.next_gather_level = 0;
        self.push_chain(head, elem);
        Ok(())
    }

    fn parse_stitch(
        &mut self,
        rest: &str,
        src: &Line,
        depth: usize,
        head: &mut Option<ElemId>,
    ) -> Result<(), ScriptError> {
        if depth > 0 {
            return Err(self.err(src, "section header inside an embedded construct"));
        }

        let body = rest.strip_prefix('=').unwrap_or(rest).trim_start();
        let bare = body
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches('=');
        if bare.is_empty() {
            return Err(self.err(src, "malformed stitch header: missing name"));
        }

        let full = match &self.current_knot {
            Some(knot) => format!("{knot}.{bare}"),
            None => bare.to_string(),
        };

        let index = self.lines.len();
        if self.labels.insert(full.clone(), index).is_some() {
            return Err(self.err(src, format!("duplicate label \"{full}\"")));
        }
        // the bare name is also addressable, first registration wins
        self.labels.entry(bare.to_string()).or_insert(index);

        let elem = self.arena.alloc(ElementKind::Stitch { label: full });
        self.gather_level = 0;
        self.next_gather_level = 0;
        self.push_chain(head, elem);
        Ok(())
    }

    fn parse_divert(
        &mut self,
        rest: &str,
        src: &Line,
        head: &mut Option<ElemId>,
    ) -> Result<(), ScriptError> {
        let body = rest.strip_prefix("->").unwrap_or(rest).trim_start();
        let label = body.split_whitespace().next().unwrap_or("");
        if label.is_empty() {
            return Err(self.err(src, "divert missing target"));
        }

        let target = if label == "END" {
            DivertTarget::End
        } else {
            // placeholder until the link pass resolves the label
            DivertTarget::Line(usize::MAX)
        };
        let elem = self.arena.alloc(ElementKind::Divert {
            label: label.to_string(),
            target,
        });
        if matches!(target, DivertTarget::Line(_)) {
            self.pending_diverts.push(PendingDivert {
                elem,
                label: label.to_string(),
                knot: self.current_knot.clone(),
                line: src.number,
                span: src.span.clone(),
            });
        }
        self.push_chain(head, elem);
        Ok(())
    }

    fn parse_choice(
        &mut self,
        rest: &str,
        src: &Line,
        depth: usize,
        head: &mut Option<ElemId>,
    ) -> Result<(), ScriptError> {
        let mut level: u32 = 0;
        let mut s = rest;
        while s.starts_with('*') || s.starts_with('+') {
            level += 1;
            s = s[1..].trim_start();
        }

        self.gather_level = level as i32 * 2 - 1;
        self.next_gather_level = self.gather_level + 1;

        let choice = self.arena.alloc(ElementKind::Choice { level });

        // optional leading condition
        if s.starts_with('{') {
            let close = matching_brace(s)
                .ok_or_else(|| self.err(src, "unterminated choice condition"))?;
            let expr = self.arena.alloc(ElementKind::Expression {
                expr: CompiledExpr::compile(&s[1..close]),
            });
            self.arena.add_child(choice, expr);
            s = s[close + 1..].trim_start();
        }

        // split on the optional [bracketed] span into header / bracket-only
        // text / post-selection text
        let (header, bracket, select) = match (s.find('['), s.find(']')) {
            (Some(open), Some(close)) if open < close => {
                (&s[..open], &s[open + 1..close], &s[close + 1..])
            }
            _ => (s, "", ""),
        };

        for part in [header, bracket, select] {
            let child = match self.parse_fragment(part, src, depth + 1)? {
                Some(c) => c,
                None => self.arena.alloc(ElementKind::Paragraph {
                    text: String::new(),
                }),
            };
            self.arena.add_child(choice, child);
        }

        self.push_chain(head, choice);
        Ok(())
    }

    fn parse_list(
        &mut self,
        rest: &str,
        src: &Line,
        depth: usize,
        head: &mut Option<ElemId>,
    ) -> Result<usize, ScriptError> {
        let mut policy = ListPolicy::Sequence;
        let mut explicit = false;
        let mut inner_start = 1;
        match rest[1..].chars().next() {
            Some('&') => {
                policy = ListPolicy::Cycle;
                explicit = true;
                inner_start = 2;
            }
            Some('!') => {
                policy = ListPolicy::Once;
                explicit = true;
                inner_start = 2;
            }
            Some('~') => {
                policy = ListPolicy::Shuffle;
                explicit = true;
                inner_start = 2;
            }
            _ => {}
        }

        // find the matching close, the top-level branch separators, and an
        // optional condition marker in the first branch
        let mut brace_depth = 0usize;
        let mut close = None;
        let mut splits: Vec<usize> = Vec::new();
        let mut colon: Option<usize> = None;
        for (offset, c) in rest[inner_start..].char_indices() {
            let at = inner_start + offset;
            match c {
                '{' => brace_depth += 1,
                '}' => {
                    if brace_depth == 0 {
                        close = Some(at);
                        break;
                    }
                    brace_depth -= 1;
                }
                '|' if brace_depth == 0 => splits.push(at),
                ':' if brace_depth == 0 => {
                    if explicit || colon.is_some() || !splits.is_empty() {
                        return Err(self.err(src, "malformed list: misplaced condition marker"));
                    }
                    colon = Some(at);
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| self.err(src, "unterminated list"))?;

        if let Some(colon_at) = colon {
            // conditional: first child is the condition expression, then
            // the true branch and an optional false branch
            let list = self.arena.alloc(ElementKind::List {
                policy: ListPolicy::Conditional,
            });
            let cond = self.arena.alloc(ElementKind::Expression {
                expr: CompiledExpr::compile(&rest[inner_start..colon_at]),
            });
            self.arena.add_child(list, cond);
            for part in split_parts(rest, colon_at + 1, &splits, close) {
                let child = self.fragment_or_empty(part, src, depth)?;
                self.arena.add_child(list, child);
            }
            self.push_chain(head, list);
            return Ok(close + 1);
        }

        let parts = split_parts(rest, inner_start, &splits, close);

        if parts.len() == 1 && !explicit {
            let body = parts[0].trim();
            if is_identifier(body) {
                // a bare identifier is a variable read
                let var = self.arena.alloc(ElementKind::Variable {
                    name: body.to_string(),
                });
                self.push_chain(head, var);
                return Ok(close + 1);
            }
            if body.contains('(') && body.contains(')') {
                // an inline expression call, `{roll(2)}`
                let expr = self.arena.alloc(ElementKind::Expression {
                    expr: CompiledExpr::compile(body),
                });
                self.push_chain(head, expr);
                return Ok(close + 1);
            }
        }

        let list = self.arena.alloc(ElementKind::List { policy });
        for part in parts {
            let child = self.fragment_or_empty(part, src, depth)?;
            self.arena.add_child(list, child);
        }
        self.push_chain(head, list);
        Ok(close + 1)
    }

    fn fragment_or_empty(
        &mut self,
        part: &str,
        src: &Line,
        depth: usize,
    ) -> Result<ElemId, ScriptError> {
        match self.parse_fragment(part, src, depth + 1)? {
            Some(c) => Ok(c),
            None => Ok(self.arena.alloc(ElementKind::Paragraph {
                text: String::new(),
            })),
        }
    }

    fn parse_expression(&mut self, rest: &str) -> ElemId {
        let body = match rest.strip_prefix('~') {
            Some(r) => r.trim_start(),
            None => rest,
        };
        self.arena.alloc(ElementKind::Expression {
            expr: CompiledExpr::compile(body),
        })
    }

    fn parse_var(&mut self, rest: &str, src: &Line) -> Result<(), ScriptError> {
        let body = match rest.split_once(' ') {
            Some((_, b)) => b.trim_start(),
            None => "",
        };
        let Some(eq) = body.find('=') else {
            return Err(self.err(src, "malformed declaration: expected '='"));
        };
        let name = body[..eq].trim();
        if !is_identifier(name) {
            return Err(self.err(src, "malformed declaration: bad variable name"));
        }
        let value_src = &body[eq + 1..];
        if value_src.starts_with('=') {
            return Err(self.err(src, "malformed declaration: expected '=', found \"==\""));
        }
        let value_src = value_src.trim();
        if value_src.is_empty() {
            return Err(self.err(src, "malformed declaration: missing value"));
        }

        let init = parse_literal(value_src).map_or_else(
            || VarInitValue::Expr(CompiledExpr::compile(&format!("{name} = {value_src}"))),
            VarInitValue::Literal,
        );
        self.var_inits.push(VarInit {
            name: name.to_string(),
            init,
        });
        Ok(())
    }

    /// Scan literal text up to an embedded divert or list; everything else
    /// (glue, brackets, tag spans) passes through verbatim.
    fn parse_paragraph(&mut self, rest: &str, head: &mut Option<ElemId>) -> usize {
        let mut end = rest.len();
        let mut iter = rest.char_indices().peekable();
        while let Some((at, c)) = iter.next() {
            if c == '{' || (c == '-' && matches!(iter.peek(), Some((_, '>')))) {
                end = at;
                break;
            }
        }
        let elem = self.arena.alloc(ElementKind::Paragraph {
            text: rest[..end].to_string(),
        });
        self.push_chain(head, elem);
        end
    }

    fn push_chain(&mut self, head: &mut Option<ElemId>, elem: ElemId) {
        match *head {
            None => *head = Some(elem),
            Some(h) => self.arena.append_next(h, elem),
        }
    }

    fn link_diverts(&mut self) -> Result<(), ScriptError> {
        let pending = std::mem::take(&mut self.pending_diverts);
        for pd in pending {
            let resolved = self.labels.get(&pd.label).copied().or_else(|| {
                pd.knot
                    .as_ref()
                    .and_then(|k| self.labels.get(&format!("{k}.{}", pd.label)).copied())
            });
            match resolved {
                Some(index) => {
                    if let ElementKind::Divert { target, .. } = &mut self.arena.get_mut(pd.elem).kind
                    {
                        *target = DivertTarget::Line(index);
                    }
                }
                None => {
                    let hint = self
                        .labels
                        .keys()
                        .map(|k| (k, strsim::jaro_winkler(k, &pd.label)))
                        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
                        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                        .map(|(k, _)| format!("; did you mean \"{k}\"?"))
                        .unwrap_or_default();
                    return Err(ScriptError::Parse {
                        line: pd.line,
                        message: format!("unknown divert target \"{}\"{hint}", pd.label),
                        span: pd.span,
                    });
                }
            }
        }
        Ok(())
    }

    fn err(&self, src: &Line, message: impl Into<String>) -> ScriptError {
        let mut message = message.into();
        if let Some(knot) = &self.current_knot {
            message.push_str(&format!(" (in knot \"{knot}\")"));
        }
        ScriptError::Parse {
            line: src.number,
            message,
            span: src.span.clone(),
        }
    }
}

/// Count leading gather dashes (whitespace between dashes is allowed) and
/// update the gather state. Gathers mark lines rather than producing
/// elements; the remainder of the line is returned for further parsing.
fn parse_gather_markers<'t>(rest: &'t str, gather: &mut i32, next_gather: &mut i32) -> &'t str {
    let mut depth: i32 = 0;
    let mut s = rest;
    while let Some(stripped) = s.strip_prefix('-') {
        depth += 1;
        s = stripped.trim_start();
    }
    *gather = depth * 2 - 2;
    *next_gather = *gather;
    s
}

/// Byte index of the `}` matching the `{` at the start of `s`.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (at, c) in s.char_indices().skip(1) {
        match c {
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Some(at);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Slice `source` into branch parts between `start`, the separator
/// positions, and `end`.
fn split_parts<'t>(source: &'t str, start: usize, splits: &[usize], end: usize) -> Vec<&'t str> {
    let mut parts = Vec::with_capacity(splits.len() + 1);
    let mut at = start;
    for &split in splits {
        if split < at {
            continue;
        }
        parts.push(&source[at..split]);
        at = split + 1;
    }
    parts.push(&source[at..end]);
    parts
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn parse_literal(s: &str) -> Option<Value> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(Value::Int(n));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Some(Value::Float(f));
    }
    if s == "true" {
        return Some(Value::Bool(true));
    }
    if s == "false" {
        return Some(Value::Bool(false));
    }
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return Some(Value::Str(s[1..s.len() - 1].to_string()));
    }
    None
}

/// Split source text into logical lines with comments removed.
///
/// A `//` comment truncates its line. A `/* ... */` block ends the current
/// logical line where it opens; text after the close starts a new logical
/// line. `with_spans` is false for included sub-documents, whose offsets
/// do not map into the root source.
fn logical_lines(source: &str, with_spans: bool) -> Vec<Line> {
    #[derive(PartialEq)]
    enum Mode {
        Normal,
        LineComment,
        BlockComment,
    }

    let mut lines = Vec::new();
    let mut buf = String::new();
    let mut mode = Mode::Normal;
    let mut number = 1usize;
    let mut start_line = 1usize;
    let mut start_offset = 0usize;

    let mut push = |buf: &mut String, start_line: usize, start: usize, end: usize| {
        let mut text = std::mem::take(buf);
        if text.ends_with('\r') {
            text.pop();
        }
        lines.push(Line {
            text,
            number: start_line,
            span: if with_spans { start..end } else { 0..0 },
        });
    };

    let mut iter = source.char_indices().peekable();
    while let Some((at, c)) = iter.next() {
        match mode {
            Mode::Normal => {
                if c == '\n' {
                    push(&mut buf, start_line, start_offset, at);
                    number += 1;
                    start_line = number;
                    start_offset = at + 1;
                } else if c == '/' && matches!(iter.peek(), Some((_, '/'))) {
                    iter.next();
                    mode = Mode::LineComment;
                } else if c == '/' && matches!(iter.peek(), Some((_, '*'))) {
                    iter.next();
                    push(&mut buf, start_line, start_offset, at);
                    mode = Mode::BlockComment;
                } else {
                    buf.push(c);
                }
            }
            Mode::LineComment => {
                if c == '\n' {
                    push(&mut buf, start_line, start_offset, at);
                    number += 1;
                    start_line = number;
                    start_offset = at + 1;
                    mode = Mode::Normal;
                }
            }
            Mode::BlockComment => {
                if c == '\n' {
                    number += 1;
                } else if c == '*' && matches!(iter.peek(), Some((_, '/'))) {
                    iter.next();
                    start_line = number;
                    start_offset = iter.peek().map(|&(i, _)| i).unwrap_or(source.len());
                    mode = Mode::Normal;
                }
            }
        }
    }
    if mode != Mode::BlockComment && !buf.is_empty() {
        push(&mut buf, start_line, start_offset, source.len());
    }

    lines
}

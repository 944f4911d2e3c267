//! The execution cursor.
//!
//! A cursor is the mutable, resumable interpreter position bound to one
//! compiled script. `cont` walks the element graph accumulating text until
//! a line boundary (not suppressed by glue), a choice scope, or the
//! terminal divert; `choose_choice_index` relinks the cursor into the
//! selected branch. Suspension is logical: every call returns, and the
//! next call resumes exactly where the previous one left off.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use skein_core::{CompiledExpr, EvalOutcome, Evaluator, FnDispatch, NativeFn, Value, VarStore};
use skein_script::{DivertTarget, ElemId, ElementKind, ListPolicy, Script, VarInitValue};
use std::collections::HashMap;
use std::sync::Arc;

/// External collaborators threaded through every evaluating call: the
/// variable store and the expression evaluator. The cursor never owns
/// either; it only borrows them for the duration of a call.
pub struct ExecEnv<'a> {
    /// The variable store, shared with the host and other cursors.
    pub store: &'a mut dyn VarStore,
    /// The expression evaluator.
    pub evaluator: &'a dyn Evaluator,
}

impl<'a> ExecEnv<'a> {
    /// Bundle a store and an evaluator.
    pub fn new(store: &'a mut dyn VarStore, evaluator: &'a dyn Evaluator) -> Self {
        Self { store, evaluator }
    }
}

/// Interpreter state of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Just created or just repositioned; nothing evaluated yet.
    Idle,
    /// Mid-script with content ahead.
    Advancing,
    /// Parked on a collected choice scope; waiting for a selection.
    AwaitingChoice,
    /// Reached the terminal divert or ran out of elements.
    Terminated,
}

/// One collected pending choice.
#[derive(Debug, Clone, Copy)]
struct PendingChoice {
    line: usize,
    elem: ElemId,
}

/// Per-list selection state, owned by the cursor so concurrent cursors on
/// a shared script never interact. Survives `restart`.
#[derive(Debug, Clone)]
struct ListState {
    count: i64,
    selected: Option<usize>,
}

impl Default for ListState {
    fn default() -> Self {
        Self {
            count: -1,
            selected: None,
        }
    }
}

/// Script functions invoked from expressions may nest this deep before
/// further calls resolve to `Unknown`.
const MAX_FN_DEPTH: u8 = 8;

/// A cursor spinning through this many elements without emitting text or
/// changing state is assumed to be stuck in a divert cycle and terminates.
const MAX_SILENT_STEPS: usize = 100_000;

/// The execution cursor: mutable interpreter state over one shared script.
pub struct Cursor {
    script: Arc<Script>,
    pos: usize,
    start_pos: usize,
    state: RunState,
    current_knot: Option<String>,
    pending: Vec<PendingChoice>,
    chosen: Option<usize>,
    lists: HashMap<ElemId, ListState>,
    local_fns: Vec<Box<dyn NativeFn>>,
    rng: StdRng,
    fn_depth: u8,
    seeded: bool,
}

impl Cursor {
    /// Create a cursor positioned at the top of the script.
    pub fn new(script: Arc<Script>) -> Self {
        Self::with_rng(script, StdRng::from_os_rng())
    }

    /// Create a cursor with a fixed shuffle seed, for deterministic replay.
    pub fn with_seed(script: Arc<Script>, seed: u64) -> Self {
        Self::with_rng(script, StdRng::seed_from_u64(seed))
    }

    fn with_rng(script: Arc<Script>, rng: StdRng) -> Self {
        Self {
            script,
            pos: 0,
            start_pos: 0,
            state: RunState::Idle,
            current_knot: None,
            pending: Vec::new(),
            chosen: None,
            lists: HashMap::new(),
            local_fns: Vec::new(),
            rng,
            fn_depth: 0,
            seeded: false,
        }
    }

    /// The script this cursor runs against.
    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    /// Current interpreter state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Label of the most recently visited knot.
    pub fn current_knot(&self) -> Option<&str> {
        self.current_knot.as_deref()
    }

    /// Register a cursor-local native function callable from expressions.
    pub fn register_fn(&mut self, function: Box<dyn NativeFn>) {
        self.local_fns.push(function);
    }

    /// Reposition to an arbitrary line index and reset per-run state.
    /// List branch-position state is deliberately kept.
    pub fn start(&mut self, line: usize) {
        self.start_pos = line;
        self.restart();
    }

    /// Reposition to a knot or stitch label. Returns false and leaves the
    /// cursor without content when the label is unknown.
    pub fn start_label(&mut self, label: &str) -> bool {
        match self.script.label_index(label) {
            Some(index) => {
                self.start(index);
                true
            }
            None => {
                self.start(usize::MAX);
                false
            }
        }
    }

    /// Reposition to a function entry point. Returns false and leaves the
    /// cursor without content when the function is unknown.
    pub fn start_function(&mut self, name: &str) -> bool {
        match self.script.function_index(name) {
            Some(index) => {
                self.start(index);
                true
            }
            None => {
                self.start(usize::MAX);
                false
            }
        }
    }

    /// Return to the start position, clearing choices and the knot
    /// bookmark. List branch-position state survives.
    pub fn restart(&mut self) {
        self.pos = self.start_pos;
        self.state = RunState::Idle;
        self.current_knot = None;
        self.clear_choices();
    }

    /// True while the cursor has not terminated (it may be parked on a
    /// choice scope).
    pub fn has_content(&self) -> bool {
        self.state != RunState::Terminated && self.script.is_valid_line(self.pos)
    }

    /// True when `cont` may legally produce another line.
    pub fn can_continue(&self) -> bool {
        matches!(self.state, RunState::Idle | RunState::Advancing)
            && self.script.is_valid_line(self.pos)
    }

    /// Number of pending choices; 0 unless parked on a choice scope.
    pub fn num_choices(&self) -> usize {
        self.pending.len()
    }

    /// Whether any choices are pending.
    pub fn has_choices(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Select a pending choice. Legal only while awaiting a choice;
    /// anything else, including an out-of-range index, is a no-op.
    pub fn choose_choice_index(&mut self, index: usize) {
        if self.state == RunState::AwaitingChoice && index < self.pending.len() {
            self.chosen = Some(index);
            self.state = RunState::Advancing;
        }
    }

    /// Display text of a pending choice (header plus bracket text).
    /// Out-of-range indexes yield empty text.
    pub fn choice_text(&mut self, index: usize, env: &mut ExecEnv<'_>) -> String {
        self.ensure_seeded(env);
        let Some(pc) = self.pending.get(index).copied() else {
            return String::new();
        };
        let (_, header, bracket, _) = self.choice_parts(pc.elem);
        let mut out = String::new();
        if let Some(h) = header {
            self.render_chain(h, env, &mut out);
        }
        if let Some(b) = bracket {
            self.render_chain(b, env, &mut out);
        }
        finish_text(out)
    }

    /// Produce the next unit of output text.
    ///
    /// Walks elements until a line boundary not suppressed by glue, a
    /// choice scope (collected into the pending list), the terminal
    /// divert, or the end of the chain. Calling this when
    /// [`Cursor::can_continue`] is false returns empty text.
    pub fn cont(&mut self, env: &mut ExecEnv<'_>) -> String {
        self.cont_inner(env, false)
    }

    /// `cont`, optionally breaking on the next knot header. The knot stop
    /// is used when draining script functions invoked from expressions.
    pub(crate) fn cont_inner(&mut self, env: &mut ExecEnv<'_>, stop_at_knot: bool) -> String {
        self.ensure_seeded(env);
        let script = Arc::clone(&self.script);
        let mut out = String::new();
        let mut silent_steps = 0usize;

        while self.can_continue() {
            self.state = RunState::Advancing;
            let Some(head) = script.line(self.pos) else {
                self.state = RunState::Terminated;
                break;
            };
            let start_gather = script.elem(head).gather_level;
            let mut advance = true;
            let mut returned = false;
            // the element whose continuation drives the next position;
            // normally the line head, but the selected choice after a pick
            let mut base = head;

            let mut cur = Some(head);
            while let Some(id) = cur {
                returned = false;
                match &script.elem(id).kind {
                    ElementKind::Choice { .. } => {
                        if let Some(index) = self.chosen.take() {
                            if let Some(pc) = self.pending.get(index).copied() {
                                self.pos = pc.line;
                                base = pc.elem;
                                self.render_selected(pc.elem, env, &mut out);
                            }
                            self.clear_choices();
                        } else if self.pending.is_empty() {
                            self.collect_choices(env);
                            self.state = RunState::AwaitingChoice;
                            advance = false;
                        }
                        break;
                    }
                    ElementKind::Knot { label } => {
                        self.current_knot = Some(label.clone());
                        env.store.increment(label);
                    }
                    ElementKind::Stitch { label } => {
                        env.store.increment(label);
                    }
                    ElementKind::Divert { .. } => {}
                    ElementKind::Paragraph { text } => out.push_str(text),
                    ElementKind::Variable { name } => out.push_str(&env.store.get_text(name)),
                    ElementKind::List { policy } => {
                        if let Some(branch) = self.select_branch(id, *policy, env) {
                            self.render_chain(branch, env, &mut out);
                        }
                    }
                    ElementKind::Expression { expr } => {
                        let outcome = self.eval_expr(expr, env);
                        if let Value::Str(text) = outcome.value {
                            out.push_str(&text);
                        }
                        returned = outcome.returned;
                    }
                }
                cur = script.elem(id).next;
            }

            if advance {
                let next = self
                    .next_line_index(base, self.pos)
                    .filter(|&n| script.is_valid_line(n));
                match next {
                    None => self.state = RunState::Terminated,
                    Some(n) => {
                        let cur_elem = script.elem(base);
                        let cur_level = cur_elem.gather_level;
                        let next_elem = script.elem(script.line(n).unwrap_or(base));
                        // a choice with no body, or the end of an indented
                        // block: skip ahead to the merge point
                        let choice_without_body = cur_elem.is_choice()
                            && next_elem.is_choice()
                            && next_elem.gather_level == cur_level;
                        let leaving_block =
                            n == self.pos + 1 && cur_level > next_elem.gather_level;
                        if choice_without_body || leaving_block {
                            let mut at = self.pos;
                            let mut merged = false;
                            while let Some(line_id) = script.line(at) {
                                let elem = script.elem(line_id);
                                if !elem.is_choice() && elem.gather_level < cur_level {
                                    self.pos = at;
                                    merged = true;
                                    break;
                                }
                                at += 1;
                            }
                            if !merged {
                                self.state = RunState::Terminated;
                            }
                        } else {
                            self.pos = n;
                        }
                    }
                }
            }

            let next_is_choice = self.state != RunState::Terminated
                && script.line(self.pos).is_some_and(|id| {
                    let elem = script.elem(id);
                    elem.is_choice() && elem.gather_level == start_gather + 1
                });

            if !out.is_empty() {
                if out.ends_with("<>") {
                    // glue: suppress the boundary and keep composing
                    out.truncate(out.len() - 2);
                } else if !next_is_choice {
                    break;
                }
            } else {
                silent_steps += 1;
                if silent_steps > MAX_SILENT_STEPS {
                    self.state = RunState::Terminated;
                    break;
                }
            }

            if stop_at_knot
                && self.state != RunState::Terminated
                && script
                    .line(self.pos)
                    .is_some_and(|id| script.elem(id).is_knot())
            {
                break;
            }

            if returned {
                self.state = RunState::Terminated;
                break;
            }
        }

        finish_text(out)
    }

    /// Seed declared `VAR`/`CONST` initial values, insert-if-absent, the
    /// first time this cursor evaluates anything.
    fn ensure_seeded(&mut self, env: &mut ExecEnv<'_>) {
        if self.seeded {
            return;
        }
        self.seeded = true;
        let script = Arc::clone(&self.script);
        for init in script.var_inits() {
            if env.store.contains(&init.name) {
                continue;
            }
            match &init.init {
                VarInitValue::Literal(value) => env.store.set(&init.name, value.clone()),
                VarInitValue::Expr(expr) => {
                    let _ = self.eval_expr(expr, env);
                }
            }
        }
    }

    fn clear_choices(&mut self) {
        self.pending.clear();
        self.chosen = None;
    }

    /// Collect the sibling choices of the choice scope at the current
    /// line: same level and gather depth, walking forward until a section
    /// header, a shallower choice, or a shallower non-choice line.
    /// Choices whose condition evaluates false are hidden.
    fn collect_choices(&mut self, env: &mut ExecEnv<'_>) {
        let script = Arc::clone(&self.script);
        let Some(base_id) = script.line(self.pos) else {
            return;
        };
        let base = script.elem(base_id);
        let Some(level) = base.choice_level() else {
            return;
        };
        let base_gather = base.gather_level;

        let mut at = self.pos;
        while let Some(line_id) = script.line(at) {
            let elem = script.elem(line_id);
            match elem.choice_level() {
                Some(l) if l < level => break,
                Some(l) if l == level && elem.gather_level == base_gather => {
                    if self.choice_visible(line_id, env) {
                        self.pending.push(PendingChoice {
                            line: at,
                            elem: line_id,
                        });
                    }
                }
                Some(_) => {} // deeper choice inside a sibling's branch
                None => {
                    if elem.is_knot() || matches!(elem.kind, ElementKind::Stitch { .. }) {
                        break;
                    }
                    if elem.gather_level < base_gather {
                        break;
                    }
                }
            }
            at += 1;
        }
    }

    fn choice_visible(&mut self, id: ElemId, env: &mut ExecEnv<'_>) -> bool {
        let script = Arc::clone(&self.script);
        let (cond, _, _, _) = self.choice_parts(id);
        match cond {
            Some(cond_id) => match &script.elem(cond_id).kind {
                ElementKind::Expression { expr } => self.eval_expr(expr, env).value.is_truthy(),
                _ => true,
            },
            None => true,
        }
    }

    /// Decompose a choice's children into (condition, header, bracket
    /// text, post-selection text).
    #[allow(clippy::type_complexity)]
    fn choice_parts(
        &self,
        id: ElemId,
    ) -> (Option<ElemId>, Option<ElemId>, Option<ElemId>, Option<ElemId>) {
        let arena = self.script.arena();
        let Some(first) = arena.child(id, 0) else {
            return (None, None, None, None);
        };
        if matches!(self.script.elem(first).kind, ElementKind::Expression { .. }) {
            (
                Some(first),
                arena.child(id, 1),
                arena.child(id, 2),
                arena.child(id, 3),
            )
        } else {
            (None, Some(first), arena.child(id, 1), arena.child(id, 2))
        }
    }

    /// Render a chosen choice: header plus post-selection text.
    fn render_selected(&mut self, id: ElemId, env: &mut ExecEnv<'_>, out: &mut String) {
        let (_, header, _, select) = self.choice_parts(id);
        if let Some(h) = header {
            self.render_chain(h, env, out);
        }
        if let Some(s) = select {
            self.render_chain(s, env, out);
        }
    }

    /// Evaluate and render an element chain (list branches, choice parts).
    fn render_chain(&mut self, head: ElemId, env: &mut ExecEnv<'_>, out: &mut String) {
        let script = Arc::clone(&self.script);
        let mut cur = Some(head);
        while let Some(id) = cur {
            match &script.elem(id).kind {
                ElementKind::Paragraph { text } => out.push_str(text),
                ElementKind::Variable { name } => out.push_str(&env.store.get_text(name)),
                ElementKind::Knot { label } | ElementKind::Stitch { label } => {
                    env.store.increment(label);
                }
                ElementKind::Divert { .. } | ElementKind::Choice { .. } => {}
                ElementKind::List { policy } => {
                    if let Some(branch) = self.select_branch(id, *policy, env) {
                        self.render_chain(branch, env, out);
                    }
                }
                ElementKind::Expression { expr } => {
                    let outcome = self.eval_expr(expr, env);
                    if let Value::Str(text) = outcome.value {
                        out.push_str(&text);
                    }
                }
            }
            cur = script.elem(id).next;
        }
    }

    /// Advance a list's visit counter and pick the branch for this visit.
    fn select_branch(
        &mut self,
        id: ElemId,
        policy: ListPolicy,
        env: &mut ExecEnv<'_>,
    ) -> Option<ElemId> {
        let script = Arc::clone(&self.script);
        let num = script.arena().num_children(id);

        let count = {
            let state = self.lists.entry(id).or_default();
            state.count += 1;
            state.count.max(0) as usize
        };

        let selected = match policy {
            ListPolicy::Sequence => (num > 0).then(|| count.min(num - 1)),
            ListPolicy::Cycle => (num > 0).then(|| count % num),
            ListPolicy::Once => (count < num).then_some(count),
            ListPolicy::Shuffle => (num > 0).then(|| self.rng.random_range(0..num)),
            ListPolicy::Conditional => {
                let truthy = script
                    .arena()
                    .child(id, 0)
                    .map(|cond_id| match &script.elem(cond_id).kind {
                        ElementKind::Expression { expr } => {
                            self.eval_expr(expr, env).value.is_truthy()
                        }
                        _ => false,
                    })
                    .unwrap_or(false);
                Some(if truthy { 1 } else { 2 })
            }
        };

        if let Some(state) = self.lists.get_mut(&id) {
            state.selected = selected;
        }
        selected.and_then(|index| script.arena().child(id, index))
    }

    /// The line the cursor moves to after evaluating `id`'s chain:
    /// diverts jump, lists and choices follow their active branch, and
    /// everything else falls through to the next line.
    fn next_line_index(&self, id: ElemId, line_pos: usize) -> Option<usize> {
        let elem = self.script.elem(id);
        match &elem.kind {
            ElementKind::Divert { target, .. } => match target {
                DivertTarget::End => None,
                DivertTarget::Line(n) => Some(*n),
            },
            ElementKind::List { .. } => {
                let branch = self
                    .lists
                    .get(&id)
                    .and_then(|state| state.selected)
                    .and_then(|index| self.script.arena().child(id, index));
                match branch {
                    Some(child) => self.next_line_index(child, line_pos),
                    None => Some(line_pos + 1),
                }
            }
            ElementKind::Choice { .. } => {
                let (_, _, _, select) = self.choice_parts(id);
                match select {
                    Some(child) => self.next_line_index(child, line_pos),
                    None => Some(line_pos + 1),
                }
            }
            _ => match elem.next {
                Some(next) => self.next_line_index(next, line_pos),
                None => Some(line_pos + 1),
            },
        }
    }

    /// Whether the current line is a knot header.
    pub(crate) fn at_knot(&self) -> bool {
        self.pos < self.script.num_lines()
            && self
                .script
                .line(self.pos)
                .is_some_and(|id| self.script.elem(id).is_knot())
    }

    fn eval_expr(&mut self, expr: &CompiledExpr, env: &mut ExecEnv<'_>) -> EvalOutcome {
        let evaluator = env.evaluator;
        let mut router = FnRouter {
            script: &self.script,
            evaluator,
            local_fns: &mut self.local_fns,
            depth: self.fn_depth,
        };
        evaluator.eval(expr, env.store, &mut router)
    }
}

/// Function dispatch for expressions evaluated by a cursor: names in the
/// script's function table run a nested cursor to the next knot and return
/// the accumulated text; anything else falls through to the cursor-local
/// native functions.
struct FnRouter<'a> {
    script: &'a Arc<Script>,
    evaluator: &'a dyn Evaluator,
    local_fns: &'a mut Vec<Box<dyn NativeFn>>,
    depth: u8,
}

impl FnDispatch for FnRouter<'_> {
    fn call(&mut self, name: &str, args: &[Value], store: &mut dyn VarStore) -> Option<Value> {
        if self.script.has_function(name) {
            if self.depth >= MAX_FN_DEPTH {
                return Some(Value::Unknown);
            }
            // TODO: feed call arguments into the store as function-local
            // names once the declaration syntax carries parameters
            let mut sub = Cursor::new(Arc::clone(self.script));
            sub.fn_depth = self.depth + 1;
            sub.start_function(name);
            let mut text = String::new();
            let mut env = ExecEnv {
                store,
                evaluator: self.evaluator,
            };
            while sub.can_continue() {
                text.push_str(&sub.cont_inner(&mut env, true));
                text.push('\n');
                if !sub.can_continue() || sub.at_knot() {
                    break;
                }
            }
            return Some(Value::Str(text));
        }

        for function in self.local_fns.iter_mut() {
            if function.can_handle(name) {
                return Some(function.call(name, args, store));
            }
        }
        None
    }
}

/// Strip trailing line breaks and translate escape sequences in a
/// finished unit of output text.
fn finish_text(mut out: String) -> String {
    while out.ends_with('\n') {
        out.pop();
    }
    if out.contains('\\') {
        unescape(&out)
    } else {
        out
    }
}

/// Process `\n`, `\t`, and `\\` escapes; unknown sequences are kept as-is.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::{BasicEvaluator, MemoryStore};
    use skein_script::parse;

    /// Test rig bundling a cursor with its store and evaluator.
    struct Runner {
        cursor: Cursor,
        store: MemoryStore,
        evaluator: BasicEvaluator,
    }

    impl Runner {
        fn new(source: &str) -> Self {
            let script = parse("test", source).expect("script should parse");
            Self {
                cursor: Cursor::with_seed(Arc::new(script), 7),
                store: MemoryStore::new(),
                evaluator: BasicEvaluator::new(),
            }
        }

        fn cont(&mut self) -> String {
            let mut env = ExecEnv::new(&mut self.store, &self.evaluator);
            self.cursor.cont(&mut env)
        }

        fn choice_text(&mut self, index: usize) -> String {
            let mut env = ExecEnv::new(&mut self.store, &self.evaluator);
            self.cursor.choice_text(index, &mut env)
        }
    }

    #[test]
    fn text_and_linefeeds() {
        let mut run = Runner::new("Line One\nLine Two\nLine Three");
        assert_eq!(run.cursor.script().num_lines(), 4);
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "Line Two");
        assert_eq!(run.cont(), "Line Three");
        assert!(!run.cursor.can_continue());
    }

    #[test]
    fn knots_and_diverts() {
        let mut run = Runner::new(
            "=== knot_one ===\nLine One B\n-> knot_two\nLine Two B\n=== knot_two ===\nLine Three B",
        );
        assert_eq!(run.cursor.script().num_lines(), 7);
        assert_eq!(run.cont(), "Line One B");
        assert_eq!(run.cont(), "Line Three B");
    }

    #[test]
    fn inline_diverts() {
        let mut run = Runner::new(
            "=== knot_one ===\nLine One B-> knot_two\nLine Two B\n=== knot_two ===\nLine Three B",
        );
        assert_eq!(run.cursor.script().num_lines(), 6);
        assert_eq!(run.cont(), "Line One B");
        assert_eq!(run.cont(), "Line Three B");
    }

    #[test]
    fn knot_visits_are_counted() {
        let mut run = Runner::new("=== intro ===\nHello\n");
        run.cont();
        assert_eq!(run.store.get_int("intro"), 1);
        run.cursor.restart();
        run.cont();
        assert_eq!(run.store.get_int("intro"), 2);
    }

    #[test]
    fn sequence_list() {
        let mut run = Runner::new("Line {One|Two|Three}\n");
        assert_eq!(run.cursor.script().num_lines(), 2);
        for expected in ["Line One", "Line Two", "Line Three", "Line Three"] {
            assert_eq!(run.cont(), expected);
            run.cursor.restart();
        }
    }

    #[test]
    fn cycle_list() {
        let mut run = Runner::new("Line {&One|Two|Three}\n");
        for expected in ["Line One", "Line Two", "Line Three", "Line One", "Line Two"] {
            assert_eq!(run.cont(), expected);
            run.cursor.restart();
        }
    }

    #[test]
    fn once_list() {
        let mut run = Runner::new("Line {!One|Two|Three}\n");
        for expected in ["Line One", "Line Two", "Line Three", "Line ", "Line "] {
            assert_eq!(run.cont(), expected);
            run.cursor.restart();
        }
    }

    #[test]
    fn sequence_list_with_empty_branch() {
        let mut run = Runner::new("Line {One||Three}\n");
        for expected in ["Line One", "Line ", "Line Three"] {
            assert_eq!(run.cont(), expected);
            run.cursor.restart();
        }
    }

    #[test]
    fn shuffle_list_picks_a_branch() {
        let mut run = Runner::new("{~A|B|C}\n");
        let line = run.cont();
        assert!(["A", "B", "C"].contains(&line.as_str()), "{line}");
    }

    #[test]
    fn divert_inside_list_branch() {
        let mut run = Runner::new(
            "=== knot_one ===\nLine {One|Two->knot_two}\nLine Three\n=== knot_two ===\nLine Four",
        );
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "Line Three");
        assert_eq!(run.cont(), "Line Four");
        run.cursor.restart();
        assert_eq!(run.cont(), "Line Two");
        assert_eq!(run.cont(), "Line Four");
    }

    #[test]
    fn nested_lists() {
        let mut run = Runner::new("Line {&{One|1}|{Two|2}|Three}\n");
        for expected in ["Line One", "Line Two", "Line Three", "Line 1", "Line 2"] {
            assert_eq!(run.cont(), expected);
            run.cursor.restart();
        }
    }

    #[test]
    fn expressions_run_between_lines() {
        let mut run = Runner::new("Line One\n~ myVar = 1 + 2\nLine Two\n");
        run.store.set("myVar", Value::Float(1.0));
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "Line Two");
        assert_eq!(run.store.get_float("myVar"), 3.0);
    }

    #[test]
    fn variable_expansion() {
        let mut run = Runner::new("Line {myString}");
        run.store.set("myString", Value::Str("One".into()));
        assert_eq!(run.cont(), "Line One");
    }

    #[test]
    fn block_expressions() {
        let mut run = Runner::new("Line One\n~~~\nmyVar = 1 + 2;\nmyVar += 3;\n~~~\nLine Two\n");
        run.store.set("myVar", Value::Float(1.0));
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "Line Two");
        assert_eq!(run.store.get_float("myVar"), 6.0);
    }

    #[test]
    fn conditional_text() {
        let mut run = Runner::new("Line {yes:One}");
        run.store.set("yes", Value::Int(1));
        assert_eq!(run.cont(), "Line One");

        let mut run = Runner::new("Line {no:One}");
        run.store.set("no", Value::Int(0));
        assert_eq!(run.cont(), "Line ");
    }

    #[test]
    fn conditional_text_with_else() {
        let mut run = Runner::new("Line {yes:One|Two}");
        run.store.set("yes", Value::Int(1));
        assert_eq!(run.cont(), "Line One");

        let mut run = Runner::new("Line {no:One|Two}");
        run.store.set("no", Value::Int(0));
        assert_eq!(run.cont(), "Line Two");
    }

    #[test]
    fn conditional_divert() {
        let mut run = Runner::new(
            "=== knot_one ===\nLine {yes:One->knot_two}\nLine Two\n=== knot_two ===\nLine Three",
        );
        run.store.set("yes", Value::Int(1));
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "Line Three");
    }

    #[test]
    fn conditional_bare_divert() {
        let mut run = Runner::new(
            "=== knot_one ===\nLine {yes:->knot_two}\nLine Two\n=== knot_two ===\nLine Three",
        );
        run.store.set("yes", Value::Int(1));
        assert_eq!(run.cont(), "Line ");
        assert_eq!(run.cont(), "Line Three");
    }

    #[test]
    fn conditional_divert_only_line() {
        let mut run = Runner::new(
            "=== knot_one ===\n{yes:->knot_two}\nLine Two\n=== knot_two ===\nLine Three",
        );
        run.store.set("yes", Value::Int(1));
        assert_eq!(run.cont(), "Line Three");
    }

    #[test]
    fn var_declaration_expands() {
        let mut run = Runner::new("VAR test_var = 1\nLine {test_var}");
        assert_eq!(run.cont(), "Line 1");
    }

    #[test]
    fn var_declaration_does_not_clobber() {
        let mut run = Runner::new("VAR hp = 10\nLine {hp}");
        run.store.set("hp", Value::Int(3));
        assert_eq!(run.cont(), "Line 3");
    }

    #[test]
    fn choices_collect_and_resolve() {
        let source = "=== knot_one ===\nLine One\n* Choice [One]is one.\n* Choice Two[] is chosen.\nLine after Choice Two\n=== knot_two ===\nLine Four";
        let mut run = Runner::new(source);

        assert_eq!(run.cont(), "Line One");
        assert!(run.cursor.num_choices() > 0);
        assert!(!run.cursor.can_continue());

        assert_eq!(run.choice_text(0), "Choice One");
        assert_eq!(run.choice_text(1), "Choice Two");
        assert_eq!(run.choice_text(3), "");
        assert_eq!(run.cursor.num_choices(), 2);

        run.cursor.choose_choice_index(0);
        assert_eq!(run.cont(), "Choice is one.");
        assert_eq!(run.cont(), "Line Four");

        run.cursor.restart();
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "");
        assert_eq!(run.choice_text(1), "Choice Two");
        run.cursor.choose_choice_index(1);
        assert_eq!(run.cont(), "Choice Two is chosen.");
        assert_eq!(run.cont(), "Line after Choice Two");
        assert_eq!(run.cont(), "Line Four");
    }

    #[test]
    fn choose_outside_choice_scope_is_a_noop() {
        let mut run = Runner::new("Line One\nLine Two");
        run.cursor.choose_choice_index(0);
        assert_eq!(run.cont(), "Line One");
    }

    #[test]
    fn out_of_range_choice_is_a_noop() {
        let mut run = Runner::new("Ask\n* [A]\n* [B]\n- done");
        run.cont();
        run.cursor.choose_choice_index(9);
        assert!(!run.cursor.can_continue());
        run.cursor.choose_choice_index(0);
        assert!(run.cursor.can_continue());
    }

    #[test]
    fn choice_rejoins_at_gather() {
        let source = "Ask\n* North[]You go north.\n* South[]You go south.\n- The road continues.";
        let mut run = Runner::new(source);
        assert_eq!(run.cont(), "Ask");
        assert_eq!(run.choice_text(0), "North");
        run.cursor.choose_choice_index(0);
        assert_eq!(run.cont(), "NorthYou go north.");
        assert_eq!(run.cont(), "The road continues.");
    }

    #[test]
    fn conditional_choice_is_hidden() {
        let source = "Ask\n* {seen > 0} Remember[]...\n* Leave[]Bye.\n- done";
        let mut run = Runner::new(source);
        run.store.set("seen", Value::Int(0));
        assert_eq!(run.cont(), "Ask");
        assert_eq!(run.cursor.num_choices(), 1);
        assert_eq!(run.choice_text(0), "Leave");
    }

    #[test]
    fn conditional_choice_is_shown_when_true() {
        let source = "Ask\n* {seen > 0} Remember[]...\n* Leave[]Bye.\n- done";
        let mut run = Runner::new(source);
        run.store.set("seen", Value::Int(2));
        assert_eq!(run.cont(), "Ask");
        assert_eq!(run.cursor.num_choices(), 2);
        assert_eq!(run.choice_text(0), "Remember");
    }

    #[test]
    fn functions_expand_inline() {
        let source = "-> knot_after\n=== function myFn ===\nFunction\n=== knot_after ===\nKnot After A\n~ myFn()\nKnot After B\n";
        let mut run = Runner::new(source);
        assert_eq!(run.cont(), "Knot After A");
        assert_eq!(run.cont(), "Function");
        assert_eq!(run.cont(), "Knot After B");
    }

    #[test]
    fn function_run_does_not_disturb_cursor() {
        let source = "=== function helper ===\nHelp text\n~ return\n=== main_knot ===\nOne\nTwo\n";
        let script = Arc::new(parse("t", source).unwrap());
        let mut store = MemoryStore::new();
        let evaluator = BasicEvaluator::new();

        let mut cursor = Cursor::with_seed(Arc::clone(&script), 1);
        cursor.start_label("main_knot");
        let mut env = ExecEnv::new(&mut store, &evaluator);
        assert_eq!(cursor.cont(&mut env), "One");

        let mut side = Cursor::with_seed(Arc::clone(&script), 2);
        side.start_function("helper");
        let mut env = ExecEnv::new(&mut store, &evaluator);
        while side.can_continue() {
            side.cont(&mut env);
        }

        let mut env = ExecEnv::new(&mut store, &evaluator);
        assert_eq!(cursor.cont(&mut env), "Two");
    }

    #[test]
    fn recursive_function_calls_bottom_out() {
        let source = "=== function loop_fn ===\n~ loop_fn()\n=== after ===\nDone";
        let mut run = Runner::new(source);
        run.cursor.start_function("loop_fn");
        // must come back rather than overflow the stack
        let _ = run.cont();
        assert!(!run.cursor.can_continue() || run.cursor.has_content());
    }

    #[test]
    fn glue_joins_lines() {
        let mut run = Runner::new("Line One<>\nLine Two\nLine Three");
        assert_eq!(run.cont(), "Line OneLine Two");
        assert_eq!(run.cont(), "Line Three");
    }

    #[test]
    fn divert_to_end_terminates() {
        let mut run = Runner::new("Line One\n->END\nLine Two\nLine Three");
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "");
        assert!(!run.cursor.can_continue());
        assert!(!run.cursor.has_content());
    }

    #[test]
    fn tail_divert_to_end_terminates() {
        let mut run = Runner::new("Line One->END\nLine Two\nLine Three");
        assert_eq!(run.cont(), "Line One");
        assert!(!run.cursor.can_continue());
    }

    #[test]
    fn tag_syntax_passes_through() {
        let mut run = Runner::new(
            "Line : One\nLine ((Two))\nLine : Three ((Tags Live Here)) End\nLine # Four this is my tag",
        );
        assert_eq!(run.cont(), "Line : One");
        assert_eq!(run.cont(), "Line ((Two))");
        assert_eq!(run.cont(), "Line : Three ((Tags Live Here)) End");
        assert_eq!(run.cont(), "Line # Four this is my tag");
    }

    #[test]
    fn block_comments() {
        let mut run = Runner::new("Line One\nLine /*Two\nLine Three\nLine*/ Four");
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "Line ");
        assert_eq!(run.cont(), "Four");
    }

    #[test]
    fn line_comments() {
        let mut run = Runner::new("Line One\nLine //Two\nLine Three\nLine// Four");
        assert_eq!(run.cont(), "Line One");
        assert_eq!(run.cont(), "Line ");
        assert_eq!(run.cont(), "Line Three");
        assert_eq!(run.cont(), "Line");
    }

    #[test]
    fn stitches_are_divert_targets() {
        let source = "=== knot_one ===\n-> middle\nSkipped\n= middle\nFound it\n";
        let mut run = Runner::new(source);
        assert_eq!(run.cont(), "Found it");
        assert_eq!(run.store.get_int("knot_one.middle"), 1);
    }

    #[test]
    fn start_label_repositions() {
        let mut run = Runner::new("=== a ===\nA text\n=== b ===\nB text\n");
        assert!(run.cursor.start_label("b"));
        assert_eq!(run.cont(), "B text");
    }

    #[test]
    fn start_unknown_label_is_inert() {
        let mut run = Runner::new("Line One");
        assert!(!run.cursor.start_label("nope"));
        assert!(!run.cursor.can_continue());
        assert!(!run.cursor.has_content());
        assert_eq!(run.cont(), "");
    }

    #[test]
    fn restart_keeps_list_progress() {
        let mut run = Runner::new("{One|Two|Three}");
        assert_eq!(run.cont(), "One");
        run.cursor.restart();
        assert_eq!(run.cont(), "Two");
    }

    #[test]
    fn cont_without_content_returns_empty() {
        let mut run = Runner::new("Only line");
        assert_eq!(run.cont(), "Only line");
        assert_eq!(run.cont(), "");
        assert_eq!(run.cont(), "");
    }

    #[test]
    fn divert_cycle_bails_out() {
        let mut run = Runner::new("=== spin ===\n-> spin");
        assert_eq!(run.cont(), "");
        assert!(!run.cursor.can_continue());
    }

    #[test]
    fn state_machine_transitions() {
        let mut run = Runner::new("Ask\n* [A]x\n* [B]y\n- done");
        assert_eq!(run.cursor.state(), RunState::Idle);
        run.cont();
        assert_eq!(run.cursor.state(), RunState::AwaitingChoice);
        run.cursor.choose_choice_index(0);
        assert_eq!(run.cursor.state(), RunState::Advancing);
        run.cont();
        run.cont();
        let _ = run.cont();
        assert_eq!(run.cursor.state(), RunState::Terminated);
    }
}

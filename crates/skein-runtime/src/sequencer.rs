//! The command pump.
//!
//! The sequencer drives a roster of execution cursors and turns each
//! emitted line into a [`Command`]: an optional speaker, the display text,
//! any pending choice texts, and any tags extracted from `((...))` spans
//! or trailing `#` markers. Commands gate on caller-supplied signals —
//! plain text waits for [`Sequencer::trigger_continue`], choice commands
//! for [`Sequencer::make_choice`] — so pacing stays entirely in the
//! host's hands.

use crate::cursor::ExecEnv;
use crate::manager::{CursorId, ScriptManager};
use std::collections::VecDeque;

/// One externally-visible narration command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    /// Speaker name parsed from a leading `Name:` prefix; empty if none.
    pub speaker: String,
    /// The display text.
    pub text: String,
    /// Choice texts, in selection-index order.
    pub choices: Vec<String>,
    /// Tags extracted from the line and its choices.
    pub tags: Vec<String>,
}

/// Paces execution cursors against external continue/choice signals.
#[derive(Default)]
pub struct Sequencer {
    executions: VecDeque<CursorId>,
    queue: VecDeque<Command>,
    needs_continue: bool,
    needs_choice: bool,
    continued: bool,
    chosen: Option<usize>,
}

impl Sequencer {
    /// Create an idle sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin running a loaded script, optionally from a label. Returns
    /// false when the script is not loaded.
    pub fn run(&mut self, manager: &mut ScriptManager, script: &str, label: Option<&str>) -> bool {
        match manager.request_execution(script, label) {
            Some(id) => {
                self.executions.push_back(id);
                true
            }
            None => false,
        }
    }

    /// Number of cursors still on the roster.
    pub fn num_executions(&self) -> usize {
        self.executions.len()
    }

    /// Number of queued commands.
    pub fn num_commands(&self) -> usize {
        self.queue.len()
    }

    /// The command currently being presented, if any.
    pub fn current(&self) -> Option<&Command> {
        self.queue.front()
    }

    /// Whether the current command waits for a continue signal.
    pub fn needs_continue(&self) -> bool {
        self.needs_continue
    }

    /// Whether the current command waits for a choice selection.
    pub fn needs_choice(&self) -> bool {
        self.needs_choice
    }

    /// Signal that the current say command has been acknowledged.
    pub fn trigger_continue(&mut self) {
        self.continued = true;
    }

    /// Select a choice on the current choice command.
    pub fn make_choice(&mut self, index: usize) {
        self.chosen = Some(index);
    }

    /// Advance: resolve gates on the presented command, pull the next
    /// line from the front cursor, and release terminated cursors.
    /// Returns when a command is gated or everything has drained.
    pub fn update(&mut self, manager: &mut ScriptManager, env: &mut ExecEnv<'_>) {
        loop {
            if self.queue.front().is_some() {
                if self.needs_choice {
                    let Some(choice) = self.chosen.take() else {
                        return;
                    };
                    if let Some(&id) = self.executions.front() {
                        if let Some(cursor) = manager.cursor_mut(id) {
                            cursor.choose_choice_index(choice);
                            // the echo of the selected text is discarded;
                            // hosts present choices as buttons
                            let _ = cursor.cont(env);
                        }
                    }
                    self.needs_choice = false;
                    self.queue.pop_front();
                    continue;
                }
                if self.needs_continue {
                    if !self.continued {
                        return;
                    }
                    self.continued = false;
                    self.needs_continue = false;
                    self.queue.pop_front();
                    continue;
                }
                // a freshly queued command: gate it on the right signal
                let has_choices = self
                    .queue
                    .front()
                    .is_some_and(|command| !command.choices.is_empty());
                if has_choices {
                    self.needs_choice = true;
                } else {
                    self.needs_continue = true;
                }
                return;
            }

            let Some(&id) = self.executions.front() else {
                return;
            };
            let Some(cursor) = manager.cursor_mut(id) else {
                self.executions.pop_front();
                continue;
            };

            let mut command = None;
            if cursor.can_continue() {
                let line = cursor.cont(env);
                let mut parsed = decompose_line(&line);
                for index in 0..cursor.num_choices() {
                    let raw = cursor.choice_text(index, env);
                    let (text, mut tags) = split_hash_tags(&raw);
                    parsed.choices.push(text);
                    parsed.tags.append(&mut tags);
                }
                if !parsed.text.is_empty() || !parsed.choices.is_empty() || !parsed.tags.is_empty()
                {
                    command = Some(parsed);
                }
            } else if cursor.has_content() {
                // parked on a choice scope with nothing new to present
                return;
            }

            let finished = !cursor.has_content();
            if let Some(cmd) = command {
                self.queue.push_back(cmd);
            }
            if finished {
                manager.release_execution(id);
                self.executions.pop_front();
            }
        }
    }
}

/// Break a raw line into a command: `((...))` tag spans are extracted
/// (split on `;`), trailing `#` tags collected, and a leading `Name:`
/// prefix becomes the speaker.
fn decompose_line(line: &str) -> Command {
    let (remainder, mut tags) = extract_tag_spans(line);
    let (text, mut hash_tags) = split_hash_tags(&remainder);
    tags.append(&mut hash_tags);

    let (speaker, text) = match text.split_once(':') {
        Some((name, rest)) => (name.trim().to_string(), rest.trim().to_string()),
        None => (String::new(), text.trim().to_string()),
    };

    Command {
        speaker,
        text,
        choices: Vec::new(),
        tags,
    }
}

/// Remove `((...))` spans from the line, returning the remaining text and
/// the span contents split on `;`. When a span is flanked by spaces on
/// both sides one of them goes with it, keeping word spacing intact.
fn extract_tag_spans(line: &str) -> (String, Vec<String>) {
    let mut text = line.to_string();
    let mut tags = Vec::new();

    while let Some(open) = text.find("((") {
        let Some(close_rel) = text[open + 2..].find("))") else {
            break;
        };
        let close = open + 2 + close_rel;
        let inner = text[open + 2..close].to_string();

        let mut remove_end = close + 2;
        if open > 0
            && text[..open].ends_with(' ')
            && text[remove_end..].starts_with(' ')
        {
            remove_end += 1;
        }
        text.replace_range(open..remove_end, "");

        for part in inner.split(';') {
            let part = part.trim();
            if !part.is_empty() {
                tags.push(part.to_string());
            }
        }
    }

    (text, tags)
}

/// Split trailing `#` tags off a piece of text.
fn split_hash_tags(text: &str) -> (String, Vec<String>) {
    match text.split_once('#') {
        Some((head, rest)) => {
            let tags = rest
                .split('#')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            (head.trim_end().to_string(), tags)
        }
        None => (text.to_string(), Vec::new()),
    }
}

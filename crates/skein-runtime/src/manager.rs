//! Script lifecycle management.
//!
//! The manager owns compiled scripts keyed by name and the live cursors
//! running against them. Script text arrives through a [`ContentSource`];
//! sources that load asynchronously deliver the text later through
//! [`ScriptManager::deliver`]. Loading runs a script's `Activate` function
//! to completion if it defines one, and unloading runs `Deactivate`; a
//! script stays loaded while any cursor is bound to it.

use crate::cursor::{Cursor, ExecEnv};
use skein_core::ContentSource;
use skein_script::{Script, ScriptError, parse};
use std::sync::Arc;

/// Function run to completion when a script finishes loading.
const ACTIVATE_FN: &str = "Activate";

/// Function run to completion before a script unloads.
const DEACTIVATE_FN: &str = "Deactivate";

/// Handle to a live execution cursor owned by a [`ScriptManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(usize);

/// Owns compiled scripts and live execution cursors.
pub struct ScriptManager {
    scripts: Vec<Arc<Script>>,
    cursors: Vec<Option<Cursor>>,
    source: Box<dyn ContentSource>,
    pending: Vec<String>,
}

impl ScriptManager {
    /// Create a manager fetching script text from the given source.
    pub fn new(source: Box<dyn ContentSource>) -> Self {
        Self {
            scripts: Vec::new(),
            cursors: Vec::new(),
            source,
            pending: Vec::new(),
        }
    }

    /// Names of all loaded scripts, in load order.
    pub fn script_names(&self) -> Vec<String> {
        self.scripts.iter().map(|s| s.name().to_string()).collect()
    }

    /// Borrow a loaded script by name.
    pub fn script(&self, name: &str) -> Option<&Arc<Script>> {
        self.scripts.iter().find(|s| s.name() == name)
    }

    /// Names requested from the content source but not yet delivered.
    pub fn pending_loads(&self) -> &[String] {
        &self.pending
    }

    /// Begin loading a script by name. Already-loaded names are no-ops.
    /// When the source has the text on hand the script is compiled and
    /// activated before this returns; otherwise the host later calls
    /// [`ScriptManager::deliver`].
    pub fn load_script(&mut self, name: &str, env: &mut ExecEnv<'_>) -> Result<(), ScriptError> {
        if self.script(name).is_some() {
            return Ok(());
        }
        match self.source.request(name) {
            Some(text) => self.deliver(name, &text, env),
            None => {
                if !self.pending.iter().any(|p| p == name) {
                    self.pending.push(name.to_string());
                }
                Ok(())
            }
        }
    }

    /// Accept loaded script text: compile, store, and run `Activate`.
    /// A parse failure commits nothing.
    pub fn deliver(
        &mut self,
        name: &str,
        text: &str,
        env: &mut ExecEnv<'_>,
    ) -> Result<(), ScriptError> {
        let script = Arc::new(parse(name, text)?);
        self.pending.retain(|p| p != name);
        self.scripts.retain(|s| s.name() != name);
        self.scripts.push(Arc::clone(&script));
        run_function(&script, ACTIVATE_FN, env);
        Ok(())
    }

    /// Unload a script by name. Refused silently while any cursor is
    /// bound to it; otherwise runs `Deactivate` and drops the script.
    pub fn unload_script(&mut self, name: &str, env: &mut ExecEnv<'_>) {
        if self.is_executing(name) {
            return;
        }
        if let Some(index) = self.scripts.iter().position(|s| s.name() == name) {
            let script = self.scripts.remove(index);
            run_function(&script, DEACTIVATE_FN, env);
        }
        self.pending.retain(|p| p != name);
    }

    /// Diff the loaded set against `desired`: load missing names and
    /// unload the rest.
    pub fn update_script_list(
        &mut self,
        desired: &[&str],
        env: &mut ExecEnv<'_>,
    ) -> Result<(), ScriptError> {
        for name in desired {
            self.load_script(name, env)?;
        }
        let loaded = self.script_names();
        for name in loaded {
            if !desired.contains(&name.as_str()) {
                self.unload_script(&name, env);
            }
        }
        Ok(())
    }

    /// Whether any live cursor is bound to the named script.
    pub fn is_executing(&self, name: &str) -> bool {
        self.cursors
            .iter()
            .flatten()
            .any(|c| c.script().name() == name)
    }

    /// Create a cursor over a loaded script, optionally positioned at a
    /// label. Returns `None` for unknown script names.
    pub fn request_execution(&mut self, name: &str, start_label: Option<&str>) -> Option<CursorId> {
        let script = self.script(name)?;
        let mut cursor = Cursor::new(Arc::clone(script));
        if let Some(label) = start_label {
            cursor.start_label(label);
        }
        Some(self.insert_cursor(cursor))
    }

    /// Number of live cursors.
    pub fn num_executions(&self) -> usize {
        self.cursors.iter().flatten().count()
    }

    /// Borrow a cursor by handle.
    pub fn cursor(&self, id: CursorId) -> Option<&Cursor> {
        self.cursors.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Borrow a cursor mutably by handle.
    pub fn cursor_mut(&mut self, id: CursorId) -> Option<&mut Cursor> {
        self.cursors.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Release a cursor, freeing its script for unloading.
    pub fn release_execution(&mut self, id: CursorId) {
        if let Some(slot) = self.cursors.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Run a named function of a loaded script to completion on a
    /// throwaway cursor, discarding output. Unknown script or function
    /// names are no-ops.
    pub fn run_function_to_end(&mut self, script_name: &str, function: &str, env: &mut ExecEnv<'_>) {
        if let Some(script) = self.script(script_name) {
            run_function(script, function, env);
        }
    }

    /// Run a named function on every loaded script that defines it.
    pub fn run_function_on_all(&mut self, function: &str, env: &mut ExecEnv<'_>) {
        for script in &self.scripts {
            if script.has_function(function) {
                run_function(script, function, env);
            }
        }
    }

    fn insert_cursor(&mut self, cursor: Cursor) -> CursorId {
        match self.cursors.iter_mut().position(|slot| slot.is_none()) {
            Some(index) => {
                self.cursors[index] = Some(cursor);
                CursorId(index)
            }
            None => {
                self.cursors.push(Some(cursor));
                CursorId(self.cursors.len() - 1)
            }
        }
    }
}

/// Drain a function entry point on a throwaway cursor, discarding its
/// output. A no-op when the script does not define the function.
pub fn run_function(script: &Arc<Script>, function: &str, env: &mut ExecEnv<'_>) {
    if !script.has_function(function) {
        return;
    }
    let mut cursor = Cursor::new(Arc::clone(script));
    cursor.start_function(function);
    while cursor.can_continue() {
        let _ = cursor.cont(env);
    }
}

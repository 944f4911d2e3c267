//! Execution engine, script manager, and command pump for skein.
//!
//! A [`Cursor`] walks a compiled [`skein_script::Script`] one unit of
//! output text at a time, pausing at choice points, under the cooperative
//! `cont`/`choose_choice_index` protocol. The [`ScriptManager`] owns
//! compiled scripts and live cursors; the [`Sequencer`] decomposes emitted
//! lines into say/choice commands gated on caller-supplied continue and
//! choice signals.

/// The execution cursor.
pub mod cursor;
/// Script lifecycle management.
pub mod manager;
/// The command pump.
pub mod sequencer;

pub use cursor::{Cursor, ExecEnv, RunState};
pub use manager::{CursorId, ScriptManager};
pub use sequencer::{Command, Sequencer};

//! Error types for script compilation.

use crate::diagnostics::Diagnostic;
use thiserror::Error;

/// Errors produced while compiling a script.
///
/// The parser commits nothing on failure: a single bad line rejects the
/// whole script.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// A line failed to parse or a divert target never resolved.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based source line number of the offending line.
        line: usize,
        /// What went wrong, with any "did you mean" suggestion appended.
        message: String,
        /// Byte range of the offending line in the root source text.
        /// Empty for lines spliced in from an `INCLUDE` sub-document.
        span: std::ops::Range<usize>,
    },

    /// An `INCLUDE` line named a sub-document nobody could supply.
    #[error("line {line}: cannot include \"{name}\"")]
    Include {
        /// 1-based source line number of the `INCLUDE` line.
        line: usize,
        /// The requested sub-document name.
        name: String,
        /// Byte range of the offending line in the root source text.
        span: std::ops::Range<usize>,
    },
}

impl ScriptError {
    /// The source line number the error points at.
    pub fn line(&self) -> usize {
        match self {
            ScriptError::Parse { line, .. } | ScriptError::Include { line, .. } => *line,
        }
    }

    /// Convert to a renderable diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ScriptError::Parse { message, span, .. } => {
                Diagnostic::error(span.clone(), message.clone())
            }
            ScriptError::Include { name, span, .. } => {
                Diagnostic::error(span.clone(), format!("cannot include \"{name}\""))
                    .with_label("no include resolver supplied this document")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_line_number() {
        let err = ScriptError::Parse {
            line: 12,
            message: "unknown divert target \"endd\"".into(),
            span: 0..0,
        };
        assert_eq!(err.to_string(), "line 12: unknown divert target \"endd\"");
        assert_eq!(err.line(), 12);
    }
}

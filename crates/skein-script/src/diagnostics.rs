//! Diagnostics with source spans and pretty terminal rendering.

use ariadne::{Color, Label, Report, ReportKind, Source};
use std::fmt;

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The script cannot be used.
    Error,
    /// Suspicious but not fatal.
    Warning,
}

/// A diagnostic message with source location.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// How serious this is.
    pub severity: Severity,
    /// Byte range of the offending source.
    pub span: std::ops::Range<usize>,
    /// Human-readable description.
    pub message: String,
    /// Optional label attached to the span.
    pub label: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(span: std::ops::Range<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            span,
            message: message.into(),
            label: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(span: std::ops::Range<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            span,
            message: message.into(),
            label: None,
        }
    }

    /// Attach a label shown at the span.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Render this diagnostic against the script source it points into.
    pub fn render(&self, source: &str, filename: &str) -> String {
        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };
        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let label_text = self.label.as_deref().unwrap_or(&self.message);
        let mut output = Vec::new();
        Report::build(kind, (filename, self.span.clone()))
            .with_message(&self.message)
            .with_label(
                Label::new((filename, self.span.clone()))
                    .with_message(label_text)
                    .with_color(color),
            )
            .finish()
            .write((filename, Source::from(source)), &mut output)
            .ok();

        String::from_utf8(output).unwrap_or_default()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{prefix}: {}", self.message)
    }
}

/// Render a batch of diagnostics with ariadne for terminal output.
pub fn render_diagnostics(source: &str, filename: &str, diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|diag| diag.render(source, filename))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::error(0..5, "unknown divert target \"endd\"");
        assert_eq!(d.to_string(), "error: unknown divert target \"endd\"");
    }

    #[test]
    fn render_produces_output() {
        let source = "=== intro ===\n-> nowhere\n";
        let diags =
            vec![Diagnostic::error(14..24, "unknown divert target").with_label("no such label")];
        let output = render_diagnostics(source, "story.skein", &diags);
        assert!(!output.is_empty());
        assert!(output.contains("unknown divert target"));
    }
}

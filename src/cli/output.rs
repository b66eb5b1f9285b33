use crate::cli::args::OutputFormat;
use crate::lsp::protocol::{Diagnostic, DiagnosticCode, DiagnosticSeverity};
use std::fmt::Write;
use std::path::{Path, PathBuf};

pub struct OutputFormatter {
    format: OutputFormat,
    cwd: PathBuf,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")) }
    }

    pub fn format_diagnostics(&self, file: &Path, diagnostics: &[Diagnostic]) -> String {
        match self.format {
            OutputFormat::Human => self.format_human(file, diagnostics),
            OutputFormat::Json => Self::format_json(diagnostics),
        }
    }

    fn format_human(&self, file: &Path, diagnostics: &[Diagnostic]) -> String {
        if diagnostics.is_empty() {
            return format!("No diagnostics for {}", self.relative(file));
        }

        let mut output =
            format!("{} diagnostic(s) for {}\n\n", diagnostics.len(), self.relative(file));

        for diagnostic in diagnostics {
            let line = diagnostic.range.start.line + 1;
            let column = diagnostic.range.start.character + 1;
            let severity = severity_label(diagnostic.severity);

            let _ = write!(output, "{}:{line}:{column} {severity}", self.relative(file));
            if let Some(code) = &diagnostic.code {
                let _ = write!(output, " [{}]", code_label(code));
            }
            let _ = writeln!(output, " {}", diagnostic.message);
        }

        output
    }

    fn format_json(diagnostics: &[Diagnostic]) -> String {
        serde_json::to_string_pretty(diagnostics).unwrap_or_else(|_| "[]".to_string())
    }

    fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.cwd) {
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }
}

fn severity_label(severity: Option<DiagnosticSeverity>) -> &'static str {
    match severity {
        Some(DiagnosticSeverity::Error) | None => "error",
        Some(DiagnosticSeverity::Warning) => "warning",
        Some(DiagnosticSeverity::Information) => "info",
        Some(DiagnosticSeverity::Hint) => "hint",
    }
}

fn code_label(code: &DiagnosticCode) -> String {
    match code {
        DiagnosticCode::Number(n) => n.to_string(),
        DiagnosticCode::String(s) => s.clone(),
    }
}

/// Exit code for `check`: diagnostics at error severity fail the command
/// so hook scripts can branch on the result.
pub fn exit_code_for(diagnostics: &[Diagnostic]) -> i32 {
    let has_errors = diagnostics
        .iter()
        .any(|d| matches!(d.severity, Some(DiagnosticSeverity::Error) | None));
    i32::from(has_errors)
}

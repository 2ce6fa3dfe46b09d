//! Diagnostics reported during a compile.

use smol_str::SmolStr;
use thiserror::Error;

/// How bad a diagnostic is.
///
/// Everything up to `Error` is recovered from locally: the compiler keeps
/// walking so further problems can be reported. `Fatal` aborts the compile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

/// The position the active statement came from, as reported by the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: SmolStr,
    pub line: u32,
    pub column: u32,
}

/// The kinds of problems a feature file can have.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("old syntax: {0}")]
    SyntaxIncompatibility(String),
    #[error("glyph '{0}' is not in the font")]
    UnknownGlyph(SmolStr),
    #[error("'{0}' is already defined")]
    DuplicateDefinition(SmolStr),
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),
    #[error("target and replacement are incompatible: {0}")]
    PatternShapeMismatch(String),
    #[error("rule not valid here: {0}")]
    ContextViolation(String),
    #[error("mark class '{0}' cannot change after use in a position rule")]
    MarkClassSealed(SmolStr),
    #[error("feature parameters not allowed: {0}")]
    FeatureParamMisuse(String),
    #[error("name id {0} has no Windows default entry")]
    NameTableMissingDefault(u16),
    #[error("subtable exceeds the 16-bit offset limit")]
    OffsetOverflow,
    #[error("lookup '{0}' referenced but never defined")]
    UnresolvedLookupRef(SmolStr),
    #[error("glyph range '{start}-{end}' is malformed: {reason}")]
    InvalidGlyphRange {
        start: SmolStr,
        end: SmolStr,
        reason: String,
    },
    #[error("too many lookups")]
    LabelRangeExhausted,
}

/// A diagnostic with its severity and source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: CompileError,
    pub position: SourcePosition,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        write!(
            f,
            "{}:{}:{}: {severity}: {}",
            self.position.file, self.position.line, self.position.column, self.error
        )
    }
}

/// Collects diagnostics as the compile proceeds.
///
/// Everything up to an error is recovered from locally; the first fatal
/// latches and the driver turns further work into no-ops.
#[derive(Debug, Default)]
pub struct DiagSink {
    pub diagnostics: Vec<Diagnostic>,
    pub position: SourcePosition,
    had_error: bool,
    fatal: bool,
}

impl DiagSink {
    pub fn report(&mut self, severity: Severity, error: CompileError) {
        if severity >= Severity::Error {
            self.had_error = true;
        }
        if severity == Severity::Fatal {
            self.fatal = true;
        }
        self.diagnostics.push(Diagnostic {
            severity,
            error,
            position: self.position.clone(),
        });
    }

    pub fn note(&mut self, error: CompileError) {
        self.report(Severity::Note, error);
    }

    pub fn warning(&mut self, error: CompileError) {
        self.report(Severity::Warning, error);
    }

    pub fn error(&mut self, error: CompileError) {
        self.report(Severity::Error, error);
    }

    pub fn fatal(&mut self, error: CompileError) {
        self.report(Severity::Fatal, error);
    }

    /// `true` once any error-or-worse diagnostic has been reported.
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Note < Severity::Warning);
        assert!(Severity::Error < Severity::Fatal);
        let diag = Diagnostic {
            severity: Severity::Error,
            error: CompileError::UnknownGlyph("zz".into()),
            position: SourcePosition::default(),
        };
        assert!(diag.is_error());
        assert!(!diag.is_fatal());
    }
}

//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Template(#[from] TemplateError),

    #[error("template '{template}' produced invalid YAML: {source}")]
    InvalidOutput {
        template: String,
        source: serde_yaml::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

/// Template error with the offending source attached
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{template}: {message}")]
#[diagnostic(code(rigger::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Template name, prefixed with the chart name
    pub template: String,

    pub line: Option<usize>,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,
}

impl TemplateError {
    pub fn from_minijinja(err: &minijinja::Error, template: &str, source: &str) -> Self {
        let kind = match err.kind() {
            minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
            minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
            minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
            minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
            minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
                TemplateErrorKind::TypeError
            }
            _ => TemplateErrorKind::Other,
        };

        let message = err
            .detail()
            .map(str::to_string)
            .unwrap_or_else(|| err.kind().to_string())
            .replace("undefined value", "undefined variable");

        let line = err.line();
        let span = line.and_then(|line| calculate_span(source, line));

        Self {
            message,
            kind,
            template: template.to_string(),
            line,
            src: NamedSource::new(template, source.to_string()),
            span,
        }
    }
}

fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_span() {
        let src = "a: 1\nbb: 2\nccc: 3";
        let span = calculate_span(src, 2).unwrap();
        assert_eq!(span.offset(), 5);
        assert_eq!(span.len(), 5);
        assert!(calculate_span(src, 9).is_none());
    }
}

use chumsky::span::SimpleSpan;
use std::fmt;

/// Byte range into the source of a single snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<SimpleSpan> for Span {
    fn from(span: SimpleSpan) -> Self {
        Span::new(span.start, span.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diag {
    pub kind: DiagKind,
    /// Stable machine-readable code such as `compiler.err.cant.resolve`.
    pub code: &'static str,
    pub message: String,
    pub span: Span,
}

impl Diag {
    pub fn error(span: Span, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: DiagKind::Error,
            code,
            message: message.into(),
            span,
        }
    }

    pub fn warning(span: Span, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: DiagKind::Warning,
            code,
            message: message.into(),
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == DiagKind::Error
    }

    pub fn start_position(&self) -> usize {
        self.span.start
    }

    pub fn end_position(&self) -> usize {
        self.span.end
    }
}

impl fmt::Display for Diag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Maps byte offsets of a snippet source to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineMap {
    starts: Vec<usize>,
}

impl LineMap {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (idx, ch) in source.char_indices() {
            if ch == '\n' {
                starts.push(idx + 1);
            }
        }
        Self { starts }
    }

    pub fn line_of(&self, offset: usize) -> u32 {
        match self.starts.binary_search(&offset) {
            Ok(idx) => idx as u32 + 1,
            Err(idx) => idx as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LineMap, Span};

    #[test]
    fn line_map_counts_from_one() {
        let map = LineMap::new("int f() {\n  return 1;\n}");
        assert_eq!(map.line_of(0), 1);
        assert_eq!(map.line_of(9), 1);
        assert_eq!(map.line_of(10), 2);
        assert_eq!(map.line_of(23), 3);
    }

    #[test]
    fn span_join_covers_both() {
        let joined = Span::new(4, 6).to(Span::new(1, 3));
        assert_eq!(joined, Span::new(1, 6));
    }
}

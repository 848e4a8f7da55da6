use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte range into a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    start: usize,
    end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Span> for std::ops::Range<usize> {
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

/// Maps `proc_macro2` line/column positions back to byte offsets.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, byte)| *byte == b'\n')
                .map(|(idx, _)| idx + 1),
        );
        Self { line_starts }
    }

    /// Byte offset of a 1-based `line` and 0-based character `column`.
    pub fn offset(&self, source: &str, line: usize, column: usize) -> usize {
        let Some(start) = line
            .checked_sub(1)
            .and_then(|idx| self.line_starts.get(idx))
            .copied()
        else {
            return source.len();
        };

        let rest = &source[start..];
        rest.char_indices()
            .nth(column)
            .map_or(source.len(), |(idx, _)| start + idx)
    }
}

/// Where a declaration or call site lives, as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Path relative to the project directory, `/`-separated.
    pub file: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based character column.
    pub column: usize,
    pub span: Span,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize, span: Span) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            span,
        }
    }

    pub fn from_span(
        file: &str,
        source: &str,
        index: &LineIndex,
        start: proc_macro2::Span,
        end: proc_macro2::Span,
    ) -> Self {
        let begin = start.start();
        let finish = end.end();
        let span = Span::new(
            index.offset(source, begin.line, begin.column),
            index.offset(source, finish.line, finish.column),
        );
        Self::new(file, begin.line, begin.column + 1, span)
    }

    /// Opaque interceptable-location token identifying this call site.
    pub fn token(&self) -> String {
        format!("{}@{}:{}", self.file, self.line, self.column)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_count_characters_not_bytes() {
        let source = "let a = 1;\nlet é = Table::build(2);\n";
        let index = LineIndex::new(source);
        let offset = index.offset(source, 2, 8);
        assert_eq!(&source[offset..offset + 5], "Table");
    }

    #[test]
    fn offsets_past_the_end_clamp_to_length() {
        let source = "fn main() {}";
        let index = LineIndex::new(source);
        assert_eq!(index.offset(source, 4, 0), source.len());
        assert_eq!(index.offset(source, 1, 99), source.len());
    }
}

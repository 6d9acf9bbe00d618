use serde::{Deserialize, Serialize};

/// Half-open byte range into a document's text.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub(crate) struct TextSpan {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

impl TextSpan {
    pub(crate) fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub(crate) fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// Line start offsets for a document, used to map byte offsets to lines.
#[derive(Clone, Debug)]
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
    text_len: usize,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        Self {
            line_starts,
            text_len: text.len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Zero-based line containing `offset`, or `None` past the end of the text.
    pub(crate) fn line_of(&self, offset: usize) -> Option<usize> {
        if offset > self.text_len {
            return None;
        }
        match self.line_starts.binary_search(&offset) {
            Ok(line) => Some(line),
            Err(next) => Some(next - 1),
        }
    }

    pub(crate) fn line_start(&self, line: usize) -> Option<usize> {
        self.line_starts.get(line).copied()
    }

    /// Byte range of a line including its terminator.
    pub(crate) fn line_range(&self, line: usize) -> Option<TextSpan> {
        let start = self.line_start(line)?;
        let end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(self.text_len);
        Some(TextSpan::new(start, end))
    }

    /// Text of a line without its `\n` or `\r\n` terminator.
    pub(crate) fn line_text<'a>(&self, text: &'a str, line: usize) -> Option<&'a str> {
        let range = self.line_range(line)?;
        let raw = text.get(range.start..range.end)?;
        let raw = raw.strip_suffix('\n').unwrap_or(raw);
        Some(raw.strip_suffix('\r').unwrap_or(raw))
    }

    /// Terminator of a line, `None` for an unterminated last line.
    pub(crate) fn line_terminator<'a>(&self, text: &'a str, line: usize) -> Option<&'a str> {
        let range = self.line_range(line)?;
        let raw = text.get(range.start..range.end)?;
        if raw.ends_with("\r\n") {
            Some("\r\n")
        } else if raw.ends_with('\n') {
            Some("\n")
        } else {
            None
        }
    }

    /// 1-based line and column (in characters) for a byte offset.
    pub(crate) fn line_col(&self, text: &str, offset: usize) -> Option<(usize, usize)> {
        let line = self.line_of(offset)?;
        let start = self.line_start(line)?;
        let prefix = text.get(start..offset)?;
        Some((line + 1, prefix.chars().count() + 1))
    }
}

/// Number of characters before byte `offset`, `None` off a char boundary.
pub(crate) fn char_offset(text: &str, offset: usize) -> Option<usize> {
    text.get(..offset).map(|prefix| prefix.chars().count())
}

// src/shell/log.rs

//! Append-only, line-addressable log of everything a session has received.

/// Every line a session has ever seen, addressable by index.
///
/// Complete lines keep their trailing `\n`. Text after the last newline is
/// held as a partial line and only becomes addressable once it is completed.
/// The log also knows where each line ends in the overall filtered stream, so
/// a stream offset (e.g. where a pattern matched) can be mapped back to a
/// line index.
#[derive(Debug, Default, Clone)]
pub struct OutputLog {
    lines: Vec<String>,
    partial: String,
    ends: Vec<usize>,
    total: usize,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        for piece in text.split_inclusive('\n') {
            self.total += piece.len();
            if piece.ends_with('\n') {
                let mut line = std::mem::take(&mut self.partial);
                line.push_str(piece);
                self.lines.push(line);
                self.ends.push(self.total);
            } else {
                self.partial.push_str(piece);
            }
        }
    }

    /// Number of complete lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn partial(&self) -> &str {
        &self.partial
    }

    /// Concatenation of lines `[from, to)`, clamped to the log bounds.
    pub fn slice(&self, from: usize, to: usize) -> String {
        let to = to.min(self.lines.len());
        if from >= to {
            return String::new();
        }
        self.lines[from..to].concat()
    }

    /// Index of the line containing the given stream offset.
    ///
    /// Offsets inside the partial tail map to `len()`.
    pub fn line_at(&self, offset: usize) -> usize {
        self.ends.partition_point(|&end| end <= offset)
    }

    /// Text of the line containing `offset`, from the line start up to
    /// `offset`.
    pub fn line_prefix(&self, offset: usize) -> &str {
        let index = self.line_at(offset);
        let start = index.checked_sub(1).map_or(0, |i| self.ends[i]);
        let line = self
            .lines
            .get(index)
            .map_or(self.partial.as_str(), String::as_str);
        line.get(..offset.saturating_sub(start)).unwrap_or(line)
    }

    /// Total number of bytes appended so far.
    pub fn stream_len(&self) -> usize {
        self.total
    }
}

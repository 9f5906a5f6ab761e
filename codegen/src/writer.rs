//! Indented line buffer for generated source.

/// Accumulates generated lines at the current indentation depth.
#[derive(Debug, Default)]
pub struct CodeWriter {
    lines: Vec<String>,
    depth: usize,
}

impl CodeWriter {
    pub fn new(depth: usize) -> Self {
        Self { lines: Vec::new(), depth }
    }

    pub fn indent(&self) -> String {
        "  ".repeat(self.depth)
    }

    pub fn push_indent(&mut self) {
        self.depth += 1;
    }

    pub fn pop_indent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Append one line at the current depth.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{text}", self.indent()));
        }
    }

    /// Append a block of text, indenting every line. Empty input appends nothing.
    pub fn lines(&mut self, text: impl AsRef<str>) {
        for line in text.as_ref().lines() {
            self.line(line);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Indent every line of `text` by `depth` levels.
pub fn indent_block(text: &str, depth: usize) -> String {
    let mut writer = CodeWriter::new(depth);
    writer.lines(text);
    writer.finish()
}

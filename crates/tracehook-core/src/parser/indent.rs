// Indentation preprocessor
// Turns significant whitespace into explicit markers the grammar can match.
// Markers are inserted just before the '\n' that ends a logical line, so every
// token keeps its original line and column.

use crate::error::{ParseError, ParseErrorKind};

/// Ends a logical line
pub const NL: char = '\u{1E}';
/// Opens an indented block
pub const INDENT: char = '\u{11}';
/// Closes an indented block
pub const DEDENT: char = '\u{12}';

const TAB_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
struct StringState {
    quote: char,
    triple: bool,
}

/// Preprocessor for indentation-delimited source
#[derive(Debug)]
pub struct IndentPreprocessor<'a> {
    source: &'a str,
    filename: &'a str,
    out: String,
    levels: Vec<usize>,
    /// Byte offset in `out` just past the NL marker of the last logical line
    last_nl: Option<usize>,
    depth: usize,
    line: u32,
    /// Last logical line was a block header (ended in `:`)
    pending_block: bool,
}

impl<'a> IndentPreprocessor<'a> {
    pub fn new(source: &'a str, filename: &'a str) -> Self {
        Self {
            source,
            filename,
            out: String::with_capacity(source.len() + 16),
            levels: vec![0],
            last_nl: None,
            depth: 0,
            line: 1,
            pending_block: false,
        }
    }

    pub fn process(mut self) -> Result<String, ParseError> {
        let chars: Vec<char> = self.source.chars().collect();
        let mut i = 0;
        let mut string: Option<StringState> = None;
        let mut at_line_start = true;
        let mut continued = false;
        let mut line_has_code = false;
        let mut last_code = None;

        while i < chars.len() {
            if at_line_start {
                at_line_start = false;
                let mut width = 0;
                while i < chars.len() && matches!(chars[i], ' ' | '\t' | '\x0C') {
                    width = match chars[i] {
                        '\t' => (width / TAB_SIZE + 1) * TAB_SIZE,
                        '\x0C' => 0,
                        _ => width + 1,
                    };
                    self.out.push(chars[i]);
                    i += 1;
                }
                let blank = i >= chars.len() || matches!(chars[i], '\n' | '\r' | '#');
                if !blank && !continued && self.depth == 0 {
                    self.open_line(width)?;
                }
                if !blank {
                    line_has_code = true;
                }
                continued = false;
                continue;
            }

            let c = chars[i];

            if let Some(state) = string {
                match c {
                    '\\' => {
                        self.out.push(c);
                        if let Some(&next) = chars.get(i + 1) {
                            self.out.push(next);
                            if next == '\n' {
                                self.line += 1;
                            }
                            i += 1;
                        }
                    }
                    '\n' if !state.triple => {
                        // unterminated literal; the grammar reports it
                        string = None;
                        continue;
                    }
                    '\n' => {
                        self.out.push(c);
                        self.line += 1;
                    }
                    _ if c == state.quote => {
                        if !state.triple {
                            string = None;
                            self.out.push(c);
                        } else if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                            string = None;
                            self.out.push(c);
                            self.out.push(c);
                            self.out.push(c);
                            i += 2;
                        } else {
                            self.out.push(c);
                        }
                    }
                    _ => self.out.push(c),
                }
                i += 1;
                continue;
            }

            match c {
                '\'' | '"' => {
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    string = Some(StringState { quote: c, triple });
                    last_code = Some(c);
                    if triple {
                        self.out.push(c);
                        self.out.push(c);
                        i += 2;
                    }
                    self.out.push(c);
                }
                '#' => {
                    while i < chars.len() && chars[i] != '\n' {
                        self.out.push(chars[i]);
                        i += 1;
                    }
                    continue;
                }
                '(' | '[' | '{' => {
                    self.depth += 1;
                    last_code = Some(c);
                    self.out.push(c);
                }
                ')' | ']' | '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    last_code = Some(c);
                    self.out.push(c);
                }
                '\\' if matches!(chars.get(i + 1), Some('\n'))
                    || (chars.get(i + 1) == Some(&'\r') && chars.get(i + 2) == Some(&'\n')) =>
                {
                    self.out.push(' ');
                    continued = true;
                }
                '\n' => {
                    if self.depth == 0 && line_has_code && !continued {
                        self.end_logical_line(last_code.take());
                        line_has_code = false;
                    }
                    self.out.push('\n');
                    self.line += 1;
                    at_line_start = true;
                }
                _ => {
                    if !c.is_whitespace() {
                        last_code = Some(c);
                    }
                    self.out.push(c);
                }
            }
            i += 1;
        }

        if line_has_code {
            self.end_logical_line(last_code);
        }
        if self.pending_block {
            return Err(self.error("expected an indented block"));
        }
        while self.levels.len() > 1 {
            self.levels.pop();
            self.insert_marker(DEDENT);
        }
        Ok(self.out)
    }

    fn end_logical_line(&mut self, last_code: Option<char>) {
        self.out.push(NL);
        self.last_nl = Some(self.out.len());
        self.pending_block = last_code == Some(':');
    }

    /// Compare the indentation of a new logical line with the open blocks
    fn open_line(&mut self, width: usize) -> Result<(), ParseError> {
        let current = self.levels.last().copied().unwrap_or(0);
        if std::mem::take(&mut self.pending_block) && width <= current {
            return Err(self.error("expected an indented block"));
        }
        if width > current {
            if self.last_nl.is_none() {
                return Err(self.error("unexpected indent"));
            }
            self.levels.push(width);
            self.insert_marker(INDENT);
        } else if width < current {
            while self.levels.last().copied().unwrap_or(0) > width {
                self.levels.pop();
                self.insert_marker(DEDENT);
            }
            if self.levels.last().copied().unwrap_or(0) != width {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(())
    }

    fn insert_marker(&mut self, marker: char) {
        match self.last_nl {
            Some(pos) => {
                self.out.insert(pos, marker);
                self.last_nl = Some(pos + marker.len_utf8());
            }
            None => self.out.push(marker),
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let text = self.source.lines().nth(self.line as usize - 1).map(str::to_string);
        ParseError::new(ParseErrorKind::Indentation, message, self.filename, self.line, 0, text)
    }
}

/// Preprocess `source`, see [`IndentPreprocessor`]
pub fn preprocess(source: &str, filename: &str) -> Result<String, ParseError> {
    IndentPreprocessor::new(source, filename).process()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers(text: &str) -> String {
        text.replace(NL, "<NL>")
            .replace(INDENT, "<IN>")
            .replace(DEDENT, "<DE>")
    }

    #[test]
    fn test_simple_block() {
        let out = preprocess("if x:\n    y\nz\n", "<test>").unwrap();
        assert_eq!(markers(&out), "if x:<NL><IN>\n    y<NL><DE>\nz<NL>\n");
    }

    #[test]
    fn test_blank_and_comment_lines_are_not_logical() {
        let out = preprocess("def f():\n\n    # note\n    return 1\n", "<test>").unwrap();
        assert_eq!(
            markers(&out),
            "def f():<NL><IN>\n\n    # note\n    return 1<NL><DE>\n"
        );
    }

    #[test]
    fn test_brackets_join_lines() {
        let out = preprocess("x = [1,\n  2]\ny = 3", "<test>").unwrap();
        assert_eq!(markers(&out), "x = [1,\n  2]<NL>\ny = 3<NL>");
    }

    #[test]
    fn test_backslash_continuation() {
        let out = preprocess("x = 1 + \\\n    2\n", "<test>").unwrap();
        assert_eq!(markers(&out), "x = 1 +  \n    2<NL>\n");
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let out = preprocess("s = '''a\n# not a comment\n  b'''\n", "<test>").unwrap();
        assert_eq!(markers(&out), "s = '''a\n# not a comment\n  b'''<NL>\n");
    }

    #[test]
    fn test_dedent_at_eof_without_newline() {
        let out = preprocess("while a:\n    if b:\n        c", "<test>").unwrap();
        assert_eq!(
            markers(&out),
            "while a:<NL><IN>\n    if b:<NL><IN>\n        c<NL><DE><DE>"
        );
    }

    #[test]
    fn test_unexpected_indent_on_first_line() {
        let err = preprocess("  x = 1\n", "<test>").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Indentation);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_block_header_needs_indented_body() {
        let err = preprocess("def f():  # body missing\nreturn 1\n", "<test>").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Indentation);
        assert_eq!(err.message, "expected an indented block");
        assert_eq!(err.line, 2);

        let err = preprocess("while x:\n\n", "<test>").unwrap_err();
        assert_eq!(err.message, "expected an indented block");

        assert!(preprocess("if x: y\nz = {'a:': 1,\n  'b':\n  2}\n", "<test>").is_ok());
    }

    #[test]
    fn test_inconsistent_dedent() {
        let err = preprocess("if a:\n    b\n  c\n", "<test>").unwrap_err();
        assert!(err.message.contains("unindent"));
        assert_eq!(err.line, 3);
    }
}

//! Multi-line input collection for the REPL
//!
//! A cell is complete when its brackets balance and no string is open,
//! unless it opens an indented block (a line ending in `:`), in which case
//! collection continues until an empty line.

/// Result of processing a line of input
#[derive(Debug, PartialEq, Eq)]
pub enum LineProcessResult {
    /// Input is complete and ready for execution
    Complete(String),
    /// More input is needed to complete the statement
    NeedMore,
}

/// Collects the lines of one cell
#[derive(Debug, Default)]
pub struct MultiLineCollector {
    buffer: String,
    /// Open brackets, parentheses and braces
    nesting_level: i32,
    in_string: bool,
    string_delimiter: char,
    last_was_escape: bool,
    /// Inside an indented block; ends at an empty line
    in_block: bool,
    /// Last line ended with a backslash
    continued: bool,
}

impl MultiLineCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompt for the current state
    pub fn get_prompt(&self) -> &'static str {
        if self.is_collecting() {
            "... "
        } else {
            ">>> "
        }
    }

    pub fn is_collecting(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Process a line of input
    pub fn process_line(&mut self, line: &str) -> LineProcessResult {
        if self.in_block && line.trim().is_empty() && self.nesting_level <= 0 && !self.in_string {
            return self.finish();
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        self.update_parsing_state(line);

        let code = strip_comment(line).trim_end();
        self.continued = code.ends_with('\\');
        if self.nesting_level <= 0 && !self.in_string && code.ends_with(':') {
            self.in_block = true;
        }

        if self.in_block || self.continued || self.nesting_level > 0 || self.in_string {
            LineProcessResult::NeedMore
        } else {
            self.finish()
        }
    }

    fn finish(&mut self) -> LineProcessResult {
        let code = std::mem::take(&mut self.buffer);
        self.reset();
        LineProcessResult::Complete(code)
    }

    fn update_parsing_state(&mut self, line: &str) {
        for ch in line.chars() {
            if self.in_string {
                if self.last_was_escape {
                    self.last_was_escape = false;
                } else if ch == '\\' {
                    self.last_was_escape = true;
                } else if ch == self.string_delimiter {
                    self.in_string = false;
                }
            } else {
                match ch {
                    '#' => break,
                    '"' | '\'' => {
                        self.in_string = true;
                        self.string_delimiter = ch;
                        self.last_was_escape = false;
                    }
                    '{' | '(' | '[' => self.nesting_level += 1,
                    '}' | ')' | ']' => self.nesting_level -= 1,
                    _ => {}
                }
            }
        }
    }
}

/// The line up to a `#` comment outside string literals
fn strip_comment(line: &str) -> &str {
    let mut delimiter = None;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match delimiter {
            Some(_) if escaped => escaped = false,
            Some(_) if ch == '\\' => escaped = true,
            Some(d) if ch == d => delimiter = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => delimiter = Some(ch),
            None if ch == '#' => return &line[..idx],
            None => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(collector: &mut MultiLineCollector, lines: &[&str]) -> Vec<LineProcessResult> {
        lines.iter().map(|line| collector.process_line(line)).collect()
    }

    #[test]
    fn test_simple_complete_statement() {
        let mut collector = MultiLineCollector::new();
        assert_eq!(
            collector.process_line("x = 42"),
            LineProcessResult::Complete("x = 42".to_string())
        );
        assert!(!collector.is_collecting());
    }

    #[test]
    fn test_block_ends_at_empty_line() {
        let mut collector = MultiLineCollector::new();
        let results = feed(&mut collector, &["def f(n):  # doubles", "    return n * 2"]);
        assert!(results.iter().all(|r| *r == LineProcessResult::NeedMore));
        assert_eq!(collector.get_prompt(), "... ");

        assert_eq!(
            collector.process_line(""),
            LineProcessResult::Complete("def f(n):  # doubles\n    return n * 2".to_string())
        );
        assert_eq!(collector.get_prompt(), ">>> ");
    }

    #[test]
    fn test_open_brackets_continue() {
        let mut collector = MultiLineCollector::new();
        assert_eq!(collector.process_line("items = ["), LineProcessResult::NeedMore);
        assert_eq!(collector.process_line("    1, 2,"), LineProcessResult::NeedMore);
        assert_eq!(
            collector.process_line("]"),
            LineProcessResult::Complete("items = [\n    1, 2,\n]".to_string())
        );
    }

    #[test]
    fn test_strings_and_comments_do_not_count() {
        let mut collector = MultiLineCollector::new();
        assert_eq!(
            collector.process_line("s = 'a ( # :'"),
            LineProcessResult::Complete("s = 'a ( # :'".to_string())
        );
        assert_eq!(
            collector.process_line("x = 1  # note:"),
            LineProcessResult::Complete("x = 1  # note:".to_string())
        );
    }

    #[test]
    fn test_backslash_continuation() {
        let mut collector = MultiLineCollector::new();
        assert_eq!(collector.process_line("total = 1 + \\"), LineProcessResult::NeedMore);
        assert_eq!(
            collector.process_line("    2"),
            LineProcessResult::Complete("total = 1 + \\\n    2".to_string())
        );
    }

    #[test]
    fn test_reset_discards_partial_input() {
        let mut collector = MultiLineCollector::new();
        collector.process_line("if True:");
        collector.reset();
        assert!(!collector.is_collecting());
        assert_eq!(
            collector.process_line("y = 2"),
            LineProcessResult::Complete("y = 2".to_string())
        );
    }
}

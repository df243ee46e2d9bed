// In-memory trace capture

use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;

use super::{Tracer, TracerSettings};
use crate::runtime::io::SharedBuffer;

const HEADER_TITLE: &str = "EXECUTION TRACE";

/// Remove ANSI escape sequences (colors, cursor movement) from `text`
pub fn strip_ansi_escapes(text: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07]*\x07").expect("valid ANSI pattern")
    });
    re.replace_all(text, "").into_owned()
}

/// A tracer that records into a buffer instead of a terminal
pub struct TraceLog {
    buffer: SharedBuffer,
    tracer: Rc<Tracer>,
}

impl TraceLog {
    pub fn new(settings: TracerSettings) -> Self {
        let buffer = SharedBuffer::new();
        let tracer = Tracer::new(settings, buffer.sink());
        Self { buffer, tracer }
    }

    pub fn tracer(&self) -> &Rc<Tracer> {
        &self.tracer
    }

    pub fn reset(&self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.contents().is_empty()
    }

    /// Recorded output. Colors are stripped unless `color` is set; `header`
    /// boxes it under an "EXECUTION TRACE" title.
    pub fn output(&self, color: bool, header: bool) -> String {
        let raw = self.buffer.contents();
        let body = if color { raw } else { strip_ansi_escapes(&raw) };
        if !header {
            return body;
        }
        let width = body
            .lines()
            .map(|line| strip_ansi_escapes(line).chars().count())
            .max()
            .unwrap_or(0)
            .max(HEADER_TITLE.len() + 4);
        let rule = "=".repeat(width);
        let pad = (width - HEADER_TITLE.len()) / 2;
        format!("{rule}\n{}{HEADER_TITLE}\n{rule}\n{body}", " ".repeat(pad))
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new(TracerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi_escapes("\x1b[31mred\x1b[0m plain"), "red plain");
        assert_eq!(strip_ansi_escapes("no escapes"), "no escapes");
    }

    #[test]
    fn test_output_and_reset() {
        let log = TraceLog::new(TracerSettings {
            color: true,
            ..Default::default()
        });
        log.tracer().ret(0, "f", "1");
        assert!(log.output(true, false).contains('\x1b'));
        assert_eq!(log.output(false, false), "DBG: <<< Return value from f: 1\n");

        let boxed = log.output(false, true);
        let lines: Vec<&str> = boxed.lines().collect();
        assert_eq!(lines[0], lines[2]);
        assert!(lines[0].chars().all(|c| c == '='));
        assert_eq!(lines[1].trim(), "EXECUTION TRACE");
        assert_eq!(lines[3], "DBG: <<< Return value from f: 1");

        log.reset();
        assert!(log.is_empty());
    }
}

// Output streams shared between the interpreter, the tracer and tests

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

/// A writable stream that several owners can print to
pub type Sink = Rc<RefCell<dyn Write>>;

pub fn stdout_sink() -> Sink {
    Rc::new(RefCell::new(io::stdout()))
}

pub fn stderr_sink() -> Sink {
    Rc::new(RefCell::new(io::stderr()))
}

/// In-memory stream; clones share the same buffer
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.bytes.borrow_mut().clear();
    }

    pub fn sink(&self) -> Sink {
        Rc::new(RefCell::new(self.clone()))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write `text` to `sink`, ignoring a closed stream
pub fn emit(sink: &Sink, text: &str) {
    let mut out = sink.borrow_mut();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_buffer() {
        let buffer = SharedBuffer::new();
        let sink = buffer.sink();
        emit(&sink, "hello ");
        emit(&sink, "world");
        assert_eq!(buffer.contents(), "hello world");
        buffer.clear();
        assert_eq!(buffer.contents(), "");
    }
}

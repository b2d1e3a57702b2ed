//! Splicing streamed answer deltas into a buffer

use anyhow::Result;

use crate::host::{split_lines, BufferId, Host};

/// Appends deltas at the end of a buffer's last line as they arrive
#[derive(Debug)]
pub struct StreamSplicer {
    buffer: BufferId,
    /// Byte column on the last line where the next delta goes
    col: i64,
}

impl StreamSplicer {
    pub fn new(buffer: BufferId) -> Self {
        Self { buffer, col: 0 }
    }

    pub fn col(&self) -> i64 {
        self.col
    }

    pub fn push(&mut self, host: &mut dyn Host, delta: &str) -> Result<()> {
        let row = host.buf_line_count(self.buffer)? - 1;
        host.buf_set_text(self.buffer, row, self.col, row, self.col, &split_lines(delta))?;

        // Text after the last newline starts the new last line
        self.col = match delta.rfind('\n') {
            Some(newline) => (delta.len() - newline - 1) as i64,
            None => self.col + delta.len() as i64,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FakeHost;

    #[test]
    fn test_deltas_join_across_newline() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let mut splicer = StreamSplicer::new(buf);

        splicer.push(&mut host, "Hel").unwrap();
        assert_eq!(splicer.col(), 3);
        splicer.push(&mut host, "lo\n").unwrap();
        assert_eq!(splicer.col(), 0);
        splicer.push(&mut host, "World").unwrap();

        assert_eq!(host.lines(buf), vec!["Hello", "World"]);
        assert_eq!(splicer.col(), 5);
    }

    #[test]
    fn test_col_counts_bytes() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let mut splicer = StreamSplicer::new(buf);

        splicer.push(&mut host, "héllo").unwrap();
        assert_eq!(splicer.col(), 6);
        splicer.push(&mut host, "!").unwrap();
        assert_eq!(host.lines(buf), vec!["héllo!"]);
    }

    #[test]
    fn test_text_after_newline_keeps_its_column() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        let mut splicer = StreamSplicer::new(buf);

        splicer.push(&mut host, "one\ntw").unwrap();
        splicer.push(&mut host, "o").unwrap();

        assert_eq!(host.lines(buf), vec!["one", "two"]);
    }

    #[test]
    fn test_splices_after_existing_lines() {
        let mut host = FakeHost::new();
        let buf = host.create_buf(false, true).unwrap();
        host.set_lines(buf, &["### Copilot", "", ""]);
        let mut splicer = StreamSplicer::new(buf);

        splicer.push(&mut host, "Sure").unwrap();

        assert_eq!(host.lines(buf), vec!["### Copilot", "", "Sure"]);
    }
}

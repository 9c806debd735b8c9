//! Accumulates bytes from an edge session into complete newline-terminated
//! lines, tolerating partial reads. An 8 KB cap bounds the accumulator; an
//! oversize line is a protocol violation that resets and resyncs at the
//! next newline rather than disconnecting the edge (spec.md §4.5/§7).

pub const CAPACITY: usize = 8192;

pub struct LineFramer {
    buf: Vec<u8>,
    len: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; CAPACITY],
            len: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Writable tail for the next socket read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Records that `n` bytes were just written into `spare_mut()`.
    pub fn advance(&mut self, n: usize) {
        self.len += n;
    }

    /// Drops everything buffered so far, resyncing at the next newline
    /// boundary on the wire.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Drains every complete line out of the buffer (stripping a trailing
    /// `\r`), preserving any trailing partial line at the front for the
    /// next call.
    pub fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut consumed = 0;

        while let Some(pos) = self.buf[consumed..self.len].iter().position(|&b| b == b'\n') {
            let line_end = consumed + pos;
            if let Ok(s) = std::str::from_utf8(&self.buf[consumed..line_end]) {
                lines.push(s.trim_end_matches('\r').to_string());
            }
            consumed = line_end + 1;
        }

        if consumed > 0 {
            self.buf.copy_within(consumed..self.len, 0);
            self.len -= consumed;
        }

        lines
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(framer: &mut LineFramer, data: &[u8]) {
        framer.spare_mut()[..data.len()].copy_from_slice(data);
        framer.advance(data.len());
    }

    #[test]
    fn single_complete_line() {
        let mut framer = LineFramer::new();
        feed(&mut framer, b"{\"cmd\":\"list\"}\n");
        assert_eq!(framer.take_lines(), vec!["{\"cmd\":\"list\"}"]);
    }

    #[test]
    fn partial_line_is_preserved_across_calls() {
        let mut framer = LineFramer::new();
        feed(&mut framer, b"{\"cmd\":\"li");
        assert!(framer.take_lines().is_empty());
        feed(&mut framer, b"st\"}\n");
        assert_eq!(framer.take_lines(), vec!["{\"cmd\":\"list\"}"]);
    }

    #[test]
    fn multiple_lines_in_one_read() {
        let mut framer = LineFramer::new();
        feed(&mut framer, b"a\nb\nc");
        assert_eq!(framer.take_lines(), vec!["a", "b"]);
        feed(&mut framer, b"\n");
        assert_eq!(framer.take_lines(), vec!["c"]);
    }

    #[test]
    fn oversize_line_resets_and_resyncs() {
        let mut framer = LineFramer::new();
        feed(&mut framer, &vec![b'x'; CAPACITY]);
        assert!(framer.is_full());
        framer.reset();
        assert!(!framer.is_full());
        feed(&mut framer, b"{\"cmd\":\"list\"}\n");
        assert_eq!(framer.take_lines(), vec!["{\"cmd\":\"list\"}"]);
    }

    #[test]
    fn strips_trailing_carriage_return() {
        let mut framer = LineFramer::new();
        feed(&mut framer, b"hello\r\n");
        assert_eq!(framer.take_lines(), vec!["hello"]);
    }
}

//! Incremental line framing (§4.2). Splits the inbound byte stream on
//! CR-LF boundaries; a bare `\n` also terminates a line for lenient
//! clients, with any trailing `\r` stripped from the content.
//!
//! Grounded on `examples/original_source/srcs/Client.cpp`'s
//! `extractNextLine`/`hasCompleteLine`, generalized to operate on an
//! owned byte buffer instead of a `std::string` so it can be driven
//! directly by the non-blocking read loop in [`crate::connection`].

#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly read bytes to the inbound buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Removes and returns the next complete line's content (terminators
    /// stripped), or `None` if no terminator is present yet. Empty lines
    /// are silently skipped, so a single call can consume more than one
    /// terminator before returning.
    pub fn extract_line(&mut self) -> Option<String> {
        loop {
            let (end, skip) = match find(&self.buf, b"\r\n") {
                Some(pos) => (pos, 2),
                None => match find(&self.buf, b"\n") {
                    Some(pos) => (pos, 1),
                    None => return None,
                },
            };

            let mut line: Vec<u8> = self.buf.drain(..end + skip).collect();
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extracts_crlf_line() {
        let mut f = LineFramer::new();
        f.push(b"NICK Alice\r\n");
        assert_eq!(f.extract_line().as_deref(), Some("NICK Alice"));
        assert_eq!(f.extract_line(), None);
    }

    #[test]
    fn lenient_lf_only() {
        let mut f = LineFramer::new();
        f.push(b"PING :tok\n");
        assert_eq!(f.extract_line().as_deref(), Some("PING :tok"));
    }

    #[test]
    fn strips_bare_cr_before_bare_lf() {
        let mut f = LineFramer::new();
        f.push(b"PING :tok\r\n");
        assert_eq!(f.extract_line().as_deref(), Some("PING :tok"));
    }

    #[test]
    fn incomplete_line_waits() {
        let mut f = LineFramer::new();
        f.push(b"NICK Al");
        assert_eq!(f.extract_line(), None);
        f.push(b"ice\r\n");
        assert_eq!(f.extract_line().as_deref(), Some("NICK Alice"));
    }

    #[test]
    fn two_commands_and_an_incomplete_third() {
        let mut f = LineFramer::new();
        f.push(b"NICK Alice\r\nPING :x\r\nUSER a 0 * :");
        assert_eq!(f.extract_line().as_deref(), Some("NICK Alice"));
        assert_eq!(f.extract_line().as_deref(), Some("PING :x"));
        assert_eq!(f.extract_line(), None);
    }

    #[test]
    fn empty_lines_are_skipped() {
        let mut f = LineFramer::new();
        f.push(b"\r\n\r\nNICK Alice\r\n");
        assert_eq!(f.extract_line().as_deref(), Some("NICK Alice"));
    }
}

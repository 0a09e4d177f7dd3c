//! Channel buffers.
//!
//! Every channel owns one [`InputBuffer`] and one [`OutputBuffer`]. The
//! input side accumulates whatever the descriptor produced and hands it out
//! as records or bounded byte runs, with a push-back queue for consumers
//! that read one record too many. The output side queues bytes for
//! transmission and tracks the overflow threshold used for backpressure
//! signaling.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};

/// Record separator applied when none is configured.
pub const DEFAULT_SEPARATOR: &[u8] = b"\n";

/// Buffered input for one channel.
#[derive(Debug)]
pub struct InputBuffer {
    buf: BytesMut,
    pushback: VecDeque<Vec<u8>>,
    separator: Vec<u8>,
}

impl InputBuffer {
    pub fn new() -> InputBuffer {
        InputBuffer {
            buf: BytesMut::new(),
            pushback: VecDeque::new(),
            separator: DEFAULT_SEPARATOR.to_vec(),
        }
    }

    /// Appends bytes read from the descriptor.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Total bytes available, push-back entries included.
    pub fn len(&self) -> usize {
        self.pushback.iter().map(Vec::len).sum::<usize>() + self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushback.is_empty() && self.buf.is_empty()
    }

    /// Whether at least `amount` bytes can be consumed right now.
    pub fn can_read(&self, amount: usize) -> bool {
        self.len() >= amount
    }

    /// The unconsumed byte run, without push-back entries and without
    /// consuming anything.
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Extracts the next record, separator stripped.
    ///
    /// Push-back entries are returned first, verbatim. Returns `None` when
    /// no complete record is buffered.
    pub fn get(&mut self) -> Option<Vec<u8>> {
        if let Some(line) = self.pushback.pop_front() {
            return Some(line);
        }
        let pos = find(&self.buf, &self.separator)?;
        let mut line = self.buf.split_to(pos + self.separator.len()).to_vec();
        line.truncate(pos);
        Some(line)
    }

    /// Extracts up to `amount` raw bytes, draining push-back entries first.
    /// Returns `None` when the buffer is empty.
    pub fn getsome(&mut self, amount: usize) -> Option<Vec<u8>> {
        if self.is_empty() || amount == 0 {
            return None;
        }

        let mut out = Vec::with_capacity(amount.min(self.len()));
        while out.len() < amount {
            match self.pushback.front_mut() {
                Some(line) => {
                    let take = line.len().min(amount - out.len());
                    out.extend_from_slice(&line[..take]);
                    if take == line.len() {
                        self.pushback.pop_front();
                    } else {
                        line.drain(..take);
                    }
                }
                None => break,
            }
        }
        if out.len() < amount {
            let take = self.buf.len().min(amount - out.len());
            out.extend_from_slice(&self.buf[..take]);
            self.buf.advance(take);
        }
        Some(out)
    }

    /// Pushes a previously consumed record back; the next [`get`] returns it
    /// before touching the byte run.
    ///
    /// [`get`]: InputBuffer::get
    pub fn unget(&mut self, line: Vec<u8>) {
        self.pushback.push_front(line);
    }

    /// Prepends raw bytes to the byte run, separators and all.
    pub fn ungets(&mut self, raw: &[u8]) {
        if raw.is_empty() {
            return;
        }
        let mut restored = BytesMut::with_capacity(raw.len() + self.buf.len());
        restored.extend_from_slice(raw);
        restored.extend_from_slice(&self.buf);
        self.buf = restored;
    }

    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    pub fn set_separator(&mut self, separator: &[u8]) {
        assert!(
            !separator.is_empty(),
            "configuration error: empty record separator"
        );
        self.separator = separator.to_vec();
    }

    pub(crate) fn clear(&mut self) {
        self.buf = BytesMut::new();
        self.pushback.clear();
    }
}

impl Default for InputBuffer {
    fn default() -> InputBuffer {
        InputBuffer::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Which side of the overflow threshold a buffer operation crossed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Crossing {
    Begin,
    End,
}

/// Bytes queued for transmission, with backpressure accounting.
#[derive(Debug)]
pub struct OutputBuffer {
    buf: BytesMut,
    limit: usize,
    overflown: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> OutputBuffer {
        OutputBuffer {
            buf: BytesMut::new(),
            limit,
            overflown: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_overflown(&self) -> bool {
        self.overflown
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Queues bytes; reports `Crossing::Begin` when this push crosses the
    /// threshold upward.
    pub(crate) fn push(&mut self, data: &[u8]) -> Option<Crossing> {
        self.buf.extend_from_slice(data);
        if !self.overflown && self.buf.len() > self.limit {
            self.overflown = true;
            return Some(Crossing::Begin);
        }
        None
    }

    /// Discards `amount` transmitted bytes from the front; reports
    /// `Crossing::End` when the buffer returns to at/under the threshold.
    pub(crate) fn consume(&mut self, amount: usize) -> Option<Crossing> {
        self.buf.advance(amount);
        if self.overflown && self.buf.len() <= self.limit {
            self.overflown = false;
            return Some(Crossing::End);
        }
        None
    }

    /// Adjusts the threshold; crossing signals follow the same strict
    /// alternation as push/consume.
    pub(crate) fn set_limit(&mut self, limit: usize) -> Option<Crossing> {
        self.limit = limit;
        if self.overflown && self.buf.len() <= self.limit {
            self.overflown = false;
            Some(Crossing::End)
        } else if !self.overflown && self.buf.len() > self.limit {
            self.overflown = true;
            Some(Crossing::Begin)
        } else {
            None
        }
    }

    pub(crate) fn clear(&mut self) {
        self.buf = BytesMut::new();
        self.overflown = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_strips_separator() {
        let mut input = InputBuffer::new();
        input.append(b"hello\nwor");
        assert_eq!(input.get(), Some(b"hello".to_vec()));
        assert_eq!(input.get(), None);
        input.append(b"ld\n");
        assert_eq!(input.get(), Some(b"world".to_vec()));
    }

    #[test]
    fn custom_separator() {
        let mut input = InputBuffer::new();
        input.set_separator(b"\r\n");
        input.append(b"one\r\ntwo\nstill-two\r\n");
        assert_eq!(input.get(), Some(b"one".to_vec()));
        assert_eq!(input.get(), Some(b"two\nstill-two".to_vec()));
    }

    #[test]
    fn unget_restores_next_get() {
        let mut input = InputBuffer::new();
        input.append(b"alpha\nbeta\n");
        let line = input.get().unwrap();
        input.unget(line.clone());
        assert_eq!(input.get(), Some(line));
        assert_eq!(input.get(), Some(b"beta".to_vec()));
    }

    #[test]
    fn ungets_restores_byte_run() {
        let mut input = InputBuffer::new();
        input.append(b"alpha\nbeta\n");
        let before = input.peek().to_vec();
        let mut line = input.get().unwrap();
        line.extend_from_slice(input.separator());

        input.ungets(&line);
        assert_eq!(input.peek(), &before[..]);
        assert_eq!(input.get(), Some(b"alpha".to_vec()));
    }

    #[test]
    fn getsome_is_bounded_and_drains_pushback_first() {
        let mut input = InputBuffer::new();
        input.append(b"abcdef");
        input.unget(b"xy".to_vec());

        assert!(input.can_read(8));
        assert!(!input.can_read(9));

        assert_eq!(input.getsome(3), Some(b"xya".to_vec()));
        assert_eq!(input.getsome(100), Some(b"bcdef".to_vec()));
        assert_eq!(input.getsome(1), None);
    }

    #[test]
    fn overflow_crossings_alternate() {
        let mut output = OutputBuffer::new(4);

        assert_eq!(output.push(b"abc"), None);
        assert_eq!(output.push(b"de"), Some(Crossing::Begin));
        // Already overflown, no second begin.
        assert_eq!(output.push(b"f"), None);

        assert_eq!(output.consume(1), None);
        assert_eq!(output.consume(1), Some(Crossing::End));
        assert_eq!(output.consume(4), None);
        assert!(output.is_empty());
    }

    #[test]
    fn limit_changes_signal_crossings() {
        let mut output = OutputBuffer::new(10);
        output.push(b"abcdef");

        assert_eq!(output.set_limit(4), Some(Crossing::Begin));
        assert_eq!(output.set_limit(6), Some(Crossing::End));
        assert_eq!(output.set_limit(100), None);
    }
}

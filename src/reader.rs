//! Accumulates server replies out of raw socket reads.
//!
//! A reply is a status line, optionally followed by a multi-line body that
//! ends with a line holding a single dot. The reader keeps one growable byte
//! buffer and two cursors into it: how far it has been filled, and where the
//! status line ends.

use std::cmp;
use std::time::Duration;

use crate::config::PopperConfig;
use crate::connection::Connection;
use crate::errors::*;
use crate::progress::StopFlag;

/// Free space below which the buffer gets doubled.
pub const SMALL: usize = 512;

/// Upper bound for sizing the buffer from an announced message size; larger
/// messages grow into place by doubling.
pub const MAX_PREALLOC: usize = 4 * 1024 * 1024;

const CRLF: &[u8] = b"\r\n";
const TERMINATOR: &[u8] = b"\r\n.\r\n";

/// What a single `receive` produced.
#[derive(Debug, Default)]
pub struct ReceivedReply {
    /// First line of the reply, without its CRLF.
    pub status_line: String,
    /// Everything after the status line, dot-unstuffed and without the
    /// terminating dot line.
    pub body: Vec<u8>,
    /// `false` if the read was cut short by a stop request.
    pub complete: bool,
}

impl ReceivedReply {
    pub fn is_positive(&self) -> bool {
        self.status_line.starts_with('+')
    }
}

pub struct ResponseReader {
    buf: Vec<u8>,
    net_buf_size: usize,
    receive_timeout: Duration,
    feedback_slice: Duration,
}

impl ResponseReader {
    pub fn new(config: &PopperConfig) -> ResponseReader {
        ResponseReader {
            buf: Vec::new(),
            net_buf_size: cmp::max(config.net_buf_size, SMALL),
            receive_timeout: config.receive_timeout,
            feedback_slice: config.feedback_slice,
        }
    }

    /// Reads one reply from `conn`.
    ///
    /// `size_hint` is the announced size of the payload (0 if unknown) and
    /// only affects how large the buffer starts out. `on_chunk` is called
    /// with the size of every block read.
    pub fn receive<C: Connection + ?Sized>(
        &mut self,
        conn: &mut C,
        stop: &StopFlag,
        multi_line: bool,
        size_hint: usize,
        on_chunk: &mut dyn FnMut(usize),
    ) -> Result<ReceivedReply> {
        let mut buf_size = if size_hint > self.net_buf_size {
            cmp::min(size_hint, MAX_PREALLOC) + SMALL * 4
        } else {
            self.net_buf_size
        };
        debug!("bufSize: {}", buf_size);
        self.buf.clear();
        self.buf.resize(buf_size, 0);

        let mut reply = ReceivedReply::default();
        let mut offset = 0;
        let mut status_end: Option<usize> = None;
        let mut body_end: Option<usize> = None;
        let mut done = false;

        while !done {
            if buf_size - offset < SMALL {
                buf_size *= 2;
                self.buf.resize(buf_size, 0);
                debug!("bufSize enlarged to: {}", buf_size);
            }
            let max = cmp::min(buf_size - offset, self.net_buf_size);
            let num_bytes = receive_block(
                conn,
                stop,
                &mut self.buf[offset..offset + max],
                self.receive_timeout,
                self.feedback_slice,
            )?;
            if num_bytes == 0 {
                break;
            }
            let prev = offset;
            offset += num_bytes;
            on_chunk(num_bytes);

            if status_end.is_none() {
                if let Some(eol) = find(&self.buf[..offset], CRLF, prev.saturating_sub(1)) {
                    reply.status_line = String::from_utf8(self.buf[..eol].to_vec())?;
                    info!("S: {}", reply.status_line);
                    status_end = Some(eol);
                    if !multi_line || !reply.is_positive() {
                        done = true;
                    }
                }
            }
            if let (false, Some(eol)) = (done, status_end) {
                // the status line's CRLF counts, so an empty body is found too
                let from = cmp::max(eol, prev.saturating_sub(4));
                if let Some(pos) = find(&self.buf[..offset], TERMINATOR, from) {
                    body_end = Some(pos + 2);
                    done = true;
                }
            }
        }

        if !done {
            // interrupted by a stop request
            return Ok(reply);
        }
        reply.complete = true;
        if let Some(eol) = status_end {
            let start = eol + 2;
            reply.body = match body_end {
                Some(end) if end > start => unstuff(&self.buf[start..end]),
                Some(_) => Vec::new(),
                None if reply.is_positive() => self.buf[start..offset].to_vec(),
                None => Vec::new(),
            };
        }
        Ok(reply)
    }
}

/// Waits for and reads one block. Returns 0 if a stop was requested before
/// anything arrived.
fn receive_block<C: Connection + ?Sized>(
    conn: &mut C,
    stop: &StopFlag,
    buf: &mut [u8],
    timeout: Duration,
    slice: Duration,
) -> Result<usize> {
    let slice_ms = cmp::max(slice.as_millis(), 1);
    let rounds = cmp::max(timeout.as_millis() / slice_ms, 1);
    let mut round = 0;
    while !stop.is_stopped() && round < rounds {
        if conn.is_data_pending(slice).chain_err(|| ErrorKind::ReceiveFailed)? {
            let num_bytes = conn.receive(buf).chain_err(|| ErrorKind::ReceiveFailed)?;
            if num_bytes > 0 {
                return Ok(num_bytes);
            }
        }
        round += 1;
    }
    if stop.is_stopped() {
        return Ok(0);
    }
    bail!(ErrorKind::ReceiveTimeout(timeout.as_secs()))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Undoes dot-stuffing: a line starting with `..` loses its first dot.
pub fn unstuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut line_start = true;
    for (i, &b) in body.iter().enumerate() {
        if line_start && b == b'.' && body.get(i + 1) == Some(&b'.') {
            line_start = false;
            continue;
        }
        out.push(b);
        line_start = b == b'\n';
    }
    out
}

/// Dot-stuffs a body the way a server does before sending it.
pub fn stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    let mut line_start = true;
    for &b in body {
        if line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        line_start = b == b'\n';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnection;
    use proptest::prelude::*;

    fn config(net_buf_size: usize) -> PopperConfig {
        PopperConfig {
            net_buf_size,
            ..PopperConfig::default()
        }
    }

    fn read(data: &[u8], chunk: usize, multi_line: bool) -> ReceivedReply {
        let mut conn = MockConnection::with_pending(data, chunk);
        let mut reader = ResponseReader::new(&config(SMALL));
        reader
            .receive(&mut conn, &StopFlag::new(), multi_line, 0, &mut |_| {})
            .unwrap()
    }

    #[test]
    fn single_line_reply() {
        let reply = read(b"+OK 3 1024\r\n", 4096, false);
        assert!(reply.complete);
        assert!(reply.is_positive());
        assert_eq!(reply.status_line, "+OK 3 1024");
        assert!(reply.body.is_empty());
    }

    #[test]
    fn status_line_split_across_reads() {
        let reply = read(b"+OK maildrop locked\r\n", 3, false);
        assert_eq!(reply.status_line, "+OK maildrop locked");
    }

    #[test]
    fn multi_line_body_without_status_or_terminator() {
        let reply = read(b"+OK\r\n1 abc\r\n2 def\r\n.\r\n", 4096, true);
        assert!(reply.complete);
        assert_eq!(reply.body, b"1 abc\r\n2 def\r\n".to_vec());
    }

    #[test]
    fn empty_multi_line_body() {
        let reply = read(b"+OK 0 messages\r\n.\r\n", 4096, true);
        assert!(reply.complete);
        assert!(reply.body.is_empty());
    }

    #[test]
    fn negative_reply_ends_multi_line_read() {
        let reply = read(b"-ERR unknown command\r\n", 4096, true);
        assert!(reply.complete);
        assert!(!reply.is_positive());
        assert!(reply.body.is_empty());
    }

    #[test]
    fn terminator_split_across_reads() {
        for chunk in 1..8 {
            let reply = read(b"+OK\r\nline\r\n.\r\n", chunk, true);
            assert_eq!(reply.body, b"line\r\n".to_vec(), "chunk size {}", chunk);
        }
    }

    #[test]
    fn stuffed_lines_are_unstuffed_once() {
        let reply = read(b"+OK\r\n..leading\r\nmid..dle\r\n...\r\n.\r\n", 4096, true);
        assert_eq!(reply.body, b".leading\r\nmid..dle\r\n..\r\n".to_vec());
    }

    #[test]
    fn buffer_grows_for_large_bodies() {
        let mut data = b"+OK\r\n".to_vec();
        let line = b"0123456789012345678901234567890123456789\r\n";
        for _ in 0..200 {
            data.extend_from_slice(line);
        }
        data.extend_from_slice(b".\r\n");
        let reply = read(&data, 700, true);
        assert_eq!(reply.body.len(), 200 * line.len());
    }

    #[test]
    fn size_hint_reports_every_chunk() {
        let mut conn = MockConnection::with_pending(b"+OK\r\nabc\r\n.\r\n", 4);
        let mut reader = ResponseReader::new(&config(SMALL));
        let mut seen = 0;
        let reply = reader
            .receive(&mut conn, &StopFlag::new(), true, 100_000, &mut |n| seen += n)
            .unwrap();
        assert!(reply.complete);
        assert_eq!(seen, 13);
    }

    #[test]
    fn absurd_size_hint_does_not_preallocate() {
        let mut conn = MockConnection::with_pending(b"+OK\r\nabc\r\n.\r\n", 4096);
        let mut reader = ResponseReader::new(&config(SMALL));
        let reply = reader
            .receive(&mut conn, &StopFlag::new(), true, usize::max_value(), &mut |_| {})
            .unwrap();
        assert_eq!(reply.body, b"abc\r\n".to_vec());
        assert!(reader.buf.len() <= MAX_PREALLOC + SMALL * 4);
    }

    #[test]
    fn stop_yields_incomplete_reply() {
        let mut conn = MockConnection::with_pending(b"", 4096);
        let mut reader = ResponseReader::new(&config(SMALL));
        let stop = StopFlag::new();
        stop.stop();
        let reply = reader.receive(&mut conn, &stop, false, 0, &mut |_| {}).unwrap();
        assert!(!reply.complete);
    }

    #[test]
    fn silence_is_a_timeout() {
        let mut conn = MockConnection::with_pending(b"", 4096);
        let mut cfg = config(SMALL);
        cfg.receive_timeout = Duration::from_millis(10);
        cfg.feedback_slice = Duration::from_millis(1);
        let mut reader = ResponseReader::new(&cfg);
        let err = reader
            .receive(&mut conn, &StopFlag::new(), false, 0, &mut |_| {})
            .unwrap_err();
        match *err.kind() {
            ErrorKind::ReceiveTimeout(_) => {}
            ref other => panic!("unexpected error {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn unstuff_reverses_stuff(lines in proptest::collection::vec("[a-z. ]{0,12}", 0..20)) {
            let body: Vec<u8> = lines.iter().flat_map(|l| format!("{}\r\n", l).into_bytes()).collect();
            prop_assert_eq!(unstuff(&stuff(&body)), body);
        }

        #[test]
        fn reply_is_independent_of_chunking(
            lines in proptest::collection::vec("[a-z. ]{0,40}", 0..40),
            chunk in 1usize..300,
        ) {
            let body: Vec<u8> = lines.iter().flat_map(|l| format!("{}\r\n", l).into_bytes()).collect();
            let mut wire = b"+OK message follows\r\n".to_vec();
            wire.extend(stuff(&body));
            wire.extend_from_slice(b".\r\n");
            let reply = read(&wire, chunk, true);
            prop_assert!(reply.complete);
            prop_assert_eq!(reply.status_line, "+OK message follows".to_string());
            prop_assert_eq!(reply.body, body);
        }
    }
}

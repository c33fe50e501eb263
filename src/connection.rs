//! The byte-stream boundary the session talks through.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// A blocking byte stream to a POP3 server.
///
/// `receive` returns `Ok(0)` when nothing could be read right now; the caller
/// polls `is_data_pending` before reading, so that is rare. Errors are
/// remembered and offered again by `last_error` for the failure report.
pub trait Connection {
    fn connect(&mut self, address: &str) -> io::Result<()>;
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn is_data_pending(&mut self, timeout: Duration) -> io::Result<bool>;
    fn close(&mut self);
    /// Code and text of the most recent transport error, if any.
    fn last_error(&self) -> Option<(i32, String)>;
}

/// Plain TCP connection.
#[derive(Debug, Default)]
pub struct TcpConnection {
    stream: Option<TcpStream>,
    last_error: Option<(i32, String)>,
}

impl TcpConnection {
    pub fn new() -> TcpConnection {
        TcpConnection::default()
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        match self.stream {
            Some(ref mut stream) => Ok(stream),
            None => Err(io::Error::new(ErrorKind::NotConnected, "not connected")),
        }
    }

    fn record<T>(&mut self, res: io::Result<T>) -> io::Result<T> {
        if let Err(ref e) = res {
            self.last_error = Some((e.raw_os_error().unwrap_or(-1), e.to_string()));
        }
        res
    }
}

impl Connection for TcpConnection {
    fn connect(&mut self, address: &str) -> io::Result<()> {
        debug!("Connecting to {}", address);
        let res = TcpStream::connect(address);
        let stream = self.record(res)?;
        let nodelay = stream.set_nodelay(true);
        self.record(nodelay)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let res = self.stream().and_then(|s| s.write_all(data).and_then(|_| s.flush()));
        self.record(res).map(|_| data.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let res = self.stream().and_then(|s| s.read(buf));
        match self.record(res) {
            // is_data_pending said there was something, so a zero read is the peer hanging up
            Ok(0) if !buf.is_empty() => {
                let eof = Err(io::Error::new(ErrorKind::UnexpectedEof, "connection closed by server"));
                self.record(eof)
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            other => other,
        }
    }

    fn is_data_pending(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut probe = [0u8; 1];
        let timeout = timeout.max(Duration::from_millis(1));
        let res = self.stream().and_then(|s| {
            s.set_read_timeout(Some(timeout))?;
            let peeked = s.peek(&mut probe);
            s.set_read_timeout(None)?;
            peeked
        });
        match res {
            // a closed stream peeks zero bytes; report it so receive sees the EOF
            Ok(_) => Ok(true),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(false)
            }
            Err(e) => self.record(Err(e)),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn last_error(&self) -> Option<(i32, String)> {
        self.last_error.clone()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::Connection;
    use std::collections::VecDeque;
    use std::io::{self, ErrorKind};
    use std::time::Duration;

    /// Scripted server side: each command the client sends pops the next
    /// canned reply, which is then handed out in chunks of `chunk` bytes.
    pub struct MockConnection {
        pub greeting: Vec<u8>,
        pub replies: VecDeque<(String, Vec<u8>)>,
        pub sent: Vec<String>,
        pub chunk: usize,
        pub fail_connect: bool,
        pub closed: bool,
        pending: VecDeque<u8>,
    }

    impl MockConnection {
        pub fn new(greeting: &str) -> MockConnection {
            MockConnection {
                greeting: greeting.as_bytes().to_vec(),
                replies: VecDeque::new(),
                sent: Vec::new(),
                chunk: 4096,
                fail_connect: false,
                closed: false,
                pending: VecDeque::new(),
            }
        }

        /// Raw bytes available straight away, without a greeting or command.
        pub fn with_pending(data: &[u8], chunk: usize) -> MockConnection {
            let mut conn = MockConnection::new("");
            conn.pending.extend(data);
            conn.chunk = chunk;
            conn
        }

        /// Queues `reply` for the next command starting with `command`.
        pub fn reply(mut self, command: &str, reply: &str) -> MockConnection {
            self.replies.push_back((command.to_string(), reply.as_bytes().to_vec()));
            self
        }

        pub fn commands(&self) -> Vec<&str> {
            self.sent.iter().map(|s| s.trim_end()).collect()
        }
    }

    impl Connection for MockConnection {
        fn connect(&mut self, _address: &str) -> io::Result<()> {
            if self.fail_connect {
                return Err(io::Error::new(ErrorKind::ConnectionRefused, "refused"));
            }
            let greeting = self.greeting.clone();
            self.pending.extend(greeting);
            Ok(())
        }

        fn send(&mut self, data: &[u8]) -> io::Result<usize> {
            let line = String::from_utf8_lossy(data).into_owned();
            self.sent.push(line.clone());
            let matches = self.replies.front().map_or(false, |&(ref cmd, _)| line.starts_with(cmd.as_str()));
            if matches {
                if let Some((_, reply)) = self.replies.pop_front() {
                    self.pending.extend(reply);
                }
            } else if !line.starts_with("QUIT") {
                panic!("unexpected command {:?}", line);
            }
            Ok(data.len())
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.pending.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.pending.pop_front().unwrap_or(0);
            }
            Ok(n)
        }

        fn is_data_pending(&mut self, _timeout: Duration) -> io::Result<bool> {
            Ok(!self.pending.is_empty())
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn last_error(&self) -> Option<(i32, String)> {
            None
        }
    }
}

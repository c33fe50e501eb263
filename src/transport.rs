use crate::config::PopperConfig;
use crate::connection::Connection;
use crate::errors::*;
use crate::progress::Reporter;
use crate::reader::{ReceivedReply, ResponseReader};
use crate::utils;

/// Classified answer of the server.
#[derive(Debug)]
pub enum Reply {
    Positive(ReceivedReply),
    /// The server's reason, ready to be shown to the user.
    Negative(String),
    /// A stop request cut the read short.
    Interrupted,
}

/// Which message is in transfer, for per-chunk progress.
#[derive(Clone, Copy, Debug)]
pub struct MailTransfer {
    /// 1-based position among the new messages.
    pub index: usize,
    pub count: usize,
    pub msg_size: usize,
    pub total_size: usize,
}

/// Line-oriented command channel on top of a [`Connection`].
pub struct Transport<C> {
    conn: C,
    reader: ResponseReader,
    connected: bool,
}

impl<C: Connection> Transport<C> {
    pub fn new(conn: C, config: &PopperConfig) -> Transport<C> {
        Transport {
            conn,
            reader: ResponseReader::new(config),
            connected: false,
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connect(&mut self, address: &str, server: &str) -> Result<()> {
        self.conn
            .connect(address)
            .chain_err(|| ErrorKind::ConnectFailed(server.to_string()))?;
        self.connected = true;
        Ok(())
    }

    /// Sends `command`, followed by `secret` if given. The secret is kept out of the log.
    pub fn send(&mut self, command: &str, secret: Option<&str>) -> Result<()> {
        let line = match secret {
            Some(secret) => {
                info!("C: {} password_omitted_here", command);
                format!("{} {}\r\n", command, secret)
            }
            None => {
                info!("C: {}", command);
                format!("{}\r\n", command)
            }
        };
        let sent = self.conn.send(line.as_bytes())?;
        if sent != line.len() {
            bail!(ErrorKind::SendFailed(sent, line.len()));
        }
        Ok(())
    }

    /// Waits for the answer to the last command.
    pub fn exchange(
        &mut self,
        reporter: &mut Reporter,
        multi_line: bool,
        mail: Option<MailTransfer>,
    ) -> Result<Reply> {
        let size_hint = mail.map_or(0, |m| m.msg_size);
        if let Some(m) = mail {
            debug!("announced msg-size: {}", m.msg_size);
        }
        let stop = reporter.stop_flag().clone();
        let reply = {
            let mut on_chunk = |num_bytes: usize| {
                if let Some(m) = mail {
                    let delta = (100.0 * num_bytes as f32) / (m.total_size.max(1) as f32);
                    let detail = format!("size: {}", utils::bytes_to_string(m.msg_size));
                    reporter.mail(m.index, m.count, delta, Some(detail));
                }
            };
            self.reader
                .receive(&mut self.conn, &stop, multi_line, size_hint, &mut on_chunk)?
        };

        if !reply.complete {
            debug!("Reading interrupted");
            return Ok(Reply::Interrupted);
        }
        if multi_line && mail.is_none() && reply.is_positive() {
            debug!("S: {}", String::from_utf8_lossy(&reply.body));
        }
        if reply.is_positive() {
            Ok(Reply::Positive(reply))
        } else {
            Ok(Reply::Negative(utils::reply_text(&reply.status_line)))
        }
    }

    /// Like [`exchange`](Transport::exchange), but a negative answer is an
    /// error. `None` when interrupted.
    pub fn expect_positive(
        &mut self,
        reporter: &mut Reporter,
        multi_line: bool,
        mail: Option<MailTransfer>,
    ) -> Result<Option<ReceivedReply>> {
        match self.exchange(reporter, multi_line, mail)? {
            Reply::Positive(reply) => Ok(Some(reply)),
            Reply::Negative(text) => bail!(ErrorKind::NegativeReply(text)),
            Reply::Interrupted => Ok(None),
        }
    }

    /// Says goodbye to the server and closes the connection. Errors are
    /// ignored, we are leaving anyway.
    pub fn quit(&mut self, reporter: &mut Reporter, wait_for_answer: bool) {
        if !self.connected {
            return;
        }
        let res = self.send("QUIT", None).and_then(|_| {
            if wait_for_answer {
                self.exchange(reporter, false, None).map(|_| ())
            } else {
                Ok(())
            }
        });
        if let Err(e) = res {
            warn!("Ignoring error during QUIT: {}", e);
        }
        self.close();
    }

    pub fn close(&mut self) {
        if self.connected {
            self.conn.close();
            self.connected = false;
        }
    }

    pub fn last_error(&self) -> Option<(i32, String)> {
        self.conn.last_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::MockConnection;
    use crate::progress::{ProgressEvent, StopFlag};
    use std::sync::mpsc::channel;
    use std::sync::Mutex;

    fn transport(conn: MockConnection) -> Transport<MockConnection> {
        let mut t = Transport::new(conn, &PopperConfig::default());
        t.connect("localhost:110", "localhost").unwrap();
        t
    }

    fn reporter() -> Reporter {
        Reporter::new("test", Box::new(()), StopFlag::new())
    }

    #[test]
    fn commands_end_in_crlf() {
        let conn = MockConnection::new("+OK\r\n").reply("PASS", "+OK\r\n");
        let mut t = transport(conn);
        let mut rep = reporter();
        t.expect_positive(&mut rep, false, None).unwrap();
        t.send("PASS", Some("tanstaaf")).unwrap();
        assert_eq!(t.connection().sent, vec!["PASS tanstaaf\r\n".to_string()]);
    }

    struct CapturingLogger;

    lazy_static! {
        static ref LOGGED: Mutex<Vec<String>> = Mutex::new(Vec::new());
    }

    impl log::Log for CapturingLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if let Ok(mut lines) = LOGGED.lock() {
                lines.push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: CapturingLogger = CapturingLogger;

    #[test]
    fn password_never_reaches_the_log() {
        // another test of this binary may have installed the logger already
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);

        let conn = MockConnection::new("+OK\r\n").reply("PASS", "+OK\r\n");
        let mut t = transport(conn);
        let mut rep = reporter();
        t.expect_positive(&mut rep, false, None).unwrap();
        t.send("PASS", Some("x9-never-logged")).unwrap();
        t.expect_positive(&mut rep, false, None).unwrap();

        let lines = LOGGED.lock().unwrap();
        assert!(lines.iter().any(|l| l == "C: PASS password_omitted_here"), "{:?}", *lines);
        assert!(lines.iter().all(|l| !l.contains("x9-never-logged")));
    }

    #[test]
    fn negative_reply_carries_reason() {
        let conn = MockConnection::new("-ERR mailbox busy\r\n");
        let mut t = transport(conn);
        match t.exchange(&mut reporter(), false, None).unwrap() {
            Reply::Negative(text) => assert_eq!(text, "mailbox busy"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn expect_positive_turns_negative_into_error() {
        let conn = MockConnection::new("-ERR no\r\n");
        let mut t = transport(conn);
        let err = t.expect_positive(&mut reporter(), false, None).unwrap_err();
        assert_eq!(err.to_string(), "Server answers: \nno");
    }

    #[test]
    fn message_transfer_reports_every_chunk() {
        let mut conn = MockConnection::new("+OK\r\nSubject: hi\r\n\r\nbody\r\n.\r\n");
        conn.chunk = 8;
        let mut t = transport(conn);
        let (tx, rx) = channel::<ProgressEvent>();
        let mut rep = Reporter::new("test", Box::new(tx), StopFlag::new());
        let mail = MailTransfer {
            index: 1,
            count: 2,
            msg_size: 25,
            total_size: 50,
        };
        let reply = t.expect_positive(&mut rep, true, Some(mail)).unwrap().unwrap();
        assert_eq!(reply.body, b"Subject: hi\r\n\r\nbody\r\n".to_vec());

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        let total: f32 = events
            .iter()
            .map(|ev| match *ev {
                ProgressEvent::Mail(ref m) => {
                    assert_eq!(m.leading_text(), "1 of 2");
                    assert_eq!(m.detail.as_ref().map(|s| s.as_str()), Some("size: 25 bytes"));
                    m.delta
                }
                _ => panic!("expected mail events only"),
            })
            .sum();
        // 29 bytes on the wire against a total of 50
        assert!((total - 58.0).abs() < 0.01);
    }

    #[test]
    fn quit_closes_even_without_answer() {
        let conn = MockConnection::new("+OK\r\n");
        let mut t = transport(conn);
        t.quit(&mut reporter(), false);
        assert!(!t.is_connected());
        assert!(t.connection().closed);
        assert_eq!(t.connection().commands(), vec!["QUIT"]);
    }
}

//! The retrieval job: a POP3 session driven through its states.

use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};

use regex::Regex;

use crate::account::{Account, MailStore};
use crate::auth::{CredentialResolver, Credentials, PasswordPrompt};
use crate::config::{AuthMethod, PopperConfig, RunMode};
use crate::connection::Connection;
use crate::errors::*;
use crate::pop3result::{EmailMetadata, POP3List, POP3Stat, POP3Uidl};
use crate::progress::{ProgressSink, Reporter, StopFlag};
use crate::transport::{MailTransfer, Reply, Transport};
use crate::utils;

lazy_static! {
    static ref BANNER: Regex = Regex::new(r"<[^<>\s]+>").unwrap();
}

/// The states of a job, in the order they run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopState {
    Connect,
    Login,
    Check,
    Retrieve,
    Disconnect,
    Done,
}

impl PopState {
    pub fn label(self) -> &'static str {
        match self {
            PopState::Connect => "connect...",
            PopState::Login => "login...",
            PopState::Check => "check...",
            PopState::Retrieve => "get...",
            PopState::Disconnect => "quit...",
            PopState::Done => "done",
        }
    }

    fn next(self) -> PopState {
        match self {
            PopState::Connect => PopState::Login,
            PopState::Login => PopState::Check,
            PopState::Check => PopState::Retrieve,
            PopState::Retrieve => PopState::Disconnect,
            PopState::Disconnect | PopState::Done => PopState::Done,
        }
    }
}

/// Coarse progress per state; five working states make up 100 percent.
const STATE_DELTA: f32 = 100.0 / 5.0;

/// What one run has learned about the maildrop.
#[derive(Debug)]
pub struct Session {
    pub state: PopState,
    /// Number of messages on the server.
    pub msg_count: usize,
    /// Unique id of message `n` at index `n - 1`, `None` without UIDL.
    pub uids: Vec<Option<String>>,
    /// Messages not downloaded before, in server order.
    pub new_messages: Vec<EmailMetadata>,
    pub new_total_size: usize,
    /// How many of the new messages have been stored.
    pub current: usize,
    /// Timestamp banner of the greeting, empty if the server sent none.
    pub banner: String,
}

impl Session {
    fn new() -> Session {
        Session {
            state: PopState::Connect,
            msg_count: 0,
            uids: Vec::new(),
            new_messages: Vec::new(),
            new_total_size: 0,
            current: 0,
            banner: String::new(),
        }
    }

    pub fn uid(&self, msg_id: usize) -> Option<&str> {
        msg_id
            .checked_sub(1)
            .and_then(|i| self.uids.get(i))
            .and_then(|uid| uid.as_ref().map(|s| s.as_str()))
    }
}

/// Why a job failed.
#[derive(Debug)]
pub struct Failure {
    pub error: Error,
    /// Last error code and text of the connection, if it had one.
    pub transport_error: Option<(i32, String)>,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some((code, ref text)) = self.transport_error {
            write!(f, "\nerror: {}, {}", code, text)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    /// Stopped on request; not an error.
    Stopped,
    Failed(Failure),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        match *self {
            JobOutcome::Completed => true,
            _ => false,
        }
    }
}

/// Fetches new mail of one account.
pub struct Popper<C> {
    account: Box<dyn Account>,
    store: Box<dyn MailStore>,
    credentials: CredentialResolver,
    reporter: Reporter,
    transport: Transport<C>,
    config: PopperConfig,
    session: Session,
    progress: f32,
}

impl<C: Connection> Popper<C> {
    pub fn new(conn: C, account: Box<dyn Account>, store: Box<dyn MailStore>, config: PopperConfig) -> Popper<C> {
        let reporter = Reporter::new(account.name(), Box::new(()), StopFlag::new());
        Popper {
            transport: Transport::new(conn, &config),
            account,
            store,
            credentials: CredentialResolver::non_interactive(),
            reporter,
            config,
            session: Session::new(),
            progress: 0.0,
        }
    }

    /// Lets the job ask for a password when none is stored or the stored one was rejected.
    pub fn with_prompt(mut self, prompt: Box<dyn PasswordPrompt>) -> Popper<C> {
        self.credentials = CredentialResolver::interactive(prompt);
        self
    }

    pub fn with_progress(mut self, sink: Box<dyn ProgressSink>) -> Popper<C> {
        self.reporter.set_sink(sink);
        self
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Popper<C> {
        self.reporter.set_stop_flag(stop);
        self
    }

    /// A handle to stop the job from another thread.
    pub fn stop_flag(&self) -> StopFlag {
        self.reporter.stop_flag().clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn account(&self) -> &dyn Account {
        &*self.account
    }

    pub fn connection(&self) -> &C {
        self.transport.connection()
    }

    /// Runs the job to its end.
    pub fn run(&mut self) -> JobOutcome {
        self.session = Session::new();
        self.progress = 0.0;
        let result = self.drive();
        let state = self.session.state;
        let outcome = match result {
            Ok(true) => {
                let rest = (100.0 - self.progress).max(0.0);
                self.reporter.state(PopState::Done.label(), rest, None);
                JobOutcome::Completed
            }
            Ok(false) => {
                info!("{}: stopped during {:?}", self.account.name(), state);
                self.reporter.state_stopped(state.label());
                JobOutcome::Stopped
            }
            Err(error) => {
                let failure = Failure {
                    error,
                    transport_error: self.transport.last_error(),
                };
                error!("{}: {}", self.account.name(), failure);
                self.reporter.state_failed(state.label());
                JobOutcome::Failed(failure)
            }
        };
        if self.transport.is_connected() {
            self.transport.quit(&mut self.reporter, false);
        }
        outcome
    }

    /// Steps through the states. `Ok(false)` when stopped.
    fn drive(&mut self) -> Result<bool> {
        while self.session.state != PopState::Done {
            if !self.reporter.should_continue() {
                return Ok(false);
            }
            let state = self.session.state;
            let delta = if state == PopState::Connect { 0.0 } else { STATE_DELTA };
            self.progress += delta;
            self.reporter.state(state.label(), delta, None);
            trace!("POP3State::{:?}", state);

            let carry_on = match state {
                PopState::Connect => self.connect()?,
                PopState::Login => self.login()?,
                PopState::Check => self.check()?,
                PopState::Retrieve => self.retrieve()?,
                PopState::Disconnect => self.disconnect()?,
                PopState::Done => true,
            };
            if !carry_on {
                return Ok(false);
            }
            match (self.config.mode, state) {
                (RunMode::ProbeOnly, PopState::Connect) | (RunMode::AuthOnly, PopState::Login) => {
                    debug!("{:?} satisfied after {:?}", self.config.mode, state);
                    return Ok(true);
                }
                _ => {}
            }
            self.session.state = state.next();
        }
        Ok(true)
    }

    fn connect(&mut self) -> Result<bool> {
        let address = self.account.address();
        self.transport.connect(&address, &address)?;
        let greeting = match self.transport.expect_positive(&mut self.reporter, false, None)? {
            Some(reply) => reply,
            None => return Ok(false),
        };
        if let Some(banner) = BANNER.find_iter(&greeting.status_line).last() {
            debug!("Server offers APOP with {}", banner.as_str());
            self.session.banner = banner.as_str().to_string();
        }
        Ok(true)
    }

    fn login(&mut self) -> Result<bool> {
        let use_apop = !self.session.banner.is_empty() && self.account.auth_method() == AuthMethod::Apop;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let creds = match self
                .credentials
                .resolve(&*self.account, self.reporter.stop_flag(), attempt > 1)?
            {
                Some(creds) => creds,
                None => {
                    info!("{}: login cancelled", self.account.name());
                    return Ok(false);
                }
            };
            let reply = if use_apop {
                self.apop(&creds)?
            } else {
                match self.user_pass(&creds)? {
                    Some(reply) => reply,
                    None => return Ok(false),
                }
            };
            match reply {
                Reply::Positive(_) => return Ok(true),
                Reply::Interrupted => return Ok(false),
                Reply::Negative(text) => {
                    warn!("{}: login rejected: {}", self.account.name(), text);
                    if !self.credentials.is_interactive() || attempt >= self.config.max_login_attempts {
                        bail!(ErrorKind::CredentialsRejected(text));
                    }
                }
            }
        }
    }

    fn apop(&mut self, creds: &Credentials) -> Result<Reply> {
        trace!("Authenticating using APOP");
        let digest = utils::get_apop_digest(&self.session.banner, &creds.password);
        self.transport.send(&format!("APOP {} {}", creds.username, digest), None)?;
        self.transport.exchange(&mut self.reporter, false, None)
    }

    /// `None` if interrupted before the password was sent.
    fn user_pass(&mut self, creds: &Credentials) -> Result<Option<Reply>> {
        trace!("Plain USER/PASS authentication");
        self.transport.send(&format!("USER {}", creds.username), None)?;
        if self.transport.expect_positive(&mut self.reporter, false, None)?.is_none() {
            return Ok(None);
        }
        self.transport.send("PASS", Some(&creds.password))?;
        self.transport.exchange(&mut self.reporter, false, None).map(Some)
    }

    fn check(&mut self) -> Result<bool> {
        self.transport.send("STAT", None)?;
        let stat = match self.transport.expect_positive(&mut self.reporter, false, None)? {
            Some(reply) => POP3Stat::parse(&reply.status_line)?,
            None => return Ok(false),
        };
        let count = stat.num_mails;
        self.session.msg_count = count;
        self.session.uids = vec![None; count];
        self.session.new_messages.clear();
        self.session.new_total_size = 0;
        if count == 0 {
            self.reporter.mail(0, 0, 0.0, None);
            return Ok(true);
        }

        // UIDL is optional, without it nothing can be recognised as already downloaded
        self.transport.send("UIDL", None)?;
        match self.transport.exchange(&mut self.reporter, true, None)? {
            Reply::Positive(reply) => {
                for entry in POP3Uidl::parse(&reply.body)?.uids {
                    if entry.msg_id > count {
                        bail!(ErrorKind::BadReply("UIDL"));
                    }
                    self.session.uids[entry.msg_id - 1] = Some(entry.uid);
                }
            }
            Reply::Negative(text) => warn!("{}: no UIDL support ({})", self.account.name(), text),
            Reply::Interrupted => return Ok(false),
        }

        self.transport.send("LIST", None)?;
        let list = match self.transport.expect_positive(&mut self.reporter, true, None)? {
            Some(reply) => POP3List::parse(&reply.body)?,
            None => return Ok(false),
        };
        for entry in list.mailbox {
            if entry.msg_id == 0 || entry.msg_id > count {
                bail!(ErrorKind::BadReply("LIST"));
            }
            if self.is_downloaded(entry.msg_id) {
                trace!("Message {} has been downloaded before", entry.msg_id);
                continue;
            }
            self.session.new_total_size = self
                .session
                .new_total_size
                .checked_add(entry.msg_size)
                .ok_or_else(|| Error::from(ErrorKind::BadReply("LIST")))?;
            self.session.new_messages.push(entry);
        }
        self.session.new_messages.sort_by_key(|m| m.msg_id);
        info!(
            "{}: {} of {} messages are new ({})",
            self.account.name(),
            self.session.new_messages.len(),
            count,
            utils::bytes_to_string(self.session.new_total_size)
        );
        Ok(true)
    }

    fn is_downloaded(&self, msg_id: usize) -> bool {
        self.session
            .uid(msg_id)
            .map_or(false, |uid| self.account.is_already_downloaded(uid))
    }

    fn retrieve(&mut self) -> Result<bool> {
        let count = self.session.new_messages.len();
        for i in 0..count {
            let msg = self.session.new_messages[i];
            if self.is_downloaded(msg.msg_id) {
                continue;
            }
            self.transport.send(&format!("RETR {}", msg.msg_id), None)?;
            let mail = MailTransfer {
                index: self.session.current + 1,
                count,
                msg_size: msg.msg_size,
                total_size: self.session.new_total_size,
            };
            let reply = match self.transport.expect_positive(&mut self.reporter, true, Some(mail))? {
                Some(reply) => reply,
                None => return Ok(false),
            };
            self.store
                .store(&reply.body, self.account.name())
                .map_err(|e| Error::from(ErrorKind::MailStore(e.to_string())))?;
            if let Some(uid) = self.session.uid(msg.msg_id).map(|s| s.to_string()) {
                self.account.mark_downloaded(&uid);
            }
            self.session.current += 1;

            if self.account.delete_after_fetch() {
                self.transport.send(&format!("DELE {}", msg.msg_id), None)?;
                if self.transport.expect_positive(&mut self.reporter, false, None)?.is_none() {
                    return Ok(false);
                }
            }
        }
        if self.session.current > 0 {
            self.reporter
                .mail(self.session.current, count, 0.0, Some("done".to_string()));
        }
        Ok(true)
    }

    fn disconnect(&mut self) -> Result<bool> {
        // everything is stored by now; a stop or timeout while waiting for the answer is ignored
        self.transport.quit(&mut self.reporter, true);
        Ok(true)
    }
}

impl<C: Connection + Send + 'static> Popper<C> {
    /// Runs the job on its own thread. The popper comes back with the
    /// outcome, so the account's downloaded ids can be saved.
    pub fn spawn(mut self) -> io::Result<JoinHandle<(JobOutcome, Popper<C>)>> {
        thread::Builder::new()
            .name(format!("popper-{}", self.account.name()))
            .spawn(move || {
                let outcome = self.run();
                (outcome, self)
            })
    }
}

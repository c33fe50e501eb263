//! A POP3 mail retrieval client.
//!
//! A [`Popper`] runs one retrieval job for one account: it connects, logs in
//! (APOP when the server offers a timestamp banner, USER/PASS otherwise),
//! checks the maildrop with STAT/UIDL/LIST, fetches every message whose
//! unique id the account has not seen yet, hands it to a [`MailStore`] and
//! finally says QUIT. Progress is reported through a [`ProgressSink`] and the
//! job can be stopped at any time through its [`StopFlag`].

#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
extern crate md5;
extern crate regex;
#[cfg(feature = "serde")]
extern crate serde;

pub mod errors {
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
            UTF8Error(::std::string::FromUtf8Error);
            ParseInt(::std::num::ParseIntError);
        }

        errors {
            ConnectFailed(server: String) {
                description("could not connect to POP-server")
                display("Could not connect to POP-Server {}", server)
            }
            SendFailed(sent: usize, expected: usize) {
                description("error during send")
                display("error during send, sent only {} bytes instead of {}", sent, expected)
            }
            ReceiveFailed {
                description("error during receive")
                display("error during receive")
            }
            ReceiveTimeout(secs: u64) {
                description("timeout during receive from POP-server")
                display("timeout during receive from POP-server ({}s)", secs)
            }
            BadReply(command: &'static str) {
                description("answer has unknown format")
                display("answer to {} has unknown format", command)
            }
            NegativeReply(text: String) {
                description("server answered negatively")
                display("Server answers: \n{}", text)
            }
            CredentialsRejected(text: String) {
                description("login failed")
                display("Login failed, server answers: \n{}", text)
            }
            NoCredentials(account: String) {
                description("no password available")
                display("No password available for account {}", account)
            }
            MailStore(reason: String) {
                description("could not store mail")
                display("Could not store mail: {}", reason)
            }
        }
    }
}

mod account;
mod auth;
mod config;
pub mod connection;
mod popper;
pub mod pop3result;
mod pop3resultimpl;
mod progress;
pub mod reader;
mod transport;
mod utils;

pub use account::{Account, MailStore, PopAccount, StoreError};
pub use auth::{CredentialResolver, Credentials, PasswordPrompt};
pub use config::{AccountConfig, AuthMethod, PopperConfig, RunMode};
pub use connection::{Connection, TcpConnection};
pub use popper::{Failure, JobOutcome, PopState, Popper, Session};
pub use progress::{MailEvent, ProgressEvent, ProgressSink, Reporter, StateEvent, StopFlag};
pub use reader::{stuff, unstuff};
pub use utils::{bytes_to_string, get_apop_digest};

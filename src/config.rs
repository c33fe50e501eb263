use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the session authenticates against the server.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    /// APOP whenever the greeting carries a timestamp banner, USER/PASS otherwise.
    Apop,
    /// Always USER/PASS.
    Plain,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Apop
    }
}

/// Static settings of a POP3 account.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct AccountConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Empty when the password has to be asked for on every login.
    pub password: String,
    pub store_password: bool,
    pub auth: AuthMethod,
    pub delete_after_fetch: bool,
}

impl AccountConfig {
    pub fn new(name: &str, host: &str, username: &str) -> AccountConfig {
        AccountConfig {
            name: name.to_string(),
            host: host.to_string(),
            port: 110,
            username: username.to_string(),
            password: String::new(),
            store_password: false,
            auth: AuthMethod::default(),
            delete_after_fetch: false,
        }
    }

    /// `host:port`, as handed to [`Connection::connect`](crate::Connection::connect).
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where a run stops.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Connect, login, check, retrieve, disconnect.
    Fetch,
    /// Stop successfully once the login went through.
    AuthOnly,
    /// Stop successfully once the server greeted us.
    ProbeOnly,
}

/// Tunables of a retrieval job.
#[derive(Clone, Debug)]
pub struct PopperConfig {
    /// Upper bound for a single read from the network.
    pub net_buf_size: usize,
    /// How long to wait for the server before giving up.
    pub receive_timeout: Duration,
    /// Granularity of the receive loop; cancellation is noticed after at most one slice.
    pub feedback_slice: Duration,
    pub max_login_attempts: u32,
    pub mode: RunMode,
}

impl Default for PopperConfig {
    fn default() -> Self {
        PopperConfig {
            net_buf_size: 16384,
            receive_timeout: Duration::from_secs(60),
            feedback_slice: Duration::from_millis(200),
            max_login_attempts: 3,
            mode: RunMode::Fetch,
        }
    }
}

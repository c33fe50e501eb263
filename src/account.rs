use std::collections::HashSet;
use std::fmt;
use std::io;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{AccountConfig, AuthMethod};

/// What a retrieval job needs to know about the account it runs for.
///
/// The set of already downloaded unique ids belongs to the account; the job
/// only asks and marks.
pub trait Account: Send {
    fn name(&self) -> &str;
    fn address(&self) -> String;
    fn username(&self) -> &str;
    /// The stored password, empty if none is kept.
    fn stored_secret(&self) -> &str;
    fn auth_method(&self) -> AuthMethod;
    fn delete_after_fetch(&self) -> bool;
    fn is_already_downloaded(&self, uid: &str) -> bool;
    fn mark_downloaded(&mut self, uid: &str);
}

/// An account built from an [`AccountConfig`] that remembers downloaded ids in memory.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug)]
pub struct PopAccount {
    pub config: AccountConfig,
    pub downloaded: HashSet<String>,
}

impl PopAccount {
    pub fn new(config: AccountConfig) -> PopAccount {
        PopAccount {
            config,
            downloaded: HashSet::new(),
        }
    }
}

impl Account for PopAccount {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn address(&self) -> String {
        self.config.address()
    }

    fn username(&self) -> &str {
        &self.config.username
    }

    fn stored_secret(&self) -> &str {
        if self.config.store_password {
            &self.config.password
        } else {
            ""
        }
    }

    fn auth_method(&self) -> AuthMethod {
        self.config.auth
    }

    fn delete_after_fetch(&self) -> bool {
        self.config.delete_after_fetch
    }

    fn is_already_downloaded(&self, uid: &str) -> bool {
        self.downloaded.contains(uid)
    }

    fn mark_downloaded(&mut self, uid: &str) {
        self.downloaded.insert(uid.to_string());
    }
}

#[derive(Debug)]
pub enum StoreError {
    /// The raw message could not be understood.
    Parse(String),
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            StoreError::Parse(ref reason) => write!(f, "mail format error: {}", reason),
            StoreError::Io(ref err) => write!(f, "{}", err),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> StoreError {
        StoreError::Io(err)
    }
}

/// Takes over a freshly retrieved message.
pub trait MailStore: Send {
    fn store(&mut self, raw: &[u8], account: &str) -> Result<(), StoreError>;
}

use std::fmt;

use crate::account::Account;
use crate::errors::*;
use crate::progress::StopFlag;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<omitted>")
            .finish()
    }
}

/// Asks somebody for the credentials of an account, e.g. through a dialog.
pub trait PasswordPrompt: Send {
    /// `None` means the user declined.
    fn acquire(&mut self, account: &str, username: &str) -> Option<Credentials>;
}

impl<F> PasswordPrompt for F
where
    F: FnMut(&str, &str) -> Option<Credentials> + Send,
{
    fn acquire(&mut self, account: &str, username: &str) -> Option<Credentials> {
        self(account, username)
    }
}

/// Decides where the credentials of a login attempt come from.
pub struct CredentialResolver {
    prompt: Option<Box<dyn PasswordPrompt>>,
}

impl CredentialResolver {
    /// Only ever uses the password stored with the account.
    pub fn non_interactive() -> CredentialResolver {
        CredentialResolver { prompt: None }
    }

    pub fn interactive(prompt: Box<dyn PasswordPrompt>) -> CredentialResolver {
        CredentialResolver { prompt: Some(prompt) }
    }

    pub fn is_interactive(&self) -> bool {
        self.prompt.is_some()
    }

    /// Credentials for the next login attempt, `None` if the attempt was
    /// cancelled. A `retry` follows a rejected password, so the stored one is
    /// not offered again.
    pub fn resolve(&mut self, account: &dyn Account, stop: &StopFlag, retry: bool) -> Result<Option<Credentials>> {
        if stop.is_stopped() {
            return Ok(None);
        }
        if !retry && !account.stored_secret().is_empty() {
            trace!("Using stored password for {}", account.name());
            return Ok(Some(Credentials::new(account.username(), account.stored_secret())));
        }
        let prompt = match self.prompt {
            Some(ref mut prompt) => prompt,
            None => bail!(ErrorKind::NoCredentials(account.name().to_string())),
        };
        debug!("Asking for password of {}", account.name());
        match prompt.acquire(account.name(), account.username()) {
            Some(ref creds) if creds.password.is_empty() => Ok(None),
            Some(_) if stop.is_stopped() => Ok(None),
            Some(creds) => Ok(Some(creds)),
            None => Ok(None),
        }
    }
}

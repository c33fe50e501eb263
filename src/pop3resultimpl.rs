use regex::Regex;

use crate::errors::*;
use crate::pop3result::{EmailMetadata, POP3List, POP3Stat, POP3Uidl, UniqueId};

lazy_static! {
    static ref STAT_REGEX: Regex = Regex::new(r"^\+\S*\s+(?P<nmsg>\d+)\s+(?P<size>\d+)").unwrap();
    static ref LIST_REGEX: Regex = Regex::new(r"^(?P<nmsg>\d+)\s+(?P<size>\d+)").unwrap();
    static ref UIDL_REGEX: Regex = Regex::new(r"^(?P<nmsg>\d+)\s+(?P<uid>[\x21-\x7e]+)\s*$").unwrap();
}

fn number(text: &str, command: &'static str) -> Result<usize> {
    text.parse::<usize>().chain_err(|| ErrorKind::BadReply(command))
}

fn lines(body: &[u8]) -> Result<Vec<String>> {
    let text = String::from_utf8(body.to_vec())?;
    Ok(text
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}

impl POP3Stat {
    /// Parses the status line of a STAT answer, e.g. `+OK 3 1024`.
    pub fn parse(stat_line: &str) -> Result<POP3Stat> {
        let cap = STAT_REGEX
            .captures(stat_line)
            .ok_or_else(|| Error::from(ErrorKind::BadReply("STAT")))?;
        Ok(POP3Stat {
            num_mails: number(&cap["nmsg"], "STAT")?,
            mbox_size: number(&cap["size"], "STAT")?,
        })
    }
}

impl POP3Uidl {
    pub fn parse(body: &[u8]) -> Result<POP3Uidl> {
        let mut uids = Vec::new();
        for line in lines(body)? {
            let cap = UIDL_REGEX
                .captures(&line)
                .ok_or_else(|| Error::from(ErrorKind::BadReply("UIDL")))?;
            let msg_id = number(&cap["nmsg"], "UIDL")?;
            if msg_id == 0 {
                bail!(ErrorKind::BadReply("UIDL"));
            }
            uids.push(UniqueId {
                msg_id,
                uid: cap["uid"].to_string(),
            });
        }
        Ok(POP3Uidl { uids })
    }
}

impl POP3List {
    pub fn parse(body: &[u8]) -> Result<POP3List> {
        let mut mailbox = Vec::new();
        for line in lines(body)? {
            let cap = LIST_REGEX
                .captures(&line)
                .ok_or_else(|| Error::from(ErrorKind::BadReply("LIST")))?;
            mailbox.push(EmailMetadata {
                msg_id: number(&cap["nmsg"], "LIST")?,
                msg_size: number(&cap["size"], "LIST")?,
            })
        }
        Ok(POP3List { mailbox })
    }
}

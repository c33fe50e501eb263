/// One line of a LIST answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailMetadata {
    pub msg_id: usize,
    pub msg_size: usize,
}

/// One line of a UIDL answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueId {
    pub msg_id: usize,
    pub uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct POP3Stat {
    pub num_mails: usize,
    pub mbox_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct POP3Uidl {
    pub uids: Vec<UniqueId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct POP3List {
    pub mailbox: Vec<EmailMetadata>,
}

mod error;
mod gateway;
mod gmail;
mod matcher;
mod parser;
mod reconcile;
mod service;

#[cfg(test)]
mod fixtures;

pub use error::EmailError;
pub use gateway::{
    HistoryLabelChange, HistoryList, HistoryMessage, HistoryRecord, MailboxGateway,
    MailboxProfile, MessageBody, MessageHeader, MessagePart, MessageRef, PartBody,
    RemoteMessage, RemoteThread, ThreadFetch, ThreadList, ThreadSummary,
};
pub use gmail::{extract_body, GmailGateway};
pub use matcher::ClientMatcher;
pub use parser::{
    has_attachments, headers_map, parse_address, parse_address_list, split_references,
    LABEL_INBOX, LABEL_STARRED, LABEL_UNREAD,
};
pub use reconcile::{ThreadOutcome, ThreadReconcile, ThreadReconciler};
pub use service::{EmailSyncService, SyncSettings, RECONNECT_MESSAGE};

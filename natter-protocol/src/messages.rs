//! Outbound message rendering
//!
//! All lines the server sends are built here so the wire text lives in one
//! place. Several notices carry a trailing space; tests pin the exact bytes.

use std::fmt;

/// Body of the join announcement broadcast to the room
pub const ONLINE_BODY: &str = "online ~ ";

/// Body of the departure announcement broadcast to the room
pub const OFFLINE_BODY: &str = "offline ~ ";

/// Notice sent to a client just before an idle disconnect
pub const TIMEOUT_NOTICE: &str = "timeout close connection";

/// A rendered room message: `[<addr>]<name>: <body>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope(String);

impl Envelope {
    /// Render a message from a sender identified by address and name
    pub fn render(addr: &str, name: &str, body: &str) -> Self {
        Envelope(format!("[{addr}]{name}: {body}"))
    }

    pub fn as_line(&self) -> &str {
        &self.0
    }

    pub fn into_line(self) -> String {
        self.0
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One roster line in the `who` reply
pub fn who_entry(addr: &str, name: &str) -> String {
    format!("[{addr}]{name}: Online ... ")
}

/// Reply when a rename target name is already in use
pub fn name_taken(name: &str) -> String {
    format!("{name} has been taken ")
}

/// Reply confirming a successful rename
pub fn name_updated(name: &str) -> String {
    format!("name has been updated: {name} ")
}

/// A direct message as seen by its recipient
pub fn direct_line(addr: &str, name: &str, body: &str) -> String {
    format!("from [{addr}]{name}: {body}")
}

/// Reply when a direct message names nobody online
pub fn target_missing(name: &str) -> String {
    format!("{name} is not exist ")
}

/// Usage reply for a direct message with missing fields
pub fn direct_usage() -> String {
    "message format wrong, please use format like \"to|name|msg\" ".to_string()
}

/// Reply when a direct message body is empty
pub fn empty_body() -> String {
    "msg can't be empty, please try again".to_string()
}

//! FTP reply codes used by the engine, and the static description table
//! consulted when a reply does not carry the expected code.

use lazy_static::lazy_static;
use std::collections::HashMap;

pub const FILE_STATUS_OK: u16 = 150;
pub const COMMAND_OK: u16 = 200;
pub const FILE_STATUS: u16 = 213;
pub const SERVICE_READY: u16 = 220;
pub const CLOSING_CONTROL: u16 = 221;
pub const TRANSFER_COMPLETE: u16 = 226;
pub const ENTERING_PASSIVE: u16 = 227;
pub const LOGGED_IN: u16 = 230;
pub const FILE_ACTION_OK: u16 = 250;
pub const PATHNAME_CREATED: u16 = 257;
pub const NEED_PASSWORD: u16 = 331;
pub const PENDING_FURTHER_INFO: u16 = 350;

pub const UNKNOWN_ERROR: &str = "Unknown error";

lazy_static! {
    static ref DESCRIPTIONS: HashMap<u16, &'static str> = {
        let mut m = HashMap::new();
        m.insert(202, "Command not implemented, superfluous at this site");
        m.insert(421, "Service not available, closing control connection");
        m.insert(425, "Can't open data connection");
        m.insert(426, "Connection closed; transfer aborted");
        m.insert(450, "Requested file action not taken. File unavailable (e.g., file busy)");
        m.insert(451, "Requested action aborted: local error in processing");
        m.insert(452, "Requested action not taken: insufficient storage space in system");
        m.insert(500, "Syntax error, command unrecognized");
        m.insert(501, "Syntax error in parameters or arguments");
        m.insert(502, "Command not implemented");
        m.insert(503, "Bad sequence of commands");
        m.insert(504, "Command not implemented for that parameter");
        m.insert(530, "Not logged in");
        m.insert(
            550,
            "Requested action not taken. File unavailable (e.g., file not found, no access)",
        );
        m.insert(552, "Requested file action aborted: exceeded storage allocation");
        m.insert(553, "Requested action not taken. File name not allowed");
        m
    };
}

/// Human-readable description for a known failure code.
pub fn describe(code: u16) -> Option<&'static str> {
    DESCRIPTIONS.get(&code).copied()
}

//! NNTP status codes handled by the connection state machine.
//!
//! Codes are defined in RFC 3977 §3.2 and RFC 4643 §2.3.

/// Server ready, posting allowed
pub const POSTING_ALLOWED: u16 = 200;
/// Server ready, posting prohibited
pub const NO_POSTING: u16 = 201;
/// Group selected
pub const GROUP_SELECTED: u16 = 211;
/// Body follows
pub const BODY_FOLLOWS: u16 = 222;
/// Article exists
pub const ARTICLE_EXISTS: u16 = 223;
/// Authentication accepted
pub const AUTH_ACCEPTED: u16 = 281;
/// Password required
pub const PASSWORD_REQUIRED: u16 = 381;
/// No such newsgroup
pub const NO_SUCH_GROUP: u16 = 411;
/// No newsgroup selected
pub const NO_GROUP_SELECTED: u16 = 412;
/// Current article number is invalid
pub const INVALID_ARTICLE_REFERENCE: u16 = 420;
/// No article with that number
pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
/// No article with that message-id
pub const NO_SUCH_ARTICLE_ID: u16 = 430;
/// Authentication rejected
pub const AUTH_REJECTED: u16 = 481;
/// Authentication commands issued out of sequence
pub const AUTH_OUT_OF_SEQUENCE: u16 = 482;
/// Command unavailable
pub const COMMAND_UNAVAILABLE: u16 = 502;

/// Whether a greeting code means the server is ready to accept commands.
pub fn is_greeting_ok(code: u16) -> bool {
    matches!(code, POSTING_ALLOWED | NO_POSTING)
}

/// Whether an authentication reply is a terminal rejection.
pub fn is_auth_failure(code: u16) -> bool {
    matches!(
        code,
        AUTH_REJECTED | AUTH_OUT_OF_SEQUENCE | COMMAND_UNAVAILABLE
    )
}
